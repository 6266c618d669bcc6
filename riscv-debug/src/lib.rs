//! # RISC-V external debug support
//!
//! This crate drives the RISC-V Debug Module through its Debug Module Interface (DMI):
//!
//! - [`dmi`]: the DMI bus and its transports (JTAG DTM, ADI access port)
//! - [`debug_module`]: the DM register window shared by all harts behind a DM
//! - [`hart`]: hart metadata and the command status state machine
//! - abstract commands for register and memory access, System Bus Access as the
//!   alternative memory path, and hardware triggers for break- and watchpoints.
//!
//! Everything is synchronous. A call owns the session until it returns; long waits on
//! hardware busy bits are bounded by [`DebugConfig`] timeouts and can be cut short
//! through an [`AbortSignal`].
//!
//! ## Attaching and reading memory
//!
//! ```no_run
//! # use riscv_debug::{RiscvDebugInterface, DebugConfig, RiscvError};
//! # use riscv_debug::dmi::DmiTransport;
//! # fn transport() -> Box<dyn DmiTransport> { unimplemented!() }
//! let mut interface = RiscvDebugInterface::new(DebugConfig::default());
//! let harts = interface.attach(transport())?;
//!
//! let mut hart = interface.hart_interface(harts[0])?;
//! let mut buffer = [0u8; 16];
//! hart.read_memory(0x2000_0000, &mut buffer)?;
//!
//! interface.detach(harts[0])?;
//! # Ok::<(), RiscvError>(())
//! ```

#![warn(missing_docs)]

mod abstract_command;
pub mod config;
pub mod debug_module;
pub mod dmi;
mod error;
pub mod hart;
mod interface;
pub mod isa;
pub mod memory;
pub mod poll;
pub mod registers;
mod sysbus;
pub mod trigger;

pub use config::{DebugConfig, MemoryAccessConfig};
pub use error::{DmiError, ErrorLayer, RiscvError, SystemBusError};
pub use hart::{Hart, HartFlags, HartStatus, MemoryAccessMethod};
pub use interface::{DebugModuleId, DmiBusId, HartId, HartInterface, RiscvDebugInterface};
pub use memory::AccessWidth;
pub use poll::{AbortSignal, Clock, SystemClock};
pub use registers::{RegisterLocation, RegisterValue};
pub use trigger::{BreakWatch, MatchSize, TriggerMode};
