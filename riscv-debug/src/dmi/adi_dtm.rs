//! RISC-V DTM based on the ARM Debug Interface (ADI)
//!
//! This is used in mixed architecture chips, where the DMI is mapped into the address
//! space of an ADI memory access port.

use std::fmt;

use crate::dmi::{DebugVersion, DmiTransport, DtmInfo};
use crate::DmiError;

/// 32-bit memory access through an ADI access port.
///
/// Implemented by the ARM debug interface of the debug adapter.
pub trait ApMemoryAccess: fmt::Debug {
    /// Read the word at the byte address `address`.
    fn read_word_32(&mut self, address: u64) -> Result<u32, DmiError>;

    /// Write `value` to the byte address `address`.
    fn write_word_32(&mut self, address: u64, value: u32) -> Result<(), DmiError>;

    /// JEP106 designer code of the access port.
    fn designer_code(&self) -> u16;

    /// Index of the debug port the access port sits on.
    fn dev_index(&self) -> u8 {
        0
    }
}

/// Access to the DMI through an ADI memory access port.
#[derive(Debug)]
pub struct AdiDtm<A> {
    ap: A,
    base: u64,
}

impl<A: ApMemoryAccess> AdiDtm<A> {
    /// Create a DTM for the DMI mapped at `base` in the address space of `ap`.
    pub fn new(ap: A, base: u64) -> Self {
        Self { ap, base }
    }

    /// The ArmMemoryInterface is byte addressed, while the DMI is word addressed.
    fn map_address(&self, address: u32) -> u64 {
        self.base + u64::from(address) * 4
    }
}

impl<A: ApMemoryAccess> DmiTransport for AdiDtm<A> {
    fn prepare(&mut self) -> Result<DtmInfo, DmiError> {
        tracing::debug!("Using the DMI mapped at {:#x} of the access port", self.base);

        Ok(DtmInfo {
            designer_code: self.ap.designer_code(),
            version: DebugVersion::V0_13,
            dev_index: self.ap.dev_index(),
            idle_cycles: 0,
            // Word addresses within a 32-bit AP address space
            address_width: 30,
        })
    }

    fn read(&mut self, address: u32) -> Result<u32, DmiError> {
        let mapped = self.map_address(address);
        self.ap.read_word_32(mapped)
    }

    fn write(&mut self, address: u32, value: u32) -> Result<(), DmiError> {
        let mapped = self.map_address(address);
        self.ap.write_word_32(mapped, value)
    }
}
