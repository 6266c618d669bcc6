//! Errors reported by the RISC-V debug stack.

use crate::hart::HartStatus;

/// The layer of the debug stack an error originated in.
///
/// Transport errors usually leave the DMI bus in an unknown state and are recovered from by
/// re-attaching. Protocol errors are reported by the Debug Module itself and the failed
/// operation can be re-issued, possibly with a different access width or memory strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, docsplay::Display)]
pub enum ErrorLayer {
    /// transport
    Transport,
    /// protocol
    Protocol,
}

/// An error on the Debug Module Interface bus.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum DmiError {
    /// The DMI operation on address {address:#04x} failed.
    Failed {
        /// DMI address of the failed operation.
        address: u32,
    },

    /// The DMI operation on address {address:#04x} was still in progress after {retries} retries.
    Busy {
        /// DMI address of the operation.
        address: u32,
        /// How often the operation was re-issued.
        retries: u32,
    },

    /// The debug transport module reports unsupported version {0}.
    UnsupportedDtmVersion(u8),

    /// No RISC-V debug transport module responded.
    NoRiscvTarget,

    /// The debug adapter reported an error.
    Adapter(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DmiError {
    /// Wrap an error reported by the debug adapter.
    pub fn adapter(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Adapter(Box::new(error))
    }
}

/// An error reported by the System Bus Access block in `sbcs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, docsplay::Display)]
pub enum SystemBusError {
    /// The system bus timed out.
    Timeout,
    /// A bad address was accessed on the system bus.
    BadAddress,
    /// A misaligned system bus access was attempted.
    Misaligned,
    /// The system bus does not support the requested access size.
    UnsupportedSize,
    /// The system bus reported an unspecified error.
    Other,
    /// A system bus access was started while a previous one was still in progress.
    Busy,
}

impl SystemBusError {
    /// Decode the 3 bit `sberror` field. Returns `None` for 0.
    pub fn from_sberror(sberror: u32) -> Option<Self> {
        match sberror & 0x7 {
            0 => None,
            1 => Some(Self::Timeout),
            2 => Some(Self::BadAddress),
            3 => Some(Self::Misaligned),
            4 => Some(Self::UnsupportedSize),
            _ => Some(Self::Other),
        }
    }
}

/// Errors of the RISC-V debug stack above the DMI transport.
#[derive(Debug, thiserror::Error)]
pub enum RiscvError {
    /// A transfer on the DMI bus failed.
    #[error(transparent)]
    Dmi(#[from] DmiError),
    /// An abstract command completed with an error.
    #[error("Abstract command failed: {0}")]
    AbstractCommand(HartStatus),
    /// A system bus access failed.
    #[error("System bus access failed")]
    SystemBus(#[from] SystemBusError),
    /// Polling a busy bit exceeded its timeout.
    #[error("Timeout while waiting for the debug module")]
    Timeout,
    /// Polling was cancelled through the abort signal.
    #[error("Operation aborted by the host")]
    Aborted,
    /// The Debug Module implements a specification version we cannot drive.
    #[error("Debug Module version {0:?} is not supported")]
    UnsupportedDebugModuleVersion(crate::dmi::DebugVersion),
    /// No usable hart was found on the DMI bus.
    #[error("No harts found on the DMI bus")]
    NoHartsFound,
    /// The hart did not acknowledge a halt or resume request in time.
    #[error("Hart did not acknowledge the {0} request")]
    HaltTimeout(&'static str),
    /// A DMI bus, Debug Module or hart handle does not refer to a live object.
    #[error("Handle does not refer to an attached object")]
    InvalidHandle,
    /// The debugger register number does not map onto a RISC-V register.
    #[error("Register number {0} is not a valid RISC-V register")]
    InvalidRegister(u32),
    /// No match size encoding exists for the requested trigger length.
    #[error("A trigger length of {0} bytes is not supported")]
    UnsupportedTriggerLength(usize),
    /// All hardware trigger slots are in use.
    #[error("No free hardware trigger available")]
    NoTriggerAvailable,
    /// The trigger slot does not exist on this hart.
    #[error("Trigger slot {0} does not exist")]
    InvalidTrigger(usize),
    /// The program buffer cannot hold the sequence required for the operation.
    #[error("The program buffer is too small")]
    ProgramBufferTooSmall,
    /// `misa` could not be read at any register access width.
    #[error("Unable to read misa at any access width")]
    MisaUnreadable,
    /// None of the supported access widths fits the address and remaining length.
    #[error("No access width in {supported:#07b} fits {length} bytes at {address:#x}")]
    NoAccessWidth {
        /// Address of the access.
        address: u64,
        /// Remaining length of the transfer.
        length: usize,
        /// Supported access width mask.
        supported: u8,
    },
    /// The transfer runs past the end of the address space.
    #[error("Transfer of {length} bytes at {address:#x} wraps around the address space")]
    AddressOverflow {
        /// Start address of the transfer.
        address: u64,
        /// Length of the transfer.
        length: usize,
    },
}

impl RiscvError {
    /// The layer of the stack this error came from.
    pub fn layer(&self) -> ErrorLayer {
        match self {
            RiscvError::Dmi(_) => ErrorLayer::Transport,
            _ => ErrorLayer::Protocol,
        }
    }

    /// The hart status if this error came from an abstract command.
    pub fn hart_status(&self) -> Option<HartStatus> {
        match self {
            RiscvError::AbstractCommand(status) => Some(*status),
            _ => None,
        }
    }
}
