//! Harts and their status.

use crate::interface::DebugModuleId;
use crate::memory::{mem_access_width, AccessWidth};
use crate::trigger::{TriggerUse, TRIGGERS_MAX};
use crate::RiscvError;

/// Status of a hart after an abstract command.
///
/// Everything but [`HartStatus::NoError`] and [`HartStatus::Busy`] is decoded from the
/// `cmderr` field of `abstractcs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, docsplay::Display)]
pub enum HartStatus {
    /// no error
    NoError,
    /// the hart is busy
    Busy,
    /// the operation is not supported
    NotSupported,
    /// an exception occurred on the hart
    Exception,
    /// the hart is in the wrong state for the operation
    WrongState,
    /// the hart hit a bus error
    BusError,
    /// the operation failed for an unknown reason
    Other,
}

impl HartStatus {
    /// Decode the 3 bit `cmderr` field of `abstractcs`.
    pub fn from_cmderr(cmderr: u32) -> Self {
        match cmderr & 0x7 {
            0 => Self::NoError,
            1 => Self::Busy,
            2 => Self::NotSupported,
            3 => Self::Exception,
            4 => Self::WrongState,
            5 => Self::BusError,
            _ => Self::Other,
        }
    }
}

/// How memory of a hart is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessMethod {
    /// Abstract "access memory" commands.
    AbstractMemory,
    /// The System Bus Access block of the Debug Module.
    SystemBus,
}

/// Capabilities of a hart, settled at attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HartFlags {
    /// Supported memory access widths, bit N meaning `8 << N` bits.
    pub access_widths: u8,
    /// The memory access strategy of this hart.
    pub memory: MemoryAccessMethod,
    /// Abstract register access only works for GPRs, CSRs go through the program buffer.
    pub data_gpr_only: bool,
}

impl Default for HartFlags {
    fn default() -> Self {
        Self {
            access_widths: AccessWidth::Bits32.mask(),
            memory: MemoryAccessMethod::AbstractMemory,
            data_gpr_only: false,
        }
    }
}

/// A single hardware thread behind a Debug Module.
#[derive(Debug)]
pub struct Hart {
    pub(crate) dm: DebugModuleId,
    pub(crate) hart_idx: u32,
    pub(crate) hartsel: u32,

    /// Width of abstract register accesses, matches XLEN once `misa` is known
    pub(crate) access_width: AccessWidth,
    pub(crate) address_width: u8,
    pub(crate) flags: HartFlags,
    pub(crate) progbuf_size: u8,
    pub(crate) data_count: u8,
    pub(crate) scratch_count: u8,
    pub(crate) status: HartStatus,
    pub(crate) halted: bool,

    pub(crate) extensions: u32,
    pub(crate) vendorid: u32,
    pub(crate) archid: u32,
    pub(crate) implid: u32,
    pub(crate) hartid: u32,

    pub(crate) isa_name: String,

    pub(crate) triggers: usize,
    pub(crate) trigger_uses: [TriggerUse; TRIGGERS_MAX],
}

impl Hart {
    pub(crate) fn new(dm: DebugModuleId, hart_idx: u32, hartsel: u32) -> Self {
        Self {
            dm,
            hart_idx,
            hartsel,
            access_width: AccessWidth::Bits32,
            address_width: 32,
            flags: HartFlags::default(),
            progbuf_size: 0,
            data_count: 0,
            scratch_count: 0,
            status: HartStatus::NoError,
            halted: false,
            extensions: 0,
            vendorid: 0,
            archid: 0,
            implid: 0,
            hartid: 0,
            isa_name: String::new(),
            triggers: 0,
            trigger_uses: [TriggerUse::default(); TRIGGERS_MAX],
        }
    }

    /// The Debug Module this hart belongs to.
    pub fn debug_module(&self) -> DebugModuleId {
        self.dm
    }

    /// Index of the hart within its Debug Module.
    pub fn hart_idx(&self) -> u32 {
        self.hart_idx
    }

    /// The `hartsel` value selecting this hart.
    pub fn hartsel(&self) -> u32 {
        self.hartsel
    }

    /// Native register width of the hart.
    pub fn register_width(&self) -> AccessWidth {
        self.access_width
    }

    /// Width of addresses on this hart in bits.
    pub fn address_width(&self) -> u8 {
        self.address_width
    }

    /// Capability flags.
    pub fn flags(&self) -> HartFlags {
        self.flags
    }

    /// Number of program buffer words.
    pub fn progbuf_size(&self) -> u8 {
        self.progbuf_size
    }

    /// Number of implemented `data` registers.
    pub fn data_count(&self) -> u8 {
        self.data_count
    }

    /// Number of `dscratch` registers, from `hartinfo`.
    pub fn scratch_count(&self) -> u8 {
        self.scratch_count
    }

    /// Status left by the last abstract command.
    pub fn status(&self) -> HartStatus {
        self.status
    }

    /// Whether the hart is halted by the debugger.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// The `misa` extension bitmap, bit 0 being 'A'.
    pub fn extensions(&self) -> u32 {
        self.extensions
    }

    /// `mvendorid`
    pub fn vendorid(&self) -> u32 {
        self.vendorid
    }

    /// `marchid`
    pub fn archid(&self) -> u32 {
        self.archid
    }

    /// `mimpid`
    pub fn implid(&self) -> u32 {
        self.implid
    }

    /// `mhartid`
    pub fn hartid(&self) -> u32 {
        self.hartid
    }

    /// Canonical ISA string, e.g. `rv32imac`.
    pub fn isa_name(&self) -> &str {
        &self.isa_name
    }

    /// Number of trigger slots found.
    pub fn trigger_count(&self) -> usize {
        self.triggers
    }

    /// Usage of trigger `slot`.
    pub fn trigger_use(&self, slot: usize) -> Option<TriggerUse> {
        (slot < self.triggers).then(|| self.trigger_uses[slot])
    }

    /// The width to use for the next access of a transfer of `length` bytes at `address`.
    pub fn mem_access_width(&self, address: u64, length: usize) -> Result<AccessWidth, RiscvError> {
        mem_access_width(self.flags.access_widths, address, length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0 => HartStatus::NoError)]
    #[test_case(1 => HartStatus::Busy)]
    #[test_case(2 => HartStatus::NotSupported)]
    #[test_case(3 => HartStatus::Exception)]
    #[test_case(4 => HartStatus::WrongState)]
    #[test_case(5 => HartStatus::BusError)]
    #[test_case(6 => HartStatus::Other; "reserved value")]
    #[test_case(7 => HartStatus::Other)]
    fn cmderr_decoding(cmderr: u32) -> HartStatus {
        HartStatus::from_cmderr(cmderr)
    }

    #[test]
    fn new_hart_only_knows_its_selector() {
        let hart = Hart::new(DebugModuleId(0), 3, 3);
        assert_eq!(hart.hartsel(), 3);
        assert_eq!(hart.status(), HartStatus::NoError);
        assert_eq!(hart.trigger_use(0), None);
        assert_eq!(hart.mem_access_width(0x1000, 8).unwrap(), AccessWidth::Bits32);
    }
}
