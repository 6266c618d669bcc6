//! RISC-V register numbers and values.

use crate::memory::AccessWidth;
use crate::RiscvError;

/// Abstract command register number of `x0`.
pub const GPR_BASE: u16 = 0x1000;
/// Abstract command register number of `f0`.
pub const FPR_BASE: u16 = 0x1020;

/// Debugger register number of the first CSR.
pub const CSR_GDB_OFFSET: u32 = 128;
/// Debugger register number of `f0`.
pub const FPU_GDB_OFFSET: u32 = 33;
/// Debugger register number of `fflags`, followed by `frm` and `fcsr`.
pub const FPU_GDB_CSR_OFFSET: u32 = 66;
/// Debugger register number of the program counter.
pub const PC_GDB_REGISTER: u32 = 32;

/// Control and status register addresses.
pub mod csr {
    /// Floating point accrued exceptions.
    pub const FFLAGS: u16 = 0x001;
    /// Floating point rounding mode.
    pub const FRM: u16 = 0x002;
    /// Floating point control and status.
    pub const FCSR: u16 = 0x003;

    /// Machine status.
    pub const MSTATUS: u16 = 0x300;
    /// ISA and extensions.
    pub const MISA: u16 = 0x301;
    /// Machine interrupt enable.
    pub const MIE: u16 = 0x304;
    /// Machine trap handler base address.
    pub const MTVEC: u16 = 0x305;
    /// Machine exception program counter.
    pub const MEPC: u16 = 0x341;
    /// Machine trap cause.
    pub const MCAUSE: u16 = 0x342;
    /// Machine bad address or instruction.
    pub const MTVAL: u16 = 0x343;
    /// Machine interrupt pending.
    pub const MIP: u16 = 0x344;

    /// Trigger select.
    pub const TSELECT: u16 = 0x7a0;
    /// First trigger data register.
    pub const TDATA1: u16 = 0x7a1;
    /// Second trigger data register.
    pub const TDATA2: u16 = 0x7a2;
    /// Trigger info.
    pub const TINFO: u16 = 0x7a4;

    /// Debug control and status.
    pub const DCSR: u16 = 0x7b0;
    /// Debug program counter.
    pub const DPC: u16 = 0x7b1;

    /// Vendor ID.
    pub const MVENDORID: u16 = 0xf11;
    /// Architecture ID.
    pub const MARCHID: u16 = 0xf12;
    /// Implementation ID.
    pub const MIMPID: u16 = 0xf13;
    /// Hardware thread ID.
    pub const MHARTID: u16 = 0xf14;
}

/// `s0`, the scratch register of program buffer sequences.
pub(crate) const S0: u16 = GPR_BASE + 8;

/// A register of a hart, as addressed by abstract commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterLocation {
    /// General purpose register `x0`..=`x31`.
    Gpr(u8),
    /// Floating point register `f0`..=`f31`.
    Fpr(u8),
    /// Control and status register.
    Csr(u16),
}

impl RegisterLocation {
    /// Map a debugger register number onto a hart register.
    ///
    /// 0..=31 are the GPRs, 32 is the PC (read through `dpc`), 33..=64 are the FPRs,
    /// 66..=68 are `fflags`, `frm` and `fcsr`, and 128 onwards address CSRs directly.
    pub fn from_gdb(register: u32) -> Result<Self, RiscvError> {
        match register {
            0..=31 => Ok(Self::Gpr(register as u8)),
            PC_GDB_REGISTER => Ok(Self::Csr(csr::DPC)),
            33..=64 => Ok(Self::Fpr((register - FPU_GDB_OFFSET) as u8)),
            66..=68 => Ok(Self::Csr((register - FPU_GDB_CSR_OFFSET + 1) as u16)),
            CSR_GDB_OFFSET..=0x107f => Ok(Self::Csr((register - CSR_GDB_OFFSET) as u16)),
            _ => Err(RiscvError::InvalidRegister(register)),
        }
    }

    /// The `regno` field of an access register command.
    pub fn regno(&self) -> u16 {
        match *self {
            Self::Gpr(index) => GPR_BASE + u16::from(index),
            Self::Fpr(index) => FPR_BASE + u16::from(index),
            Self::Csr(address) => address,
        }
    }
}

/// A register value of any supported width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    /// 32-bit value.
    U32(u32),
    /// 64-bit value.
    U64(u64),
    /// 128-bit value.
    U128(u128),
}

impl RegisterValue {
    /// Assemble a value of `width` from little endian 32-bit words.
    ///
    /// Missing words read as zero. Widths below 32 bits are truncated.
    pub fn from_words(words: &[u32], width: AccessWidth) -> Self {
        let mut value = 0u128;
        for (index, word) in words.iter().take(width.words()).enumerate() {
            value |= u128::from(*word) << (32 * index);
        }

        match width {
            AccessWidth::Bits8 => Self::U32(value as u32 & 0xff),
            AccessWidth::Bits16 => Self::U32(value as u32 & 0xffff),
            AccessWidth::Bits32 => Self::U32(value as u32),
            AccessWidth::Bits64 => Self::U64(value as u64),
            AccessWidth::Bits128 => Self::U128(value),
        }
    }

    /// Split the value into the 32-bit words of a `width` access, zero extended or
    /// truncated as needed.
    pub fn to_words(self, width: AccessWidth) -> Vec<u32> {
        let value = self.as_u128();
        (0..width.words())
            .map(|index| (value >> (32 * index)) as u32)
            .collect()
    }

    /// The value, zero extended to 128 bits.
    pub fn as_u128(self) -> u128 {
        match self {
            Self::U32(value) => u128::from(value),
            Self::U64(value) => u128::from(value),
            Self::U128(value) => value,
        }
    }

    /// The low 64 bits of the value.
    pub fn as_u64(self) -> u64 {
        self.as_u128() as u64
    }

    /// The low 32 bits of the value.
    pub fn as_u32(self) -> u32 {
        self.as_u128() as u32
    }
}

impl From<u32> for RegisterValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<u64> for RegisterValue {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<u128> for RegisterValue {
    fn from(value: u128) -> Self {
        Self::U128(value)
    }
}
