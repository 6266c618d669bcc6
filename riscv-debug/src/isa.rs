//! Decoding of the `misa` CSR.

use crate::memory::AccessWidth;
use crate::registers::RegisterValue;

/// Mask of the extension bits of `misa`, bit 0 being 'A'.
pub const EXTENSIONS_MASK: u32 = 0x03ff_ffff;

/// Position of the MXL field in the canonical 32-bit form of `misa`.
const MXL_SHIFT: u32 = 30;

/// Single letter extensions in the order they appear in an ISA string.
const CANONICAL_ORDER: &[char] = &[
    'm', 'a', 'f', 'd', 'q', 'l', 'c', 'b', 'j', 't', 'p', 'v', 'n',
];

/// Native register width of a hart as reported by `misa.MXL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Xlen {
    /// RV32
    Rv32,
    /// RV64
    Rv64,
    /// RV128
    Rv128,
}

impl Xlen {
    /// Width in bits.
    pub fn bits(self) -> u32 {
        match self {
            Xlen::Rv32 => 32,
            Xlen::Rv64 => 64,
            Xlen::Rv128 => 128,
        }
    }

    /// The register access width matching this XLEN.
    pub fn access_width(self) -> AccessWidth {
        match self {
            Xlen::Rv32 => AccessWidth::Bits32,
            Xlen::Rv64 => AccessWidth::Bits64,
            Xlen::Rv128 => AccessWidth::Bits128,
        }
    }
}

/// `misa` in its canonical 32-bit form: MXL in bits 31:30, extensions in bits 25:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Misa(pub u32);

impl Misa {
    /// Fold a `misa` value read at any width into the 32-bit form.
    ///
    /// For wider reads, MXL is taken from the top two bits of the register.
    pub fn canonicalize(value: RegisterValue) -> Self {
        let misa = match value {
            RegisterValue::U32(value) => value,
            RegisterValue::U64(value) => {
                ((value >> 32) as u32 & 0xc000_0000) | (value as u32 & EXTENSIONS_MASK)
            }
            RegisterValue::U128(value) => {
                ((value >> 96) as u32 & 0xc000_0000) | (value as u32 & EXTENSIONS_MASK)
            }
        };

        Self(misa)
    }

    /// The XLEN encoded in MXL, `None` if MXL is zero.
    pub fn xlen(&self) -> Option<Xlen> {
        match self.0 >> MXL_SHIFT {
            1 => Some(Xlen::Rv32),
            2 => Some(Xlen::Rv64),
            3 => Some(Xlen::Rv128),
            _ => None,
        }
    }

    /// The extension bitmap.
    pub fn extensions(&self) -> u32 {
        self.0 & EXTENSIONS_MASK
    }

    /// Whether the single letter extension `letter` is present.
    pub fn has_extension(&self, letter: char) -> bool {
        let letter = letter.to_ascii_lowercase();
        if !letter.is_ascii_lowercase() {
            return false;
        }
        self.extensions() & (1 << (letter as u32 - 'a' as u32)) != 0
    }

    /// The canonical ISA string, e.g. `rv64imafdc`.
    ///
    /// 'G' is spelled out as its components, and the base is 'e' only when 'i' is absent.
    pub fn isa_name(&self) -> String {
        let xlen = self.xlen().unwrap_or(Xlen::Rv32);
        let mut name = format!("rv{}", xlen.bits());

        let general = self.has_extension('g');
        if self.has_extension('i') || general {
            name.push('i');
        } else if self.has_extension('e') {
            name.push('e');
        }

        for &extension in CANONICAL_ORDER {
            let implied = general && matches!(extension, 'm' | 'a' | 'f' | 'd');
            if implied || self.has_extension(extension) {
                name.push(extension);
            }
        }

        name
    }
}
