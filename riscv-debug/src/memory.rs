//! Memory transfers.
//!
//! A transfer of arbitrary length and alignment is split into runs of equally sized
//! accesses. Each access uses the widest width the hart supports that the current
//! address alignment and the remaining length allow. Runs are then carried out through
//! abstract memory commands or the System Bus Access block, whichever the hart settled
//! on at attach.

use crate::hart::MemoryAccessMethod;
use crate::interface::HartInterface;
use crate::RiscvError;

/// Size of a single bus or register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessWidth {
    /// 8 bits
    Bits8,
    /// 16 bits
    Bits16,
    /// 32 bits
    Bits32,
    /// 64 bits
    Bits64,
    /// 128 bits
    Bits128,
}

impl AccessWidth {
    /// All widths, narrowest first.
    pub const ALL: [AccessWidth; 5] = [
        AccessWidth::Bits8,
        AccessWidth::Bits16,
        AccessWidth::Bits32,
        AccessWidth::Bits64,
        AccessWidth::Bits128,
    ];

    /// The `aarsize`, `aamsize` and `sbaccess` encoding of the width.
    pub fn code(self) -> u32 {
        match self {
            AccessWidth::Bits8 => 0,
            AccessWidth::Bits16 => 1,
            AccessWidth::Bits32 => 2,
            AccessWidth::Bits64 => 3,
            AccessWidth::Bits128 => 4,
        }
    }

    /// Size in bytes.
    pub fn bytes(self) -> usize {
        1 << self.code()
    }

    /// Size in bits.
    pub fn bits(self) -> u32 {
        8 << self.code()
    }

    /// Number of 32-bit data words a value of this width occupies.
    pub fn words(self) -> usize {
        self.bytes().div_ceil(4)
    }

    /// The bit of this width in an access width mask.
    pub fn mask(self) -> u8 {
        1 << self.code()
    }
}

/// Choose the width of the next access of a transfer.
///
/// Picks the widest width in `supported` (bit N meaning `8 << N` bits) that `address` is
/// aligned to and that does not exceed `length`.
pub fn mem_access_width(
    supported: u8,
    address: u64,
    length: usize,
) -> Result<AccessWidth, RiscvError> {
    AccessWidth::ALL
        .iter()
        .rev()
        .copied()
        .find(|width| {
            supported & width.mask() != 0
                && width.bytes() <= length
                && address % width.bytes() as u64 == 0
        })
        .ok_or(RiscvError::NoAccessWidth {
            address,
            length,
            supported,
        })
}

/// Pack the first `width` bytes of `src` into a little endian 32-bit data word.
///
/// Missing bytes are zero, widths above 32 bits are truncated to the low word.
pub fn pack_data(src: &[u8], width: AccessWidth) -> u32 {
    let mut bytes = [0u8; 4];
    let len = width.bytes().min(4).min(src.len());
    bytes[..len].copy_from_slice(&src[..len]);
    u32::from_le_bytes(bytes)
}

/// Unpack the low `width` bytes of the data word `data` into `dest`.
pub fn unpack_data(dest: &mut [u8], data: u32, width: AccessWidth) {
    let bytes = data.to_le_bytes();
    let len = width.bytes().min(4).min(dest.len());
    dest[..len].copy_from_slice(&bytes[..len]);
}

/// Pack `src` into the data words of a single `width` access.
pub fn pack_words(src: &[u8], width: AccessWidth) -> Vec<u32> {
    let len = width.bytes().min(src.len());
    let src = &src[..len];

    if width <= AccessWidth::Bits32 {
        return vec![pack_data(src, width)];
    }

    (0..width.words())
        .map(|index| {
            let start = (index * 4).min(len);
            let end = (start + 4).min(len);
            pack_data(&src[start..end], AccessWidth::Bits32)
        })
        .collect()
}

/// Unpack the data words of a single `width` access into `dest`.
pub fn unpack_words(dest: &mut [u8], words: &[u32], width: AccessWidth) {
    let len = width.bytes().min(dest.len());

    for (index, word) in words.iter().enumerate() {
        let start = index * 4;
        if start >= len {
            break;
        }
        let end = (start + 4).min(len);
        let chunk_width = if width < AccessWidth::Bits32 {
            width
        } else {
            AccessWidth::Bits32
        };
        unpack_data(&mut dest[start..end], *word, chunk_width);
    }
}

/// A sequence of accesses of the same width at consecutive addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransferRun {
    /// Target address of the first access.
    pub address: u64,
    pub width: AccessWidth,
    /// Offset of the run within the caller's buffer.
    pub offset: usize,
    /// Length of the run in bytes, a multiple of the width.
    pub len: usize,
}

/// Split a transfer of `length` bytes at `address` into runs.
pub(crate) fn plan_transfer(
    supported: u8,
    address: u64,
    length: usize,
) -> Result<Vec<TransferRun>, RiscvError> {
    let mut runs: Vec<TransferRun> = Vec::new();
    let mut offset = 0;

    while offset < length {
        let current = address
            .checked_add(offset as u64)
            .ok_or(RiscvError::AddressOverflow { address, length })?;
        let width = mem_access_width(supported, current, length - offset)?;

        match runs.last_mut() {
            Some(run) if run.width == width => run.len += width.bytes(),
            _ => runs.push(TransferRun {
                address: current,
                width,
                offset,
                len: width.bytes(),
            }),
        }

        offset += width.bytes();
    }

    Ok(runs)
}

impl HartInterface<'_> {
    /// Read `data.len()` bytes of target memory at `address`.
    pub fn read_memory(&mut self, address: u64, data: &mut [u8]) -> Result<(), RiscvError> {
        let runs = plan_transfer(self.hart.flags.access_widths, address, data.len())?;
        tracing::debug!(
            "Reading {} bytes at {:#x} in {} runs",
            data.len(),
            address,
            runs.len()
        );

        for run in runs {
            let buffer = &mut data[run.offset..run.offset + run.len];
            match self.hart.flags.memory {
                MemoryAccessMethod::AbstractMemory => {
                    self.abstract_memory_read(run.address, run.width, buffer)?
                }
                MemoryAccessMethod::SystemBus => {
                    self.sysbus_read(run.address, run.width, buffer)?
                }
            }
        }

        Ok(())
    }

    /// Write `data` to target memory at `address`.
    pub fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<(), RiscvError> {
        let runs = plan_transfer(self.hart.flags.access_widths, address, data.len())?;
        tracing::debug!(
            "Writing {} bytes at {:#x} in {} runs",
            data.len(),
            address,
            runs.len()
        );

        for run in runs {
            let buffer = &data[run.offset..run.offset + run.len];
            match self.hart.flags.memory {
                MemoryAccessMethod::AbstractMemory => {
                    self.abstract_memory_write(run.address, run.width, buffer)?
                }
                MemoryAccessMethod::SystemBus => {
                    self.sysbus_write(run.address, run.width, buffer)?
                }
            }
        }

        Ok(())
    }
}
