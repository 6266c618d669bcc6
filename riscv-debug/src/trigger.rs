//! Hardware triggers (break- and watchpoints).
//!
//! Triggers are found by walking `tselect` at attach. Each slot records which trigger
//! types it supports and what it is currently used for.

use crate::hart::HartStatus;
use crate::interface::HartInterface;
use crate::registers::{csr, RegisterValue};
use crate::{ErrorLayer, RiscvError};

/// Maximum number of trigger slots tracked per hart.
pub const TRIGGERS_MAX: usize = 8;

/// Support bits of `tinfo` that we track. Bit 0 (no trigger) is dropped.
const SUPPORT_MASK: u32 = 0xfffe;
/// `tinfo` bit of type 2 (`mcontrol`) triggers, usable for break- and watchpoints.
pub const SUPPORT_BREAKWATCH: u16 = 1 << 2;

const MCONTROL_TYPE: u128 = 2;
const MCONTROL_ACTION_DEBUG_MODE: u128 = 1 << 12;
const MCONTROL_M: u128 = 1 << 6;
const MCONTROL_S: u128 = 1 << 4;
const MCONTROL_U: u128 = 1 << 3;
const MCONTROL_EXECUTE: u128 = 1 << 2;
const MCONTROL_STORE: u128 = 1 << 1;
const MCONTROL_LOAD: u128 = 1 << 0;

/// What a trigger slot is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// Free for use.
    #[default]
    Unused,
    /// Set as breakpoint.
    Breakpoint,
    /// Set as watchpoint.
    Watchpoint,
}

/// Support and usage of a single trigger slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerUse {
    /// Supported trigger types, bit N meaning type N.
    pub support: u16,
    /// Current usage.
    pub mode: TriggerMode,
}

impl TriggerUse {
    /// Whether the slot can act as a break- or watchpoint.
    pub fn supports_breakwatch(&self) -> bool {
        self.support & SUPPORT_BREAKWATCH != 0
    }
}

/// The `size` field of an `mcontrol` trigger, already shifted into place.
///
/// Sizes of 48 bits and up need the `sizehi` field, which only exists on RV64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSize {
    /// 8 bits
    Bits8 = 0x0001_0000,
    /// 16 bits
    Bits16 = 0x0002_0000,
    /// 32 bits
    Bits32 = 0x0003_0000,
    /// 48 bits
    Bits48 = 0x0020_0000,
    /// 64 bits
    Bits64 = 0x0021_0000,
    /// 80 bits
    Bits80 = 0x0022_0000,
    /// 96 bits
    Bits96 = 0x0023_0000,
    /// 112 bits
    Bits112 = 0x0040_0000,
    /// 128 bits
    Bits128 = 0x0041_0000,
}

impl MatchSize {
    /// The match size for an access or instruction of `length` bytes.
    pub fn from_length(length: usize) -> Result<Self, RiscvError> {
        Ok(match length {
            1 => MatchSize::Bits8,
            2 => MatchSize::Bits16,
            4 => MatchSize::Bits32,
            6 => MatchSize::Bits48,
            8 => MatchSize::Bits64,
            10 => MatchSize::Bits80,
            12 => MatchSize::Bits96,
            14 => MatchSize::Bits112,
            16 => MatchSize::Bits128,
            _ => return Err(RiscvError::UnsupportedTriggerLength(length)),
        })
    }

    /// The shifted field value.
    pub fn bits(self) -> u32 {
        self as u32
    }

    fn needs_sizehi(self) -> bool {
        self.bits() & 0x0060_0000 != 0
    }
}

/// The kind of access a break- or watchpoint fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakWatch {
    /// Instruction execution.
    Execute,
    /// Loads.
    Read,
    /// Stores.
    Write,
    /// Loads and stores.
    Access,
}

impl BreakWatch {
    fn mode(self) -> TriggerMode {
        match self {
            BreakWatch::Execute => TriggerMode::Breakpoint,
            _ => TriggerMode::Watchpoint,
        }
    }

    fn match_bits(self) -> u128 {
        match self {
            BreakWatch::Execute => MCONTROL_EXECUTE,
            BreakWatch::Read => MCONTROL_LOAD,
            BreakWatch::Write => MCONTROL_STORE,
            BreakWatch::Access => MCONTROL_LOAD | MCONTROL_STORE,
        }
    }
}

/// `tdata1` of an `mcontrol` trigger that enters debug mode when `kind` matches in any
/// privilege mode.
fn mcontrol_config(kind: BreakWatch, size: MatchSize, xlen: u32) -> u128 {
    let type_shift = xlen - 4;
    let dmode = 1 << (xlen - 5);

    (MCONTROL_TYPE << type_shift)
        | dmode
        | MCONTROL_ACTION_DEBUG_MODE
        | MCONTROL_M
        | MCONTROL_S
        | MCONTROL_U
        | u128::from(size.bits())
        | kind.match_bits()
}

impl HartInterface<'_> {
    /// Find the trigger slots of the hart and what they support.
    ///
    /// Slots found before a protocol error are kept, only transport errors fail the
    /// walk.
    pub(crate) fn discover_triggers(&mut self) -> Result<(), RiscvError> {
        self.hart.triggers = 0;

        for slot in 0..TRIGGERS_MAX {
            match self.read_trigger_slot(slot) {
                Ok(Some(trigger)) => {
                    self.hart.trigger_uses[slot] = trigger;
                    self.hart.triggers = slot + 1;
                }
                Ok(None) => break,
                Err(e) if e.layer() == ErrorLayer::Protocol => {
                    tracing::warn!("Trigger slot {} not readable, stopping here: {}", slot, e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!("Found {} trigger slots", self.hart.triggers);

        Ok(())
    }

    /// Select `slot` and read what it supports. `None` once past the last slot.
    fn read_trigger_slot(&mut self, slot: usize) -> Result<Option<TriggerUse>, RiscvError> {
        let xlen = self.hart.access_width.bits();

        match self.write_csr(csr::TSELECT, slot as u32) {
            Err(e) if e.layer() == ErrorLayer::Protocol => {
                tracing::debug!("tselect not writable, no trigger module: {}", e);
                return Ok(None);
            }
            result => result?,
        }

        // A slot past the last one does not stick.
        if self.read_csr(csr::TSELECT)?.as_u64() != slot as u64 {
            return Ok(None);
        }

        let info = match self.read_csr(csr::TINFO) {
            Ok(info) => info.as_u32() & 0xffff,
            Err(RiscvError::AbstractCommand(HartStatus::Exception)) => {
                // No tinfo, the type field of tdata1 tells about this one slot.
                let tdata1 = self.read_csr(csr::TDATA1)?.as_u128();
                1 << ((tdata1 >> (xlen - 4)) & 0xf)
            }
            Err(e) => return Err(e),
        };

        Ok(Some(TriggerUse {
            support: (info & SUPPORT_MASK) as u16,
            mode: TriggerMode::Unused,
        }))
    }

    /// Program trigger `slot` with `config` for `tdata1` and `address` for `tdata2`.
    pub fn config_trigger(
        &mut self,
        slot: usize,
        mode: TriggerMode,
        config: impl Into<RegisterValue>,
        address: impl Into<RegisterValue>,
    ) -> Result<(), RiscvError> {
        if slot >= self.hart.triggers {
            return Err(RiscvError::InvalidTrigger(slot));
        }
        if mode != TriggerMode::Unused && !self.hart.trigger_uses[slot].supports_breakwatch() {
            return Err(RiscvError::InvalidTrigger(slot));
        }

        self.write_csr(csr::TSELECT, slot as u32)?;
        self.write_csr(csr::TDATA1, config)?;
        self.write_csr(csr::TDATA2, address)?;

        self.hart.trigger_uses[slot].mode = mode;
        Ok(())
    }

    /// Set a break- or watchpoint on `length` bytes at `address` and return its slot.
    pub fn set_breakwatch(
        &mut self,
        kind: BreakWatch,
        address: u64,
        length: usize,
    ) -> Result<usize, RiscvError> {
        let size = MatchSize::from_length(length)?;
        let xlen = self.hart.access_width.bits();

        if xlen == 32 && size.needs_sizehi() {
            return Err(RiscvError::UnsupportedTriggerLength(length));
        }

        let slot = (0..self.hart.triggers)
            .find(|&slot| {
                let trigger = self.hart.trigger_uses[slot];
                trigger.mode == TriggerMode::Unused && trigger.supports_breakwatch()
            })
            .ok_or(RiscvError::NoTriggerAvailable)?;

        tracing::debug!(
            "Setting {:?} on {} bytes at {:#x} in trigger {}",
            kind,
            length,
            address,
            slot
        );

        self.config_trigger(
            slot,
            kind.mode(),
            RegisterValue::U128(mcontrol_config(kind, size, xlen)),
            address,
        )?;

        Ok(slot)
    }

    /// Clear the break- or watchpoint in `slot`.
    pub fn clear_breakwatch(&mut self, slot: usize) -> Result<(), RiscvError> {
        self.config_trigger(slot, TriggerMode::Unused, 0u32, 0u32)
    }
}
