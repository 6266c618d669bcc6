//! Debug Transport Module (DTM) over a JTAG scan chain.
//!
//! The DTM exposes the DMI through two JTAG data registers: `dtmcs` for control and
//! status, and `dmi` for the actual register transfers.

use std::fmt;

use bitfield::bitfield;
use bitvec::field::BitField;
use bitvec::slice::BitSlice;
use bitvec::vec::BitVec;

use crate::dmi::{DebugVersion, DmiTransport, DtmInfo};
use crate::DmiError;

/// Raw access to the JTAG TAP of a RISC-V target.
///
/// Implemented by the debug adapter.
pub trait JtagAccess: fmt::Debug {
    /// Capture the data register selected by IR `address`, `len` bits wide.
    fn read_register(&mut self, address: u32, len: u32) -> Result<BitVec, DmiError>;

    /// Shift `len` bits of `data` through the data register selected by IR `address` and
    /// return the bits captured at the same time.
    fn write_register(&mut self, address: u32, data: &[u8], len: u32)
        -> Result<BitVec, DmiError>;

    /// Number of idle cycles inserted after each data register scan.
    fn idle_cycles(&self) -> u8;

    /// Set the number of idle cycles inserted after each data register scan.
    fn set_idle_cycles(&mut self, idle_cycles: u8) -> Result<(), DmiError>;
}

/// Access to the DMI through a JTAG Debug Transport Module.
#[derive(Debug)]
pub struct JtagDtm<P> {
    adapter: P,
    dev_index: u8,
    busy_retries: u32,

    /// Number of address bits in the DMI register
    abits: u32,
    /// Idle cycles configured on the adapter before we took over
    original_idle_cycles: Option<u8>,
}

impl<P: JtagAccess> JtagDtm<P> {
    /// Create a DTM for the TAP at `dev_index` on the scan chain of `adapter`.
    ///
    /// A DMI scan answered with "busy" is re-issued at most `busy_retries` times.
    pub fn new(adapter: P, dev_index: u8, busy_retries: u32) -> Self {
        Self {
            adapter,
            dev_index,
            busy_retries,
            abits: 0,
            original_idle_cycles: None,
        }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &P {
        &self.adapter
    }

    fn transform_dmi_result(response_bits: &BitSlice) -> Result<u32, DmiOperationStatus> {
        let response_value = response_bits.load_le::<u128>();

        // Verify that the transfer was ok
        let op = (response_value & DMI_OP_MASK) as u8;

        if op != 0 {
            return Err(DmiOperationStatus::parse(op));
        }

        Ok((response_value >> DMI_VALUE_BIT_OFFSET) as u32)
    }

    /// Perform an access to the dmi register of the JTAG Transport module.
    ///
    /// Every access both writes and reads from the register. The captured `op` field
    /// reports the status of the *previous* operation.
    fn dmi_register_access(
        &mut self,
        op: DmiOperation,
    ) -> Result<Result<u32, DmiOperationStatus>, DmiError> {
        let bytes = op.to_byte_batch();

        let bit_size = self.abits + DMI_ADDRESS_BIT_OFFSET;

        self.adapter
            .write_register(DMI_ADDRESS, &bytes, bit_size)
            .map(|bits| Self::transform_dmi_result(&bits))
    }

    /// Issue `op` followed by a no-op scan which captures its result.
    fn dmi_transaction(&mut self, op: DmiOperation) -> Result<u32, DmiError> {
        let address = op.address();
        let mut retries = 0;

        loop {
            let status = match self.dmi_register_access(op)? {
                Ok(_) => self.dmi_register_access(DmiOperation::NoOp)?,
                Err(e) => Err(e),
            };

            match status {
                Ok(value) => return Ok(value),
                Err(DmiOperationStatus::RequestInProgress) if retries < self.busy_retries => {
                    retries += 1;
                    // Scanned too soon, reset dmi status and give the DM more time.
                    self.clear_error_state()?;
                    let idle_cycles = self.adapter.idle_cycles().saturating_add(1);
                    tracing::debug!(
                        "DMI busy on {:#04x}, raising idle cycles to {}",
                        address,
                        idle_cycles
                    );
                    self.adapter.set_idle_cycles(idle_cycles)?;
                }
                Err(DmiOperationStatus::RequestInProgress) => {
                    self.clear_error_state()?;
                    return Err(DmiError::Busy { address, retries });
                }
                Err(_) => {
                    self.clear_error_state()?;
                    return Err(DmiError::Failed { address });
                }
            }
        }
    }

    /// Clear the sticky error state (field *op* in the DMI register)
    fn clear_error_state(&mut self) -> Result<(), DmiError> {
        let mut dtmcs = Dtmcs(0);

        dtmcs.set_dmireset(true);

        let Dtmcs(reg_value) = dtmcs;

        let bytes = reg_value.to_le_bytes();

        self.adapter
            .write_register(DTMCS_ADDRESS, &bytes, DTMCS_WIDTH)?;

        Ok(())
    }
}

impl<P: JtagAccess> DmiTransport for JtagDtm<P> {
    fn prepare(&mut self) -> Result<DtmInfo, DmiError> {
        let raw_dtmcs = self
            .adapter
            .read_register(DTMCS_ADDRESS, DTMCS_WIDTH)?
            .load_le::<u32>();

        if raw_dtmcs == 0 {
            return Err(DmiError::NoRiscvTarget);
        }

        let dtmcs = Dtmcs(raw_dtmcs);

        tracing::debug!("{:?}", dtmcs);

        let version = DebugVersion::from_dtmcs(dtmcs.version());
        if !matches!(version, DebugVersion::V0_11 | DebugVersion::V0_13) {
            return Err(DmiError::UnsupportedDtmVersion(dtmcs.version() as u8));
        }

        let idcode = self.adapter.read_register(IDCODE_ADDRESS, 32)?.load_le::<u32>();
        let designer_code = ((idcode >> 1) & 0x7ff) as u16;

        // Setup the number of idle cycles between JTAG accesses
        let idle_cycles = dtmcs.idle() as u8;
        self.original_idle_cycles = Some(self.adapter.idle_cycles());
        self.adapter.set_idle_cycles(idle_cycles)?;
        self.abits = dtmcs.abits();

        Ok(DtmInfo {
            designer_code,
            version,
            dev_index: self.dev_index,
            idle_cycles,
            address_width: self.abits as u8,
        })
    }

    fn quiesce(&mut self) -> Result<(), DmiError> {
        if let Some(idle_cycles) = self.original_idle_cycles.take() {
            self.adapter.set_idle_cycles(idle_cycles)?;
        }
        Ok(())
    }

    fn read(&mut self, address: u32) -> Result<u32, DmiError> {
        self.dmi_transaction(DmiOperation::Read { address })
    }

    fn write(&mut self, address: u32, value: u32) -> Result<(), DmiError> {
        self.dmi_transaction(DmiOperation::Write { address, value })
            .map(|_| ())
    }
}

#[derive(Copy, Clone, Debug)]
enum DmiOperation {
    NoOp,
    Read { address: u32 },
    Write { address: u32, value: u32 },
}

impl DmiOperation {
    fn opcode(&self) -> u8 {
        match self {
            Self::NoOp => 0,
            Self::Read { .. } => 1,
            Self::Write { .. } => 2,
        }
    }

    fn address(&self) -> u32 {
        match self {
            Self::NoOp => 0,
            Self::Read { address } | Self::Write { address, .. } => *address,
        }
    }

    fn register_value(&self) -> u128 {
        let value = match self {
            Self::Write { value, .. } => *value as u128,
            _ => 0,
        };
        ((self.address() as u128) << DMI_ADDRESS_BIT_OFFSET)
            | (value << DMI_VALUE_BIT_OFFSET)
            | self.opcode() as u128
    }

    fn to_byte_batch(self) -> [u8; 16] {
        self.register_value().to_le_bytes()
    }
}

/// Possible return values in the op field of
/// the dmi register.
#[derive(Debug, PartialEq, Eq)]
enum DmiOperationStatus {
    Reserved,
    OperationFailed,
    RequestInProgress,
}

impl DmiOperationStatus {
    /// Parse a non-zero op status.
    fn parse(value: u8) -> Self {
        match value & 0x3 {
            2 => Self::OperationFailed,
            3 => Self::RequestInProgress,
            _ => Self::Reserved,
        }
    }
}

/// Address of the `IDCODE` JTAG register.
const IDCODE_ADDRESS: u32 = 0x01;

/// Address of the `dtmcs` JTAG register.
const DTMCS_ADDRESS: u32 = 0x10;

/// Width of the `dtmcs` JTAG register.
const DTMCS_WIDTH: u32 = 32;

/// Address of the `dmi` JTAG register
const DMI_ADDRESS: u32 = 0x11;

/// Offset of the `address` field in the `dmi` JTAG register.
const DMI_ADDRESS_BIT_OFFSET: u32 = 34;

/// Offset of the `value` field in the `dmi` JTAG register.
const DMI_VALUE_BIT_OFFSET: u32 = 2;

const DMI_OP_MASK: u128 = 0x3;

bitfield! {
    /// The `dtmcs` register.
    struct Dtmcs(u32);
    impl Debug;

    _, set_dmihardreset: 17;
    _, set_dmireset: 16;
    idle, _: 14, 12;
    dmistat, _: 11, 10;
    abits, _: 9, 4;
    version, _: 3, 0;
}
