//! Debug Module Interface (DMI) bus.
//!
//! The DMI is a version tagged register bus that connects a debug transport to one or
//! more Debug Modules. How a register transfer reaches the hardware is up to the
//! [`DmiTransport`], which is chosen once when the bus is discovered.

use std::fmt;

use crate::DmiError;

pub mod adi_dtm;
pub mod jtag_dtm;
#[cfg(any(test, feature = "test"))]
pub mod mock;

/// RISC-V debug specification version implemented by a DTM or Debug Module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugVersion {
    /// A version we don't know about.
    Unknown,
    /// No Debug Module is present.
    Unimplemented,
    /// Debug specification 0.11.
    V0_11,
    /// Debug specification 0.13.
    V0_13,
    /// Debug specification 1.0.
    V1_0,
}

impl DebugVersion {
    /// Decode the `version` field of `dmstatus`.
    pub fn from_dmstatus(version: u32) -> Self {
        match version {
            0 => Self::Unimplemented,
            1 => Self::V0_11,
            2 => Self::V0_13,
            3 => Self::V1_0,
            _ => Self::Unknown,
        }
    }

    /// Decode the `version` field of `dtmcs`.
    ///
    /// The DTM does not distinguish between 0.13 and 1.0, those report the same value.
    pub fn from_dtmcs(version: u32) -> Self {
        match version {
            0 => Self::V0_11,
            1 => Self::V0_13,
            15 => Self::Unimplemented,
            _ => Self::Unknown,
        }
    }

    /// Whether harts behind a Debug Module of this version can be driven.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::V0_13 | Self::V1_0)
    }
}

/// Properties of a transport, discovered when it is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmInfo {
    /// JEP106 designer code of the part, 0 if unknown.
    pub designer_code: u16,
    /// Version of the transport.
    pub version: DebugVersion,
    /// Index of the device on the scan chain or debug port.
    pub dev_index: u8,
    /// Number of idle cycles the transport inserts after each access.
    pub idle_cycles: u8,
    /// Width of the DMI address in bits.
    pub address_width: u8,
}

/// A physical path to a DMI bus.
///
/// Implemented once per transport; see [`jtag_dtm::JtagDtm`] and [`adi_dtm::AdiDtm`].
pub trait DmiTransport: fmt::Debug {
    /// Configure the transport for use. Called once when the bus is attached.
    fn prepare(&mut self) -> Result<DtmInfo, DmiError>;

    /// Relax the transport again. Called once when the last user of the bus is gone.
    fn quiesce(&mut self) -> Result<(), DmiError> {
        Ok(())
    }

    /// Read the DMI register at `address`.
    fn read(&mut self, address: u32) -> Result<u32, DmiError>;

    /// Write `value` to the DMI register at `address`.
    fn write(&mut self, address: u32, value: u32) -> Result<(), DmiError>;
}

/// The kind of the last failed transfer on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmiFault {
    /// The DMI operation itself failed.
    Failed,
    /// The bus stayed busy.
    Busy,
    /// The transport or debug adapter failed.
    Transport,
}

impl From<&DmiError> for DmiFault {
    fn from(error: &DmiError) -> Self {
        match error {
            DmiError::Failed { .. } => DmiFault::Failed,
            DmiError::Busy { .. } => DmiFault::Busy,
            _ => DmiFault::Transport,
        }
    }
}

/// A DMI bus, shared by every Debug Module that sits on it.
///
/// Transfer failures set the [fault flag](DmiBus::fault) and are returned to the caller;
/// the bus never retries on its own.
#[derive(Debug)]
pub struct DmiBus {
    pub(crate) ref_count: u32,

    designer_code: u16,
    version: DebugVersion,

    dev_index: u8,
    idle_cycles: u8,
    address_width: u8,
    fault: Option<DmiFault>,

    transport: Box<dyn DmiTransport>,
}

impl DmiBus {
    /// Prepare `transport` and wrap it as a bus.
    pub(crate) fn new(mut transport: Box<dyn DmiTransport>) -> Result<Self, DmiError> {
        let info = transport.prepare()?;

        tracing::debug!("Prepared DMI bus: {:?}", info);

        Ok(Self {
            ref_count: 0,
            designer_code: info.designer_code,
            version: info.version,
            dev_index: info.dev_index,
            idle_cycles: info.idle_cycles,
            address_width: info.address_width,
            fault: None,
            transport,
        })
    }

    /// Read the DMI register at `address`.
    pub fn read(&mut self, address: u32) -> Result<u32, DmiError> {
        match self.transport.read(address) {
            Ok(value) => {
                tracing::trace!("DMI read {:#04x} = {:#010x}", address, value);
                Ok(value)
            }
            Err(e) => {
                tracing::debug!("DMI read {:#04x} failed: {}", address, e);
                self.fault = Some(DmiFault::from(&e));
                Err(e)
            }
        }
    }

    /// Write `value` to the DMI register at `address`.
    pub fn write(&mut self, address: u32, value: u32) -> Result<(), DmiError> {
        tracing::trace!("DMI write {:#04x} = {:#010x}", address, value);

        self.transport.write(address, value).map_err(|e| {
            tracing::debug!("DMI write {:#04x} failed: {}", address, e);
            self.fault = Some(DmiFault::from(&e));
            e
        })
    }

    pub(crate) fn quiesce(&mut self) -> Result<(), DmiError> {
        tracing::debug!("Quiescing DMI bus {}", self.dev_index);
        self.transport.quiesce()
    }

    /// The fault left by the last failed transfer, if any.
    pub fn fault(&self) -> Option<DmiFault> {
        self.fault
    }

    /// Clear the fault flag.
    pub fn clear_fault(&mut self) {
        self.fault = None;
    }

    /// JEP106 designer code reported by the transport.
    pub fn designer_code(&self) -> u16 {
        self.designer_code
    }

    /// Debug specification version reported by the transport.
    pub fn version(&self) -> DebugVersion {
        self.version
    }

    /// Index of the device on its scan chain or debug port.
    pub fn dev_index(&self) -> u8 {
        self.dev_index
    }

    /// Idle cycles inserted by the transport when the bus was prepared.
    pub fn idle_cycles(&self) -> u8 {
        self.idle_cycles
    }

    /// Width of DMI addresses in bits.
    pub fn address_width(&self) -> u8 {
        self.address_width
    }

    /// Number of Debug Modules currently referencing this bus.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[derive(Debug)]
    struct FailingTransport;

    impl DmiTransport for FailingTransport {
        fn prepare(&mut self) -> Result<DtmInfo, DmiError> {
            Ok(DtmInfo {
                designer_code: 0x489,
                version: DebugVersion::V0_13,
                dev_index: 2,
                idle_cycles: 5,
                address_width: 7,
            })
        }

        fn read(&mut self, address: u32) -> Result<u32, DmiError> {
            Err(DmiError::Failed { address })
        }

        fn write(&mut self, address: u32, _value: u32) -> Result<(), DmiError> {
            Err(DmiError::Busy {
                address,
                retries: 3,
            })
        }
    }

    #[test]
    fn failures_set_the_fault_flag() {
        let mut bus = DmiBus::new(Box::new(FailingTransport)).unwrap();

        assert_eq!(bus.designer_code(), 0x489);
        assert_eq!(bus.address_width(), 7);
        assert_eq!(bus.fault(), None);

        assert!(matches!(
            bus.read(0x11),
            Err(DmiError::Failed { address: 0x11 })
        ));
        assert_eq!(bus.fault(), Some(DmiFault::Failed));

        assert!(bus.write(0x10, 1).is_err());
        assert_eq!(bus.fault(), Some(DmiFault::Busy));

        bus.clear_fault();
        assert_eq!(bus.fault(), None);
    }

    #[test_case(0 => DebugVersion::Unimplemented)]
    #[test_case(1 => DebugVersion::V0_11)]
    #[test_case(2 => DebugVersion::V0_13)]
    #[test_case(3 => DebugVersion::V1_0)]
    #[test_case(15 => DebugVersion::Unknown)]
    fn dmstatus_version(version: u32) -> DebugVersion {
        DebugVersion::from_dmstatus(version)
    }
}
