//! Debug Module (DM) register window.
//!
//! A Debug Module sits at a fixed base offset on its DMI bus. All register addresses in
//! this module are relative to that base.

use bitfield::bitfield;

use crate::dmi::{DebugVersion, DmiBus};
use crate::interface::DmiBusId;
use crate::DmiError;

/// A Debug Module register with a fixed DM-relative address.
pub trait DebugRegister: Into<u32> + From<u32> {
    /// DM-relative address of the register.
    const ADDRESS: u8;
    /// Name of the register.
    const NAME: &'static str;
}

macro_rules! data_register {
    (pub $i:ident, $addr:expr, $name:expr) => {
        #[derive(Debug, Copy, Clone)]
        #[doc = concat!("`", $name, "` register.")]
        pub struct $i(pub u32);

        impl DebugRegister for $i {
            const ADDRESS: u8 = $addr;
            const NAME: &'static str = $name;
        }

        impl From<$i> for u32 {
            fn from(register: $i) -> Self {
                register.0
            }
        }

        impl From<u32> for $i {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

macro_rules! bitfield_register {
    ($i:ident, $addr:expr, $name:expr) => {
        impl DebugRegister for $i {
            const ADDRESS: u8 = $addr;
            const NAME: &'static str = $name;
        }

        impl From<$i> for u32 {
            fn from(register: $i) -> Self {
                register.0
            }
        }

        impl From<u32> for $i {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

/// Address of `data0`; `dataN` follows at `DATA0 + N`.
pub const DATA0: u8 = 0x04;
/// Address of `progbuf0`; `progbufN` follows at `PROGBUF0 + N`.
pub const PROGBUF0: u8 = 0x20;

data_register! { pub Command, 0x17, "command" }
data_register! { pub Nextdm, 0x1d, "nextdm" }
data_register! { pub Sbaddress0, 0x39, "sbaddress0" }
data_register! { pub Sbaddress1, 0x3a, "sbaddress1" }
data_register! { pub Sbdata0, 0x3c, "sbdata0" }

bitfield! {
    /// `dmcontrol` register, located at address 0x10
    #[derive(Copy, Clone)]
    pub struct Dmcontrol(u32);
    impl Debug;

    pub haltreq, set_haltreq: 31;
    pub resumereq, set_resumereq: 30;
    pub hartreset, set_hartreset: 29;
    pub ackhavereset, set_ackhavereset: 28;
    pub hasel, set_hasel: 26;
    pub hartsello, set_hartsello: 25, 16;
    pub hartselhi, set_hartselhi: 15, 6;
    pub setresethaltreq, set_setresethaltreq: 3;
    pub clrresethaltreq, set_clrresethaltreq: 2;
    pub ndmreset, set_ndmreset: 1;
    pub dmactive, set_dmactive: 0;
}

impl Dmcontrol {
    /// The combined 20 bit hart selector.
    pub fn hartsel(&self) -> u32 {
        (self.hartselhi() << 10) | self.hartsello()
    }

    /// Set the combined 20 bit hart selector.
    pub fn set_hartsel(&mut self, value: u32) {
        self.set_hartsello(value & 0x3ff);
        self.set_hartselhi((value >> 10) & 0x3ff);
    }
}

bitfield_register!(Dmcontrol, 0x10, "dmcontrol");

bitfield! {
    /// Readonly `dmstatus` register.
    ///
    /// Located at address 0x11
    #[derive(Copy, Clone)]
    pub struct Dmstatus(u32);
    impl Debug;

    pub impebreak, _: 22;
    pub allhavereset, _: 19;
    pub anyhavereset, _: 18;
    pub allresumeack, _: 17;
    pub anyresumeack, _: 16;
    pub allnonexistent, _: 15;
    pub anynonexistent, _: 14;
    pub allunavail, _: 13;
    pub anyunavail, _: 12;
    pub allrunning, _: 11;
    pub anyrunning, _: 10;
    pub allhalted, _: 9;
    pub anyhalted, _: 8;
    pub authenticated, _: 7;
    pub authbusy, _: 6;
    pub hasresethaltreq, _: 5;
    pub confstrptrvalid, _: 4;
    pub version, _: 3, 0;
}

bitfield_register!(Dmstatus, 0x11, "dmstatus");

bitfield! {
    /// `hartinfo` register, describing the currently selected hart.
    #[derive(Copy, Clone)]
    pub struct Hartinfo(u32);
    impl Debug;

    pub nscratch, _: 23, 20;
    pub dataaccess, _: 16;
    pub datasize, _: 15, 12;
    pub dataaddr, _: 11, 0;
}

bitfield_register!(Hartinfo, 0x12, "hartinfo");

bitfield! {
    /// Abstract command control and status.
    #[derive(Copy, Clone)]
    pub struct Abstractcs(u32);
    impl Debug;

    pub progbufsize, _: 28, 24;
    pub busy, _: 12;
    pub relaxedpriv, set_relaxedpriv: 11;
    pub cmderr, set_cmderr: 10, 8;
    pub datacount, _: 3, 0;
}

bitfield_register!(Abstractcs, 0x16, "abstractcs");

bitfield! {
    /// System bus access control and status.
    #[derive(Copy, Clone)]
    pub struct Sbcs(u32);
    impl Debug;

    pub sbversion, _: 31, 29;
    pub sbbusyerror, set_sbbusyerror: 22;
    pub sbbusy, _: 21;
    pub sbreadonaddr, set_sbreadonaddr: 20;
    pub sbaccess, set_sbaccess: 19, 17;
    pub sbautoincrement, set_sbautoincrement: 16;
    pub sbreadondata, set_sbreadondata: 15;
    pub sberror, set_sberror: 14, 12;
    pub sbasize, _: 11, 5;
    pub sbaccess128, _: 4;
    pub sbaccess64, _: 3;
    pub sbaccess32, _: 2;
    pub sbaccess16, _: 1;
    pub sbaccess8, _: 0;
}

bitfield_register!(Sbcs, 0x38, "sbcs");

impl Sbcs {
    /// The supported access sizes as a bit mask, bit N meaning `8 << N` bits.
    pub fn access_widths(&self) -> u8 {
        (self.0 & 0x1f) as u8
    }
}

/// One Debug Module on a DMI bus.
#[derive(Debug)]
pub struct DebugModule {
    pub(crate) ref_count: u32,
    pub(crate) bus: DmiBusId,

    base: u32,
    version: DebugVersion,
    impebreak: bool,

    /// The `hartsel` value last written to `dmcontrol`
    selected_hart: Option<u32>,
}

impl DebugModule {
    pub(crate) fn new(bus: DmiBusId, base: u32, status: Dmstatus) -> Self {
        Self {
            ref_count: 0,
            bus,
            base,
            version: DebugVersion::from_dmstatus(status.version()),
            impebreak: status.impebreak(),
            selected_hart: None,
        }
    }

    /// Read the DM register at the DM-relative `address`.
    pub fn read(&self, bus: &mut DmiBus, address: u8) -> Result<u32, DmiError> {
        bus.read(self.base + u32::from(address))
    }

    /// Write the DM register at the DM-relative `address`.
    pub fn write(&self, bus: &mut DmiBus, address: u8, value: u32) -> Result<(), DmiError> {
        bus.write(self.base + u32::from(address), value)
    }

    /// Read a typed DM register.
    pub fn read_register<R: DebugRegister>(&self, bus: &mut DmiBus) -> Result<R, DmiError> {
        tracing::trace!("Reading DM register {}", R::NAME);
        self.read(bus, R::ADDRESS).map(R::from)
    }

    /// Write a typed DM register.
    pub fn write_register<R: DebugRegister>(
        &self,
        bus: &mut DmiBus,
        register: R,
    ) -> Result<(), DmiError> {
        tracing::trace!("Writing DM register {}", R::NAME);
        self.write(bus, R::ADDRESS, register.into())
    }

    /// Point `hartsel` at `hartsel`, unless it already is.
    pub(crate) fn select_hart(&mut self, bus: &mut DmiBus, hartsel: u32) -> Result<(), DmiError> {
        if self.selected_hart == Some(hartsel) {
            return Ok(());
        }

        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_dmactive(true);
        dmcontrol.set_hartsel(hartsel);
        self.write_register(bus, dmcontrol)?;

        self.selected_hart = Some(hartsel);
        Ok(())
    }

    /// Forget the cached selection, e.g. after `dmcontrol` was written with another value.
    pub(crate) fn invalidate_selection(&mut self) {
        self.selected_hart = None;
    }

    /// The `hartsel` value currently programmed, if known.
    pub fn selected_hart(&self) -> Option<u32> {
        self.selected_hart
    }

    /// The DMI bus the DM sits on.
    pub fn dmi_bus(&self) -> DmiBusId {
        self.bus
    }

    /// Base address of the DM on its bus.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Debug specification version implemented by this DM.
    pub fn version(&self) -> DebugVersion {
        self.version
    }

    /// Whether the DM appends an implicit `ebreak` to the program buffer.
    pub fn impebreak(&self) -> bool {
        self.impebreak
    }

    /// Number of harts referencing this DM.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}
