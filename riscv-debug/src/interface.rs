//! Attach and detach, and the object graph of a debug session.
//!
//! DMI buses, Debug Modules and harts live in arenas owned by [`RiscvDebugInterface`] and
//! refer to each other by handle. A hart keeps its Debug Module alive, and a Debug
//! Module keeps its bus alive. When the last hart of a bus is detached, the bus
//! transport is quiesced and the bus is dropped.

use std::rc::Rc;

use crate::config::MemoryAccessConfig;
use crate::debug_module::{
    Abstractcs, DebugModule, DebugRegister, Dmcontrol, Dmstatus, Hartinfo, Nextdm,
};
use crate::dmi::{DebugVersion, DmiBus, DmiTransport};
use crate::hart::{Hart, HartStatus, MemoryAccessMethod};
use crate::isa::{Misa, Xlen};
use crate::memory::AccessWidth;
use crate::poll::{AbortSignal, Clock, PollBudget, SystemClock};
use crate::registers::{csr, S0};
use crate::{DebugConfig, DmiError, ErrorLayer, RiscvError};

/// Handle of an attached DMI bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmiBusId(pub(crate) usize);

/// Handle of an attached Debug Module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DebugModuleId(pub(crate) usize);

/// Handle of an attached hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HartId(pub(crate) usize);

/// Value of `hartsel` that selects the highest implemented hart index on readback.
const HARTSEL_MAX: u32 = 0xf_ffff;

fn insert<T>(arena: &mut Vec<Option<T>>, value: T) -> usize {
    if let Some(index) = arena.iter().position(Option::is_none) {
        arena[index] = Some(value);
        index
    } else {
        arena.push(Some(value));
        arena.len() - 1
    }
}

/// A debug session over any number of DMI buses.
#[derive(Debug)]
pub struct RiscvDebugInterface {
    config: DebugConfig,
    clock: Rc<dyn Clock>,
    abort: AbortSignal,

    buses: Vec<Option<DmiBus>>,
    modules: Vec<Option<DebugModule>>,
    harts: Vec<Option<Hart>>,
}

impl RiscvDebugInterface {
    /// Create a session without any attached bus.
    pub fn new(config: DebugConfig) -> Self {
        Self {
            config,
            clock: Rc::new(SystemClock::new()),
            abort: AbortSignal::new(),
            buses: Vec::new(),
            modules: Vec::new(),
            harts: Vec::new(),
        }
    }

    /// Replace the time source used for timeouts.
    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The signal that cuts pending waits short.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// The session configuration.
    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    /// Prepare `transport`, discover the Debug Modules behind it and attach their harts.
    pub fn attach(&mut self, transport: Box<dyn DmiTransport>) -> Result<Vec<HartId>, RiscvError> {
        let bus = DmiBus::new(transport)?;

        tracing::info!(
            "Attaching to DMI bus with designer {:#x}, version {:?}",
            bus.designer_code(),
            bus.version()
        );

        if bus.version() == DebugVersion::V0_11 {
            tracing::warn!("Debug specification 0.11 is not supported");
            let mut bus = bus;
            bus.quiesce()?;
            return Err(RiscvError::UnsupportedDebugModuleVersion(DebugVersion::V0_11));
        }

        let bus_id = DmiBusId(insert(&mut self.buses, bus));
        // Held by the attach itself until discovery is done.
        self.bus_mut(bus_id)?.ref_count += 1;

        let mut attached = Vec::new();
        let result = self.discover_debug_modules(bus_id, &mut attached);

        if result.is_err() {
            for hart in attached.drain(..) {
                if let Err(e) = self.release_hart(hart) {
                    tracing::warn!("Failed to release hart after attach error: {}", e);
                }
            }
        }

        let bus = self.bus_mut(bus_id)?;
        bus.ref_count = bus.ref_count.saturating_sub(1);
        let released = self.release_bus_if_unused(bus_id);

        match result {
            Err(e) => {
                if let Err(release) = released {
                    tracing::warn!("Failed to release bus after attach error: {}", release);
                }
                Err(e)
            }
            Ok(()) => {
                released?;
                if attached.is_empty() {
                    return Err(RiscvError::NoHartsFound);
                }
                Ok(attached)
            }
        }
    }

    /// Walk the `nextdm` chain starting at DMI address 0.
    fn discover_debug_modules(
        &mut self,
        bus_id: DmiBusId,
        attached: &mut Vec<HartId>,
    ) -> Result<(), RiscvError> {
        let mut base = 0;
        let mut visited = Vec::new();
        let mut unsupported = None;

        for _ in 0..self.config.max_debug_modules {
            visited.push(base);

            match self.discover_debug_module(bus_id, base, attached)? {
                DiscoveredModule::Unsupported(version) => {
                    unsupported = Some(version);
                    break;
                }
                DiscoveredModule::Next(0) => break,
                DiscoveredModule::Next(next) if visited.contains(&next) => {
                    tracing::warn!("nextdm chain loops back to {:#x}", next);
                    break;
                }
                DiscoveredModule::Next(next) => base = next,
            }
        }

        match unsupported {
            Some(version) if attached.is_empty() => {
                Err(RiscvError::UnsupportedDebugModuleVersion(version))
            }
            _ => Ok(()),
        }
    }

    fn discover_debug_module(
        &mut self,
        bus_id: DmiBusId,
        base: u32,
        attached: &mut Vec<HartId>,
    ) -> Result<DiscoveredModule, RiscvError> {
        let bus = self.bus_mut(bus_id)?;

        let status = Dmstatus(bus.read(base + u32::from(Dmstatus::ADDRESS))?);
        let mut dm = DebugModule::new(bus_id, base, status);

        tracing::debug!("Debug Module at {:#x}: {:?}", base, dm.version());

        if !dm.version().is_supported() {
            tracing::warn!(
                "Debug Module at {:#x} has unsupported version {:?}",
                base,
                dm.version()
            );
            return Ok(DiscoveredModule::Unsupported(dm.version()));
        }

        let max_hartsel = self.activate(bus_id, &mut dm)?;

        let nextdm: Nextdm = dm.read_register(self.bus_mut(bus_id)?)?;

        let dm_id = DebugModuleId(insert(&mut self.modules, dm));
        self.bus_mut(bus_id)?.ref_count += 1;

        // Held while the harts are enumerated, so a failing hart does not release the DM.
        self.module_mut(dm_id)?.ref_count += 1;
        let result = self.enumerate_harts(dm_id, max_hartsel, attached);

        let dm = self.module_mut(dm_id)?;
        dm.ref_count = dm.ref_count.saturating_sub(1);
        self.release_module_if_unused(dm_id)?;

        result.map(|()| DiscoveredModule::Next(nextdm.0))
    }

    fn enumerate_harts(
        &mut self,
        dm_id: DebugModuleId,
        max_hartsel: u32,
        attached: &mut Vec<HartId>,
    ) -> Result<(), RiscvError> {
        for hartsel in 0..=max_hartsel {
            let status: Dmstatus = {
                let (bus, dm) = self.bus_and_module(dm_id)?;
                dm.select_hart(bus, hartsel)?;
                dm.read_register(bus)?
            };

            if status.anynonexistent() {
                break;
            }
            if status.anyunavail() {
                tracing::warn!("Hart {} is unavailable, skipping", hartsel);
                continue;
            }

            let hart_id = HartId(insert(&mut self.harts, Hart::new(dm_id, hartsel, hartsel)));
            self.module_mut(dm_id)?.ref_count += 1;

            let initialised = self.hart_interface(hart_id)?.initialise();
            match initialised {
                Ok(()) => attached.push(hart_id),
                Err(e) if e.layer() == ErrorLayer::Transport => {
                    self.release_hart(hart_id)?;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Failed to initialise hart {}: {}", hartsel, e);
                    self.release_hart(hart_id)?;
                }
            }
        }

        Ok(())
    }

    /// Set `dmactive` and find the highest implemented `hartsel` value.
    fn activate(&mut self, bus_id: DmiBusId, dm: &mut DebugModule) -> Result<u32, RiscvError> {
        let budget = PollBudget::new(
            self.clock.clone(),
            self.abort.clone(),
            self.config.command_timeout(),
        );
        let bus = self.bus_mut(bus_id)?;

        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_dmactive(true);
        dm.write_register(bus, dmcontrol)?;

        loop {
            let dmcontrol: Dmcontrol = dm.read_register(bus)?;
            if dmcontrol.dmactive() {
                break;
            }
            budget.check()?;
        }

        dmcontrol.set_hartsel(HARTSEL_MAX);
        dm.write_register(bus, dmcontrol)?;
        let readback: Dmcontrol = dm.read_register(bus)?;
        dm.invalidate_selection();

        tracing::debug!("Highest hartsel value: {}", readback.hartsel());

        Ok(readback.hartsel())
    }

    /// Resume the hart if we halted it and release it.
    pub fn detach(&mut self, hart: HartId) -> Result<(), RiscvError> {
        let resumed = {
            let mut interface = self.hart_interface(hart)?;
            if interface.hart.halted {
                interface.resume()
            } else {
                Ok(())
            }
        };

        self.release_hart(hart)?;
        resumed
    }

    /// An attached hart.
    pub fn hart(&self, hart: HartId) -> Result<&Hart, RiscvError> {
        self.harts
            .get(hart.0)
            .and_then(Option::as_ref)
            .ok_or(RiscvError::InvalidHandle)
    }

    /// An attached Debug Module.
    pub fn debug_module(&self, dm: DebugModuleId) -> Result<&DebugModule, RiscvError> {
        self.modules
            .get(dm.0)
            .and_then(Option::as_ref)
            .ok_or(RiscvError::InvalidHandle)
    }

    /// An attached DMI bus.
    pub fn dmi_bus(&self, bus: DmiBusId) -> Result<&DmiBus, RiscvError> {
        self.buses
            .get(bus.0)
            .and_then(Option::as_ref)
            .ok_or(RiscvError::InvalidHandle)
    }

    /// All attached harts.
    pub fn harts(&self) -> impl Iterator<Item = HartId> + '_ {
        self.harts
            .iter()
            .enumerate()
            .filter(|(_, hart)| hart.is_some())
            .map(|(index, _)| HartId(index))
    }

    /// Operate on an attached hart.
    pub fn hart_interface(&mut self, hart: HartId) -> Result<HartInterface<'_>, RiscvError> {
        let hart = self
            .harts
            .get_mut(hart.0)
            .and_then(Option::as_mut)
            .ok_or(RiscvError::InvalidHandle)?;
        let dm = self
            .modules
            .get_mut(hart.dm.0)
            .and_then(Option::as_mut)
            .ok_or(RiscvError::InvalidHandle)?;
        let bus = self
            .buses
            .get_mut(dm.bus.0)
            .and_then(Option::as_mut)
            .ok_or(RiscvError::InvalidHandle)?;

        Ok(HartInterface {
            bus,
            dm,
            hart,
            clock: self.clock.clone(),
            abort: self.abort.clone(),
            config: &self.config,
        })
    }

    fn bus_mut(&mut self, bus: DmiBusId) -> Result<&mut DmiBus, RiscvError> {
        self.buses
            .get_mut(bus.0)
            .and_then(Option::as_mut)
            .ok_or(RiscvError::InvalidHandle)
    }

    fn module_mut(&mut self, dm: DebugModuleId) -> Result<&mut DebugModule, RiscvError> {
        self.modules
            .get_mut(dm.0)
            .and_then(Option::as_mut)
            .ok_or(RiscvError::InvalidHandle)
    }

    fn bus_and_module(
        &mut self,
        dm: DebugModuleId,
    ) -> Result<(&mut DmiBus, &mut DebugModule), RiscvError> {
        let dm = self
            .modules
            .get_mut(dm.0)
            .and_then(Option::as_mut)
            .ok_or(RiscvError::InvalidHandle)?;
        let bus = self
            .buses
            .get_mut(dm.bus.0)
            .and_then(Option::as_mut)
            .ok_or(RiscvError::InvalidHandle)?;
        Ok((bus, dm))
    }

    /// Drop the hart and release its Debug Module if it was the last hart on it.
    fn release_hart(&mut self, hart: HartId) -> Result<(), RiscvError> {
        let hart = self
            .harts
            .get_mut(hart.0)
            .and_then(Option::take)
            .ok_or(RiscvError::InvalidHandle)?;

        let dm = self
            .modules
            .get_mut(hart.dm.0)
            .and_then(Option::as_mut)
            .ok_or(RiscvError::InvalidHandle)?;
        dm.ref_count = dm.ref_count.saturating_sub(1);

        self.release_module_if_unused(hart.dm)
    }

    fn release_module_if_unused(&mut self, dm: DebugModuleId) -> Result<(), RiscvError> {
        let Some(slot) = self.modules.get_mut(dm.0) else {
            return Err(RiscvError::InvalidHandle);
        };
        if slot.as_ref().map_or(true, |dm| dm.ref_count > 0) {
            return Ok(());
        }
        let Some(module) = slot.take() else {
            return Err(RiscvError::InvalidHandle);
        };

        tracing::debug!("Releasing Debug Module at {:#x}", module.base());

        let bus = self.bus_mut(module.bus)?;
        bus.ref_count = bus.ref_count.saturating_sub(1);

        self.release_bus_if_unused(module.bus)
    }

    fn release_bus_if_unused(&mut self, bus: DmiBusId) -> Result<(), RiscvError> {
        let Some(slot) = self.buses.get_mut(bus.0) else {
            return Err(RiscvError::InvalidHandle);
        };
        if slot.as_ref().map_or(true, |bus| bus.ref_count > 0) {
            return Ok(());
        }
        let Some(mut bus) = slot.take() else {
            return Err(RiscvError::InvalidHandle);
        };

        tracing::info!("Releasing DMI bus {}", bus.dev_index());
        bus.quiesce()?;
        Ok(())
    }
}

enum DiscoveredModule {
    /// The DM was handled; the value is its `nextdm`.
    Next(u32),
    Unsupported(DebugVersion),
}

/// Operations on one hart, borrowing its Debug Module and bus for the duration.
#[derive(Debug)]
pub struct HartInterface<'a> {
    pub(crate) bus: &'a mut DmiBus,
    pub(crate) dm: &'a mut DebugModule,
    pub(crate) hart: &'a mut Hart,
    clock: Rc<dyn Clock>,
    abort: AbortSignal,
    config: &'a DebugConfig,
}

impl HartInterface<'_> {
    /// The hart being operated on.
    pub fn hart(&self) -> &Hart {
        self.hart
    }

    /// Select this hart on its Debug Module.
    pub(crate) fn select(&mut self) -> Result<(), DmiError> {
        self.dm.select_hart(self.bus, self.hart.hartsel)
    }

    pub(crate) fn read_dm(&mut self, address: u8) -> Result<u32, DmiError> {
        self.dm.read(self.bus, address)
    }

    pub(crate) fn write_dm(&mut self, address: u8, value: u32) -> Result<(), DmiError> {
        self.dm.write(self.bus, address, value)
    }

    pub(crate) fn read_dm_register<R: DebugRegister>(&mut self) -> Result<R, DmiError> {
        self.dm.read_register(self.bus)
    }

    pub(crate) fn write_dm_register<R: DebugRegister>(
        &mut self,
        register: R,
    ) -> Result<(), DmiError> {
        self.dm.write_register(self.bus, register)
    }

    pub(crate) fn command_budget(&self) -> PollBudget {
        PollBudget::new(
            self.clock.clone(),
            self.abort.clone(),
            self.config.command_timeout(),
        )
    }

    fn halt_budget(&self) -> PollBudget {
        PollBudget::new(
            self.clock.clone(),
            self.abort.clone(),
            self.config.halt_timeout(),
        )
    }

    /// Request a halt and wait for the hart to report it.
    pub fn halt(&mut self) -> Result<(), RiscvError> {
        self.halt_resume(true)
    }

    /// Request a resume and wait for the hart to acknowledge it.
    pub fn resume(&mut self) -> Result<(), RiscvError> {
        self.halt_resume(false)
    }

    fn halt_resume(&mut self, halt: bool) -> Result<(), RiscvError> {
        let request = if halt { "halt" } else { "resume" };
        tracing::debug!("Requesting {} of hart {}", request, self.hart.hartsel);

        self.select()?;

        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_dmactive(true);
        dmcontrol.set_hartsel(self.hart.hartsel);
        if halt {
            dmcontrol.set_haltreq(true);
        } else {
            dmcontrol.set_resumereq(true);
        }
        self.write_dm_register(dmcontrol)?;

        let budget = self.halt_budget();
        let result = loop {
            let status: Dmstatus = self.read_dm_register()?;
            let done = if halt {
                status.allhalted()
            } else {
                status.allresumeack()
            };
            if done {
                break Ok(());
            }

            match budget.check() {
                Ok(()) => {}
                Err(RiscvError::Timeout) => break Err(RiscvError::HaltTimeout(request)),
                Err(e) => break Err(e),
            }
        };

        // Drop the request bit again, keeping the selection.
        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_dmactive(true);
        dmcontrol.set_hartsel(self.hart.hartsel);
        self.write_dm_register(dmcontrol)?;

        result?;
        self.hart.halted = halt;
        Ok(())
    }

    fn is_halted(&mut self) -> Result<bool, RiscvError> {
        self.select()?;
        let status: Dmstatus = self.read_dm_register()?;
        Ok(status.allhalted())
    }

    /// Read the hart's identity and capabilities. The hart is halted for the duration if
    /// it was running.
    pub(crate) fn initialise(&mut self) -> Result<(), RiscvError> {
        self.select()?;

        let abstractcs: Abstractcs = self.read_dm_register()?;
        self.hart.progbuf_size = abstractcs.progbufsize() as u8;
        self.hart.data_count = abstractcs.datacount() as u8;

        if abstractcs.cmderr() != 0 {
            tracing::warn!("Clearing stale cmderr {} before use", abstractcs.cmderr());
            let mut clear = Abstractcs(0);
            clear.set_cmderr(0x7);
            self.write_dm_register(clear)?;
        }

        let hartinfo: Hartinfo = self.read_dm_register()?;
        self.hart.scratch_count = hartinfo.nscratch() as u8;

        let was_halted = self.is_halted()?;
        self.hart.halted = was_halted;
        if !was_halted {
            self.halt()?;
        }

        let result = self.identify();

        if !was_halted {
            self.resume()?;
        }

        result
    }

    fn identify(&mut self) -> Result<(), RiscvError> {
        let misa = self.read_misa()?;
        let xlen = misa.xlen().unwrap_or_else(|| {
            tracing::warn!("misa reports no MXL, assuming RV32");
            Xlen::Rv32
        });

        self.hart.access_width = xlen.access_width();
        self.hart.address_width = xlen.bits() as u8;
        self.hart.extensions = misa.extensions();
        self.hart.isa_name = misa.isa_name();

        self.hart.vendorid = self.read_id_csr(csr::MVENDORID)?;
        self.hart.archid = self.read_id_csr(csr::MARCHID)?;
        self.hart.implid = self.read_id_csr(csr::MIMPID)?;
        self.hart.hartid = self.read_id_csr(csr::MHARTID)?;

        tracing::info!(
            "Hart {}: {}, vendor {:#x}, arch {:#x}, impl {:#x}",
            self.hart.hartid,
            self.hart.isa_name,
            self.hart.vendorid,
            self.hart.archid,
            self.hart.implid
        );

        self.discover_triggers()?;
        self.select_memory_access()
    }

    /// Read an identification CSR, taking 0 if the hart does not implement it.
    fn read_id_csr(&mut self, csr: u16) -> Result<u32, RiscvError> {
        match self.read_csr(csr) {
            Ok(value) => Ok(value.as_u32()),
            Err(e) if e.layer() == ErrorLayer::Protocol => {
                tracing::warn!("CSR {:#05x} not readable: {}", csr, e);
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Read `misa`, working out the register width as we go.
    fn read_misa(&mut self) -> Result<Misa, RiscvError> {
        for width in [AccessWidth::Bits32, AccessWidth::Bits64, AccessWidth::Bits128] {
            tracing::debug!("Reading misa with a {} bit access", width.bits());

            match self.read_abstract_register(csr::MISA, width) {
                Ok(value) => {
                    let misa = Misa::canonicalize(value);
                    // A 32-bit read of a wider misa may return the low half only.
                    if misa.xlen().is_none() && width != AccessWidth::Bits128 {
                        continue;
                    }
                    return Ok(misa);
                }
                Err(RiscvError::AbstractCommand(HartStatus::NotSupported)) => continue,
                Err(e) => return Err(e),
            }
        }

        self.read_misa_progbuf()
    }

    /// Read `misa` through the program buffer, for harts that only give abstract
    /// access to GPRs.
    fn read_misa_progbuf(&mut self) -> Result<Misa, RiscvError> {
        // An access wider than XLEN must fail, the widest that works is XLEN.
        for width in [AccessWidth::Bits128, AccessWidth::Bits64, AccessWidth::Bits32] {
            match self.read_abstract_register(S0, width) {
                Ok(_) => {
                    self.hart.access_width = width;
                    self.hart.flags.data_gpr_only = true;

                    tracing::debug!("Only GPRs are accessible, using the program buffer for CSRs");

                    return self
                        .read_csr_progbuf(csr::MISA, width)
                        .map(Misa::canonicalize)
                        .map_err(|e| match e.layer() {
                            ErrorLayer::Protocol => RiscvError::MisaUnreadable,
                            ErrorLayer::Transport => e,
                        });
                }
                Err(RiscvError::AbstractCommand(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(RiscvError::MisaUnreadable)
    }

    /// Settle on abstract memory access or System Bus Access.
    fn select_memory_access(&mut self) -> Result<(), RiscvError> {
        let mut abstract_widths =
            AccessWidth::Bits8.mask() | AccessWidth::Bits16.mask() | AccessWidth::Bits32.mask();
        if self.hart.access_width >= AccessWidth::Bits64 {
            abstract_widths |= AccessWidth::Bits64.mask();
        }

        self.hart.flags.memory = MemoryAccessMethod::AbstractMemory;
        self.hart.flags.access_widths = abstract_widths;

        match self.config.memory_access {
            MemoryAccessConfig::Abstract => Ok(()),
            MemoryAccessConfig::SystemBus => {
                if !self.use_system_bus()? {
                    tracing::warn!("System bus access requested but not available");
                }
                Ok(())
            }
            MemoryAccessConfig::Auto => {
                // sbcs alone decides, no memory command is issued here.
                if !self.use_system_bus()? {
                    tracing::debug!("No usable system bus, using abstract memory access");
                }
                Ok(())
            }
        }
    }
}
