//! A simulated RISC-V Debug Module behind a DMI transport.
//!
//! [`SimulatedTarget`] answers DMI register accesses the way a 0.13 Debug Module with
//! abstract commands, a small program buffer and an optional System Bus Access block
//! would. It counts what it was asked to do so tests can check which paths were taken.
//! Clones share their state, so a test keeps one clone while the other is attached.

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::dmi::{DebugVersion, DmiTransport, DtmInfo};
use crate::registers::csr;
use crate::DmiError;

const EBREAK: u32 = 0x0010_0073;
const HARTSEL_MASK: u32 = 0xf;

/// A trigger slot of a [`SimulatedHart`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedTrigger {
    /// `tdata1`
    pub tdata1: u128,
    /// `tdata2`
    pub tdata2: u128,
}

/// A hart of the [`SimulatedTarget`].
#[derive(Debug, Clone)]
pub struct SimulatedHart {
    /// Register width in bits.
    pub xlen: u32,
    /// `misa` at its native width.
    pub misa: u128,
    /// `x0`..=`x31`
    pub gprs: [u128; 32],
    /// `f0`..=`f31`
    pub fprs: [u128; 32],
    /// Implemented CSRs besides `misa` and the trigger CSRs.
    pub csrs: BTreeMap<u16, u128>,
    /// Whether the hart is halted.
    pub halted: bool,
    /// Whether the hart acknowledged the last resume request.
    pub resumeack: bool,
    /// Never react to halt requests.
    pub ignores_halt: bool,
    /// Only GPRs are accessible through abstract commands.
    pub gpr_only: bool,
    /// Trigger slots.
    pub triggers: Vec<SimulatedTrigger>,
    /// Whether `tinfo` is implemented.
    pub tinfo: bool,
    /// The selected trigger.
    pub tselect: usize,
    /// Trigger slot whose `tinfo` and `tdata1` reads fail, and the `cmderr` they fail with.
    pub trigger_fault: Option<(usize, u32)>,
}

impl SimulatedHart {
    fn new(xlen: u32, misa: u128) -> Self {
        let csrs = [
            (csr::MVENDORID, 0x489),
            (csr::MARCHID, 0x8000_0002),
            (csr::MIMPID, 0x1),
            (csr::MHARTID, 0),
            (csr::DPC, 0),
            (csr::DCSR, 0x4000_0003),
            (csr::MSTATUS, 0),
            (csr::MTVEC, 0),
            (csr::FFLAGS, 0),
            (csr::FRM, 0),
            (csr::FCSR, 0),
        ]
        .into_iter()
        .collect();

        Self {
            xlen,
            misa,
            gprs: [0; 32],
            fprs: [0; 32],
            csrs,
            halted: false,
            resumeack: false,
            ignores_halt: false,
            gpr_only: false,
            triggers: Vec::new(),
            tinfo: true,
            tselect: 0,
            trigger_fault: None,
        }
    }

    /// An RV32 hart reporting `misa`.
    pub fn rv32(misa: u32) -> Self {
        Self::new(32, u128::from(misa))
    }

    /// An RV64 hart reporting `misa`.
    pub fn rv64(misa: u64) -> Self {
        Self::new(64, u128::from(misa))
    }

    /// Add or replace an implemented CSR.
    pub fn with_csr(mut self, csr: u16, value: u128) -> Self {
        self.csrs.insert(csr, value);
        self
    }

    /// Give the hart `count` `mcontrol` trigger slots.
    pub fn with_triggers(mut self, count: usize, tinfo: bool) -> Self {
        self.triggers = vec![
            SimulatedTrigger {
                tdata1: 2 << (self.xlen - 4),
                tdata2: 0,
            };
            count
        ];
        self.tinfo = tinfo;
        self
    }

    /// Fail reads of `tinfo` and `tdata1` with `cmderr` while `slot` is selected.
    pub fn with_trigger_fault(mut self, slot: usize, cmderr: u32) -> Self {
        self.trigger_fault = Some((slot, cmderr));
        self
    }

    /// Only allow GPR access through abstract commands.
    pub fn gpr_only(mut self) -> Self {
        self.gpr_only = true;
        self
    }

    /// Start out halted.
    pub fn halted(mut self) -> Self {
        self.halted = true;
        self
    }

    /// Never react to halt requests.
    pub fn ignoring_halt(mut self) -> Self {
        self.ignores_halt = true;
        self
    }

    fn truncate(&self, value: u128) -> u128 {
        if self.xlen >= 128 {
            value
        } else {
            value & ((1u128 << self.xlen) - 1)
        }
    }

    fn has_extension(&self, letter: u8) -> bool {
        self.misa & (1 << (letter - b'a')) != 0
    }

    fn read_csr(&self, address: u16) -> Result<u128, u32> {
        match self.trigger_fault {
            Some((slot, cmderr))
                if slot == self.tselect && matches!(address, csr::TINFO | csr::TDATA1) =>
            {
                return Err(cmderr)
            }
            _ => {}
        }

        match address {
            csr::MISA => Ok(self.misa),
            csr::TSELECT if !self.triggers.is_empty() => Ok(self.tselect as u128),
            csr::TDATA1 => self.trigger().map(|trigger| trigger.tdata1),
            csr::TDATA2 => self.trigger().map(|trigger| trigger.tdata2),
            csr::TINFO if self.tinfo && !self.triggers.is_empty() => Ok(1 << 2),
            _ => self.csrs.get(&address).copied().ok_or(CMDERR_EXCEPTION),
        }
    }

    fn write_csr(&mut self, address: u16, value: u128) -> Result<(), u32> {
        let value = self.truncate(value);

        match address {
            csr::MISA => Ok(()),
            csr::TSELECT if !self.triggers.is_empty() => {
                if (value as usize) < self.triggers.len() {
                    self.tselect = value as usize;
                }
                Ok(())
            }
            csr::TDATA1 => {
                let slot = self.tselect;
                self.triggers
                    .get_mut(slot)
                    .map(|trigger| trigger.tdata1 = value)
                    .ok_or(CMDERR_EXCEPTION)
            }
            csr::TDATA2 => {
                let slot = self.tselect;
                self.triggers
                    .get_mut(slot)
                    .map(|trigger| trigger.tdata2 = value)
                    .ok_or(CMDERR_EXCEPTION)
            }
            _ => match self.csrs.get_mut(&address) {
                Some(register) => {
                    *register = value;
                    Ok(())
                }
                None => Err(CMDERR_EXCEPTION),
            },
        }
    }

    fn trigger(&self) -> Result<&SimulatedTrigger, u32> {
        self.triggers.get(self.tselect).ok_or(CMDERR_EXCEPTION)
    }

    fn read_register(&self, regno: u32) -> Result<u128, u32> {
        match regno {
            0x1000 => Ok(0),
            0x1001..=0x101f => Ok(self.gprs[(regno - 0x1000) as usize]),
            0x1020..=0x103f if self.has_extension(b'f') => {
                Ok(self.fprs[(regno - 0x1020) as usize])
            }
            0..=0xfff => self.read_csr(regno as u16),
            _ => Err(CMDERR_EXCEPTION),
        }
    }

    fn write_register(&mut self, regno: u32, value: u128) -> Result<(), u32> {
        match regno {
            0x1000 => Ok(()),
            0x1001..=0x101f => {
                self.gprs[(regno - 0x1000) as usize] = self.truncate(value);
                Ok(())
            }
            0x1020..=0x103f if self.has_extension(b'f') => {
                self.fprs[(regno - 0x1020) as usize] = value;
                Ok(())
            }
            0..=0xfff => self.write_csr(regno as u16, value),
            _ => Err(CMDERR_EXCEPTION),
        }
    }
}

const CMDERR_BUSY: u32 = 1;
const CMDERR_NOT_SUPPORTED: u32 = 2;
const CMDERR_EXCEPTION: u32 = 3;
const CMDERR_HALT_RESUME: u32 = 4;
const CMDERR_BUS: u32 = 5;

/// Everything the simulated Debug Module knows and counts.
#[derive(Debug)]
pub struct SimState {
    /// Version reported by `dtmcs`.
    pub dtm_version: DebugVersion,
    /// `version` field of `dmstatus`.
    pub dm_version: u32,
    /// Harts behind the Debug Module.
    pub harts: Vec<SimulatedHart>,
    /// Fail every DMI access as if the debug adapter was gone.
    pub transport_broken: bool,

    /// `dmcontrol.dmactive`
    pub dmactive: bool,
    /// `dmcontrol.hartsel`
    pub hartsel: u32,
    /// `data0`..=`data11`
    pub data: [u32; 12],
    /// `progbuf0`..=`progbuf15`
    pub progbuf: [u32; 16],
    /// Number of implemented program buffer words.
    pub progbuf_size: u32,
    /// Whether an `ebreak` is implied after the program buffer.
    pub impebreak: bool,
    /// `abstractcs.cmderr`
    pub cmderr: u32,
    /// Polls of `abstractcs` that report busy after each command.
    pub busy_per_command: u32,
    /// Never finish a command.
    pub stuck_busy: bool,
    /// `cmderr` values the next commands fail with, regardless of what they ask for.
    pub injected_errors: VecDeque<u32>,
    busy_polls: u32,
    /// `abstractcs.datacount`
    pub datacount: u32,
    /// `hartinfo.nscratch`
    pub nscratch: u32,
    /// Base of the next Debug Module, 0 for the last one.
    pub nextdm: u32,

    /// Whether abstract memory commands are implemented.
    pub abstract_memory: bool,
    /// Supported system bus widths (`sbaccess8` .. `sbaccess128`), 0 if absent.
    pub sysbus_widths: u8,
    /// Addresses from here on report a system bus error.
    pub sysbus_error_above: Option<u64>,
    sbcs: u32,
    sbaddress: u64,
    sbdata: [u32; 4],

    /// Target memory, missing bytes read as 0.
    pub memory: BTreeMap<u64, u8>,
    /// Address and size of every memory access, by either path.
    pub memory_accesses: Vec<(u64, usize)>,

    /// Calls to [`DmiTransport::prepare`].
    pub prepare_calls: usize,
    /// Calls to [`DmiTransport::quiesce`].
    pub quiesce_calls: usize,
    /// Access register commands issued.
    pub register_commands: usize,
    /// Access memory commands issued.
    pub memory_commands: usize,
    /// DMI accesses to the system bus registers.
    pub sysbus_register_accesses: usize,
    /// Writes to `abstractcs` that cleared a non-zero `cmderr`.
    pub cmderr_clears: usize,
    /// Writes to `command` while `cmderr` was non-zero.
    pub ignored_commands: usize,
}

impl SimState {
    fn selected(&self) -> Option<&SimulatedHart> {
        self.harts.get(self.hartsel as usize)
    }

    fn selected_mut(&mut self) -> Option<&mut SimulatedHart> {
        self.harts.get_mut(self.hartsel as usize)
    }

    fn busy(&self) -> bool {
        self.stuck_busy || self.busy_polls > 0
    }

    fn read(&mut self, address: u32) -> u32 {
        match address {
            0x04..=0x0f => self.data[address as usize - 0x04],
            0x10 => {
                let hartsel = self.hartsel;
                ((hartsel & 0x3ff) << 16) | ((hartsel >> 10) << 6) | u32::from(self.dmactive)
            }
            0x11 => self.dmstatus(),
            0x16 => {
                let busy = self.busy();
                if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                }
                (self.progbuf_size << 24)
                    | (u32::from(busy) << 12)
                    | (self.cmderr << 8)
                    | self.datacount
            }
            // hartinfo: data registers shadowed in memory are not modelled.
            0x12 => self.nscratch << 20,
            0x1d => self.nextdm,
            0x20..=0x2f => self.progbuf[address as usize - 0x20],
            0x38..=0x3f => {
                self.sysbus_register_accesses += 1;
                self.read_sysbus(address)
            }
            _ => 0,
        }
    }

    fn write(&mut self, address: u32, value: u32) {
        match address {
            0x04..=0x0f => self.data[address as usize - 0x04] = value,
            0x10 => self.write_dmcontrol(value),
            0x16 => {
                let clear = (value >> 8) & 0x7;
                if self.cmderr & clear != 0 {
                    self.cmderr_clears += 1;
                }
                self.cmderr &= !clear;
            }
            0x17 => self.write_command(value),
            0x20..=0x2f => self.progbuf[address as usize - 0x20] = value,
            0x38..=0x3f => {
                self.sysbus_register_accesses += 1;
                self.write_sysbus(address, value);
            }
            _ => {}
        }
    }

    fn dmstatus(&self) -> u32 {
        let mut status = self.dm_version | (1 << 7) | (u32::from(self.impebreak) << 22);

        match self.selected() {
            None => status |= (1 << 15) | (1 << 14),
            Some(hart) => {
                if hart.halted {
                    status |= (1 << 9) | (1 << 8);
                } else {
                    status |= (1 << 11) | (1 << 10);
                }
                if hart.resumeack {
                    status |= (1 << 17) | (1 << 16);
                }
            }
        }

        status
    }

    fn write_dmcontrol(&mut self, value: u32) {
        self.dmactive = value & 1 != 0;
        self.hartsel = (((value >> 16) & 0x3ff) | (((value >> 6) & 0x3ff) << 10)) & HARTSEL_MASK;

        let haltreq = value & (1 << 31) != 0;
        let resumereq = value & (1 << 30) != 0;

        if let Some(hart) = self.selected_mut() {
            if haltreq && !hart.ignores_halt {
                hart.halted = true;
                hart.resumeack = false;
            } else if resumereq && !haltreq {
                hart.halted = false;
                hart.resumeack = true;
            }
        }
    }

    fn write_command(&mut self, command: u32) {
        if self.busy() {
            if self.cmderr == 0 {
                self.cmderr = CMDERR_BUSY;
            }
            return;
        }
        if self.cmderr != 0 {
            self.ignored_commands += 1;
            return;
        }

        let cmdtype = command >> 24;
        match cmdtype {
            0 => self.register_commands += 1,
            2 => self.memory_commands += 1,
            _ => {}
        }

        self.busy_polls = self.busy_per_command;

        let result = match self.injected_errors.pop_front() {
            Some(cmderr) => Err(cmderr),
            None => match cmdtype {
                0 => self.access_register(command),
                2 => self.access_memory(command),
                _ => Err(CMDERR_NOT_SUPPORTED),
            },
        };

        if let Err(cmderr) = result {
            self.cmderr = cmderr;
        }
    }

    fn argument(&self, index: usize, words: usize) -> u128 {
        (0..words).fold(0, |value, word| {
            value | (u128::from(self.data[index * words + word]) << (32 * word))
        })
    }

    fn set_argument(&mut self, index: usize, words: usize, value: u128) {
        for word in 0..words {
            self.data[index * words + word] = (value >> (32 * word)) as u32;
        }
    }

    fn access_register(&mut self, command: u32) -> Result<(), u32> {
        let bits = 8u32 << ((command >> 20) & 0x7);
        let postexec = command & (1 << 18) != 0;
        let transfer = command & (1 << 17) != 0;
        let write = command & (1 << 16) != 0;
        let regno = command & 0xffff;

        let hart = self.selected().ok_or(CMDERR_HALT_RESUME)?;
        if !hart.halted {
            return Err(CMDERR_HALT_RESUME);
        }

        if transfer {
            if bits > hart.xlen || bits < 32 {
                return Err(CMDERR_NOT_SUPPORTED);
            }
            if hart.gpr_only && !(0x1000..0x1020).contains(&regno) {
                return Err(CMDERR_NOT_SUPPORTED);
            }

            let words = (bits / 32) as usize;
            let mask = if bits == 128 {
                u128::MAX
            } else {
                (1u128 << bits) - 1
            };

            if write {
                let value = self.argument(0, words) & mask;
                self.selected_mut()
                    .ok_or(CMDERR_HALT_RESUME)?
                    .write_register(regno, value)?;
            } else {
                let value = self
                    .selected()
                    .ok_or(CMDERR_HALT_RESUME)?
                    .read_register(regno)?;
                self.set_argument(0, words, value & mask);
            }
        }

        if postexec {
            self.run_program_buffer()?;
        }

        Ok(())
    }

    fn run_program_buffer(&mut self) -> Result<(), u32> {
        let program: Vec<u32> = self.progbuf[..self.progbuf_size as usize].to_vec();
        let impebreak = self.impebreak;
        let hart = self.selected_mut().ok_or(CMDERR_HALT_RESUME)?;

        for instruction in program {
            if instruction == EBREAK {
                return Ok(());
            }

            let opcode = instruction & 0x7f;
            let funct3 = (instruction >> 12) & 0x7;
            let rd = ((instruction >> 7) & 0x1f) as usize;
            let rs1 = ((instruction >> 15) & 0x1f) as usize;
            let csr = (instruction >> 20) as u16;

            if opcode != 0x73 {
                return Err(CMDERR_EXCEPTION);
            }

            let source = if rs1 == 0 { 0 } else { hart.gprs[rs1] };
            let old = hart.read_csr(csr)?;

            match funct3 {
                // csrrw
                1 => hart.write_csr(csr, source)?,
                // csrrs
                2 if rs1 != 0 => hart.write_csr(csr, old | source)?,
                2 => {}
                _ => return Err(CMDERR_EXCEPTION),
            }

            if rd != 0 {
                hart.gprs[rd] = old;
            }
        }

        if impebreak {
            Ok(())
        } else {
            Err(CMDERR_EXCEPTION)
        }
    }

    fn access_memory(&mut self, command: u32) -> Result<(), u32> {
        if !self.abstract_memory {
            return Err(CMDERR_NOT_SUPPORTED);
        }

        let bytes = 1usize << ((command >> 20) & 0x7);
        let postincrement = command & (1 << 19) != 0;
        let write = command & (1 << 16) != 0;

        let xlen = self.selected().ok_or(CMDERR_HALT_RESUME)?.xlen;
        if bytes * 8 > xlen as usize {
            return Err(CMDERR_NOT_SUPPORTED);
        }

        let words = (xlen / 32) as usize;
        let address = self.argument(1, words) as u64;

        if address % bytes as u64 != 0 {
            return Err(CMDERR_BUS);
        }

        self.memory_accesses.push((address, bytes));

        if write {
            let value = self.argument(0, bytes.div_ceil(4));
            self.store(address, bytes, value);
        } else {
            let value = self.load(address, bytes);
            self.set_argument(0, bytes.div_ceil(4), value);
        }

        if postincrement {
            self.set_argument(1, words, u128::from(address + bytes as u64));
        }

        Ok(())
    }

    fn load(&self, address: u64, bytes: usize) -> u128 {
        (0..bytes).fold(0, |value, offset| {
            let byte = self.memory.get(&(address + offset as u64)).copied().unwrap_or(0);
            value | (u128::from(byte) << (8 * offset))
        })
    }

    fn store(&mut self, address: u64, bytes: usize, value: u128) {
        for offset in 0..bytes {
            self.memory
                .insert(address + offset as u64, (value >> (8 * offset)) as u8);
        }
    }

    fn read_sysbus(&mut self, address: u32) -> u32 {
        match address {
            0x38 => {
                let present = if self.sysbus_widths != 0 { 1 << 29 } else { 0 };
                present | self.sbcs | (64 << 5) | u32::from(self.sysbus_widths)
            }
            0x39 => self.sbaddress as u32,
            0x3a => (self.sbaddress >> 32) as u32,
            0x3c..=0x3f => {
                let value = self.sbdata[address as usize - 0x3c];
                if address == 0x3c && self.sbcs & (1 << 15) != 0 {
                    self.sysbus_access(false);
                }
                value
            }
            _ => 0,
        }
    }

    fn write_sysbus(&mut self, address: u32, value: u32) {
        match address {
            0x38 => {
                // sbbusyerror and sberror are write 1 to clear.
                let errors = self.sbcs & ((1 << 22) | (0x7 << 12)) & !(value & ((1 << 22) | (0x7 << 12)));
                let config = value & ((1 << 20) | (0x7 << 17) | (1 << 16) | (1 << 15));
                self.sbcs = errors | config;
            }
            0x39 => {
                self.sbaddress = (self.sbaddress & !0xffff_ffff) | u64::from(value);
                if self.sbcs & (1 << 20) != 0 {
                    self.sysbus_access(false);
                }
            }
            0x3a => {
                self.sbaddress = (self.sbaddress & 0xffff_ffff) | (u64::from(value) << 32);
            }
            0x3c..=0x3f => {
                self.sbdata[address as usize - 0x3c] = value;
                if address == 0x3c {
                    self.sysbus_access(true);
                }
            }
            _ => {}
        }
    }

    fn sysbus_access(&mut self, write: bool) {
        if self.sbcs & (0x7 << 12) != 0 {
            return;
        }

        let sbaccess = (self.sbcs >> 17) & 0x7;
        let bytes = 1usize << sbaccess;
        let address = self.sbaddress;

        let sberror = if self.sysbus_widths & (1 << sbaccess) == 0 {
            4
        } else if address % bytes as u64 != 0 {
            3
        } else if self.sysbus_error_above.is_some_and(|limit| address >= limit) {
            2
        } else {
            0
        };

        if sberror != 0 {
            self.sbcs |= sberror << 12;
            return;
        }

        self.memory_accesses.push((address, bytes));

        if write {
            let value = (0..bytes.div_ceil(4)).fold(0u128, |value, word| {
                value | (u128::from(self.sbdata[word]) << (32 * word))
            });
            self.store(address, bytes, value);
        } else {
            let value = self.load(address, bytes);
            for word in 0..bytes.div_ceil(4) {
                self.sbdata[word] = (value >> (32 * word)) as u32;
            }
        }

        if self.sbcs & (1 << 16) != 0 {
            self.sbaddress += bytes as u64;
        }
    }
}

/// Size of the DMI window of one Debug Module.
const DM_WINDOW: u32 = 0x80;

/// A simulated Debug Module, usable as a [`DmiTransport`].
///
/// Further Debug Modules can be placed on the same bus with
/// [`SimulatedTarget::with_debug_module`]. Transport level state and counters stay with
/// the first one.
#[derive(Debug, Clone)]
pub struct SimulatedTarget {
    state: Rc<RefCell<SimState>>,
    modules: Vec<(u32, SimulatedTarget)>,
}

impl SimulatedTarget {
    /// A 0.13 Debug Module with abstract memory access and a two word program buffer.
    pub fn new(harts: Vec<SimulatedHart>) -> Self {
        let state = SimState {
            dtm_version: DebugVersion::V0_13,
            dm_version: 2,
            harts,
            transport_broken: false,
            dmactive: false,
            hartsel: 0,
            data: [0; 12],
            progbuf: [0; 16],
            progbuf_size: 2,
            impebreak: false,
            cmderr: 0,
            busy_per_command: 0,
            stuck_busy: false,
            injected_errors: VecDeque::new(),
            busy_polls: 0,
            datacount: 4,
            nscratch: 1,
            nextdm: 0,
            abstract_memory: true,
            sysbus_widths: 0,
            sysbus_error_above: None,
            sbcs: 0,
            sbaddress: 0,
            sbdata: [0; 4],
            memory: BTreeMap::new(),
            memory_accesses: Vec::new(),
            prepare_calls: 0,
            quiesce_calls: 0,
            register_commands: 0,
            memory_commands: 0,
            sysbus_register_accesses: 0,
            cmderr_clears: 0,
            ignored_commands: 0,
        };

        Self {
            state: Rc::new(RefCell::new(state)),
            modules: Vec::new(),
        }
    }

    /// Report `base` in `nextdm`.
    pub fn with_nextdm(self, base: u32) -> Self {
        self.state().nextdm = base;
        self
    }

    /// Place the Debug Module of `dm` at DMI address `base` on this bus.
    ///
    /// `dm` keeps its own state, link it into the chain with [`Self::with_nextdm`].
    pub fn with_debug_module(mut self, base: u32, dm: SimulatedTarget) -> Self {
        self.modules.push((base, dm));
        self
    }

    /// Report `datacount` in `abstractcs`.
    pub fn with_data_count(self, datacount: u32) -> Self {
        self.state().datacount = datacount;
        self
    }

    /// The state answering DMI `address`, and the address relative to its DM.
    fn route(&self, address: u32) -> (&Rc<RefCell<SimState>>, u32) {
        self.modules
            .iter()
            .find(|(base, _)| *base != 0 && (*base..*base + DM_WINDOW).contains(&address))
            .map(|(base, dm)| (&dm.state, address - base))
            .unwrap_or((&self.state, address))
    }

    /// Add a System Bus Access block supporting `widths`.
    pub fn with_system_bus(self, widths: u8) -> Self {
        self.state().sysbus_widths = widths;
        self
    }

    /// Remove abstract memory commands.
    pub fn without_abstract_memory(self) -> Self {
        self.state().abstract_memory = false;
        self
    }

    /// Report `dmstatus.version`.
    pub fn with_dm_version(self, version: u32) -> Self {
        self.state().dm_version = version;
        self
    }

    /// Report the given version in `dtmcs`.
    pub fn with_dtm_version(self, version: DebugVersion) -> Self {
        self.state().dtm_version = version;
        self
    }

    /// Keep every command busy for `polls` reads of `abstractcs`.
    pub fn with_busy_polls(self, polls: u32) -> Self {
        self.state().busy_per_command = polls;
        self
    }

    /// Resize the program buffer.
    pub fn with_progbuf(self, size: u32, impebreak: bool) -> Self {
        {
            let mut state = self.state();
            state.progbuf_size = size;
            state.impebreak = impebreak;
        }
        self
    }

    /// Mutable access to the simulated state.
    ///
    /// Don't hold on to the guard while the target is in use.
    pub fn state(&self) -> RefMut<'_, SimState> {
        self.state.borrow_mut()
    }

    /// Fill target memory at `address`.
    pub fn write_memory(&self, address: u64, data: &[u8]) {
        let mut state = self.state();
        for (offset, byte) in data.iter().enumerate() {
            state.memory.insert(address + offset as u64, *byte);
        }
    }

    /// Read back target memory at `address`.
    pub fn read_memory(&self, address: u64, length: usize) -> Vec<u8> {
        let state = self.state.borrow();
        (0..length)
            .map(|offset| {
                state
                    .memory
                    .get(&(address + offset as u64))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Inspect hart `index`.
    pub fn hart(&self, index: usize) -> SimulatedHart {
        self.state.borrow().harts[index].clone()
    }
}

impl DmiTransport for SimulatedTarget {
    fn prepare(&mut self) -> Result<DtmInfo, DmiError> {
        let mut state = self.state();
        state.prepare_calls += 1;

        Ok(DtmInfo {
            designer_code: 0x489,
            version: state.dtm_version,
            dev_index: 0,
            idle_cycles: 1,
            address_width: 7,
        })
    }

    fn quiesce(&mut self) -> Result<(), DmiError> {
        self.state().quiesce_calls += 1;
        Ok(())
    }

    fn read(&mut self, address: u32) -> Result<u32, DmiError> {
        if self.state.borrow().transport_broken {
            return Err(DmiError::Failed { address });
        }
        let (state, offset) = self.route(address);
        let value = state.borrow_mut().read(offset);
        Ok(value)
    }

    fn write(&mut self, address: u32, value: u32) -> Result<(), DmiError> {
        if self.state.borrow().transport_broken {
            return Err(DmiError::Failed { address });
        }
        let (state, offset) = self.route(address);
        state.borrow_mut().write(offset, value);
        Ok(())
    }
}
