//! Abstract commands: register access, memory access and program buffer execution.

use bitfield::bitfield;

use crate::debug_module::{Abstractcs, Command, DATA0, PROGBUF0};
use crate::hart::HartStatus;
use crate::interface::HartInterface;
use crate::memory::{pack_words, unpack_words, AccessWidth};
use crate::registers::{RegisterLocation, RegisterValue, S0};
use crate::RiscvError;

/// `ebreak`
const EBREAK: u32 = 0x0010_0073;

bitfield! {
    /// Access register command, written to `command` (0x17).
    #[derive(Copy, Clone)]
    pub struct AccessRegisterCommand(u32);
    impl Debug;
    pub _, set_cmd_type: 31, 24;
    pub u8, _, set_aarsize: 22, 20;
    pub _, set_postexec: 18;
    pub _, set_transfer: 17;
    pub _, set_write: 16;
    pub _, set_regno: 15, 0;
}

impl From<AccessRegisterCommand> for Command {
    fn from(register: AccessRegisterCommand) -> Self {
        Command(register.0)
    }
}

bitfield! {
    /// Access memory command, cmdtype 2.
    #[derive(Copy, Clone)]
    pub struct AccessMemoryCommand(u32);
    impl Debug;
    _, set_cmd_type: 31, 24;
    pub _, set_aamsize: 22, 20;
    pub _, set_aampostincrement: 19;
    pub _, set_write: 16;
}

impl AccessMemoryCommand {
    fn new(width: AccessWidth, write: bool) -> Self {
        let mut command = AccessMemoryCommand(0);
        command.set_cmd_type(2);
        command.set_aamsize(width.code());
        command.set_aampostincrement(true);
        command.set_write(write);
        command
    }
}

impl From<AccessMemoryCommand> for Command {
    fn from(register: AccessMemoryCommand) -> Self {
        Command(register.0)
    }
}

/// `csrrs s0, csr, x0`
fn csrrs_s0(csr: u16) -> u32 {
    0b_00000_010_01000_1110011 | (u32::from(csr & 0xfff) << 20)
}

/// `csrrw x0, csr, s0`
fn csrrw_s0(csr: u16) -> u32 {
    0b_01000_001_00000_1110011 | (u32::from(csr & 0xfff) << 20)
}

impl HartInterface<'_> {
    /// Issue `command` on the selected hart and wait for it to complete.
    pub(crate) fn execute_abstract_command(
        &mut self,
        command: impl Into<Command>,
    ) -> Result<(), RiscvError> {
        self.select()?;
        self.write_dm_register(command.into())?;
        self.wait_complete()
    }

    /// Wait until `abstractcs.busy` clears and decode `cmderr` into the hart status.
    ///
    /// A non-zero `cmderr` is acknowledged before returning, otherwise the DM would
    /// ignore every following command.
    pub(crate) fn wait_complete(&mut self) -> Result<(), RiscvError> {
        let budget = self.command_budget();

        let abstractcs = loop {
            let abstractcs: Abstractcs = self.read_dm_register()?;
            if !abstractcs.busy() {
                break abstractcs;
            }

            self.hart.status = HartStatus::Busy;
            budget.check()?;
        };

        self.hart.status = HartStatus::from_cmderr(abstractcs.cmderr());

        if self.hart.status != HartStatus::NoError {
            tracing::debug!("Abstract command failed: {}", self.hart.status);

            let mut clear = Abstractcs(0);
            clear.set_cmderr(0x7);
            self.write_dm_register(clear)?;

            return Err(RiscvError::AbstractCommand(self.hart.status));
        }

        Ok(())
    }

    /// Read the data words of argument `index` of an abstract command.
    fn read_argument(&mut self, index: usize, width: AccessWidth) -> Result<Vec<u32>, RiscvError> {
        let base = index * self.argument_words();

        (0..width.words())
            .map(|word| {
                self.read_dm(DATA0 + (base + word) as u8)
                    .map_err(RiscvError::from)
            })
            .collect()
    }

    /// Write the data words of argument `index` of an abstract command.
    fn write_argument(&mut self, index: usize, words: &[u32]) -> Result<(), RiscvError> {
        let base = index * self.argument_words();

        for (word, value) in words.iter().enumerate() {
            self.write_dm(DATA0 + (base + word) as u8, *value)?;
        }

        Ok(())
    }

    /// Fail with `NotSupported` when argument `index` of `width` lies beyond the
    /// implemented `data` registers. Nothing is sent to the DM in that case.
    fn check_argument(&mut self, index: usize, width: AccessWidth) -> Result<(), RiscvError> {
        let needed = index * self.argument_words() + width.words();

        if needed > usize::from(self.hart.data_count) {
            tracing::debug!(
                "Argument {} of {} bits needs {} data registers, {} implemented",
                index,
                width.bits(),
                needed,
                self.hart.data_count
            );
            self.hart.status = HartStatus::NotSupported;
            return Err(RiscvError::AbstractCommand(HartStatus::NotSupported));
        }

        Ok(())
    }

    /// Number of data words per command argument, XLEN / 32.
    fn argument_words(&self) -> usize {
        self.hart.access_width.words().max(1)
    }

    /// Read the register `regno` through an access register command of `width`.
    pub(crate) fn read_abstract_register(
        &mut self,
        regno: u16,
        width: AccessWidth,
    ) -> Result<RegisterValue, RiscvError> {
        self.check_argument(0, width)?;

        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_aarsize(width.code() as u8);
        command.set_transfer(true);
        command.set_regno(u32::from(regno));

        self.execute_abstract_command(command)?;

        let words = self.read_argument(0, width)?;
        let value = RegisterValue::from_words(&words, width);

        tracing::trace!("Read register {:#06x}: {:x?}", regno, value);

        Ok(value)
    }

    /// Write `value` to the register `regno` through an access register command of `width`.
    pub(crate) fn write_abstract_register(
        &mut self,
        regno: u16,
        width: AccessWidth,
        value: RegisterValue,
    ) -> Result<(), RiscvError> {
        tracing::trace!("Write register {:#06x}: {:x?}", regno, value);

        self.check_argument(0, width)?;
        self.write_argument(0, &value.to_words(width))?;

        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_aarsize(width.code() as u8);
        command.set_transfer(true);
        command.set_write(true);
        command.set_regno(u32::from(regno));

        self.execute_abstract_command(command)
    }

    /// Read a CSR at the native register width.
    ///
    /// Harts that only allow GPR access through abstract commands go through the
    /// program buffer instead.
    pub fn read_csr(&mut self, csr: u16) -> Result<RegisterValue, RiscvError> {
        let width = self.hart.access_width;

        if self.hart.flags.data_gpr_only {
            return self.read_csr_progbuf(csr, width);
        }

        self.read_abstract_register(csr, width)
    }

    /// Write a CSR at the native register width.
    pub fn write_csr(&mut self, csr: u16, value: impl Into<RegisterValue>) -> Result<(), RiscvError> {
        let width = self.hart.access_width;
        let value = value.into();

        if self.hart.flags.data_gpr_only {
            return self.write_csr_progbuf(csr, width, value);
        }

        self.write_abstract_register(csr, width, value)
    }

    /// Read a register by its debugger register number.
    pub fn read_register(&mut self, register: u32) -> Result<RegisterValue, RiscvError> {
        match RegisterLocation::from_gdb(register)? {
            RegisterLocation::Csr(csr) => self.read_csr(csr),
            location @ RegisterLocation::Gpr(_) => {
                let width = self.hart.access_width;
                self.read_abstract_register(location.regno(), width)
            }
            location @ RegisterLocation::Fpr(_) => {
                let width = self.fpr_width();
                self.read_abstract_register(location.regno(), width)
            }
        }
    }

    /// Write a register by its debugger register number.
    pub fn write_register(
        &mut self,
        register: u32,
        value: impl Into<RegisterValue>,
    ) -> Result<(), RiscvError> {
        let value = value.into();

        match RegisterLocation::from_gdb(register)? {
            RegisterLocation::Csr(csr) => self.write_csr(csr, value),
            location @ RegisterLocation::Gpr(_) => {
                let width = self.hart.access_width;
                self.write_abstract_register(location.regno(), width, value)
            }
            location @ RegisterLocation::Fpr(_) => {
                let width = self.fpr_width();
                self.write_abstract_register(location.regno(), width, value)
            }
        }
    }

    /// FLEN as implied by the 'F', 'D' and 'Q' extensions.
    fn fpr_width(&self) -> AccessWidth {
        let extensions = self.hart.extensions;
        if extensions & (1 << (b'q' - b'a')) != 0 {
            AccessWidth::Bits128
        } else if extensions & (1 << (b'd' - b'a')) != 0 {
            AccessWidth::Bits64
        } else {
            AccessWidth::Bits32
        }
    }

    /// Load `instructions` into the program buffer, terminated by `ebreak` unless the DM
    /// appends one itself.
    fn load_program(&mut self, instructions: &[u32]) -> Result<(), RiscvError> {
        let needs_ebreak = !self.dm.impebreak();
        let required = instructions.len() + usize::from(needs_ebreak);

        if required > usize::from(self.hart.progbuf_size) {
            tracing::warn!(
                "Program of {} words does not fit the program buffer of {} words",
                required,
                self.hart.progbuf_size
            );
            return Err(RiscvError::ProgramBufferTooSmall);
        }

        for (index, instruction) in instructions.iter().enumerate() {
            self.write_dm(PROGBUF0 + index as u8, *instruction)?;
        }

        if needs_ebreak {
            self.write_dm(PROGBUF0 + instructions.len() as u8, EBREAK)?;
        }

        Ok(())
    }

    /// Run the loaded program buffer without transferring a register.
    fn execute_program_buffer(&mut self) -> Result<(), RiscvError> {
        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_aarsize(self.hart.access_width.code() as u8);
        command.set_postexec(true);
        command.set_regno(u32::from(S0));

        self.execute_abstract_command(command)
    }

    /// Run `body` with `s0` saved, restoring it even if `body` fails.
    fn with_s0_saved<T>(
        &mut self,
        width: AccessWidth,
        body: impl FnOnce(&mut Self) -> Result<T, RiscvError>,
    ) -> Result<T, RiscvError> {
        let s0 = self.read_abstract_register(S0, width)?;

        let result = body(self);

        self.write_abstract_register(S0, width, s0)?;

        result
    }

    pub(crate) fn read_csr_progbuf(
        &mut self,
        csr: u16,
        width: AccessWidth,
    ) -> Result<RegisterValue, RiscvError> {
        tracing::debug!("Reading CSR {:#05x} through the program buffer", csr);

        self.with_s0_saved(width, |interface| {
            interface.load_program(&[csrrs_s0(csr)])?;
            interface.execute_program_buffer()?;
            interface.read_abstract_register(S0, width)
        })
    }

    pub(crate) fn write_csr_progbuf(
        &mut self,
        csr: u16,
        width: AccessWidth,
        value: RegisterValue,
    ) -> Result<(), RiscvError> {
        tracing::debug!("Writing CSR {:#05x} through the program buffer", csr);

        self.with_s0_saved(width, |interface| {
            interface.write_abstract_register(S0, width, value)?;
            interface.load_program(&[csrrw_s0(csr)])?;
            interface.execute_program_buffer()
        })
    }

    /// Read `data.len() / width` consecutive `width` accesses starting at `address`.
    pub(crate) fn abstract_memory_read(
        &mut self,
        address: u64,
        width: AccessWidth,
        data: &mut [u8],
    ) -> Result<(), RiscvError> {
        let command = AccessMemoryCommand::new(width, false);
        let address_width = self.hart.access_width;

        self.check_argument(0, width)?;
        self.check_argument(1, address_width)?;
        self.write_argument(1, &RegisterValue::from(address).to_words(address_width))?;

        for chunk in data.chunks_mut(width.bytes()) {
            self.execute_abstract_command(command)?;

            let words = self.read_argument(0, width)?;
            unpack_words(chunk, &words, width);
        }

        Ok(())
    }

    /// Write `data` as consecutive `width` accesses starting at `address`.
    pub(crate) fn abstract_memory_write(
        &mut self,
        address: u64,
        width: AccessWidth,
        data: &[u8],
    ) -> Result<(), RiscvError> {
        let command = AccessMemoryCommand::new(width, true);
        let address_width = self.hart.access_width;

        self.check_argument(0, width)?;
        self.check_argument(1, address_width)?;
        self.write_argument(1, &RegisterValue::from(address).to_words(address_width))?;

        for chunk in data.chunks(width.bytes()) {
            self.write_argument(0, &pack_words(chunk, width))?;
            self.execute_abstract_command(command)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_register_command_layout() {
        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_aarsize(AccessWidth::Bits32.code() as u8);
        command.set_transfer(true);
        command.set_write(true);
        command.set_regno(0x1008);

        assert_eq!(command.0, 0x0023_1008);
    }

    #[test]
    fn access_memory_command_layout() {
        let command = AccessMemoryCommand::new(AccessWidth::Bits16, false);
        assert_eq!(command.0, 0x0218_0000);

        let command = AccessMemoryCommand::new(AccessWidth::Bits32, true);
        assert_eq!(command.0, 0x0229_0000);
    }

    #[test]
    fn csr_access_instructions() {
        // csrr s0, mhartid
        assert_eq!(csrrs_s0(0xf14), 0xf140_2473);
        // csrw dscratch0, s0
        assert_eq!(csrrw_s0(0x7b2), 0x7b24_1073);
    }
}
