//! System Bus Access (SBA).
//!
//! The SBA block of a Debug Module accesses memory without involving a hart. Reads use
//! read-on-address to start the first access and read-on-data to chain the following
//! ones, with the address auto-incremented by the DM.

use crate::debug_module::{DebugRegister, Sbaddress0, Sbaddress1, Sbcs, Sbdata0};
use crate::hart::{HartStatus, MemoryAccessMethod};
use crate::interface::HartInterface;
use crate::memory::{pack_words, unpack_words, AccessWidth};
use crate::{RiscvError, SystemBusError};

impl HartInterface<'_> {
    /// Read `data.len() / width` consecutive `width` accesses starting at `address`.
    pub(crate) fn sysbus_read(
        &mut self,
        address: u64,
        width: AccessWidth,
        data: &mut [u8],
    ) -> Result<(), RiscvError> {
        let count = data.len() / width.bytes();
        if count == 0 {
            return Ok(());
        }

        let mut sbcs = Sbcs(0);
        sbcs.set_sbaccess(width.code());
        sbcs.set_sbautoincrement(true);
        sbcs.set_sbreadonaddr(true);
        sbcs.set_sbreadondata(count > 1);
        self.write_dm_register(sbcs)?;

        // Writing sbaddress0 starts the first read.
        self.write_sysbus_address(address)?;

        for (index, chunk) in data.chunks_mut(width.bytes()).enumerate() {
            self.sysbus_wait()?;

            if count > 1 && index + 1 == count {
                // Keep the final sbdata0 read from starting another bus access.
                sbcs.set_sbreadondata(false);
                self.write_dm_register(sbcs)?;
            }

            // sbdata0 last, it triggers the next read.
            let mut words = vec![0u32; width.words()];
            for word in (1..width.words()).rev() {
                words[word] = self.read_dm(Sbdata0::ADDRESS + word as u8)?;
            }
            words[0] = self.read_dm(Sbdata0::ADDRESS)?;

            unpack_words(chunk, &words, width);
        }

        self.sysbus_wait()
    }

    /// Write `data` as consecutive `width` accesses starting at `address`.
    pub(crate) fn sysbus_write(
        &mut self,
        address: u64,
        width: AccessWidth,
        data: &[u8],
    ) -> Result<(), RiscvError> {
        let mut sbcs = Sbcs(0);
        sbcs.set_sbaccess(width.code());
        sbcs.set_sbautoincrement(true);
        self.write_dm_register(sbcs)?;

        self.write_sysbus_address(address)?;

        for chunk in data.chunks(width.bytes()) {
            let words = pack_words(chunk, width);

            // sbdata0 last, it triggers the write.
            for word in (1..words.len()).rev() {
                self.write_dm(Sbdata0::ADDRESS + word as u8, words[word])?;
            }
            self.write_dm(Sbdata0::ADDRESS, words[0])?;

            self.sysbus_wait()?;
        }

        Ok(())
    }

    fn write_sysbus_address(&mut self, address: u64) -> Result<(), RiscvError> {
        if self.hart.address_width > 32 || address > u64::from(u32::MAX) {
            self.write_dm_register(Sbaddress1((address >> 32) as u32))?;
        }

        self.write_dm_register(Sbaddress0(address as u32))?;
        Ok(())
    }

    /// Wait for `sbbusy` to clear, then check and acknowledge bus errors.
    fn sysbus_wait(&mut self) -> Result<(), RiscvError> {
        let budget = self.command_budget();

        loop {
            let sbcs: Sbcs = self.read_dm_register()?;

            let error = if sbcs.sbbusyerror() {
                Some(SystemBusError::Busy)
            } else {
                SystemBusError::from_sberror(sbcs.sberror())
            };

            if let Some(error) = error {
                tracing::debug!("System bus access failed: {}", error);

                let mut clear = Sbcs(0);
                clear.set_sbbusyerror(true);
                clear.set_sberror(0x7);
                self.write_dm_register(clear)?;

                self.hart.status = HartStatus::BusError;
                return Err(error.into());
            }

            if !sbcs.sbbusy() {
                self.hart.status = HartStatus::NoError;
                return Ok(());
            }

            budget.check()?;
        }
    }

    /// Switch the hart over to System Bus Access if the DM implements it.
    ///
    /// Returns `false` if there is no usable SBA block.
    pub(crate) fn use_system_bus(&mut self) -> Result<bool, RiscvError> {
        let sbcs: Sbcs = self.read_dm_register()?;

        if sbcs.sbversion() != 1 || sbcs.access_widths() == 0 || sbcs.sbasize() == 0 {
            tracing::debug!(
                "No usable system bus: version {}, widths {:#x}, {} address bits",
                sbcs.sbversion(),
                sbcs.access_widths(),
                sbcs.sbasize()
            );
            return Ok(false);
        }

        self.hart.flags.memory = MemoryAccessMethod::SystemBus;
        self.hart.flags.access_widths = sbcs.access_widths();
        self.hart.address_width = sbcs.sbasize() as u8;

        tracing::debug!(
            "Using system bus access, widths {:#x}, {} address bits",
            sbcs.access_widths(),
            sbcs.sbasize()
        );

        Ok(true)
    }
}
