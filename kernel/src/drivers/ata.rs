//! ATA PIO 28-bit LBA driver, primary master (spec §4.A).

use crate::arch::port::{io_wait, Port};
use crate::error::{Errno, KernelError};

const DATA: u16 = 0x1F0;
const SECTOR_COUNT: u16 = 0x1F2;
const LBA_LOW: u16 = 0x1F3;
const LBA_MID: u16 = 0x1F4;
const LBA_HIGH: u16 = 0x1F5;
const DRIVE_HEAD: u16 = 0x1F6;
const COMMAND: u16 = 0x1F7;
const STATUS: u16 = 0x1F7;

const STATUS_BSY: u8 = 0x80;
const STATUS_RDY: u8 = 0x40;
const STATUS_DF: u8 = 0x20;
const STATUS_ERR: u8 = 0x01;

const CMD_READ: u8 = 0x20;
const CMD_WRITE: u8 = 0x30;
const CMD_CACHE_FLUSH: u8 = 0xE7;

/// Opaque block-storage handle (spec §3). Implemented here by the ATA
/// driver; the USTAR backend only depends on this trait.
pub trait BlockDevice: Send + Sync {
    fn read_sectors(&self, lba: u32, count: u32, out: &mut [u8]) -> Result<(), Errno>;
    fn write_sectors(&self, lba: u32, count: u32, data: &[u8]) -> Result<(), Errno>;
}

pub struct AtaPio;

impl AtaPio {
    pub const fn new() -> Self {
        AtaPio
    }

    fn wait_bsy_clear(&self) {
        let status: Port<u8> = Port::new(STATUS);
        while status.read() & STATUS_BSY != 0 {}
    }

    /// Waits for the transfer-ready condition. Polls `RDY`, not `DRQ`, per
    /// the inherited (possibly buggy) original driver — spec §9a leaves
    /// the choice to the implementer; this crate keeps the original
    /// behavior rather than silently "fixing" it.
    fn wait_drq(&self) {
        let status: Port<u8> = Port::new(STATUS);
        while status.read() & STATUS_RDY == 0 {}
    }

    fn check_fault(&self) -> Result<(), Errno> {
        let status: Port<u8> = Port::new(STATUS);
        let s = status.read();
        if s & (STATUS_ERR | STATUS_DF) != 0 {
            crate::error::fatal(KernelError::AtaFault { status: s });
        }
        Ok(())
    }

    fn select_lba(&self, lba: u32, sector_count: u8) {
        let mut drive_head: Port<u8> = Port::new(DRIVE_HEAD);
        let mut sc: Port<u8> = Port::new(SECTOR_COUNT);
        let mut low: Port<u8> = Port::new(LBA_LOW);
        let mut mid: Port<u8> = Port::new(LBA_MID);
        let mut high: Port<u8> = Port::new(LBA_HIGH);

        drive_head.write(0xE0 | (((lba >> 24) & 0xF) as u8));
        sc.write(sector_count);
        low.write(lba as u8);
        mid.write((lba >> 8) as u8);
        high.write((lba >> 16) as u8);
    }
}

impl Default for AtaPio {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for AtaPio {
    fn read_sectors(&self, lba: u32, count: u32, out: &mut [u8]) -> Result<(), Errno> {
        if out.len() < count as usize * 512 {
            return Err(Errno::Inval);
        }
        self.wait_bsy_clear();
        self.select_lba(lba, count as u8);
        let mut command: Port<u8> = Port::new(COMMAND);
        command.write(CMD_READ);

        let data: Port<u16> = Port::new(DATA);
        for sector in 0..count as usize {
            self.wait_bsy_clear();
            self.wait_drq();
            self.check_fault()?;
            for word in 0..256 {
                let value = data.read();
                let byte_off = sector * 512 + word * 2;
                out[byte_off] = value as u8;
                out[byte_off + 1] = (value >> 8) as u8;
            }
        }
        Ok(())
    }

    fn write_sectors(&self, lba: u32, count: u32, data_in: &[u8]) -> Result<(), Errno> {
        if data_in.len() < count as usize * 512 {
            return Err(Errno::Inval);
        }
        self.wait_bsy_clear();
        self.select_lba(lba, count as u8);
        let mut command: Port<u8> = Port::new(COMMAND);
        command.write(CMD_WRITE);

        let mut data: Port<u16> = Port::new(DATA);
        for sector in 0..count as usize {
            self.wait_bsy_clear();
            self.wait_drq();
            self.check_fault()?;
            for word in 0..256 {
                let byte_off = sector * 512 + word * 2;
                let value = data_in[byte_off] as u16 | ((data_in[byte_off + 1] as u16) << 8);
                data.write(value);
                io_wait();
            }
        }
        command.write(CMD_CACHE_FLUSH);
        Ok(())
    }
}
