use std::convert::TryFrom;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::GBAResult;

mod backup_file;
pub use backup_file::BackupFile;

#[derive(Debug, Primitive, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub enum BackupType {
    Eeprom = 0,
    Sram = 1,
    Flash = 2,
    Flash512 = 3,
    Flash1M = 4,
    AutoDetect = 5,
}

impl TryFrom<&str> for BackupType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        use BackupType::*;
        match s {
            "autodetect" => Ok(AutoDetect),
            "sram" => Ok(Sram),
            "flash128k" => Ok(Flash1M),
            "flash64k" => Ok(Flash512),
            "eeprom" => Ok(Eeprom),
            _ => Err(format!("{} is not a valid save type", s)),
        }
    }
}

pub trait BackupMemoryInterface: Sized + fmt::Debug {
    fn write(&mut self, offset: usize, value: u8);
    fn read(&self, offset: usize) -> u8;
    fn resize(&mut self, new_size: usize);
}

pub const SRAM_SIZE: usize = 0x8000;
pub const EEPROM_SIZE: usize = 0x2000;

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub enum FlashSize {
    Flash64k,
    Flash128k,
}

impl FlashSize {
    pub fn bytes(self) -> usize {
        match self {
            FlashSize::Flash64k => 64 * 1024,
            FlashSize::Flash128k => 128 * 1024,
        }
    }
}

/// Flash save memory.
///
/// Only the banked byte array is modelled; the chip-ID/erase command
/// machine a game drives through the 0xE005555 handshake is collapsed to
/// plain reads and writes.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Flash {
    pub size: FlashSize,
    bank: usize,
    memory: BackupFile,
}

impl Flash {
    pub fn new(path: Option<PathBuf>, size: FlashSize) -> GBAResult<Flash> {
        Ok(Flash {
            size,
            bank: 0,
            memory: BackupFile::new(size.bytes(), path)?,
        })
    }

    #[inline]
    fn offset(&self, addr: u32) -> usize {
        self.bank * 0x1_0000 + (addr as usize & 0xffff)
    }

    pub fn select_bank(&mut self, bank: usize) {
        if self.size == FlashSize::Flash128k {
            self.bank = bank & 1;
        }
    }

    pub fn read(&self, addr: u32) -> u8 {
        self.memory.read(self.offset(addr))
    }

    pub fn write(&mut self, addr: u32, value: u8) {
        let offset = self.offset(addr);
        self.memory.write(offset, value);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum BackupMedia {
    Sram(BackupFile),
    Flash(Flash),
    /// Serial EEPROM; the DMA3 read/write protocol is not modelled, reads
    /// report the ready bit
    Eeprom(BackupFile),
    Undetected,
}

impl BackupMedia {
    pub fn backup_type(&self) -> Option<BackupType> {
        match self {
            BackupMedia::Sram(..) => Some(BackupType::Sram),
            BackupMedia::Flash(flash) => Some(match flash.size {
                FlashSize::Flash64k => BackupType::Flash512,
                FlashSize::Flash128k => BackupType::Flash1M,
            }),
            BackupMedia::Eeprom(..) => Some(BackupType::Eeprom),
            BackupMedia::Undetected => None,
        }
    }
}
