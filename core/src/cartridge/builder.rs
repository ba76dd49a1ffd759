use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use memmem::{Searcher, TwoWaySearcher};
use num::FromPrimitive;

use super::super::overrides::{self, GpioFeatures};
use super::super::{GBAError, GBAResult};
use super::backup::{BackupFile, BackupMedia, BackupType, Flash, FlashSize, EEPROM_SIZE, SRAM_SIZE};
use super::gpio::Gpio;
use super::header;
use super::loader::{load_from_bytes, load_from_file, LoadRom};
use super::{Cartridge, ROM_MAX_SIZE};

#[derive(Debug)]
pub struct GamepakBuilder {
    path: Option<PathBuf>,
    bytes: Option<Box<[u8]>>,
    save_path: Option<PathBuf>,
    save_type: BackupType,
    gpio_features: GpioFeatures,
    create_backup_file: bool,
}

impl GamepakBuilder {
    pub fn new() -> GamepakBuilder {
        GamepakBuilder {
            save_type: BackupType::AutoDetect,
            path: None,
            save_path: None,
            bytes: None,
            gpio_features: GpioFeatures::empty(),
            create_backup_file: true,
        }
    }

    pub fn take_buffer(mut self, bytes: Box<[u8]>) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn buffer(mut self, bytes: &[u8]) -> Self {
        self.bytes = Some(bytes.into());
        self
    }

    pub fn file(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }

    pub fn save_path(mut self, path: &Path) -> Self {
        self.save_path = Some(path.to_path_buf());
        self
    }

    pub fn save_type(mut self, save_type: BackupType) -> Self {
        self.save_type = save_type;
        self
    }

    pub fn with_sram(mut self) -> Self {
        self.save_type = BackupType::Sram;
        self
    }

    pub fn with_flash128k(mut self) -> Self {
        self.save_type = BackupType::Flash1M;
        self
    }

    pub fn with_flash64k(mut self) -> Self {
        self.save_type = BackupType::Flash512;
        self
    }

    pub fn with_eeprom(mut self) -> Self {
        self.save_type = BackupType::Eeprom;
        self
    }

    pub fn without_backup_to_file(mut self) -> Self {
        self.create_backup_file = false;
        self
    }

    pub fn with_rtc(mut self) -> Self {
        self.gpio_features |= GpioFeatures::RTC;
        self
    }

    pub fn build(mut self) -> GBAResult<Cartridge> {
        let bytes = if let Some(bytes) = self.bytes {
            match load_from_bytes(bytes.to_vec())? {
                LoadRom::Raw(data) => Ok(data),
            }
        } else if let Some(path) = &self.path {
            match load_from_file(path)? {
                LoadRom::Raw(data) => Ok(data),
            }
        } else {
            Err(GBAError::CartridgeLoadError(
                "either provide file() or buffer()".to_string(),
            ))
        }?;

        let mut bytes = bytes;
        if bytes.len() > ROM_MAX_SIZE {
            warn!(
                "ROM is larger than the 32 MiB cartridge ceiling, truncating"
            );
            bytes.truncate(ROM_MAX_SIZE);
        }

        let header = header::parse(&bytes)?;
        info!("Loaded ROM: {:?} ({})", header, ByteSize::b(bytes.len() as u64));

        if !self.create_backup_file {
            self.save_path = None;
        } else if self.save_path.is_none() {
            if let Some(path) = &self.path {
                self.save_path = Some(path.with_extension(BACKUP_FILE_EXT));
            } else {
                warn!("can't create save file as no save path was provided")
            }
        }

        let mut save_type = self.save_type;
        let mut gpio_features = self.gpio_features;

        if let Some(game_override) = overrides::get_game_overrides(&header.game_code) {
            info!(
                "Found game overrides for {} (id {:#010x}): {:#?}",
                header.game_code,
                header.game_code_id(),
                game_override
            );
            if let Some(override_save_type) = game_override.save_type() {
                if override_save_type != save_type && save_type != BackupType::AutoDetect {
                    warn!(
                        "Forced save type {:?} takes priority of {:?}",
                        save_type, override_save_type
                    );
                }
                save_type = override_save_type;
            }

            gpio_features |= game_override.gpio();
        }

        if save_type == BackupType::AutoDetect {
            if let Some(detected) = detect_backup_type(&bytes) {
                info!("Detected Backup: {:?}", detected);
                save_type = detected;
            } else {
                warn!("could not detect backup save type");
            }
        }

        let backup = create_backup(save_type, self.save_path)?;

        let gpio = if gpio_features.is_empty() {
            None
        } else {
            let mut gpio = Gpio::new();
            if gpio_features.contains(GpioFeatures::RTC) {
                gpio.init_rtc();
            }
            if gpio_features.contains(GpioFeatures::GYRO) {
                gpio.init_gyro();
            }
            if gpio_features.contains(GpioFeatures::RUMBLE) {
                gpio.init_rumble();
            }
            // the light sensor has no emulated device
            Some(gpio)
        };

        let size = bytes.len();
        Ok(Cartridge {
            header,
            gpio,
            pristine: bytes.into_boxed_slice(),
            patched: None,
            size,
            backup,
        })
    }
}

const BACKUP_FILE_EXT: &str = "sav";

fn create_backup(backup_type: BackupType, backup_path: Option<PathBuf>) -> GBAResult<BackupMedia> {
    Ok(match backup_type {
        BackupType::Flash | BackupType::Flash512 => {
            BackupMedia::Flash(Flash::new(backup_path, FlashSize::Flash64k)?)
        }
        BackupType::Flash1M => BackupMedia::Flash(Flash::new(backup_path, FlashSize::Flash128k)?),
        BackupType::Sram => BackupMedia::Sram(BackupFile::new(SRAM_SIZE, backup_path)?),
        BackupType::Eeprom => BackupMedia::Eeprom(BackupFile::new(EEPROM_SIZE, backup_path)?),
        BackupType::AutoDetect => BackupMedia::Undetected,
    })
}

fn detect_backup_type(bytes: &[u8]) -> Option<BackupType> {
    const ID_STRINGS: &[&str] = &["EEPROM", "SRAM", "FLASH_", "FLASH512_", "FLASH1M_"];

    for i in 0..5 {
        let search = TwoWaySearcher::new(ID_STRINGS[i].as_bytes());
        if search.search_in(bytes).is_some() {
            return Some(BackupType::from_u8(i as u8).unwrap());
        }
    }
    None
}
