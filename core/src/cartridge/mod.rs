use serde::{Deserialize, Serialize};

use super::bus::*;

pub mod header;
use header::CartridgeHeader;

pub mod backup;
pub use backup::BackupType;
use backup::{BackupMedia, BackupMemoryInterface};

mod gpio;
mod rtc;
pub use gpio::Gpio;

mod builder;
mod loader;
pub use builder::GamepakBuilder;

/// Cartridge address space ceiling
pub const ROM_MAX_SIZE: usize = 32 * 1024 * 1024;

pub const GPIO_PORT_DATA: u32 = 0xC4;
pub const GPIO_PORT_DIRECTION: u32 = 0xC6;
pub const GPIO_PORT_CONTROL: u32 = 0xC8;

/// A binary patch to be layered over the pristine ROM (UPS/IPS style
/// patchers implement this).
pub trait Patch {
    /// Size of the patched ROM; 0 means there is nothing to apply
    fn output_size(&self, original_size: usize) -> usize;
    /// Patch `rom` in place; returning false reverts to the pristine ROM
    fn apply(&self, rom: &mut [u8]) -> bool;
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Cartridge {
    pub header: CartridgeHeader,
    /// The original read-only cartridge image, kept for the lifetime of
    /// the machine even when a patch installs a writable copy
    #[serde(skip)]
    pristine: Box<[u8]>,
    /// Patched override of the pristine image, active while present
    #[serde(skip)]
    patched: Option<Box<[u8]>>,
    #[serde(skip)]
    size: usize,
    pub(crate) gpio: Option<Gpio>,
    pub(crate) backup: BackupMedia,
}

impl Cartridge {
    /// An empty cartridge slot, used before a ROM is attached
    pub(crate) fn none() -> Cartridge {
        Cartridge {
            header: CartridgeHeader {
                game_title: String::new(),
                game_code: String::new(),
                maker_code: String::new(),
                software_version: 0,
                checksum: 0,
            },
            pristine: Default::default(),
            patched: None,
            size: 0,
            gpio: None,
            backup: BackupMedia::Undetected,
        }
    }

    /// 'Clones' the cartridge without the ROM buffers
    pub fn thin_copy(&self) -> Cartridge {
        Cartridge {
            header: self.header.clone(),
            pristine: Default::default(),
            patched: None,
            size: 0,
            gpio: self.gpio.clone(),
            backup: self.backup.clone(),
        }
    }

    pub fn update_from(&mut self, other: Cartridge) {
        self.header = other.header;
        self.gpio = other.gpio;
        self.backup = other.backup;
    }

    /// The currently active ROM view
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.patched.as_deref().unwrap_or(&self.pristine)
    }

    #[inline]
    pub fn pristine_bytes(&self) -> &[u8] {
        &self.pristine
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_patched(&self) -> bool {
        self.patched.is_some()
    }

    pub fn get_gpio(&self) -> &Option<Gpio> {
        &self.gpio
    }

    pub fn get_gpio_mut(&mut self) -> &mut Option<Gpio> {
        &mut self.gpio
    }

    /// Layer `patch` over the pristine ROM. A failing patch releases its
    /// buffer and leaves the pristine image active.
    pub fn apply_patch(&mut self, patch: &dyn Patch) {
        let patched_size = patch.output_size(self.pristine.len());
        if patched_size == 0 {
            return;
        }
        let mut buffer = vec![0u8; patched_size];
        let n = patched_size.min(self.pristine.len());
        buffer[..n].copy_from_slice(&self.pristine[..n]);
        if patch.apply(&mut buffer) {
            info!("patched ROM, new size {}", patched_size);
            self.patched = Some(buffer.into_boxed_slice());
            self.size = patched_size;
        } else {
            warn!("patch failed to apply, keeping the pristine ROM");
        }
    }

    #[inline]
    fn is_gpio_access(addr: u32) -> bool {
        let ofs = addr & 0x01ff_ffff;
        ofs == GPIO_PORT_DATA || ofs == GPIO_PORT_DIRECTION || ofs == GPIO_PORT_CONTROL
    }
}

/// From GBATEK:
/// Reading from GamePak ROM when no Cartridge is inserted -
///     Because Gamepak uses the same signal-lines for both 16bit data and for lower 16bit halfword address,
///     the entire gamepak ROM area is effectively filled by incrementing 16bit values (Address/2 AND FFFFh).
#[inline]
fn open_bus_16(addr: u32) -> u16 {
    ((addr / 2) & 0xffff) as u16
}

impl Bus for Cartridge {
    fn read_8(&mut self, addr: Addr) -> u8 {
        match addr & 0xff00_0000 {
            crate::sysbus::consts::SRAM_LO | crate::sysbus::consts::SRAM_HI => {
                match &self.backup {
                    BackupMedia::Sram(memory) => memory.read((addr & 0x7fff) as usize),
                    BackupMedia::Flash(flash) => flash.read(addr),
                    // ready bit; the serial protocol is driven over DMA3
                    BackupMedia::Eeprom(..) => 1,
                    BackupMedia::Undetected => 0xff,
                }
            }
            _ => {
                let ofs = (addr & 0x01ff_ffff) as usize;
                if ofs < self.size {
                    self.bytes()[ofs]
                } else {
                    (open_bus_16(addr) >> ((addr & 1) << 3)) as u8
                }
            }
        }
    }

    fn read_16(&mut self, addr: Addr) -> u16 {
        if Cartridge::is_gpio_access(addr) {
            if let Some(gpio) = &self.gpio {
                if gpio.is_readable() {
                    return gpio.read(addr & 0x01ff_ffff);
                }
                warn!("trying to read GPIO when reads are not allowed");
            }
        }
        self.default_read_16(addr)
    }

    fn write_8(&mut self, addr: Addr, value: u8) {
        match addr & 0xff00_0000 {
            crate::sysbus::consts::SRAM_LO | crate::sysbus::consts::SRAM_HI => {
                match &mut self.backup {
                    BackupMedia::Sram(memory) => memory.write((addr & 0x7fff) as usize, value),
                    BackupMedia::Flash(flash) => flash.write(addr, value),
                    _ => {}
                }
            }
            _ => {
                trace!("write {:02x} to read-only cartridge at {:#x}", value, addr);
            }
        }
    }

    fn write_16(&mut self, addr: Addr, value: u16) {
        if Cartridge::is_gpio_access(addr) {
            if let Some(gpio) = &mut self.gpio {
                gpio.write(addr & 0x01ff_ffff, value);
                return;
            }
        }
        self.default_write_16(addr, value);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A minimal ROM image with a valid header for `code`
    pub(crate) fn make_rom_with_code(code: &[u8; 4]) -> Vec<u8> {
        let mut rom = vec![0u8; 0x200];
        rom[0xa0..0xac].copy_from_slice(b"TESTROM     ");
        rom[0xac..0xb0].copy_from_slice(code);
        rom[0xb0..0xb2].copy_from_slice(b"01");
        rom[0xb2] = 0x96;
        // complement check over 0xa0..=0xbc
        let checksum = rom[0xa0..=0xbc]
            .iter()
            .cloned()
            .fold(0u8, u8::wrapping_sub)
            .wrapping_sub(0x19);
        rom[0xbd] = checksum;
        rom
    }

    pub(crate) fn make_cartridge(code: &[u8; 4]) -> Cartridge {
        GamepakBuilder::new()
            .buffer(&make_rom_with_code(code))
            .without_backup_to_file()
            .build()
            .unwrap()
    }

    struct GrowPatch {
        ok: bool,
    }

    impl Patch for GrowPatch {
        fn output_size(&self, original_size: usize) -> usize {
            original_size + 0x100
        }
        fn apply(&self, rom: &mut [u8]) -> bool {
            if self.ok {
                let len = rom.len();
                rom[len - 1] = 0xaa;
            }
            self.ok
        }
    }

    #[test]
    fn test_override_gives_emerald_flash_and_rtc() {
        let cart = make_cartridge(b"BPEE");
        assert_eq!(cart.backup.backup_type(), Some(BackupType::Flash1M));
        let gpio = cart.get_gpio().as_ref().unwrap();
        assert!(gpio.rtc.is_some());
        assert!(gpio.gyro.is_none());
        assert!(gpio.rumble.is_none());
    }

    #[test]
    fn test_autodetect_by_id_string() {
        let mut rom = make_rom_with_code(b"ZZZZ");
        rom.extend_from_slice(b"SRAM_V113");
        let cart = GamepakBuilder::new()
            .buffer(&rom)
            .without_backup_to_file()
            .build()
            .unwrap();
        assert_eq!(cart.backup.backup_type(), Some(BackupType::Sram));
    }

    #[test]
    fn test_patch_applies_and_swaps_active_rom() {
        let mut cart = make_cartridge(b"ZZZZ");
        let pristine_size = cart.size();
        cart.apply_patch(&GrowPatch { ok: true });
        assert!(cart.is_patched());
        assert_eq!(cart.size(), pristine_size + 0x100);
        assert_eq!(cart.bytes()[cart.size() - 1], 0xaa);
        // the pristine view survives
        assert_eq!(cart.pristine_bytes().len(), pristine_size);
    }

    #[test]
    fn test_failed_patch_reverts_to_pristine() {
        let mut cart = make_cartridge(b"ZZZZ");
        let pristine_size = cart.size();
        cart.apply_patch(&GrowPatch { ok: false });
        assert!(!cart.is_patched());
        assert_eq!(cart.size(), pristine_size);
        assert_eq!(cart.bytes().as_ptr(), cart.pristine_bytes().as_ptr());
    }

    #[test]
    fn test_open_bus_reads_outside_rom() {
        let mut cart = make_cartridge(b"ZZZZ");
        let addr = 0x0800_0000 + 0x0100_0000u32;
        assert_eq!(cart.read_16(addr), open_bus_16(addr));
    }
}
