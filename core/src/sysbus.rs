use rustagb_utils::{Shared, WeakPointer};

use super::arm7tdmi::Arm7tdmi;
use super::bios::Bios;
use super::bus::{Addr, Bus};
use super::cartridge::Cartridge;
use super::iodev::IoDevices;

pub use self::consts::*;

pub mod consts {
    pub const WORK_RAM_SIZE: usize = 256 * 1024;
    pub const INTERNAL_RAM_SIZE: usize = 32 * 1024;
    pub const PALETTE_RAM_SIZE: usize = 1024;
    pub const VIDEO_RAM_SIZE: usize = 128 * 1024;
    pub const OAM_SIZE: usize = 1024;

    pub const BIOS_ADDR: u32 = 0x0000_0000;
    pub const EWRAM_ADDR: u32 = 0x0200_0000;
    pub const IWRAM_ADDR: u32 = 0x0300_0000;
    pub const IOMEM_ADDR: u32 = 0x0400_0000;
    pub const PALRAM_ADDR: u32 = 0x0500_0000;
    pub const VRAM_ADDR: u32 = 0x0600_0000;
    pub const OAM_ADDR: u32 = 0x0700_0000;
    pub const GAMEPAK_WS0_LO: u32 = 0x0800_0000;
    pub const GAMEPAK_WS0_HI: u32 = 0x0900_0000;
    pub const GAMEPAK_WS1_LO: u32 = 0x0A00_0000;
    pub const GAMEPAK_WS1_HI: u32 = 0x0B00_0000;
    pub const GAMEPAK_WS2_LO: u32 = 0x0C00_0000;
    pub const GAMEPAK_WS2_HI: u32 = 0x0D00_0000;
    pub const SRAM_LO: u32 = 0x0E00_0000;
    pub const SRAM_HI: u32 = 0x0F00_0000;
}

/// The system memory bus: BIOS, work RAMs, the I/O register bank, the
/// video memories (plain storage here) and the cartridge. Waitstate and
/// prefetch timing is left to the interpreter.
pub struct SysBus {
    pub io: Shared<IoDevices>,
    pub bios: Bios,
    pub cartridge: Cartridge,

    ewram: Box<[u8]>,
    iwram: Box<[u8]>,
    palram: Box<[u8]>,
    vram: Box<[u8]>,
    oam: Box<[u8]>,
}

impl std::fmt::Debug for SysBus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SysBus")
            .field("io", &format_args!("{}", "Shared<IoDevices>"))
            .field("bios", &format_args!("{}", "Bios"))
            .field("cartridge", &self.cartridge)
            .field("ewram", &self.ewram)
            .field("iwram", &self.iwram)
            .field("palram", &self.palram)
            .field("vram", &self.vram)
            .field("oam", &self.oam)
            .finish()
    }
}

impl SysBus {
    pub fn new(io: Shared<IoDevices>, bios_rom: Box<[u8]>, cartridge: Cartridge) -> SysBus {
        SysBus {
            io,
            bios: Bios::new(bios_rom),
            cartridge,
            ewram: vec![0; WORK_RAM_SIZE].into_boxed_slice(),
            iwram: vec![0; INTERNAL_RAM_SIZE].into_boxed_slice(),
            palram: vec![0; PALETTE_RAM_SIZE].into_boxed_slice(),
            vram: vec![0; VIDEO_RAM_SIZE].into_boxed_slice(),
            oam: vec![0; OAM_SIZE].into_boxed_slice(),
        }
    }

    pub fn connect_cpu(&mut self, ptr: WeakPointer<Arm7tdmi>) {
        self.bios.connect_arm_core(ptr.clone());
        self.io.connect_cpu(ptr);
    }

    pub fn get_ewram(&self) -> &[u8] {
        &self.ewram
    }

    pub fn set_ewram(&mut self, buffer: Box<[u8]>) {
        self.ewram = buffer;
    }

    pub fn get_iwram(&self) -> &[u8] {
        &self.iwram
    }

    pub fn set_iwram(&mut self, buffer: Box<[u8]>) {
        self.iwram = buffer;
    }

    /// Swap in a new BIOS image. The caller re-wires the CPU pointer.
    pub fn set_bios(&mut self, bios_rom: Box<[u8]>) {
        self.bios = Bios::new(bios_rom);
    }

    #[inline]
    fn vram_ofs(addr: u32) -> u32 {
        // the top 32k of each 128k VRAM page mirrors the obj tile region
        let addr = addr & 0x1_ffff;
        if addr >= 0x1_8000 {
            addr & !0x8000
        } else {
            addr
        }
    }
}

impl Bus for SysBus {
    fn read_8(&mut self, addr: Addr) -> u8 {
        match addr & 0xff00_0000 {
            BIOS_ADDR => {
                if addr >= super::bios::SIZE_BIOS as u32 {
                    0
                } else {
                    self.bios.read_8(addr)
                }
            }
            EWRAM_ADDR => self.ewram.read_8(addr & 0x3_ffff),
            IWRAM_ADDR => self.iwram.read_8(addr & 0x7fff),
            IOMEM_ADDR => self.io.read_8(addr & 0x00ff_ffff),
            PALRAM_ADDR => self.palram.read_8(addr & 0x3ff),
            VRAM_ADDR => self.vram.read_8(Self::vram_ofs(addr)),
            OAM_ADDR => self.oam.read_8(addr & 0x3ff),
            GAMEPAK_WS0_LO..=GAMEPAK_WS2_HI => self.cartridge.read_8(addr),
            SRAM_LO | SRAM_HI => self.cartridge.read_8(addr),
            _ => {
                trace!("invalid read at {:#x}", addr);
                0
            }
        }
    }

    fn read_16(&mut self, addr: Addr) -> u16 {
        match addr & 0xff00_0000 {
            BIOS_ADDR => {
                if addr >= super::bios::SIZE_BIOS as u32 {
                    0
                } else {
                    self.bios.read_16(addr)
                }
            }
            EWRAM_ADDR => self.ewram.read_16(addr & 0x3_fffe),
            IWRAM_ADDR => self.iwram.read_16(addr & 0x7ffe),
            IOMEM_ADDR => self.io.read_16(addr & 0x00ff_fffe),
            PALRAM_ADDR => self.palram.read_16(addr & 0x3fe),
            VRAM_ADDR => self.vram.read_16(Self::vram_ofs(addr & !1)),
            OAM_ADDR => self.oam.read_16(addr & 0x3fe),
            GAMEPAK_WS0_LO..=GAMEPAK_WS2_HI => self.cartridge.read_16(addr & !1),
            SRAM_LO | SRAM_HI => self.cartridge.read_16(addr & !1),
            _ => {
                trace!("invalid read at {:#x}", addr);
                0
            }
        }
    }

    fn write_8(&mut self, addr: Addr, value: u8) {
        match addr & 0xff00_0000 {
            BIOS_ADDR => {}
            EWRAM_ADDR => self.ewram.write_8(addr & 0x3_ffff, value),
            IWRAM_ADDR => self.iwram.write_8(addr & 0x7fff, value),
            IOMEM_ADDR => self.io.write_8(addr & 0x00ff_ffff, value),
            PALRAM_ADDR => self.palram.write_8(addr & 0x3ff, value),
            VRAM_ADDR => self.vram.write_8(Self::vram_ofs(addr), value),
            OAM_ADDR => self.oam.write_8(addr & 0x3ff, value),
            GAMEPAK_WS0_LO..=GAMEPAK_WS2_HI => self.cartridge.write_8(addr, value),
            SRAM_LO | SRAM_HI => self.cartridge.write_8(addr, value),
            _ => {
                trace!("invalid write at {:#x}", addr);
            }
        }
    }

    fn write_16(&mut self, addr: Addr, value: u16) {
        match addr & 0xff00_0000 {
            BIOS_ADDR => {}
            EWRAM_ADDR => self.ewram.write_16(addr & 0x3_fffe, value),
            IWRAM_ADDR => self.iwram.write_16(addr & 0x7ffe, value),
            IOMEM_ADDR => self.io.write_16(addr & 0x00ff_fffe, value),
            PALRAM_ADDR => self.palram.write_16(addr & 0x3fe, value),
            VRAM_ADDR => self.vram.write_16(Self::vram_ofs(addr & !1), value),
            OAM_ADDR => self.oam.write_16(addr & 0x3fe, value),
            GAMEPAK_WS0_LO..=GAMEPAK_WS2_HI => self.cartridge.write_16(addr & !1, value),
            SRAM_LO | SRAM_HI => self.cartridge.write_16(addr & !1, value),
            _ => {
                trace!("invalid write at {:#x}", addr);
            }
        }
    }
}
