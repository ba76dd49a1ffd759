use serde::{Deserialize, Serialize};

use rustagb_utils::WeakPointer;

use super::arm7tdmi::Arm7tdmi;
use super::dma::DmaController;
use super::interrupt::InterruptController;
use super::sio::SioController;
use super::sound::SoundController;
use super::timer::Timers;
use super::video::VideoController;
use super::{Addr, Bus};

use self::consts::*;

#[allow(unused)]
pub mod consts {
    pub const REG_DISPCNT: u32 = 0x000;
    pub const REG_DISPSTAT: u32 = 0x004;
    pub const REG_VCOUNT: u32 = 0x006;

    pub const REG_SOUNDCNT_L: u32 = 0x080;
    pub const REG_SOUNDCNT_H: u32 = 0x082;
    pub const REG_SOUNDCNT_X: u32 = 0x084;
    pub const REG_SOUNDBIAS: u32 = 0x088;
    pub const REG_FIFO_A: u32 = 0x0a0;
    pub const REG_FIFO_A_H: u32 = 0x0a2;
    pub const REG_FIFO_B: u32 = 0x0a4;
    pub const REG_FIFO_B_H: u32 = 0x0a6;

    pub const REG_DMA_BASE: u32 = 0x0b0;
    pub const REG_DMA0CNT_H: u32 = 0x0ba;
    pub const REG_DMA1CNT_H: u32 = 0x0c6;
    pub const REG_DMA2CNT_H: u32 = 0x0d2;
    pub const REG_DMA3CNT_H: u32 = 0x0de;

    pub const REG_TM0CNT_L: u32 = 0x100;
    pub const REG_TM0CNT_H: u32 = 0x102;
    pub const REG_TM1CNT_L: u32 = 0x104;
    pub const REG_TM1CNT_H: u32 = 0x106;
    pub const REG_TM2CNT_L: u32 = 0x108;
    pub const REG_TM2CNT_H: u32 = 0x10a;
    pub const REG_TM3CNT_L: u32 = 0x10c;
    pub const REG_TM3CNT_H: u32 = 0x10e;

    pub const REG_SIOCNT: u32 = 0x128;
    pub const REG_KEYINPUT: u32 = 0x130;
    pub const REG_KEYCNT: u32 = 0x132;
    pub const REG_RCNT: u32 = 0x134;

    pub const REG_IE: u32 = 0x200;
    pub const REG_IF: u32 = 0x202;
    pub const REG_WAITCNT: u32 = 0x204;
    pub const REG_IME: u32 = 0x208;
    pub const REG_POSTFLG: u32 = 0x300;
    pub const REG_HALTCNT: u32 = 0x301;

    pub const KEYINPUT_ALL_RELEASED: u16 = 0x3ff;
}

/// The shared I/O register bank. All subsystems dispatch their register
/// slices through here; the convention is that each unit owns the words
/// tagged to it and nothing else writes them.
#[derive(Serialize, Deserialize)]
pub struct IoDevices {
    pub intc: InterruptController,
    pub video: VideoController,
    pub sound: Box<SoundController>,
    pub timers: Timers,
    pub dmac: DmaController,
    pub sio: SioController,
    pub keyinput: u16,
    pub post_boot_flag: bool,
    pub waitcnt: u16,

    // The register file needs the CPU for halt requests and for pulling
    // `next_event` in on timer/DMA writes; the machine rewires this pointer
    // whenever the CPU moves.
    #[serde(skip)]
    cpu_ptr: WeakPointer<Arm7tdmi>,
}

impl std::fmt::Debug for IoDevices {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("IoDevices")
            .field("intc", &self.intc)
            .field("video", &self.video)
            .field("sound", &self.sound)
            .field("timers", &self.timers)
            .field("dmac", &self.dmac)
            .field("sio", &self.sio)
            .field("keyinput", &self.keyinput)
            .field("post_boot_flag", &self.post_boot_flag)
            .field("waitcnt", &self.waitcnt)
            .field("cpu_ptr", &format_args!("{}", "WeakPointer<Arm7tdmi>"))
            .finish()
    }
}

impl Clone for IoDevices {
    fn clone(&self) -> IoDevices {
        IoDevices {
            intc: self.intc.clone(),
            video: self.video.clone(),
            sound: self.sound.clone(),
            timers: self.timers.clone(),
            dmac: self.dmac.clone(),
            sio: self.sio.clone(),
            keyinput: self.keyinput,
            post_boot_flag: self.post_boot_flag,
            waitcnt: self.waitcnt,
            cpu_ptr: Default::default(),
        }
    }
}

impl IoDevices {
    pub fn new(
        intc: InterruptController,
        video: VideoController,
        sound: Box<SoundController>,
        timers: Timers,
        dmac: DmaController,
        sio: SioController,
    ) -> IoDevices {
        IoDevices {
            intc,
            video,
            sound,
            timers,
            dmac,
            sio,
            keyinput: KEYINPUT_ALL_RELEASED,
            post_boot_flag: false,
            waitcnt: 0,
            cpu_ptr: Default::default(),
        }
    }

    pub fn connect_cpu(&mut self, ptr: WeakPointer<Arm7tdmi>) {
        self.cpu_ptr = ptr;
    }
}

impl Bus for IoDevices {
    fn read_16(&mut self, addr: Addr) -> u16 {
        let io = self;
        if addr > 0x800 {
            return 0;
        }
        match addr {
            REG_DISPCNT => io.video.dispcnt,
            REG_DISPSTAT => io.video.dispstat.read(),
            REG_VCOUNT => io.video.vcount as u16,

            REG_IME => io.intc.interrupt_master_enable as u16,
            REG_IE => io.intc.interrupt_enable.value(),
            REG_IF => io.intc.interrupt_flags.get().value(),

            REG_TM0CNT_L..=REG_TM3CNT_H => {
                let cpu: &Arm7tdmi = &io.cpu_ptr;
                io.timers.handle_read(addr, cpu)
            }

            REG_SOUNDCNT_L..=REG_FIFO_B_H => io.sound.handle_read(addr),
            REG_DMA0CNT_H => io.dmac.channels[0].ctrl.0,
            REG_DMA1CNT_H => io.dmac.channels[1].ctrl.0,
            REG_DMA2CNT_H => io.dmac.channels[2].ctrl.0,
            REG_DMA3CNT_H => io.dmac.channels[3].ctrl.0,

            REG_SIOCNT | REG_RCNT => io.sio.handle_read(addr),

            REG_WAITCNT => io.waitcnt,

            REG_POSTFLG => io.post_boot_flag as u16,
            REG_HALTCNT => 0,
            REG_KEYINPUT => io.keyinput,

            _ => {
                trace!("unimplemented read from ioreg {:#x}", addr);
                0
            }
        }
    }

    fn read_8(&mut self, addr: Addr) -> u8 {
        let t = self.read_16(addr & !1);
        if addr & 1 != 0 {
            (t >> 8) as u8
        } else {
            t as u8
        }
    }

    fn write_16(&mut self, addr: Addr, value: u16) {
        let io = self;
        if addr > 0x800 {
            return;
        }
        match addr {
            REG_DISPCNT => io.video.dispcnt = value,
            REG_DISPSTAT => io.video.dispstat.write(value),

            REG_IME => io.intc.write_ime(&mut io.cpu_ptr, value),
            REG_IE => io.intc.write_ie(&mut io.cpu_ptr, value),
            REG_IF => io.intc.clear(value),

            REG_TM0CNT_L..=REG_TM3CNT_H => io.timers.handle_write(addr, value, &mut io.cpu_ptr),

            REG_SOUNDCNT_L..=REG_FIFO_B_H => io.sound.handle_write(addr, value),

            REG_DMA_BASE..=REG_DMA3CNT_H => {
                let channel_id = ((addr - REG_DMA_BASE) / 12) as usize;
                let ofs = (addr - REG_DMA_BASE) % 12;
                let cpu: &mut Arm7tdmi = &mut io.cpu_ptr;
                let started = io.dmac.write_16(channel_id, ofs, value, cpu.cycles);
                if started {
                    // pull the CPU in so the 3-cycle activation is honored
                    let start = io.dmac.channels[channel_id].next_start();
                    if start < cpu.next_event {
                        cpu.next_event = start;
                    }
                }
            }

            REG_SIOCNT | REG_RCNT => io.sio.handle_write(addr, value),

            REG_WAITCNT => io.waitcnt = value,

            REG_POSTFLG => {
                io.post_boot_flag = value & 1 != 0;
                // the upper byte of this word is HALTCNT
                io.write_haltcnt((value >> 8) as u8);
            }

            _ => {
                trace!("unimplemented write to ioreg {:#x}", addr);
            }
        }
    }

    fn write_8(&mut self, addr: Addr, value: u8) {
        match addr {
            REG_POSTFLG => {
                self.post_boot_flag = value & 1 != 0;
            }
            REG_HALTCNT => self.write_haltcnt(value),
            _ => {
                let t = self.read_16(addr & !1);
                let t = if addr & 1 != 0 {
                    (t & 0xff) | (value as u16) << 8
                } else {
                    (t & 0xff00) | (value as u16)
                };
                self.write_16(addr & !1, t);
            }
        }
    }
}

impl IoDevices {
    fn write_haltcnt(&mut self, value: u8) {
        if value & 0x80 != 0 {
            warn!("Stop mode (deep sleep) is not implemented");
        } else {
            // halt until the next unmasked interrupt; the dispatcher
            // fast-forwards the cycle clock while the latch is set
            let cpu = &mut self.cpu_ptr;
            cpu.next_event = 0;
            cpu.halted = true;
        }
    }
}
