use num::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::arm7tdmi::Arm7tdmi;
use super::interrupt::{Interrupt, InterruptController};
use super::iodev::consts::{REG_FIFO_A, REG_FIFO_B};
use super::sysbus::consts::IOMEM_ADDR;
use super::sysbus::SysBus;
use super::Bus;

pub const TIMING_IMMEDIATE: u16 = 0;
pub const TIMING_VBLANK: u16 = 1;
pub const TIMING_HBLANK: u16 = 2;
pub const TIMING_SPECIAL: u16 = 3;

/// An immediately-started channel performs its first transfer this many
/// cycles after the control write
const ACTIVATION_DELAY: i32 = 3;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DmaChannel {
    id: usize,

    pub src: u32,
    pub dst: u32,
    pub wc: u32,
    pub ctrl: DmaChannelCtrl,

    // These are "latched" when the dma is enabled.
    internal: DmaInternalRegs,

    /// Pending write-triggered activation, relative to the CPU cycle epoch;
    /// `i32::MAX` when no activation is in flight
    next_start: i32,

    running: bool,
    fifo_mode: bool,
    irq: Interrupt,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
struct DmaInternalRegs {
    src_addr: u32,
    dst_addr: u32,
    count: u32,
}

impl DmaChannel {
    pub fn new(id: usize) -> DmaChannel {
        if id > 3 {
            panic!("invalid dma id {}", id);
        }
        DmaChannel {
            id,
            irq: Interrupt::from_usize(id + 8).unwrap(),
            running: false,
            src: 0,
            dst: 0,
            wc: 0,
            ctrl: DmaChannelCtrl(0),
            next_start: i32::MAX,

            fifo_mode: false,
            internal: Default::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    #[inline]
    pub fn next_start(&self) -> i32 {
        self.next_start
    }

    pub fn write_src_low(&mut self, low: u16) {
        let src = self.src;
        self.src = (src & 0xffff0000) | (low as u32);
    }

    pub fn write_src_high(&mut self, high: u16) {
        let src = self.src;
        let high = (high & 0xfff) as u32;
        self.src = (src & 0xffff) | (high << 16);
    }

    pub fn write_dst_low(&mut self, low: u16) {
        let dst = self.dst;
        self.dst = (dst & 0xffff0000) | (low as u32);
    }

    pub fn write_dst_high(&mut self, high: u16) {
        let dst = self.dst;
        let high = (high & 0xfff) as u32;
        self.dst = (dst & 0xffff) | (high << 16);
    }

    pub fn write_word_count(&mut self, value: u16) {
        self.wc = value as u32;
    }

    pub fn write_dma_ctrl(&mut self, value: u16) -> bool {
        let ctrl = DmaChannelCtrl(value);
        let timing = ctrl.timing();
        let mut start_immediately = false;
        if ctrl.is_enabled() && !self.ctrl.is_enabled() {
            trace!(
                "DMA{} enabled! timing={} src={:#x} dst={:#x} cnt={}",
                self.id,
                timing,
                self.src,
                self.dst,
                self.wc
            );
            self.running = true;
            start_immediately = timing == TIMING_IMMEDIATE;
            self.internal.src_addr = self.src;
            self.internal.dst_addr = self.dst;
            self.internal.count = self.wc;
            self.fifo_mode = timing == TIMING_SPECIAL
                && ctrl.repeat()
                && (self.id == 1 || self.id == 2)
                && (self.dst == IOMEM_ADDR + REG_FIFO_A || self.dst == IOMEM_ADDR + REG_FIFO_B);
        }
        if !ctrl.is_enabled() {
            self.running = false;
        }
        self.ctrl = ctrl;
        start_immediately
    }

    fn xfer(&mut self, sb: &mut SysBus, cpu: &mut Arm7tdmi, intc: &InterruptController) {
        let word_size = if self.ctrl.is_32bit() { 4u32 } else { 2u32 };
        let count = match self.internal.count {
            0 => match self.id {
                3 => 0x1_0000,
                _ => 0x0_4000,
            },
            _ => self.internal.count,
        };

        let src_adj = match self.ctrl.src_adj() {
            /* Increment */ 0 => word_size,
            /* Decrement */ 1 => 0u32.wrapping_sub(word_size),
            /* Fixed */ 2 => 0,
            _ => panic!("forbidden DMA source address adjustment"),
        };
        let dst_adj = match self.ctrl.dst_adj() {
            /* Increment[+Reload] */ 0 | 3 => word_size,
            /* Decrement */ 1 => 0u32.wrapping_sub(word_size),
            /* Fixed */ 2 => 0,
            _ => panic!("forbidden DMA dest address adjustment"),
        };

        if self.fifo_mode {
            for _ in 0..4 {
                let v = sb.read_32(self.internal.src_addr & !3);
                sb.write_32(self.internal.dst_addr & !3, v);
                self.internal.src_addr = self.internal.src_addr.wrapping_add(4);
            }
        } else if word_size == 4 {
            for _ in 0..count {
                let w = sb.read_32(self.internal.src_addr & !3);
                sb.write_32(self.internal.dst_addr & !3, w);
                self.internal.src_addr = self.internal.src_addr.wrapping_add(src_adj);
                self.internal.dst_addr = self.internal.dst_addr.wrapping_add(dst_adj);
            }
        } else {
            for _ in 0..count {
                let hw = sb.read_16(self.internal.src_addr & !1);
                sb.write_16(self.internal.dst_addr & !1, hw);
                self.internal.src_addr = self.internal.src_addr.wrapping_add(src_adj);
                self.internal.dst_addr = self.internal.dst_addr.wrapping_add(dst_adj);
            }
        }
        if self.ctrl.is_triggering_irq() {
            intc.raise_irq(cpu, self.irq);
        }
        if self.ctrl.repeat() {
            /* reload */
            if 3 == self.ctrl.dst_adj() {
                self.internal.dst_addr = self.dst;
            }
        } else {
            self.running = false;
            self.ctrl.set_enabled(false);
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DmaController {
    pub channels: [DmaChannel; 4],
    pending_set: u8,
}

impl DmaController {
    pub fn new() -> DmaController {
        DmaController {
            channels: [
                DmaChannel::new(0),
                DmaChannel::new(1),
                DmaChannel::new(2),
                DmaChannel::new(3),
            ],
            pending_set: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.pending_set != 0
    }

    /// Drive pending activations and transfers; returns the cycles until
    /// the next in-flight activation.
    pub fn run_dmas(
        &mut self,
        cycles: i32,
        cpu: &mut Arm7tdmi,
        intc: &InterruptController,
        sb: &mut SysBus,
    ) -> i32 {
        let mut next_event = i32::MAX;
        for id in 0..4 {
            let channel = &mut self.channels[id];
            if channel.next_start != i32::MAX {
                channel.next_start -= cycles;
                if channel.next_start <= 0 {
                    channel.next_start = i32::MAX;
                    self.pending_set |= 1 << id;
                } else if channel.next_start < next_event {
                    next_event = channel.next_start;
                }
            }
        }
        if self.pending_set != 0 {
            for id in 0..4 {
                if self.pending_set & (1 << id) != 0 {
                    self.channels[id].xfer(sb, cpu, intc);
                }
            }
            self.pending_set = 0;
        }
        next_event
    }

    /// Register write; `now` is the current CPU cycle timestamp, used to
    /// schedule the activation of an immediately-started channel.
    pub fn write_16(&mut self, channel_id: usize, ofs: u32, value: u16, now: i32) -> bool {
        match ofs {
            0 => self.channels[channel_id].write_src_low(value),
            2 => self.channels[channel_id].write_src_high(value),
            4 => self.channels[channel_id].write_dst_low(value),
            6 => self.channels[channel_id].write_dst_high(value),
            8 => self.channels[channel_id].write_word_count(value),
            10 => {
                let start_immediately = self.channels[channel_id].write_dma_ctrl(value);
                if start_immediately {
                    self.channels[channel_id].next_start = now + ACTIVATION_DELAY;
                    return true;
                }
                self.channels[channel_id].next_start = i32::MAX;
                self.deactivate_channel(channel_id);
            }
            _ => panic!("Invalid dma offset {:x}", ofs),
        }
        false
    }

    pub fn notify_from_gpu(&mut self, timing: u16) {
        for i in 0..4 {
            if self.channels[i].ctrl.is_enabled() && self.channels[i].ctrl.timing() == timing {
                self.pending_set |= 1 << i;
            }
        }
    }

    pub fn notify_sound_fifo(&mut self, fifo_reg: u32) {
        let fifo_addr = IOMEM_ADDR + fifo_reg;
        for i in 1..=2 {
            if self.channels[i].ctrl.is_enabled()
                && self.channels[i].running
                && self.channels[i].ctrl.timing() == TIMING_SPECIAL
                && self.channels[i].dst == fifo_addr
            {
                self.pending_set |= 1 << i;
            }
        }
    }

    pub fn activate_channel(&mut self, channel_id: usize) {
        self.pending_set |= 1 << channel_id;
    }

    pub fn deactivate_channel(&mut self, channel_id: usize) {
        self.pending_set &= !(1 << channel_id);
    }
}

pub trait DmaNotifer {
    fn notify(&mut self, timing: u16);
}

impl DmaNotifer for DmaController {
    fn notify(&mut self, timing: u16) {
        self.notify_from_gpu(timing);
    }
}

bitfield! {
    #[derive(Serialize, Deserialize, Clone, Default)]
    pub struct DmaChannelCtrl(u16);
    impl Debug;
    u16;
    dst_adj, _ : 6, 5;
    src_adj, _ : 8, 7;
    repeat, _ : 9;
    is_32bit, _: 10;
    timing, _: 13, 12;
    is_triggering_irq, _: 14;
    is_enabled, set_enabled: 15;
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::rc::Rc;

    use rustagb_utils::Shared;

    use crate::cartridge::Cartridge;
    use crate::interrupt::IrqBitmask;
    use crate::iodev::IoDevices;
    use crate::sio::SioController;
    use crate::sound::SoundController;
    use crate::sysbus::consts::EWRAM_ADDR;
    use crate::timer::Timers;
    use crate::video::VideoController;

    const CTL_ENABLE: u16 = 1 << 15;
    const CTL_IRQ: u16 = 1 << 14;
    const CTL_32BIT: u16 = 1 << 10;
    const CTL_REPEAT: u16 = 1 << 9;
    const SRC_DECREMENT: u16 = 1 << 7;
    const DST_FIXED: u16 = 2 << 5;
    const DST_RELOAD: u16 = 3 << 5;
    const TIMING_HBLANK_BITS: u16 = TIMING_HBLANK << 12;

    struct TestRig {
        dmac: DmaController,
        cpu: Arm7tdmi,
        intc: InterruptController,
        sysbus: Shared<SysBus>,
    }

    impl TestRig {
        fn new() -> TestRig {
            let flags = Rc::new(Cell::new(IrqBitmask(0)));
            let io = Shared::new(IoDevices::new(
                InterruptController::new(flags.clone()),
                VideoController::new(),
                Box::new(SoundController::new()),
                Timers::new(),
                DmaController::new(),
                SioController::new(),
            ));
            let sysbus = Shared::new(SysBus::new(
                io,
                vec![0u8; 0x4000].into_boxed_slice(),
                Cartridge::none(),
            ));
            TestRig {
                dmac: DmaController::new(),
                cpu: Arm7tdmi::new(),
                intc: InterruptController::new(flags),
                sysbus,
            }
        }

        /// Program a channel's registers the way a game would; returns
        /// true when the control write started it immediately
        fn setup_channel(&mut self, id: usize, src: u32, dst: u32, wc: u16, ctrl: u16) -> bool {
            self.dmac.write_16(id, 0, (src & 0xffff) as u16, 0);
            self.dmac.write_16(id, 2, (src >> 16) as u16, 0);
            self.dmac.write_16(id, 4, (dst & 0xffff) as u16, 0);
            self.dmac.write_16(id, 6, (dst >> 16) as u16, 0);
            self.dmac.write_16(id, 8, wc, 0);
            self.dmac.write_16(id, 10, ctrl, 0)
        }

        fn run(&mut self, cycles: i32) -> i32 {
            self.dmac
                .run_dmas(cycles, &mut self.cpu, &self.intc, &mut self.sysbus)
        }
    }

    #[test]
    fn test_immediate_transfer_after_activation_delay() {
        let mut rig = TestRig::new();
        rig.intc.interrupt_master_enable = true;
        for i in 0..4u32 {
            rig.sysbus.write_16(EWRAM_ADDR + i * 2, 0x1100 + i as u16);
        }

        let started =
            rig.setup_channel(3, EWRAM_ADDR, EWRAM_ADDR + 0x100, 4, CTL_ENABLE | CTL_IRQ);
        assert!(started);

        // nothing moves until the 3 activation cycles elapse
        let next_event = rig.run(2);
        assert_eq!(next_event, 1);
        assert_eq!(rig.sysbus.read_16(EWRAM_ADDR + 0x100), 0);

        rig.run(1);
        for i in 0..4u32 {
            assert_eq!(
                rig.sysbus.read_16(EWRAM_ADDR + 0x100 + i * 2),
                0x1100 + i as u16
            );
        }

        // one-shot: the channel disables itself and raises its IRQ
        assert!(!rig.dmac.channels[3].ctrl.is_enabled());
        assert!(!rig.dmac.channels[3].is_running());
        assert!(rig.intc.interrupt_flags.get().DMA3());
    }

    #[test]
    fn test_source_decrement_fixed_destination() {
        let mut rig = TestRig::new();
        rig.sysbus.write_16(EWRAM_ADDR + 0x10, 0xaaaa);
        rig.sysbus.write_16(EWRAM_ADDR + 0x0e, 0xbbbb);
        rig.sysbus.write_16(EWRAM_ADDR + 0x0c, 0xcccc);

        rig.setup_channel(
            0,
            EWRAM_ADDR + 0x10,
            EWRAM_ADDR + 0x200,
            3,
            CTL_ENABLE | SRC_DECREMENT | DST_FIXED,
        );
        rig.run(3);

        // the fixed destination ends up holding the last (lowest) halfword
        assert_eq!(rig.sysbus.read_16(EWRAM_ADDR + 0x200), 0xcccc);
        assert_eq!(rig.sysbus.read_16(EWRAM_ADDR + 0x202), 0);
    }

    #[test]
    fn test_zero_word_count_transfers_a_full_unit() {
        let mut rig = TestRig::new();

        // channels 0-2 wrap a zero count to 0x4000 transfers
        rig.sysbus.write_16(EWRAM_ADDR + 0x7ffe, 0x1234);
        rig.setup_channel(0, EWRAM_ADDR, EWRAM_ADDR + 0x1_0000, 0, CTL_ENABLE);
        rig.run(3);
        assert_eq!(rig.sysbus.read_16(EWRAM_ADDR + 0x1_0000 + 0x7ffe), 0x1234);
        // and not one halfword more
        assert_eq!(rig.sysbus.read_16(EWRAM_ADDR + 0x1_0000 + 0x8000), 0);

        // channel 3 wraps to 0x10000 transfers
        rig.sysbus.write_16(EWRAM_ADDR + 0x1_fffe, 0x5678);
        rig.setup_channel(3, EWRAM_ADDR, EWRAM_ADDR + 0x2_0000, 0, CTL_ENABLE);
        rig.run(3);
        assert_eq!(rig.sysbus.read_16(EWRAM_ADDR + 0x2_0000 + 0x1_fffe), 0x5678);
    }

    #[test]
    fn test_repeat_reloads_destination_and_stays_enabled() {
        let mut rig = TestRig::new();
        rig.sysbus.write_32(EWRAM_ADDR, 0x1111_1111);
        rig.sysbus.write_32(EWRAM_ADDR + 4, 0x2222_2222);

        rig.setup_channel(
            1,
            EWRAM_ADDR,
            EWRAM_ADDR + 0x100,
            1,
            CTL_ENABLE | CTL_REPEAT | CTL_32BIT | DST_RELOAD | TIMING_HBLANK_BITS,
        );

        rig.dmac.notify_from_gpu(TIMING_HBLANK);
        rig.run(0);
        assert_eq!(rig.sysbus.read_32(EWRAM_ADDR + 0x100), 0x1111_1111);
        assert!(rig.dmac.channels[1].ctrl.is_enabled());
        assert!(rig.dmac.channels[1].is_running());

        // the destination reloads while the source keeps walking
        rig.dmac.notify_from_gpu(TIMING_HBLANK);
        rig.run(0);
        assert_eq!(rig.sysbus.read_32(EWRAM_ADDR + 0x100), 0x2222_2222);
    }
}
