use super::arm7tdmi::Arm7tdmi;
use super::dma::DmaController;
use super::interrupt::{Interrupt, InterruptController};
use super::iodev::consts::*;
use super::sound::SoundController;

use num::FromPrimitive;
use serde::{Deserialize, Serialize};

const SHIFT_LUT: [usize; 4] = [0, 6, 8, 10];

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Timer {
    pub ctl: TimerCtl,
    /// Visible counter word (TMxCNT_LO), materialized lazily for running
    /// timers and kept live for cascading ones
    pub data: u16,
    pub reload: u16,
    /// Reload value that was latched on the last overflow; the base for
    /// computing the visible counter of a running timer
    old_reload: u16,

    /// Cycles until the next overflow, relative to the CPU cycle epoch.
    /// `i32::MAX` for cascading timers between ticks.
    next_event: i32,
    /// When the last overflow happened; goes negative when an overflow is
    /// handled late, carrying the slack into the next interval
    last_event: i32,
    /// `(0x10000 - reload) << prescalar_shift`, recomputed on control writes
    overflow_interval: i32,
    prescalar_shift: usize,

    irq: Interrupt,
    timer_id: usize,
}

impl Timer {
    pub fn new(timer_id: usize) -> Timer {
        if timer_id > 3 {
            panic!("invalid timer id {}", timer_id);
        }
        Timer {
            timer_id,
            irq: Interrupt::from_usize(timer_id + 3).unwrap(),
            ctl: TimerCtl(0),
            data: 0,
            reload: 0,
            old_reload: 0,
            next_event: i32::MAX,
            last_event: 0,
            overflow_interval: 0x1_0000,
            prescalar_shift: 0,
        }
    }

    #[inline]
    fn recalc_overflow_interval(&mut self) {
        self.overflow_interval = (0x1_0000 - self.reload as i32) << self.prescalar_shift;
    }

    /// Refresh the visible counter word of a running, non-cascading timer
    #[inline]
    fn update_register(&mut self, cpu: &Arm7tdmi) {
        if self.ctl.enabled() && !self.ctl.cascade() {
            let ticks = (cpu.cycles - self.last_event) >> self.prescalar_shift;
            self.data = self.old_reload.wrapping_add(ticks as u16);
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Timers {
    timers: [Timer; 4],
    /// One bit per timer, mirroring the enable bit of its control word
    running_timers: u8,
}

impl std::ops::Index<usize> for Timers {
    type Output = Timer;
    fn index(&self, index: usize) -> &Self::Output {
        &self.timers[index]
    }
}

impl std::ops::IndexMut<usize> for Timers {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.timers[index]
    }
}

impl Timers {
    pub fn new() -> Timers {
        Timers {
            timers: [Timer::new(0), Timer::new(1), Timer::new(2), Timer::new(3)],
            running_timers: 0,
        }
    }

    #[inline]
    pub fn running_timers(&self) -> u8 {
        self.running_timers
    }

    /// Distribute `cycles` to the timer bank and return the cycles until the
    /// next scheduled overflow.
    ///
    /// Overflows latch the reload into the visible counter, raise the
    /// timer's IRQ when requested, pump the audio FIFOs bound to timers 0/1
    /// and tick the downstream cascading timer. A cascade wrap schedules the
    /// downstream timer with `next_event = 0` so the same sweep handles it.
    pub fn process_events(
        &mut self,
        cycles: i32,
        cpu: &mut Arm7tdmi,
        intc: &InterruptController,
        apu: &mut SoundController,
        dmac: &mut DmaController,
    ) -> i32 {
        let mut next_event = i32::MAX;
        for id in 0..4 {
            if !self.timers[id].ctl.enabled() {
                continue;
            }
            {
                let timer = &mut self.timers[id];
                timer.next_event -= cycles;
                timer.last_event -= cycles;
            }
            if self.timers[id].next_event <= 0 {
                let last_event = {
                    let timer = &mut self.timers[id];
                    let last_event = timer.next_event;
                    timer.last_event = last_event;
                    timer.next_event += timer.overflow_interval;
                    timer.data = timer.reload;
                    timer.old_reload = timer.reload;
                    trace!("TMR{} overflow, {} cycles late", timer.timer_id, -last_event);
                    if timer.ctl.irq_enabled() {
                        intc.raise_irq(cpu, timer.irq);
                    }
                    last_event
                };
                if id < 2 {
                    // `last_event` is the sub-cycle slack of this overflow
                    apu.handle_timer_overflow(dmac, id, last_event);
                }
                if id != 3 {
                    let next_timer = &mut self.timers[id + 1];
                    if next_timer.ctl.cascade() {
                        next_timer.data = next_timer.data.wrapping_add(1);
                        if next_timer.data == 0 {
                            next_timer.next_event = 0;
                        }
                    }
                }
                // Timer 0 is always cycle driven; its cascade bit is inert
                if id != 0 && self.timers[id].ctl.cascade() {
                    self.timers[id].next_event = i32::MAX;
                }
            }
            if self.timers[id].next_event < next_event {
                next_event = self.timers[id].next_event;
            }
        }
        next_event
    }

    pub fn write_timer_ctl(&mut self, id: usize, value: u16, cpu: &mut Arm7tdmi) {
        self.timers[id].update_register(cpu);

        let timer = &mut self.timers[id];
        let new_ctl = TimerCtl(value);
        let old_prescalar_shift = timer.prescalar_shift;
        let was_enabled = timer.ctl.enabled();
        let enabled = new_ctl.enabled();
        let cascade = new_ctl.cascade();

        timer.prescalar_shift = SHIFT_LUT[new_ctl.prescalar() as usize];
        timer.ctl = new_ctl;
        timer.recalc_overflow_interval();

        if enabled && !was_enabled {
            self.running_timers |= 1 << id;
            if cascade && id != 0 {
                timer.next_event = i32::MAX;
            } else {
                timer.next_event = cpu.cycles + timer.overflow_interval;
            }
            timer.data = timer.reload;
            timer.old_reload = timer.reload;
            timer.last_event = 0;
        } else if !enabled && was_enabled {
            self.running_timers &= !(1 << id);
            if !cascade {
                // freeze the counter with the prescaler it was running under
                let ticks = (cpu.cycles - timer.last_event) >> old_prescalar_shift;
                timer.data = timer.old_reload.wrapping_add(ticks as u16);
            }
        } else if enabled && timer.prescalar_shift != old_prescalar_shift && !cascade {
            // may land in the past; the next sweep treats that as an
            // immediate overflow
            timer.next_event = timer.last_event + timer.overflow_interval;
        }

        if timer.next_event < cpu.next_event {
            cpu.next_event = timer.next_event;
        }
    }

    #[inline]
    fn read_timer_data(&mut self, id: usize, cpu: &Arm7tdmi) -> u16 {
        self.timers[id].update_register(cpu);
        self.timers[id].data
    }

    pub fn handle_read(&mut self, io_addr: u32, cpu: &Arm7tdmi) -> u16 {
        match io_addr {
            REG_TM0CNT_H => self.timers[0].ctl.0,
            REG_TM1CNT_H => self.timers[1].ctl.0,
            REG_TM2CNT_H => self.timers[2].ctl.0,
            REG_TM3CNT_H => self.timers[3].ctl.0,
            REG_TM0CNT_L => self.read_timer_data(0, cpu),
            REG_TM1CNT_L => self.read_timer_data(1, cpu),
            REG_TM2CNT_L => self.read_timer_data(2, cpu),
            REG_TM3CNT_L => self.read_timer_data(3, cpu),
            _ => unreachable!(),
        }
    }

    pub fn handle_write(&mut self, io_addr: u32, value: u16, cpu: &mut Arm7tdmi) {
        match io_addr {
            REG_TM0CNT_L => self.timers[0].reload = value,
            REG_TM0CNT_H => self.write_timer_ctl(0, value, cpu),

            REG_TM1CNT_L => self.timers[1].reload = value,
            REG_TM1CNT_H => self.write_timer_ctl(1, value, cpu),

            REG_TM2CNT_L => self.timers[2].reload = value,
            REG_TM2CNT_H => self.write_timer_ctl(2, value, cpu),

            REG_TM3CNT_L => self.timers[3].reload = value,
            REG_TM3CNT_H => self.write_timer_ctl(3, value, cpu),
            _ => unreachable!(),
        }
    }
}

bitfield! {
    #[derive(Serialize, Deserialize, Clone, Default)]
    pub struct TimerCtl(u16);
    impl Debug;
    u16;
    prescalar, _ : 1, 0;
    cascade, _ : 2;
    irq_enabled, _ : 6;
    pub enabled, set_enabled : 7;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::IrqBitmask;

    use std::cell::Cell;
    use std::rc::Rc;

    struct TestRig {
        timers: Timers,
        cpu: Arm7tdmi,
        intc: InterruptController,
        apu: SoundController,
        dmac: DmaController,
    }

    impl TestRig {
        fn new() -> TestRig {
            let flags = Rc::new(Cell::new(IrqBitmask(0)));
            TestRig {
                timers: Timers::new(),
                cpu: Arm7tdmi::new(),
                intc: InterruptController::new(flags),
                apu: SoundController::new(),
                dmac: DmaController::new(),
            }
        }

        fn process(&mut self) -> i32 {
            let next_event = self.timers.process_events(
                self.cpu.cycles,
                &mut self.cpu,
                &self.intc,
                &mut self.apu,
                &mut self.dmac,
            );
            self.cpu.cycles = 0;
            next_event
        }
    }

    const CTL_ENABLE: u16 = 0x80;
    const CTL_IRQ: u16 = 0x40;
    const CTL_CASCADE: u16 = 0x04;

    #[test]
    fn test_timer0_overflow_raises_irq() {
        let mut rig = TestRig::new();
        rig.intc.interrupt_master_enable = true;
        rig.intc.interrupt_enable = IrqBitmask(1 << Interrupt::Timer0_Overflow as usize);

        rig.timers.handle_write(REG_TM0CNT_L, 0xffff, &mut rig.cpu);
        rig.timers
            .handle_write(REG_TM0CNT_H, CTL_ENABLE | CTL_IRQ, &mut rig.cpu);

        rig.cpu.cycles = 1;
        let next_event = rig.process();

        assert_eq!(next_event, 1);
        assert!(rig.intc.interrupt_flags.get().Timer0_Overflow());
        assert!(rig.cpu.irq_line);
        assert_eq!(rig.timers[0].data, 0xffff);
    }

    #[test]
    fn test_tmcnt_round_trip() {
        let mut rig = TestRig::new();
        rig.timers.handle_write(REG_TM0CNT_L, 0xfc00, &mut rig.cpu);
        rig.timers
            .handle_write(REG_TM0CNT_H, CTL_ENABLE | CTL_IRQ | 0b01, &mut rig.cpu);

        // enabling latches the reload into the visible counter
        assert_eq!(rig.timers.handle_read(REG_TM0CNT_L, &rig.cpu), 0xfc00);

        rig.cpu.cycles = (0x1_0000 - 0xfc00) << 6;
        rig.process();
        assert!(rig.intc.interrupt_flags.get().Timer0_Overflow());
        assert_eq!(rig.timers.handle_read(REG_TM0CNT_L, &rig.cpu), 0xfc00);
    }

    #[test]
    fn test_visible_counter_of_running_timer() {
        let mut rig = TestRig::new();
        rig.timers.handle_write(REG_TM0CNT_L, 0xf000, &mut rig.cpu);
        rig.timers
            .handle_write(REG_TM0CNT_H, CTL_ENABLE | 0b01, &mut rig.cpu);

        // 0x40 prescaled ticks, well before the overflow
        rig.cpu.cycles = 0x40 << 6;
        assert_eq!(rig.timers.handle_read(REG_TM0CNT_L, &rig.cpu), 0xf040);
    }

    #[test]
    fn test_disable_freezes_counter_with_old_prescale() {
        let mut rig = TestRig::new();
        rig.timers.handle_write(REG_TM0CNT_L, 0x8000, &mut rig.cpu);
        rig.timers
            .handle_write(REG_TM0CNT_H, CTL_ENABLE | 0b10, &mut rig.cpu);

        rig.cpu.cycles = 0x10 << 8;
        // disable while switching the prescaler; the freeze must use the
        // prescaler the timer ran under
        rig.timers.handle_write(REG_TM0CNT_H, 0b11, &mut rig.cpu);
        assert_eq!(rig.timers[0].data, 0x8010);
        assert_eq!(rig.timers.running_timers(), 0);
    }

    #[test]
    fn test_running_mask_mirrors_enable_bits() {
        let mut rig = TestRig::new();
        rig.timers.handle_write(REG_TM0CNT_H, CTL_ENABLE, &mut rig.cpu);
        rig.timers
            .handle_write(REG_TM2CNT_H, CTL_ENABLE | CTL_CASCADE, &mut rig.cpu);
        assert_eq!(rig.timers.running_timers(), 0b0101);

        rig.timers.handle_write(REG_TM0CNT_H, 0, &mut rig.cpu);
        assert_eq!(rig.timers.running_timers(), 0b0100);

        for id in 0..4 {
            assert_eq!(
                rig.timers.running_timers() & (1 << id) != 0,
                rig.timers[id].ctl.enabled()
            );
        }
    }

    #[test]
    fn test_cascade_wraps_and_fires_downstream_timer() {
        let mut rig = TestRig::new();
        rig.intc.interrupt_master_enable = true;
        rig.intc.interrupt_enable = IrqBitmask(1 << Interrupt::Timer1_Overflow as usize);

        rig.timers.handle_write(REG_TM1CNT_L, 0x0000, &mut rig.cpu);
        rig.timers
            .handle_write(REG_TM1CNT_H, CTL_ENABLE | CTL_CASCADE | CTL_IRQ, &mut rig.cpu);
        rig.timers.handle_write(REG_TM0CNT_L, 0xfffe, &mut rig.cpu);
        rig.timers.handle_write(REG_TM0CNT_H, CTL_ENABLE, &mut rig.cpu);

        // first overflow of timer 0 ticks timer 1 to 1
        rig.cpu.cycles = 2;
        rig.process();
        assert_eq!(rig.timers[1].data, 1);
        assert!(!rig.intc.interrupt_flags.get().Timer1_Overflow());

        // 0xffff more overflows wrap timer 1 through 0 exactly once
        for _ in 0..0xffff {
            rig.cpu.cycles = 2;
            rig.process();
        }
        assert_eq!(rig.timers[1].data, 0);
        assert!(rig.intc.interrupt_flags.get().Timer1_Overflow());
        assert!(rig.cpu.irq_line);
    }

    #[test]
    fn test_timer_overflow_pumps_audio_fifo() {
        let mut rig = TestRig::new();
        rig.apu.handle_write(REG_SOUNDCNT_X, 0x80);
        // FIFO A routed right, fed by timer 0
        rig.apu.handle_write(REG_SOUNDCNT_H, 1 << 8);
        rig.apu.handle_write(REG_FIFO_A, 0x2211);

        rig.timers.handle_write(REG_TM0CNT_L, 0xfc00, &mut rig.cpu);
        rig.timers
            .handle_write(REG_TM0CNT_H, CTL_ENABLE | 0b10, &mut rig.cpu);

        rig.cpu.cycles = (0x1_0000 - 0xfc00) << 8;
        rig.process();

        // exactly one byte was consumed from the FIFO
        assert_eq!(rig.apu.dma_sound[0].fifo.count(), 1);
        assert_eq!(rig.apu.dma_sound[0].value, 0x11);
    }

    #[test]
    fn test_prescale_change_may_schedule_in_the_past() {
        let mut rig = TestRig::new();
        rig.timers.handle_write(REG_TM0CNT_L, 0xff00, &mut rig.cpu);
        rig.timers
            .handle_write(REG_TM0CNT_H, CTL_ENABLE | 0b01, &mut rig.cpu);

        // most of the 0x4000 cycle interval elapses, then the prescaler
        // drops to 1:1 and the recomputed overflow lands in the past
        rig.cpu.cycles = 0x3000;
        rig.timers
            .handle_write(REG_TM0CNT_H, CTL_ENABLE, &mut rig.cpu);
        assert!(rig.timers[0].next_event < rig.cpu.cycles);

        // the dispatcher sweeps until the late overflows are absorbed
        let mut next_event = rig.process();
        while next_event <= 0 {
            next_event = rig.process();
        }
        assert!(next_event > 0);
        assert_eq!(rig.timers[0].data, 0xff00);
        assert_eq!(rig.timers[0].old_reload, 0xff00);
    }
}
