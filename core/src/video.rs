//! Scanline cadence of the LCD controller.
//!
//! Only the time-visible side lives here: VCOUNT progression, the
//! DISPSTAT flags and IRQs, and the HBlank/VBlank DMA triggers. Pixel
//! rendering is a frontend concern and never enters the dispatcher.

use serde::{Deserialize, Serialize};

use super::arm7tdmi::Arm7tdmi;
use super::dma::{DmaController, DmaNotifer, TIMING_HBLANK, TIMING_VBLANK};
use super::interrupt::{Interrupt, InterruptController};

pub const DISPLAY_WIDTH: usize = 240;
pub const DISPLAY_HEIGHT: usize = 160;
pub const VBLANK_LINES: usize = 68;

pub(crate) const CYCLES_HDRAW: i32 = 960 + 46;
pub(crate) const CYCLES_HBLANK: i32 = 272 - 46;
pub const CYCLES_SCANLINE: i32 = 1232;
pub const CYCLES_FULL_REFRESH: i32 = 280_896;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
enum VideoState {
    HDraw,
    HBlank,
    VBlankHDraw,
    VBlankHBlank,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct DisplayStatus {
    pub vblank_flag: bool,
    pub hblank_flag: bool,
    pub vcount_flag: bool,
    pub vblank_irq_enable: bool,
    pub hblank_irq_enable: bool,
    pub vcount_irq_enable: bool,
    pub vcount_setting: usize,
}

impl DisplayStatus {
    #[inline]
    pub fn write(&mut self, value: u16) {
        // bits 0-2 are read-only status flags
        self.vblank_irq_enable = (value >> 3) & 1 != 0;
        self.hblank_irq_enable = (value >> 4) & 1 != 0;
        self.vcount_irq_enable = (value >> 5) & 1 != 0;
        self.vcount_setting = usize::from((value >> 8) & 0xff);
    }

    #[inline]
    pub fn read(&self) -> u16 {
        u16::from(self.vblank_flag)
            | u16::from(self.hblank_flag) << 1
            | u16::from(self.vcount_flag) << 2
            | u16::from(self.vblank_irq_enable) << 3
            | u16::from(self.hblank_irq_enable) << 4
            | u16::from(self.vcount_irq_enable) << 5
            | (self.vcount_setting as u16) << 8
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, SmartDefault)]
pub struct VideoController {
    #[default(VideoState::HDraw)]
    state: VideoState,
    /// Cycles until the next state transition, relative to the CPU cycle epoch
    #[default(CYCLES_HDRAW)]
    next_event: i32,

    pub vcount: usize,
    /// DISPCNT is plain storage here; the renderer interprets it.
    /// Forced-blank out of reset, like the real LCD.
    #[default(0x80)]
    pub dispcnt: u16,
    pub dispstat: DisplayStatus,
}

impl VideoController {
    pub fn new() -> VideoController {
        Default::default()
    }

    #[inline]
    fn update_vcount(&mut self, value: usize, cpu: &mut Arm7tdmi, intc: &InterruptController) {
        self.vcount = value;
        self.dispstat.vcount_flag = self.dispstat.vcount_setting == self.vcount;

        if self.dispstat.vcount_irq_enable && self.dispstat.vcount_flag {
            intc.raise_irq(cpu, Interrupt::LCD_VCounterMatch);
        }
    }

    #[inline]
    fn handle_hdraw_end(
        &mut self,
        cpu: &mut Arm7tdmi,
        intc: &InterruptController,
        dmac: &mut DmaController,
    ) -> (VideoState, i32) {
        self.dispstat.hblank_flag = true;
        if self.dispstat.hblank_irq_enable {
            intc.raise_irq(cpu, Interrupt::LCD_HBlank);
        }
        dmac.notify(TIMING_HBLANK);

        (VideoState::HBlank, CYCLES_HBLANK)
    }

    fn handle_hblank_end(
        &mut self,
        cpu: &mut Arm7tdmi,
        intc: &InterruptController,
        dmac: &mut DmaController,
    ) -> (VideoState, i32) {
        self.update_vcount(self.vcount + 1, cpu, intc);

        if self.vcount < DISPLAY_HEIGHT {
            self.dispstat.hblank_flag = false;
            (VideoState::HDraw, CYCLES_HDRAW)
        } else {
            self.dispstat.vblank_flag = true;
            self.dispstat.hblank_flag = false;
            if self.dispstat.vblank_irq_enable {
                intc.raise_irq(cpu, Interrupt::LCD_VBlank);
            }
            dmac.notify(TIMING_VBLANK);

            (VideoState::VBlankHDraw, CYCLES_HDRAW)
        }
    }

    fn handle_vblank_hdraw_end(
        &mut self,
        cpu: &mut Arm7tdmi,
        intc: &InterruptController,
    ) -> (VideoState, i32) {
        self.dispstat.hblank_flag = true;
        if self.dispstat.hblank_irq_enable {
            intc.raise_irq(cpu, Interrupt::LCD_HBlank);
        }
        (VideoState::VBlankHBlank, CYCLES_HBLANK)
    }

    fn handle_vblank_hblank_end(
        &mut self,
        cpu: &mut Arm7tdmi,
        intc: &InterruptController,
    ) -> (VideoState, i32) {
        if self.vcount < DISPLAY_HEIGHT + VBLANK_LINES - 1 {
            self.update_vcount(self.vcount + 1, cpu, intc);
            self.dispstat.hblank_flag = false;
            (VideoState::VBlankHDraw, CYCLES_HDRAW)
        } else {
            self.update_vcount(0, cpu, intc);
            self.dispstat.vblank_flag = false;
            self.dispstat.hblank_flag = false;
            (VideoState::HDraw, CYCLES_HDRAW)
        }
    }

    /// Advance the scanline clock; one state transition per sweep, the
    /// dispatcher loops until the slack is absorbed. Returns cycles until
    /// the next transition.
    pub fn process_events(
        &mut self,
        cycles: i32,
        cpu: &mut Arm7tdmi,
        intc: &InterruptController,
        dmac: &mut DmaController,
    ) -> i32 {
        self.next_event -= cycles;
        if self.next_event <= 0 {
            let state = self.state;
            let (next_state, duration) = match state {
                VideoState::HDraw => self.handle_hdraw_end(cpu, intc, dmac),
                VideoState::HBlank => self.handle_hblank_end(cpu, intc, dmac),
                VideoState::VBlankHDraw => self.handle_vblank_hdraw_end(cpu, intc),
                VideoState::VBlankHBlank => self.handle_vblank_hblank_end(cpu, intc),
            };
            self.state = next_state;
            self.next_event += duration;
        }
        self.next_event
    }
}
