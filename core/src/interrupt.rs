use std::cell::Cell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::arm7tdmi::Arm7tdmi;
use super::logging::{self, LogLevels};

pub trait InterruptConnect {
    // Connect a SharedInterruptFlags to this interrupt source
    fn connect_irq(&mut self, interrupt_flags: SharedInterruptFlags);
}

#[derive(Serialize, Deserialize, Debug, Primitive, Copy, Clone, PartialEq)]
#[allow(non_camel_case_types)]
pub enum Interrupt {
    LCD_VBlank = 0,
    LCD_HBlank = 1,
    LCD_VCounterMatch = 2,
    Timer0_Overflow = 3,
    Timer1_Overflow = 4,
    Timer2_Overflow = 5,
    Timer3_Overflow = 6,
    SerialCommunication = 7,
    DMA0 = 8,
    DMA1 = 9,
    DMA2 = 10,
    DMA3 = 11,
    Keypad = 12,
    GamePak = 13,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct InterruptController {
    pub interrupt_master_enable: bool,
    pub interrupt_enable: IrqBitmask,
    pub interrupt_flags: SharedInterruptFlags,
}

impl InterruptController {
    pub fn new(interrupt_flags: SharedInterruptFlags) -> InterruptController {
        InterruptController {
            interrupt_flags,
            interrupt_master_enable: false,
            ..Default::default()
        }
    }

    #[inline]
    pub fn irq_pending(&self) -> bool {
        self.interrupt_master_enable
            & ((self.interrupt_flags.get().value() & self.interrupt_enable.0) != 0)
    }

    /// Latch an interrupt into IF, wake the CPU from halt, and assert the
    /// CPU IRQ line when the interrupt is unmasked.
    pub fn raise_irq(&self, cpu: &mut Arm7tdmi, i: Interrupt) {
        signal_irq(&self.interrupt_flags, i);
        cpu.halted = false;
        if self.interrupt_master_enable && (self.interrupt_enable.0 & (1 << i as usize)) != 0 {
            cpu.assert_irq();
        }
    }

    pub fn write_ie(&mut self, cpu: &mut Arm7tdmi, value: u16) {
        if value & (1 << Interrupt::Keypad as usize) != 0 {
            logging::gba_log(
                None,
                LogLevels::STUB,
                format_args!("Keypad interrupts not implemented"),
            );
        }
        if value & (1 << Interrupt::GamePak as usize) != 0 {
            logging::gba_log(
                None,
                LogLevels::STUB,
                format_args!("Gamepak interrupts not implemented"),
            );
        }
        self.interrupt_enable = IrqBitmask(value);
        // A newly unmasked pending interrupt fires right away
        if self.interrupt_master_enable && (value & self.interrupt_flags.get().value()) != 0 {
            cpu.assert_irq();
        }
    }

    pub fn write_ime(&mut self, cpu: &mut Arm7tdmi, value: u16) {
        self.interrupt_master_enable = value & 1 != 0;
        if value != 0
            && (self.interrupt_enable.0 & self.interrupt_flags.get().value()) != 0
        {
            cpu.assert_irq();
        }
    }

    /// IF bits are acknowledged by the game writing 1s to them
    #[inline]
    pub fn clear(&mut self, value: u16) {
        let _if = self.interrupt_flags.get();
        let new_if = _if.0 & !value;
        self.interrupt_flags.set(IrqBitmask(new_if));
    }
}

impl InterruptConnect for InterruptController {
    fn connect_irq(&mut self, interrupt_flags: SharedInterruptFlags) {
        self.interrupt_flags = interrupt_flags;
    }
}

#[inline]
pub fn signal_irq(interrupt_flags: &SharedInterruptFlags, i: Interrupt) {
    let _if = interrupt_flags.get();
    let new_if = _if.0 | 1 << (i as usize);
    interrupt_flags.set(IrqBitmask(new_if));
}

impl IrqBitmask {
    pub fn value(&self) -> u16 {
        self.0
    }
}

bitfield! {
    #[derive(Serialize, Deserialize, Default, Copy, Clone, PartialEq)]
    pub struct IrqBitmask(u16);
    impl Debug;
    u16;
    #[allow(non_snake_case)]
    pub LCD_VBlank, set_LCD_VBlank: 0;
    #[allow(non_snake_case)]
    pub LCD_HBlank, set_LCD_HBlank: 1;
    #[allow(non_snake_case)]
    pub LCD_VCounterMatch, set_LCD_VCounterMatch: 2;
    #[allow(non_snake_case)]
    pub Timer0_Overflow, set_Timer0_Overflow: 3;
    #[allow(non_snake_case)]
    pub Timer1_Overflow, set_Timer1_Overflow: 4;
    #[allow(non_snake_case)]
    pub Timer2_Overflow, set_Timer2_Overflow: 5;
    #[allow(non_snake_case)]
    pub Timer3_Overflow, set_Timer3_Overflow: 6;
    #[allow(non_snake_case)]
    pub SerialCommunication, set_SerialCommunication: 7;
    #[allow(non_snake_case)]
    pub DMA0, set_DMA0: 8;
    #[allow(non_snake_case)]
    pub DMA1, set_DMA1: 9;
    #[allow(non_snake_case)]
    pub DMA2, set_DMA2: 10;
    #[allow(non_snake_case)]
    pub DMA3, set_DMA3: 11;
    #[allow(non_snake_case)]
    pub Keypad, set_Keypad: 12;
    #[allow(non_snake_case)]
    pub GamePak, set_GamePak: 13;
}

pub type SharedInterruptFlags = Rc<Cell<IrqBitmask>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn make_intc() -> (InterruptController, Arm7tdmi) {
        let flags = Rc::new(Cell::new(IrqBitmask(0)));
        (InterruptController::new(flags), Arm7tdmi::new())
    }

    #[test]
    fn test_raise_irq_sets_if_and_wakes_cpu() {
        let (mut intc, mut cpu) = make_intc();
        cpu.halted = true;

        intc.raise_irq(&mut cpu, Interrupt::Timer0_Overflow);
        assert!(intc.interrupt_flags.get().Timer0_Overflow());
        assert!(!cpu.halted);
        // masked, so the line must stay low
        assert!(!cpu.irq_line);

        intc.interrupt_master_enable = true;
        intc.interrupt_enable = IrqBitmask(1 << Interrupt::LCD_VBlank as usize);
        intc.raise_irq(&mut cpu, Interrupt::LCD_VBlank);
        assert!(cpu.irq_line);
    }

    #[test]
    fn test_newly_enabled_pending_irq_fires() {
        let (mut intc, mut cpu) = make_intc();
        signal_irq(&intc.interrupt_flags, Interrupt::SerialCommunication);

        intc.write_ime(&mut cpu, 1);
        assert!(!cpu.irq_line);

        intc.write_ie(&mut cpu, 1 << Interrupt::SerialCommunication as usize);
        assert!(cpu.irq_line);
    }

    #[test]
    fn test_if_acknowledge() {
        let (mut intc, _) = make_intc();
        signal_irq(&intc.interrupt_flags, Interrupt::DMA2);
        signal_irq(&intc.interrupt_flags, Interrupt::LCD_HBlank);

        intc.clear(1 << Interrupt::DMA2 as usize);
        assert!(!intc.interrupt_flags.get().DMA2());
        assert!(intc.interrupt_flags.get().LCD_HBlank());
    }
}
