//! Register and timing state of the ARM7TDMI core.
//!
//! The instruction pipeline itself lives in the interpreter that drives this
//! state; the machine schedules against `cycles`/`next_event` and publishes
//! its callbacks through the [`InterruptHandlers`] record filled in at
//! construction time.

use serde::{Deserialize, Serialize};

use super::gba::GameBoyAdvance;
use super::sysbus::consts::*;

/// Number of general purpose registers
pub const NUM_GPRS: usize = 16;

pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PC: usize = 15;

#[derive(Serialize, Deserialize, Debug, Primitive, Copy, Clone, PartialEq)]
pub enum PrivilegeMode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    Supervisor = 0x13,
    Abort = 0x17,
    Undefined = 0x1b,
    System = 0x1f,
}

impl PrivilegeMode {
    #[inline]
    fn bank_index(self) -> usize {
        use PrivilegeMode::*;
        match self {
            User | System => 0,
            Fiq => 1,
            Irq => 2,
            Supervisor => 3,
            Abort => 4,
            Undefined => 5,
        }
    }
}

/// Memory page the PC is currently fetching from, cached so the interpreter
/// doesn't redo the page dispatch on every fetch. Re-resolved by the machine
/// whenever the backing mapping changes under the PC (e.g. a late BIOS attach).
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub enum ActiveRegion {
    Bios,
    Ewram,
    Iwram,
    GamePak,
    Unmapped,
}

impl ActiveRegion {
    fn from_addr(addr: u32) -> ActiveRegion {
        match addr & 0xff00_0000 {
            BIOS_ADDR => ActiveRegion::Bios,
            EWRAM_ADDR => ActiveRegion::Ewram,
            IWRAM_ADDR => ActiveRegion::Iwram,
            GAMEPAK_WS0_LO..=GAMEPAK_WS2_HI => ActiveRegion::GamePak,
            _ => ActiveRegion::Unmapped,
        }
    }
}

/// The capability record the machine hands to the interpreter.
///
/// Explicit function values rather than a trait object: the interpreter
/// resolves its `master` back-reference on every callback and passes it in,
/// so no ownership cycle exists between the machine and the CPU.
#[derive(Copy, Clone)]
pub struct InterruptHandlers {
    pub reset: fn(&mut GameBoyAdvance),
    pub process_events: fn(&mut GameBoyAdvance),
    pub swi16: fn(&mut GameBoyAdvance, u8),
    pub swi32: fn(&mut GameBoyAdvance, u32),
    pub hit_illegal: fn(&mut GameBoyAdvance, u32),
    pub read_cpsr: fn(&mut GameBoyAdvance),
    pub hit_stub: fn(&mut GameBoyAdvance, u32),
}

impl std::fmt::Debug for InterruptHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InterruptHandlers { .. }")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Arm7tdmi {
    /// Cycles consumed since the last `process_events` callback
    pub cycles: i32,
    /// Cycle budget before the interpreter must call back into the machine
    pub next_event: i32,
    pub halted: bool,
    /// IRQ line latch consumed by the interpreter on its next issue slot
    pub irq_line: bool,

    pub gpr: [u32; NUM_GPRS],
    mode: PrivilegeMode,
    gpr_banked_r13: [u32; 6],

    active_region: ActiveRegion,

    #[serde(skip)]
    #[serde(default = "super::gba::interrupt_handlers")]
    pub irqh: InterruptHandlers,
}

impl Arm7tdmi {
    pub fn new() -> Arm7tdmi {
        Arm7tdmi {
            cycles: 0,
            next_event: 0,
            halted: false,
            irq_line: false,
            gpr: [0; NUM_GPRS],
            mode: PrivilegeMode::System,
            gpr_banked_r13: [0; 6],
            active_region: ActiveRegion::Bios,
            irqh: super::gba::interrupt_handlers(),
        }
    }

    #[inline]
    pub fn pc(&self) -> u32 {
        self.gpr[REG_PC]
    }

    #[inline]
    pub fn mode(&self) -> PrivilegeMode {
        self.mode
    }

    /// Assert the CPU IRQ line. The interpreter samples and clears the latch
    /// when it takes the exception.
    #[inline]
    pub fn assert_irq(&mut self) {
        self.irq_line = true;
    }

    /// Switch privilege mode, banking r13 in and out.
    pub fn set_privilege_mode(&mut self, mode: PrivilegeMode) {
        if mode == self.mode {
            return;
        }
        self.gpr_banked_r13[self.mode.bank_index()] = self.gpr[REG_SP];
        self.gpr[REG_SP] = self.gpr_banked_r13[mode.bank_index()];
        self.mode = mode;
    }

    #[inline]
    pub fn active_region(&self) -> ActiveRegion {
        self.active_region
    }

    /// Re-resolve the cached fetch region for `addr`.
    pub fn set_active_region(&mut self, addr: u32) {
        self.active_region = ActiveRegion::from_addr(addr);
    }
}

impl Default for Arm7tdmi {
    fn default() -> Arm7tdmi {
        Arm7tdmi::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_r13_banking() {
        let mut cpu = Arm7tdmi::new();
        cpu.gpr[REG_SP] = 0x0300_7f00;

        cpu.set_privilege_mode(PrivilegeMode::Irq);
        cpu.gpr[REG_SP] = 0x0300_7fa0;

        cpu.set_privilege_mode(PrivilegeMode::Supervisor);
        cpu.gpr[REG_SP] = 0x0300_7fe0;

        cpu.set_privilege_mode(PrivilegeMode::System);
        assert_eq!(cpu.gpr[REG_SP], 0x0300_7f00);
        cpu.set_privilege_mode(PrivilegeMode::Irq);
        assert_eq!(cpu.gpr[REG_SP], 0x0300_7fa0);
    }

    #[test]
    fn test_active_region_resolution() {
        let mut cpu = Arm7tdmi::new();
        cpu.set_active_region(0x0800_01c0);
        assert_eq!(cpu.active_region(), ActiveRegion::GamePak);
        cpu.set_active_region(0x0000_0158);
        assert_eq!(cpu.active_region(), ActiveRegion::Bios);
    }
}
