/// Struct containing everything
use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use bincode;
use serde::{Deserialize, Serialize};

use rustagb_utils::{Shared, WeakPointer};

use super::arm7tdmi::{Arm7tdmi, InterruptHandlers, PrivilegeMode, REG_SP};
use super::bios::SIZE_BIOS;
use super::cartridge::{Cartridge, GamepakBuilder, Patch};
use super::debugger::{DebuggerHook, EntryReason};
use super::dma::DmaController;
use super::interrupt::*;
use super::iodev::IoDevices;
use super::logging::{self, gba_log, LogHandler, LogLevels};
use super::sio::SioController;
use super::sound::SoundController;
use super::sysbus::SysBus;
use super::timer::Timers;
use super::video::VideoController;
use super::GBAResult;
use super::{InputInterface, RotationSource, RumbleInterface};

/// ARM7TDMI master clock, in Hz
pub const CYCLES_PER_SECOND: i32 = 0x100_0000;

// Canonical stack bases established by the BIOS boot sequence
const SP_BASE_SYSTEM: u32 = 0x03FF_FF00;
const SP_BASE_IRQ: u32 = 0x03FF_FFA0;
const SP_BASE_SUPERVISOR: u32 = 0x03FF_FFE0;

pub struct GameBoyAdvance {
    pub cpu: Box<Arm7tdmi>,
    pub sysbus: Shared<SysBus>,
    pub io_devs: Shared<IoDevices>,
    interrupt_flags: SharedInterruptFlags,

    // Pending request to re-test the IRQ line on the next dispatcher sweep
    spring_irq: bool,

    pub log_level: LogLevels,
    pub(crate) log_handler: Option<LogHandler>,

    bios_checksum: u32,
    active_file: Option<String>,

    pub key_source: Option<Box<dyn InputInterface>>,
    pub rotation_source: Option<Box<dyn RotationSource>>,
    pub rumble: Option<Box<dyn RumbleInterface>>,
    pub debugger: Option<Box<dyn DebuggerHook>>,
}

impl std::fmt::Debug for GameBoyAdvance {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("GameBoyAdvance")
            .field("cpu", &self.cpu)
            .field("sysbus", &format_args!("{}", "Shared<SysBus>"))
            .field("io_devs", &format_args!("{}", "Shared<IoDevices>"))
            .field("interrupt_flags", &self.interrupt_flags)
            .field("spring_irq", &self.spring_irq)
            .field("log_level", &self.log_level)
            .field("log_handler", &format_args!("{}", "Option<LogHandler>"))
            .field("bios_checksum", &self.bios_checksum)
            .field("active_file", &self.active_file)
            .field(
                "key_source",
                &format_args!("{}", "Option<Box<dyn InputInterface>>"),
            )
            .field(
                "rotation_source",
                &format_args!("{}", "Option<Box<dyn RotationSource>>"),
            )
            .field(
                "rumble",
                &format_args!("{}", "Option<Box<dyn RumbleInterface>>"),
            )
            .field(
                "debugger",
                &format_args!("{}", "Option<Box<dyn DebuggerHook>>"),
            )
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct SaveState {
    io_devs: IoDevices,
    cartridge: Cartridge,
    interrupt_flags: u16,
    cpu_state: Arm7tdmi,
    spring_irq: bool,
    ewram: Box<[u8]>,
    iwram: Box<[u8]>,
}

fn irqh_reset(gba: &mut GameBoyAdvance) {
    gba.reset();
}

fn irqh_process_events(gba: &mut GameBoyAdvance) {
    gba.process_events();
}

fn irqh_swi16(gba: &mut GameBoyAdvance, comment: u8) {
    gba_log(
        Some(gba),
        LogLevels::DEBUG,
        format_args!("SWI {:02x} (thumb)", comment),
    );
}

fn irqh_swi32(gba: &mut GameBoyAdvance, comment: u32) {
    gba_log(
        Some(gba),
        LogLevels::DEBUG,
        format_args!("SWI {:02x} (arm)", comment >> 16),
    );
}

fn irqh_hit_illegal(gba: &mut GameBoyAdvance, opcode: u32) {
    gba.cpu_hit_illegal(opcode);
}

fn irqh_read_cpsr(gba: &mut GameBoyAdvance) {
    gba.test_irq();
}

fn irqh_hit_stub(gba: &mut GameBoyAdvance, opcode: u32) {
    gba.cpu_hit_stub(opcode);
}

/// The callback record the machine publishes to its CPU
pub fn interrupt_handlers() -> InterruptHandlers {
    InterruptHandlers {
        reset: irqh_reset,
        process_events: irqh_process_events,
        swi16: irqh_swi16,
        swi32: irqh_swi32,
        hit_illegal: irqh_hit_illegal,
        read_cpsr: irqh_read_cpsr,
        hit_stub: irqh_hit_stub,
    }
}

impl GameBoyAdvance {
    pub fn new() -> GameBoyAdvance {
        let interrupt_flags = Rc::new(Cell::new(IrqBitmask(0)));

        let intc = InterruptController::new(interrupt_flags.clone());
        let video = VideoController::new();
        let sound = Box::new(SoundController::new());
        let timers = Timers::new();
        let dmac = DmaController::new();
        let sio = SioController::new();

        let io_devs = Shared::new(IoDevices::new(intc, video, sound, timers, dmac, sio));
        let sysbus = Shared::new(SysBus::new(
            io_devs.clone(),
            vec![0u8; SIZE_BIOS].into_boxed_slice(),
            Cartridge::none(),
        ));

        let mut cpu = Box::new(Arm7tdmi::new());
        cpu.irqh = interrupt_handlers();

        let mut gba = GameBoyAdvance {
            cpu,
            sysbus,
            io_devs,
            interrupt_flags,
            spring_irq: false,
            log_level: Default::default(),
            log_handler: None,
            bios_checksum: 0,
            active_file: None,
            key_source: None,
            rotation_source: None,
            rumble: None,
            debugger: None,
        };
        gba.connect_cpu();

        gba
    }

    fn connect_cpu(&mut self) {
        let ptr = WeakPointer::new(&mut *self.cpu as *mut Arm7tdmi);
        self.sysbus.connect_cpu(ptr);
    }

    /// The dispatcher: distribute the cycles the CPU consumed to every
    /// subsystem, collect their next-event predictions and leave the
    /// minimum in `cpu.next_event`. Entered by the interpreter whenever
    /// `cpu.cycles >= cpu.next_event`; keeps sweeping until the machine
    /// has caught up.
    pub fn process_events(&mut self) {
        // SAFETY: built on Shared aliasing like the rest of the bus graph;
        // the DMA sweep reaches the register file through the sysbus while
        // we hold it here, which is fine single-threaded.
        let io = &mut (*self.io_devs);
        loop {
            let cycles = self.cpu.cycles;

            if self.spring_irq {
                self.cpu.assert_irq();
                self.spring_irq = false;
            }

            let mut next_event = i32::MAX;
            let mut test_event =
                io.video
                    .process_events(cycles, &mut self.cpu, &io.intc, &mut io.dmac);
            if test_event < next_event {
                next_event = test_event;
            }

            test_event = io.sound.process_events(cycles);
            if test_event < next_event {
                next_event = test_event;
            }

            test_event = io.timers.process_events(
                cycles,
                &mut self.cpu,
                &io.intc,
                &mut io.sound,
                &mut io.dmac,
            );
            if test_event < next_event {
                next_event = test_event;
            }

            test_event = io
                .dmac
                .run_dmas(cycles, &mut self.cpu, &io.intc, &mut self.sysbus);
            if test_event < next_event {
                next_event = test_event;
            }

            test_event = io.sio.process_events(cycles);
            if test_event < next_event {
                next_event = test_event;
            }

            self.cpu.cycles -= cycles;
            self.cpu.next_event = next_event;

            if self.cpu.halted {
                // fast-forward the wall clock; some event down the line
                // will raise an IRQ and clear the latch
                self.cpu.cycles = self.cpu.next_event;
            }

            if self.cpu.cycles < self.cpu.next_event {
                break;
            }
        }
    }

    /// Drive the machine for `cycles` master-clock ticks with no
    /// instructions in between (the CPU idles from event to event).
    pub fn run_cycles(&mut self, cycles: i32) {
        self.cpu.cycles += cycles;
        if self.cpu.cycles >= self.cpu.next_event {
            self.process_events();
        }
    }

    /// Latch `irq` and wake/notify the CPU according to IME/IE.
    pub fn raise_irq(&mut self, irq: Interrupt) {
        self.io_devs.intc.raise_irq(&mut self.cpu, irq);
    }

    /// CPSR-read callback: schedule a re-test of pending interrupts on the
    /// next dispatcher sweep.
    pub fn test_irq(&mut self) {
        if self.io_devs.intc.irq_pending() {
            self.spring_irq = true;
            self.cpu.next_event = 0;
        }
    }

    /// Enter low-power mode until an interrupt is raised.
    pub fn halt(&mut self) {
        self.cpu.next_event = 0;
        self.cpu.halted = true;
    }

    pub fn attach_rom(&mut self, gamepak: Cartridge) {
        info!("Loaded ROM: {}", gamepak.header.game_title);
        self.sysbus.cartridge = gamepak;
    }

    pub fn attach_rom_file(&mut self, path: &Path) -> GBAResult<()> {
        let gamepak = GamepakBuilder::new().file(path).build()?;
        self.active_file = path.to_str().map(String::from);
        self.attach_rom(gamepak);
        Ok(())
    }

    /// Attach a BIOS image. Unknown dumps are accepted with a warning.
    pub fn attach_bios(&mut self, bios_rom: Box<[u8]>) {
        use byteorder::{BigEndian, ByteOrder};
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.input(&bios_rom);
        let digest = hasher.result();
        self.bios_checksum = BigEndian::read_u32(&digest[..4]);

        let expected_hash =
            hex!("fd2547724b505f487e6dcb29ec2ecff3af35a841a77ab2e85fd87350abd36570");
        if digest.as_slice() == &expected_hash[..] {
            info!("Verified bios rom");
        } else {
            gba_log(
                Some(self),
                LogLevels::WARN,
                format_args!("This is not the real bios rom, some games may not be compatible"),
            );
        }

        self.sysbus.set_bios(bios_rom);
        self.connect_cpu();

        // execution may be inside the swapped mapping right now
        if (self.cpu.pc() as usize) < SIZE_BIOS {
            let pc = self.cpu.pc();
            self.cpu.set_active_region(pc);
        }
    }

    pub fn bios_checksum(&self) -> u32 {
        self.bios_checksum
    }

    pub fn active_file(&self) -> Option<&str> {
        self.active_file.as_deref()
    }

    /// Layer a binary patch over the attached ROM; failure leaves the
    /// pristine image active.
    pub fn apply_patch(&mut self, patch: &dyn Patch) {
        self.sysbus.cartridge.apply_patch(patch);
    }

    /// Re-establish the boot-time stack pointers and leave the CPU in
    /// SYSTEM mode.
    pub fn reset(&mut self) {
        self.cpu.set_privilege_mode(PrivilegeMode::Irq);
        self.cpu.gpr[REG_SP] = SP_BASE_IRQ;
        self.cpu.set_privilege_mode(PrivilegeMode::Supervisor);
        self.cpu.gpr[REG_SP] = SP_BASE_SUPERVISOR;
        self.cpu.set_privilege_mode(PrivilegeMode::System);
        self.cpu.gpr[REG_SP] = SP_BASE_SYSTEM;

        self.cpu.cycles = 0;
        self.cpu.next_event = 0;
        self.cpu.halted = false;
    }

    /// Unimplemented-but-known opcode. Fatal unless a debugger takes over.
    pub fn cpu_hit_stub(&mut self, opcode: u32) {
        if let Some(mut dbg) = self.debugger.take() {
            gba_log(
                Some(self),
                LogLevels::STUB,
                format_args!("stub opcode: {:08x}", opcode),
            );
            dbg.enter(EntryReason::IllegalOp);
            self.debugger = Some(dbg);
        } else {
            gba_log(
                Some(self),
                LogLevels::FATAL,
                format_args!("stub opcode: {:08x}", opcode),
            );
        }
    }

    /// Architecturally undefined opcode. Guest bug; emulation continues
    /// unless a debugger wants it.
    pub fn cpu_hit_illegal(&mut self, opcode: u32) {
        gba_log(
            Some(self),
            LogLevels::WARN,
            format_args!("illegal opcode: {:08x}", opcode),
        );
        if let Some(mut dbg) = self.debugger.take() {
            dbg.enter(EntryReason::IllegalOp);
            self.debugger = Some(dbg);
        }
    }

    /// Refresh KEYINPUT from the host key source.
    pub fn poll_keys(&mut self) {
        if let Some(source) = self.key_source.as_mut() {
            self.io_devs.keyinput = source.poll();
        }
    }

    /// Mirror cartridge GPIO state to the host peripherals: push rumble
    /// out, pull a fresh gyro sample in.
    pub fn sync_peripherals(&mut self) {
        let cartridge = &mut self.sysbus.cartridge;
        if let Some(gpio) = cartridge.get_gpio_mut() {
            if let (Some(rumble_out), Some(rumble)) = (gpio.rumble.as_ref(), self.rumble.as_mut())
            {
                rumble.set_rumble(rumble_out.is_active());
            }
            if let (Some(gyro), Some(source)) = (gpio.gyro.as_mut(), self.rotation_source.as_mut())
            {
                gyro.set_sample(source.sample_x());
            }
        }
    }

    pub fn save_state(&self) -> bincode::Result<Vec<u8>> {
        let s = SaveState {
            io_devs: self.io_devs.clone_inner(),
            cartridge: self.sysbus.cartridge.thin_copy(),
            interrupt_flags: self.interrupt_flags.get().value(),
            cpu_state: (*self.cpu).clone(),
            spring_irq: self.spring_irq,
            ewram: Box::from(self.sysbus.get_ewram()),
            iwram: Box::from(self.sysbus.get_iwram()),
        };

        bincode::serialize(&s)
    }

    pub fn restore_state(&mut self, bytes: &[u8]) -> bincode::Result<()> {
        let decoded: Box<SaveState> = bincode::deserialize_from(bytes)?;
        let decoded = *decoded;

        self.interrupt_flags = Rc::new(Cell::new(IrqBitmask(decoded.interrupt_flags)));
        *self.cpu = decoded.cpu_state;
        self.cpu.irqh = interrupt_handlers();
        self.spring_irq = decoded.spring_irq;

        self.io_devs = Shared::new(decoded.io_devs);
        self.io_devs.intc.connect_irq(self.interrupt_flags.clone());

        // Redistribute shared pointers
        self.sysbus.io = self.io_devs.clone();
        self.sysbus.set_ewram(decoded.ewram);
        self.sysbus.set_iwram(decoded.iwram);
        self.sysbus.cartridge.update_from(decoded.cartridge);
        self.connect_cpu();

        Ok(())
    }
}

impl Default for GameBoyAdvance {
    fn default() -> GameBoyAdvance {
        GameBoyAdvance::new()
    }
}

impl Drop for GameBoyAdvance {
    fn drop(&mut self) {
        logging::clear_if_current(self as *const GameBoyAdvance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cartridge::tests::make_cartridge;
    use crate::iodev::consts::*;
    use crate::sysbus::consts::IOMEM_ADDR;
    use crate::video::{CYCLES_FULL_REFRESH, DISPLAY_HEIGHT};
    use crate::Bus;

    use std::cell::Cell;
    use std::rc::Rc;

    fn make_mock_gba() -> GameBoyAdvance {
        let mut gba = GameBoyAdvance::new();
        gba.attach_rom(make_cartridge(b"ZZZE"));
        gba.reset();
        gba
    }

    #[test]
    fn test_timer0_overflow_through_the_bus() {
        let mut gba = make_mock_gba();
        gba.sysbus.write_16(IOMEM_ADDR + REG_IME, 1);
        gba.sysbus.write_16(
            IOMEM_ADDR + REG_IE,
            1 << Interrupt::Timer0_Overflow as usize,
        );
        gba.sysbus.write_16(IOMEM_ADDR + REG_TM0CNT_L, 0xffff);
        gba.sysbus.write_16(IOMEM_ADDR + REG_TM0CNT_H, 0x00c0);

        gba.cpu.cycles = 1;
        gba.process_events();

        let iflags = gba.sysbus.read_16(IOMEM_ADDR + REG_IF);
        assert_ne!(iflags & (1 << Interrupt::Timer0_Overflow as usize), 0);
        assert!(gba.cpu.irq_line);
        assert_eq!(gba.sysbus.read_16(IOMEM_ADDR + REG_TM0CNT_L), 0xffff);
        assert_eq!(gba.cpu.next_event, 1);
        assert!(gba.cpu.cycles < gba.cpu.next_event);
    }

    #[test]
    fn test_halt_fast_forwards_until_vblank_irq() {
        let mut gba = make_mock_gba();
        gba.sysbus.write_16(IOMEM_ADDR + REG_IME, 1);
        gba.sysbus
            .write_16(IOMEM_ADDR + REG_IE, 1 << Interrupt::LCD_VBlank as usize);
        gba.sysbus.write_16(IOMEM_ADDR + REG_DISPSTAT, 1 << 3);

        gba.sysbus.write_8(IOMEM_ADDR + REG_HALTCNT, 0);
        assert!(gba.cpu.halted);
        assert_eq!(gba.cpu.next_event, 0);

        gba.process_events();

        assert!(!gba.cpu.halted);
        assert!(gba.cpu.irq_line);
        assert!(gba.io_devs.video.dispstat.vblank_flag);
        assert_eq!(gba.io_devs.video.vcount, DISPLAY_HEIGHT);
    }

    #[test]
    fn test_dispatcher_catches_up_after_a_large_jump() {
        let mut gba = make_mock_gba();
        gba.cpu.cycles = CYCLES_FULL_REFRESH + 123;
        gba.process_events();
        assert!(gba.cpu.cycles < gba.cpu.next_event);
        assert!(gba.cpu.next_event > 0);
    }

    #[test]
    fn test_cpsr_read_springs_pending_irq() {
        let mut gba = make_mock_gba();
        gba.sysbus.write_16(
            IOMEM_ADDR + REG_IE,
            1 << Interrupt::Timer0_Overflow as usize,
        );
        // IME off: the raise only latches IF
        gba.raise_irq(Interrupt::Timer0_Overflow);
        assert!(!gba.cpu.irq_line);

        gba.io_devs.intc.interrupt_master_enable = true;
        let read_cpsr = gba.cpu.irqh.read_cpsr;
        read_cpsr(&mut gba);
        assert_eq!(gba.cpu.next_event, 0);

        gba.process_events();
        assert!(gba.cpu.irq_line);
    }

    #[test]
    fn test_raise_irq_wakes_halted_cpu() {
        let mut gba = make_mock_gba();
        gba.cpu.halted = true;
        gba.raise_irq(Interrupt::Keypad);
        assert!(!gba.cpu.halted);
        // masked: the line stays low but IF is latched
        assert!(!gba.cpu.irq_line);
        let iflags = gba.sysbus.read_16(IOMEM_ADDR + REG_IF);
        assert_ne!(iflags & (1 << Interrupt::Keypad as usize), 0);
    }

    #[test]
    fn test_reset_banks_stack_pointers() {
        let mut gba = make_mock_gba();
        assert_eq!(gba.cpu.gpr[REG_SP], SP_BASE_SYSTEM);
        gba.cpu.set_privilege_mode(PrivilegeMode::Irq);
        assert_eq!(gba.cpu.gpr[REG_SP], SP_BASE_IRQ);
        gba.cpu.set_privilege_mode(PrivilegeMode::Supervisor);
        assert_eq!(gba.cpu.gpr[REG_SP], SP_BASE_SUPERVISOR);
    }

    #[test]
    fn test_override_reaches_attached_machine() {
        let mut gba = GameBoyAdvance::new();
        gba.attach_rom(make_cartridge(b"BPEE"));
        let cartridge = &gba.sysbus.cartridge;
        assert_eq!(
            cartridge.backup.backup_type(),
            Some(crate::cartridge::BackupType::Flash1M)
        );
        assert!(cartridge.get_gpio().as_ref().unwrap().rtc.is_some());
    }

    struct SpyDebugger(Rc<Cell<Option<EntryReason>>>);

    impl DebuggerHook for SpyDebugger {
        fn enter(&mut self, reason: EntryReason) {
            self.0.set(Some(reason));
        }
    }

    #[test]
    fn test_stub_opcode_enters_attached_debugger() {
        let mut gba = make_mock_gba();
        let entered = Rc::new(Cell::new(None));
        gba.debugger = Some(Box::new(SpyDebugger(entered.clone())));

        let hit_stub = gba.cpu.irqh.hit_stub;
        hit_stub(&mut gba, 0xe7f0_00f0);
        assert_eq!(entered.get(), Some(EntryReason::IllegalOp));

        entered.set(None);
        gba.cpu_hit_illegal(0xffff_ffff);
        assert_eq!(entered.get(), Some(EntryReason::IllegalOp));
    }

    #[test]
    fn test_save_restore_round_trip() {
        let mut gba = make_mock_gba();
        gba.sysbus.write_16(IOMEM_ADDR + REG_TM2CNT_L, 0x1234);
        gba.sysbus.write_16(IOMEM_ADDR + REG_TM2CNT_H, 0x0080);
        gba.run_cycles(10_000);

        let state = gba.save_state().unwrap();
        let vcount = gba.io_devs.video.vcount;

        gba.run_cycles(100_000);
        assert_ne!(gba.io_devs.video.vcount, vcount);

        gba.restore_state(&state).unwrap();
        assert_eq!(gba.io_devs.video.vcount, vcount);
        assert!(gba.io_devs.timers[2].ctl.enabled());
        assert_eq!(gba.io_devs.timers[2].reload, 0x1234);

        // the restored machine keeps running
        gba.run_cycles(10_000);
    }

    #[test]
    fn test_fifo_dma_refills_on_timer_overflow() {
        let mut gba = make_mock_gba();

        // stage 32 bytes of sample data in EWRAM
        for i in 0..8u32 {
            gba.sysbus.write_32(0x0200_0000 + i * 4, 0x0101_0101);
        }

        gba.sysbus.write_16(IOMEM_ADDR + REG_SOUNDCNT_X, 0x80);
        // FIFO A on both sides, fed by timer 0
        gba.sysbus
            .write_16(IOMEM_ADDR + REG_SOUNDCNT_H, (1 << 8) | (1 << 9));

        // DMA1: EWRAM -> FIFO_A, special timing, repeat, 32-bit
        gba.sysbus.write_32(IOMEM_ADDR + 0x0bc, 0x0200_0000); // DMA1SAD
        gba.sysbus.write_32(IOMEM_ADDR + 0x0c0, 0x0400_00a0); // DMA1DAD
        gba.sysbus.write_16(IOMEM_ADDR + 0x0c6, 0xb600);

        gba.sysbus.write_16(IOMEM_ADDR + REG_TM0CNT_L, 0xff00);
        gba.sysbus.write_16(IOMEM_ADDR + REG_TM0CNT_H, 0x0080);

        // first overflow drains the empty fifo and poke-starts the DMA,
        // the second consumes the freshly pumped data
        gba.run_cycles(0x100 + 1);
        assert!(gba.io_devs.sound.dma_sound[0].fifo.count() >= 16);
        gba.run_cycles(0x100);

        assert_eq!(gba.io_devs.sound.dma_sound[0].value, 0x01);
        assert!(gba.io_devs.sound.dma_sound[0].fifo.count() > 0);
    }
}
