/// Measure 60 frames worth of dispatcher sweeps with the timer bank and
/// direct-sound FIFOs running hot.
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use rustagb_core::iodev::consts::*;
use rustagb_core::prelude::*;
use rustagb_core::sysbus::consts::IOMEM_ADDR;
use rustagb_core::video::CYCLES_FULL_REFRESH;

fn make_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000];
    rom[0xa0..0xac].copy_from_slice(b"BENCHROM    ");
    rom[0xac..0xb0].copy_from_slice(b"ZZZE");
    rom[0xb0..0xb2].copy_from_slice(b"01");
    rom[0xb2] = 0x96;
    let checksum = rom[0xa0..=0xbc]
        .iter()
        .cloned()
        .fold(0u8, u8::wrapping_sub)
        .wrapping_sub(0x19);
    rom[0xbd] = checksum;
    rom
}

fn create_gba() -> GameBoyAdvance {
    let gpak = GamepakBuilder::new()
        .buffer(&make_rom())
        .with_sram()
        .without_backup_to_file()
        .build()
        .unwrap();

    let mut gba = GameBoyAdvance::new();
    gba.attach_rom(gpak);
    gba.reset();

    // a busy but realistic register setup: all four timers running at
    // mixed prescalers, FIFO A pumped by timer 0
    gba.sysbus.write_16(IOMEM_ADDR + REG_SOUNDCNT_X, 0x80);
    gba.sysbus
        .write_16(IOMEM_ADDR + REG_SOUNDCNT_H, (1 << 8) | (1 << 9));
    gba.sysbus.write_16(IOMEM_ADDR + REG_TM0CNT_L, 0xfc00);
    gba.sysbus.write_16(IOMEM_ADDR + REG_TM0CNT_H, 0x0080);
    gba.sysbus.write_16(IOMEM_ADDR + REG_TM1CNT_L, 0x8000);
    gba.sysbus.write_16(IOMEM_ADDR + REG_TM1CNT_H, 0x0081);
    gba.sysbus.write_16(IOMEM_ADDR + REG_TM2CNT_L, 0x0000);
    gba.sysbus.write_16(IOMEM_ADDR + REG_TM2CNT_H, 0x0082);
    gba.sysbus.write_16(IOMEM_ADDR + REG_TM3CNT_H, 0x0084);

    gba
}

pub fn performance_benchmark(c: &mut Criterion) {
    c.bench_function("run_60_frames", |b| {
        b.iter_batched(
            // setup
            create_gba,
            // bencher
            |mut gba| {
                for _ in 0..60 {
                    black_box(gba.run_cycles(CYCLES_FULL_REFRESH));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = performance_benchmark
}
criterion_main!(benches);
