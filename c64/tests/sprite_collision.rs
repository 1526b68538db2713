//! Sprite-sprite collision: two overlapping sprites set $D01E once; the
//! register clears on read.

use c64::{C64Config, C64Model, C64};
use machine_core::Bus;

fn make_c64() -> C64 {
    let mut kernal = vec![0xEA; 8192]; // NOP sled
    kernal[0x0000] = 0x4C; // JMP $E000
    kernal[0x0001] = 0x00;
    kernal[0x0002] = 0xE0;
    kernal[0x1FFC] = 0x00;
    kernal[0x1FFD] = 0xE0;

    C64::new(&C64Config {
        model: C64Model::C64Pal,
        kernal_rom: kernal,
        basic_rom: vec![0; 8192],
        char_rom: vec![0; 4096],
    })
}

#[test]
fn overlapping_sprites_collide_and_register_clears_on_read() {
    let mut c64 = make_c64();

    // Sprite pointers at screen base + $3F8: both sprites use the shape
    // at $80 * 64 = $2000, a solid block.
    c64.bus.memory.ram_write(0x07F8, 0x80);
    c64.bus.memory.ram_write(0x07F9, 0x80);
    for i in 0..63 {
        c64.bus.memory.ram_write(0x2000 + i, 0xFF);
    }

    // Sprites 0 and 1 enabled at the same position inside the display.
    c64.bus.write(0xD011, 0x1B);
    c64.bus.write(0xD015, 0x03);
    c64.bus.write(0xD000, 100);
    c64.bus.write(0xD001, 120);
    c64.bus.write(0xD002, 100);
    c64.bus.write(0xD003, 120);
    c64.bus.write(0xD027, 0x01);
    c64.bus.write(0xD028, 0x02);

    for _ in 0..3 {
        c64.run_frame();
    }

    // First read reports both sprites, the second reads zero.
    assert_eq!(c64.bus.read(0xD01E), 0x03);
    assert_eq!(c64.bus.read(0xD01E), 0x00);
}

#[test]
fn separated_sprites_do_not_collide() {
    let mut c64 = make_c64();

    c64.bus.memory.ram_write(0x07F8, 0x80);
    c64.bus.memory.ram_write(0x07F9, 0x80);
    for i in 0..63 {
        c64.bus.memory.ram_write(0x2000 + i, 0xFF);
    }

    c64.bus.write(0xD011, 0x1B);
    c64.bus.write(0xD015, 0x03);
    c64.bus.write(0xD000, 60);
    c64.bus.write(0xD001, 120);
    c64.bus.write(0xD002, 160);
    c64.bus.write(0xD003, 120);

    for _ in 0..3 {
        c64.run_frame();
    }

    assert_eq!(c64.bus.read(0xD01E), 0x00);
}
