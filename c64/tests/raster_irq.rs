//! Raster interrupt timing: a program that arms a raster IRQ on line 100
//! must see its handler run exactly once per frame, entered on line 100.

use c64::{C64Config, C64Model, C64};

/// Build a Kernal image with the test program at $E000 and the IRQ
/// handler at $E100.
fn make_kernal() -> Vec<u8> {
    let mut kernal = vec![0xEA; 8192];

    // $E000: arm the raster IRQ for line 100, then spin.
    let program: &[u8] = &[
        0xA9, 0x7F, // LDA #$7F
        0x8D, 0x0D, 0xDC, // STA $DC0D   (mask all CIA 1 interrupts)
        0xA9, 0x01, // LDA #$01
        0x8D, 0x1A, 0xD0, // STA $D01A   (enable raster IRQ)
        0xA9, 0x64, // LDA #$64
        0x8D, 0x12, 0xD0, // STA $D012   (compare line 100)
        0xAD, 0x11, 0xD0, // LDA $D011
        0x29, 0x7F, // AND #$7F    (compare bit 8 = 0)
        0x8D, 0x11, 0xD0, // STA $D011
        0x58, // CLI
        0x4C, 0x18, 0xE0, // loop: JMP loop
    ];
    kernal[..program.len()].copy_from_slice(program);

    // $E100: record the raster line, bump the counter, acknowledge.
    let handler: &[u8] = &[
        0x48, // PHA
        0xAD, 0x12, 0xD0, // LDA $D012
        0x8D, 0x40, 0x03, // STA $0340
        0xEE, 0x41, 0x03, // INC $0341
        0xA9, 0xFF, // LDA #$FF
        0x8D, 0x19, 0xD0, // STA $D019   (acknowledge)
        0x68, // PLA
        0x40, // RTI
    ];
    kernal[0x100..0x100 + handler.len()].copy_from_slice(handler);

    // Vectors: NMI -> handler (unused), reset -> $E000, IRQ -> $E100.
    kernal[0x1FFA] = 0x00;
    kernal[0x1FFB] = 0xE1;
    kernal[0x1FFC] = 0x00;
    kernal[0x1FFD] = 0xE0;
    kernal[0x1FFE] = 0x00;
    kernal[0x1FFF] = 0xE1;
    kernal
}

#[test]
fn raster_irq_fires_once_per_frame_on_line_100() {
    let mut c64 = C64::new(&C64Config {
        model: C64Model::C64Pal,
        kernal_rom: make_kernal(),
        basic_rom: vec![0; 8192],
        char_rom: vec![0; 4096],
    });

    for _ in 0..50 {
        c64.run_frame();
    }

    // One interrupt per frame, entered with the beam on line 100.
    assert_eq!(c64.bus.memory.ram_read(0x0341), 50);
    assert_eq!(c64.bus.memory.ram_read(0x0340), 0x64);
}
