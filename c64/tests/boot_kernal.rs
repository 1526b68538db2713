//! C64 Kernal boot test: the machine boots to the BASIC READY. prompt
//! with the stock colors. Requires real ROM images and is ignored by
//! default.

use c64::{C64Config, C64Model, C64};
use machine_core::Bus;

/// Screen codes for "READY."
const READY_SCREEN_CODES: [u8; 6] = [18, 5, 1, 4, 25, 46];

fn find_ready_in_screen(c64: &C64) -> bool {
    // Screen memory at $0400-$07E7.
    (0x0400..0x07E8 - READY_SCREEN_CODES.len() as u16).any(|base| {
        READY_SCREEN_CODES
            .iter()
            .enumerate()
            .all(|(i, &code)| c64.bus.memory.ram_read(base + i as u16) == code)
    })
}

#[test]
#[ignore] // Requires real C64 ROMs at roms/
fn boots_to_ready_prompt() {
    let kernal = std::fs::read("../roms/kernal.rom").expect("roms/kernal.rom not found");
    let basic = std::fs::read("../roms/basic.rom").expect("roms/basic.rom not found");
    let chargen = std::fs::read("../roms/chargen.rom").expect("roms/chargen.rom not found");

    let mut c64 = C64::new(&C64Config {
        model: C64Model::C64Pal,
        kernal_rom: kernal,
        basic_rom: basic,
        char_rom: chargen,
    });

    // 2,500,000 cycles is about 127 PAL frames.
    while c64.master_clock() < 2_500_000 {
        c64.run_frame();
    }

    assert!(find_ready_in_screen(&c64), "READY. not found in screen RAM");
    assert_eq!(c64.bus.peek(0xD020) & 0x0F, 0x0E, "border not light blue");
    assert_eq!(c64.bus.peek(0xD021) & 0x0F, 0x06, "background not blue");
}
