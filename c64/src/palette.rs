//! C64 color palette.
//!
//! 16 colors as RGBA32 (red in the low byte).

/// Color indices as used by the VIC-II registers.
pub const BLACK: u8 = 0x00;
pub const WHITE: u8 = 0x01;
pub const RED: u8 = 0x02;
pub const CYAN: u8 = 0x03;
pub const PURPLE: u8 = 0x04;
pub const GREEN: u8 = 0x05;
pub const BLUE: u8 = 0x06;
pub const YELLOW: u8 = 0x07;
pub const ORANGE: u8 = 0x08;
pub const BROWN: u8 = 0x09;
pub const LTRED: u8 = 0x0A;
pub const GREY1: u8 = 0x0B;
pub const GREY2: u8 = 0x0C;
pub const LTGREEN: u8 = 0x0D;
pub const LTBLUE: u8 = 0x0E;
pub const GREY3: u8 = 0x0F;

const fn rgba(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | 0xFF00_0000
}

/// The 16 C64 colors, indexed 0-15, in RGBA32 format.
pub const PALETTE: [u32; 16] = [
    rgba(0x10, 0x10, 0x10), // 0: Black
    rgba(0xFF, 0xFF, 0xFF), // 1: White
    rgba(0xE0, 0x40, 0x40), // 2: Red
    rgba(0x60, 0xFF, 0xFF), // 3: Cyan
    rgba(0xE0, 0x60, 0xE0), // 4: Purple
    rgba(0x40, 0xE0, 0x40), // 5: Green
    rgba(0x40, 0x40, 0xE0), // 6: Blue
    rgba(0xFF, 0xFF, 0x40), // 7: Yellow
    rgba(0xE0, 0xA0, 0x40), // 8: Orange
    rgba(0x9C, 0x74, 0x48), // 9: Brown
    rgba(0xFF, 0xA0, 0xA0), // 10: Light Red
    rgba(0x54, 0x54, 0x54), // 11: Dark Grey
    rgba(0x88, 0x88, 0x88), // 12: Medium Grey
    rgba(0xA0, 0xFF, 0xA0), // 13: Light Green
    rgba(0xA0, 0xA0, 0xFF), // 14: Light Blue
    rgba(0xC0, 0xC0, 0xC0), // 15: Light Grey
];
