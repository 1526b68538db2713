//! VIC-II pixel engine.
//!
//! Owns the pixel buffers and the shift registers, and synthesizes 8
//! pixels per raster cycle. Because the VIC register state at the moment
//! a pixel reaches the screen differs from the state when its data was
//! fetched, drawing consumes a [`PixelEnginePipe`] snapshot latched one
//! cycle earlier, plus separately latched color pipes so that color
//! register writes only affect the following pixel chunk.
//!
//! The screen is double-buffered: drawing goes to the back buffer, the
//! front buffer stays stable for the host render thread, and the two are
//! swapped at end of frame.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use machine_core::{SnapshotError, SnapshotReader, SnapshotWriter};

use crate::palette::PALETTE;

/// Buffer width in pixels (the wider NTSC line, shared by both models).
pub const SCREEN_WIDTH: usize = 428;

/// Buffer height in lines (the taller PAL frame, shared by both models).
pub const SCREEN_HEIGHT: usize = 284;

// Drawing layer depths for the z buffer. Lower is closer to the viewer.
const BORDER_LAYER_DEPTH: u8 = 0x10;
const SPRITE_LAYER_FG_DEPTH: u8 = 0x20;
const FOREGROUND_LAYER_DEPTH: u8 = 0x30;
const SPRITE_LAYER_BG_DEPTH: u8 = 0x40;
const BACKGROUND_LAYER_DEPTH: u8 = 0x50;

/// Pixel source bit marking canvas foreground (bits 0-7 mark sprites).
const SOURCE_FOREGROUND: u16 = 0x100;

/// Display mode, encoded as ECM/BMM (control register 1 bits 6-5) plus
/// MCM (control register 2 bit 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    StandardText = 0x00,
    MulticolorText = 0x10,
    StandardBitmap = 0x20,
    MulticolorBitmap = 0x30,
    ExtendedBackgroundColor = 0x40,
    InvalidText = 0x50,
    InvalidStandardBitmap = 0x60,
    InvalidMulticolorBitmap = 0x70,
}

impl DisplayMode {
    #[must_use]
    pub fn from_ctrl(ctrl1: u8, ctrl2: u8) -> Self {
        match (ctrl1 & 0x60) | (ctrl2 & 0x10) {
            0x00 => Self::StandardText,
            0x10 => Self::MulticolorText,
            0x20 => Self::StandardBitmap,
            0x30 => Self::MulticolorBitmap,
            0x40 => Self::ExtendedBackgroundColor,
            0x50 => Self::InvalidText,
            0x60 => Self::InvalidStandardBitmap,
            _ => Self::InvalidMulticolorBitmap,
        }
    }
}

/// VIC state latched one cycle before drawing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelEnginePipe {
    pub y_counter: u16,
    pub x_counter: i16,
    pub main_frame_ff: bool,
    pub vertical_frame_ff: bool,
    pub g_data: u8,
    pub g_character: u8,
    pub g_color: u8,
    pub ctrl1: u8,
    pub ctrl2: u8,
    pub sprite_x: [u16; 8],
    pub sprite_x_expand: u8,
    pub sprite_on: u8,
    pub sprite_multicolor: u8,
    pub sprite_priority: u8,
    /// Sprites whose shift register is being loaded this cycle.
    pub sprite_dma_cycle: u8,
}

/// Border color, latched separately from the main pipe.
#[derive(Debug, Clone, Copy, Default)]
pub struct BorderColorPipe {
    pub border_color: u8,
}

/// Canvas background colors ($D021-$D024).
#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasColorPipe {
    pub background_color: [u8; 4],
}

/// Sprite colors ($D025-$D02E).
#[derive(Debug, Clone, Copy, Default)]
pub struct SpriteColorPipe {
    pub sprite_color: [u8; 8],
    pub extra_color1: u8,
    pub extra_color2: u8,
}

/// Canvas shift register.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftRegister {
    /// Shift register data, loaded from the latest g-access.
    pub data: u8,
    /// Set while the canvas columns are active (cycles 18-57).
    pub can_load: bool,
    /// Multicolor synchronization flipflop.
    pub mc_flop: bool,
    /// Character byte latched together with the data.
    pub latched_character: u8,
    /// Color byte latched together with the data.
    pub latched_color: u8,
    /// Color bits sampled every second pixel in multicolor modes.
    pub colorbits: u8,
}

/// Per-sprite shift register.
#[derive(Debug, Clone, Copy)]
pub struct SpriteShiftRegister {
    /// 24-bit shift register data.
    pub data: u32,
    /// Chunk latches filled by the three s-accesses.
    pub chunk1: u8,
    pub chunk2: u8,
    pub chunk3: u8,
    /// Bits left to shift out; -1 while waiting for the X trigger.
    pub remaining_bits: i32,
    /// Multicolor synchronization flipflop.
    pub mc_flop: bool,
    /// X expansion flipflop.
    pub exp_flop: bool,
    /// Color bits sampled at pair boundaries.
    pub colorbits: u8,
}

impl Default for SpriteShiftRegister {
    fn default() -> Self {
        Self {
            data: 0,
            chunk1: 0,
            chunk2: 0,
            chunk3: 0,
            remaining_bits: -1,
            mc_flop: true,
            exp_flop: true,
            colorbits: 0,
        }
    }
}

/// The pixel synthesis unit of the VIC-II.
pub struct PixelEngine {
    /// Double-buffered RGBA frames.
    buffers: [Box<[u32]>; 2],
    /// Index of the buffer currently drawn into.
    back: usize,

    /// Offset of the current raster line in the back buffer, or `None`
    /// during VBLANK.
    line_offset: Option<usize>,

    /// Depth of the nearest opaque pixel per X position.
    z_buffer: [u8; SCREEN_WIDTH],
    /// Source mask per X position (sprites in bits 0-7, foreground in 8).
    pixel_source: [u16; SCREEN_WIDTH],

    /// Latched VIC state.
    pub pipe: PixelEnginePipe,
    pub bpipe: BorderColorPipe,
    pub cpipe: CanvasColorPipe,
    pub spipe: SpriteColorPipe,

    /// Canvas shift register.
    pub sr: ShiftRegister,
    /// Sprite shift registers.
    pub sprite_sr: [SpriteShiftRegister; 8],

    /// Set between the first and last drawn column of a line.
    pub visible_column: bool,

    /// Resolved colors for the current canvas pixel.
    col_rgba: [u32; 4],
    /// Whether the current canvas pixel is rendered in multicolor.
    multicol: bool,

    /// Sprite-sprite collisions accumulated this cycle.
    collision_ss: u8,
    /// Sprite-background collisions accumulated this cycle.
    collision_sb: u8,
}

impl PixelEngine {
    #[must_use]
    pub fn new() -> Self {
        let size = SCREEN_WIDTH * SCREEN_HEIGHT;
        Self {
            buffers: [
                vec![PALETTE[0]; size].into_boxed_slice(),
                vec![PALETTE[0]; size].into_boxed_slice(),
            ],
            back: 0,
            line_offset: None,
            z_buffer: [0xFF; SCREEN_WIDTH],
            pixel_source: [0; SCREEN_WIDTH],
            pipe: PixelEnginePipe::default(),
            bpipe: BorderColorPipe::default(),
            cpipe: CanvasColorPipe::default(),
            spipe: SpriteColorPipe::default(),
            sr: ShiftRegister::default(),
            sprite_sr: [SpriteShiftRegister::default(); 8],
            visible_column: false,
            col_rgba: [PALETTE[0]; 4],
            multicol: false,
            collision_ss: 0,
            collision_sb: 0,
        }
    }

    /// The stable front buffer.
    #[must_use]
    pub fn screen_buffer(&self) -> &[u32] {
        &self.buffers[1 - self.back]
    }

    pub fn begin_frame(&mut self) {}

    /// Swap the pixel buffers. The freshly drawn frame becomes stable.
    pub fn end_frame(&mut self) {
        self.back = 1 - self.back;
    }

    /// Set up line buffers for a new raster line.
    ///
    /// `row` is the frame buffer row, or `None` for a VBLANK line.
    pub fn begin_rasterline(&mut self, row: Option<usize>) {
        self.line_offset = row.filter(|r| *r < SCREEN_HEIGHT).map(|r| r * SCREEN_WIDTH);
        self.z_buffer = [0xFF; SCREEN_WIDTH];
        self.pixel_source = [0; SCREEN_WIDTH];
        for sr in &mut self.sprite_sr {
            sr.remaining_bits = -1;
        }
    }

    pub fn end_rasterline(&mut self) {}

    /// Assemble the 24-bit shift register from the chunk latches.
    pub fn load_shift_register(&mut self, sprite: usize) {
        let sr = &mut self.sprite_sr[sprite];
        sr.data = (u32::from(sr.chunk1) << 16) | (u32::from(sr.chunk2) << 8) | u32::from(sr.chunk3);
    }

    /// Drain the collision bits accumulated since the last call.
    pub fn take_collisions(&mut self) -> (u8, u8) {
        let out = (self.collision_ss, self.collision_sb);
        self.collision_ss = 0;
        self.collision_sb = 0;
        out
    }

    // ------------------------------------------------------------------
    // High level drawing
    // ------------------------------------------------------------------

    /// Synthesize 8 pixels for the cycle prepared one cycle earlier.
    pub fn draw(&mut self) {
        self.draw_border();
        self.draw_canvas();
        self.draw_sprites();
    }

    /// Draw routine for the cycle in which the left border may end
    /// mid-chunk (38 column mode).
    pub fn draw17(&mut self, main_ff_now: bool) {
        if main_ff_now {
            self.draw_border();
        } else if self.pipe.main_frame_ff {
            let left = if self.pipe.ctrl2 & 0x08 != 0 { 24 } else { 31 };
            let color = PALETTE[(self.bpipe.border_color & 0x0F) as usize];
            for i in 0..8 {
                let x = self.pipe.x_counter + i;
                if x < left {
                    self.set_frame_pixel(x, color);
                }
            }
        }
        self.draw_canvas();
        self.draw_sprites();
    }

    /// Draw routine for the cycle in which the right border may begin
    /// mid-chunk (38 column mode).
    pub fn draw55(&mut self, main_ff_now: bool) {
        self.draw_canvas();
        if self.pipe.main_frame_ff {
            self.draw_border();
        } else if main_ff_now {
            let right = if self.pipe.ctrl2 & 0x08 != 0 { 344 } else { 335 };
            let color = PALETTE[(self.bpipe.border_color & 0x0F) as usize];
            for i in 0..8 {
                let x = self.pipe.x_counter + i;
                if x >= right {
                    self.set_frame_pixel(x, color);
                }
            }
        }
        self.draw_sprites();
    }

    /// Runs the sprite sequencers without border or canvas output.
    pub fn draw_outside_border(&mut self) {
        self.draw_sprites();
    }

    fn draw_border(&mut self) {
        if self.pipe.main_frame_ff {
            let color = PALETTE[(self.bpipe.border_color & 0x0F) as usize];
            for i in 0..8 {
                self.set_frame_pixel(self.pipe.x_counter + i, color);
            }
        }
    }

    fn draw_canvas(&mut self) {
        // With the vertical flipflop set the main flipflop cannot clear,
        // so the border already covers these pixels.
        if self.pipe.vertical_frame_ff {
            return;
        }
        for i in 0..8 {
            self.draw_canvas_pixel(i);
        }
    }

    fn draw_canvas_pixel(&mut self, pixel: u8) {
        let xscroll = self.pipe.ctrl2 & 0x07;
        if pixel == xscroll && self.sr.can_load {
            self.sr.data = self.pipe.g_data;
            self.sr.latched_character = self.pipe.g_character;
            self.sr.latched_color = self.pipe.g_color;
            self.sr.mc_flop = true;
        }

        let mode = DisplayMode::from_ctrl(self.pipe.ctrl1, self.pipe.ctrl2);
        self.load_colors(mode, self.sr.latched_character, self.sr.latched_color);

        let x = self.pipe.x_counter + i16::from(pixel);
        if self.multicol {
            if self.sr.mc_flop {
                self.sr.colorbits = self.sr.data >> 6;
            }
            self.set_multi_color_pixel(x, self.sr.colorbits & 0x03);
        } else {
            self.set_single_color_pixel(x, self.sr.data >> 7);
        }

        self.sr.data <<= 1;
        self.sr.mc_flop = !self.sr.mc_flop;
    }

    fn draw_sprites(&mut self) {
        if self.pipe.sprite_on == 0 && self.sprite_sr.iter().all(|s| s.remaining_bits <= 0) {
            return;
        }
        for pixel in 0..8u8 {
            self.draw_sprite_pixel(pixel);
        }
    }

    fn draw_sprite_pixel(&mut self, pixel: u8) {
        let x = self.pipe.x_counter + i16::from(pixel);

        for nr in 0..8usize {
            let bit = 1u8 << nr;

            // The sequencer is halted while the shift register is loaded.
            if self.pipe.sprite_dma_cycle & bit != 0 {
                continue;
            }

            if self.sprite_sr[nr].remaining_bits == -1
                && self.pipe.sprite_on & bit != 0
                && x >= 0
                && x as u16 == self.pipe.sprite_x[nr]
            {
                let expanded = self.pipe.sprite_x_expand & bit != 0;
                self.sprite_sr[nr].remaining_bits = if expanded { 26 } else { 24 };
                self.sprite_sr[nr].mc_flop = true;
                self.sprite_sr[nr].exp_flop = true;
            }

            if self.sprite_sr[nr].remaining_bits <= 0 {
                continue;
            }

            let mcm = self.pipe.sprite_multicolor & bit != 0;
            let expanded = self.pipe.sprite_x_expand & bit != 0;

            if mcm {
                if self.sprite_sr[nr].mc_flop {
                    self.sprite_sr[nr].colorbits = ((self.sprite_sr[nr].data >> 22) & 0x03) as u8;
                }
            } else {
                self.sprite_sr[nr].colorbits = ((self.sprite_sr[nr].data >> 23) & 0x01) as u8;
            }

            let bits = self.sprite_sr[nr].colorbits;
            if bits != 0 {
                let color_index = match (mcm, bits) {
                    (false, _) | (true, 2) => self.spipe.sprite_color[nr],
                    (true, 1) => self.spipe.extra_color1,
                    _ => self.spipe.extra_color2,
                };
                let depth = if self.pipe.sprite_priority & bit != 0 {
                    SPRITE_LAYER_BG_DEPTH | nr as u8
                } else {
                    SPRITE_LAYER_FG_DEPTH | nr as u8
                };
                self.set_sprite_pixel(x, PALETTE[(color_index & 0x0F) as usize], depth, nr);
            }

            // X expansion halves the shift rate: each bit is held for a
            // second pixel before the register advances.
            let sr = &mut self.sprite_sr[nr];
            if expanded {
                if !sr.exp_flop {
                    sr.data <<= 1;
                    sr.remaining_bits -= 1;
                    sr.mc_flop = !sr.mc_flop;
                }
                sr.exp_flop = !sr.exp_flop;
            } else {
                sr.data <<= 1;
                sr.remaining_bits -= 1;
                sr.mc_flop = !sr.mc_flop;
                sr.exp_flop = true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Mid level drawing
    // ------------------------------------------------------------------

    /// Resolve the four drawing colors for the given display mode.
    ///
    /// The invalid modes render black but keep the foreground semantics
    /// of their base mode, so collisions still happen.
    fn load_colors(&mut self, mode: DisplayMode, character: u8, color: u8) {
        let bg = &self.cpipe.background_color;
        let black = PALETTE[0];

        match mode {
            DisplayMode::StandardText => {
                self.multicol = false;
                self.col_rgba[0] = PALETTE[(bg[0] & 0x0F) as usize];
                self.col_rgba[1] = PALETTE[(color & 0x0F) as usize];
            }
            DisplayMode::MulticolorText => {
                if color & 0x08 != 0 {
                    self.multicol = true;
                    self.col_rgba[0] = PALETTE[(bg[0] & 0x0F) as usize];
                    self.col_rgba[1] = PALETTE[(bg[1] & 0x0F) as usize];
                    self.col_rgba[2] = PALETTE[(bg[2] & 0x0F) as usize];
                    self.col_rgba[3] = PALETTE[(color & 0x07) as usize];
                } else {
                    self.multicol = false;
                    self.col_rgba[0] = PALETTE[(bg[0] & 0x0F) as usize];
                    self.col_rgba[1] = PALETTE[(color & 0x07) as usize];
                }
            }
            DisplayMode::StandardBitmap => {
                self.multicol = false;
                self.col_rgba[0] = PALETTE[(character & 0x0F) as usize];
                self.col_rgba[1] = PALETTE[(character >> 4) as usize];
            }
            DisplayMode::MulticolorBitmap => {
                self.multicol = true;
                self.col_rgba[0] = PALETTE[(bg[0] & 0x0F) as usize];
                self.col_rgba[1] = PALETTE[(character >> 4) as usize];
                self.col_rgba[2] = PALETTE[(character & 0x0F) as usize];
                self.col_rgba[3] = PALETTE[(color & 0x0F) as usize];
            }
            DisplayMode::ExtendedBackgroundColor => {
                self.multicol = false;
                self.col_rgba[0] = PALETTE[(bg[(character >> 6) as usize] & 0x0F) as usize];
                self.col_rgba[1] = PALETTE[(color & 0x0F) as usize];
            }
            DisplayMode::InvalidText => {
                self.multicol = color & 0x08 != 0;
                self.col_rgba = [black; 4];
            }
            DisplayMode::InvalidStandardBitmap => {
                self.multicol = false;
                self.col_rgba = [black; 4];
            }
            DisplayMode::InvalidMulticolorBitmap => {
                self.multicol = true;
                self.col_rgba = [black; 4];
            }
        }
    }

    fn set_single_color_pixel(&mut self, x: i16, bit: u8) {
        if bit != 0 {
            self.set_foreground_pixel(x, self.col_rgba[1]);
        } else {
            self.set_background_pixel(x, self.col_rgba[0]);
        }
    }

    fn set_multi_color_pixel(&mut self, x: i16, bits: u8) {
        let rgba = self.col_rgba[bits as usize];
        // The left of the two bits decides foreground.
        if bits & 0x02 != 0 {
            self.set_foreground_pixel(x, rgba);
        } else {
            self.set_background_pixel(x, rgba);
        }
    }

    // ------------------------------------------------------------------
    // Low level drawing
    // ------------------------------------------------------------------

    fn locate(&self, x: i16) -> Option<(usize, usize)> {
        if !self.visible_column || x < 0 {
            return None;
        }
        let xi = x as usize;
        if xi >= SCREEN_WIDTH {
            return None;
        }
        self.line_offset.map(|base| (xi, base + xi))
    }

    fn set_frame_pixel(&mut self, x: i16, rgba: u32) {
        let Some((xi, off)) = self.locate(x) else { return };
        if BORDER_LAYER_DEPTH <= self.z_buffer[xi] {
            self.z_buffer[xi] = BORDER_LAYER_DEPTH;
            self.buffers[self.back][off] = rgba;
        }
    }

    fn set_foreground_pixel(&mut self, x: i16, rgba: u32) {
        let Some((xi, off)) = self.locate(x) else { return };
        if FOREGROUND_LAYER_DEPTH <= self.z_buffer[xi] {
            self.z_buffer[xi] = FOREGROUND_LAYER_DEPTH;
            self.buffers[self.back][off] = rgba;
        }
        self.pixel_source[xi] |= SOURCE_FOREGROUND;
    }

    fn set_background_pixel(&mut self, x: i16, rgba: u32) {
        let Some((xi, off)) = self.locate(x) else { return };
        if BACKGROUND_LAYER_DEPTH <= self.z_buffer[xi] {
            self.z_buffer[xi] = BACKGROUND_LAYER_DEPTH;
            self.buffers[self.back][off] = rgba;
        }
    }

    fn set_sprite_pixel(&mut self, x: i16, rgba: u32, depth: u8, nr: usize) {
        let Some((xi, off)) = self.locate(x) else { return };

        let source = self.pixel_source[xi];
        if source & 0xFF != 0 {
            self.collision_ss |= (source as u8) | (1 << nr);
        }
        if source & SOURCE_FOREGROUND != 0 {
            self.collision_sb |= 1 << nr;
        }

        if depth <= self.z_buffer[xi] {
            self.z_buffer[xi] = depth;
            self.buffers[self.back][off] = rgba;
        }
        self.pixel_source[xi] |= 1 << nr;
    }

    // ------------------------------------------------------------------
    // Snapshot support (driven by the VIC)
    // ------------------------------------------------------------------

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        let p = &self.pipe;
        w.put_u16(p.y_counter);
        w.put_u16(p.x_counter as u16);
        w.put_bool(p.main_frame_ff);
        w.put_bool(p.vertical_frame_ff);
        w.put_u8(p.g_data);
        w.put_u8(p.g_character);
        w.put_u8(p.g_color);
        w.put_u8(p.ctrl1);
        w.put_u8(p.ctrl2);
        for x in p.sprite_x {
            w.put_u16(x);
        }
        w.put_u8(p.sprite_x_expand);
        w.put_u8(p.sprite_on);
        w.put_u8(p.sprite_multicolor);
        w.put_u8(p.sprite_priority);
        w.put_u8(p.sprite_dma_cycle);

        w.put_u8(self.bpipe.border_color);
        w.put_bytes(&self.cpipe.background_color);
        w.put_bytes(&self.spipe.sprite_color);
        w.put_u8(self.spipe.extra_color1);
        w.put_u8(self.spipe.extra_color2);

        w.put_u8(self.sr.data);
        w.put_bool(self.sr.can_load);
        w.put_bool(self.sr.mc_flop);
        w.put_u8(self.sr.latched_character);
        w.put_u8(self.sr.latched_color);
        w.put_u8(self.sr.colorbits);

        for s in &self.sprite_sr {
            w.put_u32(s.data);
            w.put_u8(s.chunk1);
            w.put_u8(s.chunk2);
            w.put_u8(s.chunk3);
            w.put_u32(s.remaining_bits as u32);
            w.put_bool(s.mc_flop);
            w.put_bool(s.exp_flop);
            w.put_u8(s.colorbits);
        }

        w.put_bool(self.visible_column);
        w.put_u8(self.collision_ss);
        w.put_u8(self.collision_sb);
        w.put_u32(self.line_offset.map_or(u32::MAX, |o| o as u32));
        w.put_bytes(&self.z_buffer);
        for s in self.pixel_source {
            w.put_u16(s);
        }
    }

    pub fn load_state(&mut self, r: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        self.pipe.y_counter = r.get_u16()?;
        self.pipe.x_counter = r.get_u16()? as i16;
        self.pipe.main_frame_ff = r.get_bool()?;
        self.pipe.vertical_frame_ff = r.get_bool()?;
        self.pipe.g_data = r.get_u8()?;
        self.pipe.g_character = r.get_u8()?;
        self.pipe.g_color = r.get_u8()?;
        self.pipe.ctrl1 = r.get_u8()?;
        self.pipe.ctrl2 = r.get_u8()?;
        for x in &mut self.pipe.sprite_x {
            *x = r.get_u16()?;
        }
        self.pipe.sprite_x_expand = r.get_u8()?;
        self.pipe.sprite_on = r.get_u8()?;
        self.pipe.sprite_multicolor = r.get_u8()?;
        self.pipe.sprite_priority = r.get_u8()?;
        self.pipe.sprite_dma_cycle = r.get_u8()?;

        self.bpipe.border_color = r.get_u8()?;
        r.get_bytes(&mut self.cpipe.background_color)?;
        r.get_bytes(&mut self.spipe.sprite_color)?;
        self.spipe.extra_color1 = r.get_u8()?;
        self.spipe.extra_color2 = r.get_u8()?;

        self.sr.data = r.get_u8()?;
        self.sr.can_load = r.get_bool()?;
        self.sr.mc_flop = r.get_bool()?;
        self.sr.latched_character = r.get_u8()?;
        self.sr.latched_color = r.get_u8()?;
        self.sr.colorbits = r.get_u8()?;

        for s in &mut self.sprite_sr {
            s.data = r.get_u32()?;
            s.chunk1 = r.get_u8()?;
            s.chunk2 = r.get_u8()?;
            s.chunk3 = r.get_u8()?;
            s.remaining_bits = r.get_u32()? as i32;
            s.mc_flop = r.get_bool()?;
            s.exp_flop = r.get_bool()?;
            s.colorbits = r.get_u8()?;
        }

        self.visible_column = r.get_bool()?;
        self.collision_ss = r.get_u8()?;
        self.collision_sb = r.get_u8()?;
        let off = r.get_u32()?;
        self.line_offset = if off == u32::MAX {
            None
        } else {
            Some(off as usize)
        };
        r.get_bytes(&mut self.z_buffer)?;
        for s in &mut self.pixel_source {
            *s = r.get_u16()?;
        }
        Ok(())
    }
}

impl Default for PixelEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_on_line() -> PixelEngine {
        let mut pe = PixelEngine::new();
        pe.begin_rasterline(Some(100));
        pe.visible_column = true;
        pe
    }

    #[test]
    fn border_covers_canvas() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 40;
        pe.pipe.main_frame_ff = true;
        pe.bpipe.border_color = 6;
        pe.cpipe.background_color[0] = 1;
        pe.draw();
        let off = 100 * SCREEN_WIDTH + 40;
        assert_eq!(pe.buffers[pe.back][off], PALETTE[6]);
    }

    #[test]
    fn standard_text_renders_fg_and_bg() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 40;
        pe.pipe.g_data = 0b1010_0000;
        pe.pipe.g_color = 5;
        pe.cpipe.background_color[0] = 6;
        pe.sr.can_load = true;
        pe.draw();
        let off = 100 * SCREEN_WIDTH + 40;
        assert_eq!(pe.buffers[pe.back][off], PALETTE[5]);
        assert_eq!(pe.buffers[pe.back][off + 1], PALETTE[6]);
        assert_eq!(pe.buffers[pe.back][off + 2], PALETTE[5]);
    }

    #[test]
    fn xscroll_delays_shift_register_load() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 40;
        pe.pipe.ctrl2 = 0x03; // XSCROLL = 3
        pe.pipe.g_data = 0xFF;
        pe.pipe.g_color = 1;
        pe.cpipe.background_color[0] = 0;
        pe.sr.can_load = true;
        pe.draw();
        let off = 100 * SCREEN_WIDTH + 40;
        // Pixels before the load point come from the (empty) register.
        assert_eq!(pe.buffers[pe.back][off], PALETTE[0]);
        assert_eq!(pe.buffers[pe.back][off + 3], PALETTE[1]);
    }

    #[test]
    fn multicolor_text_pairs() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 40;
        pe.pipe.ctrl2 = 0x10; // MCM
        pe.pipe.g_data = 0b01_10_11_00;
        pe.pipe.g_color = 0x0F; // bit 3 set: multicolor, color 7
        pe.cpipe.background_color = [0, 2, 5, 0];
        pe.sr.can_load = true;
        pe.draw();
        let off = 100 * SCREEN_WIDTH + 40;
        assert_eq!(pe.buffers[pe.back][off], PALETTE[2]); // 01 -> bg1
        assert_eq!(pe.buffers[pe.back][off + 1], PALETTE[2]);
        assert_eq!(pe.buffers[pe.back][off + 2], PALETTE[5]); // 10 -> bg2
        assert_eq!(pe.buffers[pe.back][off + 4], PALETTE[7]); // 11 -> color RAM
        assert_eq!(pe.buffers[pe.back][off + 6], PALETTE[0]); // 00 -> bg0
    }

    #[test]
    fn invalid_mode_renders_black() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 40;
        pe.pipe.ctrl1 = 0x60; // ECM + BMM
        pe.pipe.g_data = 0xFF;
        pe.pipe.g_color = 5;
        pe.sr.can_load = true;
        pe.draw();
        let off = 100 * SCREEN_WIDTH + 40;
        assert_eq!(pe.buffers[pe.back][off], PALETTE[0]);
    }

    #[test]
    fn sprite_renders_at_x_position() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 96;
        pe.pipe.sprite_on = 0x01;
        pe.pipe.sprite_x[0] = 100;
        pe.spipe.sprite_color[0] = 1;
        pe.sprite_sr[0].data = 0xFF0000;
        pe.draw();
        let off = 100 * SCREEN_WIDTH;
        assert_eq!(pe.buffers[pe.back][off + 100], PALETTE[1]);
        assert_eq!(pe.buffers[pe.back][off + 99], PALETTE[0]); // untouched
    }

    #[test]
    fn sprite_collisions_accumulate() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 96;
        pe.pipe.sprite_on = 0x03;
        pe.pipe.sprite_x[0] = 100;
        pe.pipe.sprite_x[1] = 100;
        pe.sprite_sr[0].data = 0xFF0000;
        pe.sprite_sr[1].data = 0xFF0000;
        pe.draw();
        let (ss, _sb) = pe.take_collisions();
        assert_eq!(ss, 0x03);
        // Collisions drain on take.
        assert_eq!(pe.take_collisions().0, 0);
    }

    #[test]
    fn sprite_behind_foreground_still_collides() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 96;
        pe.pipe.sprite_on = 0x01;
        pe.pipe.sprite_x[0] = 96;
        pe.pipe.sprite_priority = 0x01; // behind foreground
        pe.pipe.g_data = 0xFF;
        pe.pipe.g_color = 1;
        pe.sr.can_load = true;
        pe.sprite_sr[0].data = 0xFF0000;
        pe.spipe.sprite_color[0] = 2;
        pe.draw();
        let (_, sb) = pe.take_collisions();
        assert_eq!(sb, 0x01);
        // Foreground won the pixel.
        let off = 100 * SCREEN_WIDTH + 96;
        assert_eq!(pe.buffers[pe.back][off], PALETTE[1]);
    }

    #[test]
    fn x_expanded_sprite_doubles_pixels() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 96;
        pe.pipe.sprite_on = 0x01;
        pe.pipe.sprite_x[0] = 96;
        pe.pipe.sprite_x_expand = 0x01;
        pe.spipe.sprite_color[0] = 3;
        pe.sprite_sr[0].data = 0b1010_0000 << 16;
        pe.draw();
        let off = 100 * SCREEN_WIDTH + 96;
        assert_eq!(pe.buffers[pe.back][off], PALETTE[3]);
        assert_eq!(pe.buffers[pe.back][off + 1], PALETTE[3]);
        assert_eq!(pe.buffers[pe.back][off + 2], PALETTE[0]);
        assert_eq!(pe.buffers[pe.back][off + 3], PALETTE[0]);
        assert_eq!(pe.buffers[pe.back][off + 4], PALETTE[3]);
    }

    #[test]
    fn multicolor_sprite_pairs() {
        let mut pe = engine_on_line();
        pe.pipe.x_counter = 96;
        pe.pipe.sprite_on = 0x01;
        pe.pipe.sprite_x[0] = 96;
        pe.pipe.sprite_multicolor = 0x01;
        pe.spipe.sprite_color[0] = 5;
        pe.spipe.extra_color1 = 2;
        pe.spipe.extra_color2 = 6;
        pe.sprite_sr[0].data = 0b01_10_11_00 << 16;
        pe.draw();
        let off = 100 * SCREEN_WIDTH + 96;
        assert_eq!(pe.buffers[pe.back][off], PALETTE[2]); // 01 -> extra 1
        assert_eq!(pe.buffers[pe.back][off + 2], PALETTE[5]); // 10 -> sprite color
        assert_eq!(pe.buffers[pe.back][off + 4], PALETTE[6]); // 11 -> extra 2
        assert_eq!(pe.buffers[pe.back][off + 6], PALETTE[0]); // 00 transparent
    }

    #[test]
    fn buffer_swap_keeps_front_stable() {
        let mut pe = PixelEngine::new();
        let front_before = pe.screen_buffer().as_ptr();
        pe.end_frame();
        assert_ne!(pe.screen_buffer().as_ptr(), front_before);
    }
}
