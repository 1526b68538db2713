//! VIC-II 6569 (PAL) / 6567 (NTSC) video chip.
//!
//! The VIC owns the system clock as the frame master: a PAL frame is
//! 312 raster lines of 63 cycles, NTSC is 263 lines of 65 cycles. Every
//! cycle runs a fixed schedule of bus accesses (character matrix,
//! graphics, sprite pointer/data, DRAM refresh) and is processed in five
//! phases, in this order:
//!
//! 1. Frame logic - vertical frame flipflop set/clear conditions.
//! 2. Draw - the pixel engine renders the chunk prepared one cycle ago.
//! 3. First fetch - the phi-1 bus access of this cycle.
//! 4. IRQ, sprite, VC/RC and BA logic.
//! 5. Second fetch - the phi-2 access (character matrix, sprite data).
//!
//! Bad lines steal the bus for the 40 character accesses in cycles
//! 15-54; the BA line goes low three cycles ahead so the CPU is frozen
//! in time. Sprite DMA pulls BA in the line tail around the per-sprite
//! pointer and data fetches.

#![allow(clippy::cast_possible_truncation)]

mod pixel;

pub use pixel::{
    BorderColorPipe, CanvasColorPipe, DisplayMode, PixelEngine, PixelEnginePipe, ShiftRegister,
    SpriteColorPipe, SpriteShiftRegister, SCREEN_HEIGHT, SCREEN_WIDTH,
};

use machine_core::{SnapshotError, SnapshotReader, SnapshotWriter, Snapshotable};

use crate::config::{C64Model, NTSC_YCOUNTER_OVERFLOW_LINE};
use crate::memory::C64Memory;

// Sprite bits for the BA masks.
const SPR0: u8 = 0x01;
const SPR1: u8 = 0x02;
const SPR2: u8 = 0x04;
const SPR3: u8 = 0x08;
const SPR4: u8 = 0x10;
const SPR5: u8 = 0x20;
const SPR6: u8 = 0x40;
const SPR7: u8 = 0x80;

/// First line of the upper VBLANK area that is not drawn.
const UPPER_VBLANK: u16 = 16;

/// Drawn raster lines per model.
const PAL_DRAWN_LINES: u16 = 284;
const NTSC_DRAWN_LINES: u16 = 235;

// IRQ sources in $D019/$D01A.
const IRQ_RASTER: u8 = 0x01;
const IRQ_SPRITE_BACKGROUND: u8 = 0x02;
const IRQ_SPRITE_SPRITE: u8 = 0x04;
const IRQ_LIGHTPEN: u8 = 0x08;

/// The VIC-II video chip.
pub struct Vic {
    model: C64Model,

    /// Register backing store for registers without dedicated fields.
    iomem: [u8; 64],

    /// Live state that feeds the pixel engine pipe.
    p: PixelEnginePipe,
    /// Live color registers, latched into the pixel engine per cycle.
    bp: BorderColorPipe,
    cp: CanvasColorPipe,
    sp: SpriteColorPipe,

    /// Pixel synthesis unit.
    pub pixel_engine: PixelEngine,

    /// Physical raster line counter driven by the schedule (0-based).
    raster_line: u16,
    /// Raster cycle within the line (1-based).
    raster_cycle: u8,
    /// Internal Y counter; wraps in cycle 2 of the overflow line.
    y_counter: u16,
    /// Set in cycles 1/63/65 iff the Y counter matched the IRQ line.
    y_equals_irq_line: bool,

    /// 10-bit video matrix counter and its line-start latch.
    vc: u16,
    vc_base: u16,
    /// 3-bit row counter.
    rc: u8,
    /// 6-bit index into the video matrix line buffers.
    vmli: u8,

    /// Character and color line buffers filled by the c-accesses.
    character_space: [u8; 40],
    color_space: [u8; 40],

    /// DRAM refresh counter.
    refresh_counter: u8,

    /// Last address/value seen on the VIC bus.
    addr_bus: u16,
    data_bus: u8,

    /// Start address of the 16K bank selected through CIA 2.
    bank_addr: u16,

    /// Bad line condition for the current line.
    bad_line: bool,
    /// DEN was seen set during some cycle of raster line $30.
    den_in_30: bool,
    /// Display (true) or idle (false) state.
    display_state: bool,

    /// BA line; low means the VIC needs the bus.
    ba_low: bool,
    /// Clock at which BA last went low.
    ba_went_low_at: u64,

    /// Vertical frame flipflop conditions for the current line.
    vertical_ff_set_cond: bool,
    vertical_ff_clear_cond: bool,

    /// Current line lies in the VBLANK area.
    vblank: bool,

    /// Sprite data counters and their bases.
    mc: [u8; 8],
    mc_base: [u8; 8],
    /// Sprite data addresses (pointer value shifted left by 6).
    sprite_ptr: [u16; 8],
    /// Sprite display enable, one bit per sprite.
    sprite_on: u8,
    /// Sprite DMA enable, one bit per sprite.
    sprite_dma_on: u8,
    /// Y expansion flipflops.
    expansion_ff: u8,
    /// Bits the CPU cleared in $D017 during cycle 15.
    cleared_bits_d017: u8,
    /// Sprites in their first / second+third data fetch this cycle.
    is_first_dma: u8,
    is_second_dma: u8,

    /// A lightpen IRQ was already triggered this frame.
    lightpen_irq_occurred: bool,

    /// Master clock, counted by this chip (one increment per cycle).
    clock: u64,

    /// Frame completion flag for the scheduler.
    frame_complete: bool,

    // Debug counters for the bus-access invariants.
    r_accesses_this_line: u8,
    c_accesses_this_line: u8,
}

impl Vic {
    #[must_use]
    pub fn new(model: C64Model) -> Self {
        let mut vic = Self {
            model,
            iomem: [0; 64],
            p: PixelEnginePipe::default(),
            bp: BorderColorPipe::default(),
            cp: CanvasColorPipe::default(),
            sp: SpriteColorPipe::default(),
            pixel_engine: PixelEngine::new(),
            raster_line: 0,
            raster_cycle: 1,
            y_counter: 0,
            y_equals_irq_line: false,
            vc: 0,
            vc_base: 0,
            rc: 0,
            vmli: 0,
            character_space: [0; 40],
            color_space: [0; 40],
            refresh_counter: 0xFF,
            addr_bus: 0,
            data_bus: 0,
            bank_addr: 0,
            bad_line: false,
            den_in_30: false,
            display_state: false,
            ba_low: false,
            ba_went_low_at: 0,
            vertical_ff_set_cond: false,
            vertical_ff_clear_cond: false,
            vblank: true,
            mc: [0; 8],
            mc_base: [0; 8],
            sprite_ptr: [0; 8],
            sprite_on: 0,
            sprite_dma_on: 0,
            expansion_ff: 0xFF,
            cleared_bits_d017: 0,
            is_first_dma: 0,
            is_second_dma: 0,
            lightpen_irq_occurred: false,
            clock: 0,
            frame_complete: false,
            r_accesses_this_line: 0,
            c_accesses_this_line: 0,
        };
        vic.power_on_defaults();
        vic
    }

    fn power_on_defaults(&mut self) {
        self.y_counter = self.model.rasterlines_per_frame();
        // Sensible screen right from the start: light blue border, blue
        // background, screen memory at $0400, display enabled.
        self.bp.border_color = crate::palette::LTBLUE;
        self.cp.background_color[0] = crate::palette::BLUE;
        self.iomem[0x18] = 0x10;
        self.p.ctrl1 = 0x10;
        self.expansion_ff = 0xFF;
    }

    // ------------------------------------------------------------------
    // Derived register state
    // ------------------------------------------------------------------

    fn den_bit(&self) -> bool {
        self.p.ctrl1 & 0x10 != 0
    }

    fn is_csel(&self) -> bool {
        self.p.ctrl2 & 0x08 != 0
    }

    fn is_rsel(&self) -> bool {
        self.p.ctrl1 & 0x08 != 0
    }

    fn left_comparison_value(&self) -> i16 {
        if self.is_csel() {
            24
        } else {
            31
        }
    }

    fn right_comparison_value(&self) -> i16 {
        if self.is_csel() {
            344
        } else {
            335
        }
    }

    fn upper_comparison_value(&self) -> u16 {
        if self.is_rsel() {
            51
        } else {
            55
        }
    }

    fn lower_comparison_value(&self) -> u16 {
        if self.is_rsel() {
            251
        } else {
            247
        }
    }

    /// 9-bit raster line the next raster interrupt fires on.
    #[must_use]
    pub fn raster_irq_line(&self) -> u16 {
        (u16::from(self.p.ctrl1 & 0x80) << 1) | u16::from(self.iomem[0x12])
    }

    fn vertical_scroll(&self) -> u16 {
        u16::from(self.p.ctrl1 & 0x07)
    }

    fn update_bad_line_condition(&mut self) {
        self.bad_line = (0x30..=0xF7).contains(&self.y_counter)
            && (self.y_counter & 0x07) == self.vertical_scroll()
            && self.den_in_30;
    }

    fn update_display_state(&mut self) {
        if self.bad_line {
            self.display_state = true;
        }
    }

    // ------------------------------------------------------------------
    // Bus accesses
    // ------------------------------------------------------------------

    fn mem_access(&mut self, mem: &C64Memory, addr: u16) -> u8 {
        debug_assert!(addr & 0xC000 == 0);
        self.addr_bus = self.bank_addr.wrapping_add(addr);
        self.data_bus = mem.vic_read(self.bank_addr, addr);
        self.data_bus
    }

    fn mem_idle_access(&mut self, mem: &C64Memory) -> u8 {
        self.mem_access(mem, 0x3FFF)
    }

    fn r_access(&mut self, mem: &C64Memory) {
        let addr = 0x3F00 | u16::from(self.refresh_counter);
        let _ = self.mem_access(mem, addr);
        self.refresh_counter = self.refresh_counter.wrapping_sub(1);
        self.r_accesses_this_line += 1;
    }

    fn r_idle_access(&mut self, mem: &C64Memory) {
        let _ = self.mem_idle_access(mem);
    }

    fn c_access(&mut self, mem: &C64Memory, cpu_pc: u16) {
        if !self.bad_line {
            return;
        }
        if self.ba_low_for_three_cycles() {
            let addr = (u16::from(self.iomem[0x18] & 0xF0) << 6) | self.vc;
            self.character_space[self.vmli as usize] = self.mem_access(mem, addr);
            self.color_space[self.vmli as usize] = mem.color_ram_read(self.vc);
            self.c_accesses_this_line += 1;
        } else {
            // BA has not been down long enough: the VIC reads $FF on its
            // tri-stated data lines and picks up whatever the CPU drives
            // on the color lines.
            self.character_space[self.vmli as usize] = 0xFF;
            self.color_space[self.vmli as usize] = mem.ram_read(cpu_pc) & 0x0F;
        }
    }

    fn g_access(&mut self, mem: &C64Memory) {
        debug_assert!(self.vc < 1024);
        debug_assert!(self.rc < 8);

        let bmm_prev = self.pixel_engine.pipe.ctrl1 & 0x20 != 0;
        let ecm_prev = self.pixel_engine.pipe.ctrl1 & 0x40 != 0;

        if self.display_state {
            let mut addr = if bmm_prev {
                (u16::from(self.iomem[0x18] & 0x08) << 10) | (self.vc << 3) | u16::from(self.rc)
            } else {
                (u16::from(self.iomem[0x18] & 0x0E) << 10)
                    | (u16::from(self.character_space[self.vmli as usize]) << 3)
                    | u16::from(self.rc)
            };
            if ecm_prev {
                addr &= 0xF9FF;
            }

            self.p.g_data = self.mem_access(mem, addr);
            self.p.g_character = self.character_space[self.vmli as usize];
            self.p.g_color = self.color_space[self.vmli as usize];

            self.vc = (self.vc + 1) & 0x3FF;
            self.vmli = (self.vmli + 1) & 0x3F;
        } else {
            let addr = if ecm_prev { 0x39FF } else { 0x3FFF };
            self.p.g_data = self.mem_access(mem, addr);
            self.p.g_character = 0;
            self.p.g_color = 0;
        }
    }

    fn p_access(&mut self, mem: &C64Memory, sprite: usize) {
        let addr = (u16::from(self.iomem[0x18] & 0xF0) << 6) | 0x03F8 | sprite as u16;
        self.sprite_ptr[sprite] = u16::from(self.mem_access(mem, addr)) << 6;
    }

    fn s_first_access(&mut self, mem: &C64Memory, sprite: usize) {
        let mut data = 0x00;
        self.is_first_dma = 1 << sprite;

        if self.sprite_dma_on & (1 << sprite) != 0 {
            if self.ba_low_for_three_cycles() {
                let addr = self.sprite_ptr[sprite] | u16::from(self.mc[sprite]);
                data = self.mem_access(mem, addr);
            }
            self.mc[sprite] = (self.mc[sprite] + 1) & 0x3F;
        }

        self.pixel_engine.sprite_sr[sprite].chunk1 = data;
    }

    fn s_second_access(&mut self, mem: &C64Memory, sprite: usize) {
        let mut data = 0x00;
        let mut accessed = false;
        self.is_first_dma = 0;
        self.is_second_dma = 1 << sprite;

        if self.sprite_dma_on & (1 << sprite) != 0 {
            if self.ba_low_for_three_cycles() {
                let addr = self.sprite_ptr[sprite] | u16::from(self.mc[sprite]);
                data = self.mem_access(mem, addr);
                accessed = true;
            }
            self.mc[sprite] = (self.mc[sprite] + 1) & 0x3F;
        }

        if !accessed {
            let _ = self.mem_idle_access(mem);
        }
        self.pixel_engine.sprite_sr[sprite].chunk2 = data;
    }

    fn s_third_access(&mut self, mem: &C64Memory, sprite: usize) {
        let mut data = 0x00;

        if self.sprite_dma_on & (1 << sprite) != 0 {
            if self.ba_low_for_three_cycles() {
                let addr = self.sprite_ptr[sprite] | u16::from(self.mc[sprite]);
                data = self.mem_access(mem, addr);
            }
            self.mc[sprite] = (self.mc[sprite] + 1) & 0x3F;
        }

        self.pixel_engine.sprite_sr[sprite].chunk3 = data;
    }

    fn s_finalize(&mut self, _sprite: usize) {
        self.is_second_dma = 0;
    }

    // ------------------------------------------------------------------
    // BA line and interrupts
    // ------------------------------------------------------------------

    fn set_ba_low(&mut self, pulled: bool) {
        if !self.ba_low && pulled {
            self.ba_went_low_at = self.clock;
        }
        self.ba_low = pulled;
    }

    fn ba_low_for_three_cycles(&self) -> bool {
        self.ba_low && self.clock - self.ba_went_low_at > 2
    }

    /// Current state of the BA line (low = CPU frozen on reads).
    #[must_use]
    pub fn ba_low(&self) -> bool {
        self.ba_low
    }

    fn trigger_irq(&mut self, source: u8) {
        self.iomem[0x19] |= source;
        if self.iomem[0x1A] & source != 0 {
            self.iomem[0x19] |= 0x80;
        }
    }

    /// True while the VIC pulls the CPU IRQ line.
    #[must_use]
    pub fn irq_active(&self) -> bool {
        self.iomem[0x19] & 0x80 != 0
    }

    /// Trigger a lightpen event.
    ///
    /// Latches the current beam position into $D013/$D014 and asserts IRQ
    /// source $08, at most once per frame. When the trigger coincides
    /// with a raster interrupt for the same line, the raster source is
    /// asserted first: the raster compare runs in phase 4 of cycle 1/2,
    /// before any CPU-visible action of the cycle.
    pub fn trigger_lightpen(&mut self) {
        if self.lightpen_irq_occurred {
            return;
        }
        self.lightpen_irq_occurred = true;
        let x = self.p.x_counter.saturating_sub(4).max(0);
        self.iomem[0x13] = (x / 2) as u8;
        self.iomem[0x14] = self.y_counter as u8;
        self.trigger_irq(IRQ_LIGHTPEN);
    }

    // ------------------------------------------------------------------
    // Sprite DMA lifecycle
    // ------------------------------------------------------------------

    fn compare_sprite_y(&self, y: u8) -> u8 {
        let mut mask = 0u8;
        for i in 0..8 {
            if self.iomem[1 + 2 * i] == y {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Cycle 16: advance MCBASE for expanded sprites and turn DMA off for
    /// sprites whose MCBASE reached 63.
    fn turn_sprite_dma_off(&mut self) {
        for i in 0..8 {
            let bit = 1u8 << i;
            if self.expansion_ff & bit != 0 {
                if self.cleared_bits_d017 & bit != 0 {
                    // The CPU cleared the Y expansion bit in the second
                    // phase of cycle 15: MCBASE takes the mixed value.
                    self.mc_base[i] =
                        (0x2A & (self.mc_base[i] & self.mc[i])) | (0x15 & (self.mc_base[i] | self.mc[i]));
                } else {
                    self.mc_base[i] = self.mc[i];
                }
                if self.mc_base[i] == 63 {
                    self.sprite_dma_on &= !bit;
                }
            }
        }
    }

    /// Cycles 55/56: turn DMA on for enabled sprites whose Y coordinate
    /// matches the lower 8 bits of the Y counter.
    fn turn_sprite_dma_on(&mut self) {
        let rising = !self.sprite_dma_on & (self.iomem[0x15] & self.compare_sprite_y(self.y_counter as u8));
        for i in 0..8 {
            if rising & (1 << i) != 0 {
                self.mc_base[i] = 0;
            }
        }
        self.expansion_ff |= rising;
        self.sprite_dma_on |= rising;
    }

    /// Cycle 56: invert the expansion flipflop of all stretched sprites.
    fn toggle_expansion_flipflop(&mut self) {
        self.expansion_ff ^= self.iomem[0x17];
    }

    // ------------------------------------------------------------------
    // Frame flipflops
    // ------------------------------------------------------------------

    fn check_vertical_frame_ff(&mut self) {
        if self.y_counter == self.upper_comparison_value() && self.den_bit() {
            self.vertical_ff_clear_cond = true;
        }
        if self.vertical_ff_clear_cond {
            self.p.vertical_frame_ff = false;
        }
        if self.y_counter == self.lower_comparison_value() {
            self.vertical_ff_set_cond = true;
        }
    }

    fn clear_main_frame_ff(&mut self) {
        // The main flipflop cannot clear while the vertical flipflop is
        // set or about to be set.
        if !self.p.vertical_frame_ff && !self.vertical_ff_set_cond {
            self.p.main_frame_ff = false;
        }
    }

    fn check_frame_flipflops_left(&mut self, comparison: i16) {
        if comparison == self.left_comparison_value() {
            self.clear_main_frame_ff();
        }
    }

    fn check_frame_flipflops_right(&mut self, comparison: i16) {
        if comparison == self.right_comparison_value() {
            self.p.main_frame_ff = true;
        }
    }

    // ------------------------------------------------------------------
    // Frame and line boundaries
    // ------------------------------------------------------------------

    fn y_counter_overflow(&self) -> bool {
        self.raster_line
            == if self.model.is_pal() {
                0
            } else {
                NTSC_YCOUNTER_OVERFLOW_LINE
            }
    }

    fn begin_frame(&mut self) {
        self.pixel_engine.begin_frame();
        self.lightpen_irq_occurred = false;
        // The refresh counter restarts at $FF in line 0, VCBASE is
        // cleared somewhere outside the bad line area.
        self.refresh_counter = 0xFF;
        self.vc_base = 0;
    }

    fn end_frame(&mut self) {
        self.pixel_engine.end_frame();
        self.frame_complete = true;
    }

    fn begin_rasterline(&mut self) {
        self.vertical_ff_set_cond = false;
        self.vertical_ff_clear_cond = false;
        self.r_accesses_this_line = 0;
        self.c_accesses_this_line = 0;

        let drawn_lines = if self.model.is_pal() {
            PAL_DRAWN_LINES
        } else {
            NTSC_DRAWN_LINES
        };
        self.vblank = self.raster_line < UPPER_VBLANK
            || self.raster_line >= UPPER_VBLANK + drawn_lines;

        // The overflow case is handled in cycle 2.
        if !self.y_counter_overflow() {
            self.y_counter += 1;
        }

        if self.raster_line == 0x30 {
            self.den_in_30 = self.den_bit();
        }
        self.update_bad_line_condition();

        let row = if self.vblank {
            None
        } else {
            Some(usize::from(self.raster_line - UPPER_VBLANK))
        };
        self.pixel_engine.begin_rasterline(row);
    }

    fn end_rasterline(&mut self) {
        if self.vertical_ff_set_cond {
            self.p.vertical_frame_ff = true;
        }
        self.pixel_engine.end_rasterline();
    }

    /// Latch the VIC state the pixel engine needs to draw the upcoming
    /// chunk one cycle from now.
    fn prepare_pixel_engine(&mut self) {
        let mut pipe = self.p;
        pipe.y_counter = self.y_counter;
        pipe.sprite_on = self.sprite_on;
        pipe.sprite_multicolor = self.iomem[0x1C];
        pipe.sprite_priority = self.iomem[0x1B];
        pipe.sprite_dma_cycle = self.is_first_dma | self.is_second_dma;
        self.pixel_engine.pipe = pipe;
        self.pixel_engine.bpipe = self.bp;
        self.pixel_engine.cpipe = self.cp;
        self.pixel_engine.spipe = self.sp;
    }

    fn count_x(&mut self) {
        self.p.x_counter += 8;
    }

    /// Drain collision bits accumulated by the pixel engine into the
    /// collision registers; the 0-to-nonzero transition raises the IRQ.
    fn latch_collisions(&mut self) {
        let (ss, sb) = self.pixel_engine.take_collisions();
        if ss != 0 {
            if self.iomem[0x1E] == 0 {
                self.trigger_irq(IRQ_SPRITE_SPRITE);
            }
            self.iomem[0x1E] |= ss;
        }
        if sb != 0 {
            if self.iomem[0x1F] == 0 {
                self.trigger_irq(IRQ_SPRITE_BACKGROUND);
            }
            self.iomem[0x1F] |= sb;
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Advance the VIC by one cycle.
    ///
    /// `cpu_pc` is the current CPU program counter; the VIC observes the
    /// byte it addresses during blocked character fetches.
    pub fn tick(&mut self, mem: &C64Memory, cpu_pc: u16) {
        self.clock += 1;

        if self.raster_cycle == 1 {
            if self.raster_line == 0 {
                self.begin_frame();
            }
            self.begin_rasterline();
        }

        match self.raster_cycle {
            1 => self.cycle1(mem),
            2 => self.cycle2(mem),
            3 => self.cycle3(mem),
            4 => self.cycle4(mem),
            5 => self.cycle5(mem),
            6 => self.cycle6(mem),
            7 => self.cycle7(mem),
            8 => self.cycle8(mem),
            9 => self.cycle9(mem),
            10 => self.cycle10(mem),
            11 => self.cycle11(mem),
            12 => self.cycle12(mem),
            13 => self.cycle13(mem),
            14 => self.cycle14(mem),
            15 => self.cycle15(mem, cpu_pc),
            16 => self.cycle16(mem, cpu_pc),
            17 => self.cycle17(mem, cpu_pc),
            18 => self.cycle18(mem, cpu_pc),
            19..=54 => self.cycle19to54(mem, cpu_pc),
            55 => self.cycle55(mem),
            56 => self.cycle56(mem),
            57 => self.cycle57(mem),
            58 => self.cycle58(mem),
            59 => self.cycle59(mem),
            60 => self.cycle60(mem),
            61 => self.cycle61(mem),
            62 => self.cycle62(mem),
            63 => self.cycle63(mem),
            64 => self.cycle64(mem),
            _ => self.cycle65(mem),
        }

        self.latch_collisions();

        if self.raster_cycle == self.model.cycles_per_rasterline() {
            self.end_rasterline();
            self.raster_cycle = 1;
            self.raster_line += 1;
            if self.raster_line == self.model.rasterlines_per_frame() {
                self.raster_line = 0;
                self.end_frame();
            }
        } else {
            self.raster_cycle += 1;
        }
    }

    fn raster_irq_edge(&mut self, edge_on_y: bool) {
        let edge_on_irq_cond =
            self.y_counter == self.raster_irq_line() && !self.y_equals_irq_line;
        if edge_on_y && edge_on_irq_cond {
            self.trigger_irq(IRQ_RASTER);
        }
    }

    fn cycle1(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();

        // Phase 1: frame logic
        self.check_vertical_frame_ff();
        if self.vertical_ff_set_cond {
            self.p.vertical_frame_ff = true;
        }

        // Phase 3: first fetch
        if pal {
            self.s_finalize(2);
            self.pixel_engine.load_shift_register(2);
            self.p_access(mem, 3);
        } else {
            self.s_second_access(mem, 3);
        }

        // Phase 4: rasterline interrupt (edge triggered)
        self.raster_irq_edge(self.raster_line != 0);
        self.y_equals_irq_line = self.y_counter == self.raster_irq_line();

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR3 | SPR4) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR3 | SPR4 | SPR5) != 0);
        }

        // Phase 5: second fetch
        if pal {
            self.s_first_access(mem, 3);
        } else {
            self.s_third_access(mem, 3);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle2(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();

        if self.y_counter_overflow() {
            self.y_counter = 0;
        }

        self.check_vertical_frame_ff();

        if pal {
            self.s_second_access(mem, 3);
        } else {
            self.s_finalize(3);
            self.pixel_engine.load_shift_register(3);
            self.p_access(mem, 4);
        }

        self.raster_irq_edge(self.y_counter == 0);

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR3 | SPR4 | SPR5) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR4 | SPR5) != 0);
        }

        if pal {
            self.s_third_access(mem, 3);
        } else {
            self.s_first_access(mem, 4);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle3(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        if pal {
            self.s_finalize(3);
            self.pixel_engine.load_shift_register(3);
            self.p_access(mem, 4);
        } else {
            self.s_second_access(mem, 4);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR4 | SPR5) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR4 | SPR5 | SPR6) != 0);
        }

        if pal {
            self.s_first_access(mem, 4);
        } else {
            self.s_third_access(mem, 4);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle4(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        if pal {
            self.s_second_access(mem, 4);
        } else {
            self.s_finalize(4);
            self.pixel_engine.load_shift_register(4);
            self.p_access(mem, 5);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR4 | SPR5 | SPR6) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR5 | SPR6) != 0);
        }

        if pal {
            self.s_third_access(mem, 4);
        } else {
            self.s_first_access(mem, 5);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle5(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        if pal {
            self.s_finalize(4);
            self.pixel_engine.load_shift_register(4);
            self.p_access(mem, 5);
        } else {
            self.s_second_access(mem, 5);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR5 | SPR6) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR5 | SPR6 | SPR7) != 0);
        }

        if pal {
            self.s_first_access(mem, 5);
        } else {
            self.s_third_access(mem, 5);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle6(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        if pal {
            self.s_second_access(mem, 5);
        } else {
            self.s_finalize(5);
            self.pixel_engine.load_shift_register(5);
            self.p_access(mem, 6);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR5 | SPR6 | SPR7) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR6 | SPR7) != 0);
        }

        if pal {
            self.s_third_access(mem, 5);
        } else {
            self.s_first_access(mem, 6);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle7(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        if pal {
            self.s_finalize(5);
            self.pixel_engine.load_shift_register(5);
            self.p_access(mem, 6);
        } else {
            self.s_second_access(mem, 6);
        }

        self.set_ba_low(self.sprite_dma_on & (SPR6 | SPR7) != 0);

        if pal {
            self.s_first_access(mem, 6);
        } else {
            self.s_third_access(mem, 6);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle8(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        if pal {
            self.s_second_access(mem, 6);
        } else {
            self.s_finalize(6);
            self.pixel_engine.load_shift_register(6);
            self.p_access(mem, 7);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR6 | SPR7) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & SPR7 != 0);
        }

        if pal {
            self.s_third_access(mem, 6);
        } else {
            self.s_first_access(mem, 7);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle9(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        if pal {
            self.s_finalize(6);
            self.pixel_engine.load_shift_register(6);
            self.p_access(mem, 7);
        } else {
            self.s_second_access(mem, 7);
        }

        self.set_ba_low(self.sprite_dma_on & SPR7 != 0);

        if pal {
            self.s_first_access(mem, 7);
        } else {
            self.s_third_access(mem, 7);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle10(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        self.prepare_pixel_engine();

        if pal {
            self.s_second_access(mem, 7);
        } else {
            self.s_finalize(7);
            self.pixel_engine.load_shift_register(7);
            self.r_idle_access(mem);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & SPR7 != 0);
        } else {
            self.set_ba_low(false);
        }

        if pal {
            self.s_third_access(mem, 7);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle11(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        self.pixel_engine.draw_outside_border();
        self.prepare_pixel_engine();

        // First of the five DRAM refreshes.
        if pal {
            self.s_finalize(7);
            self.pixel_engine.load_shift_register(7);
        }
        self.r_access(mem);

        self.set_ba_low(false);

        self.update_display_state();
        self.count_x();
    }

    fn cycle12(&mut self, mem: &C64Memory) {
        self.check_vertical_frame_ff();

        self.pixel_engine.draw_outside_border();
        self.prepare_pixel_engine();

        self.r_access(mem);

        // A bad line pulls BA low three cycles ahead of the character
        // fetch window.
        self.set_ba_low(self.bad_line);

        self.update_display_state();
        self.count_x();
    }

    fn cycle13(&mut self, mem: &C64Memory) {
        self.check_vertical_frame_ff();

        self.pixel_engine.draw_outside_border();
        self.prepare_pixel_engine();

        self.r_access(mem);

        self.set_ba_low(self.bad_line);

        self.update_display_state();
        self.p.x_counter = 0;
    }

    fn cycle14(&mut self, mem: &C64Memory) {
        self.check_vertical_frame_ff();

        self.pixel_engine.visible_column = true;
        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        self.r_access(mem);

        // VC reloads from VCBASE, VMLI clears; bad lines reset RC.
        self.vc = self.vc_base;
        self.vmli = 0;
        if self.bad_line {
            self.rc = 0;
        }

        self.set_ba_low(self.bad_line);

        self.update_display_state();
        self.count_x();
    }

    fn cycle15(&mut self, mem: &C64Memory, cpu_pc: u16) {
        self.check_vertical_frame_ff();

        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        self.r_access(mem);

        self.set_ba_low(self.bad_line);

        self.c_access(mem, cpu_pc);

        self.cleared_bits_d017 = 0;
        self.update_display_state();
        self.count_x();
    }

    fn cycle16(&mut self, mem: &C64Memory, cpu_pc: u16) {
        self.check_vertical_frame_ff();

        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        self.g_access(mem);

        self.turn_sprite_dma_off();

        self.set_ba_low(self.bad_line);

        self.c_access(mem, cpu_pc);

        self.update_display_state();
        self.count_x();
    }

    fn cycle17(&mut self, mem: &C64Memory, cpu_pc: u16) {
        self.check_vertical_frame_ff();
        self.check_frame_flipflops_left(24);

        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        self.g_access(mem);

        self.set_ba_low(self.bad_line);

        self.c_access(mem, cpu_pc);

        self.update_display_state();
        self.count_x();
    }

    fn cycle18(&mut self, mem: &C64Memory, cpu_pc: u16) {
        self.check_vertical_frame_ff();
        self.check_frame_flipflops_left(31);

        self.pixel_engine.sr.can_load = true;
        let main_ff_now = self.p.main_frame_ff;
        self.pixel_engine.draw17(main_ff_now);
        self.prepare_pixel_engine();

        self.g_access(mem);

        self.set_ba_low(self.bad_line);

        self.c_access(mem, cpu_pc);

        self.update_display_state();
        self.count_x();
    }

    fn cycle19to54(&mut self, mem: &C64Memory, cpu_pc: u16) {
        self.check_vertical_frame_ff();

        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        self.g_access(mem);

        self.set_ba_low(self.bad_line);

        self.c_access(mem, cpu_pc);

        self.update_display_state();
        self.count_x();
    }

    fn cycle55(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        self.g_access(mem);

        self.turn_sprite_dma_on();

        if pal {
            self.set_ba_low(self.sprite_dma_on & SPR0 != 0);
        } else {
            self.set_ba_low(false);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle56(&mut self, mem: &C64Memory) {
        self.check_vertical_frame_ff();
        self.check_frame_flipflops_right(335);

        let main_ff_now = self.p.main_frame_ff;
        self.pixel_engine.draw55(main_ff_now);
        self.prepare_pixel_engine();

        self.r_idle_access(mem);

        self.turn_sprite_dma_on();
        self.toggle_expansion_flipflop();

        self.set_ba_low(self.sprite_dma_on & SPR0 != 0);

        self.update_display_state();
        self.count_x();
    }

    fn cycle57(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();
        self.check_frame_flipflops_right(344);

        self.pixel_engine.draw();
        self.prepare_pixel_engine();
        self.pixel_engine.sr.can_load = false;

        self.r_idle_access(mem);

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR0 | SPR1) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & SPR0 != 0);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle58(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        if pal {
            self.p_access(mem, 0);
        } else {
            self.r_idle_access(mem);
        }

        // Sprite display evaluation: MC reloads from MCBASE, display
        // turns on for DMA sprites with a matching Y coordinate and off
        // for sprites that lost DMA.
        for i in 0..8 {
            self.mc[i] = self.mc_base[i];
        }
        self.sprite_on |=
            self.sprite_dma_on & self.iomem[0x15] & self.compare_sprite_y(self.y_counter as u8);
        self.sprite_on &= self.sprite_dma_on;

        // RC == 7 ends the row: VCBASE latches VC and the video logic
        // goes idle unless a bad line keeps it in display state.
        if self.rc == 7 {
            self.vc_base = self.vc;
            if !self.bad_line {
                self.display_state = false;
            }
        }
        self.update_display_state();
        if self.display_state {
            self.rc = (self.rc + 1) & 0x07;
        }

        self.set_ba_low(self.sprite_dma_on & (SPR0 | SPR1) != 0);

        if pal {
            self.s_first_access(mem, 0);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle59(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        if pal {
            self.s_second_access(mem, 0);
        } else {
            self.p_access(mem, 0);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR0 | SPR1 | SPR2) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR0 | SPR1) != 0);
        }

        if pal {
            self.s_third_access(mem, 0);
        } else {
            self.s_first_access(mem, 0);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle60(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        self.pixel_engine.draw();
        self.prepare_pixel_engine();

        if pal {
            self.s_finalize(0);
            self.p_access(mem, 1);
        } else {
            self.s_second_access(mem, 0);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR1 | SPR2) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR0 | SPR1 | SPR2) != 0);
        }

        if pal {
            self.s_first_access(mem, 1);
        } else {
            self.s_third_access(mem, 0);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle61(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        self.pixel_engine.draw();
        self.pixel_engine.visible_column = false;

        if pal {
            self.s_second_access(mem, 1);
        } else {
            self.s_finalize(0);
            self.p_access(mem, 1);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR1 | SPR2 | SPR3) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR1 | SPR2) != 0);
        }

        if pal {
            self.s_third_access(mem, 1);
        } else {
            self.s_first_access(mem, 1);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle62(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();

        if pal {
            self.s_finalize(1);
            self.pixel_engine.load_shift_register(1);
            self.p_access(mem, 2);
        } else {
            self.s_second_access(mem, 1);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR2 | SPR3) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR1 | SPR2 | SPR3) != 0);
        }

        if pal {
            self.s_first_access(mem, 2);
        } else {
            self.s_third_access(mem, 1);
        }

        self.update_display_state();
        self.count_x();
    }

    fn cycle63(&mut self, mem: &C64Memory) {
        let pal = self.model.is_pal();
        self.check_vertical_frame_ff();
        if pal {
            self.y_equals_irq_line = self.y_counter == self.raster_irq_line();
        }

        if pal {
            self.s_second_access(mem, 2);
        } else {
            self.s_finalize(1);
            self.pixel_engine.load_shift_register(1);
            self.p_access(mem, 2);
        }

        if pal {
            self.set_ba_low(self.sprite_dma_on & (SPR2 | SPR3 | SPR4) != 0);
        } else {
            self.set_ba_low(self.sprite_dma_on & (SPR2 | SPR3) != 0);
        }

        if pal {
            self.s_third_access(mem, 2);
        } else {
            self.s_first_access(mem, 2);
        }

        self.update_display_state();
        self.count_x();
    }

    /// NTSC only.
    fn cycle64(&mut self, mem: &C64Memory) {
        self.check_vertical_frame_ff();

        self.s_second_access(mem, 2);

        self.set_ba_low(self.sprite_dma_on & (SPR2 | SPR3 | SPR4) != 0);

        self.s_third_access(mem, 2);

        self.update_display_state();
        self.count_x();
    }

    /// NTSC only.
    fn cycle65(&mut self, mem: &C64Memory) {
        self.check_vertical_frame_ff();
        self.y_equals_irq_line = self.y_counter == self.raster_irq_line();

        self.s_finalize(2);
        self.pixel_engine.load_shift_register(2);
        self.p_access(mem, 3);

        self.set_ba_low(self.sprite_dma_on & (SPR3 | SPR4) != 0);

        self.s_first_access(mem, 3);

        self.update_display_state();
        self.count_x();
    }

    // ------------------------------------------------------------------
    // Register interface
    // ------------------------------------------------------------------

    /// Read a register with side effects (collision clear-on-read).
    pub fn read(&mut self, reg: u8) -> u8 {
        match reg & 0x3F {
            0x1E => {
                let result = self.iomem[0x1E];
                self.iomem[0x1E] = 0;
                result
            }
            0x1F => {
                let result = self.iomem[0x1F];
                self.iomem[0x1F] = 0;
                result
            }
            r => self.peek(r),
        }
    }

    /// Observational register read, no side effects.
    #[must_use]
    pub fn peek(&self, reg: u8) -> u8 {
        match reg & 0x3F {
            0x11 => (self.p.ctrl1 & 0x7F) | if self.y_counter > 0xFF { 0x80 } else { 0 },
            0x12 => self.y_counter as u8,
            0x16 => self.p.ctrl2 | 0xC0,
            0x18 => self.iomem[0x18] | 0x01,
            0x19 => self.iomem[0x19] | 0x70,
            0x1A => self.iomem[0x1A] | 0xF0,
            0x1D => self.p.sprite_x_expand,
            0x20 => self.bp.border_color | 0xF0,
            r @ 0x21..=0x24 => self.cp.background_color[(r - 0x21) as usize] | 0xF0,
            0x25 => self.sp.extra_color1 | 0xF0,
            0x26 => self.sp.extra_color2 | 0xF0,
            r @ 0x27..=0x2E => self.sp.sprite_color[(r - 0x27) as usize] | 0xF0,
            0x2F..=0x3F => 0xFF,
            r => self.iomem[r as usize],
        }
    }

    /// Write a register.
    pub fn write(&mut self, reg: u8, value: u8) {
        let r = reg & 0x3F;
        match r {
            // Sprite X low bytes keep their bit 8 from $D010.
            0x00 | 0x02 | 0x04 | 0x06 | 0x08 | 0x0A | 0x0C | 0x0E => {
                let nr = (r / 2) as usize;
                let high = u16::from(self.iomem[0x10] >> nr & 0x01) << 8;
                self.p.sprite_x[nr] = u16::from(value) | high;
                self.iomem[r as usize] = value;
            }
            0x10 => {
                self.iomem[0x10] = value;
                for nr in 0..8 {
                    let high = u16::from(value >> nr & 0x01) << 8;
                    self.p.sprite_x[nr] = (self.p.sprite_x[nr] & 0x00FF) | high;
                }
            }
            0x11 => {
                let changed_irq_bit = (self.p.ctrl1 ^ value) & 0x80 != 0;
                self.p.ctrl1 = value;
                if changed_irq_bit && self.y_counter == self.raster_irq_line() {
                    self.trigger_irq(IRQ_RASTER);
                }
                // The DEN latch can be set during any cycle of line $30.
                if self.y_counter == 0x30 && value & 0x10 != 0 {
                    self.den_in_30 = true;
                }
                // YSCROLL changes affect the bad line condition mid-line.
                self.update_bad_line_condition();
            }
            0x12 => {
                let changed = self.iomem[0x12] != value;
                self.iomem[0x12] = value;
                if changed && self.y_counter == self.raster_irq_line() {
                    self.trigger_irq(IRQ_RASTER);
                }
            }
            0x16 => self.p.ctrl2 = value,
            0x17 => {
                self.iomem[0x17] = value;
                self.cleared_bits_d017 = !value & !self.expansion_ff;
                // The expansion flipflop is set while the stretch bit is
                // cleared.
                self.expansion_ff |= !value;
            }
            0x19 => {
                // Acknowledge by writing ones.
                self.iomem[0x19] &= !value & 0x0F;
                if self.iomem[0x19] & self.iomem[0x1A] & 0x0F != 0 {
                    self.iomem[0x19] |= 0x80;
                }
            }
            0x1A => {
                self.iomem[0x1A] = value & 0x0F;
                if self.iomem[0x19] & self.iomem[0x1A] & 0x0F != 0 {
                    self.iomem[0x19] |= 0x80;
                } else {
                    self.iomem[0x19] &= 0x7F;
                }
            }
            0x1D => self.p.sprite_x_expand = value,
            // Collision registers ignore writes.
            0x1E | 0x1F => {}
            0x20 => self.bp.border_color = value & 0x0F,
            0x21..=0x24 => self.cp.background_color[(r - 0x21) as usize] = value & 0x0F,
            0x25 => self.sp.extra_color1 = value & 0x0F,
            0x26 => self.sp.extra_color2 = value & 0x0F,
            0x27..=0x2E => self.sp.sprite_color[(r - 0x27) as usize] = value & 0x0F,
            _ => self.iomem[r as usize] = value,
        }
    }

    // ------------------------------------------------------------------
    // Machine interface
    // ------------------------------------------------------------------

    /// Select the 16K memory bank (start address) seen by the VIC.
    pub fn set_bank_addr(&mut self, addr: u16) {
        debug_assert!(addr % 0x4000 == 0);
        self.bank_addr = addr;
    }

    #[must_use]
    pub fn bank_addr(&self) -> u16 {
        self.bank_addr
    }

    /// The stable screen buffer (RGBA32).
    #[must_use]
    pub fn screen_buffer(&self) -> &[u32] {
        self.pixel_engine.screen_buffer()
    }

    /// Check and clear the frame completion flag.
    pub fn take_frame_complete(&mut self) -> bool {
        let done = self.frame_complete;
        self.frame_complete = false;
        done
    }

    #[must_use]
    pub fn raster_line(&self) -> u16 {
        self.raster_line
    }

    #[must_use]
    pub fn raster_cycle(&self) -> u8 {
        self.raster_cycle
    }

    #[must_use]
    pub fn y_counter(&self) -> u16 {
        self.y_counter
    }

    #[must_use]
    pub fn is_bad_line(&self) -> bool {
        self.bad_line
    }

    #[must_use]
    pub fn vc(&self) -> u16 {
        self.vc
    }

    #[must_use]
    pub fn rc(&self) -> u8 {
        self.rc
    }

    #[must_use]
    pub fn vmli(&self) -> u8 {
        self.vmli
    }

    #[must_use]
    pub fn mc(&self, sprite: usize) -> u8 {
        self.mc[sprite]
    }

    #[must_use]
    pub fn mc_base(&self, sprite: usize) -> u8 {
        self.mc_base[sprite]
    }

    #[must_use]
    pub fn sprite_dma_on(&self) -> u8 {
        self.sprite_dma_on
    }

    /// Last value seen on the VIC data bus.
    #[must_use]
    pub fn data_bus(&self) -> u8 {
        self.data_bus
    }

    /// Refresh accesses performed in the current line (debug).
    #[must_use]
    pub fn r_accesses_this_line(&self) -> u8 {
        self.r_accesses_this_line
    }

    /// Character accesses performed in the current line (debug).
    #[must_use]
    pub fn c_accesses_this_line(&self) -> u8 {
        self.c_accesses_this_line
    }
}

impl Snapshotable for Vic {
    fn reset(&mut self) {
        let model = self.model;
        *self = Self::new(model);
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.put_bytes(&self.iomem);
        self.pixel_engine.save_state(w);
        w.put_u8(self.bp.border_color);
        w.put_bytes(&self.cp.background_color);
        w.put_bytes(&self.sp.sprite_color);
        w.put_u8(self.sp.extra_color1);
        w.put_u8(self.sp.extra_color2);

        w.put_u16(self.p.x_counter as u16);
        w.put_u8(self.p.ctrl1);
        w.put_u8(self.p.ctrl2);
        w.put_u8(self.p.g_data);
        w.put_u8(self.p.g_character);
        w.put_u8(self.p.g_color);
        w.put_bool(self.p.main_frame_ff);
        w.put_bool(self.p.vertical_frame_ff);
        for x in self.p.sprite_x {
            w.put_u16(x);
        }
        w.put_u8(self.p.sprite_x_expand);

        w.put_u16(self.raster_line);
        w.put_u8(self.raster_cycle);
        w.put_u16(self.y_counter);
        w.put_bool(self.y_equals_irq_line);
        w.put_u16(self.vc);
        w.put_u16(self.vc_base);
        w.put_u8(self.rc);
        w.put_u8(self.vmli);
        w.put_bytes(&self.character_space);
        w.put_bytes(&self.color_space);
        w.put_u8(self.refresh_counter);
        w.put_u16(self.addr_bus);
        w.put_u8(self.data_bus);
        w.put_u16(self.bank_addr);
        w.put_bool(self.bad_line);
        w.put_bool(self.den_in_30);
        w.put_bool(self.display_state);
        w.put_bool(self.ba_low);
        w.put_u64(self.ba_went_low_at);
        w.put_bool(self.vertical_ff_set_cond);
        w.put_bool(self.vertical_ff_clear_cond);
        w.put_bool(self.vblank);
        w.put_bytes(&self.mc);
        w.put_bytes(&self.mc_base);
        for ptr in self.sprite_ptr {
            w.put_u16(ptr);
        }
        w.put_u8(self.sprite_on);
        w.put_u8(self.sprite_dma_on);
        w.put_u8(self.expansion_ff);
        w.put_u8(self.cleared_bits_d017);
        w.put_u8(self.is_first_dma);
        w.put_u8(self.is_second_dma);
        w.put_bool(self.lightpen_irq_occurred);
        w.put_u64(self.clock);
        w.put_bool(self.frame_complete);
        w.put_u8(self.r_accesses_this_line);
        w.put_u8(self.c_accesses_this_line);
    }

    fn load_state(&mut self, r: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        r.get_bytes(&mut self.iomem)?;
        self.pixel_engine.load_state(r)?;
        self.bp.border_color = r.get_u8()?;
        r.get_bytes(&mut self.cp.background_color)?;
        r.get_bytes(&mut self.sp.sprite_color)?;
        self.sp.extra_color1 = r.get_u8()?;
        self.sp.extra_color2 = r.get_u8()?;

        self.p.x_counter = r.get_u16()? as i16;
        self.p.ctrl1 = r.get_u8()?;
        self.p.ctrl2 = r.get_u8()?;
        self.p.g_data = r.get_u8()?;
        self.p.g_character = r.get_u8()?;
        self.p.g_color = r.get_u8()?;
        self.p.main_frame_ff = r.get_bool()?;
        self.p.vertical_frame_ff = r.get_bool()?;
        for x in &mut self.p.sprite_x {
            *x = r.get_u16()?;
        }
        self.p.sprite_x_expand = r.get_u8()?;

        self.raster_line = r.get_u16()?;
        self.raster_cycle = r.get_u8()?;
        self.y_counter = r.get_u16()?;
        self.y_equals_irq_line = r.get_bool()?;
        self.vc = r.get_u16()?;
        self.vc_base = r.get_u16()?;
        self.rc = r.get_u8()?;
        self.vmli = r.get_u8()?;
        r.get_bytes(&mut self.character_space)?;
        r.get_bytes(&mut self.color_space)?;
        self.refresh_counter = r.get_u8()?;
        self.addr_bus = r.get_u16()?;
        self.data_bus = r.get_u8()?;
        self.bank_addr = r.get_u16()?;
        self.bad_line = r.get_bool()?;
        self.den_in_30 = r.get_bool()?;
        self.display_state = r.get_bool()?;
        self.ba_low = r.get_bool()?;
        self.ba_went_low_at = r.get_u64()?;
        self.vertical_ff_set_cond = r.get_bool()?;
        self.vertical_ff_clear_cond = r.get_bool()?;
        self.vblank = r.get_bool()?;
        r.get_bytes(&mut self.mc)?;
        r.get_bytes(&mut self.mc_base)?;
        for ptr in &mut self.sprite_ptr {
            *ptr = r.get_u16()?;
        }
        self.sprite_on = r.get_u8()?;
        self.sprite_dma_on = r.get_u8()?;
        self.expansion_ff = r.get_u8()?;
        self.cleared_bits_d017 = r.get_u8()?;
        self.is_first_dma = r.get_u8()?;
        self.is_second_dma = r.get_u8()?;
        self.lightpen_irq_occurred = r.get_bool()?;
        self.clock = r.get_u64()?;
        self.frame_complete = r.get_bool()?;
        self.r_accesses_this_line = r.get_u8()?;
        self.c_accesses_this_line = r.get_u8()?;
        Ok(())
    }

    fn dump_state(&self) -> String {
        format!(
            "line={} cycle={} y={} VC={:03X} VCBASE={:03X} RC={} VMLI={} bad_line={} \
             display={} BA={} sprite_dma={:02X} sprite_on={:02X}",
            self.raster_line,
            self.raster_cycle,
            self.y_counter,
            self.vc,
            self.vc_base,
            self.rc,
            self.vmli,
            self.bad_line,
            self.display_state,
            if self.ba_low { "low" } else { "high" },
            self.sprite_dma_on,
            self.sprite_on,
        )
    }
}
