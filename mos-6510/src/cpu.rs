//! 6510 CPU implementation.
//!
//! Cycle-accurate emulation where each `tick()` performs exactly one
//! bus access. Instructions are broken down into their component cycles;
//! the cycle index within the current instruction is the micro-step.
//!
//! # RDY line
//!
//! The VIC-II pulls RDY low when it needs the bus. A low RDY freezes the
//! CPU on read cycles: the same micro-step repeats until RDY rises again.
//! Write cycles are never stalled. Every read cycle therefore starts with
//! the stallable [`Mos6510::read`] helper and returns early on a stall,
//! leaving all micro-state untouched.
//!
//! # Interrupt lines
//!
//! Both interrupt lines are bitmasks, one bit per asserting source. The
//! IRQ line is level-triggered and honored when the I flag is clear and
//! the line has been asserted for at least two cycles. The NMI line is
//! edge-triggered: the 0-to-nonzero transition latches a pending NMI.
//! A hardware reset is modeled as an NMI from the reset source, which
//! redirects the interrupt vector to $FFFC.

use machine_core::{Bus, SnapshotError, SnapshotReader, SnapshotWriter, Snapshotable};

use crate::flags::{C, D, I, N, V, Z};
use crate::{Registers, NMI_SOURCE_RESET};

/// NMI vector address.
const VECTOR_NMI: u16 = 0xFFFA;
/// Reset vector address.
const VECTOR_RESET: u16 = 0xFFFC;
/// IRQ/BRK vector address.
const VECTOR_IRQ: u16 = 0xFFFE;

/// Hard breakpoint tag bit: execution halts.
const HARD_BREAKPOINT: u8 = 0x01;
/// Soft breakpoint tag bit: execution halts and the tag is deleted.
const SOFT_BREAKPOINT: u8 = 0x02;

/// Internal state tracking instruction execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Fetching the next opcode byte.
    FetchOpcode,
    /// Executing instruction cycles.
    Execute,
}

/// Flavor of the 7-cycle break/interrupt sequence in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntKind {
    Brk,
    Irq,
    Nmi,
}

/// Error states of the CPU.
///
/// `Ok` indicates normal operation. Reaching a breakpoint or decoding an
/// unstable opcode moves the CPU into one of the other states; `tick()`
/// then does nothing until [`Mos6510::clear_error_state`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorState {
    Ok,
    SoftBreakpointReached,
    HardBreakpointReached,
    IllegalInstruction,
}

/// The MOS 6510 CPU.
pub struct Mos6510 {
    /// CPU registers.
    pub regs: Registers,

    /// Current execution state.
    state: State,

    /// Current opcode being executed.
    opcode: u8,

    /// Current cycle within the instruction (0 = opcode fetch).
    cycle: u8,

    /// Temporary address register for addressing modes.
    addr: u16,

    /// Temporary data register (doubles as the page-cross marker).
    data: u8,

    /// Pointer for indirect addressing.
    pointer: u8,

    /// Address of the currently executed instruction (for disassembly).
    pc_at_cycle_0: u16,

    /// RDY line. When low, read cycles stall.
    rdy: bool,

    /// IRQ line: bitmask of asserting sources (CIA, VIC, VIA, ATN).
    irq_line: u8,

    /// NMI line: bitmask of asserting sources.
    nmi_line: u8,

    /// Latched NMI edge (0-to-nonzero transition of the NMI line).
    nmi_edge: bool,

    /// Vector the latched NMI will use ($FFFA, or $FFFC for reset).
    nmi_vector: u16,

    /// Earliest cycle at which a pending IRQ may be taken.
    next_irq_cycle: u64,

    /// Earliest cycle at which a pending NMI may be taken.
    next_nmi_cycle: u64,

    /// Value of the I flag before the last SEI/CLI/PLP.
    old_i: bool,

    /// When set, the next interrupt decision observes `old_i` instead of
    /// the current I flag (an interrupt arriving together with SEI is
    /// still taken).
    i_stale: bool,

    /// Interrupt flavor for the break sequence in progress.
    int_kind: IntKind,

    /// Current error state.
    error_state: ErrorState,

    /// Skip the breakpoint check once after resuming.
    ignore_breakpoint: bool,

    /// Breakpoint tag for each memory address.
    breakpoints: Box<[u8; 0x10000]>,

    /// Ring buffer of JSR target addresses (debug only).
    call_stack: [u16; 256],

    /// Next free call stack slot.
    call_sp: u8,

    /// Total cycles executed.
    total_cycles: u64,
}

impl Default for Mos6510 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mos6510 {
    /// Create a new 6510 in reset state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            state: State::FetchOpcode,
            opcode: 0,
            cycle: 0,
            addr: 0,
            data: 0,
            pointer: 0,
            pc_at_cycle_0: 0,
            rdy: true,
            irq_line: 0,
            nmi_line: 0,
            nmi_edge: false,
            nmi_vector: VECTOR_NMI,
            next_irq_cycle: 0,
            next_nmi_cycle: 0,
            old_i: false,
            i_stale: false,
            int_kind: IntKind::Brk,
            error_state: ErrorState::Ok,
            ignore_breakpoint: false,
            breakpoints: Box::new([0; 0x10000]),
            call_stack: [0; 256],
            call_sp: 0,
            total_cycles: 0,
        }
    }

    // ========================================================================
    // Lines and external state
    // ========================================================================

    /// Drive the RDY line. Low (`false`) stalls read cycles.
    pub fn set_rdy(&mut self, high: bool) {
        self.rdy = high;
    }

    /// Current state of the RDY line.
    #[must_use]
    pub fn rdy(&self) -> bool {
        self.rdy
    }

    /// Assert a source bit on the IRQ line.
    pub fn set_irq_source(&mut self, bit: u8) {
        if self.irq_line == 0 && bit != 0 {
            // A fresh assertion must be held for two cycles before it is
            // honored at the next instruction boundary.
            self.next_irq_cycle = self.total_cycles + 2;
        }
        self.irq_line |= bit;
    }

    /// Release a source bit on the IRQ line.
    pub fn clear_irq_source(&mut self, bit: u8) {
        self.irq_line &= !bit;
    }

    /// Current IRQ line bitmask.
    #[must_use]
    pub fn irq_line(&self) -> u8 {
        self.irq_line
    }

    /// Assert a source bit on the NMI line. The 0-to-nonzero transition
    /// latches a pending NMI; the reset source selects the $FFFC vector.
    pub fn set_nmi_source(&mut self, bit: u8) {
        if self.nmi_line == 0 && bit != 0 {
            self.nmi_edge = true;
            // A reset takes effect at the next instruction boundary; a
            // regular NMI must be held for two cycles first.
            if bit & NMI_SOURCE_RESET != 0 {
                self.next_nmi_cycle = self.total_cycles;
                self.nmi_vector = VECTOR_RESET;
            } else {
                self.next_nmi_cycle = self.total_cycles + 2;
                self.nmi_vector = VECTOR_NMI;
            }
        }
        self.nmi_line |= bit;
    }

    /// Release a source bit on the NMI line.
    pub fn clear_nmi_source(&mut self, bit: u8) {
        self.nmi_line &= !bit;
    }

    /// Current NMI line bitmask.
    #[must_use]
    pub fn nmi_line(&self) -> u8 {
        self.nmi_line
    }

    /// Total cycles executed since power-on.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Address of the instruction currently executing.
    #[must_use]
    pub fn pc_at_cycle_0(&self) -> u16 {
        self.pc_at_cycle_0
    }

    /// True iff the next cycle is the first cycle of an instruction.
    #[must_use]
    pub fn at_instruction_start(&self) -> bool {
        self.state == State::FetchOpcode
    }

    /// Opcode of the instruction currently executing.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    // ========================================================================
    // Error state and breakpoints
    // ========================================================================

    /// Current error state.
    #[must_use]
    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }

    /// Return to normal operation. The breakpoint check is skipped once so
    /// that execution can step past the halting address.
    pub fn clear_error_state(&mut self) {
        self.error_state = ErrorState::Ok;
        self.ignore_breakpoint = true;
    }

    /// Breakpoint tag at the given address.
    #[must_use]
    pub fn breakpoint_tag(&self, addr: u16) -> u8 {
        self.breakpoints[addr as usize]
    }

    pub fn set_hard_breakpoint(&mut self, addr: u16) {
        self.breakpoints[addr as usize] |= HARD_BREAKPOINT;
    }

    pub fn delete_hard_breakpoint(&mut self, addr: u16) {
        self.breakpoints[addr as usize] &= !HARD_BREAKPOINT;
    }

    pub fn set_soft_breakpoint(&mut self, addr: u16) {
        self.breakpoints[addr as usize] |= SOFT_BREAKPOINT;
    }

    pub fn delete_soft_breakpoint(&mut self, addr: u16) {
        self.breakpoints[addr as usize] &= !SOFT_BREAKPOINT;
    }

    /// Most recent JSR target, if any call has been recorded.
    #[must_use]
    pub fn call_stack_top(&self) -> Option<u16> {
        if self.call_sp == 0 {
            None
        } else {
            Some(self.call_stack[(self.call_sp - 1) as usize])
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute one CPU cycle.
    pub fn tick<Bu: Bus>(&mut self, bus: &mut Bu) {
        if self.error_state != ErrorState::Ok {
            return;
        }
        self.total_cycles += 1;

        match self.state {
            State::FetchOpcode => self.fetch(bus),
            State::Execute => self.execute_instruction(bus),
        }
    }

    /// Stallable bus read. Returns `None` when RDY is low; the caller must
    /// return without touching any micro-state so the cycle repeats.
    fn read<Bu: Bus>(&mut self, bus: &mut Bu, addr: u16) -> Option<u8> {
        if !self.rdy {
            return None;
        }
        Some(bus.read(addr))
    }

    /// Push a byte on the stack. Write cycles are not stalled by RDY.
    fn push<Bu: Bus>(&mut self, bus: &mut Bu, value: u8) {
        bus.write(0x0100 | u16::from(self.regs.sp), value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    fn finish(&mut self) {
        self.state = State::FetchOpcode;
        self.cycle = 0;
    }

    /// Fetch cycle: breakpoint check, interrupt sampling, opcode fetch.
    fn fetch<Bu: Bus>(&mut self, bus: &mut Bu) {
        let pc = self.regs.pc;

        if !self.ignore_breakpoint {
            let tag = self.breakpoints[pc as usize];
            if tag & HARD_BREAKPOINT != 0 {
                self.error_state = ErrorState::HardBreakpointReached;
                return;
            }
            if tag & SOFT_BREAKPOINT != 0 {
                self.breakpoints[pc as usize] &= !SOFT_BREAKPOINT;
                self.error_state = ErrorState::SoftBreakpointReached;
                return;
            }
        }

        let Some(byte) = self.read(bus, pc) else { return };
        self.ignore_breakpoint = false;

        // An interrupt decision made in the same boundary as SEI/CLI/PLP
        // observes the I flag value from before the flag change.
        let blocked = if self.i_stale {
            self.old_i
        } else {
            self.regs.p.is_set(I)
        };
        self.i_stale = false;

        if self.nmi_edge && self.total_cycles >= self.next_nmi_cycle {
            self.nmi_edge = false;
            self.int_kind = IntKind::Nmi;
            self.opcode = 0x00;
            self.addr = self.nmi_vector;
            self.cycle = 1;
            self.state = State::Execute;
            return;
        }

        if self.irq_line != 0 && !blocked && self.total_cycles >= self.next_irq_cycle {
            self.int_kind = IntKind::Irq;
            self.opcode = 0x00;
            self.addr = VECTOR_IRQ;
            self.cycle = 1;
            self.state = State::Execute;
            return;
        }

        self.pc_at_cycle_0 = pc;
        self.opcode = byte;
        self.int_kind = IntKind::Brk;
        self.regs.pc = pc.wrapping_add(1);
        self.cycle = 1;
        self.state = State::Execute;
    }

    /// Execute one cycle of the current instruction.
    #[allow(clippy::too_many_lines)]
    fn execute_instruction<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.opcode {
            // BRK - 7 cycles (shared with the IRQ/NMI sequences)
            0x00 => self.op_brk(bus),

            // ORA
            0x01 => self.addr_izx(bus, Self::do_ora),
            0x05 => self.addr_zp(bus, Self::do_ora),
            0x09 => self.addr_imm(bus, Self::do_ora),
            0x0D => self.addr_abs(bus, Self::do_ora),
            0x11 => self.addr_izy(bus, Self::do_ora),
            0x15 => self.addr_zpx(bus, Self::do_ora),
            0x19 => self.addr_aby(bus, Self::do_ora),
            0x1D => self.addr_abx(bus, Self::do_ora),

            // ASL
            0x06 => self.addr_zp_rmw(bus, Self::do_asl),
            0x0A => self.op_implied(bus, |c| {
                let r = c.do_asl(c.regs.a);
                c.regs.a = r;
            }),
            0x0E => self.addr_abs_rmw(bus, Self::do_asl),
            0x16 => self.addr_zpx_rmw(bus, Self::do_asl),
            0x1E => self.addr_abx_rmw(bus, Self::do_asl),

            // Stack and flags
            0x08 => self.op_php(bus),
            0x18 => self.op_implied(bus, |c| c.regs.p.clear(C)),
            0x28 => self.op_plp(bus),
            0x38 => self.op_implied(bus, |c| c.regs.p.set(C)),
            0x48 => self.op_pha(bus),
            0x58 => self.op_implied(bus, |c| {
                c.old_i = c.regs.p.is_set(I);
                c.i_stale = true;
                c.regs.p.clear(I);
            }),
            0x68 => self.op_pla(bus),
            0x78 => self.op_implied(bus, |c| {
                c.old_i = c.regs.p.is_set(I);
                c.i_stale = true;
                c.regs.p.set(I);
            }),
            0xB8 => self.op_implied(bus, |c| c.regs.p.clear(V)),
            0xD8 => self.op_implied(bus, |c| c.regs.p.clear(D)),
            0xF8 => self.op_implied(bus, |c| c.regs.p.set(D)),

            // Branches
            0x10 => self.op_branch(bus, !self.regs.p.is_set(N)),
            0x30 => self.op_branch(bus, self.regs.p.is_set(N)),
            0x50 => self.op_branch(bus, !self.regs.p.is_set(V)),
            0x70 => self.op_branch(bus, self.regs.p.is_set(V)),
            0x90 => self.op_branch(bus, !self.regs.p.is_set(C)),
            0xB0 => self.op_branch(bus, self.regs.p.is_set(C)),
            0xD0 => self.op_branch(bus, !self.regs.p.is_set(Z)),
            0xF0 => self.op_branch(bus, self.regs.p.is_set(Z)),

            // JSR / RTS / RTI / JMP
            0x20 => self.op_jsr(bus),
            0x40 => self.op_rti(bus),
            0x4C => self.op_jmp_abs(bus),
            0x60 => self.op_rts(bus),
            0x6C => self.op_jmp_ind(bus),

            // AND
            0x21 => self.addr_izx(bus, Self::do_and),
            0x25 => self.addr_zp(bus, Self::do_and),
            0x29 => self.addr_imm(bus, Self::do_and),
            0x2D => self.addr_abs(bus, Self::do_and),
            0x31 => self.addr_izy(bus, Self::do_and),
            0x35 => self.addr_zpx(bus, Self::do_and),
            0x39 => self.addr_aby(bus, Self::do_and),
            0x3D => self.addr_abx(bus, Self::do_and),

            // BIT
            0x24 => self.addr_zp(bus, Self::do_bit),
            0x2C => self.addr_abs(bus, Self::do_bit),

            // ROL
            0x26 => self.addr_zp_rmw(bus, Self::do_rol),
            0x2A => self.op_implied(bus, |c| {
                let r = c.do_rol(c.regs.a);
                c.regs.a = r;
            }),
            0x2E => self.addr_abs_rmw(bus, Self::do_rol),
            0x36 => self.addr_zpx_rmw(bus, Self::do_rol),
            0x3E => self.addr_abx_rmw(bus, Self::do_rol),

            // EOR
            0x41 => self.addr_izx(bus, Self::do_eor),
            0x45 => self.addr_zp(bus, Self::do_eor),
            0x49 => self.addr_imm(bus, Self::do_eor),
            0x4D => self.addr_abs(bus, Self::do_eor),
            0x51 => self.addr_izy(bus, Self::do_eor),
            0x55 => self.addr_zpx(bus, Self::do_eor),
            0x59 => self.addr_aby(bus, Self::do_eor),
            0x5D => self.addr_abx(bus, Self::do_eor),

            // LSR
            0x46 => self.addr_zp_rmw(bus, Self::do_lsr),
            0x4A => self.op_implied(bus, |c| {
                let r = c.do_lsr(c.regs.a);
                c.regs.a = r;
            }),
            0x4E => self.addr_abs_rmw(bus, Self::do_lsr),
            0x56 => self.addr_zpx_rmw(bus, Self::do_lsr),
            0x5E => self.addr_abx_rmw(bus, Self::do_lsr),

            // ADC
            0x61 => self.addr_izx(bus, Self::do_adc),
            0x65 => self.addr_zp(bus, Self::do_adc),
            0x69 => self.addr_imm(bus, Self::do_adc),
            0x6D => self.addr_abs(bus, Self::do_adc),
            0x71 => self.addr_izy(bus, Self::do_adc),
            0x75 => self.addr_zpx(bus, Self::do_adc),
            0x79 => self.addr_aby(bus, Self::do_adc),
            0x7D => self.addr_abx(bus, Self::do_adc),

            // ROR
            0x66 => self.addr_zp_rmw(bus, Self::do_ror),
            0x6A => self.op_implied(bus, |c| {
                let r = c.do_ror(c.regs.a);
                c.regs.a = r;
            }),
            0x6E => self.addr_abs_rmw(bus, Self::do_ror),
            0x76 => self.addr_zpx_rmw(bus, Self::do_ror),
            0x7E => self.addr_abx_rmw(bus, Self::do_ror),

            // Stores
            0x81 => self.addr_izx_w(bus, |c| c.regs.a),
            0x84 => self.addr_zp_w(bus, |c| c.regs.y),
            0x85 => self.addr_zp_w(bus, |c| c.regs.a),
            0x86 => self.addr_zp_w(bus, |c| c.regs.x),
            0x8C => self.addr_abs_w(bus, |c| c.regs.y),
            0x8D => self.addr_abs_w(bus, |c| c.regs.a),
            0x8E => self.addr_abs_w(bus, |c| c.regs.x),
            0x91 => self.addr_izy_w(bus, |c| c.regs.a),
            0x94 => self.addr_zpx_w(bus, |c| c.regs.y),
            0x95 => self.addr_zpx_w(bus, |c| c.regs.a),
            0x96 => self.addr_zpy_w(bus, |c| c.regs.x),
            0x99 => self.addr_aby_w(bus, |c| c.regs.a),
            0x9D => self.addr_abx_w(bus, |c| c.regs.a),

            // Transfers
            0x88 => self.op_implied(bus, |c| {
                c.regs.y = c.regs.y.wrapping_sub(1);
                c.regs.p.update_nz(c.regs.y);
            }),
            0x8A => self.op_implied(bus, |c| {
                c.regs.a = c.regs.x;
                c.regs.p.update_nz(c.regs.a);
            }),
            0x98 => self.op_implied(bus, |c| {
                c.regs.a = c.regs.y;
                c.regs.p.update_nz(c.regs.a);
            }),
            0x9A => self.op_implied(bus, |c| c.regs.sp = c.regs.x),
            0xA8 => self.op_implied(bus, |c| {
                c.regs.y = c.regs.a;
                c.regs.p.update_nz(c.regs.y);
            }),
            0xAA => self.op_implied(bus, |c| {
                c.regs.x = c.regs.a;
                c.regs.p.update_nz(c.regs.x);
            }),
            0xBA => self.op_implied(bus, |c| {
                c.regs.x = c.regs.sp;
                c.regs.p.update_nz(c.regs.x);
            }),
            0xC8 => self.op_implied(bus, |c| {
                c.regs.y = c.regs.y.wrapping_add(1);
                c.regs.p.update_nz(c.regs.y);
            }),
            0xCA => self.op_implied(bus, |c| {
                c.regs.x = c.regs.x.wrapping_sub(1);
                c.regs.p.update_nz(c.regs.x);
            }),
            0xE8 => self.op_implied(bus, |c| {
                c.regs.x = c.regs.x.wrapping_add(1);
                c.regs.p.update_nz(c.regs.x);
            }),

            // Loads
            0xA0 => self.addr_imm(bus, Self::do_ldy),
            0xA1 => self.addr_izx(bus, Self::do_lda),
            0xA2 => self.addr_imm(bus, Self::do_ldx),
            0xA4 => self.addr_zp(bus, Self::do_ldy),
            0xA5 => self.addr_zp(bus, Self::do_lda),
            0xA6 => self.addr_zp(bus, Self::do_ldx),
            0xA9 => self.addr_imm(bus, Self::do_lda),
            0xAC => self.addr_abs(bus, Self::do_ldy),
            0xAD => self.addr_abs(bus, Self::do_lda),
            0xAE => self.addr_abs(bus, Self::do_ldx),
            0xB1 => self.addr_izy(bus, Self::do_lda),
            0xB4 => self.addr_zpx(bus, Self::do_ldy),
            0xB5 => self.addr_zpx(bus, Self::do_lda),
            0xB6 => self.addr_zpy(bus, Self::do_ldx),
            0xB9 => self.addr_aby(bus, Self::do_lda),
            0xBC => self.addr_abx(bus, Self::do_ldy),
            0xBD => self.addr_abx(bus, Self::do_lda),
            0xBE => self.addr_aby(bus, Self::do_ldx),

            // Compares
            0xC0 => self.addr_imm(bus, Self::do_cpy),
            0xC1 => self.addr_izx(bus, Self::do_cmp),
            0xC4 => self.addr_zp(bus, Self::do_cpy),
            0xC5 => self.addr_zp(bus, Self::do_cmp),
            0xC9 => self.addr_imm(bus, Self::do_cmp),
            0xCC => self.addr_abs(bus, Self::do_cpy),
            0xCD => self.addr_abs(bus, Self::do_cmp),
            0xD1 => self.addr_izy(bus, Self::do_cmp),
            0xD5 => self.addr_zpx(bus, Self::do_cmp),
            0xD9 => self.addr_aby(bus, Self::do_cmp),
            0xDD => self.addr_abx(bus, Self::do_cmp),
            0xE0 => self.addr_imm(bus, Self::do_cpx),
            0xE4 => self.addr_zp(bus, Self::do_cpx),
            0xEC => self.addr_abs(bus, Self::do_cpx),

            // DEC / INC
            0xC6 => self.addr_zp_rmw(bus, Self::do_dec),
            0xCE => self.addr_abs_rmw(bus, Self::do_dec),
            0xD6 => self.addr_zpx_rmw(bus, Self::do_dec),
            0xDE => self.addr_abx_rmw(bus, Self::do_dec),
            0xE6 => self.addr_zp_rmw(bus, Self::do_inc),
            0xEE => self.addr_abs_rmw(bus, Self::do_inc),
            0xF6 => self.addr_zpx_rmw(bus, Self::do_inc),
            0xFE => self.addr_abx_rmw(bus, Self::do_inc),

            // SBC (0xEB is the stable undocumented duplicate)
            0xE1 => self.addr_izx(bus, Self::do_sbc),
            0xE5 => self.addr_zp(bus, Self::do_sbc),
            0xE9 | 0xEB => self.addr_imm(bus, Self::do_sbc),
            0xED => self.addr_abs(bus, Self::do_sbc),
            0xF1 => self.addr_izy(bus, Self::do_sbc),
            0xF5 => self.addr_zpx(bus, Self::do_sbc),
            0xF9 => self.addr_aby(bus, Self::do_sbc),
            0xFD => self.addr_abx(bus, Self::do_sbc),

            // NOP - documented and the stable undocumented variants
            0xEA | 0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => self.op_implied(bus, |_| {}),
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => self.addr_imm(bus, Self::do_nop_read),
            0x04 | 0x44 | 0x64 => self.addr_zp(bus, Self::do_nop_read),
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => self.addr_zpx(bus, Self::do_nop_read),
            0x0C => self.addr_abs(bus, Self::do_nop_read),
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => self.addr_abx(bus, Self::do_nop_read),

            // Stable illegal opcodes
            0xA3 => self.addr_izx(bus, Self::do_lax),
            0xA7 => self.addr_zp(bus, Self::do_lax),
            0xAF => self.addr_abs(bus, Self::do_lax),
            0xB3 => self.addr_izy(bus, Self::do_lax),
            0xB7 => self.addr_zpy(bus, Self::do_lax),
            0xBF => self.addr_aby(bus, Self::do_lax),

            0x83 => self.addr_izx_w(bus, |c| c.regs.a & c.regs.x),
            0x87 => self.addr_zp_w(bus, |c| c.regs.a & c.regs.x),
            0x8F => self.addr_abs_w(bus, |c| c.regs.a & c.regs.x),
            0x97 => self.addr_zpy_w(bus, |c| c.regs.a & c.regs.x),

            0x03 => self.addr_izx_rmw(bus, Self::do_slo),
            0x07 => self.addr_zp_rmw(bus, Self::do_slo),
            0x0F => self.addr_abs_rmw(bus, Self::do_slo),
            0x13 => self.addr_izy_rmw(bus, Self::do_slo),
            0x17 => self.addr_zpx_rmw(bus, Self::do_slo),
            0x1B => self.addr_aby_rmw(bus, Self::do_slo),
            0x1F => self.addr_abx_rmw(bus, Self::do_slo),

            0x23 => self.addr_izx_rmw(bus, Self::do_rla),
            0x27 => self.addr_zp_rmw(bus, Self::do_rla),
            0x2F => self.addr_abs_rmw(bus, Self::do_rla),
            0x33 => self.addr_izy_rmw(bus, Self::do_rla),
            0x37 => self.addr_zpx_rmw(bus, Self::do_rla),
            0x3B => self.addr_aby_rmw(bus, Self::do_rla),
            0x3F => self.addr_abx_rmw(bus, Self::do_rla),

            0x43 => self.addr_izx_rmw(bus, Self::do_sre),
            0x47 => self.addr_zp_rmw(bus, Self::do_sre),
            0x4F => self.addr_abs_rmw(bus, Self::do_sre),
            0x53 => self.addr_izy_rmw(bus, Self::do_sre),
            0x57 => self.addr_zpx_rmw(bus, Self::do_sre),
            0x5B => self.addr_aby_rmw(bus, Self::do_sre),
            0x5F => self.addr_abx_rmw(bus, Self::do_sre),

            0x63 => self.addr_izx_rmw(bus, Self::do_rra),
            0x67 => self.addr_zp_rmw(bus, Self::do_rra),
            0x6F => self.addr_abs_rmw(bus, Self::do_rra),
            0x73 => self.addr_izy_rmw(bus, Self::do_rra),
            0x77 => self.addr_zpx_rmw(bus, Self::do_rra),
            0x7B => self.addr_aby_rmw(bus, Self::do_rra),
            0x7F => self.addr_abx_rmw(bus, Self::do_rra),

            0xC3 => self.addr_izx_rmw(bus, Self::do_dcp),
            0xC7 => self.addr_zp_rmw(bus, Self::do_dcp),
            0xCF => self.addr_abs_rmw(bus, Self::do_dcp),
            0xD3 => self.addr_izy_rmw(bus, Self::do_dcp),
            0xD7 => self.addr_zpx_rmw(bus, Self::do_dcp),
            0xDB => self.addr_aby_rmw(bus, Self::do_dcp),
            0xDF => self.addr_abx_rmw(bus, Self::do_dcp),

            0xE3 => self.addr_izx_rmw(bus, Self::do_isc),
            0xE7 => self.addr_zp_rmw(bus, Self::do_isc),
            0xEF => self.addr_abs_rmw(bus, Self::do_isc),
            0xF3 => self.addr_izy_rmw(bus, Self::do_isc),
            0xF7 => self.addr_zpx_rmw(bus, Self::do_isc),
            0xFB => self.addr_aby_rmw(bus, Self::do_isc),
            0xFF => self.addr_abx_rmw(bus, Self::do_isc),

            0x0B | 0x2B => self.addr_imm(bus, Self::do_anc),
            0x4B => self.addr_imm(bus, Self::do_alr),
            0x6B => self.addr_imm(bus, Self::do_arr),
            0xCB => self.addr_imm(bus, Self::do_axs),

            // Unstable opcodes and JAM: the execution thread halts.
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2
            | 0x8B | 0x93 | 0x9B | 0x9C | 0x9E | 0x9F | 0xAB | 0xBB => {
                self.error_state = ErrorState::IllegalInstruction;
            }
        }
    }

    // ========================================================================
    // BRK / IRQ / NMI sequence
    // ========================================================================

    fn op_brk<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                // BRK reads and skips the padding byte; interrupt sequences
                // perform the same read without advancing PC.
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                if self.int_kind == IntKind::Brk {
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                    self.addr = VECTOR_IRQ;
                }
                self.cycle = 2;
            }
            2 => {
                self.push(bus, (self.regs.pc >> 8) as u8);
                self.cycle = 3;
            }
            3 => {
                self.push(bus, self.regs.pc as u8);
                self.cycle = 4;
            }
            4 => {
                let p = if self.int_kind == IntKind::Brk {
                    self.regs.p.to_byte_brk()
                } else {
                    self.regs.p.to_byte_irq()
                };
                self.push(bus, p);
                self.cycle = 5;
            }
            5 => {
                let Some(lo) = self.read(bus, self.addr) else { return };
                self.data = lo;
                self.regs.p.set(I);
                self.cycle = 6;
            }
            6 => {
                let Some(hi) = self.read(bus, self.addr.wrapping_add(1)) else { return };
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ========================================================================
    // Stack operations
    // ========================================================================

    fn op_php<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                let p = self.regs.p.to_byte_brk();
                self.push(bus, p);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_pha<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                let a = self.regs.a;
                self.push(bus, a);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_plp<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, 0x0100 | u16::from(self.regs.sp)).is_none() {
                    return;
                }
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(v) = self.read(bus, 0x0100 | u16::from(self.regs.sp)) else { return };
                self.old_i = self.regs.p.is_set(I);
                self.i_stale = true;
                self.regs.p = crate::Status::from_byte(v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_pla<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, 0x0100 | u16::from(self.regs.sp)).is_none() {
                    return;
                }
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(v) = self.read(bus, 0x0100 | u16::from(self.regs.sp)) else { return };
                self.regs.a = v;
                self.regs.p.update_nz(v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ========================================================================
    // Flow control
    // ========================================================================

    fn op_jsr<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.data = lo;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                // Internal cycle: dummy stack read.
                if self.read(bus, 0x0100 | u16::from(self.regs.sp)).is_none() {
                    return;
                }
                self.cycle = 3;
            }
            3 => {
                let hi = (self.regs.pc >> 8) as u8;
                self.push(bus, hi);
                self.cycle = 4;
            }
            4 => {
                let lo = self.regs.pc as u8;
                self.push(bus, lo);
                self.cycle = 5;
            }
            5 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                let target = u16::from(self.data) | (u16::from(hi) << 8);
                self.call_stack[self.call_sp as usize] = target;
                self.call_sp = self.call_sp.wrapping_add(1);
                self.regs.pc = target;
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_rts<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, 0x0100 | u16::from(self.regs.sp)).is_none() {
                    return;
                }
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read(bus, 0x0100 | u16::from(self.regs.sp)) else { return };
                self.data = lo;
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.cycle = 4;
            }
            4 => {
                let Some(hi) = self.read(bus, 0x0100 | u16::from(self.regs.sp)) else { return };
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.cycle = 5;
            }
            5 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.call_sp = self.call_sp.wrapping_sub(1);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_rti<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, 0x0100 | u16::from(self.regs.sp)).is_none() {
                    return;
                }
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(p) = self.read(bus, 0x0100 | u16::from(self.regs.sp)) else { return };
                self.regs.p = crate::Status::from_byte(p);
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.cycle = 4;
            }
            4 => {
                let Some(lo) = self.read(bus, 0x0100 | u16::from(self.regs.sp)) else { return };
                self.data = lo;
                self.regs.sp = self.regs.sp.wrapping_add(1);
                self.cycle = 5;
            }
            5 => {
                let Some(hi) = self.read(bus, 0x0100 | u16::from(self.regs.sp)) else { return };
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_jmp_abs<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.data = lo;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_jmp_ind<Bu: Bus>(&mut self, bus: &mut Bu) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                self.addr |= u16::from(hi) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read(bus, self.addr) else { return };
                self.data = lo;
                self.cycle = 4;
            }
            4 => {
                // Page-wrap bug: the high byte is fetched without carry.
                let hi_addr = (self.addr & 0xFF00) | u16::from((self.addr as u8).wrapping_add(1));
                let Some(hi) = self.read(bus, hi_addr) else { return };
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_branch<Bu: Bus>(&mut self, bus: &mut Bu, taken: bool) {
        match self.cycle {
            1 => {
                let Some(offset) = self.read(bus, self.regs.pc) else { return };
                self.regs.pc = self.regs.pc.wrapping_add(1);
                if taken {
                    self.data = offset;
                    self.cycle = 2;
                } else {
                    self.finish();
                }
            }
            2 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                let target = self
                    .regs
                    .pc
                    .wrapping_add(i16::from(self.data as i8) as u16);
                if target & 0xFF00 == self.regs.pc & 0xFF00 {
                    self.regs.pc = target;
                    self.finish();
                } else {
                    // Page crossed: PC gets the new low byte first, the high
                    // byte is fixed up in the extra cycle.
                    self.addr = target;
                    self.regs.pc = (self.regs.pc & 0xFF00) | (target & 0x00FF);
                    self.cycle = 3;
                }
            }
            3 => {
                if self.read(bus, self.regs.pc).is_none() {
                    return;
                }
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// Single-cycle implied operation (2 cycles with the fetch).
    fn op_implied<Bu: Bus>(&mut self, bus: &mut Bu, f: fn(&mut Self)) {
        if self.read(bus, self.regs.pc).is_none() {
            return;
        }
        f(self);
        self.finish();
    }

    // ========================================================================
    // Addressing mode helpers - read operations
    // ========================================================================

    fn addr_imm<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        let Some(v) = self.read(bus, self.regs.pc) else { return };
        self.regs.pc = self.regs.pc.wrapping_add(1);
        op(self, v);
        self.finish();
    }

    fn addr_zp<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                op(self, v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_zpx<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.addr = u16::from(self.pointer.wrapping_add(self.regs.x));
                self.cycle = 3;
            }
            3 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                op(self, v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_zpy<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.addr = u16::from(self.pointer.wrapping_add(self.regs.y));
                self.cycle = 3;
            }
            3 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                op(self, v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abs<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                self.addr |= u16::from(hi) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                op(self, v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    /// Absolute,X read: one extra cycle iff the page boundary is crossed.
    fn addr_abx<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        self.addr_indexed(bus, op, self.regs.x);
    }

    /// Absolute,Y read: one extra cycle iff the page boundary is crossed.
    fn addr_aby<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        self.addr_indexed(bus, op, self.regs.y);
    }

    fn addr_indexed<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8), index: u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < index);
                self.cycle = 3;
            }
            3 => {
                if self.data != 0 {
                    // Page crossed: dummy read from the pre-fixup address.
                    if self.read(bus, self.addr).is_none() {
                        return;
                    }
                    self.addr = self.addr.wrapping_add(0x100);
                    self.cycle = 4;
                } else {
                    let Some(v) = self.read(bus, self.addr) else { return };
                    op(self, v);
                    self.finish();
                }
            }
            4 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                op(self, v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_izx<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read(bus, u16::from(self.pointer)) else { return };
                self.addr = u16::from(lo);
                self.cycle = 4;
            }
            4 => {
                let Some(hi) = self.read(bus, u16::from(self.pointer.wrapping_add(1))) else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.cycle = 5;
            }
            5 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                op(self, v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_izy<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8)) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(lo) = self.read(bus, u16::from(self.pointer)) else { return };
                self.addr = u16::from(lo);
                self.cycle = 3;
            }
            3 => {
                let Some(hi) = self.read(bus, u16::from(self.pointer.wrapping_add(1))) else {
                    return;
                };
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < self.regs.y);
                self.cycle = 4;
            }
            4 => {
                if self.data != 0 {
                    if self.read(bus, self.addr).is_none() {
                        return;
                    }
                    self.addr = self.addr.wrapping_add(0x100);
                    self.cycle = 5;
                } else {
                    let Some(v) = self.read(bus, self.addr) else { return };
                    op(self, v);
                    self.finish();
                }
            }
            5 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                op(self, v);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ========================================================================
    // Addressing mode helpers - write operations
    // ========================================================================

    fn addr_zp_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_zpx_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8) {
        self.addr_zpi_w(bus, val, self.regs.x);
    }

    fn addr_zpy_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8) {
        self.addr_zpi_w(bus, val, self.regs.y);
    }

    fn addr_zpi_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8, index: u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.addr = u16::from(self.pointer.wrapping_add(index));
                self.cycle = 3;
            }
            3 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abs_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                self.addr |= u16::from(hi) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abx_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8) {
        self.addr_abi_w(bus, val, self.regs.x);
    }

    fn addr_aby_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8) {
        self.addr_abi_w(bus, val, self.regs.y);
    }

    /// Indexed absolute write: always pays the fix-up cycle, which re-reads
    /// the pre-fixup address.
    fn addr_abi_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8, index: u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < index);
                self.cycle = 3;
            }
            3 => {
                if self.read(bus, self.addr).is_none() {
                    return;
                }
                if self.data != 0 {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_izx_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read(bus, u16::from(self.pointer)) else { return };
                self.addr = u16::from(lo);
                self.cycle = 4;
            }
            4 => {
                let Some(hi) = self.read(bus, u16::from(self.pointer.wrapping_add(1))) else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_izy_w<Bu: Bus>(&mut self, bus: &mut Bu, val: fn(&Self) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(lo) = self.read(bus, u16::from(self.pointer)) else { return };
                self.addr = u16::from(lo);
                self.cycle = 3;
            }
            3 => {
                let Some(hi) = self.read(bus, u16::from(self.pointer.wrapping_add(1))) else {
                    return;
                };
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < self.regs.y);
                self.cycle = 4;
            }
            4 => {
                if self.read(bus, self.addr).is_none() {
                    return;
                }
                if self.data != 0 {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, val(self));
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ========================================================================
    // Addressing mode helpers - read-modify-write operations
    // ========================================================================

    fn addr_zp_rmw<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                self.data = v;
                self.cycle = 3;
            }
            3 => {
                // Dummy write of the original value.
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_zpx_rmw<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.addr = u16::from(self.pointer.wrapping_add(self.regs.x));
                self.cycle = 3;
            }
            3 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                self.data = v;
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abs_rmw<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                self.addr |= u16::from(hi) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                self.data = v;
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_abx_rmw<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8) -> u8) {
        self.addr_abi_rmw(bus, op, self.regs.x);
    }

    fn addr_aby_rmw<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8) -> u8) {
        self.addr_abi_rmw(bus, op, self.regs.y);
    }

    /// Indexed absolute RMW: always 7 cycles, the fix-up cycle re-reads the
    /// pre-fixup address.
    fn addr_abi_rmw<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8) -> u8, index: u8) {
        match self.cycle {
            1 => {
                let Some(lo) = self.read(bus, self.regs.pc) else { return };
                self.addr = u16::from(lo);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(hi) = self.read(bus, self.regs.pc) else { return };
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < index);
                self.cycle = 3;
            }
            3 => {
                if self.read(bus, self.addr).is_none() {
                    return;
                }
                if self.data != 0 {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 4;
            }
            4 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                self.data = v;
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_izx_rmw<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                if self.read(bus, u16::from(self.pointer)).is_none() {
                    return;
                }
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                let Some(lo) = self.read(bus, u16::from(self.pointer)) else { return };
                self.addr = u16::from(lo);
                self.cycle = 4;
            }
            4 => {
                let Some(hi) = self.read(bus, u16::from(self.pointer.wrapping_add(1))) else {
                    return;
                };
                self.addr |= u16::from(hi) << 8;
                self.cycle = 5;
            }
            5 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                self.data = v;
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 7;
            }
            7 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn addr_izy_rmw<Bu: Bus>(&mut self, bus: &mut Bu, op: fn(&mut Self, u8) -> u8) {
        match self.cycle {
            1 => {
                let Some(ptr) = self.read(bus, self.regs.pc) else { return };
                self.pointer = ptr;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let Some(lo) = self.read(bus, u16::from(self.pointer)) else { return };
                self.addr = u16::from(lo);
                self.cycle = 3;
            }
            3 => {
                let Some(hi) = self.read(bus, u16::from(self.pointer.wrapping_add(1))) else {
                    return;
                };
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < self.regs.y);
                self.cycle = 4;
            }
            4 => {
                if self.read(bus, self.addr).is_none() {
                    return;
                }
                if self.data != 0 {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 5;
            }
            5 => {
                let Some(v) = self.read(bus, self.addr) else { return };
                self.data = v;
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 7;
            }
            7 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ========================================================================
    // ALU operations
    // ========================================================================

    fn do_lda(&mut self, val: u8) {
        self.regs.a = val;
        self.regs.p.update_nz(val);
    }

    fn do_ldx(&mut self, val: u8) {
        self.regs.x = val;
        self.regs.p.update_nz(val);
    }

    fn do_ldy(&mut self, val: u8) {
        self.regs.y = val;
        self.regs.p.update_nz(val);
    }

    fn do_ora(&mut self, val: u8) {
        self.regs.a |= val;
        self.regs.p.update_nz(self.regs.a);
    }

    fn do_and(&mut self, val: u8) {
        self.regs.a &= val;
        self.regs.p.update_nz(self.regs.a);
    }

    fn do_eor(&mut self, val: u8) {
        self.regs.a ^= val;
        self.regs.p.update_nz(self.regs.a);
    }

    fn do_bit(&mut self, val: u8) {
        self.regs.p.set_if(Z, self.regs.a & val == 0);
        self.regs.p.set_if(N, val & 0x80 != 0);
        self.regs.p.set_if(V, val & 0x40 != 0);
    }

    fn do_nop_read(&mut self, _val: u8) {}

    fn do_adc(&mut self, val: u8) {
        if self.regs.p.is_set(D) {
            self.do_adc_decimal(val);
        } else {
            self.do_adc_binary(val);
        }
    }

    fn do_adc_binary(&mut self, val: u8) {
        let a = self.regs.a;
        let carry = u16::from(self.regs.p.is_set(C));
        let sum = u16::from(a) + u16::from(val) + carry;
        let result = sum as u8;

        self.regs.p.set_if(C, sum > 0xFF);
        self.regs
            .p
            .set_if(V, (a ^ result) & (val ^ result) & 0x80 != 0);
        self.regs.a = result;
        self.regs.p.update_nz(result);
    }

    fn do_adc_decimal(&mut self, val: u8) {
        let a = self.regs.a;
        let carry = u8::from(self.regs.p.is_set(C));

        let mut lo = (a & 0x0F) + (val & 0x0F) + carry;
        if lo > 9 {
            lo += 6;
        }
        let mut hi = (a >> 4) + (val >> 4) + u8::from(lo > 0x0F);

        // Z, N and V come from the binary result on the NMOS 6510.
        let bin_sum = u16::from(a) + u16::from(val) + u16::from(carry);
        let bin_result = bin_sum as u8;
        self.regs.p.set_if(Z, bin_result == 0);
        self.regs.p.set_if(N, hi & 0x08 != 0);
        self.regs
            .p
            .set_if(V, (a ^ bin_result) & (val ^ bin_result) & 0x80 != 0);

        if hi > 9 {
            hi += 6;
        }
        self.regs.p.set_if(C, hi > 0x0F);
        self.regs.a = (hi << 4) | (lo & 0x0F);
    }

    fn do_sbc(&mut self, val: u8) {
        if self.regs.p.is_set(D) {
            self.do_sbc_decimal(val);
        } else {
            self.do_sbc_binary(val);
        }
    }

    fn do_sbc_binary(&mut self, val: u8) {
        let a = self.regs.a;
        let borrow = u16::from(!self.regs.p.is_set(C));
        let diff = u16::from(a).wrapping_sub(u16::from(val)).wrapping_sub(borrow);
        let result = diff as u8;

        self.regs.p.set_if(C, diff < 0x100);
        self.regs
            .p
            .set_if(V, (a ^ val) & (a ^ result) & 0x80 != 0);
        self.regs.a = result;
        self.regs.p.update_nz(result);
    }

    fn do_sbc_decimal(&mut self, val: u8) {
        let a = self.regs.a;
        let borrow = u8::from(!self.regs.p.is_set(C));

        // All flags come from the binary result.
        let diff = u16::from(a)
            .wrapping_sub(u16::from(val))
            .wrapping_sub(u16::from(borrow));
        let bin_result = diff as u8;
        self.regs.p.set_if(C, diff < 0x100);
        self.regs
            .p
            .set_if(V, (a ^ val) & (a ^ bin_result) & 0x80 != 0);
        self.regs.p.update_nz(bin_result);

        let mut lo = (a & 0x0F)
            .wrapping_sub(val & 0x0F)
            .wrapping_sub(borrow);
        let mut hi = (a >> 4).wrapping_sub(val >> 4);
        if lo & 0x10 != 0 {
            lo = lo.wrapping_sub(6);
            hi = hi.wrapping_sub(1);
        }
        if hi & 0x10 != 0 {
            hi = hi.wrapping_sub(6);
        }
        self.regs.a = (hi << 4) | (lo & 0x0F);
    }

    fn compare(&mut self, reg: u8, val: u8) {
        let result = reg.wrapping_sub(val);
        self.regs.p.set_if(C, reg >= val);
        self.regs.p.update_nz(result);
    }

    fn do_cmp(&mut self, val: u8) {
        self.compare(self.regs.a, val);
    }

    fn do_cpx(&mut self, val: u8) {
        self.compare(self.regs.x, val);
    }

    fn do_cpy(&mut self, val: u8) {
        self.compare(self.regs.y, val);
    }

    fn do_asl(&mut self, val: u8) -> u8 {
        self.regs.p.set_if(C, val & 0x80 != 0);
        let result = val << 1;
        self.regs.p.update_nz(result);
        result
    }

    fn do_lsr(&mut self, val: u8) -> u8 {
        self.regs.p.set_if(C, val & 0x01 != 0);
        let result = val >> 1;
        self.regs.p.update_nz(result);
        result
    }

    fn do_rol(&mut self, val: u8) -> u8 {
        let carry_in = u8::from(self.regs.p.is_set(C));
        self.regs.p.set_if(C, val & 0x80 != 0);
        let result = (val << 1) | carry_in;
        self.regs.p.update_nz(result);
        result
    }

    fn do_ror(&mut self, val: u8) -> u8 {
        let carry_in = u8::from(self.regs.p.is_set(C)) << 7;
        self.regs.p.set_if(C, val & 0x01 != 0);
        let result = (val >> 1) | carry_in;
        self.regs.p.update_nz(result);
        result
    }

    fn do_inc(&mut self, val: u8) -> u8 {
        let result = val.wrapping_add(1);
        self.regs.p.update_nz(result);
        result
    }

    fn do_dec(&mut self, val: u8) -> u8 {
        let result = val.wrapping_sub(1);
        self.regs.p.update_nz(result);
        result
    }

    // ========================================================================
    // Stable illegal operations
    // ========================================================================

    fn do_lax(&mut self, val: u8) {
        self.regs.a = val;
        self.regs.x = val;
        self.regs.p.update_nz(val);
    }

    fn do_slo(&mut self, val: u8) -> u8 {
        self.regs.p.set_if(C, val & 0x80 != 0);
        let result = val << 1;
        self.regs.a |= result;
        self.regs.p.update_nz(self.regs.a);
        result
    }

    fn do_rla(&mut self, val: u8) -> u8 {
        let carry_in = u8::from(self.regs.p.is_set(C));
        self.regs.p.set_if(C, val & 0x80 != 0);
        let result = (val << 1) | carry_in;
        self.regs.a &= result;
        self.regs.p.update_nz(self.regs.a);
        result
    }

    fn do_sre(&mut self, val: u8) -> u8 {
        self.regs.p.set_if(C, val & 0x01 != 0);
        let result = val >> 1;
        self.regs.a ^= result;
        self.regs.p.update_nz(self.regs.a);
        result
    }

    fn do_rra(&mut self, val: u8) -> u8 {
        let carry_in = u8::from(self.regs.p.is_set(C)) << 7;
        self.regs.p.set_if(C, val & 0x01 != 0);
        let result = (val >> 1) | carry_in;
        self.do_adc(result);
        result
    }

    fn do_dcp(&mut self, val: u8) -> u8 {
        let result = val.wrapping_sub(1);
        self.compare(self.regs.a, result);
        result
    }

    fn do_isc(&mut self, val: u8) -> u8 {
        let result = val.wrapping_add(1);
        self.do_sbc(result);
        result
    }

    fn do_anc(&mut self, val: u8) {
        self.regs.a &= val;
        self.regs.p.update_nz(self.regs.a);
        let n = self.regs.p.is_set(N);
        self.regs.p.set_if(C, n);
    }

    fn do_alr(&mut self, val: u8) {
        let t = self.regs.a & val;
        self.regs.p.set_if(C, t & 0x01 != 0);
        self.regs.a = t >> 1;
        self.regs.p.update_nz(self.regs.a);
    }

    fn do_arr(&mut self, val: u8) {
        let t = self.regs.a & val;
        let carry_in = u8::from(self.regs.p.is_set(C)) << 7;
        self.regs.a = (t >> 1) | carry_in;
        self.regs.p.update_nz(self.regs.a);
        self.regs.p.set_if(C, self.regs.a & 0x40 != 0);
        let v = ((self.regs.a >> 6) ^ (self.regs.a >> 5)) & 0x01 != 0;
        self.regs.p.set_if(V, v);
    }

    fn do_axs(&mut self, val: u8) {
        let t = self.regs.a & self.regs.x;
        self.regs.p.set_if(C, t >= val);
        self.regs.x = t.wrapping_sub(val);
        self.regs.p.update_nz(self.regs.x);
    }
}

impl Snapshotable for Mos6510 {
    fn reset(&mut self) {
        self.regs = Registers::new();
        self.state = State::FetchOpcode;
        self.opcode = 0;
        self.cycle = 0;
        self.addr = 0;
        self.data = 0;
        self.pointer = 0;
        self.pc_at_cycle_0 = 0;
        self.rdy = true;
        self.irq_line = 0;
        self.nmi_line = 0;
        self.nmi_edge = false;
        self.nmi_vector = VECTOR_NMI;
        self.next_irq_cycle = 0;
        self.next_nmi_cycle = 0;
        self.old_i = false;
        self.i_stale = false;
        self.int_kind = IntKind::Brk;
        self.error_state = ErrorState::Ok;
        self.ignore_breakpoint = false;
        self.call_sp = 0;
        // Breakpoints and the total cycle counter survive a reset.
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.put_u8(self.regs.a);
        w.put_u8(self.regs.x);
        w.put_u8(self.regs.y);
        w.put_u8(self.regs.sp);
        w.put_u16(self.regs.pc);
        w.put_u8(self.regs.p.0);
        w.put_u8(match self.state {
            State::FetchOpcode => 0,
            State::Execute => 1,
        });
        w.put_u8(self.opcode);
        w.put_u8(self.cycle);
        w.put_u16(self.addr);
        w.put_u8(self.data);
        w.put_u8(self.pointer);
        w.put_u16(self.pc_at_cycle_0);
        w.put_bool(self.rdy);
        w.put_u8(self.irq_line);
        w.put_u8(self.nmi_line);
        w.put_bool(self.nmi_edge);
        w.put_u16(self.nmi_vector);
        w.put_u64(self.next_irq_cycle);
        w.put_u64(self.next_nmi_cycle);
        w.put_bool(self.old_i);
        w.put_bool(self.i_stale);
        w.put_u8(match self.int_kind {
            IntKind::Brk => 0,
            IntKind::Irq => 1,
            IntKind::Nmi => 2,
        });
        w.put_u64(self.total_cycles);
    }

    fn load_state(&mut self, r: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        self.regs.a = r.get_u8()?;
        self.regs.x = r.get_u8()?;
        self.regs.y = r.get_u8()?;
        self.regs.sp = r.get_u8()?;
        self.regs.pc = r.get_u16()?;
        self.regs.p = crate::Status::from_byte(r.get_u8()?);
        self.state = if r.get_u8()? == 0 {
            State::FetchOpcode
        } else {
            State::Execute
        };
        self.opcode = r.get_u8()?;
        self.cycle = r.get_u8()?;
        self.addr = r.get_u16()?;
        self.data = r.get_u8()?;
        self.pointer = r.get_u8()?;
        self.pc_at_cycle_0 = r.get_u16()?;
        self.rdy = r.get_bool()?;
        self.irq_line = r.get_u8()?;
        self.nmi_line = r.get_u8()?;
        self.nmi_edge = r.get_bool()?;
        self.nmi_vector = r.get_u16()?;
        self.next_irq_cycle = r.get_u64()?;
        self.next_nmi_cycle = r.get_u64()?;
        self.old_i = r.get_bool()?;
        self.i_stale = r.get_bool()?;
        self.int_kind = match r.get_u8()? {
            0 => IntKind::Brk,
            1 => IntKind::Irq,
            _ => IntKind::Nmi,
        };
        self.total_cycles = r.get_u64()?;
        self.error_state = ErrorState::Ok;
        Ok(())
    }

    fn dump_state(&self) -> String {
        format!(
            "A={:02X} X={:02X} Y={:02X} SP={:02X} PC={:04X} P={:02X} [{}{}{}{}{}{}] IRQ={:02X} NMI={:02X}",
            self.regs.a,
            self.regs.x,
            self.regs.y,
            self.regs.sp,
            self.regs.pc,
            self.regs.p.to_byte(),
            if self.regs.p.is_set(N) { 'N' } else { '-' },
            if self.regs.p.is_set(V) { 'V' } else { '-' },
            if self.regs.p.is_set(D) { 'D' } else { '-' },
            if self.regs.p.is_set(I) { 'I' } else { '-' },
            if self.regs.p.is_set(Z) { 'Z' } else { '-' },
            if self.regs.p.is_set(C) { 'C' } else { '-' },
            self.irq_line,
            self.nmi_line,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::B;
    use crate::{IRQ_SOURCE_CIA, NMI_SOURCE_CIA};

    /// Flat 64K RAM for CPU tests.
    struct TestBus {
        ram: Box<[u8; 0x10000]>,
    }

    impl TestBus {
        fn new() -> Self {
            Self {
                ram: Box::new([0; 0x10000]),
            }
        }

        fn load(&mut self, addr: u16, bytes: &[u8]) {
            for (i, &b) in bytes.iter().enumerate() {
                self.ram[addr as usize + i] = b;
            }
        }
    }

    impl Bus for TestBus {
        fn read(&mut self, addr: u16) -> u8 {
            self.ram[addr as usize]
        }

        fn write(&mut self, addr: u16, value: u8) {
            self.ram[addr as usize] = value;
        }

        fn peek(&self, addr: u16) -> u8 {
            self.ram[addr as usize]
        }
    }

    fn cpu_at(pc: u16) -> Mos6510 {
        let mut cpu = Mos6510::new();
        cpu.regs.pc = pc;
        cpu
    }

    /// Run one full instruction and return the number of cycles it took.
    fn step(cpu: &mut Mos6510, bus: &mut TestBus) -> u32 {
        let mut cycles = 0;
        loop {
            cpu.tick(bus);
            cycles += 1;
            if cpu.at_instruction_start() || cpu.error_state() != ErrorState::Ok {
                return cycles;
            }
        }
    }

    #[test]
    fn lda_imm_sets_flags() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xA9, 0x00, 0xA9, 0x80]);
        let mut cpu = cpu_at(0x8000);

        assert_eq!(step(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.p.is_set(Z));

        assert_eq!(step(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.regs.a, 0x80);
        assert!(cpu.regs.p.is_set(N));
        assert!(!cpu.regs.p.is_set(Z));
    }

    #[test]
    fn page_cross_timing() {
        // LDA $12FE,X with X=$05 crosses into $1303: 5 cycles.
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xBD, 0xFE, 0x12]);
        bus.ram[0x1303] = 0x42;
        let mut cpu = cpu_at(0x8000);
        cpu.regs.x = 0x05;
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.regs.a, 0x42);

        // LDA $12FB,X with X=$05 stays on the page: 4 cycles.
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xBD, 0xFB, 0x12]);
        bus.ram[0x1300] = 0x21;
        let mut cpu = cpu_at(0x8000);
        cpu.regs.x = 0x05;
        assert_eq!(step(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.regs.a, 0x21);

        // LDA $12FE,X with X=$20: crossed again, 5 cycles.
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xBD, 0xFE, 0x12]);
        bus.ram[0x131E] = 0x99;
        let mut cpu = cpu_at(0x8000);
        cpu.regs.x = 0x20;
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.regs.a, 0x99);
    }

    #[test]
    fn indexed_write_always_pays_fixup_cycle() {
        // STA $12FB,X with X=0: still 5 cycles.
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x9D, 0xFB, 0x12]);
        let mut cpu = cpu_at(0x8000);
        cpu.regs.a = 0x55;
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(bus.ram[0x12FB], 0x55);
    }

    #[test]
    fn decimal_adc() {
        // A=$15, C=0, D=1, ADC #$27 => A=$42, C=0, Z=0, N=0.
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x69, 0x27]);
        let mut cpu = cpu_at(0x8000);
        cpu.regs.a = 0x15;
        cpu.regs.p.set(D);
        cpu.regs.p.clear(C);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x42);
        assert!(!cpu.regs.p.is_set(C));
        assert!(!cpu.regs.p.is_set(Z));
        assert!(!cpu.regs.p.is_set(N));
    }

    #[test]
    fn decimal_sbc() {
        // A=$42, C=1, D=1, SBC #$27 => A=$15.
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xE9, 0x27]);
        let mut cpu = cpu_at(0x8000);
        cpu.regs.a = 0x42;
        cpu.regs.p.set(D);
        cpu.regs.p.set(C);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x15);
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn php_plp_preserves_flags_except_b() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x08, 0x28]); // PHP; PLP
        let mut cpu = cpu_at(0x8000);
        cpu.regs.p.set(C);
        cpu.regs.p.set(N);
        let before = cpu.regs.p.to_byte();

        assert_eq!(step(&mut cpu, &mut bus), 3); // PHP
        // The pushed byte has B set.
        assert_eq!(bus.ram[0x01FD] & B, B);
        assert_eq!(step(&mut cpu, &mut bus), 4); // PLP
        assert_eq!(cpu.regs.p.to_byte(), before);
    }

    #[test]
    fn brk_pushes_pc_plus_2_and_b_set() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x00]);
        bus.load(0xFFFE, &[0x00, 0x90]); // IRQ vector -> $9000
        let mut cpu = cpu_at(0x8000);
        assert_eq!(step(&mut cpu, &mut bus), 7);
        assert_eq!(cpu.regs.pc, 0x9000);
        // Pushed PC+2 = $8002, P with B set.
        assert_eq!(bus.ram[0x01FD], 0x80);
        assert_eq!(bus.ram[0x01FC], 0x02);
        assert_eq!(bus.ram[0x01FB] & B, B);
        assert!(cpu.regs.p.is_set(I));
    }

    #[test]
    fn irq_taken_when_line_asserted() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xEA, 0xEA, 0xEA]); // NOP sled
        bus.load(0xFFFE, &[0x00, 0x90]);
        let mut cpu = cpu_at(0x8000);
        cpu.regs.p.clear(I);

        cpu.set_irq_source(IRQ_SOURCE_CIA);
        step(&mut cpu, &mut bus); // NOP completes first
        let cycles = step(&mut cpu, &mut bus); // interrupt sequence
        assert_eq!(cycles, 7);
        assert_eq!(cpu.regs.pc, 0x9000);
        // P was pushed with B clear.
        assert_eq!(bus.ram[0x01FB] & B, 0);
        assert!(cpu.regs.p.is_set(I));
    }

    #[test]
    fn irq_blocked_by_i_flag() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xEA, 0xEA]);
        let mut cpu = cpu_at(0x8000);
        cpu.regs.p.set(I);
        cpu.set_irq_source(IRQ_SOURCE_CIA);
        step(&mut cpu, &mut bus);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x8002); // No interrupt taken.
    }

    #[test]
    fn irq_beats_simultaneous_sei() {
        // An IRQ arriving while SEI executes observes the old I value and
        // is taken before the mask blocks it.
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x78, 0xEA]); // SEI; NOP
        bus.load(0xFFFE, &[0x00, 0x90]);
        let mut cpu = cpu_at(0x8000);
        cpu.regs.p.clear(I);
        cpu.set_irq_source(IRQ_SOURCE_CIA);

        step(&mut cpu, &mut bus); // SEI sets I but the old value gates once
        let cycles = step(&mut cpu, &mut bus);
        assert_eq!(cycles, 7);
        assert_eq!(cpu.regs.pc, 0x9000);
    }

    #[test]
    fn nmi_triggers_on_falling_edge_only() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xEA, 0xEA, 0xEA, 0xEA]);
        bus.load(0xFFFA, &[0x00, 0xA0]); // NMI vector -> $A000
        let mut cpu = cpu_at(0x8000);

        cpu.set_nmi_source(NMI_SOURCE_CIA);
        step(&mut cpu, &mut bus);
        let cycles = step(&mut cpu, &mut bus);
        assert_eq!(cycles, 7);
        assert_eq!(cpu.regs.pc, 0xA000);

        // Level stays asserted: no second NMI without a new edge.
        bus.load(0xA000, &[0xEA, 0xEA]);
        step(&mut cpu, &mut bus);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0xA002);
    }

    #[test]
    fn reset_source_uses_fffc_vector_immediately() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xEA, 0xEA]);
        bus.load(0xFFFC, &[0x34, 0x12]);
        let mut cpu = cpu_at(0x8000);
        cpu.set_nmi_source(NMI_SOURCE_RESET);
        cpu.clear_nmi_source(NMI_SOURCE_RESET);
        // The reset sequence replaces the next instruction.
        let cycles = step(&mut cpu, &mut bus);
        assert_eq!(cycles, 7);
        assert_eq!(cpu.regs.pc, 0x1234);
    }

    #[test]
    fn rdy_low_stalls_read_cycles() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xA9, 0x42]); // LDA #$42
        let mut cpu = cpu_at(0x8000);

        cpu.set_rdy(false);
        for _ in 0..10 {
            cpu.tick(&mut bus);
        }
        // Still stuck on the opcode fetch.
        assert_eq!(cpu.regs.pc, 0x8000);

        cpu.set_rdy(true);
        cpu.tick(&mut bus); // fetch
        cpu.tick(&mut bus); // operand
        assert_eq!(cpu.regs.a, 0x42);
    }

    #[test]
    fn rdy_low_does_not_stall_writes() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x85, 0x10]); // STA $10
        let mut cpu = cpu_at(0x8000);
        cpu.regs.a = 0x77;

        cpu.tick(&mut bus); // fetch
        cpu.tick(&mut bus); // operand
        cpu.set_rdy(false);
        cpu.tick(&mut bus); // write proceeds despite RDY low
        assert_eq!(bus.ram[0x0010], 0x77);
        assert!(cpu.at_instruction_start());
    }

    #[test]
    fn branch_timing() {
        // Not taken: 2 cycles.
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xD0, 0x10]); // BNE +16
        let mut cpu = cpu_at(0x8000);
        cpu.regs.p.set(Z);
        assert_eq!(step(&mut cpu, &mut bus), 2);

        // Taken, same page: 3 cycles.
        let mut cpu = cpu_at(0x8000);
        cpu.regs.p.clear(Z);
        assert_eq!(step(&mut cpu, &mut bus), 3);
        assert_eq!(cpu.regs.pc, 0x8012);

        // Taken, page crossed: 4 cycles.
        let mut bus = TestBus::new();
        bus.load(0x80F0, &[0xD0, 0x7F]);
        let mut cpu = cpu_at(0x80F0);
        cpu.regs.p.clear(Z);
        assert_eq!(step(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.regs.pc, 0x8171);
    }

    #[test]
    fn jsr_rts_and_call_stack() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x20, 0x00, 0x90]); // JSR $9000
        bus.load(0x9000, &[0x60]); // RTS
        let mut cpu = cpu_at(0x8000);

        assert_eq!(step(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.regs.pc, 0x9000);
        assert_eq!(cpu.call_stack_top(), Some(0x9000));

        assert_eq!(step(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.regs.pc, 0x8003);
        assert_eq!(cpu.call_stack_top(), None);
    }

    #[test]
    fn jmp_indirect_page_wrap_bug() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x6C, 0xFF, 0x12]); // JMP ($12FF)
        bus.ram[0x12FF] = 0x34;
        bus.ram[0x1200] = 0x56; // High byte from $1200, not $1300
        bus.ram[0x1300] = 0x99;
        let mut cpu = cpu_at(0x8000);
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.regs.pc, 0x5634);
    }

    #[test]
    fn rmw_timing() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xE6, 0x10]); // INC $10
        bus.ram[0x0010] = 0x41;
        let mut cpu = cpu_at(0x8000);
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(bus.ram[0x0010], 0x42);

        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xFE, 0x00, 0x20]); // INC $2000,X
        bus.ram[0x2005] = 0x10;
        let mut cpu = cpu_at(0x8000);
        cpu.regs.x = 5;
        assert_eq!(step(&mut cpu, &mut bus), 7);
        assert_eq!(bus.ram[0x2005], 0x11);
    }

    #[test]
    fn stable_illegal_lax_and_sax() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xA7, 0x10, 0x87, 0x11]); // LAX $10; SAX $11
        bus.ram[0x0010] = 0xC3;
        let mut cpu = cpu_at(0x8000);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0xC3);
        assert_eq!(cpu.regs.x, 0xC3);
        step(&mut cpu, &mut bus);
        assert_eq!(bus.ram[0x0011], 0xC3);
    }

    #[test]
    fn stable_illegal_dcp() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xC7, 0x10]); // DCP $10
        bus.ram[0x0010] = 0x43;
        let mut cpu = cpu_at(0x8000);
        cpu.regs.a = 0x42;
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(bus.ram[0x0010], 0x42);
        assert!(cpu.regs.p.is_set(Z)); // A == M-1
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn unstable_opcode_halts() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x8B, 0x00]); // XAA (unstable)
        let mut cpu = cpu_at(0x8000);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.error_state(), ErrorState::IllegalInstruction);

        // Ticks are no-ops until the error is cleared.
        let pc = cpu.regs.pc;
        cpu.tick(&mut bus);
        assert_eq!(cpu.regs.pc, pc);
    }

    #[test]
    fn jam_opcode_halts() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0x02]);
        let mut cpu = cpu_at(0x8000);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.error_state(), ErrorState::IllegalInstruction);
    }

    #[test]
    fn soft_breakpoint_clears_on_hit() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xEA, 0xEA]);
        let mut cpu = cpu_at(0x8000);
        cpu.set_soft_breakpoint(0x8001);

        step(&mut cpu, &mut bus); // NOP at $8000
        cpu.tick(&mut bus); // hits the breakpoint
        assert_eq!(cpu.error_state(), ErrorState::SoftBreakpointReached);
        assert_eq!(cpu.breakpoint_tag(0x8001), 0);

        cpu.clear_error_state();
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x8002);
    }

    #[test]
    fn hard_breakpoint_persists() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xEA]);
        let mut cpu = cpu_at(0x8000);
        cpu.set_hard_breakpoint(0x8000);
        cpu.tick(&mut bus);
        assert_eq!(cpu.error_state(), ErrorState::HardBreakpointReached);
        assert_ne!(cpu.breakpoint_tag(0x8000), 0);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut bus = TestBus::new();
        bus.load(0x8000, &[0xA9, 0x42, 0xA2, 0x13]);
        let mut cpu = cpu_at(0x8000);
        step(&mut cpu, &mut bus);

        let mut w = SnapshotWriter::new();
        cpu.save_state(&mut w);
        let bytes = w.into_bytes();

        let mut restored = Mos6510::new();
        let mut r = SnapshotReader::new(&bytes);
        restored.load_state(&mut r).unwrap();

        assert_eq!(restored.regs, cpu.regs);
        assert_eq!(restored.total_cycles(), cpu.total_cycles());

        // Both continue identically.
        step(&mut cpu, &mut bus);
        let mut bus2 = TestBus::new();
        bus2.load(0x8000, &[0xA9, 0x42, 0xA2, 0x13]);
        step(&mut restored, &mut bus2);
        assert_eq!(restored.regs, cpu.regs);
    }
}
