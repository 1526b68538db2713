//! Property-based tests for CPU invariants.

use machine_core::Bus;
use mos_6510::{ErrorState, Mos6510};
use proptest::prelude::*;

struct FlatRam {
    ram: Box<[u8; 0x10000]>,
}

impl FlatRam {
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

impl Bus for FlatRam {
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

fn step(cpu: &mut Mos6510, bus: &mut FlatRam) -> u32 {
    let mut cycles = 0;
    loop {
        cpu.tick(bus);
        cycles += 1;
        if cpu.at_instruction_start() || cpu.error_state() != ErrorState::Ok {
            return cycles;
        }
    }
}

/// A byte whose nibbles are both valid BCD digits.
fn bcd_byte() -> impl Strategy<Value = u8> {
    (0u8..10, 0u8..10).prop_map(|(hi, lo)| (hi << 4) | lo)
}

proptest! {
    #[test]
    fn lda_sets_n_and_z_from_value(value in any::<u8>()) {
        let mut bus = FlatRam::new();
        bus.load(0x8000, &[0xA9, value]);
        let mut cpu = Mos6510::new();
        cpu.regs.pc = 0x8000;
        step(&mut cpu, &mut bus);

        prop_assert_eq!(cpu.regs.a, value);
        prop_assert_eq!(cpu.regs.p.is_set(0x02), value == 0);
        prop_assert_eq!(cpu.regs.p.is_set(0x80), value & 0x80 != 0);
    }

    #[test]
    fn php_plp_round_trips_all_flags(flags in any::<u8>()) {
        let mut bus = FlatRam::new();
        bus.load(0x8000, &[0x08, 0x28]); // PHP; PLP
        let mut cpu = Mos6510::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.p = mos_6510::Status::from_byte(flags);
        let before = cpu.regs.p.to_byte();

        step(&mut cpu, &mut bus);
        step(&mut cpu, &mut bus);
        prop_assert_eq!(cpu.regs.p.to_byte(), before);
    }

    #[test]
    fn binary_adc_matches_wide_arithmetic(
        a in any::<u8>(),
        m in any::<u8>(),
        carry in any::<bool>(),
    ) {
        let mut bus = FlatRam::new();
        bus.load(0x8000, &[0x69, m]); // ADC #m
        let mut cpu = Mos6510::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.a = a;
        cpu.regs.p.set_if(0x01, carry);
        cpu.regs.p.clear(0x08);
        step(&mut cpu, &mut bus);

        let wide = u16::from(a) + u16::from(m) + u16::from(carry);
        prop_assert_eq!(cpu.regs.a, wide as u8);
        prop_assert_eq!(cpu.regs.p.is_set(0x01), wide > 0xFF);
    }

    #[test]
    fn binary_sbc_matches_wide_arithmetic(
        a in any::<u8>(),
        m in any::<u8>(),
        carry in any::<bool>(),
    ) {
        let mut bus = FlatRam::new();
        bus.load(0x8000, &[0xE9, m]); // SBC #m
        let mut cpu = Mos6510::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.a = a;
        cpu.regs.p.set_if(0x01, carry);
        cpu.regs.p.clear(0x08);
        step(&mut cpu, &mut bus);

        let wide = i16::from(a) - i16::from(m) - i16::from(!carry);
        prop_assert_eq!(cpu.regs.a, wide as u8);
        prop_assert_eq!(cpu.regs.p.is_set(0x01), wide >= 0);
    }

    #[test]
    fn decimal_adc_produces_valid_bcd(
        a in bcd_byte(),
        m in bcd_byte(),
        carry in any::<bool>(),
    ) {
        let mut bus = FlatRam::new();
        bus.load(0x8000, &[0x69, m]);
        let mut cpu = Mos6510::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.a = a;
        cpu.regs.p.set(0x08); // decimal mode
        cpu.regs.p.set_if(0x01, carry);
        step(&mut cpu, &mut bus);

        prop_assert!(cpu.regs.a & 0x0F <= 9, "low nibble not BCD: {:02X}", cpu.regs.a);
        prop_assert!(cpu.regs.a >> 4 <= 9, "high nibble not BCD: {:02X}", cpu.regs.a);

        // The decimal result matches base-10 addition with carry out.
        let decimal = |v: u8| u32::from(v >> 4) * 10 + u32::from(v & 0x0F);
        let sum = decimal(a) + decimal(m) + u32::from(carry);
        prop_assert_eq!(decimal(cpu.regs.a), sum % 100);
        prop_assert_eq!(cpu.regs.p.is_set(0x01), sum > 99);
    }

    #[test]
    fn indexed_reads_cost_extra_cycle_only_on_page_cross(
        base in any::<u16>(),
        x in any::<u8>(),
    ) {
        // Keep the operand away from the vectors and the program.
        let base = 0x2000 | (base & 0x0FFF);
        let mut bus = FlatRam::new();
        bus.load(0x8000, &[0xBD, base as u8, (base >> 8) as u8]); // LDA base,X
        let mut cpu = Mos6510::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.x = x;

        let cycles = step(&mut cpu, &mut bus);
        let crossed = (base & 0xFF00) != (base.wrapping_add(u16::from(x)) & 0xFF00);
        prop_assert_eq!(cycles, if crossed { 5 } else { 4 });
    }

    #[test]
    fn transfer_instructions_preserve_value(value in any::<u8>()) {
        let mut bus = FlatRam::new();
        bus.load(0x8000, &[0xAA, 0x8A, 0xA8, 0x98]); // TAX TXA TAY TYA
        let mut cpu = Mos6510::new();
        cpu.regs.pc = 0x8000;
        cpu.regs.a = value;
        for _ in 0..4 {
            step(&mut cpu, &mut bus);
        }
        prop_assert_eq!(cpu.regs.a, value);
        prop_assert_eq!(cpu.regs.x, value);
        prop_assert_eq!(cpu.regs.y, value);
    }
}
