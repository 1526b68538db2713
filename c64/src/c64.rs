//! Top-level C64 system.
//!
//! One tick is one system clock cycle (985,249 Hz PAL / 1,022,727 Hz
//! NTSC). Per tick:
//!
//! 1. VIC-II: one raster cycle (may pull BA low)
//! 2. CPU: one micro-step, frozen on reads while RDY is low
//! 3. CIA 1 and CIA 2: one cycle each
//! 4. SID: the target cycle advances (samples are produced lazily)
//! 5. Every 1/10 s of simulated time both TOD clocks tick
//!
//! The VIC and CIA 1 drive bits of the CPU IRQ line, CIA 2 drives the
//! NMI line. A hardware reset asserts the reset bit of the NMI line,
//! which runs the interrupt sequence through the $FFFC vector.

use machine_core::{
    Diagnostics, SnapshotError, SnapshotReader, SnapshotWriter, Snapshotable, Tickable,
};
use mos_6510::{
    ErrorState, Mos6510, IRQ_SOURCE_CIA, IRQ_SOURCE_VIC, NMI_SOURCE_CIA, NMI_SOURCE_RESET,
};

use crate::bus::C64Bus;
use crate::config::{C64Config, C64Model};
use crate::memory::C64Memory;
use crate::messages::{Message, MessageQueue};

/// C64 system.
pub struct C64 {
    pub cpu: Mos6510,
    pub bus: C64Bus,
    model: C64Model,
    /// Master clock: counts system cycles.
    master_clock: u64,
    /// Completed frame counter.
    frame_count: u64,
    /// Cycles until the next TOD tick.
    tod_cycle_counter: u32,
    /// CPU error state observed last tick (for message edges).
    last_cpu_error: ErrorState,
    messages: MessageQueue,
    diag: Diagnostics,
}

impl C64 {
    /// Create a new C64 from the given configuration.
    ///
    /// The machine comes up in reset: the first ticks run the CPU reset
    /// sequence, which fetches the initial program counter from $FFFC.
    ///
    /// # Panics
    ///
    /// Panics if a ROM image in the configuration has the wrong size.
    #[must_use]
    pub fn new(config: &C64Config) -> Self {
        let memory = C64Memory::new(&config.kernal_rom, &config.basic_rom, &config.char_rom);
        let mut bus = C64Bus::new(memory, config.model);

        // CIA 1 scans the keyboard: port A columns out, port B rows in.
        bus.cia1.write(0x02, 0xFF);
        bus.cia1.write(0x03, 0x00);
        bus.cia1.write(0x00, 0xFF);

        // CIA 2 port A: VIC bank select, default bank 0.
        bus.cia2.write(0x02, 0x3F);
        bus.cia2.write(0x00, 0x03 | 0x04 | 0x20);
        bus.update_vic_bank();

        let mut cpu = Mos6510::new();
        cpu.set_nmi_source(NMI_SOURCE_RESET);
        cpu.clear_nmi_source(NMI_SOURCE_RESET);

        let mut messages = MessageQueue::new();
        messages.put(if config.model.is_pal() {
            Message::Pal
        } else {
            Message::Ntsc
        });

        Self {
            cpu,
            bus,
            model: config.model,
            master_clock: 0,
            frame_count: 0,
            tod_cycle_counter: config.model.cycles_per_tod_tick(),
            last_cpu_error: ErrorState::Ok,
            messages,
            diag: Diagnostics::default(),
        }
    }

    #[must_use]
    pub fn model(&self) -> C64Model {
        self.model
    }

    /// Diagnostics context shared with sub-components.
    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diag
    }

    /// Hardware reset.
    ///
    /// Chip registers return to their power-on state, dynamic RAM is
    /// lost, color RAM keeps its content. The CPU restarts through the
    /// reset vector.
    pub fn reset(&mut self) {
        self.bus.memory.reset();
        self.bus.vic.reset();
        self.bus.sid.reset();
        self.bus.cia1.reset();
        self.bus.cia2.reset();
        self.bus.keyboard.reset();
        self.cpu.reset();
        self.cpu.set_nmi_source(NMI_SOURCE_RESET);
        self.cpu.clear_nmi_source(NMI_SOURCE_RESET);
        self.messages.put(Message::Reset);
        self.diag.info("hardware reset");
    }

    /// Run one complete frame. Returns the number of cycles executed.
    pub fn run_frame(&mut self) -> u64 {
        let start = self.master_clock;
        loop {
            self.tick();
            if self.bus.vic.take_frame_complete() {
                break;
            }
        }
        self.frame_count += 1;
        self.master_clock - start
    }

    /// The stable screen buffer (RGBA32,
    /// [`crate::vic::SCREEN_WIDTH`] x [`crate::vic::SCREEN_HEIGHT`]).
    #[must_use]
    pub fn screen_buffer(&self) -> &[u32] {
        self.bus.vic.screen_buffer()
    }

    /// Master clock tick count.
    #[must_use]
    pub fn master_clock(&self) -> u64 {
        self.master_clock
    }

    /// Completed frame count.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Take the next pending host message.
    pub fn take_message(&mut self) -> Option<Message> {
        self.messages.take()
    }

    /// Load a PRG image into RAM.
    pub fn load_prg(&mut self, data: &[u8]) -> Result<u16, String> {
        crate::prg::load_prg(&mut self.bus.memory, data)
    }
}

impl Tickable for C64 {
    fn tick(&mut self) {
        self.master_clock += 1;

        // 1. VIC: one raster cycle. It observes the CPU program counter
        // during blocked character fetches.
        let C64Bus { memory, vic, .. } = &mut self.bus;
        vic.tick(memory, self.cpu.regs.pc);

        // 2. CPU: RDY follows BA; interrupt lines follow the chips.
        self.cpu.set_rdy(!self.bus.vic.ba_low());
        if self.bus.vic.irq_active() {
            self.cpu.set_irq_source(IRQ_SOURCE_VIC);
        } else {
            self.cpu.clear_irq_source(IRQ_SOURCE_VIC);
        }
        if self.bus.cia1.int_line() {
            self.cpu.set_irq_source(IRQ_SOURCE_CIA);
        } else {
            self.cpu.clear_irq_source(IRQ_SOURCE_CIA);
        }
        if self.bus.cia2.int_line() {
            self.cpu.set_nmi_source(NMI_SOURCE_CIA);
        } else {
            self.cpu.clear_nmi_source(NMI_SOURCE_CIA);
        }

        self.cpu.tick(&mut self.bus);

        // Surface CPU halts to the host exactly once per transition.
        let error = self.cpu.error_state();
        if error != self.last_cpu_error {
            match error {
                ErrorState::IllegalInstruction => {
                    self.messages.put(Message::IllegalInstruction);
                    self.diag.info("CPU halted on illegal instruction");
                }
                ErrorState::SoftBreakpointReached | ErrorState::HardBreakpointReached => {
                    self.messages.put(Message::Breakpoint);
                }
                ErrorState::Ok => {}
            }
            self.last_cpu_error = error;
        }

        // 3. CIAs.
        self.bus.cia1.tick();
        self.bus.cia2.tick();

        // 4. + 5. SID target cycle and the TOD clocks.
        self.tod_cycle_counter -= 1;
        if self.tod_cycle_counter == 0 {
            self.tod_cycle_counter = self.model.cycles_per_tod_tick();
            self.bus.cia1.increment_tod();
            self.bus.cia2.increment_tod();
        }

        // Produce audio at frame granularity.
        if self.bus.vic.raster_line() == 0 && self.bus.vic.raster_cycle() == 1 {
            self.bus.sid.execute_until(self.master_clock);
        }
    }
}

impl Snapshotable for C64 {
    fn reset(&mut self) {
        C64::reset(self);
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        self.cpu.save_state(w);
        self.bus.memory.save_state(w);
        self.bus.vic.save_state(w);
        self.bus.sid.save_state(w);
        self.bus.cia1.save_state(w);
        self.bus.cia2.save_state(w);
        self.bus.keyboard.save_state(w);
        w.put_u64(self.master_clock);
        w.put_u64(self.frame_count);
        w.put_u32(self.tod_cycle_counter);
    }

    fn load_state(&mut self, r: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        self.cpu.load_state(r)?;
        self.bus.memory.load_state(r)?;
        self.bus.vic.load_state(r)?;
        self.bus.sid.load_state(r)?;
        self.bus.cia1.load_state(r)?;
        self.bus.cia2.load_state(r)?;
        self.bus.keyboard.load_state(r)?;
        self.master_clock = r.get_u64()?;
        self.frame_count = r.get_u64()?;
        self.tod_cycle_counter = r.get_u32()?;
        self.bus.update_vic_bank();
        Ok(())
    }

    fn dump_state(&self) -> String {
        format!(
            "clock={} frame={} | {} | {}",
            self.master_clock,
            self.frame_count,
            self.cpu.dump_state(),
            self.bus.vic.dump_state(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine_core::Bus;

    /// Minimal ROM set: the Kernal parks the CPU in a tight loop.
    fn make_c64() -> C64 {
        let mut kernal = vec![0xEA; 8192]; // NOP sled
        // Reset vector -> $E000, where a JMP $E000 idles.
        kernal[0x1FFC] = 0x00;
        kernal[0x1FFD] = 0xE0;
        kernal[0x0000] = 0x4C; // JMP $E000
        kernal[0x0001] = 0x00;
        kernal[0x0002] = 0xE0;

        C64::new(&C64Config {
            model: C64Model::C64Pal,
            kernal_rom: kernal,
            basic_rom: vec![0; 8192],
            char_rom: vec![0; 4096],
        })
    }

    #[test]
    fn boots_through_the_reset_vector() {
        let mut c64 = make_c64();
        // The 7-cycle reset sequence loads PC from $FFFC.
        for _ in 0..7 {
            c64.tick();
        }
        assert_eq!(c64.cpu.regs.pc, 0xE000);
        assert!(c64.cpu.at_instruction_start());
    }

    #[test]
    fn run_frame_executes_one_frame_of_cycles() {
        let mut c64 = make_c64();
        let cycles = c64.run_frame();
        assert_eq!(cycles, u64::from(C64Model::C64Pal.cycles_per_frame()));
        assert_eq!(c64.frame_count(), 1);
    }

    #[test]
    fn first_message_reports_the_video_standard() {
        let mut c64 = make_c64();
        assert_eq!(c64.take_message(), Some(Message::Pal));
        assert_eq!(c64.take_message(), None);
    }

    #[test]
    fn bad_lines_pull_ba_and_freeze_the_cpu() {
        let mut c64 = make_c64();
        c64.run_frame();

        // Display off: BA never drops.
        let mut stalled = 0u32;
        for _ in 0..C64Model::C64Pal.cycles_per_frame() {
            c64.tick();
            if c64.bus.vic.ba_low() {
                stalled += 1;
            }
        }
        assert_eq!(stalled, 0);

        // Display on: 25 bad lines steal the bus for 40+ cycles each.
        c64.bus.write(0xD011, 0x1B);
        let mut stalled = 0u32;
        for _ in 0..C64Model::C64Pal.cycles_per_frame() {
            c64.tick();
            if c64.bus.vic.ba_low() {
                stalled += 1;
            }
        }
        assert!(stalled >= 25 * 40, "only {stalled} stalled cycles");
    }

    #[test]
    fn reset_preserves_color_ram_clears_ram() {
        let mut c64 = make_c64();
        c64.run_frame();
        c64.bus.memory.ram_write(0x2000, 0x55);
        c64.bus.write(0xD800, 0x07);
        c64.reset();
        assert_eq!(c64.bus.memory.ram_read(0x2000), 0x00);
        assert_eq!(c64.bus.memory.color_ram_read(0), 0x07);
        // Reset message queued.
        let mut saw_reset = false;
        while let Some(msg) = c64.take_message() {
            saw_reset |= msg == Message::Reset;
        }
        assert!(saw_reset);
        // The CPU restarts through $FFFC.
        for _ in 0..7 {
            c64.tick();
        }
        assert_eq!(c64.cpu.regs.pc, 0xE000);
    }

    #[test]
    fn tod_ticks_every_tenth_of_a_second() {
        let mut c64 = make_c64();
        c64.bus.cia1.write(0x08, 0x00); // start TOD
        let cycles = C64Model::C64Pal.cycles_per_tod_tick();
        for _ in 0..cycles {
            c64.tick();
        }
        assert_eq!(c64.bus.cia1.peek(0x08), 0x01);
    }

    #[test]
    fn snapshot_round_trip_is_deterministic() {
        let mut c64 = make_c64();
        for _ in 0..10_000 {
            c64.tick();
        }

        let mut w = SnapshotWriter::new();
        c64.save_state(&mut w);
        let bytes = w.into_bytes();

        let mut restored = make_c64();
        restored
            .load_state(&mut SnapshotReader::new(&bytes))
            .unwrap();

        // Same state now...
        let mut w2 = SnapshotWriter::new();
        restored.save_state(&mut w2);
        assert_eq!(bytes, w2.into_bytes());

        // ...and the same state after further ticks.
        for _ in 0..1000 {
            c64.tick();
            restored.tick();
        }
        let mut wa = SnapshotWriter::new();
        c64.save_state(&mut wa);
        let mut wb = SnapshotWriter::new();
        restored.save_state(&mut wb);
        assert_eq!(wa.into_bytes(), wb.into_bytes());
    }
}
