//! The system bus seen by a CPU.
//!
//! One call corresponds to one bus access. Memory-mapped I/O systems
//! (6502-family machines) route reads and writes through the address
//! decoder here; side effects of I/O registers (clear-on-read, latch
//! releases) happen inside `read`/`write`, never inside `peek`.

/// A bus that supports byte-wide memory read/write operations.
pub trait Bus {
    /// Read a byte. May have side effects on I/O registers.
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte.
    fn write(&mut self, addr: u16, value: u8);

    /// Observational read without register side effects.
    ///
    /// Used by debuggers and disassemblers. Defaults to a plain read for
    /// buses without side-effecting registers.
    fn peek(&self, addr: u16) -> u8;
}
