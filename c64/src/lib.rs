//! Cycle-accurate Commodore 64 emulator core.
//!
//! The C64 master clock ticks at CPU cycle rate (985,249 Hz PAL,
//! 1,022,727 Hz NTSC). Every component advances one cycle per master
//! clock tick: the VIC-II first (it owns the frame timing and may pull
//! the BA line), then the 6510 (honoring RDY), then both CIAs, then the
//! SID cycle counter. A PAL frame is 312 raster lines x 63 cycles; NTSC
//! is 263 x 65.

pub mod archive;
mod bus;
mod c64;
mod cia;
mod config;
pub mod d64;
mod keyboard;
mod memory;
mod messages;
pub mod nib;
mod palette;
pub mod prg;
mod sid;
pub mod snapshot;
pub mod vic;

pub use archive::{Archive, ArchiveError};
pub use bus::C64Bus;
pub use c64::C64;
pub use cia::Cia;
pub use config::{C64Config, C64Model, NTSC_YCOUNTER_OVERFLOW_LINE};
pub use d64::D64Archive;
pub use keyboard::KeyboardMatrix;
pub use memory::C64Memory;
pub use messages::Message;
pub use nib::NibArchive;
pub use sid::{Sid, SidModel};
pub use snapshot::Snapshot;
pub use vic::Vic;
