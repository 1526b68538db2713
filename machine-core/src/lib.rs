//! Core traits for chip and machine emulation.

mod bus;
mod diag;
mod snapshot;

pub use bus::Bus;
pub use diag::{DebugLevel, Diagnostics};
pub use snapshot::{SnapshotError, SnapshotReader, SnapshotWriter, Snapshotable};

/// A component that advances by one master clock cycle per call.
pub trait Tickable {
    fn tick(&mut self);
}
