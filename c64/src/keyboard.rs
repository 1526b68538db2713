//! C64 keyboard matrix.
//!
//! The keyboard is an 8x8 switch matrix scanned through CIA 1: port A
//! drives the column select lines (active low), port B reads the row
//! lines. A pressed key connects its column to its row, pulling the row
//! line low whenever its column is selected.

use machine_core::{SnapshotError, SnapshotReader, SnapshotWriter, Snapshotable};

/// 8x8 keyboard matrix state.
pub struct KeyboardMatrix {
    /// One byte per column; a set bit means the key at that row is down.
    columns: [u8; 8],
}

impl KeyboardMatrix {
    #[must_use]
    pub fn new() -> Self {
        Self { columns: [0; 8] }
    }

    /// Press or release the key at the given matrix position.
    pub fn set_key(&mut self, col: u8, row: u8, pressed: bool) {
        if col < 8 && row < 8 {
            if pressed {
                self.columns[col as usize] |= 1 << row;
            } else {
                self.columns[col as usize] &= !(1 << row);
            }
        }
    }

    /// Release every key.
    pub fn release_all(&mut self) {
        self.columns = [0; 8];
    }

    /// Scan the matrix with the given column mask (low bits select).
    ///
    /// Returns the port B row byte: a low bit for each row with a pressed
    /// key in a selected column.
    #[must_use]
    pub fn scan(&self, col_mask: u8) -> u8 {
        let mut rows = 0u8;
        for (col, &keys) in self.columns.iter().enumerate() {
            if col_mask & (1 << col) == 0 {
                rows |= keys;
            }
        }
        !rows
    }
}

impl Default for KeyboardMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshotable for KeyboardMatrix {
    fn reset(&mut self) {
        self.release_all();
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.put_bytes(&self.columns);
    }

    fn load_state(&mut self, r: &mut SnapshotReader<'_>) -> Result<(), SnapshotError> {
        r.get_bytes(&mut self.columns)
    }
}
