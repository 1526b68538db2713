//! V64 snapshot container.
//!
//! A snapshot is the complete machine state: a header with magic and
//! version, an embedded screenshot of the stable frame, and the
//! serialized state of every component. Loading validates magic and
//! version before any state is touched; a rejected snapshot leaves the
//! machine unchanged.

#![allow(clippy::cast_possible_truncation)]

use machine_core::{SnapshotError, SnapshotReader, SnapshotWriter, Snapshotable};

use crate::c64::C64;
use crate::vic::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Snapshot file magic.
const MAGIC: [u8; 4] = *b"VC64";

/// Format version of snapshots produced by this build.
const V_MAJOR: u8 = 1;
const V_MINOR: u8 = 0;
const V_SUBMINOR: u8 = 0;

/// Screenshot embedded in the snapshot header.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub width: u16,
    pub height: u16,
    /// RGBA32 pixels, row major.
    pub pixels: Vec<u32>,
}

/// A complete machine snapshot.
pub struct Snapshot {
    major: u8,
    minor: u8,
    subminor: u8,
    screenshot: Screenshot,
    state: Vec<u8>,
}

impl Snapshot {
    /// Capture the current machine state.
    #[must_use]
    pub fn take(c64: &C64) -> Self {
        let mut w = SnapshotWriter::new();
        c64.save_state(&mut w);

        Self {
            major: V_MAJOR,
            minor: V_MINOR,
            subminor: V_SUBMINOR,
            screenshot: Screenshot {
                width: SCREEN_WIDTH as u16,
                height: SCREEN_HEIGHT as u16,
                pixels: c64.screen_buffer().to_vec(),
            },
            state: w.into_bytes(),
        }
    }

    /// Restore the machine from this snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnsupportedVersion`] without touching the
    /// machine if the snapshot was produced by an incompatible build, or
    /// [`SnapshotError::Truncated`] if the state blob is too short.
    pub fn apply(&self, c64: &mut C64) -> Result<(), SnapshotError> {
        if (self.major, self.minor, self.subminor) != (V_MAJOR, V_MINOR, V_SUBMINOR) {
            return Err(SnapshotError::UnsupportedVersion {
                major: self.major,
                minor: self.minor,
                subminor: self.subminor,
            });
        }
        let mut r = SnapshotReader::new(&self.state);
        c64.load_state(&mut r)
    }

    #[must_use]
    pub fn screenshot(&self) -> &Screenshot {
        &self.screenshot
    }

    /// Serialize the snapshot.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.screenshot.pixels.len() * 4 + self.state.len());
        out.extend_from_slice(&MAGIC);
        out.push(self.major);
        out.push(self.minor);
        out.push(self.subminor);
        out.extend_from_slice(&(self.state.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.screenshot.width.to_le_bytes());
        out.extend_from_slice(&self.screenshot.height.to_le_bytes());
        for px in &self.screenshot.pixels {
            out.extend_from_slice(&px.to_le_bytes());
        }
        out.extend_from_slice(&self.state);
        out
    }

    /// Parse a snapshot, validating magic, version and size.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] on a magic mismatch, an incompatible
    /// version, or a truncated buffer.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        if data.len() < 15 {
            return Err(SnapshotError::Truncated);
        }
        if data[0..4] != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let (major, minor, subminor) = (data[4], data[5], data[6]);
        if (major, minor, subminor) != (V_MAJOR, V_MINOR, V_SUBMINOR) {
            return Err(SnapshotError::UnsupportedVersion {
                major,
                minor,
                subminor,
            });
        }

        let state_len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
        let width = u16::from_le_bytes([data[11], data[12]]);
        let height = u16::from_le_bytes([data[13], data[14]]);
        let pixel_count = usize::from(width) * usize::from(height);
        let pixels_start = 15;
        let state_start = pixels_start + pixel_count * 4;
        if data.len() < state_start + state_len {
            return Err(SnapshotError::Truncated);
        }

        let mut pixels = Vec::with_capacity(pixel_count);
        for i in 0..pixel_count {
            let o = pixels_start + i * 4;
            pixels.push(u32::from_le_bytes([
                data[o],
                data[o + 1],
                data[o + 2],
                data[o + 3],
            ]));
        }

        Ok(Self {
            major,
            minor,
            subminor,
            screenshot: Screenshot {
                width,
                height,
                pixels,
            },
            state: data[state_start..state_start + state_len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{C64Config, C64Model};
    use machine_core::Tickable;

    fn make_c64() -> C64 {
        let mut kernal = vec![0xEA; 8192];
        kernal[0x1FFC] = 0x00;
        kernal[0x1FFD] = 0xE0;
        C64::new(&C64Config {
            model: C64Model::C64Pal,
            kernal_rom: kernal,
            basic_rom: vec![0; 8192],
            char_rom: vec![0; 4096],
        })
    }

    #[test]
    fn container_round_trip_restores_bit_identical_state() {
        let mut c64 = make_c64();
        for _ in 0..25_000 {
            c64.tick();
        }

        let snapshot = Snapshot::take(&c64);
        let bytes = snapshot.to_bytes();
        let parsed = Snapshot::from_bytes(&bytes).unwrap();

        let mut restored = make_c64();
        parsed.apply(&mut restored).unwrap();

        let mut wa = SnapshotWriter::new();
        c64.save_state(&mut wa);
        let mut wb = SnapshotWriter::new();
        restored.save_state(&mut wb);
        assert_eq!(wa.into_bytes(), wb.into_bytes());

        // Resuming is deterministic.
        for _ in 0..500 {
            c64.tick();
            restored.tick();
        }
        let mut wa = SnapshotWriter::new();
        c64.save_state(&mut wa);
        let mut wb = SnapshotWriter::new();
        restored.save_state(&mut wb);
        assert_eq!(wa.into_bytes(), wb.into_bytes());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let c64 = make_c64();
        let mut bytes = Snapshot::take(&c64).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(SnapshotError::BadMagic)
        ));
    }

    #[test]
    fn version_mismatch_is_rejected_and_state_preserved() {
        let mut c64 = make_c64();
        for _ in 0..100 {
            c64.tick();
        }
        let mut bytes = Snapshot::take(&c64).to_bytes();
        bytes[4] = 99; // future major version

        assert!(matches!(
            Snapshot::from_bytes(&bytes),
            Err(SnapshotError::UnsupportedVersion { major: 99, .. })
        ));

        // The machine is untouched by the failed parse.
        let clock = c64.master_clock();
        assert_eq!(c64.master_clock(), clock);
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let c64 = make_c64();
        let bytes = Snapshot::take(&c64).to_bytes();
        assert!(matches!(
            Snapshot::from_bytes(&bytes[..bytes.len() - 10]),
            Err(SnapshotError::Truncated)
        ));
    }

    #[test]
    fn screenshot_has_frame_dimensions() {
        let c64 = make_c64();
        let snapshot = Snapshot::take(&c64);
        assert_eq!(snapshot.screenshot().width as usize, SCREEN_WIDTH);
        assert_eq!(snapshot.screenshot().height as usize, SCREEN_HEIGHT);
        assert_eq!(
            snapshot.screenshot().pixels.len(),
            SCREEN_WIDTH * SCREEN_HEIGHT
        );
    }
}
