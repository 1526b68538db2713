//! D64 disk image archive.
//!
//! A D64 image stores the sectors of a 1541 diskette:
//!
//!   Tracks  1-17: 21 sectors (zone 0)
//!   Tracks 18-24: 19 sectors (zone 1)
//!   Tracks 25-30: 18 sectors (zone 2)
//!   Tracks 31-35: 17 sectors (zone 3), extended images continue to 40/42
//!
//! Six image sizes are accepted: 35, 40 or 42 tracks, each with or
//! without the trailing per-sector error bytes. The BAM lives on track
//! 18 sector 0 (disk name at $90, ID at $A2/$A3); the directory chain
//! starts at track 18 sector 1 with eight 32-byte entries per sector.
//! Each file is a chain of sectors whose first two bytes point at the
//! next track/sector; a zero track marks the last sector, whose second
//! byte is the index of the last used byte.

#![allow(clippy::cast_possible_truncation)]

use crate::archive::{Archive, ArchiveError};

/// Bytes per sector.
const SECTOR_SIZE: usize = 256;

/// Accepted image sizes: (bytes, tracks, has error bytes).
const IMAGE_SIZES: [(usize, u8, bool); 6] = [
    (174_848, 35, false),
    (175_531, 35, true),
    (196_608, 40, false),
    (197_376, 40, true),
    (205_312, 42, false),
    (206_114, 42, true),
];

/// Sectors on the given track (1-based). Tracks 36-42 keep 17 sectors.
#[must_use]
pub fn sectors_per_track(track: u8) -> u8 {
    match track {
        1..=17 => 21,
        18..=24 => 19,
        25..=30 => 18,
        31..=42 => 17,
        _ => 0,
    }
}

/// Byte offset of a sector within the image data.
#[must_use]
pub fn sector_offset(track: u8, sector: u8) -> Option<usize> {
    if track == 0 || sector >= sectors_per_track(track) {
        return None;
    }
    let mut offset = 0usize;
    for t in 1..track {
        offset += usize::from(sectors_per_track(t)) * SECTOR_SIZE;
    }
    Some(offset + usize::from(sector) * SECTOR_SIZE)
}

/// A directory entry of interest.
#[derive(Debug, Clone)]
struct DirEntry {
    name: String,
    file_type: u8,
    first_track: u8,
    first_sector: u8,
}

/// A parsed D64 disk image.
pub struct D64Archive {
    /// Sector data (error bytes stripped).
    data: Vec<u8>,
    /// Trailing error bytes, kept for byte-exact write-back.
    errors: Vec<u8>,
    num_tracks: u8,
    items: Vec<DirEntry>,
    /// Streaming position: (track, sector, byte index within sector).
    position: Option<(u8, u8, usize)>,
}

impl D64Archive {
    /// Parse a D64 image.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidSize`] unless the image has one of
    /// the six accepted sizes, or [`ArchiveError::Corrupt`] if the
    /// directory chain is damaged.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ArchiveError> {
        let (_, num_tracks, has_errors) = IMAGE_SIZES
            .iter()
            .find(|(size, _, _)| *size == data.len())
            .copied()
            .ok_or(ArchiveError::InvalidSize(data.len()))?;

        let sectors: usize = (1..=num_tracks)
            .map(|t| usize::from(sectors_per_track(t)))
            .sum();
        let data_len = sectors * SECTOR_SIZE;

        let mut archive = Self {
            data: data[..data_len].to_vec(),
            errors: if has_errors {
                data[data_len..].to_vec()
            } else {
                Vec::new()
            },
            num_tracks,
            items: Vec::new(),
            position: None,
        };
        archive.items = archive.scan_directory()?;
        Ok(archive)
    }

    /// Number of tracks in this image (35, 40 or 42).
    #[must_use]
    pub fn num_tracks(&self) -> u8 {
        self.num_tracks
    }

    /// Low and high byte of the disk ID (BAM offset $A2/$A3).
    #[must_use]
    pub fn disk_id(&self) -> [u8; 2] {
        let bam = sector_offset(18, 0).expect("BAM sector exists");
        [self.data[bam + 0xA2], self.data[bam + 0xA3]]
    }

    /// Disk name from the BAM, trimmed of shift-space padding.
    #[must_use]
    pub fn disk_name(&self) -> String {
        let bam = sector_offset(18, 0).expect("BAM sector exists");
        petscii_name(&self.data[bam + 0x90..bam + 0xA0])
    }

    /// Read a 256-byte sector.
    #[must_use]
    pub fn read_sector(&self, track: u8, sector: u8) -> Option<&[u8]> {
        if track > self.num_tracks {
            return None;
        }
        let offset = sector_offset(track, sector)?;
        Some(&self.data[offset..offset + SECTOR_SIZE])
    }

    /// Overwrite a 256-byte sector. Returns false for invalid positions.
    pub fn write_sector(&mut self, track: u8, sector: u8, bytes: &[u8]) -> bool {
        if bytes.len() != SECTOR_SIZE || track > self.num_tracks {
            return false;
        }
        let Some(offset) = sector_offset(track, sector) else {
            return false;
        };
        self.data[offset..offset + SECTOR_SIZE].copy_from_slice(bytes);
        true
    }

    /// Serialize back to the original image layout. The BAM is returned
    /// exactly as stored, never recomputed.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        out.extend_from_slice(&self.errors);
        out
    }

    /// Walk the directory chain and collect the visible entries.
    ///
    /// Files that would not show up in `LOAD "$",8` (scratched entries,
    /// open files) are skipped.
    fn scan_directory(&self) -> Result<Vec<DirEntry>, ArchiveError> {
        let mut items = Vec::new();
        let mut track = 18u8;
        let mut sector = 1u8;
        // A directory can never span more sectors than the disk has.
        let mut hops = 0;

        loop {
            let Some(offset) = sector_offset(track, sector) else {
                return Err(ArchiveError::Corrupt("directory chain leaves the disk"));
            };
            let block = &self.data[offset..offset + SECTOR_SIZE];

            for entry in 0..8 {
                let e = &block[entry * 32..entry * 32 + 32];
                let file_type = e[2];
                if !is_visible(file_type) {
                    continue;
                }
                items.push(DirEntry {
                    name: petscii_name(&e[5..21]),
                    file_type,
                    first_track: e[3],
                    first_sector: e[4],
                });
            }

            if block[0] == 0 {
                return Ok(items);
            }
            track = block[0];
            sector = block[1];
            hops += 1;
            if hops > 802 {
                return Err(ArchiveError::Corrupt("directory chain loops"));
            }
        }
    }

    /// Walk a file chain, applying `f` to every data byte.
    fn walk_chain(&self, mut track: u8, mut sector: u8, mut f: impl FnMut(u8)) {
        let mut hops = 0;
        while track != 0 && hops <= 802 {
            let Some(offset) = sector_offset(track, sector) else {
                return;
            };
            let block = &self.data[offset..offset + SECTOR_SIZE];
            if block[0] == 0 {
                // Last sector: byte 1 indexes the final used byte.
                let last = usize::from(block[1]).min(255);
                for &b in &block[2..=last.max(2)] {
                    f(b);
                }
                return;
            }
            for &b in &block[2..] {
                f(b);
            }
            track = block[0];
            sector = block[1];
            hops += 1;
        }
    }
}

fn is_visible(file_type: u8) -> bool {
    // Bit 7 marks a properly closed entry; the low bits select DEL, SEQ,
    // PRG, USR or REL. Scratched entries are type $00.
    file_type & 0x80 != 0 && file_type & 0x07 <= 4
}

fn petscii_name(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0xA0)
        .map(|&b| {
            let c = b & 0x7F;
            if (0x20..0x5B).contains(&c) {
                c as char
            } else {
                '?'
            }
        })
        .collect()
}

impl Archive for D64Archive {
    fn num_items(&self) -> usize {
        self.items.len()
    }

    fn name_of(&self, item: usize) -> String {
        self.items[item].name.clone()
    }

    fn type_of(&self, item: usize) -> &'static str {
        match self.items[item].file_type & 0x07 {
            0 => "DEL",
            1 => "SEQ",
            2 => "PRG",
            3 => "USR",
            _ => "REL",
        }
    }

    fn size_of(&self, item: usize) -> usize {
        let entry = &self.items[item];
        let mut size = 0usize;
        self.walk_chain(entry.first_track, entry.first_sector, |_| size += 1);
        // The first two data bytes are the load address.
        size.saturating_sub(2)
    }

    fn dest_addr_of(&self, item: usize) -> u16 {
        let entry = &self.items[item];
        let Some(offset) = sector_offset(entry.first_track, entry.first_sector) else {
            return 0;
        };
        let block = &self.data[offset..offset + SECTOR_SIZE];
        u16::from(block[2]) | (u16::from(block[3]) << 8)
    }

    fn select(&mut self, item: usize) {
        let entry = &self.items[item];
        // Position past the two load address bytes.
        self.position = Some((entry.first_track, entry.first_sector, 4));
    }

    fn next_byte(&mut self) -> Option<u8> {
        let (track, sector, index) = self.position?;
        let offset = sector_offset(track, sector)?;
        let block = &self.data[offset..offset + SECTOR_SIZE];

        if block[0] == 0 && index > usize::from(block[1]) {
            self.position = None;
            return None;
        }
        if index >= SECTOR_SIZE {
            // Follow the chain into the next sector.
            if block[0] == 0 {
                self.position = None;
                return None;
            }
            self.position = Some((block[0], block[1], 2));
            return self.next_byte();
        }

        let byte = block[index];
        self.position = Some((track, sector, index + 1));
        Some(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D64_SIZE: usize = 174_848;

    /// Minimal image with one PRG file "HELLO" at track 17 sector 0.
    fn make_image() -> Vec<u8> {
        let mut img = vec![0u8; D64_SIZE];

        // BAM: next directory sector 18/1, DOS format marker, name, ID.
        let bam = sector_offset(18, 0).unwrap();
        img[bam] = 18;
        img[bam + 1] = 1;
        img[bam + 2] = 0x41;
        for (i, &b) in b"TESTDISK".iter().enumerate() {
            img[bam + 0x90 + i] = b;
        }
        for i in 8..16 {
            img[bam + 0x90 + i] = 0xA0;
        }
        img[bam + 0xA2] = b'4';
        img[bam + 0xA3] = b'2';

        // Directory sector 18/1 with one closed PRG entry.
        let dir = sector_offset(18, 1).unwrap();
        img[dir] = 0; // last directory sector
        img[dir + 1] = 0xFF;
        img[dir + 2] = 0x82; // closed PRG
        img[dir + 3] = 17; // first data track
        img[dir + 4] = 0; // first data sector
        for (i, &b) in b"HELLO".iter().enumerate() {
            img[dir + 5 + i] = b;
        }
        for i in 5..16 {
            img[dir + 5 + i] = 0xA0;
        }
        img[dir + 30] = 1; // size in blocks

        // File data at 17/0: last sector, 8 data bytes used (index 9).
        let file = sector_offset(17, 0).unwrap();
        img[file] = 0;
        img[file + 1] = 9;
        img[file + 2] = 0x01; // load address $0801
        img[file + 3] = 0x08;
        for (i, &b) in [0x99u8, 0x22, 0x48, 0x49, 0x22, 0x00].iter().enumerate() {
            img[file + 4 + i] = b;
        }
        img
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(matches!(
            D64Archive::from_bytes(&vec![0; 1000]),
            Err(ArchiveError::InvalidSize(1000))
        ));
        assert!(D64Archive::from_bytes(&vec![0; D64_SIZE + 1]).is_err());
    }

    #[test]
    fn accepts_all_six_sizes() {
        for (size, tracks, _) in IMAGE_SIZES {
            let archive = D64Archive::from_bytes(&vec![0; size]).unwrap();
            assert_eq!(archive.num_tracks(), tracks);
        }
    }

    #[test]
    fn zone_sector_counts() {
        assert_eq!(sectors_per_track(1), 21);
        assert_eq!(sectors_per_track(17), 21);
        assert_eq!(sectors_per_track(18), 19);
        assert_eq!(sectors_per_track(24), 19);
        assert_eq!(sectors_per_track(25), 18);
        assert_eq!(sectors_per_track(30), 18);
        assert_eq!(sectors_per_track(31), 17);
        assert_eq!(sectors_per_track(42), 17);
        assert_eq!(sectors_per_track(0), 0);
        assert_eq!(sectors_per_track(43), 0);
    }

    #[test]
    fn sector_offsets() {
        assert_eq!(sector_offset(1, 0), Some(0));
        assert_eq!(sector_offset(1, 1), Some(256));
        assert_eq!(sector_offset(1, 21), None);
        assert_eq!(sector_offset(18, 0), Some(17 * 21 * 256));
        // 35 tracks end exactly at the standard image size.
        let last = sector_offset(35, 16).unwrap();
        assert_eq!(last + SECTOR_SIZE, D64_SIZE);
    }

    #[test]
    fn directory_lists_visible_items() {
        let archive = D64Archive::from_bytes(&make_image()).unwrap();
        assert_eq!(archive.num_items(), 1);
        assert_eq!(archive.name_of(0), "HELLO");
        assert_eq!(archive.type_of(0), "PRG");
        assert_eq!(archive.dest_addr_of(0), 0x0801);
        assert_eq!(archive.size_of(0), 6);
        assert_eq!(archive.size_of_in_blocks(0), 1);
    }

    #[test]
    fn scratched_files_are_invisible() {
        let mut img = make_image();
        let dir = sector_offset(18, 1).unwrap();
        img[dir + 2] = 0x00; // scratched
        let archive = D64Archive::from_bytes(&img).unwrap();
        assert_eq!(archive.num_items(), 0);
    }

    #[test]
    fn streams_item_payload() {
        let mut archive = D64Archive::from_bytes(&make_image()).unwrap();
        archive.select(0);
        let mut bytes = Vec::new();
        while let Some(b) = archive.next_byte() {
            bytes.push(b);
        }
        assert_eq!(bytes, vec![0x99, 0x22, 0x48, 0x49, 0x22, 0x00]);
    }

    #[test]
    fn disk_metadata() {
        let archive = D64Archive::from_bytes(&make_image()).unwrap();
        assert_eq!(archive.disk_id(), [b'4', b'2']);
        assert_eq!(archive.disk_name(), "TESTDISK");
    }

    #[test]
    fn sector_round_trip_preserves_image() {
        let image = make_image();
        let mut archive = D64Archive::from_bytes(&image).unwrap();

        // Rewrite every sector with its own contents.
        for track in 1..=35u8 {
            for sector in 0..sectors_per_track(track) {
                let data: Vec<u8> = archive.read_sector(track, sector).unwrap().to_vec();
                assert!(archive.write_sector(track, sector, &data));
            }
        }
        assert_eq!(archive.to_bytes(), image);
    }

    #[test]
    fn error_bytes_survive_round_trip() {
        let mut image = vec![0u8; 175_531];
        image[175_000] = 0x23; // somewhere in the error block
        let archive = D64Archive::from_bytes(&image).unwrap();
        assert_eq!(archive.to_bytes(), image);
    }

    #[test]
    fn flash_copies_item_into_ram() {
        let mut archive = D64Archive::from_bytes(&make_image()).unwrap();
        let mut mem = crate::memory::C64Memory::new(&vec![0; 8192], &vec![0; 8192], &vec![0; 4096]);
        let addr = crate::archive::flash(&mut archive, 0, &mut mem);
        assert_eq!(addr, 0x0801);
        assert_eq!(mem.ram_read(0x0801), 0x99);
        assert_eq!(mem.ram_read(0x0806), 0x00);
    }
}
