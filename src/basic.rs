//! A minimal, concrete implementation of the directory-entry abstractions
//! the core treats as external collaborators.
//!
//! This module exists so the engine is exercisable end to end (mkfs's
//! volume-label injection needs *some* concrete entry type) without forcing
//! every caller to adopt it.

use bitflags::bitflags;

use crate::directory::{DirEntryCodec, RECORD_SIZE};

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY   = 0x01;
        const HIDDEN      = 0x02;
        const SYSTEM      = 0x04;
        const VOLUME_ID   = 0x08;
        const DIRECTORY   = 0x10;
        const ARCHIVE     = 0x20;
    }
}

/// DOS-packed date/time, decoded into its component fields.
///
/// `year = (date >> 9) + 1980`, `month = (date >> 5) & 0xF`, `day = date & 0x1F`;
/// `hour = time >> 11`, `minute = (time >> 5) & 0x3F`, `second = (time & 0x1F) * 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosTimestamp {
    pub date: u16,
    pub time: u16,
}

impl DosTimestamp {
    pub fn year(self) -> u16 {
        (self.date >> 9) + 1980
    }

    pub fn month(self) -> u8 {
        ((self.date >> 5) & 0xF) as u8
    }

    pub fn day(self) -> u8 {
        (self.date & 0x1F) as u8
    }

    pub fn hour(self) -> u8 {
        (self.time >> 11) as u8
    }

    pub fn minute(self) -> u8 {
        ((self.time >> 5) & 0x3F) as u8
    }

    pub fn second(self) -> u8 {
        ((self.time & 0x1F) * 2) as u8
    }

    pub fn from_chrono(dt: chrono::NaiveDateTime) -> DosTimestamp {
        use chrono::{Datelike, Timelike};
        let date = (((dt.year() - 1980).max(0) as u16) << 9)
            | ((dt.month() as u16) << 5)
            | dt.day() as u16;
        let time =
            ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        DosTimestamp { date, time }
    }
}

/// A short-name (8.3) directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: [u8; 11],
    pub attributes: FileAttributes,
    pub created: DosTimestamp,
    pub modified: DosTimestamp,
    pub accessed_date: u16,
    pub first_cluster: u32,
    pub size: u32,
}

impl ShortEntry {
    pub fn to_record(&self) -> [u8; RECORD_SIZE] {
        let mut r = [0u8; RECORD_SIZE];
        r[0..11].copy_from_slice(&self.name);
        r[11] = self.attributes.bits();
        r[14..16].copy_from_slice(&self.created.time.to_le_bytes());
        r[16..18].copy_from_slice(&self.created.date.to_le_bytes());
        r[18..20].copy_from_slice(&self.accessed_date.to_le_bytes());
        r[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        r[22..24].copy_from_slice(&self.modified.time.to_le_bytes());
        r[24..26].copy_from_slice(&self.modified.date.to_le_bytes());
        r[26..28].copy_from_slice(&(self.first_cluster as u16).to_le_bytes());
        r[28..32].copy_from_slice(&self.size.to_le_bytes());
        r
    }

    pub fn from_record(r: &[u8; RECORD_SIZE]) -> ShortEntry {
        let hi = u16::from_le_bytes([r[20], r[21]]) as u32;
        let lo = u16::from_le_bytes([r[26], r[27]]) as u32;
        ShortEntry {
            name: r[0..11].try_into().unwrap(),
            attributes: FileAttributes::from_bits_truncate(r[11]),
            created: DosTimestamp {
                time: u16::from_le_bytes([r[14], r[15]]),
                date: u16::from_le_bytes([r[16], r[17]]),
            },
            modified: DosTimestamp {
                time: u16::from_le_bytes([r[22], r[23]]),
                date: u16::from_le_bytes([r[24], r[25]]),
            },
            accessed_date: u16::from_le_bytes([r[18], r[19]]),
            first_cluster: (hi << 16) | lo,
            size: u32::from_le_bytes([r[28], r[29], r[30], r[31]]),
        }
    }
}

/// A directory entry as reassembled by [`BasicCodec`]: a short entry plus,
/// when present, its long name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub short: ShortEntry,
    pub long_name: Option<String>,
}

#[derive(Default, Clone)]
pub struct LfnCarry {
    /// Raw LFN records collected in on-disk order (highest sequence first);
    /// reversed and decoded once the owning short entry is seen.
    parts: Vec<[u8; RECORD_SIZE]>,
}

pub struct BasicCodec;

fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &b in short_name {
        sum = (sum >> 1).wrapping_add(sum << 7).wrapping_add(b);
    }
    sum
}

fn decode_lfn_part(record: &[u8; RECORD_SIZE]) -> Vec<u16> {
    let mut units = Vec::with_capacity(13);
    for i in (1..11).step_by(2) {
        units.push(u16::from_le_bytes([record[i], record[i + 1]]));
    }
    for i in (14..26).step_by(2) {
        units.push(u16::from_le_bytes([record[i], record[i + 1]]));
    }
    for i in (28..32).step_by(2) {
        units.push(u16::from_le_bytes([record[i], record[i + 1]]));
    }
    units
}

impl DirEntryCodec for BasicCodec {
    type Entry = Entry;
    type LfnCarry = LfnCarry;

    fn accumulate_lfn(carry: &mut Self::LfnCarry, record: &[u8; RECORD_SIZE]) {
        carry.parts.push(*record);
    }

    fn build_entry(record: &[u8; RECORD_SIZE], carry: Self::LfnCarry) -> Self::Entry {
        let short = ShortEntry::from_record(record);
        let expected_checksum = lfn_checksum(&short.name);

        let mut parts = carry.parts;
        parts.sort_by_key(|r| r[0] & 0x1F);

        let valid = !parts.is_empty() && parts.iter().all(|r| r[13] == expected_checksum);

        let long_name = if valid {
            let mut units = Vec::new();
            for part in &parts {
                units.extend(decode_lfn_part(part));
            }
            if let Some(term) = units.iter().position(|&u| u == 0x0000) {
                units.truncate(term);
            } else {
                while units.last() == Some(&0xFFFF) {
                    units.pop();
                }
            }
            Some(String::from_utf16_lossy(&units))
        } else {
            None
        };

        Entry { short, long_name }
    }

    fn is_directory(entry: &Self::Entry) -> bool {
        entry.short.attributes.contains(FileAttributes::DIRECTORY)
    }

    fn is_dot_or_dotdot(entry: &Self::Entry) -> bool {
        &entry.short.name[0..1] == b"." && (entry.short.name[1] == b' ' || entry.short.name[1] == b'.')
    }

    fn start_cluster(entry: &Self::Entry) -> u32 {
        entry.short.first_cluster
    }
}

/// Build an 8.3-padded name from an ASCII label, space-padding to 11 bytes
/// and upper-casing, for the volume-label entry `mkfs` writes.
pub fn pad_short_name(label: &str) -> [u8; 11] {
    let mut name = [b' '; 11];
    for (slot, byte) in name.iter_mut().zip(label.as_bytes().iter().take(11)) {
        *slot = byte.to_ascii_uppercase();
    }
    name
}

pub fn volume_label_entry(label: &str, timestamp: DosTimestamp) -> ShortEntry {
    ShortEntry {
        name: pad_short_name(label),
        attributes: FileAttributes::VOLUME_ID,
        created: timestamp,
        modified: timestamp,
        accessed_date: timestamp.date,
        first_cluster: 0,
        size: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_entry_roundtrip() {
        let e = ShortEntry {
            name: *b"HELLO   TXT",
            attributes: FileAttributes::ARCHIVE,
            created: DosTimestamp { date: 0x4A21, time: 0x5000 },
            modified: DosTimestamp { date: 0x4A22, time: 0x5100 },
            accessed_date: 0x4A23,
            first_cluster: 0x0001_0002,
            size: 4096,
        };
        let record = e.to_record();
        let back = ShortEntry::from_record(&record);
        pretty_assertions::assert_eq!(e, back);
    }

    #[test]
    fn dos_timestamp_from_chrono() {
        let dt = chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(13, 5, 40)
            .unwrap();
        let ts = DosTimestamp::from_chrono(dt);
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 3);
        assert_eq!(ts.day(), 15);
        assert_eq!(ts.hour(), 13);
        assert_eq!(ts.minute(), 5);
        assert_eq!(ts.second(), 40);
    }

    #[test]
    fn volume_label_name_is_padded_and_uppercased() {
        let name = pad_short_name("data");
        assert_eq!(&name, b"DATA       ");
    }

    #[test]
    fn lfn_checksum_matches_reference_algorithm() {
        // "FOOBAR~1   " -> checksum computed by the standard rotate-and-add.
        let short = *b"FOOBAR~1   ";
        let sum = lfn_checksum(&short);
        // Recompute manually to cross-check the implementation, not a magic
        // literal from elsewhere.
        let mut expected: u8 = 0;
        for &b in &short {
            expected = (expected >> 1).wrapping_add(expected << 7).wrapping_add(b);
        }
        assert_eq!(sum, expected);
    }
}
