//! Formatting: building a fresh FAT12/16/32 filesystem on a container.
//!
//! The SecPerClus selection tables, the FATSz formula, and the reserved/root
//! sector-count defaults follow `PyFat.mkfs`.

use chrono::Local;

use crate::basic::{volume_label_entry, DosTimestamp};
use crate::bpb::{Bpb, Bpb32Ext, BpbCommon, BpbTail};
use crate::container::{ByteContainer, Offset};
use crate::error::{FatError, Result};
use crate::fat::FatTable;
use crate::geometry::{FatType, Geometry};

#[derive(Debug, Clone)]
pub struct MkfsOptions {
    /// If `None`, chosen from `total_sectors` the same way the msft
    /// convention would classify the resulting geometry.
    pub fat_type: Option<FatType>,
    pub sector_size: u32,
    pub num_fats: u8,
    pub label: String,
    pub volume_id: Option<u32>,
    pub media_type: u8,
}

impl Default for MkfsOptions {
    fn default() -> Self {
        MkfsOptions {
            fat_type: None,
            sector_size: 512,
            num_fats: 2,
            label: String::new(),
            volume_id: None,
            media_type: 0xF8,
        }
    }
}

/// `(max_total_sectors, sectors_per_cluster)`, first match wins; a
/// `sectors_per_cluster` of 0 means the size is invalid for that FAT type.
const FAT32_TABLE: &[(u32, u8)] = &[
    (66_600, 0),
    (532_480, 1),
    (16_777_216, 8),
    (33_554_432, 16),
    (67_108_864, 32),
];
const FAT16_TABLE: &[(u32, u8)] = &[
    (8_400, 0),
    (32_680, 2),
    (262_144, 4),
    (524_288, 8),
    (1_048_576, 16),
    (2_097_152, 32),
    (4_194_304, 64),
];
const FAT12_TABLE: &[(u32, u8)] = &[(32_768, 64)];

fn recommended_sec_per_clus(fat_type: FatType, total_sectors: u32) -> Result<u8> {
    let table = match fat_type {
        FatType::Fat32 => FAT32_TABLE,
        FatType::Fat16 => FAT16_TABLE,
        FatType::Fat12 => FAT12_TABLE,
    };
    for &(max_sectors, spc) in table {
        if total_sectors <= max_sectors {
            return if spc == 0 {
                Err(FatError::BadSecPerClus)
            } else {
                Ok(spc)
            };
        }
    }
    table
        .last()
        .map(|&(_, spc)| spc)
        .filter(|&spc| spc != 0)
        .ok_or(FatError::BadSecPerClus)
}

/// fatgen103's `FATSz` formula.
fn fat_size_sectors(
    total_sectors: u32,
    rsvd_sec_cnt: u32,
    root_dir_sectors: u32,
    sec_per_clus: u32,
    num_fats: u32,
    fat_type: FatType,
) -> u32 {
    let tmp_val1 = total_sectors - (rsvd_sec_cnt + root_dir_sectors);
    let mut tmp_val2 = 256 * sec_per_clus + num_fats;
    if fat_type == FatType::Fat32 {
        tmp_val2 /= 2;
    }
    (tmp_val1 + (tmp_val2 - 1)) / tmp_val2
}

/// A benign real-mode boot stub: reboot via `int 0x19`, then spin in place,
/// in lieu of real boot code. Not intended to be bootable; just harmless.
fn boot_stub() -> Vec<u8> {
    let mut code = vec![0xCD, 0x19]; // int 0x19 (reboot)
    code.extend_from_slice(&[0xEB, 0xFE]); // jmp $ (spin forever)
    code.extend_from_slice(b"This is not a bootable disk. Please insert a bootable floppy.\r\n");
    code
}

fn write_boot_stub_into(sector: &mut [u8; 512], code_offset: usize) {
    let code = boot_stub();
    let end = (code_offset + code.len()).min(510);
    let len = end - code_offset;
    sector[code_offset..code_offset + len].copy_from_slice(&code[..len]);
}

/// Minimal FSInfo block writer: like `basic::ShortEntry`, FSInfo encoding is
/// an external concern this crate ships one concrete implementation of so
/// mkfs can exercise it.
fn encode_fs_info(free_count: u32, next_free: u32) -> [u8; 512] {
    let mut s = [0u8; 512];
    s[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
    s[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
    s[488..492].copy_from_slice(&free_count.to_le_bytes());
    s[492..496].copy_from_slice(&next_free.to_le_bytes());
    s[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
    s
}

fn generate_volume_id() -> u32 {
    let now = Local::now().naive_local();
    let ts = DosTimestamp::from_chrono(now);
    ((ts.date as u32) << 16) | ts.time as u32
}

/// Format `container` as a fresh FAT volume per `options`, truncating it to
/// `size_sectors * options.sector_size` bytes first.
pub fn mkfs<C: ByteContainer>(
    container: C,
    size_sectors: u32,
    options: MkfsOptions,
) -> Result<()> {
    if !options.sector_size.is_power_of_two() || options.sector_size < 512 {
        return Err(FatError::BadBytsPerSec);
    }

    let mut container = Offset::new(container, 0);
    container.truncate(size_sectors as u64 * options.sector_size as u64)?;

    let fat_type = match options.fat_type {
        Some(t) => t,
        None if size_sectors <= 8400 => FatType::Fat12,
        None if size_sectors <= 1_048_576 => FatType::Fat16,
        None => FatType::Fat32,
    };

    let sec_per_clus = recommended_sec_per_clus(fat_type, size_sectors)? as u32;
    let rsvd_sec_cnt = if fat_type == FatType::Fat32 { 32 } else { 1 };
    let root_ent_cnt = match fat_type {
        FatType::Fat32 => 0,
        FatType::Fat16 => 512,
        FatType::Fat12 => 224,
    };
    let root_dir_sectors = (root_ent_cnt * 32 + options.sector_size - 1) / options.sector_size;
    let fat_sz = fat_size_sectors(
        size_sectors,
        rsvd_sec_cnt,
        root_dir_sectors,
        sec_per_clus,
        options.num_fats as u32,
        fat_type,
    );

    let volume_id = options.volume_id.unwrap_or_else(generate_volume_id);

    let common = BpbCommon {
        jmp_boot: [0xEB, 0x00, 0x90],
        oem_name: *b"FATVOL  ",
        bytes_per_sec: options.sector_size as u16,
        sec_per_clus: sec_per_clus as u8,
        rsvd_sec_cnt: rsvd_sec_cnt as u16,
        num_fats: options.num_fats,
        root_ent_cnt: root_ent_cnt as u16,
        tot_sec16: if size_sectors <= 0xFFFF && fat_type != FatType::Fat32 {
            size_sectors as u16
        } else {
            0
        },
        media: options.media_type,
        fat_sz16: if fat_type == FatType::Fat32 { 0 } else { fat_sz as u16 },
        sec_per_trk: 63,
        num_heads: 255,
        hidd_sec: 0,
        tot_sec32: if size_sectors > 0xFFFF || fat_type == FatType::Fat32 {
            size_sectors
        } else {
            0
        },
    };

    let mut label_bytes = [b' '; 11];
    for (slot, b) in label_bytes.iter_mut().zip(options.label.as_bytes()) {
        *slot = b.to_ascii_uppercase();
    }

    let tail = BpbTail {
        drv_num: if fat_type == FatType::Fat12 { 0x00 } else { 0x80 },
        reserved1: 0x01, // dirty until this session's close()
        boot_sig: 0x29,
        vol_id: volume_id,
        vol_lab: label_bytes,
        fil_sys_type: match fat_type {
            FatType::Fat12 => *b"FAT12   ",
            FatType::Fat16 => *b"FAT16   ",
            FatType::Fat32 => *b"FAT32   ",
        },
    };

    let root_clus = if fat_type == FatType::Fat32 { 2 } else { 0 };
    let bpb = if fat_type == FatType::Fat32 {
        Bpb::Fat32 {
            common,
            ext: Bpb32Ext {
                fat_sz32: fat_sz,
                ext_flags: 0,
                fs_ver: 0,
                root_clus,
                fs_info: 1,
                bk_boot_sec: 6,
            },
            tail,
        }
    } else {
        Bpb::Fat1216 { common, tail }
    };

    let geometry = Geometry::from_bpb(&bpb)?;

    let mut boot_sector = bpb.serialize();
    write_boot_stub_into(&mut boot_sector, 62 + if fat_type == FatType::Fat32 { 28 } else { 0 });
    container.write_at(0, &boot_sector)?;
    if let Bpb::Fat32 { ext, .. } = &bpb {
        let addr = ext.bk_boot_sec as u64 * options.sector_size as u64;
        container.write_at(addr, &boot_sector)?;
    }

    let cell_count = geometry.cluster_count as usize + 2;
    let mut fat = FatTable::new(fat_type, cell_count);
    let media_nibble = options.media_type as u32;
    match fat_type {
        FatType::Fat12 => {
            fat.set_raw(0, 0x0F00 | media_nibble);
            fat.set_raw(1, crate::fat::constants::fat12::SPECIAL_EOC as u32);
        }
        FatType::Fat16 => {
            fat.set_raw(0, 0xFF00 | media_nibble);
            fat.set_raw(1, 0xFFFF);
        }
        FatType::Fat32 => {
            fat.set_raw(0, 0x0FFF_FF00 | media_nibble);
            fat.set_raw(1, 0x0FFF_FFFF);
        }
    }

    let mut allocated_root = None;
    if fat_type == FatType::Fat32 {
        fat.set_eoc(root_clus);
        allocated_root = Some(root_clus);
    }

    let encoded_fat = fat.encode();
    for copy in 0..geometry.num_fats {
        let addr = (geometry.first_fat_sector as u64 + copy as u64 * geometry.fat_size_sectors as u64)
            * geometry.bytes_per_sec as u64;
        container.write_at(addr, &encoded_fat)?;
    }

    if fat_type == FatType::Fat32 {
        let used = if allocated_root.is_some() { 1 } else { 0 };
        let fs_info = encode_fs_info(geometry.cluster_count - used, 3);
        container.write_at(512, &fs_info)?;
        let addr = (ext_bk_boot_sec(&bpb) as u64 + 1) * options.sector_size as u64;
        container.write_at(addr, &fs_info)?;
    }

    let now = Local::now().naive_local();
    let ts = DosTimestamp::from_chrono(now);
    let label_entry = volume_label_entry(options.label.trim(), ts);
    let record = label_entry.to_record();

    if fat_type == FatType::Fat32 {
        let mut buf = vec![0u8; geometry.bytes_per_cluster as usize];
        buf[..32].copy_from_slice(&record);
        let addr = geometry.cluster_byte_addr(root_clus);
        container.write_at(addr, &buf)?;
    } else {
        let mut buf = vec![0u8; root_dir_sectors as usize * options.sector_size as usize];
        buf[..32].copy_from_slice(&record);
        let addr = geometry.first_root_dir_sector as u64 * geometry.bytes_per_sec as u64;
        container.write_at(addr, &buf)?;
    }

    Ok(())
}

fn ext_bk_boot_sec(bpb: &Bpb) -> u16 {
    match bpb {
        Bpb::Fat32 { ext, .. } => ext.bk_boot_sec,
        Bpb::Fat1216 { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpb::Bpb;
    use std::io::Cursor;

    #[test]
    fn mkfs_fat32_small_produces_valid_bpb() {
        let buf = vec![0u8; 133120 * 512];
        let mut container = Cursor::new(buf);
        mkfs(
            &mut container,
            133120,
            MkfsOptions {
                fat_type: Some(FatType::Fat32),
                label: "DATA".into(),
                ..MkfsOptions::default()
            },
        )
        .unwrap();

        let data = container.into_inner();
        let mut sector = [0u8; 512];
        sector.copy_from_slice(&data[0..512]);
        let bpb = Bpb::parse(&sector).unwrap();
        assert!(matches!(bpb, Bpb::Fat32 { .. }));
    }

    #[test]
    fn mkfs_fat12_floppy_produces_valid_bpb() {
        let size_sectors = 2880u32; // 1.44MB floppy
        let buf = vec![0u8; size_sectors as usize * 512];
        let mut container = Cursor::new(buf);
        mkfs(
            &mut container,
            size_sectors,
            MkfsOptions {
                fat_type: Some(FatType::Fat12),
                label: "FLOPPY".into(),
                num_fats: 2,
                ..MkfsOptions::default()
            },
        )
        .unwrap();

        let data = container.into_inner();
        let mut sector = [0u8; 512];
        sector.copy_from_slice(&data[0..512]);
        let bpb = Bpb::parse(&sector).unwrap();
        assert!(matches!(bpb, Bpb::Fat1216 { .. }));
    }

    #[test]
    fn invalid_size_for_fat_type_is_rejected() {
        let size_sectors = 2880u32;
        let buf = vec![0u8; size_sectors as usize * 512];
        let mut container = Cursor::new(buf);
        let err = mkfs(
            &mut container,
            size_sectors,
            MkfsOptions {
                fat_type: Some(FatType::Fat32),
                ..MkfsOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, FatError::BadSecPerClus));
    }
}
