//! Parsing, validation, and serialization of the boot sector.

mod raw;

use bytemuck::{bytes_of, pod_read_unaligned};

use crate::error::{FatError, Result};
use raw::{RawBpbCommon, RawBpbExt16, RawBpbExt32, SIGNATURE, SIG_OFFSET};

/// The common geometry fields present regardless of FAT width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpbCommon {
    pub jmp_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sec: u16,
    pub sec_per_clus: u8,
    pub rsvd_sec_cnt: u16,
    pub num_fats: u8,
    pub root_ent_cnt: u16,
    pub tot_sec16: u16,
    pub media: u8,
    pub fat_sz16: u16,
    pub sec_per_trk: u16,
    pub num_heads: u16,
    pub hidd_sec: u32,
    pub tot_sec32: u32,
}

/// Tail fields identical in shape between the FAT16 and FAT32 forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpbTail {
    pub drv_num: u8,
    pub reserved1: u8,
    pub boot_sig: u8,
    pub vol_id: u32,
    pub vol_lab: [u8; 11],
    pub fil_sys_type: [u8; 8],
}

/// FAT32-only extended fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bpb32Ext {
    pub fat_sz32: u32,
    pub ext_flags: u16,
    pub fs_ver: u16,
    pub root_clus: u32,
    pub fs_info: u16,
    pub bk_boot_sec: u16,
}

/// A fully parsed boot sector, in either its FAT12/16 or FAT32 shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bpb {
    Fat1216 { common: BpbCommon, tail: BpbTail },
    Fat32 { common: BpbCommon, ext: Bpb32Ext, tail: BpbTail },
}

impl Bpb {
    pub fn common(&self) -> &BpbCommon {
        match self {
            Bpb::Fat1216 { common, .. } => common,
            Bpb::Fat32 { common, .. } => common,
        }
    }

    pub fn tail(&self) -> &BpbTail {
        match self {
            Bpb::Fat1216 { tail, .. } => tail,
            Bpb::Fat32 { tail, .. } => tail,
        }
    }

    pub fn fat_size_sectors(&self) -> u32 {
        match self {
            Bpb::Fat1216 { common, .. } => common.fat_sz16 as u32,
            Bpb::Fat32 { ext, .. } => ext.fat_sz32,
        }
    }

    pub fn total_sectors(&self) -> u32 {
        let common = self.common();
        if common.tot_sec16 != 0 {
            common.tot_sec16 as u32
        } else {
            common.tot_sec32
        }
    }

    pub fn set_nt_dirty_bit(&mut self, dirty: bool) {
        let tail = match self {
            Bpb::Fat1216 { tail, .. } => tail,
            Bpb::Fat32 { tail, .. } => tail,
        };
        if dirty {
            tail.reserved1 |= 0x01;
        } else {
            tail.reserved1 &= !0x01;
        }
    }

    pub fn nt_dirty_bit(&self) -> bool {
        self.tail().reserved1 & 0x01 != 0
    }

    pub fn root_dir_sectors(&self) -> u32 {
        let common = self.common();
        ((common.root_ent_cnt as u32 * 32) + (common.bytes_per_sec as u32 - 1))
            / common.bytes_per_sec as u32
    }

    /// Parse and validate a 512-byte boot sector (jmpBoot shape, power-of-two
    /// sector/cluster sizes, media byte, reserved-sector count, FAT count,
    /// root-entry alignment, signature).
    pub fn parse(sector: &[u8; 512]) -> Result<Bpb> {
        if sector[SIG_OFFSET..SIG_OFFSET + 2] != SIGNATURE {
            return Err(FatError::BadSignature);
        }

        let raw_common: RawBpbCommon = pod_read_unaligned(&sector[0..36]);
        let common = BpbCommon {
            jmp_boot: raw_common.jmp_boot,
            oem_name: raw_common.oem_name,
            bytes_per_sec: u16::from_le_bytes(raw_common.bytes_per_sec),
            sec_per_clus: raw_common.sec_per_clus,
            rsvd_sec_cnt: u16::from_le_bytes(raw_common.rsvd_sec_cnt),
            num_fats: raw_common.num_fats,
            root_ent_cnt: u16::from_le_bytes(raw_common.root_ent_cnt),
            tot_sec16: u16::from_le_bytes(raw_common.tot_sec16),
            media: raw_common.media,
            fat_sz16: u16::from_le_bytes(raw_common.fat_sz16),
            sec_per_trk: u16::from_le_bytes(raw_common.sec_per_trk),
            num_heads: u16::from_le_bytes(raw_common.num_heads),
            hidd_sec: u32::from_le_bytes(raw_common.hidd_sec),
            tot_sec32: u32::from_le_bytes(raw_common.tot_sec32),
        };

        validate_jmp_boot(&common.jmp_boot)?;
        validate_bytes_per_sec(common.bytes_per_sec)?;
        validate_sec_per_clus(common.sec_per_clus)?;
        validate_media(common.media)?;
        validate_rsvd_sec_cnt(common.rsvd_sec_cnt)?;
        validate_num_fats(common.num_fats)?;
        if common.root_ent_cnt != 0
            && (common.root_ent_cnt as u32 * 32) % common.bytes_per_sec as u32 != 0
        {
            return Err(FatError::BadRootEntAlign);
        }
        if common.tot_sec16 == 0 && common.tot_sec32 == 0 {
            return Err(FatError::BadTotalSectors);
        }

        if common.fat_sz16 != 0 {
            let raw_tail: RawBpbExt16 = pod_read_unaligned(&sector[36..62]);
            let tail = BpbTail {
                drv_num: raw_tail.drv_num,
                reserved1: raw_tail.reserved1,
                boot_sig: raw_tail.boot_sig,
                vol_id: u32::from_le_bytes(raw_tail.vol_id),
                vol_lab: raw_tail.vol_lab,
                fil_sys_type: raw_tail.fil_sys_type,
            };
            Ok(Bpb::Fat1216 { common, tail })
        } else {
            let raw_ext: RawBpbExt32 = pod_read_unaligned(&sector[36..90]);
            if raw_ext.fat_sz32 == [0; 4] {
                return Err(FatError::BadFatSz);
            }
            let ext = Bpb32Ext {
                fat_sz32: u32::from_le_bytes(raw_ext.fat_sz32),
                ext_flags: u16::from_le_bytes(raw_ext.ext_flags),
                fs_ver: u16::from_le_bytes(raw_ext.fs_ver),
                root_clus: u32::from_le_bytes(raw_ext.root_clus),
                fs_info: u16::from_le_bytes(raw_ext.fs_info),
                bk_boot_sec: u16::from_le_bytes(raw_ext.bk_boot_sec),
            };
            let tail = BpbTail {
                drv_num: raw_ext.drv_num,
                reserved1: raw_ext.reserved1,
                boot_sig: raw_ext.boot_sig,
                vol_id: u32::from_le_bytes(raw_ext.vol_id),
                vol_lab: raw_ext.vol_lab,
                fil_sys_type: raw_ext.fil_sys_type,
            };
            Ok(Bpb::Fat32 { common, ext, tail })
        }
    }

    /// Serialize back to a 512-byte boot sector, normalizing the trailing
    /// bytes of the boot-code area to zero (the boot stub itself is written
    /// separately by `mkfs`).
    pub fn serialize(&self) -> [u8; 512] {
        let mut out = [0u8; 512];
        let raw_common = RawBpbCommon {
            jmp_boot: self.common().jmp_boot,
            oem_name: self.common().oem_name,
            bytes_per_sec: self.common().bytes_per_sec.to_le_bytes(),
            sec_per_clus: self.common().sec_per_clus,
            rsvd_sec_cnt: self.common().rsvd_sec_cnt.to_le_bytes(),
            num_fats: self.common().num_fats,
            root_ent_cnt: self.common().root_ent_cnt.to_le_bytes(),
            tot_sec16: self.common().tot_sec16.to_le_bytes(),
            media: self.common().media,
            fat_sz16: self.common().fat_sz16.to_le_bytes(),
            sec_per_trk: self.common().sec_per_trk.to_le_bytes(),
            num_heads: self.common().num_heads.to_le_bytes(),
            hidd_sec: self.common().hidd_sec.to_le_bytes(),
            tot_sec32: self.common().tot_sec32.to_le_bytes(),
        };
        out[0..36].copy_from_slice(bytes_of(&raw_common));

        match self {
            Bpb::Fat1216 { tail, .. } => {
                let raw_tail = RawBpbExt16 {
                    drv_num: tail.drv_num,
                    reserved1: tail.reserved1,
                    boot_sig: tail.boot_sig,
                    vol_id: tail.vol_id.to_le_bytes(),
                    vol_lab: tail.vol_lab,
                    fil_sys_type: tail.fil_sys_type,
                };
                out[36..62].copy_from_slice(bytes_of(&raw_tail));
            }
            Bpb::Fat32 { ext, tail, .. } => {
                let raw_ext = RawBpbExt32 {
                    fat_sz32: ext.fat_sz32.to_le_bytes(),
                    ext_flags: ext.ext_flags.to_le_bytes(),
                    fs_ver: ext.fs_ver.to_le_bytes(),
                    root_clus: ext.root_clus.to_le_bytes(),
                    fs_info: ext.fs_info.to_le_bytes(),
                    bk_boot_sec: ext.bk_boot_sec.to_le_bytes(),
                    reserved: [0; 12],
                    drv_num: tail.drv_num,
                    reserved1: tail.reserved1,
                    boot_sig: tail.boot_sig,
                    vol_id: tail.vol_id.to_le_bytes(),
                    vol_lab: tail.vol_lab,
                    fil_sys_type: tail.fil_sys_type,
                };
                out[36..90].copy_from_slice(bytes_of(&raw_ext));
            }
        }

        out[SIG_OFFSET..SIG_OFFSET + 2].copy_from_slice(&SIGNATURE);
        out
    }
}

fn validate_jmp_boot(jmp: &[u8; 3]) -> Result<()> {
    match jmp[0] {
        0xEB if jmp[2] == 0x90 => Ok(()),
        0xE9 => Ok(()),
        _ => Err(FatError::BadJmpBoot),
    }
}

fn validate_bytes_per_sec(v: u16) -> Result<()> {
    match v {
        512 | 1024 | 2048 | 4096 => Ok(()),
        _ => Err(FatError::BadBytsPerSec),
    }
}

fn validate_sec_per_clus(v: u8) -> Result<()> {
    if v != 0 && v.is_power_of_two() && v <= 128 {
        Ok(())
    } else {
        Err(FatError::BadSecPerClus)
    }
}

fn validate_media(v: u8) -> Result<()> {
    if v == 0xF0 || v >= 0xF8 {
        Ok(())
    } else {
        Err(FatError::BadMedia)
    }
}

fn validate_rsvd_sec_cnt(v: u16) -> Result<()> {
    if v >= 1 {
        Ok(())
    } else {
        Err(FatError::BadRsvdSecCnt)
    }
}

fn validate_num_fats(v: u8) -> Result<()> {
    if v >= 1 {
        Ok(())
    } else {
        Err(FatError::BadNumFats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fat32_sector() -> [u8; 512] {
        let mut s = [0u8; 512];
        s[0] = 0xEB;
        s[2] = 0x90;
        s[11..13].copy_from_slice(&512u16.to_le_bytes());
        s[13] = 1; // sec_per_clus
        s[14..16].copy_from_slice(&32u16.to_le_bytes()); // rsvd_sec_cnt
        s[16] = 2; // num_fats
        // root_ent_cnt = 0 (fat32)
        s[21] = 0xF8; // media
        // fat_sz16 = 0 -> fat32
        s[32..36].copy_from_slice(&204800u32.to_le_bytes()); // tot_sec32
        s[36..40].copy_from_slice(&1000u32.to_le_bytes()); // fat_sz32
        s[44..48].copy_from_slice(&2u32.to_le_bytes()); // root_clus
        s[510] = 0x55;
        s[511] = 0xAA;
        s
    }

    #[test]
    fn parse_fat32_roundtrip() {
        let sector = sample_fat32_sector();
        let bpb = Bpb::parse(&sector).unwrap();
        assert!(matches!(bpb, Bpb::Fat32 { .. }));
        assert_eq!(bpb.fat_size_sectors(), 1000);
        assert_eq!(bpb.total_sectors(), 204800);

        let out = bpb.serialize();
        assert_eq!(out[0..36], sector[0..36]);
        assert_eq!(out[36..90], sector[36..90]);
        assert_eq!(out[510..512], sector[510..512]);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut sector = sample_fat32_sector();
        sector[511] = 0;
        assert!(matches!(Bpb::parse(&sector), Err(FatError::BadSignature)));
    }

    #[test]
    fn rejects_bad_media() {
        let mut sector = sample_fat32_sector();
        sector[21] = 0x01;
        assert!(matches!(Bpb::parse(&sector), Err(FatError::BadMedia)));
    }

    #[test]
    fn rejects_zero_rsvd_sec_cnt() {
        let mut sector = sample_fat32_sector();
        sector[14..16].copy_from_slice(&0u16.to_le_bytes());
        assert!(matches!(Bpb::parse(&sector), Err(FatError::BadRsvdSecCnt)));
    }

    #[test]
    fn rejects_zero_num_fats() {
        let mut sector = sample_fat32_sector();
        sector[16] = 0;
        assert!(matches!(Bpb::parse(&sector), Err(FatError::BadNumFats)));
    }

    #[test]
    fn accepts_near_jump() {
        let mut sector = sample_fat32_sector();
        sector[0] = 0xE9;
        sector[1] = 0x00;
        sector[2] = 0x00;
        assert!(Bpb::parse(&sector).is_ok());
    }
}
