//! FAT-type classification and derived volume geometry.
//!
//! The dual-convention reconciliation (cluster-count thresholds vs. the
//! `BPB_FATSz16 == 0` heuristic) mirrors `PyFat.__determine_fat_type`, which
//! computes both the "msft" and "linux" conventions and prefers the latter
//! on disagreement, logging a warning.

use log::warn;

use crate::bpb::Bpb;
use crate::error::{FatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn bits(self) -> u32 {
        match self {
            FatType::Fat12 => 12,
            FatType::Fat16 => 16,
            FatType::Fat32 => 28,
        }
    }
}

/// Geometry derived from a parsed [`Bpb`]: everything downstream code needs
/// to translate between sectors, clusters, and byte offsets.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub fat_type: FatType,
    pub bytes_per_sec: u32,
    pub sec_per_clus: u32,
    pub bytes_per_cluster: u32,
    pub rsvd_sec_cnt: u32,
    pub num_fats: u32,
    pub fat_size_sectors: u32,
    pub root_dir_sectors: u32,
    pub first_root_dir_sector: u32,
    pub first_data_sector: u32,
    pub first_fat_sector: u32,
    pub total_sectors: u32,
    pub cluster_count: u32,
    pub root_ent_cnt: u32,
    pub root_clus: u32,
}

impl Geometry {
    pub fn from_bpb(bpb: &Bpb) -> Result<Geometry> {
        let common = bpb.common();
        let bytes_per_sec = common.bytes_per_sec as u32;
        let sec_per_clus = common.sec_per_clus as u32;
        let rsvd_sec_cnt = common.rsvd_sec_cnt as u32;
        let num_fats = common.num_fats as u32;
        let fat_size_sectors = bpb.fat_size_sectors();
        let root_dir_sectors = bpb.root_dir_sectors();
        let total_sectors = bpb.total_sectors();

        if fat_size_sectors == 0 {
            return Err(FatError::BadFatSz);
        }

        let first_fat_sector = rsvd_sec_cnt;
        let first_root_dir_sector = first_fat_sector + num_fats * fat_size_sectors;
        let first_data_sector = first_root_dir_sector + root_dir_sectors;

        let data_sectors = total_sectors.saturating_sub(first_data_sector);
        let cluster_count = if sec_per_clus == 0 {
            0
        } else {
            data_sectors / sec_per_clus
        };

        let fat_type = classify(cluster_count, matches!(bpb, Bpb::Fat32 { .. }));

        let root_clus = match bpb {
            Bpb::Fat32 { ext, .. } => ext.root_clus,
            Bpb::Fat1216 { .. } => 0,
        };

        Ok(Geometry {
            fat_type,
            bytes_per_sec,
            sec_per_clus,
            bytes_per_cluster: bytes_per_sec * sec_per_clus,
            rsvd_sec_cnt,
            num_fats,
            fat_size_sectors,
            root_dir_sectors,
            first_root_dir_sector,
            first_data_sector,
            first_fat_sector,
            total_sectors,
            cluster_count,
            root_ent_cnt: common.root_ent_cnt as u32,
            root_clus,
        })
    }

    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        (cluster - 2) * self.sec_per_clus + self.first_data_sector
    }

    pub fn cluster_byte_addr(&self, cluster: u32) -> u64 {
        self.cluster_to_sector(cluster) as u64 * self.bytes_per_sec as u64
    }
}

/// Classify cluster count per the "msft" thresholds, reconciled against the
/// "linux" BPB-shape convention (`is_fat32_shaped`).
fn classify(cluster_count: u32, is_fat32_shaped: bool) -> FatType {
    let by_count = if cluster_count < 4085 {
        FatType::Fat12
    } else if cluster_count < 65525 {
        FatType::Fat16
    } else {
        FatType::Fat32
    };

    let by_shape = if is_fat32_shaped {
        FatType::Fat32
    } else if cluster_count < 4085 {
        FatType::Fat12
    } else {
        FatType::Fat16
    };

    if by_count != by_shape {
        warn!(
            "FAT type ambiguous: cluster-count convention says {:?}, BPB-shape convention says {:?}; using the latter",
            by_count, by_shape
        );
        by_shape
    } else {
        by_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fat32_shape_even_with_few_clusters() {
        assert_eq!(classify(100, true), FatType::Fat32);
    }

    #[test]
    fn classifies_fat16_by_count() {
        assert_eq!(classify(5000, false), FatType::Fat16);
    }

    #[test]
    fn classifies_fat12_by_count() {
        assert_eq!(classify(1000, false), FatType::Fat12);
    }
}
