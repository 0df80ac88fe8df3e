//! The volume lifecycle: open, scan, mutate, mark dirty/clean, close.
//!
//! The scoped-acquisition helper [`open_fs`] mirrors `PyFat.open_fs`'s
//! `@contextmanager` pattern as an RAII guard: the volume is closed on every
//! exit path, including an early return or a panic unwinding through the
//! closure, by doing the close in `Drop` rather than relying on the caller
//! to remember it.

use std::sync::Mutex;

use log::warn;

use crate::bpb::Bpb;
use crate::container::{ByteContainer, Offset};
use crate::directory::{scan_range, DirEntryCodec};
use crate::error::{FatError, Result};
use crate::fat::chain::{self, ClusterChain};
use crate::fat::FatTable;
use crate::geometry::{FatType, Geometry};

/// Configuration accepted by [`Volume::open`].
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    /// Text codec tag for 8.3 names; opaque to the core, which never decodes
    /// short names itself.
    pub encoding: String,
    /// Byte offset into the container where the volume begins.
    pub offset: u64,
    pub read_only: bool,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        VolumeOptions {
            encoding: "ibm437".to_string(),
            offset: 0,
            read_only: false,
        }
    }
}

struct VolumeInner<C> {
    container: Offset<C>,
    bpb: Bpb,
    geometry: Geometry,
    fat: FatTable,
    first_free_cluster: u32,
    read_only: bool,
}

/// An open FAT volume. All I/O and FAT mutation is serialized behind a
/// single mutex (the Concurrency Envelope); callers may share a `Volume`
/// across threads via `Arc`.
pub struct Volume<C> {
    inner: Mutex<VolumeInner<C>>,
}

impl<C: ByteContainer> Volume<C> {
    pub fn open(container: C, options: VolumeOptions) -> Result<Volume<C>> {
        let mut offset_container = Offset::new(container, options.offset);
        let writable = !options.read_only;

        let mut sector = [0u8; 512];
        offset_container.read_at(0, &mut sector)?;
        let bpb = Bpb::parse(&sector)?;
        let geometry = Geometry::from_bpb(&bpb)?;

        let fat_bytes_len = geometry.fat_size_sectors as usize * geometry.bytes_per_sec as usize;
        let mut fat_bytes = vec![0u8; fat_bytes_len];
        offset_container.read_at(
            geometry.first_fat_sector as u64 * geometry.bytes_per_sec as u64,
            &mut fat_bytes,
        )?;

        if geometry.num_fats > 1 {
            let mut other = vec![0u8; fat_bytes_len];
            for copy in 1..geometry.num_fats {
                let addr = (geometry.first_fat_sector as u64
                    + copy as u64 * geometry.fat_size_sectors as u64)
                    * geometry.bytes_per_sec as u64;
                offset_container.read_at(addr, &mut other)?;
                if other != fat_bytes {
                    warn!("FAT copy {copy} diverges from FAT copy 0; keeping copy 0");
                }
            }
        }

        let cell_count = geometry.cluster_count as usize + 2;
        let fat = FatTable::decode(geometry.fat_type, &fat_bytes, cell_count);

        let dirty = is_dirty_table(&fat, &bpb);
        if dirty {
            warn!("volume was not unmounted cleanly");
        }

        let mut inner = VolumeInner {
            container: offset_container,
            bpb,
            geometry,
            fat,
            first_free_cluster: 2,
            read_only: !writable,
        };

        if writable {
            mark_dirty_inner(&mut inner)?;
        }

        Ok(Volume {
            inner: Mutex::new(inner),
        })
    }

    pub fn fat_type(&self) -> FatType {
        self.inner.lock().unwrap().geometry.fat_type
    }

    pub fn geometry(&self) -> Geometry {
        self.inner.lock().unwrap().geometry
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.lock().unwrap().read_only
    }

    pub fn root_cluster(&self) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        match inner.geometry.fat_type {
            FatType::Fat32 => Some(inner.geometry.root_clus),
            _ => None,
        }
    }

    pub fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let addr = inner.geometry.cluster_byte_addr(cluster);
        let len = inner.geometry.bytes_per_cluster as usize;
        let mut buf = vec![0u8; len];
        inner.container.read_at(addr, &mut buf)?;
        Ok(buf)
    }

    pub fn get_cluster_chain(&self, head: u32) -> Result<Vec<u32>> {
        let inner = self.inner.lock().unwrap();
        ClusterChain::new(&inner.fat, head).collect()
    }

    pub fn allocate_bytes(&self, size: u64, erase: bool) -> Result<Vec<u32>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.read_only {
            return Err(FatError::ReadOnly);
        }
        let bytes_per_cluster = inner.geometry.bytes_per_cluster as u64;
        let n = size.div_ceil(bytes_per_cluster.max(1)) as usize;
        let VolumeInner { fat, first_free_cluster, .. } = &mut *inner;
        let indices = match chain::allocate(fat, first_free_cluster, n) {
            Ok(v) => v,
            Err(FatError::NoSpace { free_bytes }) => {
                return Err(FatError::NoSpace {
                    free_bytes: free_bytes * bytes_per_cluster,
                })
            }
            Err(e) => return Err(e),
        };
        if erase {
            let zeros = vec![0u8; inner.geometry.bytes_per_cluster as usize];
            for &c in &indices {
                let addr = inner.geometry.cluster_byte_addr(c);
                inner.container.write_at(addr, &zeros)?;
            }
        }
        Ok(indices)
    }

    pub fn free_cluster_chain(&self, head: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.read_only {
            return Err(FatError::ReadOnly);
        }
        let VolumeInner { fat, first_free_cluster, .. } = &mut *inner;
        chain::free_chain(fat, first_free_cluster, head)
    }

    /// Write `data` to the chain starting at `head` (if any). When `extend`
    /// is true and the existing chain is too small, it is grown with freshly
    /// allocated clusters; when false, a too-small chain fails with
    /// `NoSpace`. Returns the (possibly new) chain head.
    pub fn write_data_to_cluster(
        &self,
        data: &[u8],
        head: Option<u32>,
        extend: bool,
        erase: bool,
    ) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        if inner.read_only {
            return Err(FatError::ReadOnly);
        }
        let bytes_per_cluster = inner.geometry.bytes_per_cluster as usize;

        let mut existing = Vec::new();
        if let Some(h) = head {
            for c in ClusterChain::new(&inner.fat, h) {
                existing.push(c?);
            }
        }

        let needed_clusters = data.len().div_ceil(bytes_per_cluster.max(1));
        let chain_indices = if needed_clusters <= existing.len() {
            existing
        } else if !extend {
            return Err(FatError::NoSpace {
                free_bytes: existing.len() as u64 * bytes_per_cluster as u64,
            });
        } else {
            let deficit = needed_clusters - existing.len();
            let new_tail = {
                let VolumeInner { fat, first_free_cluster, .. } = &mut *inner;
                chain::allocate(fat, first_free_cluster, deficit)?
            };
            if let Some(&last_existing) = existing.last() {
                if let Some(&new_head) = new_tail.first() {
                    inner.fat.set_data(last_existing, new_head);
                }
            }
            existing.into_iter().chain(new_tail).collect::<Vec<_>>()
        };

        let mut payload = data.to_vec();
        if erase {
            let padded_len = chain_indices.len() * bytes_per_cluster;
            payload.resize(padded_len, 0);
        }

        for (i, &cluster) in chain_indices.iter().enumerate() {
            let start = i * bytes_per_cluster;
            if start >= payload.len() {
                break;
            }
            let end = (start + bytes_per_cluster).min(payload.len());
            let mut slice = payload[start..end].to_vec();
            slice.resize(bytes_per_cluster, 0);
            let addr = inner.geometry.cluster_byte_addr(cluster);
            inner.container.write_at(addr, &slice)?;
        }

        Ok(*chain_indices.first().unwrap_or(&head.unwrap_or(0)))
    }

    pub fn flush_fat(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.read_only {
            return Err(FatError::ReadOnly);
        }
        let encoded = inner.fat.encode();
        let geometry = inner.geometry;
        for copy in 0..geometry.num_fats {
            let addr = (geometry.first_fat_sector as u64
                + copy as u64 * geometry.fat_size_sectors as u64)
                * geometry.bytes_per_sec as u64;
            inner.container.write_at(addr, &encoded)?;
        }
        Ok(())
    }

    /// Scan a fixed-root (FAT12/16) directory region using `codec`.
    pub fn scan_fixed_root<D: DirEntryCodec>(&self) -> Result<Vec<D::Entry>> {
        let mut inner = self.inner.lock().unwrap();
        let geometry = inner.geometry;
        let addr = geometry.first_root_dir_sector as u64 * geometry.bytes_per_sec as u64;
        let len = geometry.root_dir_sectors as usize * geometry.bytes_per_sec as usize;
        let mut buf = vec![0u8; len];
        inner.container.read_at(addr, &mut buf)?;
        Ok(scan_range::<D>(&buf, D::LfnCarry::default()).entries)
    }

    /// Scan a cluster-chain directory (FAT32 root, or any subdirectory) using
    /// `codec`.
    pub fn scan_chain<D: DirEntryCodec>(&self, head: u32) -> Result<Vec<D::Entry>> {
        let chain = self.get_cluster_chain(head)?;
        let mut entries = Vec::new();
        let mut carry = D::LfnCarry::default();
        for cluster in chain {
            let bytes = self.read_cluster(cluster)?;
            let result = scan_range::<D>(&bytes, carry);
            entries.extend(result.entries);
            carry = result.carry;
        }
        Ok(entries)
    }

    /// Recursively scan a directory tree starting from `root`: `None` means
    /// the fixed-root region (FAT12/16), `Some(cluster)` means a cluster
    /// chain (FAT32 root, or any subdirectory). Real subdirectories (not
    /// `.`/`..`) are walked depth-first and their entries appended.
    pub fn scan_tree<D: DirEntryCodec>(&self, root: Option<u32>) -> Result<Vec<D::Entry>> {
        let mut entries = match root {
            None => self.scan_fixed_root::<D>()?,
            Some(head) => self.scan_chain::<D>(head)?,
        };

        let mut subdirs = Vec::new();
        for entry in &entries {
            if D::is_directory(entry) && !D::is_dot_or_dotdot(entry) {
                subdirs.push(D::start_cluster(entry));
            }
        }
        for subdir_head in subdirs {
            entries.extend(self.scan_tree::<D>(Some(subdir_head))?);
        }
        Ok(entries)
    }

    /// Flatten `records` (already-encoded 32-byte directory records) to
    /// `dir_head`'s chain, or to the fixed root region when `dir_head` is
    /// `None`.
    pub fn update_directory_entry(&self, dir_head: Option<u32>, records: &[u8]) -> Result<()> {
        match dir_head {
            Some(head) => {
                self.write_data_to_cluster(records, Some(head), true, true)?;
                Ok(())
            }
            None => {
                let mut inner = self.inner.lock().unwrap();
                if inner.read_only {
                    return Err(FatError::ReadOnly);
                }
                let geometry = inner.geometry;
                let region_len = geometry.root_dir_sectors as usize * geometry.bytes_per_sec as usize;
                if records.len() > region_len {
                    return Err(FatError::NoSpace {
                        free_bytes: region_len as u64,
                    });
                }
                let mut buf = vec![0u8; region_len];
                buf[..records.len()].copy_from_slice(records);
                let addr = geometry.first_root_dir_sector as u64 * geometry.bytes_per_sec as u64;
                inner.container.write_at(addr, &buf)
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        is_dirty_table(&inner.fat, &inner.bpb)
    }

    pub fn close(self) -> Result<()> {
        let mut inner = self.inner.into_inner().unwrap();
        if !inner.read_only {
            let encoded = inner.fat.encode();
            let geometry = inner.geometry;
            for copy in 0..geometry.num_fats {
                let addr = (geometry.first_fat_sector as u64
                    + copy as u64 * geometry.fat_size_sectors as u64)
                    * geometry.bytes_per_sec as u64;
                inner.container.write_at(addr, &encoded)?;
            }
            mark_clean_inner(&mut inner)?;
        }
        Ok(())
    }
}

fn dos_bit_dirty(fat: &FatTable) -> Option<bool> {
    let mask = match fat.fat_type() {
        FatType::Fat16 => crate::fat::constants::fat16::CLEAN_SHUTDOWN_BIT_MASK as u32,
        FatType::Fat32 => crate::fat::constants::fat32::CLEAN_SHUTDOWN_BIT_MASK,
        FatType::Fat12 => return None,
    };
    Some(fat.raw(1) & mask == 0)
}

fn is_dirty_table(fat: &FatTable, bpb: &Bpb) -> bool {
    let dos_dirty = dos_bit_dirty(fat).unwrap_or(false);
    dos_dirty || bpb.nt_dirty_bit()
}

fn set_dos_bit(fat: &mut FatTable, dirty: bool) {
    let mask = match fat.fat_type() {
        FatType::Fat16 => crate::fat::constants::fat16::CLEAN_SHUTDOWN_BIT_MASK as u32,
        FatType::Fat32 => crate::fat::constants::fat32::CLEAN_SHUTDOWN_BIT_MASK,
        FatType::Fat12 => return,
    };
    let cell1 = fat.raw(1);
    let new = if dirty { cell1 & !mask } else { cell1 | mask };
    fat.set_raw(1, new);
}

fn mark_dirty_inner<C: ByteContainer>(inner: &mut VolumeInner<C>) -> Result<()> {
    set_dos_bit(&mut inner.fat, true);
    inner.bpb.set_nt_dirty_bit(true);
    write_bpb(inner)
}

fn mark_clean_inner<C: ByteContainer>(inner: &mut VolumeInner<C>) -> Result<()> {
    set_dos_bit(&mut inner.fat, false);
    inner.bpb.set_nt_dirty_bit(false);
    write_bpb(inner)
}

fn write_bpb<C: ByteContainer>(inner: &mut VolumeInner<C>) -> Result<()> {
    let sector = inner.bpb.serialize();
    inner.container.write_at(0, &sector)?;
    if let Bpb::Fat32 { ext, .. } = &inner.bpb {
        if ext.bk_boot_sec != 0 {
            let addr = ext.bk_boot_sec as u64 * inner.geometry.bytes_per_sec as u64;
            inner.container.write_at(addr, &sector)?;
        }
    }
    Ok(())
}

/// Scoped acquisition: open a volume, run `f` against it, and guarantee
/// `close` runs on every exit path (including a panic unwinding out of `f`).
pub fn open_fs<C, R>(
    container: C,
    options: VolumeOptions,
    f: impl FnOnce(&Volume<C>) -> Result<R>,
) -> Result<R>
where
    C: ByteContainer,
{
    struct ClosingGuard<C: ByteContainer>(Option<Volume<C>>);
    impl<C: ByteContainer> Drop for ClosingGuard<C> {
        fn drop(&mut self) {
            if let Some(volume) = self.0.take() {
                let _ = volume.close();
            }
        }
    }

    let volume = Volume::open(container, options)?;
    let mut guard = ClosingGuard(Some(volume));
    let result = f(guard.0.as_ref().unwrap());
    if let Some(volume) = guard.0.take() {
        volume.close()?;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::{mkfs, MkfsOptions};
    use std::io::Cursor;

    fn fresh_fat32_image(size_sectors: u32) -> Cursor<Vec<u8>> {
        let buf = vec![0u8; size_sectors as usize * 512];
        let mut container = Cursor::new(buf);
        mkfs(
            &mut container,
            size_sectors,
            MkfsOptions {
                fat_type: Some(FatType::Fat32),
                ..MkfsOptions::default()
            },
        )
        .unwrap();
        container
    }

    #[test]
    fn open_marks_dirty_and_close_succeeds() {
        let container = fresh_fat32_image(133120);
        let volume = Volume::open(container, VolumeOptions::default()).unwrap();
        assert!(volume.is_dirty());
        volume.close().unwrap();
    }

    #[test]
    fn allocate_then_free_round_trips_fat_bytes() {
        let container = fresh_fat32_image(133120);
        let volume = Volume::open(container, VolumeOptions::default()).unwrap();
        let before = { volume.inner.lock().unwrap().fat.encode() };
        let chain = volume.allocate_bytes(8192, true).unwrap();
        volume.free_cluster_chain(chain[0]).unwrap();
        let after = { volume.inner.lock().unwrap().fat.encode() };
        assert_eq!(before, after);
    }
}
