//! End-to-end scenarios exercised against real temp files: format, reopen,
//! scan, allocate, write, free, and observe dirty-bit state across restarts.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use fatvol::basic::BasicCodec;
use fatvol::geometry::FatType;
use fatvol::mkfs::{mkfs, MkfsOptions};
use fatvol::volume::{Volume, VolumeOptions};

fn tempfile_of_size(sectors: u32) -> (tempfile::NamedTempFile, std::fs::File) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    file.set_len(sectors as u64 * 512).unwrap();
    (tmp, file)
}

#[test]
fn mkfs_fat12_floppy_then_reopen_sees_volume_label() {
    let (tmp, mut file) = tempfile_of_size(2880);
    mkfs(
        &mut file,
        2880,
        MkfsOptions {
            fat_type: Some(FatType::Fat12),
            label: "FLOPPY".into(),
            ..MkfsOptions::default()
        },
    )
    .unwrap();
    drop(file);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let volume = Volume::open(file, VolumeOptions::default()).unwrap();
    assert_eq!(volume.fat_type(), FatType::Fat12);
    assert!(volume.is_dirty());

    let entries = volume.scan_fixed_root::<BasicCodec>().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0]
        .short
        .attributes
        .contains(fatvol::basic::FileAttributes::VOLUME_ID));

    volume.close().unwrap();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let volume = Volume::open(file, VolumeOptions { read_only: true, ..VolumeOptions::default() })
        .unwrap();
    assert!(!volume.is_dirty());
}

#[test]
fn mkfs_fat32_small_allocate_write_read_free() {
    let (_tmp, mut file) = tempfile_of_size(133_120);
    mkfs(
        &mut file,
        133_120,
        MkfsOptions {
            fat_type: Some(FatType::Fat32),
            label: "DATA".into(),
            ..MkfsOptions::default()
        },
    )
    .unwrap();

    let volume = Volume::open(file, VolumeOptions::default()).unwrap();
    let payload = b"hello from a cluster chain".repeat(200);
    let head = volume
        .write_data_to_cluster(&payload, None, true, true)
        .unwrap();

    let chain = volume.get_cluster_chain(head).unwrap();
    assert!(chain.len() >= 1);

    let mut read_back = Vec::new();
    for &cluster in &chain {
        read_back.extend(volume.read_cluster(cluster).unwrap());
    }
    assert_eq!(&read_back[..payload.len()], &payload[..]);

    volume.free_cluster_chain(head).unwrap();
    volume.close().unwrap();
}

#[test]
fn unclean_close_is_observed_on_reopen() {
    let (tmp, mut file) = tempfile_of_size(133_120);
    mkfs(
        &mut file,
        133_120,
        MkfsOptions {
            fat_type: Some(FatType::Fat32),
            ..MkfsOptions::default()
        },
    )
    .unwrap();
    drop(file);

    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        let volume = Volume::open(file, VolumeOptions::default()).unwrap();
        assert!(volume.is_dirty());
        // Deliberately drop without calling close() to simulate a crash.
        drop(volume);
    }

    let mut raw = OpenOptions::new().read(true).open(tmp.path()).unwrap();
    let mut boot_sector = [0u8; 512];
    raw.seek(SeekFrom::Start(0)).unwrap();
    raw.read_exact(&mut boot_sector).unwrap();
    // BS_Reserved1's dirty bit (NT indicator) must still be set.
    assert_eq!(boot_sector[65] & 0x01, 0x01);
}

#[test]
fn multi_fat_copies_stay_identical_after_flush() {
    let (_tmp, mut file) = tempfile_of_size(133_120);
    mkfs(
        &mut file,
        133_120,
        MkfsOptions {
            fat_type: Some(FatType::Fat32),
            num_fats: 2,
            ..MkfsOptions::default()
        },
    )
    .unwrap();

    let volume = Volume::open(file, VolumeOptions::default()).unwrap();
    volume.allocate_bytes(4096, true).unwrap();
    volume.flush_fat().unwrap();
    let geometry = volume.geometry();
    volume.close().unwrap();

    let mut raw = std::fs::File::open(_tmp.path()).unwrap();
    let fat_bytes_len = geometry.fat_size_sectors as usize * geometry.bytes_per_sec as usize;
    let mut fat0 = vec![0u8; fat_bytes_len];
    let mut fat1 = vec![0u8; fat_bytes_len];
    raw.seek(SeekFrom::Start(
        geometry.first_fat_sector as u64 * geometry.bytes_per_sec as u64,
    ))
    .unwrap();
    raw.read_exact(&mut fat0).unwrap();
    raw.seek(SeekFrom::Start(
        (geometry.first_fat_sector as u64 + geometry.fat_size_sectors as u64)
            * geometry.bytes_per_sec as u64,
    ))
    .unwrap();
    raw.read_exact(&mut fat1).unwrap();
    assert_eq!(fat0, fat1);
}
