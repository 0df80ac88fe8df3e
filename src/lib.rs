//! A library for reading and writing FAT12/FAT16/FAT32 filesystem volumes.
//!
//! [`volume::Volume`] opens a [`container::ByteContainer`] (a file, an
//! in-memory buffer, or anything `Read + Write + Seek`) and exposes cluster
//! allocation, chain traversal, and directory mutation against it.
//! [`mkfs::mkfs`] formats a fresh volume. Short-name and long-file-name
//! encoding are treated as external concerns (see [`directory::DirEntryCodec`]);
//! [`basic`] ships one concrete, minimal implementation of that trait.
//!
//! ```no_run
//! use std::io::Cursor;
//! use fatvol::mkfs::{mkfs, MkfsOptions};
//! use fatvol::volume::{Volume, VolumeOptions};
//!
//! let mut image = Cursor::new(vec![0u8; 1_474_560]);
//! mkfs(&mut image, 2880, MkfsOptions { label: "FLOPPY".into(), ..Default::default() })?;
//! let volume = Volume::open(image, VolumeOptions::default())?;
//! assert!(volume.is_dirty());
//! volume.close()?;
//! # Ok::<(), fatvol::error::FatError>(())
//! ```

pub mod basic;
pub mod bpb;
pub mod container;
pub mod directory;
pub mod error;
pub mod fat;
pub mod geometry;
pub mod mkfs;
pub mod volume;

pub use error::{FatError, Result};
pub use geometry::FatType;
pub use volume::{Volume, VolumeOptions};
