//! The seekable byte container abstraction the volume engine is built on.
//!
//! Rather than hard-coding `std::fs::File`, every entry point is generic
//! over a small capability trait so in-memory buffers and real files share
//! one code path.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::Result;

/// A random-access byte container a [`crate::volume::Volume`] can be opened
/// against.
///
/// Implemented for anything that is `Read + Write + Seek`. Whether a volume
/// treats its container as read-only is governed entirely by
/// [`crate::volume::VolumeOptions::read_only`], not by any trait-level
/// capability query: the trait bound already guarantees write support, so a
/// container that is genuinely incapable of writes (e.g. a bare `&[u8]`)
/// simply does not implement this trait at all.
pub trait ByteContainer {
    fn seek_abs(&mut self, offset: u64) -> Result<u64>;
    fn read_exact_at(&mut self, buf: &mut [u8]) -> Result<()>;
    fn write_all_at(&mut self, buf: &[u8]) -> Result<()>;
    fn truncate(&mut self, len: u64) -> Result<()>;
    fn len(&mut self) -> Result<u64>;

    /// Best-effort human-readable name, used only in diagnostics.
    fn name(&self) -> Option<&str> {
        None
    }
}

impl<T: Read + Write + Seek> ByteContainer for T {
    fn seek_abs(&mut self, offset: u64) -> Result<u64> {
        Ok(Seek::seek(self, SeekFrom::Start(offset))?)
    }

    fn read_exact_at(&mut self, buf: &mut [u8]) -> Result<()> {
        Read::read_exact(self, buf)?;
        Ok(())
    }

    fn write_all_at(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        let pos = Seek::stream_position(self)?;
        // Generic `T` has no portable truncate; grow via seek+write of a
        // single trailing byte. Callers (mkfs) only ever grow a zero-sized
        // or already-right-sized container, so shrinking is not needed.
        let cur_len = Seek::seek(self, SeekFrom::End(0))?;
        if len > cur_len {
            Seek::seek(self, SeekFrom::Start(len - 1))?;
            Write::write_all(self, &[0u8])?;
        }
        Seek::seek(self, SeekFrom::Start(pos))?;
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        let pos = Seek::stream_position(self)?;
        let end = Seek::seek(self, SeekFrom::End(0))?;
        Seek::seek(self, SeekFrom::Start(pos))?;
        Ok(end)
    }
}

/// Adapts a [`ByteContainer`] to begin at `base_offset` bytes into the
/// underlying container, so a volume can live inside a partition or a disk
/// image at a nonzero LBA.
pub struct Offset<C> {
    inner: C,
    base_offset: u64,
}

impl<C: ByteContainer> Offset<C> {
    pub fn new(inner: C, base_offset: u64) -> Self {
        Self { inner, base_offset }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.seek_abs(self.base_offset + offset)?;
        self.inner.read_exact_at(buf)
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.inner.seek_abs(self.base_offset + offset)?;
        self.inner.write_all_at(buf)
    }

    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.inner.truncate(self.base_offset + len)
    }

    pub fn len(&mut self) -> Result<u64> {
        Ok(self.inner.len()?.saturating_sub(self.base_offset))
    }
}
