//! Error types returned by the FAT volume engine.

use thiserror::Error;

/// Why a cluster chain was rejected as corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainCorruption {
    /// The chain walked into a cell marked BAD.
    BadCluster,
    /// The chain walked into a cell marked FREE.
    FreeInChain,
    /// The chain walked into a cell that is neither a valid data pointer,
    /// an end-of-chain marker, free, nor bad.
    InvalidValue,
}

impl core::fmt::Display for ChainCorruption {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ChainCorruption::BadCluster => "chain references a cluster marked bad",
            ChainCorruption::FreeInChain => "chain references a free cluster",
            ChainCorruption::InvalidValue => "chain references an out-of-range cluster value",
        };
        f.write_str(msg)
    }
}

/// Errors produced while opening, reading, or writing a FAT volume.
#[derive(Debug, Error)]
pub enum FatError {
    #[error("boot sector is missing the 0x55AA signature")]
    BadSignature,
    #[error("BS_jmpBoot is neither a short nor a near jump")]
    BadJmpBoot,
    #[error("BPB_BytsPerSec is not one of 512, 1024, 2048, 4096")]
    BadBytsPerSec,
    #[error("BPB_SecPerClus is not a power of two in 1..=128")]
    BadSecPerClus,
    #[error("BPB_Media is not a recognized media descriptor")]
    BadMedia,
    #[error("BPB_RootEntCnt does not divide evenly into a whole number of sectors")]
    BadRootEntAlign,
    #[error("BPB_TotSec16 and BPB_TotSec32 are both zero")]
    BadTotalSectors,
    #[error("FAT size field is zero")]
    BadFatSz,
    #[error("BPB_RsvdSecCnt is zero")]
    BadRsvdSecCnt,
    #[error("BPB_NumFATs is zero")]
    BadNumFats,

    #[error("cluster chain is corrupt: {0}")]
    CorruptChain(ChainCorruption),

    #[error("not enough free clusters to satisfy the request ({free_bytes} bytes free)")]
    NoSpace { free_bytes: u64 },

    #[error("volume is open read-only")]
    ReadOnly,

    #[error("unrecognized or unsupported FAT type")]
    UnsupportedFatType,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, FatError>;
