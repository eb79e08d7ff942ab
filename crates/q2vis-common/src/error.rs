// error.rs -- load errors for archives, level files and textures

use std::io;

/// Everything that can go wrong while reading a PAK archive, a BSP level or
/// a texture out of one.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{what} has bad magic {found:?}")]
    BadMagic { what: String, found: [u8; 4] },

    #[error("{what} has wrong version number ({found} should be {expected})")]
    BadVersion {
        what: String,
        found: i32,
        expected: i32,
    },

    #[error("funny lump size in {lump} ({len} is not a multiple of {stride})")]
    FunnyLumpSize {
        lump: &'static str,
        len: usize,
        stride: usize,
    },

    #[error("lump {lump} ({ofs}+{len}) runs past the end of the file ({file_len} bytes)")]
    LumpOutOfRange {
        lump: &'static str,
        ofs: i64,
        len: i64,
        file_len: usize,
    },

    #[error("{0} is truncated")]
    Truncated(String),

    #[error("couldn't find {0}")]
    FileNotFound(String),

    #[error("bad wal texture {name}: {reason}")]
    BadWal { name: String, reason: String },

    #[error("bad pcx image {0}")]
    BadPcx(String),
}

pub type LoadResult<T> = Result<T, LoadError>;
