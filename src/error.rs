use thiserror::Error;

/// Top-level failures from `inspect`/`compare`.
///
/// Per-partition and per-binary failures never reach this type: they are
/// recorded as notes on the relevant summary so inspection stays as complete
/// as possible (see `FilesystemSummary::notes`, `EFIBinaryEvidence`'s
/// absence from a partition's `efi_binaries`, and `BootloaderConfig::notes`).
#[derive(Error, Debug)]
pub enum Error {
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported partition table type")]
    UnsupportedTableType,

    #[error("external image normalization failed: {0}")]
    Normalizer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
