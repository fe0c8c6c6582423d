use thiserror::Error;

/// Errors surfaced by the page store and everything layered above it
/// (§4.F, §6, §7).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("container header is corrupt: {0}")]
    HeaderCorrupt(String),

    #[error("page {0} is corrupt: {1}")]
    PageCorrupt(u64, String),

    #[error("not a ccvfs container (bad magic)")]
    NotAContainer,

    #[error("unsupported container version {major}.{minor}")]
    VersionUnsupported { major: u16, minor: u16 },

    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("encryption key required")]
    KeyRequired,

    #[error("invalid page size: {0}")]
    InvalidPageSize(u32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("container already exists")]
    AlreadyExists,

    #[error("container not found")]
    NotFound,
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<ccvfs_algorithms::AlgorithmError> for StorageError {
    fn from(err: ccvfs_algorithms::AlgorithmError) -> Self {
        match err {
            ccvfs_algorithms::AlgorithmError::UnknownAlgorithm(name) => {
                StorageError::UnknownAlgorithm(name)
            }
            ccvfs_algorithms::AlgorithmError::KeyRequired(_) => StorageError::KeyRequired,
            other => StorageError::InvalidArgument(other.to_string()),
        }
    }
}
