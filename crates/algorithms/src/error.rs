use thiserror::Error;

/// Failures surfaced by a compression or encryption algorithm implementation.
#[derive(Debug, Error)]
pub enum AlgorithmError {
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("encryption key required for algorithm {0}")]
    KeyRequired(String),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
}

pub type AlgorithmResult<T> = Result<T, AlgorithmError>;
