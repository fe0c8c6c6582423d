//! Name-addressed, pluggable compression and encryption algorithms.
//!
//! A process-wide registry of named, stateless function tables, plus the
//! handful of built-in algorithms the container format needs by default.

mod aes_ctr;
mod error;
mod key;
mod none;
mod registry;
mod traits;
mod zlib;

pub use aes_ctr::{Aes128CtrEncryption, Aes256CtrEncryption};
pub use error::{AlgorithmError, AlgorithmResult};
pub use key::derive_key;
pub use none::{NoneCompression, NoneEncryption};
pub use registry::{registry, AlgorithmRegistry};
pub use traits::{CompressionAlgorithm, EncryptionAlgorithm, MAX_ALGORITHM_NAME_LEN};
pub use zlib::ZlibCompression;
