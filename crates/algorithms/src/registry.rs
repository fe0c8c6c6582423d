use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::aes_ctr::{Aes128CtrEncryption, Aes256CtrEncryption};
use crate::error::{AlgorithmError, AlgorithmResult};
use crate::none::{NoneCompression, NoneEncryption};
use crate::traits::{CompressionAlgorithm, EncryptionAlgorithm, MAX_ALGORITHM_NAME_LEN};
use crate::zlib::ZlibCompression;

/// Process-wide table mapping algorithm name to implementation (§4.A, §9).
///
/// Built once on first access and read-only thereafter, except for the
/// `register_*` extension points a host can use at startup to add an
/// out-of-tree algorithm. Lookup by name happens once, at `Store::open`;
/// nothing on the hot path re-resolves a name.
pub struct AlgorithmRegistry {
    compression: RwLock<HashMap<String, Arc<dyn CompressionAlgorithm>>>,
    encryption: RwLock<HashMap<String, Arc<dyn EncryptionAlgorithm>>>,
}

impl AlgorithmRegistry {
    fn with_builtins() -> Self {
        let mut compression: HashMap<String, Arc<dyn CompressionAlgorithm>> = HashMap::new();
        compression.insert("none".into(), Arc::new(NoneCompression));
        compression.insert("zlib".into(), Arc::new(ZlibCompression));

        let mut encryption: HashMap<String, Arc<dyn EncryptionAlgorithm>> = HashMap::new();
        encryption.insert("none".into(), Arc::new(NoneEncryption));
        encryption.insert("aes128".into(), Arc::new(Aes128CtrEncryption));
        encryption.insert("aes256".into(), Arc::new(Aes256CtrEncryption));

        Self {
            compression: RwLock::new(compression),
            encryption: RwLock::new(encryption),
        }
    }

    pub fn compression(&self, name: &str) -> AlgorithmResult<Arc<dyn CompressionAlgorithm>> {
        self.compression
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AlgorithmError::UnknownAlgorithm(name.to_string()))
    }

    pub fn encryption(&self, name: &str) -> AlgorithmResult<Arc<dyn EncryptionAlgorithm>> {
        self.encryption
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AlgorithmError::UnknownAlgorithm(name.to_string()))
    }

    /// Registers an out-of-tree compression algorithm. `name` must be
    /// ≤ [`MAX_ALGORITHM_NAME_LEN`] bytes; overwrites any existing
    /// registration under the same name.
    pub fn register_compression(&self, algorithm: Arc<dyn CompressionAlgorithm>) {
        let name = algorithm.name().to_string();
        debug_assert!(name.len() <= MAX_ALGORITHM_NAME_LEN);
        self.compression.write().insert(name, algorithm);
    }

    /// Registers an out-of-tree encryption algorithm.
    pub fn register_encryption(&self, algorithm: Arc<dyn EncryptionAlgorithm>) {
        let name = algorithm.name().to_string();
        debug_assert!(name.len() <= MAX_ALGORITHM_NAME_LEN);
        self.encryption.write().insert(name, algorithm);
    }
}

static REGISTRY: Lazy<AlgorithmRegistry> = Lazy::new(AlgorithmRegistry::with_builtins);

/// Returns the process-wide algorithm registry, initializing it on first
/// call.
pub fn registry() -> &'static AlgorithmRegistry {
    &REGISTRY
}
