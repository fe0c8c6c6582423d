use crate::error::AlgorithmResult;

/// Maximum length, in bytes, of a registered algorithm name (§4.A).
pub const MAX_ALGORITHM_NAME_LEN: usize = 12;

/// A pure, stateless compression algorithm.
///
/// Implementations must be deterministic per call: the same input and level
/// always produce the same output. The engine may invoke `compress` and
/// `decompress` for independent pages concurrently.
pub trait CompressionAlgorithm: Send + Sync {
    /// Short name under which this algorithm is registered (≤ 12 bytes).
    fn name(&self) -> &str;

    /// Upper bound on the compressed size of an input of `input_size` bytes.
    /// Used to size the output buffer before calling `compress`.
    fn max_output_size(&self, input_size: usize) -> usize;

    /// Compresses `input` at the given level. Level semantics are
    /// algorithm-specific; `0` means "algorithm default".
    fn compress(&self, input: &[u8], level: u32) -> AlgorithmResult<Vec<u8>>;

    /// Decompresses `input`, which must expand to exactly `expected_size`
    /// bytes or the call fails.
    fn decompress(&self, input: &[u8], expected_size: usize) -> AlgorithmResult<Vec<u8>>;
}

/// A pure, stateless encryption algorithm operating on fixed-size keys.
pub trait EncryptionAlgorithm: Send + Sync {
    /// Short name under which this algorithm is registered (≤ 12 bytes).
    fn name(&self) -> &str;

    /// The key length, in bytes, this algorithm requires. §6's key
    /// derivation rule is applied by the caller before `encrypt`/`decrypt`
    /// ever see a key, so implementations can assume `key.len() ==
    /// required_key_len()`.
    fn required_key_len(&self) -> usize;

    fn encrypt(&self, key: &[u8], input: &[u8]) -> AlgorithmResult<Vec<u8>>;

    fn decrypt(&self, key: &[u8], input: &[u8]) -> AlgorithmResult<Vec<u8>>;
}
