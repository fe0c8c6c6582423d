use crate::error::AlgorithmResult;
use crate::traits::{CompressionAlgorithm, EncryptionAlgorithm};

/// Identity compression: payload is copied verbatim (§4.A).
pub struct NoneCompression;

impl CompressionAlgorithm for NoneCompression {
    fn name(&self) -> &str {
        "none"
    }

    fn max_output_size(&self, input_size: usize) -> usize {
        input_size
    }

    fn compress(&self, input: &[u8], _level: u32) -> AlgorithmResult<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8], expected_size: usize) -> AlgorithmResult<Vec<u8>> {
        if input.len() != expected_size {
            return Err(crate::error::AlgorithmError::Decompression(format!(
                "expected {expected_size} bytes, got {}",
                input.len()
            )));
        }
        Ok(input.to_vec())
    }
}

/// Identity encryption: payload is copied verbatim, no key required.
pub struct NoneEncryption;

impl EncryptionAlgorithm for NoneEncryption {
    fn name(&self) -> &str {
        "none"
    }

    fn required_key_len(&self) -> usize {
        0
    }

    fn encrypt(&self, _key: &[u8], input: &[u8]) -> AlgorithmResult<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decrypt(&self, _key: &[u8], input: &[u8]) -> AlgorithmResult<Vec<u8>> {
        Ok(input.to_vec())
    }
}
