use std::sync::Arc;

use ccvfs_algorithms::{derive_key, CompressionAlgorithm, EncryptionAlgorithm};
use log::trace;

use crate::error::StorageResult;
use crate::index::{slot_checksum, SlotFlags};
use crate::page::Page;

/// Default zlib compression level; `0` defers to the algorithm's own
/// default (§4.A).
const DEFAULT_COMPRESS_LEVEL: u32 = 0;

/// Compress-then-encrypt on write, decrypt-then-decompress on read, with
/// integrity checked by CRC32 over the final on-disk bytes (§4.E).
pub struct TransformPipeline {
    compress: Arc<dyn CompressionAlgorithm>,
    encrypt: Arc<dyn EncryptionAlgorithm>,
    key: Vec<u8>,
    compress_name: String,
    encrypt_name: String,
}

/// Output of encoding one page for the disk: the bytes to write, the slot
/// flags to record, and the checksum to record (§4.E).
pub struct EncodedSlot {
    pub bytes: Vec<u8>,
    pub flags: SlotFlags,
    pub checksum: u32,
}

impl TransformPipeline {
    pub fn new(
        compress: Arc<dyn CompressionAlgorithm>,
        encrypt: Arc<dyn EncryptionAlgorithm>,
        raw_key: &[u8],
    ) -> Self {
        let key = derive_key(raw_key, encrypt.required_key_len());
        Self {
            compress_name: compress.name().to_string(),
            encrypt_name: encrypt.name().to_string(),
            compress,
            encrypt,
            key,
        }
    }

    pub fn compress_name(&self) -> &str {
        &self.compress_name
    }

    pub fn encrypt_name(&self) -> &str {
        &self.encrypt_name
    }

    /// Runs compress → encrypt on a raw logical page (§4.E, write path).
    pub fn encode(&self, page: &Page) -> StorageResult<EncodedSlot> {
        let raw = page.as_bytes();
        let mut flags = SlotFlags::empty();

        let compressed = self.compress.compress(raw, DEFAULT_COMPRESS_LEVEL)?;
        let (stage2, compressed_flag) = if self.compress.name() != "none" && compressed.len() < raw.len() {
            (compressed, true)
        } else {
            (raw.to_vec(), false)
        };
        if compressed_flag {
            flags |= SlotFlags::COMPRESSED;
        }

        let encrypted = self.encrypt.encrypt(&self.key, &stage2)?;
        if self.encrypt.name() != "none" {
            flags |= SlotFlags::ENCRYPTED;
        }

        let checksum = slot_checksum(&encrypted);
        trace!(
            "encoded page: raw={} stage2={} final={} flags={:?}",
            raw.len(),
            stage2.len(),
            encrypted.len(),
            flags
        );
        Ok(EncodedSlot {
            bytes: encrypted,
            flags,
            checksum,
        })
    }

    /// Runs decrypt → decompress on bytes loaded from disk. `page_size` is
    /// the expected decoded length; a mismatch is corruption (§4.E, read
    /// path).
    pub fn decode(&self, bytes: &[u8], flags: SlotFlags, page_size: u32) -> StorageResult<Page> {
        let decrypted = if flags.contains(SlotFlags::ENCRYPTED) {
            self.encrypt
                .decrypt(&self.key, bytes)
                .map_err(|e| crate::error::StorageError::PageCorrupt(u64::MAX, e.to_string()))?
        } else {
            bytes.to_vec()
        };

        let raw = if flags.contains(SlotFlags::COMPRESSED) {
            self.compress
                .decompress(&decrypted, page_size as usize)
                .map_err(|e| crate::error::StorageError::PageCorrupt(u64::MAX, e.to_string()))?
        } else {
            decrypted
        };

        Page::from_vec(raw, page_size).ok_or_else(|| {
            crate::error::StorageError::PageCorrupt(
                u64::MAX,
                format!("decoded page is not {page_size} bytes"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccvfs_algorithms::{registry, Aes128CtrEncryption, NoneEncryption, ZlibCompression};

    #[test]
    fn round_trips_with_zlib_and_no_encryption() {
        let pipeline = TransformPipeline::new(
            Arc::new(ZlibCompression),
            Arc::new(NoneEncryption),
            b"",
        );
        let page = Page::from_vec(vec![b'a'; 4096], 4096).unwrap();
        let encoded = pipeline.encode(&page).unwrap();
        assert!(encoded.flags.contains(SlotFlags::COMPRESSED));
        assert!(encoded.bytes.len() < 4096);
        let decoded = pipeline.decode(&encoded.bytes, encoded.flags, 4096).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn round_trips_with_aes128_and_no_compression() {
        let none_compress = registry().compression("none").unwrap();
        let pipeline = TransformPipeline::new(none_compress, Arc::new(Aes128CtrEncryption), b"1230");
        let page = Page::from_vec(b"hello world, this is a page!!!!".repeat(128), 4096).unwrap();
        let encoded = pipeline.encode(&page).unwrap();
        assert!(encoded.flags.contains(SlotFlags::ENCRYPTED));
        assert_ne!(encoded.bytes, page.as_bytes());
        let decoded = pipeline.decode(&encoded.bytes, encoded.flags, 4096).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn falls_back_to_uncompressed_when_compression_does_not_shrink() {
        // Random-looking data compresses poorly; zlib output can exceed
        // input size once framing overhead is included.
        let mut raw = vec![0u8; 64];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (i as u32).wrapping_mul(2654435761) as u8;
        }
        let pipeline = TransformPipeline::new(Arc::new(ZlibCompression), Arc::new(NoneEncryption), b"");
        let page = Page::from_vec(raw, 64).unwrap();
        let encoded = pipeline.encode(&page).unwrap();
        assert!(!encoded.flags.contains(SlotFlags::COMPRESSED));
        assert_eq!(encoded.bytes, page.as_bytes());
    }

    #[test]
    fn detects_decompression_length_mismatch_as_error() {
        let pipeline = TransformPipeline::new(Arc::new(ZlibCompression), Arc::new(NoneEncryption), b"");
        let page = Page::from_vec(vec![b'z'; 4096], 4096).unwrap();
        let encoded = pipeline.encode(&page).unwrap();
        let mut flags = encoded.flags;
        flags.set(SlotFlags::COMPRESSED, true);
        // Ask for the wrong output size: must fail, not silently truncate.
        assert!(pipeline.decode(&encoded.bytes, flags, 10).is_err());
    }
}
