use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256};
use ctr::Ctr64BE;

use crate::error::{AlgorithmError, AlgorithmResult};
use crate::traits::EncryptionAlgorithm;

type Aes128Ctr = Ctr64BE<Aes128>;
type Aes256Ctr = Ctr64BE<Aes256>;

/// A fixed, all-zero initialization vector.
///
/// The §4.A interface is `encrypt(key, bytes) -> bytes` / `decrypt(key,
/// bytes) -> bytes` with no side channel to carry a per-call nonce, so CTR
/// mode here is keyed purely by the (already key-derived, §6) key. This
/// makes the cipher deterministic, which is what the round-trip laws in §8
/// require, at the cost of keystream reuse across pages sharing a key and
/// content-length prefix — an explicit, documented simplification (see
/// DESIGN.md), not a recommendation for protecting data against a
/// chosen-plaintext adversary.
const ZERO_IV: [u8; 16] = [0u8; 16];

/// AES-128 in CTR mode.
pub struct Aes128CtrEncryption;

impl EncryptionAlgorithm for Aes128CtrEncryption {
    fn name(&self) -> &str {
        "aes128"
    }

    fn required_key_len(&self) -> usize {
        16
    }

    fn encrypt(&self, key: &[u8], input: &[u8]) -> AlgorithmResult<Vec<u8>> {
        ctr_transform::<Aes128Ctr>(key, input, "aes128", self.required_key_len())
    }

    fn decrypt(&self, key: &[u8], input: &[u8]) -> AlgorithmResult<Vec<u8>> {
        // CTR is an involution: decrypt is the same keystream XOR.
        ctr_transform::<Aes128Ctr>(key, input, "aes128", self.required_key_len())
    }
}

/// AES-256 in CTR mode.
pub struct Aes256CtrEncryption;

impl EncryptionAlgorithm for Aes256CtrEncryption {
    fn name(&self) -> &str {
        "aes256"
    }

    fn required_key_len(&self) -> usize {
        32
    }

    fn encrypt(&self, key: &[u8], input: &[u8]) -> AlgorithmResult<Vec<u8>> {
        ctr_transform::<Aes256Ctr>(key, input, "aes256", self.required_key_len())
    }

    fn decrypt(&self, key: &[u8], input: &[u8]) -> AlgorithmResult<Vec<u8>> {
        ctr_transform::<Aes256Ctr>(key, input, "aes256", self.required_key_len())
    }
}

fn ctr_transform<C>(
    key: &[u8],
    input: &[u8],
    alg_name: &str,
    required_key_len: usize,
) -> AlgorithmResult<Vec<u8>>
where
    C: KeyIvInit + StreamCipher,
{
    if key.len() != required_key_len {
        return Err(AlgorithmError::Encryption(format!(
            "{alg_name} requires a {required_key_len}-byte key after derivation, got {}",
            key.len()
        )));
    }
    let mut cipher = C::new(key.into(), (&ZERO_IV).into());
    let mut out = input.to_vec();
    cipher.apply_keystream(&mut out);
    Ok(out)
}
