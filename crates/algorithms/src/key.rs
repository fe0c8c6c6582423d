/// Expands or truncates `key` to exactly `required_len` bytes (§6).
///
/// Shorter keys are padded by repeating the key bytes (`k'[i] = k[i mod
/// keylen]`); longer keys are truncated. Symmetric across encrypt/decrypt
/// by construction: the same rule is applied on both sides.
pub fn derive_key(key: &[u8], required_len: usize) -> Vec<u8> {
    if required_len == 0 {
        return Vec::new();
    }
    if key.is_empty() {
        return vec![0u8; required_len];
    }
    (0..required_len).map(|i| key[i % key.len()]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_short_keys_by_repetition() {
        let derived = derive_key(b"1230", 16);
        assert_eq!(derived, b"1230123012301230");
    }

    #[test]
    fn truncates_long_keys() {
        let derived = derive_key(b"12121212121212121212121212121212", 16);
        assert_eq!(derived, b"1212121212121212");
    }

    #[test]
    fn always_produces_exactly_required_len_bytes() {
        assert_eq!(derive_key(b"1230", 16).len(), 16);
        assert_eq!(derive_key(b"12121212121212121212121212121212", 16).len(), 16);
        assert_eq!(derive_key(b"", 16).len(), 16);
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(derive_key(b"1230", 16), derive_key(b"1230", 16));
    }
}
