//! AES-256-GCM chunk encryption, SHA-256 hashing, and base64 key codec.
//!
//! Mirrors the "crypto primitives" component of the transfer engine: every
//! chunk sent over the hosted-upload path is independently encrypted with a
//! fresh random IV, so the on-wire layout is always
//! `IV(12) || ciphertext || tag(16)` — exactly 28 bytes of overhead per
//! chunk, constant regardless of plaintext size.

mod error;
mod hash;
mod key;

pub use error::CryptoError;
pub use hash::sha256_hex;
pub use key::Key;

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, OsRng},
    Aes256Gcm,
};
use rand_core::RngCore;

/// Bytes of IV + GCM tag appended to every encrypted chunk (12 + 16).
pub const CHUNK_OVERHEAD: usize = 28;

const IV_LEN: usize = 12;

/// Generate a fresh random AES-256-GCM key.
pub fn generate_key() -> Key {
    Key::generate()
}

/// Export a key as base64 (raw 32 bytes, standard alphabet, padded).
pub fn export_key_base64(key: &Key) -> String {
    key.to_base64()
}

/// Import a key previously produced by [`export_key_base64`].
pub fn import_key_base64(s: &str) -> Result<Key, CryptoError> {
    Key::from_base64(s)
}

/// Encrypt one chunk. Output is `IV(12) || ciphertext_with_tag`.
///
/// A fresh random IV is drawn on every call — encrypting the same
/// plaintext twice yields distinct ciphertexts.
pub fn encrypt_chunk(plain: &[u8], key: &Key) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let nonce = GenericArray::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plain)
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a chunk produced by [`encrypt_chunk`].
///
/// The first 12 bytes of `combined` are taken as the IV, the remainder as
/// ciphertext + GCM tag. Fails with [`CryptoError::AuthenticationFailed`]
/// when the tag doesn't verify (wrong key or corrupted data).
pub fn decrypt_chunk(combined: &[u8], key: &Key) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < IV_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }

    let (iv, ciphertext) = combined.split_at(IV_LEN);
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = GenericArray::from_slice(iv);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Encrypt a UTF-8 filename and base64-encode the whole `IV || ct || tag`
/// blob, so an encrypted filename can travel as a plain string field.
pub fn encrypt_filename_b64(name: &str, key: &Key) -> Result<String, CryptoError> {
    let combined = encrypt_chunk(name.as_bytes(), key)?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        combined,
    ))
}

/// Inverse of [`encrypt_filename_b64`].
pub fn decrypt_filename_b64(encoded: &str, key: &Key) -> Result<String, CryptoError> {
    let combined = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    let plain = decrypt_chunk(&combined, key)?;
    String::from_utf8(plain).map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encrypt_adds_constant_overhead() {
        let key = generate_key();
        for len in [0usize, 1, 17, 4096, 5 * 1024 * 1024] {
            let plain = vec![0xAB; len];
            let ct = encrypt_chunk(&plain, &key).unwrap();
            assert_eq!(ct.len(), len + CHUNK_OVERHEAD);
        }
    }

    #[test]
    fn roundtrip_is_identity() {
        let key = generate_key();
        let plain = b"the quick brown fox jumps over the lazy dog".to_vec();
        let ct = encrypt_chunk(&plain, &key).unwrap();
        let back = decrypt_chunk(&ct, &key).unwrap();
        assert_eq!(back, plain);
    }

    #[test]
    fn same_plaintext_twice_differs() {
        let key = generate_key();
        let plain = b"repeatable payload".to_vec();
        let a = encrypt_chunk(&plain, &key).unwrap();
        let b = encrypt_chunk(&plain, &key).unwrap();
        assert_ne!(a, b);
        // both still decrypt to the same plaintext
        assert_eq!(decrypt_chunk(&a, &key).unwrap(), plain);
        assert_eq!(decrypt_chunk(&b, &key).unwrap(), plain);
    }

    #[test]
    fn wrong_key_fails_auth() {
        let key = generate_key();
        let other = generate_key();
        let ct = encrypt_chunk(b"secret", &key).unwrap();
        assert!(matches!(
            decrypt_chunk(&ct, &other),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn key_export_import_roundtrip() {
        let key = generate_key();
        let b64 = export_key_base64(&key);
        let back = import_key_base64(&b64).unwrap();
        assert_eq!(key.as_bytes(), back.as_bytes());
    }

    #[test]
    fn filename_roundtrip() {
        let key = generate_key();
        let enc = encrypt_filename_b64("vacation photo.jpg", &key).unwrap();
        let dec = decrypt_filename_b64(&enc, &key).unwrap();
        assert_eq!(dec, "vacation photo.jpg");
    }

    #[test]
    fn sha256_hex_is_lowercase_and_fixed_width() {
        let digest = sha256_hex(b"");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    proptest! {
        #[test]
        fn roundtrip_holds_for_arbitrary_bytes(plain in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let key = generate_key();
            let ct = encrypt_chunk(&plain, &key).unwrap();
            prop_assert_eq!(ct.len(), plain.len() + CHUNK_OVERHEAD);
            let back = decrypt_chunk(&ct, &key).unwrap();
            prop_assert_eq!(back, plain);
        }
    }
}
