use thiserror::Error;

/// Crypto-layer failures: bad key material, missing randomness, or a GCM
/// authentication failure on decrypt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key or corrupted data")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptFailed,

    #[error("invalid key encoding")]
    InvalidKeyEncoding,
}
