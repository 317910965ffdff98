use thiserror::Error;

/// Error kinds exposed across the engine boundary.
///
/// `MacAuthenticationFailed` is conceptually a subclass of `DecryptFailed`
/// (both signal a ciphertext-integrity fault) but is kept as a distinct
/// variant because callers need to tell "full-file content authentication
/// failed after delivery" apart from "this filename/keyfile could not be
/// decrypted at all".
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("wrong password")]
    WrongPassword,

    #[error("unsupported key length: {bits} bits (platform maximum is {max} bits)")]
    UnsupportedKeyLength { bits: u16, max: u16 },

    #[error("decrypt failed: {0}")]
    DecryptFailed(String),

    #[error("MAC authentication failed for {0}")]
    MacAuthenticationFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Required algorithm unavailable, or an internal invariant was
    /// violated. Not expected to ever surface outside of a broken build or
    /// a corrupted process; callers should treat this as fatal.
    #[error("configuration invariant violated: {0}")]
    ConfigurationInvariant(String),
}
