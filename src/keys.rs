//! Key material: the two symmetric keys held by the engine, and the scrypt
//! KDF that derives a key-encrypting key from a passphrase.

use rand::{RngCore, TryRngCore};
use scrypt::Params as ScryptParamsInner;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::error::VaultError;

/// Keys supported by the on-disk format. 256 bits is preferred for new
/// vaults (§9); 128/192 are read for backward compatibility.
fn max_platform_key_length_bits() -> u16 {
    256
}

/// In-memory holder of the primary AES key and the HMAC key. Never exposed
/// in raw form across the engine boundary; callers only ever see it through
/// the codecs that borrow it.
#[derive(Debug)]
pub struct SecretKeys {
    primary: Zeroizing<Vec<u8>>,
    hmac: Zeroizing<Vec<u8>>,
}

impl SecretKeys {
    /// Draw `2 * key_length_bits / 8` bytes from the OS CSPRNG and split
    /// them into the primary and HMAC keys.
    pub fn generate_fresh(key_length_bits: u16) -> Result<Self, VaultError> {
        let max = max_platform_key_length_bits();
        if key_length_bits > max {
            return Err(VaultError::UnsupportedKeyLength {
                bits: key_length_bits,
                max,
            });
        }
        let key_len = usize::from(key_length_bits) / 8;
        let mut buf = Zeroizing::new(vec![0u8; key_len * 2]);
        rand::rngs::OsRng.unwrap_err().fill_bytes(&mut buf);
        let primary = Zeroizing::new(buf[..key_len].to_vec());
        let hmac = Zeroizing::new(buf[key_len..].to_vec());
        debug!(key_length_bits, "generated fresh master keys");
        Ok(SecretKeys { primary, hmac })
    }

    pub(crate) fn from_parts(primary: Vec<u8>, hmac: Vec<u8>) -> Self {
        SecretKeys {
            primary: Zeroizing::new(primary),
            hmac: Zeroizing::new(hmac),
        }
    }

    pub fn primary_key(&self) -> &[u8] {
        &self.primary
    }

    pub fn hmac_key(&self) -> &[u8] {
        &self.hmac
    }

    pub fn key_length_bits(&self) -> u16 {
        (self.primary.len() * 8) as u16
    }
}

/// Derive a key-encrypting key from a passphrase via scrypt, with
/// parallelism fixed at 1 as the format requires.
pub fn derive_kek(
    passphrase: &str,
    salt: &[u8],
    cost_param: u64,
    block_size: u32,
    key_length_bits: u16,
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let log_n = log2_exact(cost_param).ok_or_else(|| {
        VaultError::ConfigurationInvariant(format!(
            "scrypt cost param {cost_param} is not a power of two"
        ))
    })?;
    let params = ScryptParamsInner::new(log_n, block_size, 1, usize::from(key_length_bits) / 8)
        .map_err(|e| VaultError::ConfigurationInvariant(format!("invalid scrypt params: {e}")))?;

    let mut encoded_passphrase = Zeroizing::new(passphrase.as_bytes().to_vec());
    let mut out = Zeroizing::new(vec![0u8; usize::from(key_length_bits) / 8]);
    let result = scrypt::scrypt(&encoded_passphrase, salt, &params, &mut out);
    encoded_passphrase.fill(0);
    result.map_err(|e| VaultError::ConfigurationInvariant(format!("scrypt failed: {e}")))?;
    trace!(key_length_bits, "derived key-encrypting key");
    Ok(out)
}

fn log2_exact(n: u64) -> Option<u8> {
    if n == 0 || (n & (n - 1)) != 0 {
        return None;
    }
    Some(n.trailing_zeros() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_fresh_produces_distinct_keys() {
        let keys = SecretKeys::generate_fresh(256).unwrap();
        assert_eq!(keys.primary_key().len(), 32);
        assert_eq!(keys.hmac_key().len(), 32);
        assert_ne!(keys.primary_key(), keys.hmac_key());
    }

    #[test]
    fn generate_fresh_rejects_oversized_keys() {
        let err = SecretKeys::generate_fresh(512).unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedKeyLength { .. }));
    }

    #[test]
    fn derive_kek_is_deterministic_for_same_inputs() {
        let salt = [7u8; 16];
        let a = derive_kek("hunter2", &salt, 1 << 10, 8, 256).unwrap();
        let b = derive_kek("hunter2", &salt, 1 << 10, 8, 256).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn derive_kek_differs_for_different_passphrases() {
        let salt = [7u8; 16];
        let a = derive_kek("hunter2", &salt, 1 << 10, 8, 256).unwrap();
        let b = derive_kek("hunter3", &salt, 1 << 10, 8, 256).unwrap();
        assert_ne!(*a, *b);
    }
}
