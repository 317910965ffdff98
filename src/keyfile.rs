//! Keyfile codec: the passphrase-protected text record that wraps the two
//! master keys (§4.2).

use std::io::{Read, Write};

use aes::cipher::generic_array::GenericArray;
use aes_kw::{KekAes128, KekAes192, KekAes256};
#[cfg(test)]
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{RngCore, TryRngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::constants::{ScryptParams, SCRYPT_SALT_LEN};
use crate::error::VaultError;
use crate::keys::{derive_kek, SecretKeys};

/// On-disk record, field-for-field as specified in §3/§6. Byte strings are
/// base64 standard, integers are decimal; serde_json gives us both for
/// free via `#[serde(with = "...")]` helpers below.
#[derive(Debug, Serialize, Deserialize)]
struct KeyfileRecord {
    #[serde(rename = "scryptSalt", with = "base64_bytes")]
    scrypt_salt: Vec<u8>,
    #[serde(rename = "scryptCostParam")]
    scrypt_cost_param: u64,
    #[serde(rename = "scryptBlockSize")]
    scrypt_block_size: u32,
    #[serde(rename = "keyLength")]
    key_length: u16,
    #[serde(rename = "primaryMasterKey", with = "base64_bytes")]
    primary_master_key: Vec<u8>,
    #[serde(rename = "hMacMasterKey", with = "base64_bytes")]
    h_mac_master_key: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

fn wrap_key(kek: &[u8], key: &[u8]) -> Result<Vec<u8>, VaultError> {
    match kek.len() {
        16 => {
            let kek = KekAes128::new(GenericArray::from_slice(kek));
            kek.wrap_vec(key)
                .map_err(|e| VaultError::ConfigurationInvariant(format!("key wrap failed: {e}")))
        }
        24 => {
            let kek = KekAes192::new(GenericArray::from_slice(kek));
            kek.wrap_vec(key)
                .map_err(|e| VaultError::ConfigurationInvariant(format!("key wrap failed: {e}")))
        }
        32 => {
            let kek = KekAes256::new(GenericArray::from_slice(kek));
            kek.wrap_vec(key)
                .map_err(|e| VaultError::ConfigurationInvariant(format!("key wrap failed: {e}")))
        }
        other => Err(VaultError::ConfigurationInvariant(format!(
            "unsupported key-encrypting-key length: {other} bytes"
        ))),
    }
}

fn unwrap_key(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, VaultError> {
    match kek.len() {
        16 => {
            let kek = KekAes128::new(GenericArray::from_slice(kek));
            kek.unwrap_vec(wrapped).map_err(|_| VaultError::WrongPassword)
        }
        24 => {
            let kek = KekAes192::new(GenericArray::from_slice(kek));
            kek.unwrap_vec(wrapped).map_err(|_| VaultError::WrongPassword)
        }
        32 => {
            let kek = KekAes256::new(GenericArray::from_slice(kek));
            kek.unwrap_vec(wrapped).map_err(|_| VaultError::WrongPassword)
        }
        other => Err(VaultError::ConfigurationInvariant(format!(
            "unsupported key-encrypting-key length: {other} bytes"
        ))),
    }
}

/// Generate a random salt, derive a KEK, wrap both master keys under it and
/// write the resulting record to `out`. Fails only on I/O error; any crypto
/// configuration error (bad scrypt params, unsupported KEK width) is a
/// programmer error and surfaces as `ConfigurationInvariant` rather than
/// being retried or swallowed.
pub fn encrypt_master_key(
    keys: &SecretKeys,
    passphrase: &str,
    params: ScryptParams,
    out: &mut impl Write,
) -> Result<(), VaultError> {
    let mut salt = [0u8; SCRYPT_SALT_LEN];
    rand::rngs::OsRng.unwrap_err().fill_bytes(&mut salt);

    let key_length_bits = keys.key_length_bits();
    let kek: Zeroizing<Vec<u8>> = derive_kek(
        passphrase,
        &salt,
        params.cost_param,
        params.block_size,
        key_length_bits,
    )?;

    let primary_master_key = wrap_key(&kek, keys.primary_key())?;
    let h_mac_master_key = wrap_key(&kek, keys.hmac_key())?;

    let record = KeyfileRecord {
        scrypt_salt: salt.to_vec(),
        scrypt_cost_param: params.cost_param,
        scrypt_block_size: params.block_size,
        key_length: key_length_bits,
        primary_master_key,
        h_mac_master_key,
    };
    let text = serde_json::to_vec(&record)
        .map_err(|e| VaultError::ConfigurationInvariant(format!("keyfile serialize: {e}")))?;
    out.write_all(&text)?;
    debug!(key_length_bits, "wrote keyfile");
    Ok(())
}

/// Parse a keyfile, derive the KEK with its recorded scrypt parameters and
/// unwrap both master keys. An unwrap integrity failure means the
/// passphrase was wrong, not that the file is structurally corrupt, so it
/// is surfaced as `WrongPassword` rather than `DecryptFailed`.
pub fn decrypt_master_key(
    input: &mut impl Read,
    passphrase: &str,
) -> Result<SecretKeys, VaultError> {
    let mut text = Vec::new();
    input.read_to_end(&mut text)?;
    let record: KeyfileRecord = serde_json::from_slice(&text)
        .map_err(|e| VaultError::DecryptFailed(format!("malformed keyfile: {e}")))?;

    let max = 256;
    if record.key_length > max {
        warn!(bits = record.key_length, "keyfile declares oversized key");
        return Err(VaultError::UnsupportedKeyLength {
            bits: record.key_length,
            max,
        });
    }

    let kek = derive_kek(
        passphrase,
        &record.scrypt_salt,
        record.scrypt_cost_param,
        record.scrypt_block_size,
        record.key_length,
    )?;

    let primary = unwrap_key(&kek, &record.primary_master_key)?;
    let hmac = unwrap_key(&kek, &record.h_mac_master_key)?;
    debug!(bits = record.key_length, "unlocked keyfile");
    Ok(SecretKeys::from_parts(primary, hmac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_correct_passphrase() {
        let keys = SecretKeys::generate_fresh(256).unwrap();
        let mut buf = Vec::new();
        encrypt_master_key(&keys, "correct horse battery staple", ScryptParams::default(), &mut buf)
            .unwrap();

        let restored =
            decrypt_master_key(&mut buf.as_slice(), "correct horse battery staple").unwrap();
        assert_eq!(restored.primary_key(), keys.primary_key());
        assert_eq!(restored.hmac_key(), keys.hmac_key());
    }

    #[test]
    fn round_trips_a_192_bit_vault() {
        let keys = SecretKeys::generate_fresh(192).unwrap();
        let mut buf = Vec::new();
        encrypt_master_key(&keys, "correct horse battery staple", ScryptParams::default(), &mut buf)
            .unwrap();

        let restored =
            decrypt_master_key(&mut buf.as_slice(), "correct horse battery staple").unwrap();
        assert_eq!(restored.primary_key(), keys.primary_key());
        assert_eq!(restored.hmac_key(), keys.hmac_key());
    }

    #[test]
    fn wrong_passphrase_is_reported_distinctly() {
        let keys = SecretKeys::generate_fresh(256).unwrap();
        let mut buf = Vec::new();
        encrypt_master_key(&keys, "correct horse battery staple", ScryptParams::default(), &mut buf)
            .unwrap();

        let err = decrypt_master_key(&mut buf.as_slice(), "Correct horse battery staple")
            .unwrap_err();
        assert!(matches!(err, VaultError::WrongPassword));
    }

    #[test]
    fn oversized_key_length_is_rejected() {
        let mut record = KeyfileRecord {
            scrypt_salt: vec![0u8; 16],
            scrypt_cost_param: 1 << 10,
            scrypt_block_size: 8,
            key_length: 512,
            primary_master_key: vec![0u8; 40],
            h_mac_master_key: vec![0u8; 40],
        };
        record.key_length = 512;
        let text = serde_json::to_vec(&record).unwrap();
        let err = decrypt_master_key(&mut text.as_slice(), "whatever").unwrap_err();
        assert!(matches!(err, VaultError::UnsupportedKeyLength { .. }));
    }

    #[test]
    fn scrypt_salt_round_trips_as_base64() {
        let record = KeyfileRecord {
            scrypt_salt: vec![1, 2, 3, 4],
            scrypt_cost_param: 1 << 15,
            scrypt_block_size: 8,
            key_length: 256,
            primary_master_key: vec![0u8; 40],
            h_mac_master_key: vec![0u8; 40],
        };
        let text = serde_json::to_string(&record).unwrap();
        assert!(text.contains(&STANDARD.encode([1, 2, 3, 4])));
        let back: KeyfileRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back.scrypt_salt, vec![1, 2, 3, 4]);
    }
}
