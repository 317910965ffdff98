//! Filename codec: deterministic per-component encryption via AES-SIV, the
//! base32 short form, and the long-name shortening protocol (§4.3).
//!
//! Grounded on `other_examples/d81def78_0xSiO-cryptomator-rs` for the
//! AES-SIV key-splitting convention (`[primary, hmac].concat()` — the
//! primary/encryption key occupies the first half of the combined SIV key,
//! the HMAC key the second half) and on
//! `other_examples/205b71b0_tinyland-inc-tummycrypt` for the
//! `Aes256SivAead` + zero-`Nonce` deterministic-encryption idiom.

use aes_siv::aead::array::Array as GenericArray;
use aes_siv::aead::{Aead, KeyInit};
use aes_siv::{Aes128SivAead, Aes256SivAead, Nonce};
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::constants::{
    BASIC_EXT, ENCRYPTED_FILENAME_LENGTH_LIMIT, LONG_EXT, LONG_NAME_PREFIX_LENGTH, METADATA_EXT,
};
use crate::error::VaultError;
use crate::io::CryptorIo;
use crate::keys::SecretKeys;

/// One long-name group's sidecar: a UUID <-> encrypted-name mapping. The
/// text format is `{"filenames": [{"uuid": ..., "encryptedFilename": ...}]}`
/// per §6.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LongFilenameMetadata {
    filenames: Vec<LongNameRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LongNameRecord {
    uuid: Uuid,
    #[serde(rename = "encryptedFilename")]
    encrypted_filename: String,
}

impl LongFilenameMetadata {
    fn parse(bytes: &[u8]) -> Result<Self, VaultError> {
        serde_json::from_slice(bytes)
            .map_err(|e| VaultError::DecryptFailed(format!("malformed long-name metadata: {e}")))
    }

    fn uuid_for(&mut self, encrypted: &str) -> Uuid {
        if let Some(record) = self
            .filenames
            .iter()
            .find(|r| r.encrypted_filename == encrypted)
        {
            return record.uuid;
        }
        let uuid = Uuid::new_v4();
        self.filenames.push(LongNameRecord {
            uuid,
            encrypted_filename: encrypted.to_string(),
        });
        uuid
    }

    fn encrypted_name_for(&self, uuid: Uuid) -> Option<&str> {
        self.filenames
            .iter()
            .find(|r| r.uuid == uuid)
            .map(|r| r.encrypted_filename.as_str())
    }
}

enum SivCipher {
    Bits128(Aes128SivAead),
    Bits256(Aes256SivAead),
}

fn siv_cipher(keys: &SecretKeys) -> Result<SivCipher, VaultError> {
    let mut combined = keys.primary_key().to_vec();
    combined.extend_from_slice(keys.hmac_key());
    let cipher = match combined.len() {
        32 => SivCipher::Bits128(Aes128SivAead::new(GenericArray::from_slice(&combined))),
        64 => SivCipher::Bits256(Aes256SivAead::new(GenericArray::from_slice(&combined))),
        other => {
            return Err(VaultError::ConfigurationInvariant(format!(
                "unsupported combined SIV key width: {other} bytes (only 128/256-bit master keys support filename encryption in this build)"
            )))
        }
    };
    combined.fill(0);
    Ok(cipher)
}

fn siv_encrypt(keys: &SecretKeys, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let nonce = Nonce::default();
    match siv_cipher(keys)? {
        SivCipher::Bits128(c) => c
            .encrypt(&nonce, plaintext)
            .map_err(|e| VaultError::ConfigurationInvariant(format!("SIV encrypt failed: {e}"))),
        SivCipher::Bits256(c) => c
            .encrypt(&nonce, plaintext)
            .map_err(|e| VaultError::ConfigurationInvariant(format!("SIV encrypt failed: {e}"))),
    }
}

fn siv_decrypt(keys: &SecretKeys, ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let nonce = Nonce::default();
    let result = match siv_cipher(keys)? {
        SivCipher::Bits128(c) => c.decrypt(&nonce, ciphertext),
        SivCipher::Bits256(c) => c.decrypt(&nonce, ciphertext),
    };
    result.map_err(|_| VaultError::DecryptFailed("AES-SIV authentication failed".to_string()))
}

/// Encrypt one path component. Deterministic: the same cleartext under the
/// same keys always yields the same on-disk name (re-using an existing
/// long-name UUID mapping if one already exists).
pub fn encrypt_component(
    keys: &SecretKeys,
    cleartext: &str,
    io: &mut dyn CryptorIo,
) -> Result<String, VaultError> {
    let siv_out = siv_encrypt(keys, cleartext.as_bytes())?;
    let enc = BASE32_NOPAD.encode(&siv_out);

    if enc.len() + BASIC_EXT.len() <= ENCRYPTED_FILENAME_LENGTH_LIMIT {
        return Ok(format!("{enc}{BASIC_EXT}"));
    }

    let prefix: String = enc.chars().take(LONG_NAME_PREFIX_LENGTH).collect();
    let metadata_name = format!("{prefix}{METADATA_EXT}");
    let mut metadata = match io.read_path_specific_metadata(&metadata_name)? {
        Some(bytes) => LongFilenameMetadata::parse(&bytes)?,
        None => LongFilenameMetadata::default(),
    };
    let uuid = metadata.uuid_for(&enc);
    let serialized = serde_json::to_vec(&metadata)
        .map_err(|e| VaultError::ConfigurationInvariant(format!("metadata serialize: {e}")))?;
    io.write_path_specific_metadata(&metadata_name, &serialized)?;
    trace!(%prefix, %uuid, "assigned long-name uuid");

    Ok(format!("{prefix}{uuid}{LONG_EXT}"))
}

/// Decrypt one path component produced by `encrypt_component`.
pub fn decrypt_component(
    keys: &SecretKeys,
    encrypted: &str,
    io: &mut dyn CryptorIo,
) -> Result<String, VaultError> {
    let enc = if let Some(rest) = strip_suffix_ci(encrypted, LONG_EXT) {
        if rest.len() < LONG_NAME_PREFIX_LENGTH {
            return Err(VaultError::DecryptFailed(
                "long-form component shorter than the group prefix".to_string(),
            ));
        }
        let (prefix, uuid_str) = rest.split_at(LONG_NAME_PREFIX_LENGTH);
        let uuid = Uuid::parse_str(uuid_str)
            .map_err(|e| VaultError::DecryptFailed(format!("malformed long-name uuid: {e}")))?;
        let metadata_name = format!("{prefix}{METADATA_EXT}");
        let bytes = io
            .read_path_specific_metadata(&metadata_name)?
            .ok_or_else(|| {
                VaultError::DecryptFailed(format!("missing metadata sidecar {metadata_name}"))
            })?;
        let metadata = LongFilenameMetadata::parse(&bytes)?;
        metadata
            .encrypted_name_for(uuid)
            .ok_or_else(|| VaultError::DecryptFailed(format!("no entry for uuid {uuid}")))?
            .to_string()
    } else if let Some(rest) = strip_suffix_ci(encrypted, BASIC_EXT) {
        rest.to_string()
    } else {
        return Err(VaultError::DecryptFailed(format!(
            "component '{encrypted}' has no recognized extension"
        )));
    };

    let siv_out = BASE32_NOPAD
        .decode(enc.to_ascii_uppercase().as_bytes())
        .map_err(|e| VaultError::DecryptFailed(format!("malformed base32: {e}")))?;
    let plaintext = siv_decrypt(keys, &siv_out)?;
    let result = String::from_utf8(plaintext)
        .map_err(|e| VaultError::DecryptFailed(format!("decrypted name is not UTF-8: {e}")))?;
    debug!(%encrypted, "decrypted filename component");
    Ok(result)
}

fn strip_suffix_ci<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    if s.len() < suffix.len() {
        return None;
    }
    let (head, tail) = s.split_at(s.len() - suffix.len());
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}
