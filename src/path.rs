//! Path codec: splits/joins cleartext and encrypted paths by configurable
//! separators and delegates each component to the filename codec (§4.4).

use crate::error::VaultError;
use crate::filename::{decrypt_component, encrypt_component};
use crate::io::CryptorIo;
use crate::keys::SecretKeys;

/// Split `cleartext` on `clear_sep`, encrypt each component, and join the
/// results with `enc_sep`. Empty components are preserved, so a leading
/// separator (an absolute-like path) round-trips.
pub fn encrypt_path(
    keys: &SecretKeys,
    cleartext: &str,
    enc_sep: char,
    clear_sep: char,
    io: &mut dyn CryptorIo,
) -> Result<String, VaultError> {
    let mut enc_sep_buf = [0u8; 4];
    let enc_sep_str = enc_sep.encode_utf8(&mut enc_sep_buf);

    let parts = cleartext
        .split(clear_sep)
        .map(|component| {
            if component.is_empty() {
                Ok(String::new())
            } else {
                encrypt_component(keys, component, io)
            }
        })
        .collect::<Result<Vec<_>, VaultError>>()?;
    Ok(parts.join(enc_sep_str))
}

/// Symmetric inverse of `encrypt_path`.
pub fn decrypt_path(
    keys: &SecretKeys,
    encrypted: &str,
    enc_sep: char,
    clear_sep: char,
    io: &mut dyn CryptorIo,
) -> Result<String, VaultError> {
    let mut clear_sep_buf = [0u8; 4];
    let clear_sep_str = clear_sep.encode_utf8(&mut clear_sep_buf);

    let parts = encrypted
        .split(enc_sep)
        .map(|component| {
            if component.is_empty() {
                Ok(String::new())
            } else {
                decrypt_component(keys, component, io)
            }
        })
        .collect::<Result<Vec<_>, VaultError>>()?;
    Ok(parts.join(clear_sep_str))
}
