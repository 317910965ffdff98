#![allow(clippy::collapsible_else_if)]

//! Client-side, zero-knowledge encryption engine for a virtual file vault.
//!
//! This crate implements the cryptographic core only: the keyfile format
//! and passphrase-derived key wrapping, the filename encryption scheme
//! (including the long-name metadata sidecar), and the per-file content
//! encryption format with random-access reads, streaming writes,
//! authenticated integrity and size-concealment padding. The virtual
//! filesystem mount layer, UI, passphrase prompting, configuration
//! persistence and logging infrastructure are external collaborators; this
//! crate consumes two abstractions from them, [`io::SeekableChannel`] and
//! [`io::CryptorIo`].

pub mod constants;
pub mod content;
pub mod error;
pub mod filename;
pub mod filter;
pub mod io;
pub mod keyfile;
pub mod keys;
pub mod path;

use std::io::{Read, Write};

use tracing::debug;

pub use constants::ScryptParams;
pub use error::VaultError;
pub use io::{CryptorIo, SeekableChannel};
pub use keys::SecretKeys;

/// The single-instance, caller-synchronized crypto engine. Holds the two
/// master keys and exposes every operation that needs them. Per §5, key
/// lifecycle operations (`unlock`/`zeroize`) are not reentrant-safe and
/// must not overlap with any other call on the same instance; independent
/// file operations on disjoint channels are safe as long as the key state
/// is stable.
pub struct VaultCryptor {
    keys: Option<SecretKeys>,
}

impl VaultCryptor {
    /// An engine with freshly generated keys, for creating a new vault.
    pub fn generate(key_length_bits: u16) -> Result<Self, VaultError> {
        Ok(VaultCryptor {
            keys: Some(SecretKeys::generate_fresh(key_length_bits)?),
        })
    }

    /// `generate` at the preferred key length (§9: new vaults always pick
    /// this unconditionally rather than negotiating a smaller size).
    pub fn generate_default() -> Result<Self, VaultError> {
        Self::generate(constants::PREFERRED_KEY_LENGTH_BITS)
    }

    /// An engine with no keys installed. Every crypto operation fails with
    /// `ConfigurationInvariant` until `unlock` succeeds.
    pub fn locked() -> Self {
        VaultCryptor { keys: None }
    }

    fn keys(&self) -> Result<&SecretKeys, VaultError> {
        self.keys
            .as_ref()
            .ok_or_else(|| VaultError::ConfigurationInvariant("engine has no active keys".into()))
    }

    /// Persist the current keys to `out`, wrapped under `passphrase`.
    pub fn encrypt_master_key(
        &self,
        passphrase: &str,
        params: ScryptParams,
        out: &mut impl Write,
    ) -> Result<(), VaultError> {
        keyfile::encrypt_master_key(self.keys()?, passphrase, params, out)
    }

    /// Parse a keyfile and, on success, atomically replace this engine's
    /// keys. Prior keys are not zeroized automatically; call `zeroize`
    /// first if that matters to the caller.
    pub fn unlock(&mut self, input: &mut impl Read, passphrase: &str) -> Result<(), VaultError> {
        let keys = keyfile::decrypt_master_key(input, passphrase)?;
        self.keys = Some(keys);
        Ok(())
    }

    /// Best-effort destroy of both keys. After this call every crypto
    /// operation on this instance fails with `ConfigurationInvariant`
    /// rather than silently using stale key material.
    pub fn zeroize(&mut self) {
        self.keys = None;
        debug!("engine keys zeroized");
    }

    pub fn encrypt_component(
        &self,
        cleartext: &str,
        io: &mut dyn CryptorIo,
    ) -> Result<String, VaultError> {
        filename::encrypt_component(self.keys()?, cleartext, io)
    }

    pub fn decrypt_component(
        &self,
        encrypted: &str,
        io: &mut dyn CryptorIo,
    ) -> Result<String, VaultError> {
        filename::decrypt_component(self.keys()?, encrypted, io)
    }

    pub fn encrypt_path(
        &self,
        cleartext: &str,
        enc_sep: char,
        clear_sep: char,
        io: &mut dyn CryptorIo,
    ) -> Result<String, VaultError> {
        path::encrypt_path(self.keys()?, cleartext, enc_sep, clear_sep, io)
    }

    pub fn decrypt_path(
        &self,
        encrypted: &str,
        enc_sep: char,
        clear_sep: char,
        io: &mut dyn CryptorIo,
    ) -> Result<String, VaultError> {
        path::decrypt_path(self.keys()?, encrypted, enc_sep, clear_sep, io)
    }

    pub fn encrypt_file(
        &self,
        channel: &mut impl SeekableChannel,
        reader: &mut impl Read,
    ) -> Result<u64, VaultError> {
        content::encrypt_file(self.keys()?, channel, reader)
    }

    pub fn decrypt_file(
        &self,
        channel: &mut impl SeekableChannel,
        writer: &mut impl Write,
    ) -> Result<u64, VaultError> {
        content::decrypt_file(self.keys()?, channel, writer)
    }

    pub fn decrypt_range(
        &self,
        channel: &mut impl SeekableChannel,
        pos: u64,
        length: u64,
        writer: &mut impl Write,
    ) -> Result<u64, VaultError> {
        content::decrypt_range(self.keys()?, channel, pos, length, writer)
    }

    pub fn is_authentic(&self, channel: &mut impl SeekableChannel) -> Result<bool, VaultError> {
        content::is_authentic(self.keys()?, channel)
    }

    pub fn decrypted_content_length(
        &self,
        channel: &mut impl SeekableChannel,
    ) -> Result<Option<u64>, VaultError> {
        content::read_decrypted_content_length(self.keys()?, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::InMemoryCryptorIo;
    use std::io::Cursor;

    #[test]
    fn zeroize_blocks_further_operations() {
        let mut engine = VaultCryptor::generate(256).unwrap();
        let mut io = InMemoryCryptorIo::default();
        assert!(engine.encrypt_component("a.txt", &mut io).is_ok());

        engine.zeroize();
        let err = engine.encrypt_component("a.txt", &mut io).unwrap_err();
        assert!(matches!(err, VaultError::ConfigurationInvariant(_)));
    }

    #[test]
    fn full_life_cycle_through_the_engine_facade() {
        let engine = VaultCryptor::generate(256).unwrap();
        let mut keyfile = Vec::new();
        engine
            .encrypt_master_key("correct horse battery staple", ScryptParams::default(), &mut keyfile)
            .unwrap();

        let mut unlocked = VaultCryptor::locked();
        unlocked
            .unlock(&mut keyfile.as_slice(), "correct horse battery staple")
            .unwrap();

        let mut io = InMemoryCryptorIo::default();
        let name = unlocked.encrypt_component("diary.txt", &mut io).unwrap();
        assert_eq!(unlocked.decrypt_component(&name, &mut io).unwrap(), "diary.txt");

        let mut channel = Cursor::new(Vec::new());
        unlocked
            .encrypt_file(&mut channel, &mut Cursor::new(b"hello vault".to_vec()))
            .unwrap();
        let mut out = Vec::new();
        unlocked.decrypt_file(&mut channel, &mut out).unwrap();
        assert_eq!(out, b"hello vault");
    }

    #[test]
    fn wrong_passphrase_fails_to_unlock() {
        let engine = VaultCryptor::generate(256).unwrap();
        let mut keyfile = Vec::new();
        engine
            .encrypt_master_key("correct horse battery staple", ScryptParams::default(), &mut keyfile)
            .unwrap();

        let mut unlocked = VaultCryptor::locked();
        let err = unlocked
            .unlock(&mut keyfile.as_slice(), "Correct horse battery staple")
            .unwrap_err();
        assert!(matches!(err, VaultError::WrongPassword));
    }
}
