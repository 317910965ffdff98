//! Streaming glue: the collaborator traits the engine consumes (§6) and the
//! stream adapters that compose around them (§4.5, §9 "stream pipelines").
//!
//! Grounded on `sdk/src/crypto/io.rs`'s `HashingWriter<W>`: a thin `Write`
//! wrapper that passes bytes through unchanged while feeding them to a
//! running digest. Here the digest is an HMAC rather than a plain hash, and
//! there is a read-direction counterpart since the decrypt pipeline needs
//! to observe ciphertext bytes as they come off the channel, not as they go
//! into it.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::VaultError;

pub type HmacSha256 = Hmac<Sha256>;

/// Byte-level operations on one encrypted file. Semantics match a POSIX
/// file descriptor opened for read/write on a regular file.
pub trait SeekableChannel: Read + Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn size(&mut self) -> io::Result<u64>;
}

impl SeekableChannel for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn size(&mut self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }
}

/// In-memory fake channel used by unit tests so the content codec's
/// streaming paths can be exercised without touching disk.
impl SeekableChannel for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = len as usize;
        let pos = self.position().min(len as u64);
        self.get_mut().resize(len, 0);
        self.set_position(pos);
        Ok(())
    }

    fn size(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }
}

/// Path-scoped metadata I/O: a small named blob keyed by a sibling
/// filename, used by the filename codec to persist long-name groups.
pub trait CryptorIo {
    fn read_path_specific_metadata(&mut self, name: &str) -> Result<Option<Vec<u8>>, VaultError>;
    fn write_path_specific_metadata(&mut self, name: &str, bytes: &[u8])
        -> Result<(), VaultError>;
}

/// In-memory `CryptorIo` for tests, and a usable real-filesystem
/// implementation for callers without their own metadata store.
pub struct DirCryptorIo {
    dir: std::path::PathBuf,
}

impl DirCryptorIo {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        DirCryptorIo { dir: dir.into() }
    }
}

impl CryptorIo for DirCryptorIo {
    fn read_path_specific_metadata(&mut self, name: &str) -> Result<Option<Vec<u8>>, VaultError> {
        match std::fs::read(self.dir.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::Io(e)),
        }
    }

    fn write_path_specific_metadata(
        &mut self,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), VaultError> {
        let tmp = self.dir.join(format!("{name}.tmp"));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, self.dir.join(name))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCryptorIo {
    files: std::collections::HashMap<String, Vec<u8>>,
}

impl CryptorIo for InMemoryCryptorIo {
    fn read_path_specific_metadata(&mut self, name: &str) -> Result<Option<Vec<u8>>, VaultError> {
        Ok(self.files.get(name).cloned())
    }

    fn write_path_specific_metadata(
        &mut self,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), VaultError> {
        self.files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Write adapter: passes bytes through to `inner` unchanged while feeding
/// them to a running HMAC, in the exact order written to the channel. Used
/// on both the encrypt path (tap on ciphertext leaving the cipher) and the
/// `isAuthentic` check (tap on ciphertext read from the channel into a null
/// sink).
pub struct MacTapWriter<W> {
    mac: HmacSha256,
    inner: W,
}

impl<W: Write> MacTapWriter<W> {
    pub fn new(mac: HmacSha256, inner: W) -> Self {
        MacTapWriter { mac, inner }
    }

    pub fn finish(self) -> (W, [u8; 32]) {
        let tag = self.mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&tag);
        (self.inner, out)
    }
}

impl<W: Write> Write for MacTapWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.mac.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Read adapter: the decrypt-side counterpart of `MacTapWriter`. Observes
/// ciphertext bytes exactly as they are read off the channel, before the
/// cipher layer touches them.
pub struct MacTapReader<R> {
    mac: HmacSha256,
    inner: R,
}

impl<R: Read> MacTapReader<R> {
    pub fn new(mac: HmacSha256, inner: R) -> Self {
        MacTapReader { mac, inner }
    }

    pub fn finish(self) -> [u8; 32] {
        let tag = self.mac.finalize().into_bytes();
        let mut out = [0u8; 32];
        out.copy_from_slice(&tag);
        out
    }
}

impl<R: Read> Read for MacTapReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.mac.update(&buf[..n]);
        Ok(n)
    }
}

/// A `Write` sink that discards everything, for draining the remainder of
/// a ciphertext through a `MacTapReader`/`MacTapWriter` without allocating.
pub struct NullSink;

impl Write for NullSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Seeks `channel` to `offset` and returns a `VaultError::Io` on failure,
/// shared by every content-codec entry point.
pub(crate) fn seek_to(channel: &mut impl Seek, offset: u64) -> Result<(), VaultError> {
    channel.seek(SeekFrom::Start(offset))?;
    Ok(())
}
