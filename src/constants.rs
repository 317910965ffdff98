//! Fixed parameters. These must match across any two engine instances that
//! share a vault, so they are plain `const`s rather than config, following
//! the way `sdk/src/crypto/io.rs` keeps `MAGIC_NUMBER`/`BLOCK_SIZE` as
//! top-of-file consts instead of a config struct.

/// AES block length in bytes, used for CTR counters, ECB single blocks and
/// padding/fake-block granularity.
pub const AES_BLOCK_LEN: usize = 16;

/// Preferred master key length for newly generated keys. §9 says to pick
/// this unconditionally rather than negotiating a smaller size.
pub const PREFERRED_KEY_LENGTH_BITS: u16 = 256;

/// Salt length for freshly created keyfiles.
pub const SCRYPT_SALT_LEN: usize = 16;

/// Default scrypt parameters for newly created keyfiles. Existing keyfiles
/// carry their own parameters and are always honored as stored.
#[derive(Debug, Clone, Copy)]
pub struct ScryptParams {
    /// CPU/memory cost, stored in the keyfile as `scryptCostParam` (the
    /// actual N value, not its base-2 logarithm).
    pub cost_param: u64,
    pub block_size: u32,
}

impl Default for ScryptParams {
    fn default() -> Self {
        ScryptParams {
            cost_param: 1 << 15,
            block_size: 8,
        }
    }
}

/// Length of the group prefix shared by every long-form component that
/// spills into the same metadata sidecar.
pub const LONG_NAME_PREFIX_LENGTH: usize = 8;

/// A component encrypts to short form iff `base32.len() + BASIC_EXT.len()`
/// does not exceed this limit.
pub const ENCRYPTED_FILENAME_LENGTH_LIMIT: usize = 129;

pub const BASIC_EXT: &str = ".vltc";
pub const LONG_EXT: &str = ".vltc.lng";
pub const METADATA_EXT: &str = ".vltc.lngmeta";

/// Header layout offsets, see `content.rs`.
pub const IV_OFFSET: u64 = 0;
pub const IV_LEN: usize = 16;
pub const MAC_OFFSET: u64 = 16;
pub const MAC_LEN: usize = 32;
pub const LENGTH_FIELD_OFFSET: u64 = 48;
pub const LENGTH_FIELD_LEN: usize = 16;
pub const HEADER_LEN: u64 = 64;
