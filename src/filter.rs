//! Payload filter (§4.6): a predicate over directory entry names that
//! matches exactly the files carrying file content, not metadata sidecars.

use crate::constants::{BASIC_EXT, LONG_EXT, METADATA_EXT};

/// Returns true iff `name` is a payload-carrying encrypted file (short or
/// long form), as opposed to a long-name metadata sidecar or anything
/// unrelated an external directory walker might see.
pub fn is_payload_entry(name: &str) -> bool {
    if name.ends_with(METADATA_EXT) {
        return false;
    }
    name.ends_with(BASIC_EXT) || name.ends_with(LONG_EXT)
}
