//! Ciphertext header and per-version format parameters
//!
//! Every ciphertext starts with a 4-byte header:
//! - magic: 2 bytes, `sc`
//! - version: 2 bytes, big-endian
//!
//! The version is the sole selector of the salt length, KDF iteration count,
//! counter prefix layout and tag length for the rest of the ciphertext.

use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};

/// Magic prefix shared by all versions
pub const MAGIC: &[u8; 2] = b"sc";

/// Length of magic plus version field
pub const HEADER_LEN: usize = 4;

/// Half an AES block; the length of the counter prefix
pub const HALF_BLOCK: usize = 8;

/// Salt length of the latest version
pub const SALT_LEN: usize = 32;

/// Length of the HMAC-SHA256 tag, identical for all versions
pub const TAG_LEN: usize = 32;

/// Where a version takes the fixed upper half of its CTR counter block from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterPrefix {
    /// First half block of the salt; no separate field on the wire.
    FromSalt,
    /// Random half block stored right after the salt.
    Field,
}

/// Format and derivation parameters of one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    pub salt_len: usize,
    pub iterations: u32,
    pub counter: CounterPrefix,
    pub tag_len: usize,
}

impl Params {
    /// Bytes the counter prefix occupies on the wire.
    pub const fn prefix_len(&self) -> usize {
        match self.counter {
            CounterPrefix::FromSalt => 0,
            CounterPrefix::Field => HALF_BLOCK,
        }
    }

    /// Length of a ciphertext of this version with an empty body.
    pub const fn min_len(&self) -> usize {
        HEADER_LEN + self.salt_len + self.prefix_len() + self.tag_len
    }
}

/// Number of format versions this build can read
const KNOWN_VERSIONS: usize = 4;

static PARAMS: [Params; KNOWN_VERSIONS] = [
    Params {
        salt_len: 16,
        iterations: 10_000,
        counter: CounterPrefix::FromSalt,
        tag_len: TAG_LEN,
    },
    Params {
        salt_len: 32,
        iterations: 10_000,
        counter: CounterPrefix::FromSalt,
        tag_len: TAG_LEN,
    },
    Params {
        salt_len: 32,
        iterations: 100_000,
        counter: CounterPrefix::FromSalt,
        tag_len: TAG_LEN,
    },
    Params {
        salt_len: SALT_LEN,
        iterations: 100_000,
        counter: CounterPrefix::Field,
        tag_len: TAG_LEN,
    },
];

/// A format version known to this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u16);

/// The version produced by encryption.
pub const LATEST: Version = Version(KNOWN_VERSIONS as u16 - 1);

impl Version {
    /// Returns the version for `raw` if this build knows it.
    pub fn new(raw: u16) -> Option<Self> {
        ((raw as usize) < KNOWN_VERSIONS).then_some(Self(raw))
    }

    pub fn number(self) -> u16 {
        self.0
    }

    pub fn params(self) -> &'static Params {
        &PARAMS[self.0 as usize]
    }

    /// All known versions, oldest first.
    pub fn all() -> impl Iterator<Item = Version> {
        (0..KNOWN_VERSIONS as u16).map(Version)
    }
}

/// Shortest ciphertext any known version can produce.
pub fn min_len_any() -> usize {
    PARAMS.iter().map(Params::min_len).min().unwrap_or(HEADER_LEN)
}

/// Encode the header for `version`.
pub fn encode(version: Version) -> [u8; HEADER_LEN] {
    let v = version.0.to_be_bytes();
    [MAGIC[0], MAGIC[1], v[0], v[1]]
}

/// Check the magic and version of `data` and return the version.
pub fn parse_and_validate(data: &[u8]) -> Result<Version> {
    if data.len() < HEADER_LEN {
        return Err(CryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::TruncatedInput,
            "missing data (input shorter than header)",
        ));
    }

    if &data[..MAGIC.len()] != MAGIC {
        return Err(CryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::HeaderUnrecognized,
            "data not generated by simplecrypt (bad header)",
        ));
    }

    let raw = u16::from_be_bytes([data[2], data[3]]);
    Version::new(raw).ok_or_else(|| {
        CryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::HeaderFromFuture,
            format!(
                "data produced by a more recent version of simplecrypt (bad header, future version {raw}); please upgrade"
            ),
        )
    })
}
