//! Password to key pair derivation
//!
//! PBKDF2 with HMAC-SHA256 produces 64 bytes per (password, salt,
//! iterations). The first half keys the HMAC tag, the second half keys the
//! AES-256 counter-mode cipher; being disjoint slices of one PBKDF2 output
//! they reveal nothing about each other.

use std::fmt;
use std::time::Instant;

use hmac::Hmac;
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};

/// Length of each derived key (256 bits)
pub const KEY_LEN: usize = 32;

/// Independent MAC and cipher keys derived from one password and salt
#[derive(Clone)]
pub struct DerivedKeys {
    mac_key: Zeroizing<[u8; KEY_LEN]>,
    cipher_key: Zeroizing<[u8; KEY_LEN]>,
}

impl DerivedKeys {
    pub fn mac_key(&self) -> &[u8; KEY_LEN] {
        &self.mac_key
    }

    pub fn cipher_key(&self) -> &[u8; KEY_LEN] {
        &self.cipher_key
    }
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeys").finish_non_exhaustive()
    }
}

impl PartialEq for DerivedKeys {
    fn eq(&self, other: &Self) -> bool {
        *self.mac_key == *other.mac_key && *self.cipher_key == *other.cipher_key
    }
}

impl Eq for DerivedKeys {}

/// Derive the key pair for `password` and `salt`.
///
/// Deterministic. The cost grows linearly with `iterations`.
pub fn derive_keys(password: &[u8], salt: &[u8], iterations: u32) -> Result<DerivedKeys> {
    if password.is_empty() {
        return Err(CryptError::missing_password());
    }
    if salt.is_empty() {
        return Err(CryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::Configuration,
            "missing salt",
        ));
    }
    if iterations == 0 {
        return Err(CryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::Configuration,
            "iteration count must be at least 1",
        ));
    }

    let started = Instant::now();
    let mut okm = Zeroizing::new([0u8; 2 * KEY_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, okm.as_mut_slice()).map_err(
        |_| {
            CryptError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::DerivationFailure,
                "PBKDF2 key derivation failed",
            )
        },
    )?;

    let mut mac_key = Zeroizing::new([0u8; KEY_LEN]);
    let mut cipher_key = Zeroizing::new([0u8; KEY_LEN]);
    mac_key.copy_from_slice(&okm[..KEY_LEN]);
    cipher_key.copy_from_slice(&okm[KEY_LEN..]);

    debug!(
        iterations,
        elapsed_us = started.elapsed().as_micros() as u64,
        "derived key pair"
    );

    Ok(DerivedKeys {
        mac_key,
        cipher_key,
    })
}
