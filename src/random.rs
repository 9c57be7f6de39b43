//! Cryptographically secure random bytes
//!
//! Raw generator output never reaches a ciphertext: every draw is passed
//! through a one-round PBKDF2-HMAC-SHA256 expansion of the same length.

use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};
use hmac::Hmac;
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

/// Source of cryptographically secure random bytes
pub trait RandomSource: Send + Sync {
    /// Fill `buf` entirely, or fail. Implementations must never fall back to
    /// a weaker generator.
    fn fill(&self, buf: &mut [u8]) -> Result<()>;
}

/// The operating system's CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        OsRng.try_fill_bytes(buf).map_err(|e| {
            CryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::DerivationFailure,
                "secure random source unavailable",
                e,
            )
        })
    }
}

/// Draw `n` whitened random bytes from `source`.
pub fn random_bytes(source: &dyn RandomSource, n: usize) -> Result<Vec<u8>> {
    let mut raw = zeroize::Zeroizing::new(vec![0u8; n]);
    source.fill(&mut raw)?;
    hide(&raw)
}

/// Whitening applied to raw random output before use.
fn hide(raw: &[u8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; raw.len()];
    if raw.is_empty() {
        return Ok(out);
    }
    pbkdf2::pbkdf2::<Hmac<Sha256>>(raw, b"", 1, &mut out).map_err(|_| {
        CryptError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::DerivationFailure,
            "failed to whiten random bytes",
        )
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        for n in 0..40 {
            assert_eq!(random_bytes(&OsRandom, n).unwrap().len(), n);
        }
    }

    // Fails with probability about 2^-100.
    #[test]
    fn test_bits_vary() {
        let b = random_bytes(&OsRandom, 100).unwrap();
        assert_eq!(0, b.iter().fold(0xff, |acc, x| acc & x));
        assert_eq!(0xff, b.iter().fold(0, |acc, x| acc | x));
    }

    #[test]
    fn test_covers_all_byte_values() {
        let b = random_bytes(&OsRandom, 255 * 10).unwrap();
        assert!((0..=255u8).all(|n| b.contains(&n)));
    }

    #[test]
    fn test_hide_is_deterministic_and_sensitive() {
        let raw: Vec<u8> = (0..32).collect();
        let h1 = hide(&raw).unwrap();
        assert_eq!(h1, hide(&raw).unwrap());
        assert_ne!(h1, raw);

        // A 32-byte output colliding on a single flipped bit would be a
        // 2^-256 event.
        for i in 0..raw.len() {
            for j in 0..8 {
                let mut flipped = raw.clone();
                flipped[i] ^= 1 << j;
                assert_ne!(h1, hide(&flipped).unwrap(), "byte {i} bit {j}");
            }
        }
    }

    #[test]
    fn test_failing_source_propagates() {
        struct Broken;
        impl RandomSource for Broken {
            fn fill(&self, _buf: &mut [u8]) -> Result<()> {
                Err(CryptError::with_kind(
                    ErrorCategory::Internal,
                    ErrorKind::DerivationFailure,
                    "simulated entropy failure",
                ))
            }
        }

        let err = random_bytes(&Broken, 16).expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::DerivationFailure));
    }
}
