//! Encryption/decryption using PBKDF2 + AES-256-CTR + HMAC-SHA256
//!
//! Encrypt-then-MAC with password-derived keys. The binary format of the
//! latest version is:
//! - header: 4 bytes (`sc` + big-endian version)
//! - salt: 32 bytes
//! - counter prefix: 8 bytes
//! - body: same length as the plaintext
//! - tag: 32 bytes, HMAC-SHA256 over everything before it
//!
//! Older versions omit the counter prefix field and use the first half
//! block of the salt instead. They are still accepted by [`decrypt`].
//!
//! Decryption verifies the tag in constant time before a single byte of
//! the body is decrypted.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::trace;

use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};
use crate::header::{self, CounterPrefix, HALF_BLOCK, HEADER_LEN, LATEST, SALT_LEN, Version};
use crate::input::{self, Input};
use crate::kdf::{DerivedKeys, KEY_LEN, derive_keys};
use crate::random::{OsRandom, RandomSource, random_bytes};

type Aes256Ctr64BE = ctr::Ctr64BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Encrypt `plaintext` under `password` with fresh random salt and counter prefix.
///
/// Both arguments may be bytes or text. The password must not be empty.
pub fn encrypt<'p, 'm>(
    password: impl Into<Input<'p>>,
    plaintext: impl Into<Input<'m>>,
) -> Result<Vec<u8>> {
    let password = input::password_bytes(password.into())?;
    let plaintext = plaintext.into();

    let salt = random_bytes(&OsRandom, SALT_LEN)?;
    let keys = derive_keys(password, &salt, LATEST.params().iterations)?;
    let prefix = fresh_prefix(&OsRandom)?;

    seal(&salt, &keys, &prefix, plaintext.as_bytes())
}

/// Encrypt with caller-provided salt and counter prefix
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates random salt/prefix.
pub fn encrypt_deterministic<'p, 'm>(
    password: impl Into<Input<'p>>,
    plaintext: impl Into<Input<'m>>,
    salt: &[u8; SALT_LEN],
    prefix: &[u8; HALF_BLOCK],
) -> Result<Vec<u8>> {
    let password = input::password_bytes(password.into())?;
    let keys = derive_keys(password, salt, LATEST.params().iterations)?;
    seal(salt, &keys, prefix, plaintext.into().as_bytes())
}

/// Decrypt `ciphertext` with `password`.
///
/// Accepts every version this build knows. Wrong password and modified data
/// both fail with [`ErrorKind::AuthenticationFailed`].
pub fn decrypt<'p, 'c>(
    password: impl Into<Input<'p>>,
    ciphertext: impl Into<Input<'c>>,
) -> Result<Vec<u8>> {
    let ciphertext = ciphertext.into().ciphertext_bytes()?;
    let parsed = Parsed::parse(ciphertext)?;
    let password = input::password_bytes(password.into())?;
    let keys = derive_keys(password, parsed.salt, parsed.version.params().iterations)?;
    parsed.open(&keys)
}

/// Draw a whitened random counter prefix.
pub(crate) fn fresh_prefix(random: &dyn RandomSource) -> Result<[u8; HALF_BLOCK]> {
    let bytes = random_bytes(random, HALF_BLOCK)?;
    let mut prefix = [0u8; HALF_BLOCK];
    prefix.copy_from_slice(&bytes);
    Ok(prefix)
}

/// Produce a latest-version ciphertext from already derived keys.
pub(crate) fn seal(
    salt: &[u8],
    keys: &DerivedKeys,
    prefix: &[u8; HALF_BLOCK],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let params = LATEST.params();
    if salt.len() != params.salt_len {
        return Err(CryptError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            format!(
                "salt length {} does not match version {}",
                salt.len(),
                LATEST.number()
            ),
        ));
    }

    let mut output = Vec::with_capacity(params.min_len() + plaintext.len());
    output.extend_from_slice(&header::encode(LATEST));
    output.extend_from_slice(salt);
    output.extend_from_slice(prefix);

    let body_start = output.len();
    output.extend_from_slice(plaintext);
    apply_keystream(keys.cipher_key(), prefix, &mut output[body_start..])?;

    let tag = compute_tag(keys.mac_key(), &output)?;
    output.extend_from_slice(&tag);

    Ok(output)
}

/// A ciphertext split into its fields. Nothing here has been authenticated.
#[derive(Debug)]
pub(crate) struct Parsed<'a> {
    pub version: Version,
    pub salt: &'a [u8],
    prefix: [u8; HALF_BLOCK],
    authenticated: &'a [u8],
    body: &'a [u8],
    tag: &'a [u8],
}

impl<'a> Parsed<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < header::min_len_any() {
            return Err(missing_data());
        }

        let version = header::parse_and_validate(data)?;
        let params = version.params();
        if data.len() < params.min_len() {
            return Err(missing_data());
        }

        let salt_end = HEADER_LEN + params.salt_len;
        let salt = &data[HEADER_LEN..salt_end];
        let (prefix_src, body_start) = match params.counter {
            CounterPrefix::FromSalt => (&salt[..HALF_BLOCK], salt_end),
            CounterPrefix::Field => (&data[salt_end..salt_end + HALF_BLOCK], salt_end + HALF_BLOCK),
        };
        let mut prefix = [0u8; HALF_BLOCK];
        prefix.copy_from_slice(prefix_src);

        let tag_start = data.len() - params.tag_len;
        trace!(version = version.number(), body_len = tag_start - body_start, "parsed ciphertext");

        Ok(Self {
            version,
            salt,
            prefix,
            authenticated: &data[..tag_start],
            body: &data[body_start..tag_start],
            tag: &data[tag_start..],
        })
    }

    /// Verify the tag, then decrypt the body.
    pub fn open(&self, keys: &DerivedKeys) -> Result<Vec<u8>> {
        let mut mac = new_mac(keys.mac_key())?;
        mac.update(self.authenticated);
        mac.verify_slice(self.tag)
            .map_err(|_| CryptError::authentication())?;

        let mut plaintext = self.body.to_vec();
        apply_keystream(keys.cipher_key(), &self.prefix, &mut plaintext)?;
        Ok(plaintext)
    }
}

fn missing_data() -> CryptError {
    CryptError::with_kind(
        ErrorCategory::User,
        ErrorKind::TruncatedInput,
        "missing data (input likely truncated)",
    )
}

fn new_mac(key: &[u8; KEY_LEN]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| {
        CryptError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "failed to key HMAC",
        )
    })
}

fn compute_tag(key: &[u8; KEY_LEN], data: &[u8]) -> Result<[u8; header::TAG_LEN]> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// XOR `buf` with the AES-256-CTR keystream for `prefix || counter`,
/// counter starting at 1.
fn apply_keystream(key: &[u8; KEY_LEN], prefix: &[u8; HALF_BLOCK], buf: &mut [u8]) -> Result<()> {
    let mut iv = [0u8; 2 * HALF_BLOCK];
    iv[..HALF_BLOCK].copy_from_slice(prefix);
    iv[HALF_BLOCK..].copy_from_slice(&1u64.to_be_bytes());

    let mut cipher = Aes256Ctr64BE::new(&(*key).into(), &iv.into());
    cipher.try_apply_keystream(buf).map_err(|_| {
        CryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::Configuration,
            "message too long for counter mode",
        )
    })
}
