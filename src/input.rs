//! Byte-or-text inputs at the API boundary
//!
//! Passwords and plaintexts may be given as bytes or as text; text is
//! normalized to its UTF-8 encoding before anything else sees it. Ciphertexts
//! are binary and must be given as bytes.

use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};

/// An input that is either raw bytes or text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    Bytes(&'a [u8]),
    Text(&'a str),
}

impl<'a> Input<'a> {
    /// The canonical byte representation.
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Input::Bytes(b) => b,
            Input::Text(s) => s.as_bytes(),
        }
    }

    /// The bytes of a ciphertext, rejecting text.
    pub fn ciphertext_bytes(&self) -> Result<&'a [u8]> {
        match *self {
            Input::Bytes(b) => Ok(b),
            Input::Text(_) => Err(CryptError::with_kind(
                ErrorCategory::User,
                ErrorKind::InputType,
                "ciphertext must be given as bytes, not text",
            )),
        }
    }
}

impl<'a> From<&'a [u8]> for Input<'a> {
    fn from(b: &'a [u8]) -> Self {
        Input::Bytes(b)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Input<'a> {
    fn from(b: &'a [u8; N]) -> Self {
        Input::Bytes(b)
    }
}

impl<'a> From<&'a Vec<u8>> for Input<'a> {
    fn from(b: &'a Vec<u8>) -> Self {
        Input::Bytes(b)
    }
}

impl<'a> From<&'a str> for Input<'a> {
    fn from(s: &'a str) -> Self {
        Input::Text(s)
    }
}

impl<'a> From<&'a String> for Input<'a> {
    fn from(s: &'a String) -> Self {
        Input::Text(s)
    }
}

/// The password bytes, rejecting an empty password.
pub(crate) fn password_bytes<'a>(password: Input<'a>) -> Result<&'a [u8]> {
    let bytes = password.as_bytes();
    if bytes.is_empty() {
        return Err(CryptError::missing_password());
    }
    Ok(bytes)
}
