//! simplecrypt - password-based authenticated encryption
//!
//! PBKDF2-HMAC-SHA256 key derivation, AES-256-CTR encryption and an
//! HMAC-SHA256 tag over the whole message. [`CipherStorage`] takes key
//! derivation off the hot path for callers that encrypt or decrypt many
//! messages under one password.

#![forbid(unsafe_code)]

pub mod crypt;
pub mod error;
pub mod file_ops;
pub mod header;
pub mod input;
pub mod kdf;
pub mod passphrase;
pub mod prefetch;
pub mod random;
pub mod storage;

pub use crypt::{decrypt, encrypt, encrypt_deterministic};
pub use error::{CryptError, ErrorCategory, ErrorKind, Result};
pub use input::Input;
pub use prefetch::{PrefetchConfig, Prefetcher};
pub use storage::{CipherEntry, CipherStorage, create_cipher_storage};
