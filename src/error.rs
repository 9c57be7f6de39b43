use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example, caused by bad input - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The caller provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The password was empty, or a parameter is out of range.
    Configuration,
    /// Ciphertext was supplied as text where bytes are required.
    InputType,
    /// Input data ended before the expected component could be read.
    TruncatedInput,
    /// The magic prefix does not match; the data was not produced by us.
    HeaderUnrecognized,
    /// The magic prefix matches but the version is newer than this build knows.
    HeaderFromFuture,
    /// Authentication failed due to an incorrect password or tampering
    /// or corruption. The two are not distinguished.
    AuthenticationFailed,
    /// The prefetch queue of a cipher storage was empty on pop.
    NoCipherReady,
    /// Key derivation or the secure random source failed.
    DerivationFailure,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Unexpected state reached within simplecrypt logic.
    InternalInvariant,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

impl ErrorKind {
    /// Whether this kind is one of the two header format failures.
    pub fn is_header_format(self) -> bool {
        matches!(self, Self::HeaderUnrecognized | Self::HeaderFromFuture)
    }
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct CryptError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl CryptError {
    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The empty-password rejection shared by every entry point.
    pub(crate) fn missing_password() -> Self {
        Self::with_kind(
            ErrorCategory::User,
            ErrorKind::Configuration,
            "missing password",
        )
    }

    /// The single authentication failure. Wrong password and modified data
    /// produce the same error.
    pub(crate) fn authentication() -> Self {
        Self::with_kind(
            ErrorCategory::User,
            ErrorKind::AuthenticationFailed,
            "bad password or corrupt / modified data",
        )
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CryptError>;
