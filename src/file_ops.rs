//! Whole-file encryption, decryption and in-place update
//!
//! Encrypted files hold the raw binary ciphertext, nothing else.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use crate::crypt;
use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};
use crate::passphrase::{CachingPassphraseReader, PassphraseReader};

/// Encrypt the contents of `input_path` into `output_path`.
///
/// The output file is created with mode 0o600 on Unix.
pub fn encrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let plaintext = fs::read(input_path).map_err(|e| read_error(input_path, e))?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let ciphertext = crypt::encrypt(&*passphrase, &plaintext)
        .map_err(|e| e.with_context("encryption failed"))?;
    write_file_secure(output_path, &ciphertext)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    debug!(bytes = plaintext.len(), "encrypted file");
    Ok(())
}

/// Decrypt the contents of `input_path` into `output_path`.
///
/// Nothing is written unless the ciphertext authenticates.
pub fn decrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let ciphertext = fs::read(input_path).map_err(|e| read_error(input_path, e))?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let plaintext = zeroize::Zeroizing::new(
        crypt::decrypt(&*passphrase, &ciphertext)
            .map_err(|e| e.with_context("failed to decrypt"))?,
    );
    write_file_secure(output_path, &plaintext)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;

    debug!(bytes = plaintext.len(), "decrypted file");
    Ok(())
}

/// Replace the encrypted file at `crypt_path` with an encryption of
/// `plain_path`, under the same passphrase.
///
/// The existing file must authenticate with the supplied passphrase first,
/// so a mistyped passphrase cannot silently re-key the file. The new
/// ciphertext goes to a temporary file in the same directory which is synced
/// and then renamed over the target: readers see either the old file or the
/// new one, never a partial write.
///
/// The passphrase is read at most once from `passphrase_reader`.
pub fn update_file(
    plain_path: &Path,
    crypt_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let mut passphrase_reader = CachingPassphraseReader::new(passphrase_reader);
    verify_passphrase(crypt_path, &mut passphrase_reader)?;

    let crypt_dir = match crypt_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => {
            return Err(CryptError::with_kind(
                ErrorCategory::User,
                ErrorKind::Io,
                "crypt_path has no parent directory",
            ));
        }
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(crypt_dir)
        .map_err(|e| io_error("failed to create tempfile", e))?;

    let new_plaintext = fs::read(plain_path).map_err(|e| read_error(plain_path, e))?;
    let passphrase = passphrase_reader.read_passphrase()?;
    let new_ciphertext = crypt::encrypt(&*passphrase, &new_plaintext)
        .map_err(|e| e.with_context("failed to encrypt"))?;

    temp_file
        .write_all(&new_ciphertext)
        .map_err(|e| io_error("failed to write to tempfile", e))?;
    // The rename below must only ever expose a complete file.
    temp_file
        .flush()
        .map_err(|e| io_error("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_error("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| io_error("failed to set tempfile permissions", e))?;
    }

    temp_file.persist(crypt_path).map_err(|e| {
        CryptError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", crypt_path.display()),
            e,
        )
    })?;

    debug!(bytes = new_plaintext.len(), "updated file");
    Ok(())
}

/// Check that the passphrase from `passphrase_reader` opens `crypt_path`.
fn verify_passphrase(
    crypt_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let existing = fs::read(crypt_path).map_err(|e| read_error(crypt_path, e))?;
    let passphrase = passphrase_reader.read_passphrase()?;
    crypt::decrypt(&*passphrase, &existing)
        .map_err(|e| e.with_context("failed to decrypt"))?;
    Ok(())
}

/// Write `contents` to `path`, mode 0o600 on Unix.
fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    let file = {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
    };
    #[cfg(not(unix))]
    let file = fs::File::create(path);

    let mut file = file.map_err(|e| {
        CryptError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("failed to open {}", path.display()),
            e,
        )
    })?;
    file.write_all(contents)
        .map_err(|e| io_error(format!("failed to write {}", path.display()), e))
}

fn io_error(msg: impl Into<String>, err: io::Error) -> CryptError {
    CryptError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
}

fn read_error(path: &Path, err: io::Error) -> CryptError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    CryptError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
