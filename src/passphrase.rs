//! Where the command-line tool gets its password from

use std::io::{self, IsTerminal, Read, Write};

use zeroize::Zeroizing;

use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};

const DEFAULT_PROMPT: &str = "Passphrase (simplecrypt): ";

/// Source of a passphrase, as arbitrary bytes.
pub trait PassphraseReader {
    /// The passphrase, wiped from memory when dropped.
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>>;
}

impl<P: PassphraseReader + ?Sized> PassphraseReader for &mut P {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        (**self).read_passphrase()
    }
}

/// Always returns the same passphrase.
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<Vec<u8>>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: impl Into<Vec<u8>>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(self.passphrase.clone())
    }
}

/// Reads everything from `R` and uses it verbatim, newline included.
pub struct ReaderPassphraseReader<R> {
    reader: R,
}

impl<R: Read> ReaderPassphraseReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> PassphraseReader for ReaderPassphraseReader<R> {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            CryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "error reading passphrase",
                e,
            )
        })?;
        Ok(data)
    }
}

/// Prompts on stderr and reads from the terminal without echo.
///
/// Terminal input is UTF-8 only; use a [`ReaderPassphraseReader`] over
/// stdin for anything else.
pub struct TerminalPassphraseReader {
    prompt: String,
}

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self::with_prompt(DEFAULT_PROMPT)
    }

    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for TerminalPassphraseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        if !io::stdin().is_terminal() {
            return Err(CryptError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal - stdin is not a terminal",
            ));
        }

        let mut stderr = io::stderr();
        stderr
            .write_all(self.prompt.as_bytes())
            .and_then(|()| stderr.flush())
            .map_err(|e| {
                CryptError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to write prompt",
                    e,
                )
            })?;

        let passphrase = rpassword::read_password().map_err(|e| {
            CryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                "failure reading passphrase",
                e,
            )
        })?;

        Ok(Zeroizing::new(passphrase.into_bytes()))
    }
}

/// Asks `upstream` at most once and replays the answer afterwards.
///
/// Failures are not remembered; the next call asks again.
pub struct CachingPassphraseReader<P> {
    upstream: P,
    cached: Option<Zeroizing<Vec<u8>>>,
}

impl<P: PassphraseReader> CachingPassphraseReader<P> {
    pub fn new(upstream: P) -> Self {
        Self {
            upstream,
            cached: None,
        }
    }
}

impl<P: PassphraseReader> PassphraseReader for CachingPassphraseReader<P> {
    fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let passphrase = match self.cached.take() {
            Some(passphrase) => passphrase,
            None => self.upstream.read_passphrase()?,
        };
        let copy = passphrase.clone();
        self.cached = Some(passphrase);
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_constant_reader() {
        let mut reader = ConstantPassphraseReader::new(b"test123".to_vec());
        assert_eq!(&*reader.read_passphrase().unwrap(), b"test123");
        assert_eq!(&*reader.read_passphrase().unwrap(), b"test123");
    }

    /// Needs a human at a terminal:
    ///
    /// cargo test test_terminal_reader_interactive -- --ignored --nocapture
    #[test]
    #[ignore]
    fn test_terminal_reader_interactive() {
        let mut reader = TerminalPassphraseReader::new();
        let passphrase = reader.read_passphrase().unwrap();
        assert!(!passphrase.is_empty());
    }

    #[test]
    fn test_reader_keeps_bytes_verbatim() {
        let mut reader = ReaderPassphraseReader::new(&b"mypassword\n"[..]);
        assert_eq!(&*reader.read_passphrase().unwrap(), b"mypassword\n");

        let mut reader = ReaderPassphraseReader::new(&b""[..]);
        assert!(reader.read_passphrase().unwrap().is_empty());
    }

    #[test]
    fn test_reader_accepts_non_utf8() {
        let data: &[u8] = &[0xff, 0xfe, 0x00, 0x01];
        let mut reader = ReaderPassphraseReader::new(data);
        assert_eq!(&*reader.read_passphrase().unwrap(), data);
    }

    struct CountingReader {
        result: Option<Vec<u8>>,
        calls: Rc<Cell<usize>>,
    }

    impl PassphraseReader for CountingReader {
        fn read_passphrase(&mut self) -> Result<Zeroizing<Vec<u8>>> {
            self.calls.set(self.calls.get() + 1);
            match &self.result {
                Some(p) => Ok(Zeroizing::new(p.clone())),
                None => Err(CryptError::with_kind(
                    ErrorCategory::Internal,
                    ErrorKind::PassphraseUnavailable,
                    "simulated error",
                )),
            }
        }
    }

    #[test]
    fn test_caching_reader_asks_once() {
        let calls = Rc::new(Cell::new(0));
        let mut caching = CachingPassphraseReader::new(CountingReader {
            result: Some(b"cached_pass".to_vec()),
            calls: Rc::clone(&calls),
        });

        for _ in 0..3 {
            assert_eq!(&*caching.read_passphrase().unwrap(), b"cached_pass");
            assert_eq!(calls.get(), 1);
        }
    }

    #[test]
    fn test_caching_reader_does_not_cache_errors() {
        let calls = Rc::new(Cell::new(0));
        let mut caching = CachingPassphraseReader::new(CountingReader {
            result: None,
            calls: Rc::clone(&calls),
        });

        let err = caching.read_passphrase().expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::PassphraseUnavailable));
        assert!(caching.read_passphrase().is_err());
        assert_eq!(calls.get(), 2);
    }
}
