//! Precomputed key material for one password
//!
//! Key derivation is slow. A [`CipherStorage`] moves that cost off the hot
//! path in two ways:
//! - a prefetch queue of fully derived (salt, keys) entries, filled ahead of
//!   demand by [`CipherStorage::create_cipher`] and consumed oldest first by
//!   encryption
//! - a memoization cache keyed by (version, salt), so decrypting data whose
//!   salt was seen before costs a lookup instead of a derivation
//!
//! The queue and the cache are locked separately. A cache miss holds only the
//! slot of its own salt while deriving, so a slow derivation never blocks a
//! queue pop or a lookup of an unrelated salt, and concurrent lookups of the
//! same salt wait for the first one instead of deriving twice.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypt::{self, Parsed};
use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};
use crate::header::{LATEST, SALT_LEN, Version};
use crate::input::{self, Input};
use crate::kdf::{DerivedKeys, KEY_LEN, derive_keys};
use crate::random::{OsRandom, RandomSource, random_bytes};

/// A salt together with the keys derived from it.
pub struct CipherEntry {
    version: Version,
    salt: Vec<u8>,
    keys: DerivedKeys,
    ready_at: Instant,
}

impl CipherEntry {
    /// The format version whose iteration count produced the keys.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn mac_key(&self) -> &[u8; KEY_LEN] {
        self.keys.mac_key()
    }

    pub fn cipher_key(&self) -> &[u8; KEY_LEN] {
        self.keys.cipher_key()
    }

    pub fn keys(&self) -> &DerivedKeys {
        &self.keys
    }

    /// When the derivation finished.
    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }
}

impl fmt::Debug for CipherEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEntry")
            .field("version", &self.version.number())
            .field("ready_at", &self.ready_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    version: Version,
    salt: Vec<u8>,
}

/// Cache cell for one key. `entry` is read without locking; `derive` is held
/// by the one caller deriving for this key.
#[derive(Default)]
struct Slot {
    entry: OnceLock<Arc<CipherEntry>>,
    derive: Mutex<()>,
}

/// Prefetch queue and salt cache bound to one password.
pub struct CipherStorage {
    password: Zeroizing<Vec<u8>>,
    random: Arc<dyn RandomSource>,
    queue: Mutex<VecDeque<Arc<CipherEntry>>>,
    /// Signalled after every pop, and when a prefetcher is asked to stop.
    demand: Condvar,
    cache: Mutex<HashMap<CacheKey, Arc<Slot>>>,
}

impl CipherStorage {
    /// Bind a new, empty storage to `password`. Nothing is derived yet.
    pub fn new<'p>(password: impl Into<Input<'p>>) -> Result<Self> {
        Self::with_random(password, Arc::new(OsRandom))
    }

    /// Like [`CipherStorage::new`], drawing salts from `random`.
    pub fn with_random<'p>(
        password: impl Into<Input<'p>>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        let password = input::password_bytes(password.into())?;
        Ok(Self {
            password: Zeroizing::new(password.to_vec()),
            random,
            queue: Mutex::new(VecDeque::new()),
            demand: Condvar::new(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Derive one entry for a fresh salt and make it ready.
    ///
    /// The entry is appended to the prefetch queue and inserted into the salt
    /// cache. Runs the full derivation on the calling thread without holding
    /// any lock while deriving.
    pub fn create_cipher(&self) -> Result<()> {
        let entry = self.derive_fresh()?;
        let ready = {
            let mut queue = self.queue.lock();
            queue.push_back(entry);
            queue.len()
        };
        debug!(ready, "prefetched cipher");
        Ok(())
    }

    /// Remove and return the oldest ready entry.
    ///
    /// Never blocks and never derives: an empty queue fails with
    /// [`ErrorKind::NoCipherReady`].
    pub fn get_top_cipher(&self) -> Result<Arc<CipherEntry>> {
        self.pop().ok_or_else(|| {
            CryptError::with_kind(
                ErrorCategory::User,
                ErrorKind::NoCipherReady,
                "no precomputed cipher ready",
            )
        })
    }

    /// Keys for `salt` at the latest version's iteration count.
    ///
    /// A cache hit is a lookup. A miss derives synchronously and remembers
    /// the result for the lifetime of the storage.
    pub fn get_cipher(&self, salt: &[u8]) -> Result<Arc<CipherEntry>> {
        self.get_cipher_for(LATEST, salt)
    }

    /// Keys for `salt` at `version`'s iteration count.
    pub fn get_cipher_for(&self, version: Version, salt: &[u8]) -> Result<Arc<CipherEntry>> {
        let key = CacheKey {
            version,
            salt: salt.to_vec(),
        };
        let slot = Arc::clone(self.cache.lock().entry(key.clone()).or_default());
        if let Some(entry) = slot.entry.get() {
            debug!(version = version.number(), "salt cache hit");
            return Ok(Arc::clone(entry));
        }

        // Holding `derive` makes same-salt callers wait for this derivation.
        let _deriving = slot.derive.lock();
        if let Some(entry) = slot.entry.get() {
            debug!(version = version.number(), "salt cache hit after wait");
            return Ok(Arc::clone(entry));
        }

        debug!(version = version.number(), "salt cache miss");
        match self.derive_entry(version, salt.to_vec()) {
            Ok(entry) => Ok(Arc::clone(slot.entry.get_or_init(|| Arc::new(entry)))),
            Err(e) => {
                self.forget_empty(&key, &slot);
                Err(e)
            }
        }
    }

    /// Encrypt `plaintext` with this storage's password.
    ///
    /// Uses the oldest ready entry when there is one, otherwise derives a
    /// fresh one synchronously.
    pub fn encrypt<'m>(&self, plaintext: impl Into<Input<'m>>) -> Result<Vec<u8>> {
        let entry = match self.pop() {
            Some(entry) => entry,
            None => {
                debug!("no prefetched cipher ready, deriving synchronously");
                self.derive_fresh()?
            }
        };
        let prefix = crypt::fresh_prefix(&*self.random)?;
        crypt::seal(entry.salt(), entry.keys(), &prefix, plaintext.into().as_bytes())
    }

    /// Decrypt `ciphertext` with this storage's password, resolving keys
    /// through the salt cache.
    pub fn decrypt<'c>(&self, ciphertext: impl Into<Input<'c>>) -> Result<Vec<u8>> {
        let ciphertext = ciphertext.into().ciphertext_bytes()?;
        let parsed = Parsed::parse(ciphertext)?;
        let entry = self.get_cipher_for(parsed.version, parsed.salt)?;
        parsed.open(entry.keys())
    }

    /// Entries waiting in the prefetch queue.
    pub fn ready_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Salts with fully derived keys in the cache. Derivations still in
    /// flight are not counted.
    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .values()
            .filter(|slot| slot.entry.get().is_some())
            .count()
    }

    /// Block until the queue holds fewer than `depth` entries or `stop` is
    /// set, waking at least every `idle`. Returns false when stopping.
    pub(crate) fn wait_for_demand(&self, depth: usize, stop: &AtomicBool, idle: Duration) -> bool {
        let mut queue = self.queue.lock();
        loop {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            if queue.len() < depth {
                return true;
            }
            self.demand.wait_for(&mut queue, idle);
        }
    }

    /// Wake every thread parked in [`CipherStorage::wait_for_demand`].
    pub(crate) fn wake_waiters(&self) {
        let _queue = self.queue.lock();
        self.demand.notify_all();
    }

    fn pop(&self) -> Option<Arc<CipherEntry>> {
        let entry = self.queue.lock().pop_front()?;
        self.demand.notify_all();
        debug!("popped prefetched cipher");
        Some(entry)
    }

    /// Fresh salt, derived and remembered in the cache but not queued.
    fn derive_fresh(&self) -> Result<Arc<CipherEntry>> {
        let salt = random_bytes(&*self.random, SALT_LEN)?;
        let entry = Arc::new(self.derive_entry(LATEST, salt)?);
        self.remember(&entry);
        Ok(entry)
    }

    fn derive_entry(&self, version: Version, salt: Vec<u8>) -> Result<CipherEntry> {
        let keys = derive_keys(&self.password, &salt, version.params().iterations)?;
        Ok(CipherEntry {
            version,
            salt,
            keys,
            ready_at: Instant::now(),
        })
    }

    fn remember(&self, entry: &Arc<CipherEntry>) {
        let key = CacheKey {
            version: entry.version,
            salt: entry.salt.clone(),
        };
        let slot = Arc::clone(self.cache.lock().entry(key).or_default());
        let _ = slot.entry.set(Arc::clone(entry));
    }

    /// Drop the slot for `key` after a failed derivation, unless another
    /// caller is already waiting on it and will retry.
    fn forget_empty(&self, key: &CacheKey, slot: &Arc<Slot>) {
        let mut cache = self.cache.lock();
        let unused = cache.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, slot)
                && current.entry.get().is_none()
                && Arc::strong_count(current) == 2
        });
        if unused {
            cache.remove(key);
        }
    }
}

impl fmt::Debug for CipherStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherStorage")
            .field("ready", &self.ready_len())
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}

/// Create a storage bound to `password`, shareable across threads.
pub fn create_cipher_storage<'p>(password: impl Into<Input<'p>>) -> Result<Arc<CipherStorage>> {
    CipherStorage::new(password).map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::{decrypt, encrypt};
    use crate::header::HEADER_LEN;

    #[test]
    fn test_top_cipher_fails_when_empty() {
        let cs = CipherStorage::new("h").unwrap();
        let err = cs.get_top_cipher().expect_err("expected empty queue");
        assert_eq!(err.kind, Some(ErrorKind::NoCipherReady));
    }

    #[test]
    fn test_cipher_creation() {
        let cs = CipherStorage::new("pw").unwrap();
        assert!(cs.get_top_cipher().is_err());

        cs.create_cipher().unwrap();
        assert_eq!(cs.ready_len(), 1);

        let entry = cs.get_top_cipher().unwrap();
        assert_eq!(entry.salt().len(), SALT_LEN);
        assert_eq!(entry.version(), LATEST);
        assert_ne!(entry.mac_key(), &[0u8; KEY_LEN]);
        assert_ne!(entry.cipher_key(), &[0u8; KEY_LEN]);

        // Consumed at most once.
        assert_eq!(cs.ready_len(), 0);
        assert!(cs.get_top_cipher().is_err());
    }

    #[test]
    fn test_queue_is_fifo() {
        let cs = CipherStorage::new("pw").unwrap();
        cs.create_cipher().unwrap();
        cs.create_cipher().unwrap();

        let first = cs.get_top_cipher().unwrap();
        let second = cs.get_top_cipher().unwrap();
        assert!(first.ready_at() <= second.ready_at());
        assert_ne!(first.salt(), second.salt());
    }

    #[test]
    fn test_created_entries_are_cached() {
        let cs = CipherStorage::new("pw").unwrap();
        cs.create_cipher().unwrap();
        assert_eq!(cs.cached_len(), 1);

        let popped = cs.get_top_cipher().unwrap();
        let looked_up = cs.get_cipher(popped.salt()).unwrap();
        assert!(Arc::ptr_eq(&popped, &looked_up));
    }

    #[test]
    fn test_get_cipher_matches_direct_derivation() {
        let cs = CipherStorage::new("pw").unwrap();
        let salt = [3u8; SALT_LEN];
        let entry = cs.get_cipher(&salt).unwrap();
        let direct = derive_keys(b"pw", &salt, LATEST.params().iterations).unwrap();
        assert_eq!(entry.keys(), &direct);
    }

    #[test]
    fn test_get_cipher_memoizes() {
        let cs = CipherStorage::new("pw").unwrap();
        let salt = random_bytes(&OsRandom, SALT_LEN).unwrap();

        let started = Instant::now();
        let first = cs.get_cipher(&salt).unwrap();
        let miss = started.elapsed();

        let started = Instant::now();
        let second = cs.get_cipher(&salt).unwrap();
        let hit = started.elapsed();

        assert_eq!(first.keys(), second.keys());
        assert!(miss > hit * 100, "second access too slow: {miss:?} vs {hit:?}");
    }

    #[test]
    fn test_cache_separates_versions() {
        let cs = CipherStorage::new("pw").unwrap();
        let salt = [5u8; SALT_LEN];
        let legacy = cs.get_cipher_for(Version::new(1).unwrap(), &salt).unwrap();
        let latest = cs.get_cipher(&salt).unwrap();
        assert_ne!(legacy.keys(), latest.keys());
        assert_eq!(cs.cached_len(), 2);
    }

    #[test]
    fn test_pre_computed_encrypt() {
        let cs = create_cipher_storage("password").unwrap();
        cs.create_cipher().unwrap();

        let ciphertext = cs.encrypt("data").unwrap();
        assert_eq!(cs.ready_len(), 0);
        assert_eq!(decrypt("password", &ciphertext).unwrap(), b"data");
    }

    #[test]
    fn test_pre_computed_encrypt_falls_back_when_empty() {
        let cs = create_cipher_storage("password").unwrap();
        let ciphertext = cs.encrypt("data").unwrap();
        assert_eq!(decrypt("password", &ciphertext).unwrap(), b"data");

        // The fallback derivation is remembered for later decryption.
        assert_eq!(cs.cached_len(), 1);
        assert_eq!(cs.decrypt(&ciphertext).unwrap(), b"data");
        assert_eq!(cs.cached_len(), 1);
    }

    #[test]
    fn test_pre_computed_decrypt() {
        let cs = create_cipher_storage("password").unwrap();
        let ciphertext = encrypt("password", "data").unwrap();
        assert_eq!(cs.decrypt(&ciphertext).unwrap(), b"data");
        assert_eq!(cs.decrypt(&ciphertext).unwrap(), b"data");
        assert_eq!(cs.cached_len(), 1);
    }

    #[test]
    fn test_pre_computed_encryptions_are_distinct() {
        let cs = CipherStorage::new("password").unwrap();
        cs.create_cipher().unwrap();
        cs.create_cipher().unwrap();
        let ct1 = cs.encrypt("data").unwrap();
        let ct2 = cs.encrypt("data").unwrap();
        assert_ne!(ct1[HEADER_LEN..HEADER_LEN + SALT_LEN], ct2[HEADER_LEN..HEADER_LEN + SALT_LEN]);
    }

    #[test]
    fn test_pre_computed_decrypt_wrong_password() {
        let cs = CipherStorage::new("badpassword").unwrap();
        let ciphertext = encrypt("password", "message").unwrap();
        let err = cs.decrypt(&ciphertext).expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_pre_computed_decrypt_rejects_text() {
        let cs = CipherStorage::new("password").unwrap();
        let err = cs.decrypt("not bytes").expect_err("expected type error");
        assert_eq!(err.kind, Some(ErrorKind::InputType));
    }

    #[test]
    fn test_every_bit_is_tamper_checked() {
        let cs = CipherStorage::new("password").unwrap();
        let ciphertext = cs.encrypt("message").unwrap();

        for i in 0..ciphertext.len() {
            for bit in 0..8 {
                let mut modified = ciphertext.clone();
                modified[i] ^= 1 << bit;
                let err = cs.decrypt(&modified).expect_err("expected failure");
                let kind = err.kind.expect("expected a kind");
                if i < HEADER_LEN {
                    assert!(
                        kind.is_header_format() || kind == ErrorKind::AuthenticationFailed,
                        "byte {i} bit {bit}: {kind:?}"
                    );
                } else {
                    assert_eq!(kind, ErrorKind::AuthenticationFailed, "byte {i} bit {bit}");
                }
            }
        }
    }

    #[test]
    fn test_empty_password_rejected() {
        let err = CipherStorage::new("").expect_err("expected rejection");
        assert_eq!(err.kind, Some(ErrorKind::Configuration));
    }

    struct BrokenRandom;

    impl RandomSource for BrokenRandom {
        fn fill(&self, _buf: &mut [u8]) -> Result<()> {
            Err(CryptError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::DerivationFailure,
                "simulated entropy failure",
            ))
        }
    }

    #[test]
    fn test_derivation_failure_propagates_and_is_not_cached() {
        let cs = CipherStorage::with_random("pw", Arc::new(BrokenRandom)).unwrap();

        let err = cs.create_cipher().expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::DerivationFailure));
        assert_eq!(cs.ready_len(), 0);
        assert_eq!(cs.cached_len(), 0);

        let err = cs.encrypt("data").expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::DerivationFailure));
    }

    #[test]
    fn test_get_cipher_failure_is_not_cached() {
        let cs = CipherStorage::new("pw").unwrap();

        for _ in 0..2 {
            let err = cs.get_cipher(&[]).expect_err("expected failure");
            assert_eq!(err.kind, Some(ErrorKind::Configuration));
            assert!(err.to_string().contains("salt"));
            assert_eq!(cs.cached_len(), 0);
        }
        assert!(cs.cache.lock().is_empty());

        let entry = cs.get_cipher(&[4u8; SALT_LEN]).unwrap();
        assert_eq!(entry.salt(), &[4u8; SALT_LEN]);
        assert_eq!(cs.cached_len(), 1);
    }

    #[test]
    fn test_debug_redacts_password() {
        let cs = CipherStorage::new("hunter2").unwrap();
        let rendered = format!("{cs:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("ready"));
    }
}
