//! Ordered pool of API credentials with a shared active index.
//!
//! The pool is built once when the host starts and never changes afterwards.
//! Only the active index moves, and only forward: a credential that ran out
//! of quota is not retried for the rest of the process lifetime.

use crate::error::InvokeError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// One API secret and its position in the pool.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    position: usize,
    secret: Arc<str>,
}

impl Credential {
    /// Position of this credential in the pool, starting at zero.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// The secret itself. Never log this.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("position", &self.position)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Credentials in failover order plus the index of the one in use.
///
/// Cloning is cheap and clones share the active index, so every request
/// handled by one host observes the same failover state.
#[derive(Clone)]
pub struct CredentialPool {
    credentials: Arc<[Credential]>,
    active: Arc<AtomicUsize>,
}

impl CredentialPool {
    /// Creates a pool from secrets in failover order.
    ///
    /// Blank secrets are skipped and duplicates are enrolled once.
    #[must_use]
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_shared_index(secrets, Arc::new(AtomicUsize::new(0)))
    }

    /// Creates a pool whose active index is owned by the caller.
    #[must_use]
    pub fn with_shared_index<I, S>(secrets: I, active: Arc<AtomicUsize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for secret in secrets {
            let secret = secret.into().trim().to_string();
            if !secret.is_empty() && !unique.contains(&secret) {
                unique.push(secret);
            }
        }

        let credentials: Arc<[Credential]> = unique
            .into_iter()
            .enumerate()
            .map(|(position, secret)| Credential {
                position,
                secret: secret.into(),
            })
            .collect();

        debug!(enrolled = credentials.len(), "credential pool built");

        Self {
            credentials,
            active,
        }
    }

    /// Creates a pool from a primary and an optional fallback secret.
    ///
    /// If the fallback equals the primary only one credential is enrolled.
    #[must_use]
    pub fn from_secrets(primary: Option<String>, fallback: Option<String>) -> Self {
        Self::new(primary.into_iter().chain(fallback))
    }

    /// Number of enrolled credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether no credential is enrolled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Index of the credential currently in use.
    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the credential currently in use.
    ///
    /// # Errors
    ///
    /// Returns `NoCredentialsConfigured` when the pool is empty.
    pub fn active_credential(&self) -> Result<Credential, InvokeError> {
        let last = self
            .credentials
            .len()
            .checked_sub(1)
            .ok_or(InvokeError::NoCredentialsConfigured)?;
        let index = self.active_index().min(last);
        Ok(self.credentials[index].clone())
    }

    /// Moves to the next credential, if there is one.
    pub fn advance(&self) -> bool {
        let len = self.credentials.len();
        let moved = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current + 1 < len).then_some(current + 1)
            });
        match moved {
            Ok(previous) => {
                warn!(from = previous, to = previous + 1, "switched API credential");
                true
            }
            Err(_) => false,
        }
    }

    /// Moves past the credential at `position`.
    ///
    /// When a concurrent request already moved the index beyond `position`,
    /// this succeeds without advancing again, so a credential nobody has
    /// exhausted is never skipped.
    pub fn advance_past(&self, position: usize) -> bool {
        let len = self.credentials.len();
        loop {
            let current = self.active.load(Ordering::Acquire);
            if current > position {
                return current < len;
            }
            if position + 1 >= len {
                return false;
            }
            if self
                .active
                .compare_exchange(current, position + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                warn!(from = position, to = position + 1, "switched API credential");
                return true;
            }
        }
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("enrolled", &self.credentials.len())
            .field("active", &self.active_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_fails_fatally() {
        let pool = CredentialPool::from_secrets(None, None);
        assert!(pool.is_empty());
        assert_eq!(
            pool.active_credential().unwrap_err(),
            InvokeError::NoCredentialsConfigured
        );
        assert!(!pool.advance());
    }

    #[test]
    fn fallback_equal_to_primary_is_enrolled_once() {
        let pool = CredentialPool::from_secrets(Some("key-a".into()), Some("key-a".into()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn blank_secrets_are_ignored() {
        let pool = CredentialPool::from_secrets(Some("  ".into()), Some("key-b".into()));
        assert_eq!(pool.len(), 1);
        let credential = pool.active_credential().expect("credential");
        assert_eq!(credential.secret(), "key-b");
        assert_eq!(credential.position(), 0);
    }

    #[test]
    fn advance_moves_forward_and_stops_at_the_end() {
        let pool = CredentialPool::from_secrets(Some("key-a".into()), Some("key-b".into()));
        assert_eq!(pool.active_credential().expect("a").secret(), "key-a");

        assert!(pool.advance());
        assert_eq!(pool.active_credential().expect("b").secret(), "key-b");

        assert!(!pool.advance());
        assert_eq!(pool.active_index(), 1);
    }

    #[test]
    fn advance_past_does_not_skip_on_stale_position() {
        let pool = CredentialPool::new(["a", "b", "c"]);

        // Two requests both saw credential 0 fail.
        assert!(pool.advance_past(0));
        assert!(pool.advance_past(0));

        assert_eq!(pool.active_index(), 1);
        assert!(pool.advance_past(1));
        assert_eq!(pool.active_index(), 2);
        assert!(!pool.advance_past(2));
    }

    #[test]
    fn racing_failovers_from_one_position_advance_once() {
        use std::sync::Barrier;
        use std::thread;

        for _ in 0..200 {
            let pool = CredentialPool::new(["a", "b", "c"]);
            let barrier = Barrier::new(2);

            let results: Vec<bool> = thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let pool = pool.clone();
                        let barrier = &barrier;
                        scope.spawn(move || {
                            barrier.wait();
                            pool.advance_past(0)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("thread"))
                    .collect()
            });

            assert_eq!(results, vec![true, true]);
            assert_eq!(pool.active_index(), 1);
        }
    }

    #[test]
    fn clones_share_the_active_index() {
        let pool = CredentialPool::new(["a", "b"]);
        let clone = pool.clone();
        assert!(clone.advance());
        assert_eq!(pool.active_index(), 1);
    }

    #[test]
    fn injected_index_isolates_pools() {
        let first = CredentialPool::with_shared_index(["a", "b"], Arc::new(AtomicUsize::new(0)));
        let second = CredentialPool::with_shared_index(["a", "b"], Arc::new(AtomicUsize::new(0)));
        assert!(first.advance());
        assert_eq!(second.active_index(), 0);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let pool = CredentialPool::new(["super-secret"]);
        let credential = pool.active_credential().expect("credential");
        assert!(!format!("{credential:?}").contains("super-secret"));
        assert!(!format!("{pool:?}").contains("super-secret"));
    }
}
