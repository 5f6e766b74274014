//! Retry and failover around calls to the completion service.
//!
//! The invoker runs one unit of work against the active credential and
//! reacts to the three failure classes of [`LlmError::class`]:
//!
//! - quota exhausted: move to the next credential and retry at once with a
//!   fresh attempt budget
//! - service unavailable: sleep, grow the delay, retry the same credential
//! - anything else: give up immediately
//!
//! Retries and failovers within one run are strictly sequential.

use crate::credential::{Credential, CredentialPool};
use crate::error::{FailureClass, InvokeError, LlmError};
use persona_studio_core::InvocationId;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Longest single backoff sleep; growth saturates here.
pub const MAX_DELAY: Duration = Duration::from_secs(600);

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per credential, counting the first one.
    pub max_attempts: u32,
    /// Sleep before the first transient retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each transient retry.
    pub backoff_factor: f64,
    /// Whether a credential failover restarts the delay at `initial_delay`.
    ///
    /// Off by default: the grown delay carries over to the next credential.
    pub reset_delay_on_failover: bool,
}

impl RetryPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` unless `max_attempts >= 1` and
    /// `backoff_factor > 1`.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
    ) -> Result<Self, LlmError> {
        let policy = Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            reset_delay_on_failover: false,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Restarts the delay on every credential failover.
    #[must_use]
    pub fn with_delay_reset_on_failover(mut self, reset: bool) -> Self {
        self.reset_delay_on_failover = reset;
        self
    }

    /// Checks the policy invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violated invariant.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.max_attempts == 0 {
            return Err(LlmError::InvalidConfig {
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(LlmError::InvalidConfig {
                reason: format!(
                    "backoff_factor must be greater than 1, got {}",
                    self.backoff_factor
                ),
            });
        }
        Ok(())
    }

    /// The delay after `delay`, capped at [`MAX_DELAY`].
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_factor)
            .map_or(MAX_DELAY, |next| next.min(MAX_DELAY))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            reset_delay_on_failover: false,
        }
    }
}

/// Runs work against a [`CredentialPool`] under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Invoker {
    pool: CredentialPool,
    policy: RetryPolicy,
}

impl Invoker {
    /// Creates an invoker.
    #[must_use]
    pub fn new(pool: CredentialPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    /// Creates an invoker with the default policy (3 attempts, 1s, x2).
    #[must_use]
    pub fn with_defaults(pool: CredentialPool) -> Self {
        Self::new(pool, RetryPolicy::default())
    }

    /// The pool this invoker draws credentials from.
    #[must_use]
    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// The retry policy in effect.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds or a terminal failure is reached.
    ///
    /// `operation` is called with the credential to use for that attempt.
    ///
    /// # Errors
    ///
    /// - `NoCredentialsConfigured` before any call if the pool is empty
    /// - `CredentialsExhausted` when the last credential runs out of quota
    /// - `RetriesExhausted` when the service stays unavailable for the whole
    ///   attempt budget of one credential
    /// - `Backend` with the unmodified error for anything else
    #[instrument(skip_all, fields(invocation = %InvocationId::new()))]
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, InvokeError>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempts_remaining = self.policy.max_attempts;
        let mut delay = self.policy.initial_delay;

        loop {
            let credential = self.pool.active_credential()?;
            let position = credential.position();
            debug!(credential = position, attempts_remaining, "calling LLM service");

            let error = match operation(credential).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match error.class() {
                FailureClass::QuotaExceeded => {
                    if !self.pool.advance_past(position) {
                        warn!(credential = position, %error, "quota exhausted on last credential");
                        return Err(InvokeError::CredentialsExhausted {
                            enrolled: self.pool.len(),
                            last: error,
                        });
                    }
                    warn!(credential = position, %error, "quota exhausted, failing over");
                    attempts_remaining = self.policy.max_attempts;
                    if self.policy.reset_delay_on_failover {
                        delay = self.policy.initial_delay;
                    }
                }
                FailureClass::ServiceUnavailable => {
                    if attempts_remaining <= 1 {
                        warn!(credential = position, %error, "giving up on unavailable service");
                        return Err(InvokeError::RetriesExhausted {
                            attempts: self.policy.max_attempts,
                            last: error,
                        });
                    }
                    warn!(
                        credential = position,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "service unavailable, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = self.policy.next_delay(delay);
                    attempts_remaining -= 1;
                }
                FailureClass::Fatal => return Err(InvokeError::Backend(error)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn quota() -> LlmError {
        LlmError::QuotaExceeded {
            retry_after_secs: None,
            reason: "quota".to_string(),
        }
    }

    fn unavailable() -> LlmError {
        LlmError::ServiceUnavailable {
            reason: "overloaded".to_string(),
        }
    }

    /// Scripted backend: pops one outcome per call and records who called.
    struct Script {
        outcomes: Arc<Mutex<VecDeque<Result<&'static str, LlmError>>>>,
        calls: Arc<Mutex<Vec<(usize, Instant)>>>,
    }

    impl Script {
        fn new(outcomes: Vec<Result<&'static str, LlmError>>) -> Self {
            Self {
                outcomes: Arc::new(Mutex::new(outcomes.into())),
                calls: Arc::default(),
            }
        }

        fn operation(
            &self,
        ) -> impl FnMut(Credential) -> std::future::Ready<Result<&'static str, LlmError>> + '_
        {
            move |credential| {
                self.calls
                    .lock()
                    .expect("calls lock")
                    .push((credential.position(), Instant::now()));
                let outcome = self
                    .outcomes
                    .lock()
                    .expect("outcomes lock")
                    .pop_front()
                    .unwrap_or(Ok("unscripted"));
                std::future::ready(outcome)
            }
        }

        fn positions(&self) -> Vec<usize> {
            self.calls.lock().expect("calls lock").iter().map(|c| c.0).collect()
        }

        fn gaps(&self) -> Vec<Duration> {
            let calls = self.calls.lock().expect("calls lock");
            calls.windows(2).map(|w| w[1].1 - w[0].1).collect()
        }
    }

    fn assert_gaps(actual: &[Duration], expected_ms: &[u64]) {
        assert_eq!(actual.len(), expected_ms.len(), "gaps: {actual:?}");
        for (gap, ms) in actual.iter().zip(expected_ms) {
            let expected = Duration::from_millis(*ms);
            assert!(
                *gap >= expected && *gap < expected + Duration::from_millis(5),
                "gap {gap:?}, expected {expected:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let invoker = Invoker::with_defaults(CredentialPool::new(["a"]));
        let script = Script::new(vec![Ok("done")]);

        assert_eq!(invoker.run(script.operation()).await, Ok("done"));
        assert_eq!(script.positions(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_exponentially_then_succeed() {
        let invoker = Invoker::with_defaults(CredentialPool::new(["a"]));
        let script = Script::new(vec![Err(unavailable()), Err(unavailable()), Ok("done")]);

        assert_eq!(invoker.run(script.operation()).await, Ok("done"));
        assert_gaps(&script.gaps(), &[1000, 2000]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_the_budget_without_a_fourth_attempt() {
        let pool = CredentialPool::new(["a", "b"]);
        let invoker = Invoker::with_defaults(pool.clone());
        let script = Script::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok("never reached"),
        ]);

        let err = invoker.run(script.operation()).await.unwrap_err();

        assert_eq!(
            err,
            InvokeError::RetriesExhausted {
                attempts: 3,
                last: unavailable(),
            }
        );
        assert_eq!(script.positions(), vec![0, 0, 0]);
        assert_gaps(&script.gaps(), &[1000, 2000]);
        assert_eq!(pool.active_index(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_makes_no_calls() {
        let invoker = Invoker::with_defaults(CredentialPool::from_secrets(None, None));
        let script = Script::new(vec![Ok("never reached")]);

        let err = invoker.run(script.operation()).await.unwrap_err();

        assert_eq!(err, InvokeError::NoCredentialsConfigured);
        assert!(script.positions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn quota_failover_sticks_for_later_calls() {
        let pool = CredentialPool::new(["a", "b"]);
        let invoker = Invoker::with_defaults(pool.clone());
        let script = Script::new(vec![Err(quota()), Ok("first"), Ok("second")]);

        assert_eq!(invoker.run(script.operation()).await, Ok("first"));
        assert_eq!(invoker.run(script.operation()).await, Ok("second"));

        assert_eq!(script.positions(), vec![0, 1, 1]);
        assert_eq!(pool.active_index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_is_immediate() {
        let invoker = Invoker::with_defaults(CredentialPool::new(["a", "b"]));
        let script = Script::new(vec![Err(quota()), Ok("done")]);

        invoker.run(script.operation()).await.expect("run");
        assert_gaps(&script.gaps(), &[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_refreshes_the_attempt_budget_but_keeps_the_delay() {
        let invoker = Invoker::with_defaults(CredentialPool::new(["a", "b"]));
        // Two transient retries on A use up most of A's budget; after the
        // failover B still gets three attempts, and its first backoff
        // continues from 4s.
        let script = Script::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(quota()),
            Err(unavailable()),
            Err(unavailable()),
            Ok("done"),
        ]);

        assert_eq!(invoker.run(script.operation()).await, Ok("done"));
        assert_eq!(script.positions(), vec![0, 0, 0, 1, 1, 1]);
        assert_gaps(&script.gaps(), &[1000, 2000, 0, 4000, 8000]);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_reset_policy_restarts_backoff_after_failover() {
        let policy = RetryPolicy::default().with_delay_reset_on_failover(true);
        let invoker = Invoker::new(CredentialPool::new(["a", "b"]), policy);
        let script = Script::new(vec![
            Err(unavailable()),
            Err(quota()),
            Err(unavailable()),
            Ok("done"),
        ]);

        assert_eq!(invoker.run(script.operation()).await, Ok("done"));
        assert_gaps(&script.gaps(), &[1000, 0, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_on_last_credential_is_terminal() {
        let pool = CredentialPool::new(["a", "b"]);
        let invoker = Invoker::with_defaults(pool.clone());
        let script = Script::new(vec![Err(quota()), Err(quota()), Ok("never reached")]);

        let err = invoker.run(script.operation()).await.unwrap_err();

        assert_eq!(
            err,
            InvokeError::CredentialsExhausted {
                enrolled: 2,
                last: quota(),
            }
        );
        assert_eq!(script.positions(), vec![0, 1]);
        assert_eq!(pool.active_index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_propagate_untouched() {
        let pool = CredentialPool::new(["a", "b"]);
        let invoker = Invoker::with_defaults(pool.clone());
        let rejected = LlmError::RequestFailed {
            status: Some(400),
            reason: "invalid schema".to_string(),
        };
        let script = Script::new(vec![Err(rejected.clone()), Ok("never reached")]);

        let err = invoker.run(script.operation()).await.unwrap_err();

        assert_eq!(err, InvokeError::Backend(rejected));
        assert_eq!(script.positions(), vec![0]);
        assert_eq!(pool.active_index(), 0);
    }

    #[test]
    fn next_delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 1e300).expect("policy");
        assert_eq!(policy.next_delay(Duration::from_secs(1)), MAX_DELAY);
        assert_eq!(policy.next_delay(Duration::MAX), MAX_DELAY);

        let doubling = RetryPolicy::default();
        assert_eq!(
            doubling.next_delay(Duration::from_millis(1500)),
            Duration::from_millis(3000)
        );
        assert_eq!(doubling.next_delay(MAX_DELAY), MAX_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_backoff_factor_retries_at_the_ceiling() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000), 1e300).expect("policy");
        let invoker = Invoker::new(CredentialPool::new(["a"]), policy);
        let script = Script::new(vec![Err(unavailable()), Err(unavailable()), Ok("done")]);

        assert_eq!(invoker.run(script.operation()).await, Ok("done"));
        let ceiling = u64::try_from(MAX_DELAY.as_millis()).expect("millis");
        assert_gaps(&script.gaps(), &[1000, ceiling]);
    }

    #[test]
    fn policy_validation() {
        assert!(RetryPolicy::new(3, Duration::from_secs(1), 2.0).is_ok());
        assert!(RetryPolicy::new(0, Duration::from_secs(1), 2.0).is_err());
        assert!(RetryPolicy::new(3, Duration::from_secs(1), 1.0).is_err());
        assert!(RetryPolicy::new(3, Duration::from_secs(1), f64::NAN).is_err());
    }
}
