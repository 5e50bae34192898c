//! Retry policy and backoff utilities for HTTP requests.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tokio::time;
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	#[default]
	None,
	/// Randomise each delay within the upper fifth of the computed backoff.
	///
	/// Successive delays still grow since the lower bound doubles with the base.
	Bounded,
}

/// Retry configuration for HTTP fetch operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retry attempts to perform after the initial request.
	pub max_retries: u32,
	/// Timeout applied to each individual HTTP attempt.
	pub attempt_timeout: Duration,
	/// Base delay; retry `n` waits `initial_backoff * 2^n`.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Overall deadline that bounds the entire retry sequence.
	pub deadline: Duration,
	/// Strategy used to randomise the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Default retry count for datafile downloads.
	pub const DEFAULT_MAX_RETRIES: u32 = 3;
	/// Default base backoff for datafile downloads.
	pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);

	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "retry_policy.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::Validation {
				field: "retry_policy.deadline",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}

		Ok(())
	}

	/// Compute backoff for a retry attempt using the selected jitter strategy.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32);
		let base = self.initial_backoff.mul_f64(2f64.powi(exponent as i32));
		let bounded = base.min(self.max_backoff).max(self.initial_backoff);

		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Bounded =>
				random_within(bounded.mul_f64(0.8).max(self.initial_backoff), bounded),
		}
	}

	/// Worst-case time spent sleeping between attempts.
	pub fn total_backoff(&self) -> Duration {
		(0..self.max_retries).map(|attempt| self.compute_backoff(attempt)).sum()
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: Self::DEFAULT_MAX_RETRIES,
			attempt_timeout: Duration::from_secs(10),
			initial_backoff: Self::DEFAULT_INITIAL_BACKOFF,
			max_backoff: Duration::from_secs(16),
			deadline: Duration::from_secs(90),
			jitter: JitterStrategy::None,
		}
	}
}

/// Result of budgeting a retry attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptBudget {
	/// Additional attempt is permitted with the provided per-attempt timeout.
	Granted {
		/// Timeout window allocated for the upcoming attempt.
		timeout: Duration,
	},
	/// Retry window exhausted; no further attempts allowed.
	Exhausted,
}

/// Controls retry backoff progression and attempt budgeting.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	deadline: Instant,
	retries_used: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Create a new executor respecting the supplied retry policy.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		let deadline = Instant::now() + policy.deadline;

		Self { policy, deadline, retries_used: 0 }
	}

	/// Budget the next attempt, returning either the permitted timeout or exhaustion.
	pub fn attempt_budget(&self) -> AttemptBudget {
		let timeout = self.remaining_budget().min(self.policy.attempt_timeout);

		if timeout.is_zero() { AttemptBudget::Exhausted } else { AttemptBudget::Granted { timeout } }
	}

	/// Whether another retry is permitted under the policy.
	pub fn can_retry(&self) -> bool {
		self.retries_used < self.policy.max_retries
	}

	/// Remaining wall-clock budget for the overall retry window.
	pub fn remaining_budget(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}

	/// Number of retries that have already been consumed.
	pub fn attempts_used(&self) -> u32 {
		self.retries_used
	}

	/// Advance retry state and compute the backoff delay for the next attempt.
	pub fn next_backoff(&mut self) -> Option<Duration> {
		if !self.can_retry() {
			tracing::debug!(attempt = self.retries_used, "retry budget exhausted");

			return None;
		}

		let attempt = self.retries_used;

		self.retries_used = self.retries_used.saturating_add(1);

		let delay = self.policy.compute_backoff(attempt).min(self.remaining_budget());

		tracing::debug!(attempt = attempt + 1, ?delay, "retry backoff computed");

		Some(delay)
	}

	/// Run `work` until it succeeds or the policy is exhausted.
	///
	/// Each attempt receives the timeout granted for it. Retryable errors are logged and retried,
	/// any other error ends the run at once; `None` means no attempt succeeded.
	pub async fn run<T, F, Fut>(mut self, mut work: F) -> Option<T>
	where
		F: FnMut(Duration) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		while let AttemptBudget::Granted { timeout } = self.attempt_budget() {
			match work(timeout).await {
				Ok(value) => return Some(value),
				Err(err) if !err.is_retryable() => {
					tracing::warn!(attempt = self.retries_used, error = %err, "attempt rejected");

					break;
				},
				Err(err) => {
					tracing::warn!(attempt = self.retries_used, error = %err, "attempt failed");

					match self.next_backoff() {
						Some(delay) =>
							if !delay.is_zero() {
								time::sleep(delay).await;
							},
						None => break,
					}
				},
			}
		}

		None
	}
}

pub(crate) fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;

	fn fast_policy() -> RetryPolicy {
		RetryPolicy {
			max_retries: 3,
			attempt_timeout: Duration::from_millis(200),
			initial_backoff: Duration::from_millis(5),
			max_backoff: Duration::from_millis(40),
			deadline: Duration::from_secs(5),
			jitter: JitterStrategy::None,
		}
	}

	#[test]
	fn backoff_doubles_until_capped() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.compute_backoff(0), Duration::from_secs(2));
		assert_eq!(policy.compute_backoff(1), Duration::from_secs(4));
		assert_eq!(policy.compute_backoff(2), Duration::from_secs(8));
		assert_eq!(policy.compute_backoff(3), Duration::from_secs(16));
		assert_eq!(policy.compute_backoff(9), Duration::from_secs(16));
		assert_eq!(policy.total_backoff(), Duration::from_secs(14));
	}

	#[test]
	fn bounded_jitter_stays_monotonic() {
		let policy = RetryPolicy { jitter: JitterStrategy::Bounded, ..RetryPolicy::default() };

		for _ in 0..32 {
			let first = policy.compute_backoff(0);
			let second = policy.compute_backoff(1);
			let third = policy.compute_backoff(2);

			assert!(first < second && second < third, "{first:?} {second:?} {third:?}");
		}
	}

	#[test]
	fn rejects_zero_backoff() {
		let policy = RetryPolicy { initial_backoff: Duration::ZERO, ..RetryPolicy::default() };

		assert!(matches!(
			policy.validate(),
			Err(Error::Validation { field: "retry_policy.initial_backoff", .. })
		));
	}

	#[tokio::test]
	async fn run_retries_until_success() {
		let policy = fast_policy();
		let counter = AtomicU32::new(0);
		let calls = &counter;
		let value = RetryExecutor::new(&policy)
			.run(move |_| async move {
				if calls.fetch_add(1, Ordering::SeqCst) < 2 {
					Err(Error::Io(std::io::Error::other("flaky")))
				} else {
					Ok("done")
				}
			})
			.await;

		assert_eq!(value, Some("done"));
		assert_eq!(counter.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn run_gives_up_after_max_retries() {
		let policy = fast_policy();
		let counter = AtomicU32::new(0);
		let calls = &counter;
		let value: Option<()> = RetryExecutor::new(&policy)
			.run(move |_| async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err(Error::Io(std::io::Error::other("down")))
			})
			.await;

		assert!(value.is_none());
		assert_eq!(counter.load(Ordering::SeqCst), 4);
	}

	#[tokio::test]
	async fn run_stops_on_rejected_payload() {
		let policy = fast_policy();
		let counter = AtomicU32::new(0);
		let calls = &counter;
		let value: Option<()> = RetryExecutor::new(&policy)
			.run(move |_| async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err(Error::Validation { field: "datafile", reason: "too large".into() })
			})
			.await;

		assert!(value.is_none());
		assert_eq!(counter.load(Ordering::SeqCst), 1);
	}
}
