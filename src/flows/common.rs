//! Timeout and bounded-retry helpers shared by the device-grant flows.

// self
use crate::{
	_prelude::*,
	config::{self, RetryPolicy},
	error::TransientError,
};

/// Runs `fut` under a fixed timeout labeled `operation`.
pub(crate) async fn with_timeout<T, Fut>(
	timeout: Duration,
	operation: &'static str,
	fut: Fut,
) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	tokio::time::timeout(config::std_duration(timeout), fut)
		.await
		.map_err(|_| TransientError::Timeout { operation })?
}

/// Calls `call` until it succeeds, fails permanently, or `policy` runs out of attempts.
///
/// Each attempt is bounded by `timeout`; timeouts are not retried.
pub(crate) async fn with_retry<T, F, Fut>(
	policy: &RetryPolicy,
	timeout: Duration,
	operation: &'static str,
	mut call: F,
) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 1;

	loop {
		match with_timeout(timeout, operation, call()).await {
			Err(e) if e.is_transient() && attempt < policy.max_attempts => {
				let delay = policy.delay_for(attempt, e.retry_after());

				tracing::debug!(
					operation,
					attempt,
					delay_ms = delay.whole_milliseconds(),
					error = %e,
					"Retrying transient failure."
				);
				tokio::time::sleep(config::std_duration(delay)).await;

				attempt += 1;
			},
			outcome => return outcome,
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;
	use crate::error::TransportError;

	fn instant_policy() -> RetryPolicy {
		RetryPolicy {
			max_attempts: 3,
			initial_backoff: Duration::ZERO,
			max_backoff: Duration::ZERO,
			jitter: false,
		}
	}

	#[tokio::test]
	async fn transient_failures_are_retried_up_to_the_bound() {
		let calls = AtomicU32::new(0);
		let result: Result<()> =
			with_retry(&instant_policy(), Duration::seconds(1), "register_client", || {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err(TransportError::from(std::io::Error::other("reset")).into()) }
			})
			.await;

		assert!(matches!(result, Err(Error::Transport(_))));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn permanent_failures_are_returned_immediately() {
		let calls = AtomicU32::new(0);
		let result: Result<()> =
			with_retry(&instant_policy(), Duration::seconds(1), "poll_device_token", || {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err(Error::AccessDenied) }
			})
			.await;

		assert!(matches!(result, Err(Error::AccessDenied)));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn slow_operations_time_out() {
		let result: Result<()> = with_timeout(Duration::milliseconds(10), "refresh", async {
			tokio::time::sleep(std::time::Duration::from_secs(5)).await;

			Ok(())
		})
		.await;

		assert!(matches!(result, Err(Error::Transient(TransientError::Timeout { operation: "refresh" }))));
	}
}
