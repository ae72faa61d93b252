//! Runtime configuration shared by every service in a [`ToolkitContext`](crate::context::ToolkitContext).

// std
use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration as StdDuration,
};
// self
use crate::{_prelude::*, auth::Region, error::ConfigError};

/// Tunables for credential resolution, token acquisition, and persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
	/// Client name announced during dynamic client registration.
	pub client_name: String,
	/// Directory holding the bearer-token disk cache; `None` keeps tokens in memory only.
	pub cache_dir: Option<PathBuf>,
	/// File holding connection pins; `None` keeps pins in memory only.
	pub pins_path: Option<PathBuf>,
	/// Fixed timeout for silent refresh, registration, authorization start, and resolution.
	#[serde(with = "millis")]
	pub request_timeout: Duration,
	/// Bounded retry applied to transient OIDC failures.
	pub network_retry: RetryPolicy,
	/// Poll interval used when the authorization server omits `interval`.
	#[serde(with = "millis")]
	pub default_poll_interval: Duration,
	/// Amount added to the poll interval on every `slow_down` response.
	#[serde(with = "millis")]
	pub slow_down_increment: Duration,
	/// Region used when neither the caller nor the identifier supplies one.
	pub default_region: Option<Region>,
}
impl BrokerConfig {
	/// Reads a JSON configuration file and validates it.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let bytes = fs::read(path).map_err(|e| ConfigError::ConfigFile {
			path: path.display().to_string(),
			reason: e.to_string(),
		})?;
		let config: Self =
			serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(&bytes))
				.map_err(|e| ConfigError::ConfigFile {
					path: path.display().to_string(),
					reason: e.to_string(),
				})?;

		config.validate()?;

		Ok(config)
	}

	/// Rejects values that would make the services misbehave.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.client_name.trim().is_empty() {
			return Err(invalid("clientName", "must not be blank"));
		}
		if !self.request_timeout.is_positive() {
			return Err(invalid("requestTimeout", "must be positive"));
		}
		if !self.default_poll_interval.is_positive() {
			return Err(invalid("defaultPollInterval", "must be positive"));
		}
		if self.slow_down_increment.is_negative() {
			return Err(invalid("slowDownIncrement", "must not be negative"));
		}

		self.network_retry.validate()
	}
}
impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			client_name: "aws-identity-broker".into(),
			cache_dir: None,
			pins_path: None,
			request_timeout: Duration::seconds(10),
			network_retry: RetryPolicy::default(),
			default_poll_interval: Duration::seconds(5),
			slow_down_increment: Duration::seconds(5),
			default_region: Region::new("us-east-1").ok(),
		}
	}
}

/// Exponential backoff for transient OIDC failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
	/// Total attempts including the first call.
	pub max_attempts: u32,
	/// Delay before the second attempt; doubles afterwards.
	#[serde(with = "millis")]
	pub initial_backoff: Duration,
	/// Upper bound for any single delay.
	#[serde(with = "millis")]
	pub max_backoff: Duration,
	/// Scales each delay by a random factor in `[0.8, 1.2]`.
	pub jitter: bool,
}
impl RetryPolicy {
	/// Delay to wait after failed attempt number `attempt` (1-based).
	///
	/// A server-supplied `Retry-After` hint wins when present, still capped by `max_backoff`.
	pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
		let base = match retry_after {
			Some(hint) => hint,
			None => {
				let exponent = attempt.saturating_sub(1).min(16);

				self.initial_backoff.saturating_mul(1_i32 << exponent)
			},
		};
		let capped = base.min(self.max_backoff).max(Duration::ZERO);

		if self.jitter && !capped.is_zero() {
			capped * rand::random_range(0.8..=1.2)
		} else {
			capped
		}
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.max_attempts == 0 {
			return Err(invalid("networkRetry.maxAttempts", "must be at least 1"));
		}
		if self.initial_backoff.is_negative() || self.max_backoff < self.initial_backoff {
			return Err(invalid(
				"networkRetry.maxBackoff",
				"must be at least networkRetry.initialBackoff",
			));
		}

		Ok(())
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_backoff: Duration::milliseconds(250),
			max_backoff: Duration::seconds(2),
			jitter: true,
		}
	}
}

/// Converts a signed duration into a timer-friendly one, clamping negatives to zero.
pub(crate) fn std_duration(duration: Duration) -> StdDuration {
	if duration.is_negative() { StdDuration::ZERO } else { duration.unsigned_abs() }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
	ConfigError::InvalidSetting { field, reason: reason.into() }
}

mod millis {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_milliseconds().clamp(0, i64::MAX as i128) as i64)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Duration::milliseconds(i64::deserialize(deserializer)?))
	}
}
