//! Silent refresh of expired bearer tokens.
//!
//! A refresh reuses the cached client registration that minted the token and never registers
//! a new client: refresh tokens are bound to the client that obtained them. When the server
//! omits a new refresh token the previous one is kept.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::BearerToken,
	flows::{BearerTokenProvider, TokenState, common},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::CacheKey,
};

impl BearerTokenProvider {
	/// Shared refresh counters.
	pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
		self.refresh_metrics.clone()
	}

	/// Exchanges the refresh token of `current` and persists the result under `key`.
	pub(crate) async fn refresh(&self, key: &CacheKey, current: &BearerToken) -> Result<BearerToken> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.refresh_metrics.record_attempt();
		self.set_state(key, TokenState::Refreshing);

		let result = span
			.instrument(async move {
				let refresh_token = current.refresh_token.clone().ok_or_else(|| Error::InvalidGrant {
					reason: "the cached token carries no refresh token".into(),
				})?;
				let now = OffsetDateTime::now_utc();
				let registration = self
					.load_registration(&key.registration_key())
					.await
					.filter(|registration| !registration.is_expired_at(now))
					.ok_or_else(|| Error::InvalidClient {
						reason: "no live client registration is cached for this session".into(),
					})?;
				let grant = common::with_retry(
					&self.config.network_retry,
					self.config.request_timeout,
					"refresh_token",
					|| self.oidc.refresh_token(&registration, &refresh_token, &key.scopes),
				)
				.await?;
				let token = BearerToken::issued(
					grant.access_token,
					grant.refresh_token.or(Some(refresh_token)),
					OffsetDateTime::now_utc(),
					grant.expires_in,
				)
				.with_registration_expiry(registration.expires_at);

				self.store_token(key, &token).await;

				Ok(token)
			})
			.await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		match &result {
			Ok(_) => {
				self.refresh_metrics.record_success();
				self.set_state(key, TokenState::Authenticated);

				tracing::debug!(%key, "Refreshed bearer token.");

				self.emit_refreshed(key);
			},
			Err(_) => {
				self.refresh_metrics.record_failure();
				self.set_state(key, TokenState::Expired);
			},
		}

		result
	}
}
