//! Interactive device authorization: registration reuse, prompting, and the polling loop.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::BearerToken,
	config,
	flows::{BearerTokenProvider, TokenState, common},
	oidc::{ClientRegistration, DeviceAuthorization, DevicePoll},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::CacheKey,
};

/// What the user needs to approve a device authorization request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCodePromptDetails {
	/// Code the user confirms in the browser.
	pub user_code: String,
	/// Page where the code is entered.
	pub verification_uri: Url,
	/// Page with the code pre-filled, when the server supplies one.
	pub verification_uri_complete: Option<Url>,
	/// Instant after which the code is no longer accepted.
	pub expires_at: OffsetDateTime,
}
impl DeviceCodePromptDetails {
	/// Best link to open for the user.
	pub fn link(&self) -> &Url {
		self.verification_uri_complete.as_ref().unwrap_or(&self.verification_uri)
	}
}

/// Host-supplied surface that shows the user code.
///
/// `display` must not block; hosts that offer a cancel button call
/// [`CancellationToken::cancel`] on the provided token, which stops the polling loop with
/// [`Error::Cancelled`].
pub trait DeviceCodePrompt
where
	Self: Send + Sync,
{
	/// Shows `details` to the user.
	fn display(&self, details: &DeviceCodePromptDetails, cancel: CancellationToken);
}

/// Prompt that only logs the code; suitable for headless hosts.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingPrompt;
impl DeviceCodePrompt for LoggingPrompt {
	fn display(&self, details: &DeviceCodePromptDetails, _: CancellationToken) {
		tracing::info!(
			user_code = %details.user_code,
			link = %details.link(),
			"Approve the device authorization request to continue."
		);
	}
}

impl BearerTokenProvider {
	/// Runs the full interactive flow for `key` and persists the resulting token.
	pub(crate) async fn device_flow(&self, key: &CacheKey) -> Result<BearerToken> {
		const KIND: FlowKind = FlowKind::DeviceAuthorization;

		let span = FlowSpan::new(KIND, "device_flow");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let registration = self.registration(key).await?;
				let config = &self.config;
				let authorization = common::with_retry(
					&config.network_retry,
					config.request_timeout,
					"start_device_authorization",
					|| self.oidc.start_device_authorization(&registration, &key.start_url, &key.scopes),
				)
				.await?;
				let cancel = CancellationToken::new();

				self.cancellations.lock().insert(key.clone(), cancel.clone());

				let outcome = self.approve(key, &registration, &authorization, &cancel).await;

				self.cancellations.lock().remove(key);

				let token = outcome?;

				self.store_token(key, &token).await;
				self.set_state(key, TokenState::Authenticated);

				tracing::info!(%key, "Device authorization completed.");

				self.emit_refreshed(key);

				Ok(token)
			})
			.await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	/// Reuses the cached client registration for `key` or registers a new client.
	pub(crate) async fn registration(&self, key: &CacheKey) -> Result<ClientRegistration> {
		let registration_key = key.registration_key();

		if let Some(registration) = self
			.load_registration(&registration_key)
			.await
			.filter(|registration| !registration.is_expired_at(OffsetDateTime::now_utc()))
		{
			return Ok(registration);
		}

		let registration = common::with_retry(
			&self.config.network_retry,
			self.config.request_timeout,
			"register_client",
			|| self.oidc.register_client(&key.region, &key.scopes),
		)
		.await?;

		self.store_registration(&registration_key, &registration).await;

		tracing::debug!(region = %key.region, client_id = %registration.client_id, "Registered client.");

		Ok(registration)
	}

	async fn approve(
		&self,
		key: &CacheKey,
		registration: &ClientRegistration,
		authorization: &DeviceAuthorization,
		cancel: &CancellationToken,
	) -> Result<BearerToken> {
		let config = &self.config;
		let deadline = OffsetDateTime::now_utc() + authorization.expires_in;
		let mut interval = authorization.interval.unwrap_or(config.default_poll_interval);

		self.set_state(key, TokenState::PendingDeviceAuth);
		self.prompt.display(
			&DeviceCodePromptDetails {
				user_code: authorization.user_code.clone(),
				verification_uri: authorization.verification_uri.clone(),
				verification_uri_complete: authorization.verification_uri_complete.clone(),
				expires_at: deadline,
			},
			cancel.clone(),
		);

		loop {
			if cancel.is_cancelled() {
				return Err(Error::Cancelled);
			}

			let now = OffsetDateTime::now_utc();

			if now >= deadline {
				return Err(Error::ExpiredGrant);
			}

			let poll = common::with_retry(
				&config.network_retry,
				config.request_timeout,
				"poll_device_token",
				|| self.oidc.poll_device_token(registration, authorization),
			);
			let outcome = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(Error::Cancelled),
				outcome = poll => outcome?,
			};

			match outcome {
				DevicePoll::Granted(grant) =>
					return Ok(BearerToken::issued(
						grant.access_token,
						grant.refresh_token,
						OffsetDateTime::now_utc(),
						grant.expires_in,
					)
					.with_registration_expiry(registration.expires_at)),
				DevicePoll::Pending => (),
				DevicePoll::SlowDown => {
					interval += config.slow_down_increment;

					tracing::debug!(%key, interval_ms = interval.whole_milliseconds(), "Server asked to slow down.");
				},
				DevicePoll::Denied => return Err(Error::AccessDenied),
				DevicePoll::Expired => return Err(Error::ExpiredGrant),
			}

			let wait = interval.min(deadline - OffsetDateTime::now_utc());

			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(Error::Cancelled),
				_ = tokio::time::sleep(config::std_duration(wait)) => (),
			}
		}
	}
}
