//! AWS access-key credentials produced by resolved providers.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// AWS signing credentials; the secret parts are redacted in logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AwsCredentials {
	/// Access key id (not secret).
	pub access_key_id: String,
	/// Secret access key.
	pub secret_access_key: TokenSecret,
	/// Session token for temporary credentials.
	pub session_token: Option<TokenSecret>,
	/// Expiration of temporary credentials.
	pub expiration: Option<OffsetDateTime>,
}
impl AwsCredentials {
	/// Creates long-lived credentials.
	pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
		Self {
			access_key_id: access_key_id.into(),
			secret_access_key: TokenSecret::new(secret_access_key),
			session_token: None,
			expiration: None,
		}
	}

	/// Attaches a session token.
	pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
		self.session_token = Some(TokenSecret::new(token));

		self
	}

	/// Attaches an expiration instant.
	pub fn with_expiration(mut self, expiration: OffsetDateTime) -> Self {
		self.expiration = Some(expiration);

		self
	}

	/// Returns true when the credentials expire within `window` of `now`.
	pub fn expires_within(&self, now: OffsetDateTime, window: Duration) -> bool {
		self.expiration.is_some_and(|expiration| expiration - now <= window)
	}
}
