//! Bearer tokens issued by the device authorization grant.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Observable lifecycle state of a bearer token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
	/// Token is usable as-is.
	Valid,
	/// Token expired but can be silently refreshed.
	Refreshable,
	/// Token expired and the user must authorize again.
	Expired,
}

/// Short-lived OAuth access token plus the material needed to refresh it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BearerToken {
	/// Access token presented to downstream services.
	pub access_token: TokenSecret,
	/// Refresh token, when the authorization server issued one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Instant after which the access token must not be used.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Expiry of the client registration that minted the token; refresh needs a live one.
	#[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
	pub registration_expires_at: Option<OffsetDateTime>,
}
impl BearerToken {
	/// Builds a token that expires `expires_in` after `issued_at`.
	pub fn issued(
		access_token: TokenSecret,
		refresh_token: Option<TokenSecret>,
		issued_at: OffsetDateTime,
		expires_in: Duration,
	) -> Self {
		Self {
			access_token,
			refresh_token,
			expires_at: issued_at + expires_in,
			registration_expires_at: None,
		}
	}

	/// Records the expiry of the client registration behind this token.
	pub fn with_registration_expiry(mut self, expires_at: Option<OffsetDateTime>) -> Self {
		self.registration_expires_at = expires_at;

		self
	}

	/// Returns true once `instant` reaches the access token expiry.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns true when a silent refresh is possible at `instant`.
	pub fn can_refresh_at(&self, instant: OffsetDateTime) -> bool {
		self.refresh_token.is_some()
			&& self.registration_expires_at.is_none_or(|expires_at| instant < expires_at)
	}

	/// Classifies the token at `instant`.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if !self.is_expired_at(instant) {
			TokenStatus::Valid
		} else if self.can_refresh_at(instant) {
			TokenStatus::Refreshable
		} else {
			TokenStatus::Expired
		}
	}
}
