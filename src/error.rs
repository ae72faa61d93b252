//! Crate-wide error taxonomy shared by the registry, token provider, pinning, and client cache.
//!
//! Every error is `Clone` so a coalesced token resolution can hand the same failure to every
//! waiting caller; foreign sources are therefore held behind [`Arc`].

// self
use crate::{
	_prelude::*,
	auth::{CredentialId, FactoryId, IdentifierError, ScopeValidationError},
	provider::DescriptorError,
	store::StoreError,
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Token cache or pin store failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; safe to retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Network failure (DNS, TCP, TLS) while talking to the authorization server.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Source data behind an identifier is malformed.
	#[error("Identifier `{id}` is invalid: {reason}.")]
	Validation {
		/// Identifier (or raw profile name) that failed validation.
		id: String,
		/// Human-readable reason.
		reason: String,
	},
	/// A chained credential source refers back to itself.
	#[error("Credential chain is cyclic: {}.", format_chain(.chain))]
	CyclicReference {
		/// Identifiers visited in order; the last entry repeats an earlier one.
		chain: Vec<CredentialId>,
	},
	/// The registry routed an identifier to a factory it does not know.
	#[error("No factory `{factory}` is registered for identifier `{id}`.")]
	FactoryNotFound {
		/// Factory named by the identifier.
		factory: FactoryId,
		/// Identifier being resolved.
		id: CredentialId,
	},
	/// Identifier is not present in the registry.
	#[error("Identifier `{id}` is not known to the registry.")]
	UnknownIdentifier {
		/// Missing identifier.
		id: CredentialId,
	},
	/// Device authorization expired before the user approved it.
	#[error("Device authorization expired before it was approved.")]
	ExpiredGrant,
	/// The user declined the device authorization request.
	#[error("Device authorization was denied by the user.")]
	AccessDenied,
	/// The interactive flow was cancelled by the caller or the prompt.
	#[error("Device authorization was cancelled.")]
	Cancelled,
	/// The identity was removed or replaced while it was being resolved.
	#[error("Identifier `{id}` was invalidated during resolution; resolve it again.")]
	InvalidatedProvider {
		/// Identifier that changed underneath the resolution.
		id: CredentialId,
	},
	/// Authorization server rejected the grant (e.g., a stale refresh token).
	#[error("Authorization server rejected the grant: {reason}.")]
	InvalidGrant {
		/// Server- or crate-supplied reason string.
		reason: String,
	},
	/// Client registration is unknown, expired, or malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Server- or crate-supplied reason string.
		reason: String,
	},
	/// A downstream credential exchange (assume-role, process, SSO role) failed.
	#[error("Credential exchange for `{id}` failed: {reason}.")]
	CredentialExchange {
		/// Identifier whose credentials were being exchanged.
		id: CredentialId,
		/// Human-readable reason.
		reason: String,
	},
}
impl Error {
	/// Returns true when the failure is worth retrying inside the bounded network retry loop.
	///
	/// Endpoint failures qualify when no status was received, on `429`, and on `5xx`.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Transport(_) => true,
			Self::Transient(TransientError::TokenEndpoint { status, .. }) =>
				status.is_none_or(|code| code == 429 || code >= 500),
			_ => false,
		}
	}

	/// Retry-After hint carried by the failure, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Transient(TransientError::TokenEndpoint { retry_after, .. }) => *retry_after,
			_ => None,
		}
	}

	/// Builds a [`Error::Validation`] for the provided identifier view.
	pub fn validation(id: impl Display, reason: impl Into<String>) -> Self {
		Self::Validation { id: id.to_string(), reason: reason.into() }
	}
}

/// Configuration and validation failures.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(Arc<oauth2::http::Error>),
	/// Endpoint URL cannot be parsed.
	#[error("Endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] DescriptorError),
	/// Scope list cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] ScopeValidationError),
	/// An identifier failed validation.
	#[error(transparent)]
	Identifier(#[from] IdentifierError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// A factory with the same id is already registered.
	#[error("Factory `{factory}` is already registered.")]
	DuplicateFactory {
		/// Conflicting factory id.
		factory: FactoryId,
	},
	/// Two client types share one service kind.
	#[error("Service kind `{service}` is registered for a different client type.")]
	ServiceKindConflict {
		/// Conflicting service kind.
		service: String,
	},
	/// No region was supplied and none could be defaulted.
	#[error("No region was supplied for `{id}` and no default region is configured.")]
	MissingRegion {
		/// Identifier being resolved.
		id: CredentialId,
	},
	/// A required collaborator was not supplied to the context builder.
	#[error("The {component} was not supplied.")]
	MissingComponent {
		/// Collaborator label.
		component: &'static str,
	},
	/// A configuration value is out of range.
	#[error("Configuration field `{field}` is invalid: {reason}.")]
	InvalidSetting {
		/// Offending field name.
		field: &'static str,
		/// Human-readable reason.
		reason: String,
	},
	/// Configuration file could not be read or parsed.
	#[error("Configuration file {path} could not be loaded: {reason}.")]
	ConfigFile {
		/// Offending path.
		path: String,
		/// Human-readable reason.
		reason: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
impl From<oauth2::http::Error> for ConfigError {
	fn from(e: oauth2::http::Error) -> Self {
		Self::HttpRequest(Arc::new(e))
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for ConfigError {
	fn from(e: reqwest::Error) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants.
#[derive(Clone, Debug, ThisError)]
pub enum TransientError {
	/// Authorization server returned an unexpected but non-fatal response.
	#[error("OIDC endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Authorization server responded with JSON that could not be parsed.
	#[error("OIDC endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// An operation exceeded its fixed timeout.
	#[error("Timed out during {operation}.")]
	Timeout {
		/// Operation label.
		operation: &'static str,
	},
}

/// Transport-level failures (network, IO).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the OIDC endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the OIDC endpoint.")]
	Io(#[source] Arc<std::io::Error>),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}
impl From<std::io::Error> for TransportError {
	fn from(e: std::io::Error) -> Self {
		Self::Io(Arc::new(e))
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for TransportError {
	fn from(e: reqwest::Error) -> Self {
		Self::network(e)
	}
}

fn format_chain(chain: &[CredentialId]) -> String {
	chain.iter().map(|id| id.as_ref()).collect::<Vec<_>>().join(" -> ")
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn id(value: &str) -> CredentialId {
		CredentialId::new(value).expect("Credential fixture should be valid.")
	}

	#[test]
	fn cyclic_reference_renders_chain() {
		let err = Error::CyclicReference { chain: vec![id("profile:a"), id("profile:b"), id("profile:a")] };

		assert_eq!(
			err.to_string(),
			"Credential chain is cyclic: profile:a -> profile:b -> profile:a."
		);
	}

	#[test]
	fn transient_classification_covers_network_and_endpoint_failures() {
		let network: Error =
			TransportError::from(std::io::Error::other("connection reset")).into();
		let endpoint: Error = TransientError::TokenEndpoint {
			message: "service unavailable".into(),
			status: Some(503),
			retry_after: Some(Duration::seconds(2)),
		}
		.into();
		let rejected: Error = TransientError::TokenEndpoint {
			message: "invalid_scope".into(),
			status: Some(400),
			retry_after: None,
		}
		.into();
		let timeout: Error = TransientError::Timeout { operation: "refresh" }.into();

		assert!(network.is_transient());
		assert!(endpoint.is_transient());
		assert_eq!(endpoint.retry_after(), Some(Duration::seconds(2)));
		assert!(!rejected.is_transient(), "Client errors are not retried.");
		assert!(!timeout.is_transient(), "Timeouts are bounded, never retried.");
		assert!(!Error::AccessDenied.is_transient());
	}

	#[test]
	fn errors_clone_with_shared_sources() {
		let original: Error = TransportError::from(std::io::Error::other("boom")).into();
		let cloned = original.clone();

		assert_eq!(original.to_string(), cloned.to_string());
		assert!(StdError::source(&cloned).is_some());
	}
}
