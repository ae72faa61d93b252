//! Bearer-token cache contracts and the built-in disk and memory caches.

pub mod file;
pub mod memory;

pub use file::FileTokenCache;
pub use memory::MemoryTokenCache;

// self
use crate::{
	_prelude::*,
	auth::{BearerToken, Region, ScopeSet, scope},
	oidc::ClientRegistration,
};

/// Boxed future returned by [`TokenCache`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for bearer tokens and the client registrations that mint them.
///
/// Implementations may be shared with other processes; readers must never observe a partially
/// written entry.
pub trait TokenCache
where
	Self: Send + Sync,
{
	/// Loads the token stored under `key`, if any.
	fn load_token<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<BearerToken>>;

	/// Persists or replaces the token stored under `key`.
	fn save_token<'a>(&'a self, key: &'a CacheKey, token: &'a BearerToken) -> StoreFuture<'a, ()>;

	/// Removes the token stored under `key`; missing entries are not an error.
	fn remove_token<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()>;

	/// Loads the client registration stored under `key`, if any.
	fn load_registration<'a>(
		&'a self,
		key: &'a RegistrationKey,
	) -> StoreFuture<'a, Option<ClientRegistration>>;

	/// Persists or replaces the client registration stored under `key`.
	fn save_registration<'a>(
		&'a self,
		key: &'a RegistrationKey,
		registration: &'a ClientRegistration,
	) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`TokenCache`] and pin store implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Stored bytes could not be encoded or decoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure (filesystem, permissions).
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Exact bearer-token cache key: a superset scope request is a different key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
	/// OIDC region serving the session.
	pub region: Region,
	/// Issuer (SSO start) URL.
	pub start_url: Url,
	/// Requested scope set.
	pub scopes: ScopeSet,
}
impl CacheKey {
	/// Builds a key from its parts.
	pub fn new(region: Region, start_url: Url, scopes: ScopeSet) -> Self {
		Self { region, start_url, scopes }
	}

	/// File-name safe digest of the whole key.
	pub fn fingerprint(&self) -> String {
		scope::fingerprint(&format!(
			"token\n{}\n{}\n{}",
			self.region,
			self.start_url,
			self.scopes.normalized()
		))
	}

	/// Registration key shared by every token minted for this region and scope set.
	pub fn registration_key(&self) -> RegistrationKey {
		RegistrationKey { region: self.region.clone(), scopes: self.scopes.clone() }
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}@{}[{}]", self.start_url, self.region, self.scopes)
	}
}

/// Key under which a dynamic client registration is cached.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
	/// OIDC region the client was registered in.
	pub region: Region,
	/// Scopes the client was registered for.
	pub scopes: ScopeSet,
}
impl RegistrationKey {
	/// File-name safe digest of the whole key.
	pub fn fingerprint(&self) -> String {
		scope::fingerprint(&format!("registration\n{}\n{}", self.region, self.scopes.normalized()))
	}
}
