//! Process-local [`TokenCache`] used when no cache directory is configured.

// self
use crate::{
	_prelude::*,
	auth::BearerToken,
	oidc::ClientRegistration,
	store::{CacheKey, RegistrationKey, StoreFuture, TokenCache},
};

/// Thread-safe cache that never touches the filesystem.
#[derive(Clone, Debug, Default)]
pub struct MemoryTokenCache {
	tokens: Arc<RwLock<HashMap<CacheKey, BearerToken>>>,
	registrations: Arc<RwLock<HashMap<RegistrationKey, ClientRegistration>>>,
}
impl MemoryTokenCache {
	/// Number of cached tokens.
	pub fn token_count(&self) -> usize {
		self.tokens.read().len()
	}
}
impl TokenCache for MemoryTokenCache {
	fn load_token<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<BearerToken>> {
		let found = self.tokens.read().get(key).cloned();

		Box::pin(async move { Ok(found) })
	}

	fn save_token<'a>(&'a self, key: &'a CacheKey, token: &'a BearerToken) -> StoreFuture<'a, ()> {
		self.tokens.write().insert(key.clone(), token.clone());

		Box::pin(async move { Ok(()) })
	}

	fn remove_token<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()> {
		self.tokens.write().remove(key);

		Box::pin(async move { Ok(()) })
	}

	fn load_registration<'a>(
		&'a self,
		key: &'a RegistrationKey,
	) -> StoreFuture<'a, Option<ClientRegistration>> {
		let found = self.registrations.read().get(key).cloned();

		Box::pin(async move { Ok(found) })
	}

	fn save_registration<'a>(
		&'a self,
		key: &'a RegistrationKey,
		registration: &'a ClientRegistration,
	) -> StoreFuture<'a, ()> {
		self.registrations.write().insert(key.clone(), registration.clone());

		Box::pin(async move { Ok(()) })
	}
}
