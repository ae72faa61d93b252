//! Invalidation-aware cache of downstream service clients.
//!
//! Clients are memoized per `(identity, region, service)`. Entries never expire on their own:
//! they are evicted when the registry removes or redefines the identity, or when the token
//! provider invalidates or refreshes a token bound to it. Providers that are no longer
//! [current](ResolvedProvider::is_current) are refused outright, and each identity carries a
//! generation counter so a client built while an eviction was in progress is discarded
//! instead of being cached.

// std
use std::any::Any;
// self
use crate::{
	_prelude::*,
	auth::{CredentialId, Region, ServiceKind},
	connection::ConnectionSettings,
	error::ConfigError,
	event::Subscription,
	flows::BearerTokenProvider,
	identity::ResolvedProvider,
	registry::IdentityRegistry,
};

type CachedClient = Arc<dyn Any + Send + Sync>;

/// Downstream service client constructible from connection settings.
pub trait ServiceClient
where
	Self: 'static + Sized + Send + Sync,
{
	/// Service label; one client type per label.
	const SERVICE: &'static str;

	/// Builds a client for `settings`.
	fn build(settings: &ConnectionSettings) -> Result<Self>;
}

/// Key of one cached client.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientCacheKey {
	/// Identity the client was built from.
	pub identity: CredentialId,
	/// Region the client talks to.
	pub region: Region,
	/// Service label.
	pub service: ServiceKind,
}

/// Memoizes service clients until their identity changes.
#[derive(Default)]
pub struct ClientCache {
	entries: RwLock<HashMap<ClientCacheKey, CachedClient>>,
	generations: RwLock<HashMap<CredentialId, u64>>,
}
impl ClientCache {
	/// Returns the cached `T` for `provider` in `region`, building it on a miss.
	///
	/// Fails with [`Error::InvalidatedProvider`] when `provider` was resolved from a definition
	/// the registry has since removed or replaced, or when the identity was evicted while the
	/// client was being built; resolve the identity again and retry.
	pub fn get_client<T>(&self, provider: &ResolvedProvider, region: &Region) -> Result<Arc<T>>
	where
		T: ServiceClient,
	{
		let key = ClientCacheKey {
			identity: provider.identifier().id.clone(),
			region: region.clone(),
			service: ServiceKind::new(T::SERVICE).map_err(ConfigError::from)?,
		};

		if !provider.is_current() {
			return Err(Error::InvalidatedProvider { id: key.identity });
		}
		if let Some(cached) = self.entries.read().get(&key).cloned() {
			return downcast::<T>(cached, &key.service);
		}

		let generation = self.generation(&key.identity);
		let client = Arc::new(T::build(&ConnectionSettings::new(provider.clone(), region.clone()))?);
		let mut entries = self.entries.write();

		if self.generation(&key.identity) != generation || !provider.is_current() {
			tracing::debug!(identity = %key.identity, service = %key.service, "Discarding client built during eviction.");

			return Err(Error::InvalidatedProvider { id: key.identity });
		}
		// Another caller may have won the race.
		if let Some(cached) = entries.get(&key).cloned() {
			return downcast::<T>(cached, &key.service);
		}

		tracing::debug!(identity = %key.identity, %region, service = %key.service, "Cached service client.");

		entries.insert(key, client.clone());

		Ok(client)
	}

	/// Evicts every client built from `identity`; returns how many were dropped.
	pub fn evict_identity(&self, identity: &CredentialId) -> usize {
		let mut entries = self.entries.write();

		*self.generations.write().entry(identity.clone()).or_default() += 1;

		let before = entries.len();

		entries.retain(|key, _| key.identity != *identity);

		let evicted = before - entries.len();

		if evicted > 0 {
			tracing::debug!(%identity, evicted, "Evicted service clients.");
		}

		evicted
	}

	/// Subscribes the cache to registry and token events; eviction lasts as long as the
	/// returned subscriptions.
	pub fn attach(
		self: &Arc<Self>,
		registry: &IdentityRegistry,
		tokens: &BearerTokenProvider,
	) -> Vec<Subscription> {
		let on_registry = Arc::downgrade(self);
		let on_tokens = Arc::downgrade(self);

		vec![
			registry.subscribe(move |event| {
				if let Some(cache) = on_registry.upgrade().filter(|_| event.invalidates()) {
					cache.evict_identity(event.id());
				}
			}),
			tokens.subscribe(move |event| {
				if let Some(cache) = on_tokens.upgrade() {
					for identity in event.identities() {
						cache.evict_identity(identity);
					}
				}
			}),
		]
	}

	/// Number of cached clients.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns true when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Drops every cached client.
	pub fn clear(&self) {
		let mut entries = self.entries.write();
		let mut generations = self.generations.write();

		for key in entries.keys() {
			*generations.entry(key.identity.clone()).or_default() += 1;
		}

		entries.clear();
	}

	fn generation(&self, identity: &CredentialId) -> u64 {
		self.generations.read().get(identity).copied().unwrap_or_default()
	}
}
impl Debug for ClientCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientCache").field("clients", &self.len()).finish()
	}
}

fn downcast<T>(cached: CachedClient, service: &ServiceKind) -> Result<Arc<T>>
where
	T: ServiceClient,
{
	cached
		.downcast::<T>()
		.map_err(|_| ConfigError::ServiceKindConflict { service: service.to_string() }.into())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{fixture_credentials, region},
		auth::FactoryId,
		identity::{CredentialIdentifier, StaticDelegate},
	};

	#[derive(Debug)]
	struct Storage {
		region: Region,
	}
	impl ServiceClient for Storage {
		const SERVICE: &'static str = "s3";

		fn build(settings: &ConnectionSettings) -> Result<Self> {
			Ok(Self { region: settings.region.clone() })
		}
	}

	#[derive(Debug)]
	struct Impostor;
	impl ServiceClient for Impostor {
		const SERVICE: &'static str = "s3";

		fn build(_: &ConnectionSettings) -> Result<Self> {
			Ok(Self)
		}
	}

	fn provider(id: &str) -> ResolvedProvider {
		ResolvedProvider::new(
			CredentialIdentifier::static_profile(
				CredentialId::new(id).expect("Credential fixture should be valid."),
				FactoryId::new("static").expect("Factory fixture should be valid."),
			),
			region("us-east-1"),
			Arc::new(StaticDelegate::new(fixture_credentials(id))),
		)
	}

	#[test]
	fn clients_are_memoized_per_region() {
		let cache = ClientCache::default();
		let provider = provider("static:a");
		let first = cache
			.get_client::<Storage>(&provider, &region("us-east-1"))
			.expect("Client should build.");
		let second = cache
			.get_client::<Storage>(&provider, &region("us-east-1"))
			.expect("Client should be served from cache.");
		let other = cache
			.get_client::<Storage>(&provider, &region("eu-west-1"))
			.expect("Client should build for the second region.");

		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(other.region.as_ref(), "eu-west-1");
		assert_eq!(cache.len(), 2);
	}

	#[test]
	fn eviction_only_touches_the_given_identity() {
		let cache = ClientCache::default();
		let a = provider("static:a");
		let b = provider("static:b");
		let before = cache.get_client::<Storage>(&a, &region("us-east-1")).expect("Client should build.");

		cache.get_client::<Storage>(&b, &region("us-east-1")).expect("Client should build.");

		assert_eq!(cache.evict_identity(&a.identifier().id), 1);
		assert_eq!(cache.len(), 1);

		let after = cache.get_client::<Storage>(&a, &region("us-east-1")).expect("Client should rebuild.");

		assert!(!Arc::ptr_eq(&before, &after));
	}

	#[test]
	fn conflicting_client_types_are_rejected() {
		let cache = ClientCache::default();
		let provider = provider("static:a");

		cache.get_client::<Storage>(&provider, &region("us-east-1")).expect("Client should build.");

		assert!(matches!(
			cache.get_client::<Impostor>(&provider, &region("us-east-1")),
			Err(Error::Config(ConfigError::ServiceKindConflict { .. }))
		));
	}
}
