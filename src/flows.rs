//! Bearer-token provider driving the OAuth device authorization grant.
//!
//! [`BearerTokenProvider`] owns the per-key token state machine
//! (`NoToken -> PendingDeviceAuth -> Authenticated -> Expired -> Refreshing -> ...`), the
//! single-flight table that coalesces concurrent resolutions of one [`CacheKey`], and the
//! identity bindings used to tell the client cache which identities a token change affects.
//!
//! Resolution order for a key: cached token when still valid, one silent refresh when the
//! cached token expired but can be refreshed, and otherwise the interactive device flow.
//! Disk-cache failures are logged and degrade to a process-local cache.

pub mod common;
pub mod device_code;
pub mod refresh;

pub use device_code::*;
pub use refresh::*;

// crates.io
use async_lock::OnceCell;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{BearerToken, CredentialId, TokenStatus},
	config::BrokerConfig,
	event::{EventBus, Subscription},
	identity::SsoSessionIdentifier,
	oidc::{ClientRegistration, OidcClient},
	store::{CacheKey, MemoryTokenCache, RegistrationKey, TokenCache},
};

/// Observable state of one cache key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TokenState {
	/// Nothing is cached and no flow ran yet.
	#[default]
	NoToken,
	/// The user is being asked to approve a device code.
	PendingDeviceAuth,
	/// A valid token is cached.
	Authenticated,
	/// The cached token expired.
	Expired,
	/// A silent refresh is in flight.
	Refreshing,
	/// The last attempt failed.
	Failed,
}

/// Token lifecycle notification.
#[derive(Clone, Debug)]
pub enum TokenEvent {
	/// The key's token was dropped from every cache.
	Invalidated {
		/// Affected cache key.
		key: CacheKey,
		/// Identities bound to the key.
		identities: Vec<CredentialId>,
	},
	/// The key received a new token through refresh or a new login.
	Refreshed {
		/// Affected cache key.
		key: CacheKey,
		/// Identities bound to the key.
		identities: Vec<CredentialId>,
	},
}
impl TokenEvent {
	/// Cache key the event is about.
	pub fn key(&self) -> &CacheKey {
		match self {
			TokenEvent::Invalidated { key, .. } | TokenEvent::Refreshed { key, .. } => key,
		}
	}

	/// Identities affected by the event.
	pub fn identities(&self) -> &[CredentialId] {
		match self {
			TokenEvent::Invalidated { identities, .. } | TokenEvent::Refreshed { identities, .. } =>
				identities,
		}
	}
}

struct Flight {
	interactive: bool,
	outcome: OnceCell<Result<Option<BearerToken>>>,
}

/// Resolves bearer tokens per `(region, start URL, scopes)` with single-flight coordination.
pub struct BearerTokenProvider {
	oidc: Arc<dyn OidcClient>,
	cache: Arc<dyn TokenCache>,
	fallback: MemoryTokenCache,
	prompt: Arc<dyn DeviceCodePrompt>,
	config: BrokerConfig,
	states: RwLock<HashMap<CacheKey, TokenState>>,
	flights: Mutex<HashMap<CacheKey, Arc<Flight>>>,
	cancellations: Mutex<HashMap<CacheKey, CancellationToken>>,
	bindings: RwLock<HashMap<CacheKey, BTreeSet<CredentialId>>>,
	events: EventBus<TokenEvent>,
	refresh_metrics: Arc<RefreshMetrics>,
}
impl BearerTokenProvider {
	/// Creates a provider over `cache` that prompts through `prompt`.
	pub fn new(
		oidc: Arc<dyn OidcClient>,
		cache: Arc<dyn TokenCache>,
		prompt: Arc<dyn DeviceCodePrompt>,
		config: BrokerConfig,
	) -> Self {
		Self {
			oidc,
			cache,
			fallback: MemoryTokenCache::default(),
			prompt,
			config,
			states: RwLock::default(),
			flights: Mutex::default(),
			cancellations: Mutex::default(),
			bindings: RwLock::default(),
			events: EventBus::new(),
			refresh_metrics: Default::default(),
		}
	}

	/// Returns a usable token for `key`, prompting the user when nothing else works.
	///
	/// Concurrent calls for the same key share one in-flight operation.
	pub async fn resolve_token(&self, key: &CacheKey) -> Result<BearerToken> {
		loop {
			let flight = self.join_flight(key, true);

			match self.await_flight(key, &flight).await {
				Ok(Some(token)) => return Ok(token),
				// A silent flight found nothing usable; start (or join) an interactive one.
				Ok(None) | Err(_) if !flight.interactive => continue,
				Ok(None) => return Err(Error::ExpiredGrant),
				Err(e) => return Err(e),
			}
		}
	}

	/// Resolves the token of `session` on behalf of `identity` and records the binding.
	pub async fn resolve_token_for(
		&self,
		identity: &CredentialId,
		session: &SsoSessionIdentifier,
	) -> Result<BearerToken> {
		let key = session.cache_key();

		self.bind(identity, &key);
		self.resolve_token(&key).await
	}

	/// Returns a usable token without ever prompting; `None` means a login is required.
	pub async fn resolve_silent(&self, key: &CacheKey) -> Result<Option<BearerToken>> {
		let flight = self.join_flight(key, false);

		self.await_flight(key, &flight).await
	}

	/// Records that `identity` uses the token stored under `key`.
	pub fn bind(&self, identity: &CredentialId, key: &CacheKey) {
		self.bindings.write().entry(key.clone()).or_default().insert(identity.clone());
	}

	/// Identities bound to `key`.
	pub fn bound_identities(&self, key: &CacheKey) -> Vec<CredentialId> {
		self.bindings.read().get(key).map(|ids| ids.iter().cloned().collect()).unwrap_or_default()
	}

	/// Drops the token of every key `identity` is bound to.
	///
	/// Returns the number of keys invalidated.
	pub async fn invalidate(&self, identity: &CredentialId) -> usize {
		let keys = self
			.bindings
			.read()
			.iter()
			.filter(|(_, ids)| ids.contains(identity))
			.map(|(key, _)| key.clone())
			.collect::<Vec<_>>();

		for key in &keys {
			self.invalidate_key(key).await;
		}

		keys.len()
	}

	/// Drops the token stored under `key` from every cache and notifies listeners.
	///
	/// A pending device flow for the key is cancelled. Listeners run before this returns.
	pub async fn invalidate_key(&self, key: &CacheKey) {
		self.cancel(key);
		self.flights.lock().remove(key);

		if let Err(e) = self.cache.remove_token(key).await {
			tracing::warn!(%key, error = %e, "Failed to remove cached token.");
		}
		// The fallback cache is infallible.
		let _ = self.fallback.remove_token(key).await;

		self.set_state(key, TokenState::NoToken);

		tracing::info!(%key, "Invalidated bearer token.");

		self.events.emit(TokenEvent::Invalidated {
			key: key.clone(),
			identities: self.bound_identities(key),
		});
	}

	/// Cancels the pending device flow for `key`; returns false when none is pending.
	pub fn cancel(&self, key: &CacheKey) -> bool {
		match self.cancellations.lock().get(key) {
			Some(token) => {
				token.cancel();

				true
			},
			None => false,
		}
	}

	/// Current state of `key`.
	pub fn state(&self, key: &CacheKey) -> TokenState {
		self.states.read().get(key).copied().unwrap_or_default()
	}

	/// Registers a synchronous listener for token events.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: 'static + Fn(&TokenEvent) + Send + Sync,
	{
		self.events.subscribe(listener)
	}

	/// Async stream of token events.
	pub fn stream(&self) -> broadcast::Receiver<TokenEvent> {
		self.events.stream()
	}

	/// Configuration the provider was built with.
	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	fn join_flight(&self, key: &CacheKey, interactive: bool) -> Arc<Flight> {
		self.flights
			.lock()
			.entry(key.clone())
			.or_insert_with(|| Arc::new(Flight { interactive, outcome: OnceCell::new() }))
			.clone()
	}

	async fn await_flight(&self, key: &CacheKey, flight: &Arc<Flight>) -> Result<Option<BearerToken>> {
		let outcome = flight
			.outcome
			.get_or_init(|| self.acquire(key, flight.interactive))
			.await
			.clone();
		let mut flights = self.flights.lock();

		if flights.get(key).is_some_and(|current| Arc::ptr_eq(current, flight)) {
			flights.remove(key);
		}

		outcome
	}

	async fn acquire(&self, key: &CacheKey, interactive: bool) -> Result<Option<BearerToken>> {
		if let Some(token) = self.load_token(key).await {
			match token.status_at(OffsetDateTime::now_utc()) {
				TokenStatus::Valid => {
					self.set_state(key, TokenState::Authenticated);

					return Ok(Some(token));
				},
				TokenStatus::Refreshable => {
					self.set_state(key, TokenState::Expired);

					match self.refresh(key, &token).await {
						Ok(refreshed) => return Ok(Some(refreshed)),
						Err(e) => tracing::info!(%key, error = %e, "Silent refresh failed."),
					}
				},
				TokenStatus::Expired => self.set_state(key, TokenState::Expired),
			}
		}
		if !interactive {
			return Ok(None);
		}

		match self.device_flow(key).await {
			Ok(token) => Ok(Some(token)),
			Err(e) => {
				self.set_state(key, TokenState::Failed);

				Err(e)
			},
		}
	}

	fn set_state(&self, key: &CacheKey, state: TokenState) {
		self.states.write().insert(key.clone(), state);
	}

	async fn load_token(&self, key: &CacheKey) -> Option<BearerToken> {
		match self.cache.load_token(key).await {
			Ok(Some(token)) => return Some(token),
			Ok(None) => (),
			Err(e) => tracing::warn!(%key, error = %e, "Token cache unreadable; using the in-memory cache."),
		}

		self.fallback.load_token(key).await.ok().flatten()
	}

	async fn store_token(&self, key: &CacheKey, token: &BearerToken) {
		if let Err(e) = self.cache.save_token(key, token).await {
			tracing::warn!(%key, error = %e, "Token cache unwritable; keeping the token in memory.");

			let _ = self.fallback.save_token(key, token).await;
		}
	}

	async fn load_registration(&self, key: &RegistrationKey) -> Option<ClientRegistration> {
		match self.cache.load_registration(key).await {
			Ok(Some(registration)) => return Some(registration),
			Ok(None) => (),
			Err(e) => tracing::warn!(error = %e, "Registration cache unreadable; using the in-memory cache."),
		}

		self.fallback.load_registration(key).await.ok().flatten()
	}

	async fn store_registration(&self, key: &RegistrationKey, registration: &ClientRegistration) {
		if let Err(e) = self.cache.save_registration(key, registration).await {
			tracing::warn!(error = %e, "Registration cache unwritable; keeping it in memory.");

			let _ = self.fallback.save_registration(key, registration).await;
		}
	}

	fn emit_refreshed(&self, key: &CacheKey) {
		self.events.emit(TokenEvent::Refreshed {
			key: key.clone(),
			identities: self.bound_identities(key),
		});
	}
}
impl Debug for BearerTokenProvider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BearerTokenProvider")
			.field("in_flight", &self.flights.lock().len())
			.field("events", &self.events)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{FakeOidcClient, RecordingPrompt, region},
		auth::{ScopeSet, TokenSecret},
		store::MemoryTokenCache,
	};

	fn key() -> CacheKey {
		CacheKey::new(
			region("us-east-1"),
			Url::parse("https://d-123.awsapps.com/start").expect("Start URL should parse."),
			ScopeSet::new(["sso:account:access"]).expect("Scope fixture should be valid."),
		)
	}

	#[tokio::test]
	async fn valid_cached_token_is_served_without_network_calls() {
		let oidc = Arc::new(FakeOidcClient::default());
		let cache = Arc::new(MemoryTokenCache::default());
		let token = BearerToken::issued(
			TokenSecret::new("cached"),
			None,
			OffsetDateTime::now_utc(),
			Duration::hours(1),
		);

		cache.save_token(&key(), &token).await.expect("Fixture token should be saved.");

		let provider = BearerTokenProvider::new(
			oidc.clone(),
			cache,
			Arc::new(RecordingPrompt::default()),
			BrokerConfig::default(),
		);

		assert_eq!(provider.resolve_token(&key()).await.expect("Token should resolve."), token);
		assert_eq!(provider.state(&key()), TokenState::Authenticated);
		assert_eq!(oidc.registrations.load(std::sync::atomic::Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn silent_resolution_never_prompts() {
		let prompt = Arc::new(RecordingPrompt::default());
		let provider = BearerTokenProvider::new(
			Arc::new(FakeOidcClient::default()),
			Arc::new(MemoryTokenCache::default()),
			prompt.clone(),
			BrokerConfig::default(),
		);

		assert!(provider.resolve_silent(&key()).await.expect("Silent lookup should succeed.").is_none());
		assert_eq!(prompt.prompts(), 0);
		assert_eq!(provider.state(&key()), TokenState::NoToken);
	}
}
