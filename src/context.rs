//! Explicit wiring of the registry, token provider, pinning manager, and client cache.
//!
//! A host builds one [`ToolkitContext`] at start-up and hands it (or the `Arc`s it exposes) to
//! every consumer. The context owns the subscriptions that keep the client cache and the pin
//! table in sync with identity and token changes; dropping it detaches them.

// self
use crate::{
	_prelude::*,
	auth::{CredentialId, Region},
	client::{ClientCache, ServiceClient},
	config::BrokerConfig,
	connection::ConnectionState,
	error::ConfigError,
	event::Subscription,
	flows::{BearerTokenProvider, DeviceCodePrompt, LoggingPrompt, common},
	identity::{
		CredentialExchanger, ProfileFactory, ProfileSource, ProviderFactory, ResolvedProvider,
	},
	oidc::OidcClient,
	pinning::{ConnectionPinning, FilePinStore, MemoryPinStore, PinStore},
	registry::IdentityRegistry,
	store::{FileTokenCache, MemoryTokenCache, TokenCache},
};

/// Collects collaborators for a [`ToolkitContext`].
pub struct ToolkitContextBuilder {
	config: BrokerConfig,
	oidc: Option<Arc<dyn OidcClient>>,
	prompt: Option<Arc<dyn DeviceCodePrompt>>,
	exchanger: Option<Arc<dyn CredentialExchanger>>,
	token_cache: Option<Arc<dyn TokenCache>>,
	pin_store: Option<Arc<dyn PinStore>>,
	profile_source: Option<Arc<dyn ProfileSource>>,
	factories: Vec<Arc<dyn ProviderFactory>>,
}
impl ToolkitContextBuilder {
	/// Uses `oidc` for registration, device authorization, and refresh.
	pub fn oidc_client(mut self, oidc: Arc<dyn OidcClient>) -> Self {
		self.oidc = Some(oidc);

		self
	}

	/// Shows device codes through `prompt` instead of logging them.
	pub fn prompt(mut self, prompt: Arc<dyn DeviceCodePrompt>) -> Self {
		self.prompt = Some(prompt);

		self
	}

	/// Uses `exchanger` for assume-role, credential-process, and SSO role exchanges.
	pub fn exchanger(mut self, exchanger: Arc<dyn CredentialExchanger>) -> Self {
		self.exchanger = Some(exchanger);

		self
	}

	/// Overrides the token cache derived from `cache_dir`.
	pub fn token_cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
		self.token_cache = Some(cache);

		self
	}

	/// Overrides the pin store derived from `pins_path`.
	pub fn pin_store(mut self, store: Arc<dyn PinStore>) -> Self {
		self.pin_store = Some(store);

		self
	}

	/// Installs the profile factory over `source`; requires an exchanger.
	pub fn profile_source(mut self, source: Arc<dyn ProfileSource>) -> Self {
		self.profile_source = Some(source);

		self
	}

	/// Installs an additional factory.
	pub fn factory(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
		self.factories.push(factory);

		self
	}

	/// Validates the configuration and wires every service.
	pub fn build(self) -> Result<ToolkitContext> {
		let Self {
			config,
			oidc,
			prompt,
			exchanger,
			token_cache,
			pin_store,
			profile_source,
			factories,
		} = self;

		config.validate()?;

		let oidc = match oidc {
			Some(oidc) => oidc,
			None => default_oidc(&config)?,
		};
		let token_cache: Arc<dyn TokenCache> = match (token_cache, &config.cache_dir) {
			(Some(cache), _) => cache,
			(None, Some(dir)) => Arc::new(FileTokenCache::open(dir)?),
			(None, None) => Arc::new(MemoryTokenCache::default()),
		};
		let pin_store: Arc<dyn PinStore> = match (pin_store, &config.pins_path) {
			(Some(store), _) => store,
			(None, Some(path)) => Arc::new(FilePinStore::new(path)),
			(None, None) => Arc::new(MemoryPinStore::default()),
		};
		let tokens = Arc::new(BearerTokenProvider::new(
			oidc,
			token_cache,
			prompt.unwrap_or_else(|| Arc::new(LoggingPrompt)),
			config.clone(),
		));
		let registry = Arc::new(IdentityRegistry::new(&config));
		let clients = Arc::new(ClientCache::default());
		let pinning = Arc::new(ConnectionPinning::new(registry.clone(), pin_store));
		let states = Arc::new(RwLock::new(HashMap::<CredentialId, ConnectionState>::new()));
		let mut subscriptions = clients.attach(&registry, &tokens);

		subscriptions.push(pinning.attach());
		subscriptions.push({
			let states = Arc::downgrade(&states);

			registry.subscribe(move |event| {
				if let Some(states) = states.upgrade() {
					states.write().remove(event.id());
				}
			})
		});

		let profiles = match profile_source {
			Some(source) => {
				let exchanger = exchanger
					.ok_or(ConfigError::MissingComponent { component: "credential exchanger" })?;
				let factory = Arc::new(ProfileFactory::new(source, exchanger, tokens.clone())?);

				registry.register_factory(factory.clone())?;

				Some(factory)
			},
			None => None,
		};

		for factory in factories {
			registry.register_factory(factory)?;
		}

		match pinning.load() {
			Ok(kept) => tracing::debug!(kept, "Restored connection pins."),
			Err(e) => tracing::warn!(error = %e, "Connection pins could not be restored."),
		}

		tracing::info!(
			factories = registry.factory_ids().len(),
			identifiers = registry.len(),
			"Toolkit context ready."
		);

		Ok(ToolkitContext {
			config,
			registry,
			tokens,
			pinning,
			clients,
			profiles,
			states,
			_subscriptions: subscriptions,
		})
	}
}

/// Process-wide services, constructed once and passed explicitly.
pub struct ToolkitContext {
	config: BrokerConfig,
	registry: Arc<IdentityRegistry>,
	tokens: Arc<BearerTokenProvider>,
	pinning: Arc<ConnectionPinning>,
	clients: Arc<ClientCache>,
	profiles: Option<Arc<ProfileFactory>>,
	states: Arc<RwLock<HashMap<CredentialId, ConnectionState>>>,
	_subscriptions: Vec<Subscription>,
}
impl ToolkitContext {
	/// Starts building a context around `config`.
	pub fn builder(config: BrokerConfig) -> ToolkitContextBuilder {
		ToolkitContextBuilder {
			config,
			oidc: None,
			prompt: None,
			exchanger: None,
			token_cache: None,
			pin_store: None,
			profile_source: None,
			factories: Vec::new(),
		}
	}

	/// Configuration the context was built with.
	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	/// Identity registry.
	pub fn registry(&self) -> &Arc<IdentityRegistry> {
		&self.registry
	}

	/// Bearer-token provider.
	pub fn tokens(&self) -> &Arc<BearerTokenProvider> {
		&self.tokens
	}

	/// Connection pinning manager.
	pub fn pinning(&self) -> &Arc<ConnectionPinning> {
		&self.pinning
	}

	/// Service client cache.
	pub fn clients(&self) -> &Arc<ClientCache> {
		&self.clients
	}

	/// Profile factory, when a profile source was supplied.
	pub fn profiles(&self) -> Option<&Arc<ProfileFactory>> {
		self.profiles.as_ref()
	}

	/// Resolves `id`, defaulting the region from the identifier and then the configuration.
	pub async fn resolve(&self, id: &CredentialId, region: Option<&Region>) -> Result<ResolvedProvider> {
		let region = match region {
			Some(region) => region.clone(),
			None => self.default_region(id)?,
		};

		self.registry.resolve(id, &region).await
	}

	/// Cached service client for connection `id`.
	pub async fn client<T>(&self, id: &CredentialId, region: Option<&Region>) -> Result<Arc<T>>
	where
		T: ServiceClient,
	{
		let provider = self.resolve(id, region).await?;

		self.clients.get_client::<T>(&provider, provider.region())
	}

	/// Signs connection `id` out by dropping the bearer token of its SSO session.
	///
	/// Works from the registered definition, so tokens persisted by an earlier process are
	/// removed too. Returns the number of token keys invalidated; connections without an SSO
	/// session hold no bearer token and yield 0.
	pub async fn invalidate(&self, id: &CredentialId) -> Result<usize> {
		let identifier = self
			.registry
			.identifier(id)
			.ok_or_else(|| Error::UnknownIdentifier { id: id.clone() })?;
		let Some(session) = identifier.sso_session() else {
			return Ok(0);
		};
		let key = session.cache_key();

		self.tokens.bind(id, &key);
		self.tokens.invalidate_key(&key).await;

		Ok(1)
	}

	/// Last evaluated state of connection `id`.
	pub fn connection_state(&self, id: &CredentialId) -> ConnectionState {
		self.states.read().get(id).copied().unwrap_or_default()
	}

	/// Checks connection `id` without prompting and records the outcome.
	///
	/// SSO-backed connections are valid when a token is available silently; the others when
	/// they resolve and yield credentials. The check is bounded by the request timeout.
	pub async fn refresh_connection_state(&self, id: &CredentialId) -> ConnectionState {
		let check = common::with_timeout(self.config.request_timeout, "connection_check", async {
			let identifier = self
				.registry
				.identifier(id)
				.ok_or_else(|| Error::UnknownIdentifier { id: id.clone() })?;

			if let Some(session) = identifier.sso_session() {
				return Ok(self.tokens.resolve_silent(&session.cache_key()).await?.is_some());
			}

			self.resolve(id, None).await?.secret().await.map(|_| true)
		})
		.await;
		let state = match check {
			Ok(true) => ConnectionState::ValidConnection,
			Ok(false) => ConnectionState::InvalidConnection,
			Err(e) => {
				tracing::debug!(%id, error = %e, "Connection check failed.");

				ConnectionState::InvalidConnection
			},
		};

		self.states.write().insert(id.clone(), state);

		state
	}

	fn default_region(&self, id: &CredentialId) -> Result<Region> {
		self.registry
			.identifier(id)
			.ok_or_else(|| Error::UnknownIdentifier { id: id.clone() })?
			.default_region
			.or_else(|| self.config.default_region.clone())
			.ok_or_else(|| ConfigError::MissingRegion { id: id.clone() }.into())
	}
}
impl Debug for ToolkitContext {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ToolkitContext")
			.field("registry", &self.registry)
			.field("clients", &self.clients)
			.field("pinning", &self.pinning)
			.finish()
	}
}

#[cfg(feature = "reqwest")]
fn default_oidc(config: &BrokerConfig) -> Result<Arc<dyn OidcClient>> {
	Ok(Arc::new(crate::oidc::ReqwestOidcClient::new(config)?))
}

#[cfg(not(feature = "reqwest"))]
fn default_oidc(_: &BrokerConfig) -> Result<Arc<dyn OidcClient>> {
	Err(ConfigError::MissingComponent { component: "OIDC client" }.into())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{FakeExchanger, FakeOidcClient, RecordingPrompt, region, temp_path},
		identity::{InMemoryProfileSource, ProfileSet},
	};

	fn context(set: ProfileSet) -> ToolkitContext {
		let mut config = BrokerConfig::default();

		config.default_region = Some(region("us-east-1"));

		ToolkitContext::builder(config)
			.oidc_client(Arc::new(FakeOidcClient::default()))
			.prompt(Arc::new(RecordingPrompt::default()))
			.exchanger(Arc::new(FakeExchanger::default()))
			.profile_source(Arc::new(InMemoryProfileSource::new(set)))
			.build()
			.expect("Context should build.")
	}

	#[test]
	fn profile_source_requires_an_exchanger() {
		let result = ToolkitContext::builder(BrokerConfig::default())
			.oidc_client(Arc::new(FakeOidcClient::default()))
			.profile_source(Arc::new(InMemoryProfileSource::default()))
			.build();

		assert!(matches!(
			result,
			Err(Error::Config(ConfigError::MissingComponent { component: "credential exchanger" }))
		));
	}

	#[tokio::test]
	async fn connection_state_follows_checks_and_registry_changes() {
		let context = context(ProfileSet::default().with_profile(
			"dev",
			[("aws_access_key_id", "AKIADEV"), ("aws_secret_access_key", "secret")],
		));
		let id = CredentialId::new("profile:dev").expect("Credential fixture should be valid.");

		assert_eq!(context.connection_state(&id), ConnectionState::Initializing);
		assert_eq!(context.refresh_connection_state(&id).await, ConnectionState::ValidConnection);
		assert_eq!(context.connection_state(&id), ConnectionState::ValidConnection);

		assert!(context.registry().remove_identifier(&id));
		assert_eq!(context.connection_state(&id), ConnectionState::Initializing);
		assert_eq!(context.refresh_connection_state(&id).await, ConnectionState::InvalidConnection);
	}

	#[tokio::test]
	async fn sso_sessions_without_tokens_are_invalid_and_never_prompt() {
		let prompt = Arc::new(RecordingPrompt::default());
		let context = ToolkitContext::builder(BrokerConfig::default())
			.oidc_client(Arc::new(FakeOidcClient::default()))
			.prompt(prompt.clone())
			.exchanger(Arc::new(FakeExchanger::default()))
			.profile_source(Arc::new(InMemoryProfileSource::new(ProfileSet::default().with_sso_session(
				"work",
				[("sso_start_url", "https://d-1.awsapps.com/start"), ("sso_region", "us-east-1")],
			))))
			.build()
			.expect("Context should build.");
		let id = CredentialId::new("sso-session:work").expect("Credential fixture should be valid.");

		assert_eq!(context.refresh_connection_state(&id).await, ConnectionState::InvalidConnection);
		assert_eq!(prompt.prompts(), 0);
	}

	#[tokio::test]
	async fn sign_out_after_a_restart_removes_the_persisted_token() {
		let dir = temp_path("context_sign_out");
		let set = ProfileSet::default()
			.with_sso_session("corp", [
				("sso_start_url", "https://d-2.awsapps.com/start"),
				("sso_region", "us-east-1"),
			])
			.with_profile("tooling", [
				("sso_session", "corp"),
				("sso_account_id", "123456789012"),
				("sso_role_name", "Dev"),
			]);
		let session = CredentialId::new("sso-session:corp").expect("Credential fixture should be valid.");
		let role = CredentialId::new("profile:tooling").expect("Credential fixture should be valid.");
		let build = |prompt: Arc<RecordingPrompt>| {
			ToolkitContext::builder(BrokerConfig::default())
				.oidc_client(Arc::new(FakeOidcClient::default()))
				.prompt(prompt)
				.exchanger(Arc::new(FakeExchanger::default()))
				.token_cache(Arc::new(FileTokenCache::open(&dir).expect("Cache directory should open.")))
				.profile_source(Arc::new(InMemoryProfileSource::new(set.clone())))
				.build()
				.expect("Context should build.")
		};
		let first = Arc::new(RecordingPrompt::default());

		build(first.clone())
			.resolve(&session, None)
			.await
			.expect("Connection should resolve.")
			.secret()
			.await
			.expect("Login should succeed.");

		assert_eq!(first.prompts(), 1);

		let prompt = Arc::new(RecordingPrompt::default());
		let restarted = build(prompt.clone());
		let key = restarted
			.registry()
			.identifier(&role)
			.and_then(|identifier| identifier.sso_session().map(|session| session.cache_key()))
			.expect("Role profile should be bound to its session.");
		let disk = FileTokenCache::open(&dir).expect("Cache directory should open.");

		assert!(disk.token_path(&key).exists());
		assert!(restarted.tokens().bound_identities(&key).contains(&role));
		assert_eq!(restarted.invalidate(&role).await.expect("Sign-out should succeed."), 1);
		assert!(!disk.token_path(&key).exists());
		assert_eq!(
			restarted.refresh_connection_state(&session).await,
			ConnectionState::InvalidConnection,
			"The old token must not be served after sign-out."
		);
		assert_eq!(prompt.prompts(), 0);

		let _ = std::fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn sign_out_of_unknown_or_static_connections() {
		let context = context(ProfileSet::default().with_profile(
			"dev",
			[("aws_access_key_id", "AKIADEV"), ("aws_secret_access_key", "secret")],
		));
		let dev = CredentialId::new("profile:dev").expect("Credential fixture should be valid.");
		let ghost = CredentialId::new("profile:ghost").expect("Credential fixture should be valid.");

		assert_eq!(context.invalidate(&dev).await.expect("Static sign-out should succeed."), 0);
		assert!(matches!(context.invalidate(&ghost).await, Err(Error::UnknownIdentifier { .. })));
	}
}
