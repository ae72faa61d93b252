// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use tokio_util::sync::CancellationToken;
// self
use aws_identity_broker::{
	_preludet::*,
	auth::{BearerToken, CredentialId, ScopeSet, TokenSecret},
	config::BrokerConfig,
	flows::{BearerTokenProvider, DeviceCodePrompt, DeviceCodePromptDetails, TokenEvent, TokenState},
	oidc::DevicePoll,
	store::{CacheKey, FileTokenCache, MemoryTokenCache, TokenCache},
};

fn key(scopes: &[&str]) -> CacheKey {
	CacheKey::new(
		region("us-east-1"),
		Url::parse("https://d-12345.awsapps.com/start").expect("Start URL should parse."),
		ScopeSet::new(scopes.iter().copied()).expect("Scope fixture should be valid."),
	)
}

/// Cancels the first prompt it sees and lets later ones through.
#[derive(Default)]
struct CancelOncePrompt {
	cancelled: AtomicBool,
}
impl DeviceCodePrompt for CancelOncePrompt {
	fn display(&self, _: &DeviceCodePromptDetails, cancel: CancellationToken) {
		if !self.cancelled.swap(true, Ordering::SeqCst) {
			cancel.cancel();
		}
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolutions_share_one_device_flow() {
	let oidc = Arc::new(FakeOidcClient::default());
	let prompt = Arc::new(RecordingPrompt::default());

	// Keep the flow pending long enough for every caller to join it.
	for _ in 0..5 {
		oidc.push_poll(Ok(DevicePoll::Pending));
	}

	let provider = Arc::new(BearerTokenProvider::new(
		oidc.clone(),
		Arc::new(MemoryTokenCache::default()),
		prompt.clone(),
		BrokerConfig::default(),
	));
	let handles = (0..8)
		.map(|_| {
			let provider = provider.clone();

			tokio::spawn(async move { provider.resolve_token(&key(&["sso:account:access"])).await })
		})
		.collect::<Vec<_>>();
	let mut tokens = Vec::new();

	for handle in handles {
		tokens.push(
			handle
				.await
				.expect("Resolution task should not panic.")
				.expect("Every caller should receive a token."),
		);
	}

	assert!(tokens.windows(2).all(|pair| pair[0] == pair[1]), "All callers must share one token.");
	assert_eq!(oidc.authorizations.load(Ordering::SeqCst), 1);
	assert_eq!(oidc.registrations.load(Ordering::SeqCst), 1);
	assert_eq!(prompt.prompts(), 1);
}

#[tokio::test]
async fn cancelled_flow_releases_the_slot_and_leaves_the_cache_untouched() {
	let oidc = Arc::new(FakeOidcClient::default());
	let cache = Arc::new(MemoryTokenCache::default());
	let provider = BearerTokenProvider::new(
		oidc.clone(),
		cache.clone(),
		Arc::new(CancelOncePrompt::default()),
		BrokerConfig::default(),
	);
	let key = key(&["sso:account:access"]);

	assert!(matches!(provider.resolve_token(&key).await, Err(Error::Cancelled)));
	assert_eq!(cache.token_count(), 0);
	assert_eq!(oidc.polls.load(Ordering::SeqCst), 0);
	assert!(!provider.cancel(&key), "Nothing should be pending after cancellation.");

	provider.resolve_token(&key).await.expect("A fresh attempt should succeed.");

	assert_eq!(cache.token_count(), 1);
	assert_eq!(oidc.authorizations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn superset_scopes_are_a_cache_miss() {
	let oidc = Arc::new(FakeOidcClient::default());
	let provider = BearerTokenProvider::new(
		oidc.clone(),
		Arc::new(MemoryTokenCache::default()),
		Arc::new(RecordingPrompt::default()),
		BrokerConfig::default(),
	);
	let narrow = provider
		.resolve_token(&key(&["sso:account:access"]))
		.await
		.expect("Narrow login should succeed.");
	let wide = provider
		.resolve_token(&key(&["codewhisperer:completions", "sso:account:access"]))
		.await
		.expect("Wide login should succeed.");

	assert_ne!(narrow, wide);
	assert_eq!(oidc.authorizations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expired_disk_entry_without_refresh_token_starts_a_new_login() {
	let dir = temp_path("device_flow_expired");
	let cache = Arc::new(FileTokenCache::open(&dir).expect("Cache directory should open."));
	let key = key(&["sso:account:access"]);
	let stale = BearerToken::issued(
		TokenSecret::new("stale"),
		None,
		OffsetDateTime::now_utc() - Duration::hours(2),
		Duration::hours(1),
	);

	cache.save_token(&key, &stale).await.expect("Stale token should be saved.");

	let oidc = Arc::new(FakeOidcClient::default());
	let prompt = Arc::new(RecordingPrompt::default());
	let provider =
		BearerTokenProvider::new(oidc.clone(), cache.clone(), prompt.clone(), BrokerConfig::default());
	let token = provider.resolve_token(&key).await.expect("New login should succeed.");

	assert_ne!(token, stale);
	assert_eq!(prompt.prompts(), 1);
	assert_eq!(oidc.refreshes.load(Ordering::SeqCst), 0);
	assert_eq!(cache.load_token(&key).await.expect("Cache read should succeed."), Some(token));

	let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn invalidation_names_bound_identities_and_clears_disk() {
	let dir = temp_path("device_flow_invalidate");
	let cache = Arc::new(FileTokenCache::open(&dir).expect("Cache directory should open."));
	let provider = BearerTokenProvider::new(
		Arc::new(FakeOidcClient::default()),
		cache.clone(),
		Arc::new(RecordingPrompt::default()),
		BrokerConfig::default(),
	);
	let key = key(&["sso:account:access"]);
	let identity = CredentialId::new("sso-session:work").expect("Credential fixture should be valid.");
	let events = Arc::new(Mutex::new(Vec::new()));
	let sink = events.clone();
	let _subscription = provider.subscribe(move |event: &TokenEvent| sink.lock().push(event.clone()));

	provider.resolve_token(&key).await.expect("Login should succeed.");
	provider.bind(&identity, &key);

	assert!(cache.token_path(&key).exists());
	assert_eq!(provider.invalidate(&identity).await, 1);
	assert!(!cache.token_path(&key).exists());
	assert_eq!(provider.state(&key), TokenState::NoToken);

	let events = events.lock();

	assert!(matches!(events.first(), Some(TokenEvent::Refreshed { .. })));
	assert!(
		matches!(events.last(), Some(TokenEvent::Invalidated { identities, .. }) if identities == &[identity.clone()])
	);

	let _ = std::fs::remove_dir_all(dir);
}
