//! Credential and connection resolution core for tooling that talks to many AWS accounts and
//! regions over a long-lived session.
//!
//! The crate wires four cooperating services behind one explicit [`context::ToolkitContext`]:
//! a pluggable identity [`registry`], a device-grant [`flows::BearerTokenProvider`] with a shared
//! disk cache, feature-to-connection [`pinning`], and an invalidation-aware [`client`] cache.

#![deny(clippy::all, missing_docs)]
#![cfg_attr(not(test), deny(unused_crate_dependencies))]

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod event;
pub mod flows;
pub mod http;
pub mod identity;
pub mod obs;
pub mod oidc;
pub mod pinning;
pub mod provider;
pub mod registry;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fakes for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use tokio_util::sync::CancellationToken;
	// self
	use crate::{
		auth::{AwsCredentials, CredentialId, FactoryId, Region, ScopeSet, TokenSecret},
		flows::{DeviceCodePrompt, DeviceCodePromptDetails},
		identity::{
			AssumeRoleRequest, ChangeCallback, CredentialExchanger, CredentialIdentifier,
			ExchangeFuture, IdentifierChange, ProviderFactory, ResolveFuture, ResolvedProvider,
			StaticDelegate,
		},
		oidc::{ClientRegistration, DeviceAuthorization, DevicePoll, OidcClient, OidcFuture, TokenGrant},
	};

	/// Scriptable in-process [`OidcClient`] that counts every call it receives.
	#[derive(Debug, Default)]
	pub struct FakeOidcClient {
		/// Number of dynamic client registrations performed.
		pub registrations: AtomicUsize,
		/// Number of device authorizations started.
		pub authorizations: AtomicUsize,
		/// Number of token polls performed.
		pub polls: AtomicUsize,
		/// Number of refresh exchanges performed.
		pub refreshes: AtomicUsize,
		poll_script: Mutex<VecDeque<Result<DevicePoll>>>,
		refresh_script: Mutex<VecDeque<Result<TokenGrant>>>,
		grant_counter: AtomicUsize,
		authorization_window: Option<(Duration, Duration)>,
	}
	impl FakeOidcClient {
		/// Issues device codes valid for `expires_in` and polled every `interval`.
		pub fn with_authorization_window(mut self, expires_in: Duration, interval: Duration) -> Self {
			self.authorization_window = Some((expires_in, interval));

			self
		}

		/// Queues a poll outcome; once the script is empty every poll is granted.
		pub fn push_poll(&self, outcome: Result<DevicePoll>) {
			self.poll_script.lock().push_back(outcome);
		}

		/// Queues a refresh outcome; once the script is empty every refresh succeeds.
		pub fn push_refresh(&self, outcome: Result<TokenGrant>) {
			self.refresh_script.lock().push_back(outcome);
		}

		fn next_grant(&self, prefix: &str) -> TokenGrant {
			let n = self.grant_counter.fetch_add(1, Ordering::SeqCst);

			TokenGrant {
				access_token: TokenSecret::new(format!("{prefix}-access-{n}")),
				refresh_token: Some(TokenSecret::new(format!("{prefix}-refresh-{n}"))),
				expires_in: Duration::hours(1),
			}
		}
	}
	impl OidcClient for FakeOidcClient {
		fn register_client<'a>(
			&'a self,
			region: &'a Region,
			_scopes: &'a ScopeSet,
		) -> OidcFuture<'a, ClientRegistration> {
			Box::pin(async move {
				self.registrations.fetch_add(1, Ordering::SeqCst);

				Ok(ClientRegistration {
					region: region.clone(),
					client_id: format!("client-{region}"),
					client_secret: TokenSecret::new("client-secret"),
					expires_at: Some(OffsetDateTime::now_utc() + Duration::days(90)),
				})
			})
		}

		fn start_device_authorization<'a>(
			&'a self,
			_registration: &'a ClientRegistration,
			start_url: &'a Url,
			_scopes: &'a ScopeSet,
		) -> OidcFuture<'a, DeviceAuthorization> {
			Box::pin(async move {
				self.authorizations.fetch_add(1, Ordering::SeqCst);
				// Give concurrent callers a chance to pile up behind the in-flight flow.
				tokio::task::yield_now().await;

				let (expires_in, interval) =
					self.authorization_window.unwrap_or((Duration::minutes(10), Duration::ZERO));

				Ok(DeviceAuthorization {
					device_code: TokenSecret::new("device-code"),
					user_code: "ABCD-EFGH".into(),
					verification_uri: start_url.clone(),
					verification_uri_complete: None,
					expires_in,
					interval: Some(interval),
				})
			})
		}

		fn poll_device_token<'a>(
			&'a self,
			_registration: &'a ClientRegistration,
			_authorization: &'a DeviceAuthorization,
		) -> OidcFuture<'a, DevicePoll> {
			Box::pin(async move {
				self.polls.fetch_add(1, Ordering::SeqCst);

				let scripted = self.poll_script.lock().pop_front();

				match scripted {
					Some(outcome) => outcome,
					None => Ok(DevicePoll::Granted(self.next_grant("device"))),
				}
			})
		}

		fn refresh_token<'a>(
			&'a self,
			_registration: &'a ClientRegistration,
			_refresh_token: &'a TokenSecret,
			_scopes: &'a ScopeSet,
		) -> OidcFuture<'a, TokenGrant> {
			Box::pin(async move {
				self.refreshes.fetch_add(1, Ordering::SeqCst);

				let scripted = self.refresh_script.lock().pop_front();

				match scripted {
					Some(outcome) => outcome,
					None => Ok(self.next_grant("refreshed")),
				}
			})
		}
	}

	/// [`DeviceCodePrompt`] that records every prompt and can cancel after a number of prompts.
	#[derive(Debug, Default)]
	pub struct RecordingPrompt {
		/// User codes displayed so far.
		pub user_codes: Mutex<Vec<String>>,
		cancel_immediately: bool,
	}
	impl RecordingPrompt {
		/// Builds a prompt that cancels the flow as soon as it is displayed.
		pub fn cancelling() -> Self {
			Self { user_codes: Mutex::default(), cancel_immediately: true }
		}

		/// Number of prompts displayed.
		pub fn prompts(&self) -> usize {
			self.user_codes.lock().len()
		}
	}
	impl DeviceCodePrompt for RecordingPrompt {
		fn display(&self, details: &DeviceCodePromptDetails, cancel: CancellationToken) {
			self.user_codes.lock().push(details.user_code.clone());

			if self.cancel_immediately {
				cancel.cancel();
			}
		}
	}

	/// Static credentials returned by [`StaticFactory`] resolutions.
	pub fn fixture_credentials(id: &str) -> AwsCredentials {
		AwsCredentials::new(format!("AKIA{}", id.to_uppercase()), format!("secret-{id}"))
	}

	/// Minimal [`ProviderFactory`] that serves static identifiers and exposes its change callback.
	#[derive(Default)]
	pub struct StaticFactory {
		id: Option<FactoryId>,
		callback: Mutex<Option<ChangeCallback>>,
		resolutions: AtomicUsize,
	}
	impl StaticFactory {
		/// Creates a factory registered under `id`.
		pub fn new(id: &str) -> Self {
			Self {
				id: Some(FactoryId::new(id).expect("Factory fixture id should be valid.")),
				..Default::default()
			}
		}

		/// Builds an identifier owned by this factory.
		pub fn identifier(&self, id: &str) -> CredentialIdentifier {
			CredentialIdentifier::static_profile(
				CredentialId::new(id).expect("Credential fixture id should be valid."),
				self.factory_id(),
			)
		}

		/// Announces a delta through the callback installed by the registry.
		pub fn announce(&self, change: IdentifierChange) {
			let callback = self.callback.lock().clone();

			if let Some(callback) = callback {
				callback(change);
			}
		}

		/// Number of resolutions served.
		pub fn resolutions(&self) -> usize {
			self.resolutions.load(Ordering::SeqCst)
		}

		fn factory_id(&self) -> FactoryId {
			self.id.clone().unwrap_or_else(|| {
				FactoryId::new("static").expect("Default factory id should be valid.")
			})
		}
	}
	impl ProviderFactory for StaticFactory {
		fn id(&self) -> FactoryId {
			self.factory_id()
		}

		fn set_up(&self, on_change: ChangeCallback) {
			*self.callback.lock() = Some(on_change);
		}

		fn resolve<'a>(
			&'a self,
			identifier: &'a CredentialIdentifier,
			region: &'a Region,
			_source: Option<ResolvedProvider>,
		) -> ResolveFuture<'a> {
			Box::pin(async move {
				self.resolutions.fetch_add(1, Ordering::SeqCst);

				let delegate = StaticDelegate::new(fixture_credentials(identifier.id.as_ref()));

				Ok(ResolvedProvider::new(identifier.clone(), region.clone(), Arc::new(delegate)))
			})
		}
	}

	/// [`CredentialExchanger`] that derives deterministic credentials from its inputs.
	#[derive(Debug, Default)]
	pub struct FakeExchanger {
		/// Number of assume-role exchanges performed.
		pub assume_role_calls: AtomicUsize,
		/// Number of SSO role-credential exchanges performed.
		pub sso_calls: AtomicUsize,
	}
	impl CredentialExchanger for FakeExchanger {
		fn assume_role<'a>(
			&'a self,
			source: &'a AwsCredentials,
			request: &'a AssumeRoleRequest,
			_region: &'a Region,
		) -> ExchangeFuture<'a> {
			Box::pin(async move {
				self.assume_role_calls.fetch_add(1, Ordering::SeqCst);

				Ok(AwsCredentials::new(
					format!("ASIA-{}-via-{}", request.role_arn, source.access_key_id),
					"assumed-secret",
				)
				.with_expiration(OffsetDateTime::now_utc() + Duration::hours(1)))
			})
		}

		fn run_process<'a>(&'a self, command: &'a str) -> ExchangeFuture<'a> {
			Box::pin(async move { Ok(AwsCredentials::new(format!("PROC-{command}"), "process-secret")) })
		}

		fn sso_role_credentials<'a>(
			&'a self,
			token: &'a TokenSecret,
			account_id: &'a str,
			role_name: &'a str,
			_region: &'a Region,
		) -> ExchangeFuture<'a> {
			Box::pin(async move {
				self.sso_calls.fetch_add(1, Ordering::SeqCst);

				Ok(AwsCredentials::new(
					format!("SSO-{account_id}-{role_name}-{}", token.expose()),
					"sso-secret",
				))
			})
		}
	}

	/// Builds a unique scratch path under the system temp directory.
	pub fn temp_path(label: &str) -> std::path::PathBuf {
		std::env::temp_dir().join(format!(
			"aws_identity_broker_{label}_{}_{}",
			std::process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		))
	}

	/// Parses a region fixture.
	pub fn region(value: &str) -> Region {
		Region::new(value).expect("Region fixture should be valid.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, HashMap, HashSet},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::{Hash, Hasher},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")] pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
