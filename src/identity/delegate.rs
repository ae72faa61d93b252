//! Secret delegates backing resolved providers.

// crates.io
use async_lock::Mutex as AsyncMutex;
// self
use crate::{
	_prelude::*,
	auth::{AwsCredentials, CredentialId, Region, TokenSecret},
	flows::BearerTokenProvider,
	identity::{
		AssumeRoleRequest, ResolvedProvider, Secret, SecretDelegate, SecretFuture,
		SsoSessionIdentifier,
	},
};

const ASSUMED_ROLE_REUSE_WINDOW: Duration = Duration::minutes(5);

/// Boxed future returned by [`CredentialExchanger`] operations.
pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Result<AwsCredentials>> + 'a + Send>>;

/// Seam to the services that turn one credential into another.
///
/// Implementations report failures as [`Error::CredentialExchange`] or a transport error.
pub trait CredentialExchanger
where
	Self: Send + Sync,
{
	/// Assumes `request.role_arn` with `source` credentials.
	fn assume_role<'a>(
		&'a self,
		source: &'a AwsCredentials,
		request: &'a AssumeRoleRequest,
		region: &'a Region,
	) -> ExchangeFuture<'a>;

	/// Runs a credential process and parses its output.
	fn run_process<'a>(&'a self, command: &'a str) -> ExchangeFuture<'a>;

	/// Mints role credentials for `account_id`/`role_name` with an SSO access token.
	fn sso_role_credentials<'a>(
		&'a self,
		token: &'a TokenSecret,
		account_id: &'a str,
		role_name: &'a str,
		region: &'a Region,
	) -> ExchangeFuture<'a>;
}

/// Hands out fixed credentials.
#[derive(Clone, Debug)]
pub struct StaticDelegate(AwsCredentials);
impl StaticDelegate {
	/// Wraps `credentials`.
	pub fn new(credentials: AwsCredentials) -> Self {
		Self(credentials)
	}
}
impl SecretDelegate for StaticDelegate {
	fn secret(&self) -> SecretFuture<'_> {
		Box::pin(async move { Ok(Secret::Credentials(self.0.clone())) })
	}
}

/// Assumes a role with the credentials of an already resolved source provider.
///
/// Assumed credentials are reused until five minutes before they expire.
pub struct AssumeRoleDelegate {
	id: CredentialId,
	source: ResolvedProvider,
	request: AssumeRoleRequest,
	region: Region,
	exchanger: Arc<dyn CredentialExchanger>,
	cached: AsyncMutex<Option<AwsCredentials>>,
}
impl AssumeRoleDelegate {
	/// Creates a delegate for identity `id`.
	pub fn new(
		id: CredentialId,
		source: ResolvedProvider,
		request: AssumeRoleRequest,
		region: Region,
		exchanger: Arc<dyn CredentialExchanger>,
	) -> Self {
		Self { id, source, request, region, exchanger, cached: AsyncMutex::new(None) }
	}
}
impl SecretDelegate for AssumeRoleDelegate {
	fn secret(&self) -> SecretFuture<'_> {
		Box::pin(async move {
			let mut cached = self.cached.lock().await;
			let now = OffsetDateTime::now_utc();

			if let Some(credentials) = cached
				.as_ref()
				.filter(|credentials| !credentials.expires_within(now, ASSUMED_ROLE_REUSE_WINDOW))
			{
				return Ok(Secret::Credentials(credentials.clone()));
			}

			let source = match self.source.secret().await? {
				Secret::Credentials(credentials) => credentials,
				Secret::Token(_) =>
					return Err(Error::CredentialExchange {
						id: self.id.clone(),
						reason: format!(
							"source `{}` yields a bearer token, not AWS credentials",
							self.source.identifier().id
						),
					}),
			};
			let assumed = self.exchanger.assume_role(&source, &self.request, &self.region).await?;

			tracing::debug!(id = %self.id, role_arn = %self.request.role_arn, "Assumed role.");

			*cached = Some(assumed.clone());

			Ok(Secret::Credentials(assumed))
		})
	}
}

/// Runs an external credential process on every request.
pub struct ProcessDelegate {
	command: String,
	exchanger: Arc<dyn CredentialExchanger>,
}
impl ProcessDelegate {
	/// Creates a delegate running `command`.
	pub fn new(command: impl Into<String>, exchanger: Arc<dyn CredentialExchanger>) -> Self {
		Self { command: command.into(), exchanger }
	}
}
impl SecretDelegate for ProcessDelegate {
	fn secret(&self) -> SecretFuture<'_> {
		Box::pin(async move {
			self.exchanger.run_process(&self.command).await.map(Secret::Credentials)
		})
	}
}

/// Mints role credentials from the bearer token of an SSO session.
pub struct SsoRoleDelegate {
	id: CredentialId,
	session: SsoSessionIdentifier,
	account_id: String,
	role_name: String,
	tokens: Arc<BearerTokenProvider>,
	exchanger: Arc<dyn CredentialExchanger>,
}
impl SsoRoleDelegate {
	/// Creates a delegate for identity `id`.
	pub fn new(
		id: CredentialId,
		session: SsoSessionIdentifier,
		account_id: impl Into<String>,
		role_name: impl Into<String>,
		tokens: Arc<BearerTokenProvider>,
		exchanger: Arc<dyn CredentialExchanger>,
	) -> Self {
		Self {
			id,
			session,
			account_id: account_id.into(),
			role_name: role_name.into(),
			tokens,
			exchanger,
		}
	}
}
impl SecretDelegate for SsoRoleDelegate {
	fn secret(&self) -> SecretFuture<'_> {
		Box::pin(async move {
			let token = self.tokens.resolve_token_for(&self.id, &self.session).await?;

			self.exchanger
				.sso_role_credentials(
					&token.access_token,
					&self.account_id,
					&self.role_name,
					&self.session.sso_region,
				)
				.await
				.map(Secret::Credentials)
		})
	}
}

/// Yields the bearer token of an SSO session connection.
pub struct BearerDelegate {
	id: CredentialId,
	session: SsoSessionIdentifier,
	tokens: Arc<BearerTokenProvider>,
}
impl BearerDelegate {
	/// Creates a delegate for connection `id`.
	pub fn new(
		id: CredentialId,
		session: SsoSessionIdentifier,
		tokens: Arc<BearerTokenProvider>,
	) -> Self {
		Self { id, session, tokens }
	}
}
impl SecretDelegate for BearerDelegate {
	fn secret(&self) -> SecretFuture<'_> {
		Box::pin(async move {
			self.tokens.resolve_token_for(&self.id, &self.session).await.map(Secret::Token)
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::Ordering;
	// self
	use super::*;
	use crate::{
		_preludet::{FakeExchanger, fixture_credentials, region},
		auth::FactoryId,
		identity::CredentialIdentifier,
	};

	fn source_provider() -> ResolvedProvider {
		let identifier = CredentialIdentifier::static_profile(
			CredentialId::new("profile:base").expect("Credential fixture should be valid."),
			FactoryId::new("profile").expect("Factory fixture should be valid."),
		);

		ResolvedProvider::new(
			identifier,
			region("us-east-1"),
			Arc::new(StaticDelegate::new(fixture_credentials("base"))),
		)
	}

	#[tokio::test]
	async fn assumed_credentials_are_reused_until_near_expiry() {
		let exchanger = Arc::new(FakeExchanger::default());
		let delegate = AssumeRoleDelegate::new(
			CredentialId::new("profile:admin").expect("Credential fixture should be valid."),
			source_provider(),
			AssumeRoleRequest::new("arn:aws:iam::123456789012:role/admin"),
			region("us-east-1"),
			exchanger.clone(),
		);
		let first = delegate.secret().await.expect("First exchange should succeed.");
		let second = delegate.secret().await.expect("Second exchange should succeed.");

		assert_eq!(first, second);
		assert_eq!(exchanger.assume_role_calls.load(Ordering::SeqCst), 1);

		let Secret::Credentials(credentials) = first else {
			panic!("Assume-role delegates must yield credentials.");
		};

		assert!(credentials.access_key_id.ends_with("via-AKIABASE"));
	}
}
