//! Credential identifiers, the factory contract, and live resolved providers.
//!
//! An identifier names a potential credential source without holding secrets. Factories own
//! discovery and resolution for the identifiers they announce; the registry routes between
//! them. A [`ResolvedProvider`] is the short-lived handle that can actually produce a secret.

pub mod delegate;
pub mod factory;
pub mod profile;

pub use delegate::*;
pub use factory::*;
pub use profile::*;

// std
use std::sync::atomic::{AtomicBool, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{AwsCredentials, BearerToken, CredentialId, FactoryId, Region, ScopeSet},
	store::CacheKey,
};

/// Operations shared by every identity-bearing value.
pub trait Identity {
	/// Globally unique identifier.
	fn id(&self) -> &CredentialId;

	/// Human-readable label.
	fn display_name(&self) -> &str;

	/// Region used when the caller does not supply one.
	fn default_region(&self) -> Option<&Region>;
}

/// Closed set of credential source kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
	/// Long-lived access keys.
	Static,
	/// Role assumed through another identity.
	AssumeRole,
	/// External credential process.
	Process,
	/// Role credentials minted from an SSO bearer token.
	SsoRole,
	/// The SSO bearer-token connection itself.
	SsoSession,
}
impl CredentialKind {
	/// Stable label for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialKind::Static => "static",
			CredentialKind::AssumeRole => "assume_role",
			CredentialKind::Process => "process",
			CredentialKind::SsoRole => "sso_role",
			CredentialKind::SsoSession => "sso_session",
		}
	}

	/// Returns true when the kind yields a bearer token instead of AWS credentials.
	pub const fn is_bearer(self) -> bool {
		matches!(self, CredentialKind::SsoSession)
	}
}
impl Display for CredentialKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Parameters of an assume-role exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssumeRoleRequest {
	/// ARN of the role to assume.
	pub role_arn: String,
	/// External id required by the role's trust policy.
	pub external_id: Option<String>,
	/// Session name recorded by the service.
	pub role_session_name: Option<String>,
	/// Requested session lifetime.
	pub duration: Option<Duration>,
}
impl AssumeRoleRequest {
	/// Creates a request for `role_arn` with service defaults.
	pub fn new(role_arn: impl Into<String>) -> Self {
		Self { role_arn: role_arn.into(), external_id: None, role_session_name: None, duration: None }
	}
}

/// SSO session: the bearer-token connection shared by every role profile that references it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SsoSessionIdentifier {
	/// Connection id (`sso-session:<name>` or `sso-legacy:<profile>`).
	pub id: CredentialId,
	/// Issuer URL.
	pub start_url: Url,
	/// Region of the OIDC service.
	pub sso_region: Region,
	/// Registration scopes; order is irrelevant.
	pub scopes: ScopeSet,
}
impl SsoSessionIdentifier {
	/// Bearer-token cache key of the session.
	pub fn cache_key(&self) -> CacheKey {
		CacheKey::new(self.sso_region.clone(), self.start_url.clone(), self.scopes.clone())
	}
}

/// Non-secret description of where an identifier's secret comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
	/// Access keys read from the owning factory at resolve time.
	Static,
	/// Credentials obtained by assuming a role with another identity.
	AssumeRole {
		/// Identity whose credentials sign the exchange.
		source: CredentialId,
		/// Exchange parameters.
		request: AssumeRoleRequest,
	},
	/// Credentials printed by an external command.
	Process {
		/// Command line to run.
		command: String,
	},
	/// Role credentials minted with an SSO bearer token.
	SsoRole {
		/// Session providing the bearer token.
		session: SsoSessionIdentifier,
		/// Target account.
		account_id: String,
		/// Target permission set.
		role_name: String,
	},
	/// The SSO session connection itself.
	SsoSession(SsoSessionIdentifier),
}
impl CredentialSource {
	/// Discriminant of the source.
	pub fn kind(&self) -> CredentialKind {
		match self {
			CredentialSource::Static => CredentialKind::Static,
			CredentialSource::AssumeRole { .. } => CredentialKind::AssumeRole,
			CredentialSource::Process { .. } => CredentialKind::Process,
			CredentialSource::SsoRole { .. } => CredentialKind::SsoRole,
			CredentialSource::SsoSession(_) => CredentialKind::SsoSession,
		}
	}
}

/// Stable handle naming a potential credential source.
///
/// Equality and hashing use `id` only; [`CredentialIdentifier::same_definition`] compares the
/// whole value.
#[derive(Clone, Debug)]
pub struct CredentialIdentifier {
	/// Globally unique id.
	pub id: CredentialId,
	/// Label shown in lists.
	pub display_name: String,
	/// Compact label shown in status bars.
	pub short_name: String,
	/// Factory that owns the identifier.
	pub factory_id: FactoryId,
	/// Region used when the caller does not supply one.
	pub default_region: Option<Region>,
	/// Where the secret comes from.
	pub source: CredentialSource,
}
impl CredentialIdentifier {
	/// Creates an identifier labeled by its id.
	pub fn new(id: CredentialId, factory_id: FactoryId, source: CredentialSource) -> Self {
		let display_name = id.to_string();
		let short_name = display_name
			.split_once(':')
			.map(|(_, name)| name.to_owned())
			.unwrap_or_else(|| display_name.clone());

		Self { id, display_name, short_name, factory_id, default_region: None, source }
	}

	/// Creates a static-key identifier.
	pub fn static_profile(id: CredentialId, factory_id: FactoryId) -> Self {
		Self::new(id, factory_id, CredentialSource::Static)
	}

	/// Overrides the display name.
	pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
		self.display_name = name.into();

		self
	}

	/// Overrides the short name.
	pub fn with_short_name(mut self, name: impl Into<String>) -> Self {
		self.short_name = name.into();

		self
	}

	/// Sets the default region.
	pub fn with_default_region(mut self, region: Option<Region>) -> Self {
		self.default_region = region;

		self
	}

	/// Kind discriminant.
	pub fn kind(&self) -> CredentialKind {
		self.source.kind()
	}

	/// Identity this one chains through, if any.
	pub fn source_id(&self) -> Option<&CredentialId> {
		match &self.source {
			CredentialSource::AssumeRole { source, .. } => Some(source),
			_ => None,
		}
	}

	/// SSO session backing the identifier, if any.
	pub fn sso_session(&self) -> Option<&SsoSessionIdentifier> {
		match &self.source {
			CredentialSource::SsoRole { session, .. } | CredentialSource::SsoSession(session) =>
				Some(session),
			_ => None,
		}
	}

	/// Returns true when every field matches, not just the id.
	pub fn same_definition(&self, other: &Self) -> bool {
		self.id == other.id
			&& self.display_name == other.display_name
			&& self.short_name == other.short_name
			&& self.factory_id == other.factory_id
			&& self.default_region == other.default_region
			&& self.source == other.source
	}
}
impl PartialEq for CredentialIdentifier {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}
impl Eq for CredentialIdentifier {}
impl Hash for CredentialIdentifier {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}
impl Identity for CredentialIdentifier {
	fn id(&self) -> &CredentialId {
		&self.id
	}

	fn display_name(&self) -> &str {
		&self.display_name
	}

	fn default_region(&self) -> Option<&Region> {
		self.default_region.as_ref()
	}
}

/// Secret material yielded by a resolved provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Secret {
	/// AWS signing credentials.
	Credentials(AwsCredentials),
	/// OAuth bearer token.
	Token(BearerToken),
}

/// Boxed future returned by [`SecretDelegate::secret`].
pub type SecretFuture<'a> = Pin<Box<dyn Future<Output = Result<Secret>> + 'a + Send>>;

/// Produces the secret behind a resolved provider on demand.
pub trait SecretDelegate
where
	Self: Send + Sync,
{
	/// Returns current secret material, refreshing it if needed.
	fn secret(&self) -> SecretFuture<'_>;
}

/// Live, short-lived wrapper around secret material; never persisted.
///
/// Providers handed out by the registry remember the definitions they were resolved from and
/// stop being [current](ResolvedProvider::is_current) once any of them is removed or replaced.
#[derive(Clone)]
pub struct ResolvedProvider {
	identifier: CredentialIdentifier,
	region: Region,
	delegate: Arc<dyn SecretDelegate>,
	revocations: Vec<Arc<AtomicBool>>,
}
impl ResolvedProvider {
	/// Wraps `delegate` for `identifier` in `region`.
	pub fn new(
		identifier: CredentialIdentifier,
		region: Region,
		delegate: Arc<dyn SecretDelegate>,
	) -> Self {
		Self { identifier, region, delegate, revocations: Vec::new() }
	}

	/// Ties the provider to the revocation flags of the definitions it was built from.
	pub(crate) fn revoked_by(mut self, flags: impl IntoIterator<Item = Arc<AtomicBool>>) -> Self {
		self.revocations.extend(flags);

		self
	}

	/// Returns false once an identifier in the provider's chain was removed or redefined.
	pub fn is_current(&self) -> bool {
		!self.revocations.iter().any(|flag| flag.load(Ordering::Acquire))
	}

	/// Identifier the provider was resolved from.
	pub fn identifier(&self) -> &CredentialIdentifier {
		&self.identifier
	}

	/// Region the provider was resolved for.
	pub fn region(&self) -> &Region {
		&self.region
	}

	/// Current secret material.
	pub async fn secret(&self) -> Result<Secret> {
		self.delegate.secret().await
	}

	/// Current AWS credentials; bearer-token providers fail.
	pub async fn credentials(&self) -> Result<AwsCredentials> {
		match self.secret().await? {
			Secret::Credentials(credentials) => Ok(credentials),
			Secret::Token(_) => Err(Error::CredentialExchange {
				id: self.identifier.id.clone(),
				reason: "identity yields a bearer token, not AWS credentials".into(),
			}),
		}
	}

	/// Current bearer token; credential providers fail.
	pub async fn token(&self) -> Result<BearerToken> {
		match self.secret().await? {
			Secret::Token(token) => Ok(token),
			Secret::Credentials(_) => Err(Error::CredentialExchange {
				id: self.identifier.id.clone(),
				reason: "identity yields AWS credentials, not a bearer token".into(),
			}),
		}
	}
}
impl PartialEq for ResolvedProvider {
	fn eq(&self, other: &Self) -> bool {
		self.identifier == other.identifier
	}
}
impl Eq for ResolvedProvider {}
impl Identity for ResolvedProvider {
	fn id(&self) -> &CredentialId {
		&self.identifier.id
	}

	fn display_name(&self) -> &str {
		&self.identifier.display_name
	}

	fn default_region(&self) -> Option<&Region> {
		Some(&self.region)
	}
}
impl Debug for ResolvedProvider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResolvedProvider")
			.field("id", &self.identifier.id)
			.field("region", &self.region)
			.field("current", &self.is_current())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn id(value: &str) -> CredentialId {
		CredentialId::new(value).expect("Credential fixture should be valid.")
	}

	fn factory() -> FactoryId {
		FactoryId::new("profile").expect("Factory fixture should be valid.")
	}

	#[test]
	fn equality_uses_id_only() {
		let a = CredentialIdentifier::static_profile(id("profile:dev"), factory());
		let b = a.clone().with_display_name("Development");

		assert_eq!(a, b);
		assert!(!a.same_definition(&b));
		assert_eq!(a.short_name, "dev");
	}

	#[test]
	fn chained_identifier_exposes_source() {
		let chained = CredentialIdentifier::new(
			id("profile:admin"),
			factory(),
			CredentialSource::AssumeRole {
				source: id("profile:base"),
				request: AssumeRoleRequest::new("arn:aws:iam::123456789012:role/admin"),
			},
		);

		assert_eq!(chained.kind(), CredentialKind::AssumeRole);
		assert_eq!(chained.source_id(), Some(&id("profile:base")));
		assert!(chained.sso_session().is_none());
	}
}
