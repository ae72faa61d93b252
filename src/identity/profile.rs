//! Factory that turns raw configuration profiles into identifiers.
//!
//! Reading and parsing the on-disk files is left to a [`ProfileSource`]; this module only
//! classifies the resulting key/value sections. Profiles become `profile:<name>` identifiers and
//! every `[sso-session]` section becomes an `sso-session:<name>` bearer connection. Sections
//! that cannot be classified are logged and skipped so one broken profile never hides the rest.

// self
use crate::{
	_prelude::*,
	auth::{AwsCredentials, CredentialId, FactoryId, Region, ScopeSet},
	error::ConfigError,
	flows::BearerTokenProvider,
	identity::{
		AssumeRoleDelegate, AssumeRoleRequest, BearerDelegate, ChangeCallback,
		CredentialExchanger, CredentialIdentifier, CredentialSource, IdentifierChange,
		ProcessDelegate, ProviderFactory, ResolveFuture, ResolvedProvider, SecretDelegate,
		SsoRoleDelegate, SsoSessionIdentifier, StaticDelegate,
	},
};

const FACTORY_ID: &str = "profile";
const DEFAULT_SSO_SCOPE: &str = "sso:account:access";

/// Raw key/value pairs of one configuration section.
pub type RawSection = BTreeMap<String, String>;

/// Parsed configuration handed over by a [`ProfileSource`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileSet {
	/// `[profile <name>]` sections.
	pub profiles: BTreeMap<String, RawSection>,
	/// `[sso-session <name>]` sections.
	pub sso_sessions: BTreeMap<String, RawSection>,
}
impl ProfileSet {
	/// Adds or replaces a profile section.
	pub fn with_profile<I, K, V>(mut self, name: impl Into<String>, pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.profiles.insert(name.into(), collect_section(pairs));

		self
	}

	/// Adds or replaces an SSO session section.
	pub fn with_sso_session<I, K, V>(mut self, name: impl Into<String>, pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.sso_sessions.insert(name.into(), collect_section(pairs));

		self
	}
}

/// External parser producing the current [`ProfileSet`].
pub trait ProfileSource
where
	Self: Send + Sync,
{
	/// Reads the current configuration.
	fn load(&self) -> Result<ProfileSet>;
}

/// [`ProfileSource`] holding a replaceable in-memory set.
#[derive(Debug, Default)]
pub struct InMemoryProfileSource(RwLock<ProfileSet>);
impl InMemoryProfileSource {
	/// Creates a source serving `set`.
	pub fn new(set: ProfileSet) -> Self {
		Self(RwLock::new(set))
	}

	/// Replaces the served set; call [`ProfileFactory::reload`] afterwards.
	pub fn replace(&self, set: ProfileSet) {
		*self.0.write() = set;
	}
}
impl ProfileSource for InMemoryProfileSource {
	fn load(&self) -> Result<ProfileSet> {
		Ok(self.0.read().clone())
	}
}

#[derive(Default)]
struct Snapshot {
	identifiers: BTreeMap<CredentialId, CredentialIdentifier>,
	raw: BTreeMap<CredentialId, RawSection>,
}
impl Snapshot {
	fn insert(&mut self, identifier: CredentialIdentifier, section: &RawSection) {
		self.raw.insert(identifier.id.clone(), section.clone());
		self.identifiers.insert(identifier.id.clone(), identifier);
	}
}

/// [`ProviderFactory`] over configuration profiles and SSO sessions.
pub struct ProfileFactory {
	id: FactoryId,
	source: Arc<dyn ProfileSource>,
	exchanger: Arc<dyn CredentialExchanger>,
	tokens: Arc<BearerTokenProvider>,
	snapshot: RwLock<Snapshot>,
	on_change: Mutex<Option<ChangeCallback>>,
}
impl ProfileFactory {
	/// Creates the factory; identifiers are announced once the registry calls `set_up`.
	pub fn new(
		source: Arc<dyn ProfileSource>,
		exchanger: Arc<dyn CredentialExchanger>,
		tokens: Arc<BearerTokenProvider>,
	) -> Result<Self> {
		Ok(Self {
			id: FactoryId::new(FACTORY_ID).map_err(ConfigError::from)?,
			source,
			exchanger,
			tokens,
			snapshot: RwLock::default(),
			on_change: Mutex::default(),
		})
	}

	/// Re-reads the source and announces what changed.
	///
	/// Chained identities whose source changed are reported as modified too. Every SSO-backed
	/// identity is bound to its session's token key.
	pub fn reload(&self) -> Result<IdentifierChange> {
		let set = self.source.load()?;
		let next = self.parse(&set);

		for (identifier, session) in
			next.identifiers.values().filter_map(|identifier| Some((identifier, identifier.sso_session()?)))
		{
			self.tokens.bind(&identifier.id, &session.cache_key());
		}

		let change = {
			let mut snapshot = self.snapshot.write();
			let change = diff(&snapshot, &next);

			*snapshot = next;

			change
		};

		tracing::debug!(
			added = change.added.len(),
			modified = change.modified.len(),
			removed = change.removed.len(),
			"Reloaded profiles."
		);

		if !change.is_empty() {
			let callback = self.on_change.lock().clone();

			if let Some(callback) = callback {
				callback(change.clone());
			}
		}

		Ok(change)
	}

	/// Identifiers in the current snapshot.
	pub fn identifiers(&self) -> Vec<CredentialIdentifier> {
		self.snapshot.read().identifiers.values().cloned().collect()
	}

	fn parse(&self, set: &ProfileSet) -> Snapshot {
		let mut snapshot = Snapshot::default();
		let mut sessions = BTreeMap::new();

		for (name, section) in &set.sso_sessions {
			match self.parse_session(name, section) {
				Ok(identifier) => {
					if let CredentialSource::SsoSession(session) = &identifier.source {
						sessions.insert(name.clone(), session.clone());
					}

					snapshot.insert(identifier, section);
				},
				Err(e) => tracing::warn!(sso_session = %name, error = %e, "Skipping SSO session."),
			}
		}
		for (name, section) in &set.profiles {
			match self.parse_profile(name, section, set, &sessions) {
				Ok(identifier) => snapshot.insert(identifier, section),
				Err(e) => tracing::warn!(profile = %name, error = %e, "Skipping profile."),
			}
		}

		snapshot
	}

	fn parse_session(&self, name: &str, section: &RawSection) -> Result<CredentialIdentifier> {
		let id = credential_id(format!("sso-session:{name}"))?;
		let session = session_from(id.clone(), section)?;
		let region = session.sso_region.clone();

		Ok(CredentialIdentifier::new(id, self.id.clone(), CredentialSource::SsoSession(session))
			.with_short_name(name)
			.with_default_region(Some(region)))
	}

	fn parse_profile(
		&self,
		name: &str,
		section: &RawSection,
		set: &ProfileSet,
		sessions: &BTreeMap<String, SsoSessionIdentifier>,
	) -> Result<CredentialIdentifier> {
		let id = credential_id(format!("profile:{name}"))?;
		let region = section
			.get("region")
			.map(Region::new)
			.transpose()
			.map_err(|e| Error::validation(&id, format!("region is invalid: {e}")))?;
		let source = if let Some(role_arn) = section.get("role_arn") {
			let source_name = required(section, "source_profile", &id)?;

			if !set.profiles.contains_key(source_name) {
				return Err(Error::validation(
					&id,
					format!("source_profile `{source_name}` does not exist"),
				));
			}

			let duration = section
				.get("duration_seconds")
				.map(|raw| raw.parse::<i64>().map(Duration::seconds))
				.transpose()
				.map_err(|e| Error::validation(&id, format!("duration_seconds is invalid: {e}")))?;

			CredentialSource::AssumeRole {
				source: credential_id(format!("profile:{source_name}"))?,
				request: AssumeRoleRequest {
					role_arn: role_arn.clone(),
					external_id: section.get("external_id").cloned(),
					role_session_name: section.get("role_session_name").cloned(),
					duration,
				},
			}
		} else if let Some(session_name) = section.get("sso_session") {
			let session = sessions.get(session_name).cloned().ok_or_else(|| {
				Error::validation(&id, format!("sso_session `{session_name}` is unknown or malformed"))
			})?;

			sso_role(section, &id, session)?
		} else if section.contains_key("sso_start_url") {
			let session = session_from(credential_id(format!("sso-legacy:{name}"))?, section)?;

			sso_role(section, &id, session)?
		} else if let Some(command) = section.get("credential_process") {
			CredentialSource::Process { command: command.clone() }
		} else if section.contains_key("aws_access_key_id")
			&& section.contains_key("aws_secret_access_key")
		{
			CredentialSource::Static
		} else {
			return Err(Error::validation(&id, "no credential source is configured"));
		};

		Ok(CredentialIdentifier::new(id, self.id.clone(), source)
			.with_short_name(name)
			.with_default_region(region))
	}

	fn static_credentials(&self, id: &CredentialId) -> Result<AwsCredentials> {
		let snapshot = self.snapshot.read();
		let section =
			snapshot.raw.get(id).ok_or_else(|| Error::UnknownIdentifier { id: id.clone() })?;
		let mut credentials = AwsCredentials::new(
			required(section, "aws_access_key_id", id)?,
			required(section, "aws_secret_access_key", id)?,
		);

		if let Some(token) = section.get("aws_session_token") {
			credentials = credentials.with_session_token(token.clone());
		}

		Ok(credentials)
	}
}
impl ProviderFactory for ProfileFactory {
	fn id(&self) -> FactoryId {
		self.id.clone()
	}

	fn source_kind(&self) -> &'static str {
		"profile"
	}

	fn set_up(&self, on_change: ChangeCallback) {
		*self.on_change.lock() = Some(on_change);
		*self.snapshot.write() = Snapshot::default();

		if let Err(e) = self.reload() {
			tracing::warn!(error = %e, "Initial profile load failed.");
		}
	}

	fn resolve<'a>(
		&'a self,
		identifier: &'a CredentialIdentifier,
		region: &'a Region,
		source: Option<ResolvedProvider>,
	) -> ResolveFuture<'a> {
		Box::pin(async move {
			let delegate: Arc<dyn SecretDelegate> = match &identifier.source {
				CredentialSource::Static =>
					Arc::new(StaticDelegate::new(self.static_credentials(&identifier.id)?)),
				CredentialSource::AssumeRole { request, .. } => {
					let source = source.ok_or_else(|| {
						Error::validation(&identifier.id, "assume-role profile resolved without its source")
					})?;

					Arc::new(AssumeRoleDelegate::new(
						identifier.id.clone(),
						source,
						request.clone(),
						region.clone(),
						self.exchanger.clone(),
					))
				},
				CredentialSource::Process { command } =>
					Arc::new(ProcessDelegate::new(command.clone(), self.exchanger.clone())),
				CredentialSource::SsoRole { session, account_id, role_name } =>
					Arc::new(SsoRoleDelegate::new(
						identifier.id.clone(),
						session.clone(),
						account_id.clone(),
						role_name.clone(),
						self.tokens.clone(),
						self.exchanger.clone(),
					)),
				CredentialSource::SsoSession(session) => Arc::new(BearerDelegate::new(
					identifier.id.clone(),
					session.clone(),
					self.tokens.clone(),
				)),
			};

			Ok(ResolvedProvider::new(identifier.clone(), region.clone(), delegate))
		})
	}
}
impl Debug for ProfileFactory {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProfileFactory")
			.field("id", &self.id)
			.field("identifiers", &self.snapshot.read().identifiers.len())
			.finish()
	}
}

fn collect_section<I, K, V>(pairs: I) -> RawSection
where
	I: IntoIterator<Item = (K, V)>,
	K: Into<String>,
	V: Into<String>,
{
	pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

fn credential_id(value: String) -> Result<CredentialId> {
	CredentialId::new(&value).map_err(|e| Error::validation(&value, e.to_string()))
}

fn required<'a>(section: &'a RawSection, key: &str, id: &CredentialId) -> Result<&'a str> {
	section
		.get(key)
		.map(String::as_str)
		.filter(|value| !value.trim().is_empty())
		.ok_or_else(|| Error::validation(id, format!("`{key}` is missing")))
}

fn session_from(id: CredentialId, section: &RawSection) -> Result<SsoSessionIdentifier> {
	let start_url = Url::parse(required(section, "sso_start_url", &id)?)
		.map_err(|e| Error::validation(&id, format!("sso_start_url is invalid: {e}")))?;
	let sso_region = Region::new(required(section, "sso_region", &id)?)
		.map_err(|e| Error::validation(&id, format!("sso_region is invalid: {e}")))?;
	let scopes = match section.get("sso_registration_scopes") {
		Some(raw) => ScopeSet::parse_list(raw)
			.map_err(|e| Error::validation(&id, format!("sso_registration_scopes: {e}")))?,
		None => ScopeSet::default(),
	};
	let scopes = if scopes.is_empty() {
		ScopeSet::new([DEFAULT_SSO_SCOPE]).map_err(ConfigError::from)?
	} else {
		scopes
	};

	Ok(SsoSessionIdentifier { id, start_url, sso_region, scopes })
}

fn sso_role(
	section: &RawSection,
	id: &CredentialId,
	session: SsoSessionIdentifier,
) -> Result<CredentialSource> {
	Ok(CredentialSource::SsoRole {
		session,
		account_id: required(section, "sso_account_id", id)?.to_owned(),
		role_name: required(section, "sso_role_name", id)?.to_owned(),
	})
}

fn diff(old: &Snapshot, new: &Snapshot) -> IdentifierChange {
	let mut change = IdentifierChange::default();
	let mut touched = BTreeSet::new();

	for (id, identifier) in &new.identifiers {
		match old.identifiers.get(id) {
			None => change.added.push(identifier.clone()),
			Some(previous)
				if !previous.same_definition(identifier) || old.raw.get(id) != new.raw.get(id) =>
			{
				touched.insert(id.clone());
			},
			Some(_) => {},
		}
	}
	for id in old.identifiers.keys() {
		if !new.identifiers.contains_key(id) {
			change.removed.push(id.clone());
			touched.insert(id.clone());
		}
	}

	loop {
		let before = touched.len();

		for (id, identifier) in &new.identifiers {
			let inherits = identifier
				.source_id()
				.or_else(|| identifier.sso_session().map(|session| &session.id))
				.is_some_and(|source| source != id && touched.contains(source));

			if inherits && old.identifiers.contains_key(id) {
				touched.insert(id.clone());
			}
		}

		if touched.len() == before {
			break;
		}
	}

	change.modified = touched
		.iter()
		.filter(|id| old.identifiers.contains_key(*id))
		.filter_map(|id| new.identifiers.get(id).cloned())
		.collect();

	change
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{FakeExchanger, FakeOidcClient, RecordingPrompt},
		config::BrokerConfig,
		identity::CredentialKind,
		store::MemoryTokenCache,
	};

	fn factory(set: ProfileSet) -> (ProfileFactory, Arc<InMemoryProfileSource>) {
		let source = Arc::new(InMemoryProfileSource::new(set));
		let tokens = Arc::new(BearerTokenProvider::new(
			Arc::new(FakeOidcClient::default()),
			Arc::new(MemoryTokenCache::default()),
			Arc::new(RecordingPrompt::default()),
			BrokerConfig::default(),
		));
		let factory = ProfileFactory::new(source.clone(), Arc::new(FakeExchanger::default()), tokens)
			.expect("Profile factory should build.");

		(factory, source)
	}

	fn base_set() -> ProfileSet {
		ProfileSet::default()
			.with_profile("default", [
				("aws_access_key_id", "AKIADEFAULT"),
				("aws_secret_access_key", "secret"),
				("region", "eu-west-1"),
			])
			.with_profile("admin", [
				("role_arn", "arn:aws:iam::123456789012:role/admin"),
				("source_profile", "default"),
			])
			.with_profile("tooling", [("sso_session", "corp"), ("sso_account_id", "123456789012"), ("sso_role_name", "Dev")])
			.with_profile("broken", [("region", "us-east-1")])
			.with_sso_session("corp", [
				("sso_start_url", "https://d-123.awsapps.com/start"),
				("sso_region", "us-east-1"),
			])
	}

	#[test]
	fn classifies_profiles_and_skips_malformed_ones() {
		let (factory, _) = factory(base_set());
		let change = factory.reload().expect("Reload should succeed.");
		let kinds = factory
			.identifiers()
			.into_iter()
			.map(|identifier| (identifier.id.to_string(), identifier.kind()))
			.collect::<BTreeMap<_, _>>();

		assert_eq!(change.added.len(), 4);
		assert_eq!(kinds.get("profile:default"), Some(&CredentialKind::Static));
		assert_eq!(kinds.get("profile:admin"), Some(&CredentialKind::AssumeRole));
		assert_eq!(kinds.get("profile:tooling"), Some(&CredentialKind::SsoRole));
		assert_eq!(kinds.get("sso-session:corp"), Some(&CredentialKind::SsoSession));
		assert!(!kinds.contains_key("profile:broken"));

		let session = factory
			.identifiers()
			.into_iter()
			.find_map(|identifier| identifier.sso_session().cloned())
			.expect("SSO session should be parsed.");

		assert!(session.scopes.contains(DEFAULT_SSO_SCOPE));
	}

	#[test]
	fn rotated_keys_modify_the_profile_and_its_dependants() {
		let (factory, source) = factory(base_set());

		factory.reload().expect("Initial reload should succeed.");
		source.replace(base_set().with_profile("default", [
			("aws_access_key_id", "AKIAROTATED"),
			("aws_secret_access_key", "rotated"),
			("region", "eu-west-1"),
		]));

		let change = factory.reload().expect("Second reload should succeed.");
		let modified =
			change.modified.iter().map(|identifier| identifier.id.to_string()).collect::<Vec<_>>();

		assert!(change.added.is_empty());
		assert!(change.removed.is_empty());
		assert_eq!(modified, vec!["profile:admin".to_owned(), "profile:default".to_owned()]);
		assert!(factory.reload().expect("Third reload should succeed.").is_empty());
	}

	#[tokio::test]
	async fn static_keys_are_read_at_resolve_time() {
		let (factory, _) = factory(base_set());

		factory.reload().expect("Reload should succeed.");

		let identifier = factory
			.identifiers()
			.into_iter()
			.find(|identifier| identifier.id.as_ref() == "profile:default")
			.expect("Default profile should be present.");
		let region = Region::new("eu-west-1").expect("Region fixture should be valid.");
		let provider =
			factory.resolve(&identifier, &region, None).await.expect("Resolution should succeed.");
		let credentials = provider.credentials().await.expect("Credentials should be available.");

		assert_eq!(credentials.access_key_id, "AKIADEFAULT");
	}
}
