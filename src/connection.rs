//! Connections, the features that consume them, and connection health.

// self
use crate::{
	_prelude::*,
	auth::{CredentialId, FeatureId, Region, ScopeSet},
	identity::{CredentialIdentifier, ResolvedProvider},
};

/// Closed set of connection kinds a feature can accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
	/// Signs requests with AWS credentials.
	Iam,
	/// Presents an OAuth bearer token.
	Bearer,
}
impl Display for ConnectionKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(match self {
			ConnectionKind::Iam => "iam",
			ConnectionKind::Bearer => "bearer",
		})
	}
}

/// User-facing view of an identifier that features can be pinned to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
	/// Identifier id.
	pub id: CredentialId,
	/// Display label.
	pub label: String,
	/// Kind tag used for capability checks.
	pub kind: ConnectionKind,
	/// Scopes granted to bearer connections; empty for IAM connections.
	pub scopes: ScopeSet,
	/// Default region, if the identifier names one.
	pub region: Option<Region>,
}
impl From<&CredentialIdentifier> for Connection {
	fn from(identifier: &CredentialIdentifier) -> Self {
		let kind =
			if identifier.kind().is_bearer() { ConnectionKind::Bearer } else { ConnectionKind::Iam };
		let scopes = match kind {
			ConnectionKind::Bearer =>
				identifier.sso_session().map(|session| session.scopes.clone()).unwrap_or_default(),
			ConnectionKind::Iam => ScopeSet::default(),
		};

		Self {
			id: identifier.id.clone(),
			label: identifier.display_name.clone(),
			kind,
			scopes,
			region: identifier.default_region.clone(),
		}
	}
}

/// Application feature that needs a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Feature {
	/// Stable id used as the pin key.
	pub id: FeatureId,
	/// Display name.
	pub name: String,
	/// Connection kinds the feature works with.
	pub accepts: BTreeSet<ConnectionKind>,
	/// Scopes a bearer connection must carry.
	pub required_scopes: ScopeSet,
}
impl Feature {
	/// Creates a feature that accepts nothing yet.
	pub fn new(id: FeatureId, name: impl Into<String>) -> Self {
		Self { id, name: name.into(), accepts: BTreeSet::new(), required_scopes: ScopeSet::default() }
	}

	/// Adds `kind` to the accepted connection kinds.
	pub fn accepting(mut self, kind: ConnectionKind) -> Self {
		self.accepts.insert(kind);

		self
	}

	/// Requires bearer connections to carry `scopes`.
	pub fn requiring(mut self, scopes: ScopeSet) -> Self {
		self.required_scopes = scopes;

		self
	}

	/// Returns true when `connection` can serve this feature.
	pub fn supports_connection(&self, connection: &Connection) -> bool {
		if !self.accepts.contains(&connection.kind) {
			return false;
		}

		match connection.kind {
			ConnectionKind::Bearer => connection.scopes.is_superset_of(&self.required_scopes),
			ConnectionKind::Iam => true,
		}
	}
}

/// Resolved provider plus region; the unit service clients are built from.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
	/// Credential or token provider.
	pub provider: ResolvedProvider,
	/// Region requests are sent to.
	pub region: Region,
}
impl ConnectionSettings {
	/// Pairs `provider` with `region`.
	pub fn new(provider: ResolvedProvider, region: Region) -> Self {
		Self { provider, region }
	}

	/// Whether the settings carry credentials or a bearer token.
	pub fn kind(&self) -> ConnectionKind {
		if self.provider.identifier().kind().is_bearer() {
			ConnectionKind::Bearer
		} else {
			ConnectionKind::Iam
		}
	}
}

/// Health of a connection as shown by status indicators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	/// No check has completed since the connection last changed.
	#[default]
	Initializing,
	/// The connection resolved and produced a secret.
	ValidConnection,
	/// The connection could not produce a secret.
	InvalidConnection,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::region,
		auth::FactoryId,
		identity::{CredentialSource, SsoSessionIdentifier},
	};

	fn bearer(scopes: &[&str]) -> Connection {
		let id = CredentialId::new("sso-session:work").expect("Credential fixture should be valid.");
		let session = SsoSessionIdentifier {
			id: id.clone(),
			start_url: Url::parse("https://d-1.awsapps.com/start").expect("Start URL should parse."),
			sso_region: region("us-east-1"),
			scopes: ScopeSet::new(scopes.iter().copied()).expect("Scope fixture should be valid."),
		};
		let identifier = CredentialIdentifier::new(
			id,
			FactoryId::new("profile").expect("Factory fixture should be valid."),
			CredentialSource::SsoSession(session),
		);

		Connection::from(&identifier)
	}

	#[test]
	fn bearer_support_requires_scope_superset() {
		let feature = Feature::new(
			FeatureId::new("codecatalyst").expect("Feature fixture should be valid."),
			"CodeCatalyst",
		)
		.accepting(ConnectionKind::Bearer)
		.requiring(ScopeSet::new(["codecatalyst:read_write"]).expect("Scope fixture should be valid."));

		assert!(feature.supports_connection(&bearer(&["codecatalyst:read_write", "sso:account:access"])));
		assert!(!feature.supports_connection(&bearer(&["sso:account:access"])));
	}

	#[test]
	fn iam_connections_need_explicit_acceptance() {
		let identifier = CredentialIdentifier::static_profile(
			CredentialId::new("profile:dev").expect("Credential fixture should be valid."),
			FactoryId::new("profile").expect("Factory fixture should be valid."),
		);
		let connection = Connection::from(&identifier);
		let feature = Feature::new(
			FeatureId::new("explorer").expect("Feature fixture should be valid."),
			"Explorer",
		);

		assert_eq!(connection.kind, ConnectionKind::Iam);
		assert!(connection.scopes.is_empty());
		assert!(!feature.supports_connection(&connection));
		assert!(feature.accepting(ConnectionKind::Iam).supports_connection(&connection));
	}
}
