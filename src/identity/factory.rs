//! Contract between the identity registry and the pluggable factories it routes to.

// self
use crate::{
	_prelude::*,
	auth::{CredentialId, FactoryId, Region},
	identity::{CredentialIdentifier, ResolvedProvider},
};

/// Callback a factory invokes whenever its identifiers change.
pub type ChangeCallback = Arc<dyn Fn(IdentifierChange) + Send + Sync>;

/// Boxed future returned by [`ProviderFactory::resolve`].
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<ResolvedProvider>> + 'a + Send>>;

/// Delta announced by a factory; applying it twice has no further effect.
#[derive(Clone, Debug, Default)]
pub struct IdentifierChange {
	/// Identifiers that appeared.
	pub added: Vec<CredentialIdentifier>,
	/// Identifiers whose definition changed.
	pub modified: Vec<CredentialIdentifier>,
	/// Identifiers that disappeared.
	pub removed: Vec<CredentialId>,
}
impl IdentifierChange {
	/// Delta that only adds identifiers.
	pub fn added(identifiers: impl IntoIterator<Item = CredentialIdentifier>) -> Self {
		Self { added: identifiers.into_iter().collect(), ..Default::default() }
	}

	/// Delta that only removes identifiers.
	pub fn removed(ids: impl IntoIterator<Item = CredentialId>) -> Self {
		Self { removed: ids.into_iter().collect(), ..Default::default() }
	}

	/// Returns true when the delta carries nothing.
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
	}
}

/// Pluggable unit owning discovery, validation, and resolution for one source kind.
pub trait ProviderFactory
where
	Self: Send + Sync,
{
	/// Id every identifier owned by this factory carries in `factory_id`.
	fn id(&self) -> FactoryId;

	/// Label describing the kind of source the factory reads.
	fn source_kind(&self) -> &'static str {
		"custom"
	}

	/// Installs the change callback and announces the initial identifiers through it.
	///
	/// The registry holds no locks while this runs, so factories may invoke the callback
	/// synchronously.
	fn set_up(&self, on_change: ChangeCallback);

	/// Materializes a live provider for `identifier` in `region`.
	///
	/// Chained identifiers receive their already resolved source provider in `source`.
	fn resolve<'a>(
		&'a self,
		identifier: &'a CredentialIdentifier,
		region: &'a Region,
		source: Option<ResolvedProvider>,
	) -> ResolveFuture<'a>;
}
