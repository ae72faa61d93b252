//! Central registry of every identifier announced by the installed provider factories.
//!
//! Factories push idempotent deltas through the callback installed by
//! [`IdentityRegistry::register_factory`]. Every stored identifier carries a generation number
//! that changes whenever the identifier is replaced, which lets [`IdentityRegistry::resolve`]
//! detect identities that were removed or redefined while a factory was still resolving them.
//!
//! Chained identities (assume-role through a source profile) are resolved root-first with
//! cycle detection. Members of a cycle are hidden from [`IdentityRegistry::list_identifiers`]
//! until the next change announced by any factory.

// std
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	auth::{CredentialId, FactoryId, Region},
	config::BrokerConfig,
	connection::Connection,
	error::ConfigError,
	event::{EventBus, Subscription},
	flows::common,
	identity::{CredentialIdentifier, IdentifierChange, ProviderFactory, ResolvedProvider},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Registry change notification.
#[derive(Clone, Debug)]
pub enum RegistryEvent {
	/// A new identifier appeared.
	Added(CredentialIdentifier),
	/// An identifier was redefined; secrets derived from the old definition are stale.
	Updated(CredentialIdentifier),
	/// An identifier disappeared.
	Removed(CredentialId),
}
impl RegistryEvent {
	/// Id of the affected identifier.
	pub fn id(&self) -> &CredentialId {
		match self {
			RegistryEvent::Added(identifier) | RegistryEvent::Updated(identifier) => &identifier.id,
			RegistryEvent::Removed(id) => id,
		}
	}

	/// Returns true when previously derived secrets must be dropped.
	pub fn invalidates(&self) -> bool {
		!matches!(self, RegistryEvent::Added(_))
	}
}

#[derive(Clone, Debug)]
struct Entry {
	identifier: CredentialIdentifier,
	generation: u64,
	revoked: Arc<AtomicBool>,
}
impl Entry {
	fn new(identifier: CredentialIdentifier, generation: u64) -> Self {
		Self { identifier, generation, revoked: Arc::new(AtomicBool::new(false)) }
	}

	fn revoke(&self) {
		self.revoked.store(true, Ordering::Release);
	}
}

/// Concurrent identifier registry; share it behind an [`Arc`].
pub struct IdentityRegistry {
	factories: RwLock<HashMap<FactoryId, Arc<dyn ProviderFactory>>>,
	entries: RwLock<HashMap<CredentialId, Entry>>,
	excluded: RwLock<HashSet<CredentialId>>,
	next_generation: AtomicU64,
	events: EventBus<RegistryEvent>,
	resolve_timeout: Duration,
}
impl IdentityRegistry {
	/// Creates an empty registry bounding factory resolution by `config.request_timeout`.
	pub fn new(config: &BrokerConfig) -> Self {
		Self {
			factories: RwLock::default(),
			entries: RwLock::default(),
			excluded: RwLock::default(),
			next_generation: AtomicU64::new(1),
			events: EventBus::new(),
			resolve_timeout: config.request_timeout,
		}
	}

	/// Installs `factory` and lets it announce its identifiers.
	pub fn register_factory(self: &Arc<Self>, factory: Arc<dyn ProviderFactory>) -> Result<()> {
		let factory_id = factory.id();

		{
			let mut factories = self.factories.write();

			if factories.contains_key(&factory_id) {
				return Err(ConfigError::DuplicateFactory { factory: factory_id }.into());
			}

			factories.insert(factory_id.clone(), factory.clone());
		}

		let registry = Arc::downgrade(self);
		let owner = factory_id.clone();

		factory.set_up(Arc::new(move |change| {
			if let Some(registry) = registry.upgrade() {
				registry.apply_change(&owner, change);
			}
		}));

		tracing::info!(factory = %factory_id, source = factory.source_kind(), "Registered provider factory.");

		Ok(())
	}

	/// Ids of the installed factories.
	pub fn factory_ids(&self) -> Vec<FactoryId> {
		let mut ids = self.factories.read().keys().cloned().collect::<Vec<_>>();

		ids.sort();

		ids
	}

	/// Point-in-time list of usable identifiers, sorted by id.
	///
	/// Identifiers whose chain is cyclic, dangling, or owned by a missing factory are left out.
	pub fn list_identifiers(&self) -> Vec<CredentialIdentifier> {
		let factories = self.factories.read();
		let entries = self.entries.read();
		let excluded = self.excluded.read();
		let mut identifiers = entries
			.values()
			.filter(|entry| {
				let identifier = &entry.identifier;

				match exclusion(&factories, &entries, &excluded, identifier) {
					Some(reason) => {
						tracing::debug!(id = %identifier.id, %reason, "Excluding identifier from listing.");

						false
					},
					None => true,
				}
			})
			.map(|entry| entry.identifier.clone())
			.collect::<Vec<_>>();

		identifiers.sort_by(|a, b| a.id.cmp(&b.id));

		identifiers
	}

	/// Listed identifiers viewed as connections.
	pub fn list_connections(&self) -> Vec<Connection> {
		self.list_identifiers().iter().map(Connection::from).collect()
	}

	/// Identifier stored under `id`, listed or not.
	pub fn identifier(&self, id: &CredentialId) -> Option<CredentialIdentifier> {
		self.entries.read().get(id).map(|entry| entry.identifier.clone())
	}

	/// Connection view of the identifier stored under `id`, listed or not.
	pub fn connection(&self, id: &CredentialId) -> Option<Connection> {
		self.entries.read().get(id).map(|entry| Connection::from(&entry.identifier))
	}

	/// Connection view of `id` only when [`IdentityRegistry::list_identifiers`] would list it.
	pub fn usable_connection(&self, id: &CredentialId) -> Option<Connection> {
		let factories = self.factories.read();
		let entries = self.entries.read();
		let excluded = self.excluded.read();

		entries
			.get(id)
			.filter(|entry| exclusion(&factories, &entries, &excluded, &entry.identifier).is_none())
			.map(|entry| Connection::from(&entry.identifier))
	}

	/// Number of stored identifiers, including excluded ones.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns true when no identifier is stored.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Removes `id` regardless of its owner; returns false when it was absent.
	///
	/// Listeners observe the removal before this returns.
	pub fn remove_identifier(&self, id: &CredentialId) -> bool {
		let removed = self.entries.write().remove(id).inspect(Entry::revoke).is_some();

		if removed {
			self.excluded.write().clear();

			tracing::info!(%id, "Removed identifier.");

			self.events.emit(RegistryEvent::Removed(id.clone()));
		}

		removed
	}

	/// Resolves `id` in `region`, walking any source chain root-first.
	pub async fn resolve(&self, id: &CredentialId, region: &Region) -> Result<ResolvedProvider> {
		const KIND: FlowKind = FlowKind::Resolve;

		let span = FlowSpan::new(KIND, "resolve");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.resolve_chain(id, region)).await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		if let Err(e) = &result {
			tracing::debug!(%id, %region, error = %e, "Resolution failed.");
		}

		result
	}

	/// Registers a synchronous listener for registry events.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: 'static + Fn(&RegistryEvent) + Send + Sync,
	{
		self.events.subscribe(listener)
	}

	/// Async stream of registry events, intended for list and tree views.
	pub fn stream(&self) -> broadcast::Receiver<RegistryEvent> {
		self.events.stream()
	}

	async fn resolve_chain(&self, id: &CredentialId, region: &Region) -> Result<ResolvedProvider> {
		let chain = self.chain(id)?;
		let mut source = None;

		for entry in &chain {
			let identifier = &entry.identifier;
			let factory = self.factories.read().get(&identifier.factory_id).cloned();
			let Some(factory) = factory else {
				tracing::error!(id = %identifier.id, factory = %identifier.factory_id, "Identifier routed to a missing factory.");

				return Err(Error::FactoryNotFound {
					factory: identifier.factory_id.clone(),
					id: identifier.id.clone(),
				});
			};
			let provider = common::with_timeout(
				self.resolve_timeout,
				"resolve",
				factory.resolve(identifier, region, source.take()),
			)
			.await?;

			source = Some(provider);
		}

		{
			let entries = self.entries.read();

			if chain.iter().any(|resolved| {
				entries.get(&resolved.identifier.id).map(|entry| entry.generation)
					!= Some(resolved.generation)
			}) {
				return Err(Error::InvalidatedProvider { id: id.clone() });
			}
		}

		source
			.map(|provider| provider.revoked_by(chain.iter().map(|entry| entry.revoked.clone())))
			.ok_or_else(|| Error::UnknownIdentifier { id: id.clone() })
	}

	/// Collects the chain behind `id`, root first.
	fn chain(&self, id: &CredentialId) -> Result<Vec<Entry>> {
		let entries = self.entries.read();
		let mut visited = Vec::<CredentialId>::new();
		let mut chain = Vec::new();
		let mut next = Some(id.clone());

		while let Some(current) = next {
			if let Some(start) = visited.iter().position(|seen| *seen == current) {
				self.excluded.write().extend(visited[start..].iter().cloned());
				visited.push(current);

				tracing::warn!(chain = ?visited, "Detected a cyclic credential chain.");

				return Err(Error::CyclicReference { chain: visited });
			}

			let entry =
				entries.get(&current).ok_or_else(|| Error::UnknownIdentifier { id: current.clone() })?;

			next = entry.identifier.source_id().cloned();

			visited.push(current);
			chain.push(entry.clone());
		}

		chain.reverse();

		Ok(chain)
	}

	fn apply_change(&self, factory: &FactoryId, change: IdentifierChange) {
		let mut events = Vec::new();

		{
			let mut entries = self.entries.write();

			for id in change.removed {
				match entries.get(&id) {
					Some(entry) if entry.identifier.factory_id == *factory => {
						entry.revoke();
						entries.remove(&id);
						events.push(RegistryEvent::Removed(id));
					},
					Some(entry) => tracing::warn!(
						%id,
						%factory,
						owner = %entry.identifier.factory_id,
						"Ignoring removal of an identifier owned by another factory."
					),
					None => (),
				}
			}
			for identifier in change.added.into_iter().chain(change.modified) {
				if identifier.factory_id != *factory {
					tracing::warn!(id = %identifier.id, %factory, "Ignoring identifier announced for another factory.");

					continue;
				}

				match entries.get(&identifier.id) {
					Some(entry) if entry.identifier.factory_id != *factory => tracing::warn!(
						id = %identifier.id,
						%factory,
						owner = %entry.identifier.factory_id,
						"Ignoring identifier already owned by another factory."
					),
					Some(entry) if entry.identifier.same_definition(&identifier) => (),
					found => {
						let updated = found.is_some();
						let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

						if let Some(previous) = entries
							.insert(identifier.id.clone(), Entry::new(identifier.clone(), generation))
						{
							previous.revoke();
						}
						events.push(if updated {
							RegistryEvent::Updated(identifier)
						} else {
							RegistryEvent::Added(identifier)
						});
					},
				}
			}

			if !events.is_empty() {
				self.excluded.write().clear();
			}
		}

		tracing::debug!(%factory, events = events.len(), "Applied identifier change.");

		for event in events {
			self.events.emit(event);
		}
	}
}
impl Debug for IdentityRegistry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdentityRegistry")
			.field("factories", &self.factory_ids())
			.field("identifiers", &self.len())
			.field("events", &self.events)
			.finish()
	}
}

fn exclusion(
	factories: &HashMap<FactoryId, Arc<dyn ProviderFactory>>,
	entries: &HashMap<CredentialId, Entry>,
	excluded: &HashSet<CredentialId>,
	identifier: &CredentialIdentifier,
) -> Option<String> {
	if excluded.contains(&identifier.id) {
		Some("it is part of a cyclic chain".to_owned())
	} else if !factories.contains_key(&identifier.factory_id) {
		Some(format!("factory `{}` is not installed", identifier.factory_id))
	} else {
		chain_problem(entries, identifier)
	}
}

fn chain_problem(
	entries: &HashMap<CredentialId, Entry>,
	identifier: &CredentialIdentifier,
) -> Option<String> {
	let mut visited = HashSet::from([&identifier.id]);
	let mut current = identifier;

	while let Some(source) = current.source_id() {
		if !visited.insert(source) {
			return Some(format!("its chain revisits `{source}`"));
		}

		match entries.get(source) {
			Some(entry) => current = &entry.identifier,
			None => return Some(format!("its source `{source}` is unknown")),
		}
	}

	None
}
