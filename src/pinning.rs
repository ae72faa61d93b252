//! Sticky feature-to-connection pins, persisted across restarts.
//!
//! Pins are only a preference: every read goes back to the live [`IdentityRegistry`] and a pin
//! whose connection vanished or can no longer serve the feature reads as absent.

// std
use std::path::{Path, PathBuf};
// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	auth::{CredentialId, FeatureId},
	connection::{Connection, Feature},
	event::{EventBus, Subscription},
	registry::{IdentityRegistry, RegistryEvent},
	store::{FileTokenCache, StoreError},
};

/// Persisted pin table.
pub type PinMap = BTreeMap<FeatureId, CredentialId>;

/// Persistence contract for the pin table.
pub trait PinStore
where
	Self: Send + Sync,
{
	/// Reads the stored table; a missing table is empty.
	fn load(&self) -> Result<PinMap, StoreError>;

	/// Replaces the stored table.
	fn save(&self, pins: &PinMap) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinDocument {
	#[serde(default)]
	pins: PinMap,
}

/// JSON file pin store written via temp file and rename.
#[derive(Clone, Debug)]
pub struct FilePinStore {
	path: PathBuf,
}
impl FilePinStore {
	/// Uses `path`; parent directories are created on first save.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Location of the pin file.
	pub fn path(&self) -> &Path {
		&self.path
	}
}
impl PinStore for FilePinStore {
	fn load(&self) -> Result<PinMap, StoreError> {
		Ok(FileTokenCache::read_document::<PinDocument>(&self.path)?.unwrap_or_default().pins)
	}

	fn save(&self, pins: &PinMap) -> Result<(), StoreError> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", parent.display()),
			})?;
		}

		FileTokenCache::write_document(&self.path, &PinDocument { pins: pins.clone() })
	}
}

/// Process-local pin store.
#[derive(Debug, Default)]
pub struct MemoryPinStore(Mutex<PinMap>);
impl PinStore for MemoryPinStore {
	fn load(&self) -> Result<PinMap, StoreError> {
		Ok(self.0.lock().clone())
	}

	fn save(&self, pins: &PinMap) -> Result<(), StoreError> {
		*self.0.lock() = pins.clone();

		Ok(())
	}
}

/// Pin change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PinEvent {
	/// `feature` is now pinned to `connection`, or unpinned when it is `None`.
	Changed {
		/// Affected feature.
		feature: FeatureId,
		/// New pin target.
		connection: Option<CredentialId>,
	},
}

/// Feature-to-connection pin manager.
pub struct ConnectionPinning {
	registry: Arc<IdentityRegistry>,
	store: Arc<dyn PinStore>,
	pins: RwLock<PinMap>,
	events: EventBus<PinEvent>,
}
impl ConnectionPinning {
	/// Creates an empty manager; call [`ConnectionPinning::load`] to restore persisted pins.
	pub fn new(registry: Arc<IdentityRegistry>, store: Arc<dyn PinStore>) -> Self {
		Self { registry, store, pins: RwLock::default(), events: EventBus::new() }
	}

	/// Restores persisted pins, dropping those whose connection the registry would not list.
	///
	/// Returns the number of pins kept.
	pub fn load(&self) -> Result<usize> {
		let stored = self.store.load()?;
		let total = stored.len();
		let kept = stored
			.into_iter()
			.filter(|(feature, id)| {
				let usable = self.registry.usable_connection(id).is_some();

				if !usable {
					tracing::debug!(%feature, connection = %id, "Dropping pin to an unusable connection.");
				}

				usable
			})
			.collect::<PinMap>();
		let count = kept.len();

		*self.pins.write() = kept;

		if count != total {
			self.persist()?;
		}

		Ok(count)
	}

	/// Returns true when `feature` has a pin that is still usable.
	pub fn is_feature_pinned(&self, feature: &Feature) -> bool {
		self.get_pinned_connection(feature).is_some()
	}

	/// Live connection `feature` is pinned to, if it is still listed and still supports the feature.
	pub fn get_pinned_connection(&self, feature: &Feature) -> Option<Connection> {
		let id = self.pins.read().get(&feature.id).cloned()?;

		self.registry.usable_connection(&id).filter(|connection| feature.supports_connection(connection))
	}

	/// Pins `feature` to `connection`, or clears the pin when it is `None`.
	pub fn set_pinned_connection(
		&self,
		feature: &Feature,
		connection: Option<&Connection>,
	) -> Result<()> {
		self.set_pin(&feature.id, connection.map(|connection| connection.id.clone()))
	}

	/// Moves `features` from `old` to `new` where possible.
	///
	/// A feature follows `new` when it supports it, otherwise stays on `old` when `old` still
	/// supports it, otherwise ends up unpinned.
	pub fn pin_features(
		&self,
		old: Option<&Connection>,
		new: &Connection,
		features: &[Feature],
	) -> Result<()> {
		for feature in features {
			if feature.supports_connection(new) {
				self.set_pin(&feature.id, Some(new.id.clone()))?;
			} else if let Some(old) = old.filter(|old| feature.supports_connection(old)) {
				tracing::debug!(feature = %feature.id, connection = %old.id, "Keeping feature on its previous connection.");

				self.set_pin(&feature.id, Some(old.id.clone()))?;
			} else {
				tracing::info!(feature = %feature.id, connection = %new.id, "Connection does not support feature; leaving it unpinned.");

				self.set_pin(&feature.id, None)?;
			}
		}

		Ok(())
	}

	/// Snapshot of the raw pin table, without revalidation.
	pub fn pins(&self) -> PinMap {
		self.pins.read().clone()
	}

	/// Drops pins to connections the registry removes, for as long as the subscription lives.
	pub fn attach(self: &Arc<Self>) -> Subscription {
		let pinning = Arc::downgrade(self);

		self.registry.subscribe(move |event| {
			let RegistryEvent::Removed(id) = event else {
				return;
			};
			let Some(pinning) = pinning.upgrade() else {
				return;
			};

			if let Err(e) = pinning.unpin_connection(id) {
				tracing::warn!(connection = %id, error = %e, "Failed to persist pins after removal.");
			}
		})
	}

	/// Registers a synchronous listener for pin changes.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: 'static + Fn(&PinEvent) + Send + Sync,
	{
		self.events.subscribe(listener)
	}

	/// Async stream of pin changes.
	pub fn stream(&self) -> broadcast::Receiver<PinEvent> {
		self.events.stream()
	}

	fn unpin_connection(&self, id: &CredentialId) -> Result<()> {
		let features = self
			.pins
			.read()
			.iter()
			.filter(|(_, pinned)| *pinned == id)
			.map(|(feature, _)| feature.clone())
			.collect::<Vec<_>>();

		for feature in features {
			self.set_pin(&feature, None)?;
		}

		Ok(())
	}

	fn set_pin(&self, feature: &FeatureId, connection: Option<CredentialId>) -> Result<()> {
		let changed = {
			let mut pins = self.pins.write();
			let previous = match &connection {
				Some(id) => pins.insert(feature.clone(), id.clone()),
				None => pins.remove(feature),
			};

			previous != connection
		};

		if !changed {
			return Ok(());
		}

		let persisted = self.persist();

		self.events.emit(PinEvent::Changed { feature: feature.clone(), connection });

		persisted
	}

	fn persist(&self) -> Result<()> {
		let pins = self.pins.read().clone();

		self.store.save(&pins).map_err(Error::from)
	}
}
impl Debug for ConnectionPinning {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectionPinning").field("pins", &*self.pins.read()).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{StaticFactory, temp_path},
		config::BrokerConfig,
		connection::ConnectionKind,
		identity::IdentifierChange,
	};

	fn feature(id: &str) -> Feature {
		Feature::new(FeatureId::new(id).expect("Feature fixture should be valid."), id)
			.accepting(ConnectionKind::Iam)
	}

	fn pin_map(entries: &[(&str, &str)]) -> PinMap {
		entries
			.iter()
			.map(|(feature, connection)| {
				(
					FeatureId::new(feature).expect("Feature fixture should be valid."),
					CredentialId::new(connection).expect("Credential fixture should be valid."),
				)
			})
			.collect()
	}

	#[test]
	fn file_store_round_trips_and_tolerates_missing_files() {
		let path = temp_path("pins").join("pins.json");
		let store = FilePinStore::new(&path);

		assert!(store.load().expect("Missing pin file should read as empty.").is_empty());

		let pins = pin_map(&[("explorer", "static:a")]);

		store.save(&pins).expect("Pins should be saved.");

		assert_eq!(store.load().expect("Pins should load."), pins);

		let raw = std::fs::read_to_string(&path).expect("Pin file should exist.");

		assert!(raw.contains("\"explorer\": \"static:a\""));

		let _ = std::fs::remove_dir_all(path.parent().expect("Pin file should have a parent."));
	}

	#[test]
	fn load_drops_pins_to_unknown_connections() {
		let registry = Arc::new(IdentityRegistry::new(&BrokerConfig::default()));
		let factory = Arc::new(StaticFactory::new("static"));

		registry.register_factory(factory.clone()).expect("Factory registration should succeed.");
		factory.announce(IdentifierChange::added([factory.identifier("static:a")]));

		let store = Arc::new(MemoryPinStore::default());

		store
			.save(&pin_map(&[("explorer", "static:a"), ("lambda", "static:gone")]))
			.expect("Memory store should accept pins.");

		let pinning = ConnectionPinning::new(registry, store.clone());

		assert_eq!(pinning.load().expect("Pins should load."), 1);
		assert!(pinning.is_feature_pinned(&feature("explorer")));
		assert!(!pinning.is_feature_pinned(&feature("lambda")));
		assert_eq!(store.load().expect("Memory store should read."), pin_map(&[("explorer", "static:a")]));
	}
}
