//! Directory-backed [`TokenCache`] shared with external tooling.
//!
//! Each key lives in its own camelCase JSON document named after the key fingerprint, so two
//! processes only contend on the same file when they race on the same session. Writes go
//! through a process-unique temp file that is synced and renamed over the target.

// std
use std::{
	fs::{self, File},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
	process,
};
// self
use crate::{
	_prelude::*,
	auth::{BearerToken, Region, ScopeSet, TokenSecret},
	oidc::ClientRegistration,
	store::{CacheKey, RegistrationKey, StoreError, StoreFuture, TokenCache},
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenDocument {
	region: Region,
	start_url: Url,
	scopes: ScopeSet,
	access_token: TokenSecret,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	refresh_token: Option<TokenSecret>,
	#[serde(with = "time::serde::rfc3339")]
	expires_at: OffsetDateTime,
	#[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
	registration_expires_at: Option<OffsetDateTime>,
}
impl TokenDocument {
	fn new(key: &CacheKey, token: &BearerToken) -> Self {
		Self {
			region: key.region.clone(),
			start_url: key.start_url.clone(),
			scopes: key.scopes.clone(),
			access_token: token.access_token.clone(),
			refresh_token: token.refresh_token.clone(),
			expires_at: token.expires_at,
			registration_expires_at: token.registration_expires_at,
		}
	}

	fn matches(&self, key: &CacheKey) -> bool {
		self.region == key.region && self.start_url == key.start_url && self.scopes == key.scopes
	}

	fn into_token(self) -> BearerToken {
		BearerToken {
			access_token: self.access_token,
			refresh_token: self.refresh_token,
			expires_at: self.expires_at,
			registration_expires_at: self.registration_expires_at,
		}
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationDocument {
	scopes: ScopeSet,
	registration: ClientRegistration,
}

/// Persists one JSON document per cache key inside a directory.
#[derive(Clone, Debug)]
pub struct FileTokenCache {
	dir: PathBuf,
}
impl FileTokenCache {
	/// Opens (or creates) the cache directory.
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let dir = dir.into();

		fs::create_dir_all(&dir).map_err(|e| StoreError::Backend {
			message: format!("Failed to create cache directory {}: {e}", dir.display()),
		})?;

		Ok(Self { dir })
	}

	/// Directory holding the cache documents.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Path of the document backing `key`.
	pub fn token_path(&self, key: &CacheKey) -> PathBuf {
		self.dir.join(format!("{}.json", key.fingerprint()))
	}

	fn registration_path(&self, key: &RegistrationKey) -> PathBuf {
		self.dir.join(format!("registration-{}.json", key.fingerprint()))
	}

	pub(crate) fn read_document<T>(path: &Path) -> Result<Option<T>, StoreError>
	where
		T: for<'de> Deserialize<'de>,
	{
		let bytes = match fs::read(path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", path.display()),
				}),
		};

		serde_json::from_slice(&bytes).map(Some).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	pub(crate) fn write_document<T>(path: &Path, document: &T) -> Result<(), StoreError>
	where
		T: Serialize,
	{
		let serialized =
			serde_json::to_vec_pretty(document).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize {}: {e}", path.display()),
			})?;
		let file_name = path.file_name().and_then(|name| name.to_str()).unwrap_or("entry");
		let tmp_path = path.with_file_name(format!(
			".{file_name}.{}.{}.tmp",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos()
		));

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, path).map_err(|e| {
			let _ = fs::remove_file(&tmp_path);

			StoreError::Backend { message: format!("Failed to replace {}: {e}", path.display()) }
		})
	}
}
impl TokenCache for FileTokenCache {
	fn load_token<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<BearerToken>> {
		Box::pin(async move {
			let document = Self::read_document::<TokenDocument>(&self.token_path(key))?;

			Ok(document.filter(|doc| doc.matches(key)).map(TokenDocument::into_token))
		})
	}

	fn save_token<'a>(&'a self, key: &'a CacheKey, token: &'a BearerToken) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			Self::write_document(&self.token_path(key), &TokenDocument::new(key, token))
		})
	}

	fn remove_token<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let path = self.token_path(key);

			match fs::remove_file(&path) {
				Ok(()) => Ok(()),
				Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
				Err(e) => Err(StoreError::Backend {
					message: format!("Failed to remove {}: {e}", path.display()),
				}),
			}
		})
	}

	fn load_registration<'a>(
		&'a self,
		key: &'a RegistrationKey,
	) -> StoreFuture<'a, Option<ClientRegistration>> {
		Box::pin(async move {
			let document =
				Self::read_document::<RegistrationDocument>(&self.registration_path(key))?;

			Ok(document
				.filter(|doc| doc.scopes == key.scopes && doc.registration.region == key.region)
				.map(|doc| doc.registration))
		})
	}

	fn save_registration<'a>(
		&'a self,
		key: &'a RegistrationKey,
		registration: &'a ClientRegistration,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let document =
				RegistrationDocument { scopes: key.scopes.clone(), registration: registration.clone() };

			Self::write_document(&self.registration_path(key), &document)
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;
	use crate::_preludet::{region, temp_path};

	fn key() -> CacheKey {
		CacheKey::new(
			region("us-west-2"),
			Url::parse("https://d-456.awsapps.com/start").expect("Start URL should parse."),
			ScopeSet::new(["sso:account:access"]).expect("Scope fixture should be valid."),
		)
	}

	#[tokio::test]
	async fn documents_follow_the_shared_cache_shape() {
		let cache = FileTokenCache::open(temp_path("file_cache_shape"))
			.expect("Cache directory should be created.");
		let token = BearerToken::issued(
			TokenSecret::new("access"),
			Some(TokenSecret::new("refresh")),
			datetime!(2030-01-01 00:00 UTC),
			Duration::hours(1),
		);
		let key = key();

		cache.save_token(&key, &token).await.expect("Token should be saved.");

		let raw = fs::read(cache.token_path(&key)).expect("Token document should exist.");
		let json: serde_json::Value =
			serde_json::from_slice(&raw).expect("Token document should be JSON.");

		assert_eq!(json["region"], "us-west-2");
		assert_eq!(json["startUrl"], "https://d-456.awsapps.com/start");
		assert_eq!(json["scopes"], serde_json::json!(["sso:account:access"]));
		assert_eq!(json["accessToken"], "access");
		assert!(json["expiresAt"].as_str().is_some_and(|value| value.ends_with('Z')));

		let leftovers = fs::read_dir(cache.dir())
			.expect("Cache directory should be readable.")
			.filter_map(|entry| entry.ok())
			.filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
			.count();

		assert_eq!(leftovers, 0, "Temp files must be renamed away.");
		assert_eq!(cache.load_token(&key).await.expect("Token should load."), Some(token));

		cache.remove_token(&key).await.expect("Token should be removed.");
		cache.remove_token(&key).await.expect("Removing twice should be a no-op.");

		assert_eq!(cache.load_token(&key).await.expect("Missing token should load."), None);

		fs::remove_dir_all(cache.dir()).expect("Cache directory should be removable.");
	}

	#[tokio::test]
	async fn corrupt_documents_surface_serialization_errors() {
		let cache = FileTokenCache::open(temp_path("file_cache_corrupt"))
			.expect("Cache directory should be created.");
		let key = key();

		fs::write(cache.token_path(&key), b"{ not json").expect("Corrupt fixture should be written.");

		assert!(matches!(
			cache.load_token(&key).await,
			Err(StoreError::Serialization { .. })
		));

		fs::remove_dir_all(cache.dir()).expect("Cache directory should be removable.");
	}
}
