//! Order-insensitive scope sets used as part of every bearer-token cache key.

// std
use std::{cmp::Ordering, collections::BTreeSet, sync::OnceLock};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Sorted, deduplicated scope list.
///
/// Two sets built from the same scopes in any order compare, hash, and serialize identically,
/// which is what makes them usable inside cache keys. The fingerprint is a URL-safe base64
/// SHA-256 digest of the space-joined scopes, cached after first use.
#[derive(Default)]
pub struct ScopeSet {
	scopes: Arc<[String]>,
	fingerprint_cache: OnceLock<String>,
}
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Ok(Self { scopes: normalize(scopes)?, fingerprint_cache: OnceLock::new() })
	}

	/// Parses a comma- or whitespace-separated list, as found in raw profile values.
	pub fn parse_list(raw: &str) -> Result<Self, ScopeValidationError> {
		Self::new(
			raw.split(|c: char| c == ',' || c.is_whitespace())
				.filter(|part| !part.is_empty())
				.map(str::to_owned),
		)
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.scopes.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.scopes.is_empty()
	}

	/// Returns true if the set contains the provided scope.
	pub fn contains(&self, scope: &str) -> bool {
		self.scopes.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Returns true if every scope of `other` is also present here.
	pub fn is_superset_of(&self, other: &ScopeSet) -> bool {
		other.iter().all(|scope| self.contains(scope))
	}

	/// Iterator over normalized scopes.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.scopes.iter().map(|s| s.as_str())
	}

	/// Space-delimited representation used on the wire.
	pub fn normalized(&self) -> String {
		self.scopes.join(" ")
	}

	/// Stable fingerprint of the normalized scope list.
	pub fn fingerprint(&self) -> String {
		self.fingerprint_cache.get_or_init(|| fingerprint(&self.normalized())).clone()
	}
}
impl Clone for ScopeSet {
	fn clone(&self) -> Self {
		Self { scopes: self.scopes.clone(), fingerprint_cache: self.fingerprint_cache.clone() }
	}
}
impl PartialEq for ScopeSet {
	fn eq(&self, other: &Self) -> bool {
		self.scopes == other.scopes
	}
}
impl Eq for ScopeSet {}
impl PartialOrd for ScopeSet {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for ScopeSet {
	fn cmp(&self, other: &Self) -> Ordering {
		self.scopes.cmp(&other.scopes)
	}
}
impl Hash for ScopeSet {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.scopes.hash(state);
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.scopes).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.scopes.len()))?;

		for scope in self.scopes.iter() {
			seq.serialize_element(scope)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeSet::new(values).map_err(DeError::custom)
	}
}

/// URL-safe base64 SHA-256 digest, usable as a file name.
pub(crate) fn fingerprint(material: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(material.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn normalize<I, S>(scopes: I) -> Result<Arc<[String]>, ScopeValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut set = BTreeSet::new();

	for scope in scopes {
		let owned: String = scope.into();

		if owned.is_empty() {
			return Err(ScopeValidationError::Empty);
		}
		if owned.chars().any(char::is_whitespace) {
			return Err(ScopeValidationError::ContainsWhitespace { scope: owned });
		}

		set.insert(owned);
	}

	Ok(Arc::from(set.into_iter().collect::<Vec<_>>()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn order_and_duplicates_do_not_matter() {
		let lhs = ScopeSet::new(["sso:account:access", "codewhisperer:completions", "sso:account:access"])
			.expect("Left-hand scope set should be valid.");
		let rhs = ScopeSet::new(["codewhisperer:completions", "sso:account:access"])
			.expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.normalized(), "codewhisperer:completions sso:account:access");
		assert_eq!(lhs.fingerprint(), rhs.fingerprint());
		assert!(!lhs.fingerprint().contains(['/', '+', '=']), "Fingerprint must be file-name safe.");
	}

	#[test]
	fn superset_checks_every_scope() {
		let wide = ScopeSet::parse_list("sso:account:access, codewhisperer:analysis")
			.expect("Wide scope list should parse.");
		let narrow =
			ScopeSet::from_str("sso:account:access").expect("Narrow scope list should parse.");

		assert!(wide.is_superset_of(&narrow));
		assert!(!narrow.is_superset_of(&wide));
		assert!(narrow.is_superset_of(&ScopeSet::default()));
	}

	#[test]
	fn invalid_scopes_are_rejected() {
		assert!(ScopeSet::new([""]).is_err());
		assert!(matches!(
			ScopeSet::new([" padded "]),
			Err(ScopeValidationError::ContainsWhitespace { .. })
		));
		assert!(ScopeSet::from_str("   ").is_err());
		assert!(ScopeSet::from_str("").is_ok(), "Empty input represents an empty scope set.");
	}

	#[test]
	fn serde_sorts_on_the_way_in() {
		let set: ScopeSet = serde_json::from_str(r#"["b","a"]"#)
			.expect("Scope list should deserialize successfully.");

		assert_eq!(
			serde_json::to_string(&set).expect("Scope list should serialize successfully."),
			r#"["a","b"]"#
		);
	}
}
