//! Strongly typed identifiers shared by the registry, pinning, and client cache.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (credential, factory, feature, region, service).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (credential, factory, feature, region, service).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (credential, factory, feature, region, service).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { CredentialId, "Globally unique credential identifier such as `profile:dev`.", "Credential" }
def_id! { FactoryId, "Identifier of a provider factory such as `profile`.", "Factory" }
def_id! { FeatureId, "Identifier of an application feature that can be pinned to a connection.", "Feature" }
def_id! { Region, "AWS region code such as `us-east-1`.", "Region" }
def_id! { ServiceKind, "Downstream service label used to key cached clients.", "Service" }

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_padding_and_blanks() {
		assert!(CredentialId::new(" profile:dev").is_err(), "Leading whitespace must be rejected.");
		assert!(CredentialId::new("profile:dev ").is_err(), "Trailing whitespace must be rejected.");
		assert!(FactoryId::new("").is_err());
		assert!(Region::new("us east 1").is_err());

		let id = CredentialId::new("profile:dev").expect("Credential fixture should be valid.");

		assert_eq!(id.as_ref(), "profile:dev");
		assert_eq!(format!("{id:?}"), "Credential(profile:dev)");
	}

	#[test]
	fn serde_enforces_validation() {
		let region: Region =
			serde_json::from_str("\"eu-west-1\"").expect("Region should deserialize successfully.");

		assert_eq!(region.as_ref(), "eu-west-1");
		assert!(serde_json::from_str::<Region>("\"eu west\"").is_err());
		assert!(serde_json::from_str::<FeatureId>("\"\"").is_err());
	}

	#[test]
	fn length_limit_is_inclusive() {
		ServiceKind::new("s".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");

		assert!(ServiceKind::new("s".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn borrow_supports_str_lookup() {
		let map: HashMap<FeatureId, u8> = HashMap::from_iter([(
			FeatureId::new("codewhisperer").expect("Feature used for lookup should be valid."),
			1_u8,
		)]);

		assert_eq!(map.get("codewhisperer"), Some(&1));
	}
}
