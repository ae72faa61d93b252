//! Endpoint descriptor consumed by the OIDC client.

/// Builder API for assembling provider descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::_prelude::*;

/// Endpoint set used by the device authorization grant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEndpoints {
	/// Dynamic client registration endpoint (RFC 7591).
	pub registration: Url,
	/// Device authorization endpoint (RFC 8628 section 3.1).
	pub device_authorization: Url,
	/// Token endpoint used for polling and refresh.
	pub token: Url,
}

/// Immutable, validated descriptor for one authorization server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Endpoint definitions.
	pub endpoints: ProviderEndpoints,
}
impl ProviderDescriptor {
	/// Creates a new builder.
	pub fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::default()
	}

	/// Derives every endpoint from a base URL using the conventional AWS OIDC paths.
	pub fn from_base(base: &Url) -> Result<Self, DescriptorError> {
		let join = |path: &str| base.join(path).map_err(|source| DescriptorError::InvalidUrl { source });

		Self::builder()
			.registration_endpoint(join("client/register")?)
			.device_authorization_endpoint(join("device_authorization")?)
			.token_endpoint(join("token")?)
			.build()
	}
}
