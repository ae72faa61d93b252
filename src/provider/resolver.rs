//! Region-to-descriptor resolution.

// self
use crate::{
	_prelude::*,
	auth::Region,
	error::ConfigError,
	provider::{DescriptorError, ProviderDescriptor},
};

/// Maps a region onto the authorization server that serves it.
pub trait EndpointResolver
where
	Self: Send + Sync,
{
	/// Returns the descriptor for `region`.
	fn descriptor(&self, region: &Region) -> Result<ProviderDescriptor>;
}

/// Public AWS OIDC endpoints: `https://oidc.{region}.amazonaws.com`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AwsOidcEndpoints;
impl EndpointResolver for AwsOidcEndpoints {
	fn descriptor(&self, region: &Region) -> Result<ProviderDescriptor> {
		let base = Url::parse(&format!("https://oidc.{region}.amazonaws.com/"))
			.map_err(|source| ConfigError::from(DescriptorError::InvalidUrl { source }))?;

		ProviderDescriptor::from_base(&base).map_err(|e| ConfigError::from(e).into())
	}
}

/// Serves one descriptor for every region (tests, private deployments).
#[derive(Clone, Debug)]
pub struct FixedEndpoints(pub ProviderDescriptor);
impl EndpointResolver for FixedEndpoints {
	fn descriptor(&self, _region: &Region) -> Result<ProviderDescriptor> {
		Ok(self.0.clone())
	}
}
