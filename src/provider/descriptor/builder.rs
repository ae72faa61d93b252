// std
use std::net::{Ipv4Addr, Ipv6Addr};
// crates.io
use url::Host;
// self
use crate::{
	_prelude::*,
	provider::{ProviderDescriptor, ProviderEndpoints},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum DescriptorError {
	/// A mandatory endpoint was not supplied.
	#[error("Missing {endpoint} endpoint.")]
	MissingEndpoint {
		/// Which endpoint is missing.
		endpoint: &'static str,
	},
	/// Endpoints must use HTTPS unless they point at the loopback interface.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Endpoint URL could not be derived or parsed.
	#[error("Endpoint URL is invalid.")]
	InvalidUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug, Default)]
pub struct ProviderDescriptorBuilder {
	/// Dynamic client registration endpoint.
	pub registration_endpoint: Option<Url>,
	/// Device authorization endpoint.
	pub device_authorization_endpoint: Option<Url>,
	/// Token endpoint.
	pub token_endpoint: Option<Url>,
}
impl ProviderDescriptorBuilder {
	/// Sets the registration endpoint.
	pub fn registration_endpoint(mut self, url: Url) -> Self {
		self.registration_endpoint = Some(url);

		self
	}

	/// Sets the device authorization endpoint.
	pub fn device_authorization_endpoint(mut self, url: Url) -> Self {
		self.device_authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, DescriptorError> {
		let registration = self
			.registration_endpoint
			.ok_or(DescriptorError::MissingEndpoint { endpoint: "registration" })?;
		let device_authorization = self
			.device_authorization_endpoint
			.ok_or(DescriptorError::MissingEndpoint { endpoint: "device authorization" })?;
		let token =
			self.token_endpoint.ok_or(DescriptorError::MissingEndpoint { endpoint: "token" })?;

		validate_endpoint("registration", &registration)?;
		validate_endpoint("device authorization", &device_authorization)?;
		validate_endpoint("token", &token)?;

		Ok(ProviderDescriptor {
			endpoints: ProviderEndpoints { registration, device_authorization, token },
		})
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), DescriptorError> {
	if url.scheme() == "https" || (url.scheme() == "http" && is_loopback(url)) {
		Ok(())
	} else {
		Err(DescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(Host::Ipv4(ip)) => Ipv4Addr::is_loopback(&ip),
		Some(Host::Ipv6(ip)) => Ipv6Addr::is_loopback(&ip),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Endpoint fixture should parse.")
	}

	#[test]
	fn https_and_loopback_are_accepted() {
		let base = url("https://oidc.eu-west-1.amazonaws.com/");
		let descriptor =
			ProviderDescriptor::from_base(&base).expect("HTTPS descriptor should build.");

		assert_eq!(descriptor.endpoints.token.as_str(), "https://oidc.eu-west-1.amazonaws.com/token");
		assert!(ProviderDescriptor::from_base(&url("http://127.0.0.1:8080/")).is_ok());
		assert!(ProviderDescriptor::from_base(&url("http://localhost:8080/")).is_ok());
	}

	#[test]
	fn plain_http_and_missing_endpoints_are_rejected() {
		let err = ProviderDescriptor::from_base(&url("http://oidc.example.com/"))
			.expect_err("Plain HTTP must be rejected.");

		assert!(matches!(err, DescriptorError::InsecureEndpoint { endpoint: "registration", .. }));
		assert_eq!(
			ProviderDescriptor::builder().token_endpoint(url("https://example.com/token")).build(),
			Err(DescriptorError::MissingEndpoint { endpoint: "registration" })
		);
	}
}
