//! OIDC calls behind the device authorization grant.
//!
//! [`OidcClient`] is the seam the bearer-token provider talks to. [`HttpOidcClient`] implements
//! it over any [`OidcHttpClient`]: dynamic client registration (RFC 7591, JSON), device
//! authorization and token polling (RFC 8628, form-encoded), and the refresh-token exchange
//! through the `oauth2` crate.

// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, HttpClientError, HttpRequest, RefreshToken,
	RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError},
	http::{
		Method, Request,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
use serde::de::DeserializeOwned;
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{Region, ScopeSet, TokenSecret},
	config::BrokerConfig,
	error::{ConfigError, TransientError, TransportError},
	http::{OidcHttpClient, ResponseMetadata, ResponseMetadataSlot},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::EndpointResolver,
};
#[cfg(feature = "reqwest")] use crate::{http::ReqwestHttpClient, provider::AwsOidcEndpoints};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Boxed future returned by [`OidcClient`] operations.
pub type OidcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Reqwest-backed OIDC client with the default error mapper.
#[cfg(feature = "reqwest")]
pub type ReqwestOidcClient = HttpOidcClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Dynamically registered OAuth client used for every device-grant call in one region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
	/// Region of the authorization server that issued the registration.
	pub region: Region,
	/// Public client identifier.
	pub client_id: String,
	/// Client secret presented on every token call.
	pub client_secret: TokenSecret,
	/// Registration expiry, when the server reports one.
	#[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
}
impl ClientRegistration {
	/// Returns true when the registration can no longer be used at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expires_at| expires_at <= instant)
	}
}

/// Device and user codes returned by the device authorization endpoint.
#[derive(Clone, Debug)]
pub struct DeviceAuthorization {
	/// Opaque code the client polls with.
	pub device_code: TokenSecret,
	/// Short code the user types at the verification page.
	pub user_code: String,
	/// Page where the user enters the code.
	pub verification_uri: Url,
	/// Page with the code pre-filled, if provided.
	pub verification_uri_complete: Option<Url>,
	/// Lifetime of the device code.
	pub expires_in: Duration,
	/// Minimum poll interval requested by the server.
	pub interval: Option<Duration>,
}

/// Outcome of one poll of the token endpoint.
#[derive(Clone, Debug)]
pub enum DevicePoll {
	/// `authorization_pending`: keep polling at the current interval.
	Pending,
	/// `slow_down`: keep polling with a longer interval.
	SlowDown,
	/// The user approved the request.
	Granted(TokenGrant),
	/// `access_denied`: the user declined.
	Denied,
	/// `expired_token`: the device code lapsed.
	Expired,
}

/// Token material issued by the token endpoint.
#[derive(Clone, Debug)]
pub struct TokenGrant {
	/// Access token.
	pub access_token: TokenSecret,
	/// Refresh token, when issued.
	pub refresh_token: Option<TokenSecret>,
	/// Access token lifetime.
	pub expires_in: Duration,
}

/// Network operations of the device authorization grant.
pub trait OidcClient
where
	Self: Send + Sync,
{
	/// Registers a public client able to request `scopes`.
	fn register_client<'a>(
		&'a self,
		region: &'a Region,
		scopes: &'a ScopeSet,
	) -> OidcFuture<'a, ClientRegistration>;

	/// Requests device and user codes for the session at `start_url`.
	fn start_device_authorization<'a>(
		&'a self,
		registration: &'a ClientRegistration,
		start_url: &'a Url,
		scopes: &'a ScopeSet,
	) -> OidcFuture<'a, DeviceAuthorization>;

	/// Polls the token endpoint once.
	fn poll_device_token<'a>(
		&'a self,
		registration: &'a ClientRegistration,
		authorization: &'a DeviceAuthorization,
	) -> OidcFuture<'a, DevicePoll>;

	/// Exchanges a refresh token for a new access token.
	fn refresh_token<'a>(
		&'a self,
		registration: &'a ClientRegistration,
		refresh_token: &'a TokenSecret,
		scopes: &'a ScopeSet,
	) -> OidcFuture<'a, TokenGrant>;
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport.
	fn map_transport_error(
		&self,
		flow: FlowKind,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		flow: FlowKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => {
				let inner = *inner;

				if inner.is_builder() {
					return ConfigError::from(inner).into();
				}
				if inner.is_timeout() {
					return TransientError::TokenEndpoint {
						message: format!("request timed out during {flow}"),
						status: meta_status(meta)
							.or_else(|| inner.status().map(|code| code.as_u16())),
						retry_after: meta_retry_after(meta),
					}
					.into();
				}

				TransportError::from(inner).into()
			},
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::from(inner).into(),
			HttpClientError::Other(message) => TransientError::TokenEndpoint {
				message: format!("HTTP client error during {flow}: {message}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			}
			.into(),
			_ => TransientError::TokenEndpoint {
				message: format!("HTTP client error during {flow}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			}
			.into(),
		}
	}
}

/// [`OidcClient`] speaking HTTP to the endpoints chosen by an [`EndpointResolver`].
pub struct HttpOidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	endpoints: Arc<dyn EndpointResolver>,
	client_name: String,
}
#[cfg(feature = "reqwest")]
impl HttpOidcClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Builds a reqwest-backed client against the public AWS OIDC endpoints.
	pub fn new(config: &BrokerConfig) -> Result<Self> {
		let client = ReqwestHttpClient::new()?;

		Ok(Self::with_transport(
			config,
			Arc::new(client),
			Arc::new(ReqwestTransportErrorMapper),
			Arc::new(AwsOidcEndpoints),
		))
	}
}
impl<C, M> HttpOidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a client from explicit collaborators.
	pub fn with_transport(
		config: &BrokerConfig,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
		endpoints: Arc<dyn EndpointResolver>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			endpoints,
			client_name: config.client_name.clone(),
		}
	}

	/// Replaces the endpoint resolver.
	pub fn with_endpoints(mut self, endpoints: Arc<dyn EndpointResolver>) -> Self {
		self.endpoints = endpoints;

		self
	}

	async fn register(&self, region: &Region, scopes: &ScopeSet) -> Result<ClientRegistration> {
		let descriptor = self.endpoints.descriptor(region)?;
		let payload = RegistrationRequest {
			client_name: &self.client_name,
			client_type: "public",
			grant_types: [DEVICE_CODE_GRANT, "refresh_token"],
			token_endpoint_auth_method: "client_secret_post",
			scope: (!scopes.is_empty()).then(|| scopes.normalized()),
		};
		let body = serde_json::to_vec(&payload).map_err(|e| TransientError::TokenEndpoint {
			message: format!("registration payload could not be encoded: {e}"),
			status: None,
			retry_after: None,
		})?;
		let request = Request::builder()
			.method(Method::POST)
			.uri(descriptor.endpoints.registration.as_str())
			.header(CONTENT_TYPE, JSON_CONTENT_TYPE)
			.header(ACCEPT, JSON_CONTENT_TYPE)
			.body(body)
			.map_err(ConfigError::from)?;
		let response = self.send(FlowKind::Registration, request).await?;

		if !response.is_success() {
			return Err(response.rejection(FlowKind::Registration));
		}

		let parsed = response.parse::<RegistrationResponse>()?;
		let expires_at = match parsed.client_secret_expires_at {
			Some(0) | None => None,
			Some(timestamp) => Some(
				OffsetDateTime::from_unix_timestamp(timestamp)
					.map_err(|_| ConfigError::ExpiresInOutOfRange)?,
			),
		};

		tracing::debug!(%region, client_id = %parsed.client_id, "Registered OIDC client.");

		Ok(ClientRegistration {
			region: region.clone(),
			client_id: parsed.client_id,
			client_secret: TokenSecret::new(parsed.client_secret),
			expires_at,
		})
	}

	async fn send(&self, flow: FlowKind, request: HttpRequest) -> Result<OidcResponse> {
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());
		let response = oauth2::AsyncHttpClient::call(&handle, request)
			.await
			.map_err(|e| self.error_mapper.map_transport_error(flow, slot.take().as_ref(), e))?;
		let metadata = slot.take().unwrap_or_default();

		if let Some(request_id) = &metadata.request_id {
			tracing::debug!(
				flow = flow.as_str(),
				%request_id,
				status = response.status().as_u16(),
				"OIDC endpoint answered."
			);
		}

		Ok(OidcResponse {
			status: response.status().as_u16(),
			body: response.into_body(),
			metadata,
		})
	}

	fn map_refresh_error(
		&self,
		meta: Option<ResponseMetadata>,
		err: BasicRequestTokenError<HttpClientError<C::TransportError>>,
	) -> Error {
		let meta = meta.as_ref();

		match err {
			RequestTokenError::ServerResponse(response) => map_refresh_rejection(&response, meta),
			RequestTokenError::Request(error) =>
				self.error_mapper.map_transport_error(FlowKind::Refresh, meta, error),
			RequestTokenError::Parse(error, _body) =>
				TransientError::ResponseParse { source: Arc::new(error), status: meta_status(meta) }
					.into(),
			RequestTokenError::Other(message) => TransientError::TokenEndpoint {
				message: format!("token endpoint returned an unexpected response: {message}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			}
			.into(),
		}
	}
}
impl<C, M> OidcClient for HttpOidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn register_client<'a>(
		&'a self,
		region: &'a Region,
		scopes: &'a ScopeSet,
	) -> OidcFuture<'a, ClientRegistration> {
		let span = FlowSpan::new(FlowKind::Registration, "register_client");

		Box::pin(span.instrument(async move {
			obs::record_flow_outcome(FlowKind::Registration, FlowOutcome::Attempt);

			let result = self.register(region, scopes).await;

			obs::record_flow_outcome(FlowKind::Registration, FlowOutcome::of(&result));

			result
		}))
	}

	fn start_device_authorization<'a>(
		&'a self,
		registration: &'a ClientRegistration,
		start_url: &'a Url,
		scopes: &'a ScopeSet,
	) -> OidcFuture<'a, DeviceAuthorization> {
		let span = FlowSpan::new(FlowKind::DeviceAuthorization, "start_device_authorization");

		Box::pin(span.instrument(async move {
			let descriptor = self.endpoints.descriptor(&registration.region)?;
			let scope = scopes.normalized();
			let mut pairs = vec![
				("client_id", registration.client_id.as_str()),
				("client_secret", registration.client_secret.expose()),
				("start_url", start_url.as_str()),
			];

			if !scopes.is_empty() {
				pairs.push(("scope", scope.as_str()));
			}

			let request = form_request(&descriptor.endpoints.device_authorization, &pairs)?;
			let response = self.send(FlowKind::DeviceAuthorization, request).await?;

			if !response.is_success() {
				return Err(response.rejection(FlowKind::DeviceAuthorization));
			}

			let parsed = response.parse::<DeviceAuthorizationResponse>()?;

			if parsed.expires_in <= 0 {
				return Err(ConfigError::NonPositiveExpiresIn.into());
			}

			Ok(DeviceAuthorization {
				device_code: TokenSecret::new(parsed.device_code),
				user_code: parsed.user_code,
				verification_uri: parsed.verification_uri,
				verification_uri_complete: parsed.verification_uri_complete,
				expires_in: Duration::seconds(parsed.expires_in),
				interval: parsed.interval.filter(|secs| *secs > 0).map(Duration::seconds),
			})
		}))
	}

	fn poll_device_token<'a>(
		&'a self,
		registration: &'a ClientRegistration,
		authorization: &'a DeviceAuthorization,
	) -> OidcFuture<'a, DevicePoll> {
		let span = FlowSpan::new(FlowKind::DeviceAuthorization, "poll_device_token");

		Box::pin(span.instrument(async move {
			let descriptor = self.endpoints.descriptor(&registration.region)?;
			let request = form_request(&descriptor.endpoints.token, &[
				("grant_type", DEVICE_CODE_GRANT),
				("device_code", authorization.device_code.expose()),
				("client_id", registration.client_id.as_str()),
				("client_secret", registration.client_secret.expose()),
			])?;
			let response = self.send(FlowKind::DeviceAuthorization, request).await?;

			if response.is_success() {
				return response.parse::<DeviceTokenResponse>()?.into_grant().map(DevicePoll::Granted);
			}

			match response.oauth_error().as_ref().map(|e| e.error.as_str()) {
				Some("authorization_pending") => Ok(DevicePoll::Pending),
				Some("slow_down") => Ok(DevicePoll::SlowDown),
				Some("access_denied") => Ok(DevicePoll::Denied),
				Some("expired_token") => Ok(DevicePoll::Expired),
				_ => Err(response.rejection(FlowKind::DeviceAuthorization)),
			}
		}))
	}

	fn refresh_token<'a>(
		&'a self,
		registration: &'a ClientRegistration,
		refresh_token: &'a TokenSecret,
		scopes: &'a ScopeSet,
	) -> OidcFuture<'a, TokenGrant> {
		let span = FlowSpan::new(FlowKind::Refresh, "refresh_token");

		Box::pin(span.instrument(async move {
			let descriptor = self.endpoints.descriptor(&registration.region)?;
			let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
				.map_err(|source| ConfigError::InvalidEndpoint { source })?;
			let oauth_client = BasicClient::new(ClientId::new(registration.client_id.clone()))
				.set_client_secret(ClientSecret::new(registration.client_secret.expose().to_owned()))
				.set_auth_type(AuthType::RequestBody)
				.set_token_uri(token_url);
			let slot = ResponseMetadataSlot::default();
			let handle = self.http_client.with_metadata(slot.clone());
			let refresh_secret = RefreshToken::new(refresh_token.expose().to_owned());
			let mut request = oauth_client.exchange_refresh_token(&refresh_secret);

			for scope in scopes.iter() {
				request = request.add_scope(Scope::new(scope.to_owned()));
			}

			let response = request
				.request_async(&handle)
				.await
				.map_err(|err| self.map_refresh_error(slot.take(), err))?;
			let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
			let expires_in =
				i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

			if expires_in <= 0 {
				return Err(ConfigError::NonPositiveExpiresIn.into());
			}

			Ok(TokenGrant {
				access_token: TokenSecret::new(response.access_token().secret().to_owned()),
				refresh_token: response
					.refresh_token()
					.map(|token| TokenSecret::new(token.secret().to_owned())),
				expires_in: Duration::seconds(expires_in),
			})
		}))
	}
}
impl<C, M> Debug for HttpOidcClient<C, M>
where
	C: ?Sized + OidcHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpOidcClient").field("client_name", &self.client_name).finish()
	}
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
	client_name: &'a str,
	client_type: &'static str,
	grant_types: [&'static str; 2],
	token_endpoint_auth_method: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	scope: Option<String>,
}

#[derive(Deserialize)]
struct RegistrationResponse {
	client_id: String,
	client_secret: String,
	#[serde(default)]
	client_secret_expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct DeviceAuthorizationResponse {
	device_code: String,
	user_code: String,
	verification_uri: Url,
	#[serde(default)]
	verification_uri_complete: Option<Url>,
	expires_in: i64,
	#[serde(default)]
	interval: Option<i64>,
}

#[derive(Deserialize)]
struct DeviceTokenResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
}
impl DeviceTokenResponse {
	fn into_grant(self) -> Result<TokenGrant> {
		let expires_in = self.expires_in.ok_or(ConfigError::MissingExpiresIn)?;

		if expires_in <= 0 {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}

		Ok(TokenGrant {
			access_token: TokenSecret::new(self.access_token),
			refresh_token: self.refresh_token.map(TokenSecret::new),
			expires_in: Duration::seconds(expires_in),
		})
	}
}

#[derive(Deserialize)]
struct OAuthErrorBody {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

struct OidcResponse {
	status: u16,
	body: Vec<u8>,
	metadata: ResponseMetadata,
}
impl OidcResponse {
	fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	fn parse<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(&self.body))
			.map_err(|e| {
				TransientError::ResponseParse { source: Arc::new(e), status: Some(self.status) }.into()
			})
	}

	fn oauth_error(&self) -> Option<OAuthErrorBody> {
		serde_json::from_slice(&self.body).ok()
	}

	fn rejection(&self, flow: FlowKind) -> Error {
		let body = self.oauth_error();
		let code = body.as_ref().map(|b| b.error.as_str()).unwrap_or_default();
		let reason = match &body {
			Some(OAuthErrorBody { error, error_description: Some(description) }) =>
				format!("{error}: {description}"),
			Some(OAuthErrorBody { error, .. }) => error.clone(),
			None => format!("HTTP {} during {flow}", self.status),
		};

		match code {
			"invalid_client" | "unauthorized_client" => Error::InvalidClient { reason },
			"invalid_grant" => Error::InvalidGrant { reason },
			"access_denied" => Error::AccessDenied,
			"expired_token" => Error::ExpiredGrant,
			_ => TransientError::TokenEndpoint {
				message: reason,
				status: Some(self.status),
				retry_after: self.metadata.retry_after,
			}
			.into(),
		}
	}
}

fn form_request(url: &Url, pairs: &[(&str, &str)]) -> Result<HttpRequest> {
	let body = form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();

	Request::builder()
		.method(Method::POST)
		.uri(url.as_str())
		.header(CONTENT_TYPE, FORM_CONTENT_TYPE)
		.header(ACCEPT, JSON_CONTENT_TYPE)
		.body(body.into_bytes())
		.map_err(|e| ConfigError::from(e).into())
}

fn map_refresh_rejection(response: &BasicErrorResponse, meta: Option<&ResponseMetadata>) -> Error {
	let code = response.error().as_ref();
	let reason = match response.error_description() {
		Some(description) => format!("{code}: {description}"),
		None => code.to_owned(),
	};

	match code {
		"invalid_grant" => Error::InvalidGrant { reason },
		"invalid_client" | "unauthorized_client" => Error::InvalidClient { reason },
		_ => TransientError::TokenEndpoint {
			message: reason,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into(),
	}
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn response(status: u16, body: &str) -> OidcResponse {
		OidcResponse { status, body: body.as_bytes().to_vec(), metadata: ResponseMetadata::default() }
	}

	#[test]
	fn rejections_map_onto_typed_errors() {
		assert!(matches!(
			response(400, r#"{"error":"invalid_client"}"#).rejection(FlowKind::Registration),
			Error::InvalidClient { .. }
		));
		assert!(matches!(
			response(400, r#"{"error":"expired_token"}"#).rejection(FlowKind::DeviceAuthorization),
			Error::ExpiredGrant
		));

		let unavailable = response(503, "<html>").rejection(FlowKind::DeviceAuthorization);

		assert!(unavailable.is_transient());
		assert!(!response(400, r#"{"error":"invalid_scope"}"#)
			.rejection(FlowKind::DeviceAuthorization)
			.is_transient());
	}

	#[test]
	fn device_token_requires_positive_lifetime() {
		let missing = DeviceTokenResponse {
			access_token: "a".into(),
			refresh_token: None,
			expires_in: None,
		};
		let zero = DeviceTokenResponse {
			access_token: "a".into(),
			refresh_token: None,
			expires_in: Some(0),
		};

		assert!(matches!(
			missing.into_grant(),
			Err(Error::Config(ConfigError::MissingExpiresIn))
		));
		assert!(matches!(zero.into_grant(), Err(Error::Config(ConfigError::NonPositiveExpiresIn))));
	}

	#[test]
	fn registration_expiry_is_optional() {
		let region = Region::new("us-east-1").expect("Region fixture should be valid.");
		let now = OffsetDateTime::now_utc();
		let mut registration = ClientRegistration {
			region,
			client_id: "client".into(),
			client_secret: TokenSecret::new("secret"),
			expires_at: None,
		};

		assert!(!registration.is_expired_at(now));

		registration.expires_at = Some(now - Duration::seconds(1));

		assert!(registration.is_expired_at(now));
	}

	#[test]
	fn form_request_encodes_pairs() {
		let url = Url::parse("https://oidc.us-east-1.amazonaws.com/token")
			.expect("Token URL should parse.");
		let request = form_request(&url, &[("grant_type", DEVICE_CODE_GRANT), ("scope", "a b")])
			.expect("Form request should build.");
		let body = String::from_utf8(request.body().clone()).expect("Body should be UTF-8.");

		assert_eq!(
			body,
			"grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code&scope=a+b"
		);
		assert_eq!(request.headers()[CONTENT_TYPE], FORM_CONTENT_TYPE);
	}
}
