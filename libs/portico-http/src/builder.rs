use crate::config::{HttpClientConfig, TlsRootConfig, TransportSecurity};
use crate::cookie::CookieJar;
use crate::decoder::ErrorDecoder;
use crate::error::{HttpError, InvalidUriKind};
use crate::layers::{CookieLayer, EmptyBodyLayer, IdentityLayer, TenantLayer};
use crate::request::enforce_scheme;
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::{HeaderValue, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use url::Url;

/// Assembles an [`HttpClient`](crate::HttpClient): takes the configuration,
/// validates it, and stacks the middleware over a hyper transport.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    base_url: Option<String>,
    decoder: Option<ErrorDecoder>,
}

impl HttpClientBuilder {
    /// Builder starting from [`HttpClientConfig::default`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    /// Builder starting from an existing configuration
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            base_url: None,
            decoder: None,
        }
    }

    /// End-to-end time budget for each request
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// User-Agent value stamped on requests that set none themselves
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Cap on response body size, counted after decompression
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Plain-HTTP policy for this client
    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Permit plain-HTTP connections, the shorthand for
    /// `.transport(TransportSecurity::AllowInsecureHttp)`
    ///
    /// Meant for tests against local mock servers; production traffic stays
    /// on TLS.
    ///
    /// # Availability
    ///
    /// Compiled only into debug builds unless the `allow-insecure-http`
    /// feature is enabled, so a release binary cannot reach it by accident.
    /// Release-mode integration tests opt in with:
    /// ```toml
    /// [features]
    /// allow-insecure-http = []
    /// ```
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "portico_http::security",
            "allow_insecure_http() enabled; traffic from this client is not encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Set the base URL that relative request paths resolve against
    ///
    /// With a base URL set, requests may use paths (`/customers/7`) instead of
    /// absolute URLs. The URL is parsed and checked against the transport
    /// security mode when the client is built. A base URL is also required
    /// for [`put_cookie`](crate::HttpClient::put_cookie).
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Attach an error decoder for typed error decoding via
    /// [`dispatch`](crate::RequestBuilder::dispatch)
    ///
    /// Without a decoder, `dispatch()` still maps failed responses onto the
    /// status-keyed [`ApiError`](crate::ApiError) variants.
    #[must_use]
    pub fn error_decoder(mut self, decoder: ErrorDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Set how many in-flight requests the client queues before it starts
    /// failing fast with `Overloaded`
    ///
    /// A capacity of 0 is meaningless (`tower::Buffer` panics on it) and is
    /// clamped to 1.
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// Validate the configuration and assemble the client
    ///
    /// # Errors
    /// Fails when TLS setup cannot produce a connector, when the base URL or
    /// user agent does not parse, or when the base URL's scheme is not
    /// permitted by the transport security mode
    pub fn build(self) -> Result<crate::HttpClient, HttpError> {
        // An insecure transport is always loud, once per client construction
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "building a client with TransportSecurity::AllowInsecureHttp; \
                 intended for mock-server tests only"
            );
        }

        let timeout = self.config.request_timeout;

        // Resolve the base URL: a builder-supplied string takes precedence
        // over the config field. Either way the scheme must satisfy the
        // transport security mode.
        let base_url = match self.base_url {
            Some(raw) => Some(Url::parse(&raw).map_err(|e| HttpError::InvalidUri {
                url: raw.clone(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?),
            None => self.config.base_url,
        };
        if let Some(base) = &base_url {
            enforce_scheme(base.scheme(), self.config.transport)?;
        }

        // The configured user agent must form a valid header value
        let user_agent = HeaderValue::from_str(&self.config.user_agent)?;

        // Native roots can fail here when the OS store yields nothing usable
        let https = build_https_connector(self.config.tls_roots, self.config.transport)?;
        let hyper_client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(https);

        // One jar per client; the cookie layer and put_cookie share it.
        let jar = Arc::new(CookieJar::new());

        // =======================================================================
        // Middleware stack (outermost first)
        // =======================================================================
        //
        // A request travels:
        //   Buffer → Timeout → Tenant → Identity → EmptyBody → Cookie →
        //   Decompression → hyper_client
        //
        // Tenant and Identity read the request's captured CallScope extension
        // and add the context headers unless the caller already set them.
        // EmptyBody adds `Content-Length: 0` to bodyless POST/PUT requests.
        // Cookie replays stored cookies on the way out and records Set-Cookie
        // on the way back.
        //
        // Status handling:
        //   - every HTTP status, 4xx/5xx included, comes back as Ok(Response)
        //   - Err is reserved for transport, TLS, timeout, and overload failures
        //   - non-2xx becomes a typed error only through dispatch()
        //
        // =======================================================================
        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(TenantLayer::new())
            .layer(IdentityLayer::new())
            .layer(EmptyBodyLayer::new())
            .layer(CookieLayer::new(jar.clone()))
            .layer(DecompressionLayer::new())
            .service(hyper_client);

        // Box the decompressed body into ResponseBody so the stack's output
        // type no longer names DecompressionBody<Incoming>.
        let service = service.map_response(box_response_body);

        // Collapse tower's BoxError into HttpError, stamping the configured
        // timeout onto Elapsed.
        let service = service.map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        let boxed_service = service.boxed_clone();

        // Buffer goes on last. Its worker task owns the stack and feeds it
        // from a channel, which is what makes the client handle Clone + Send
        // + Sync without a lock around the service.
        let buffer_capacity = self.config.buffer_capacity.max(1);
        let buffered_service: crate::client::BufferedService =
            Buffer::new(boxed_service, buffer_capacity);

        Ok(crate::HttpClient {
            service: buffered_service,
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
            base_url,
            user_agent,
            decoder: self.decoder.map(Arc::new),
            jar,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse the boxed error coming out of the tower stack into [`HttpError`].
///
/// `Elapsed` becomes `Timeout` carrying the configured duration; an
/// `HttpError` a middleware boxed on the way up is unwrapped back; anything
/// else is transport-level.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

/// Erase the concrete body type the decompression layer produces.
///
/// After this the stack's response type is `Response<ResponseBody>`
/// everywhere, whatever combination of `Incoming` and decompression wrappers
/// sits underneath.
fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// Construct the rustls connector for the configured trust anchors and
/// plain-HTTP policy.
///
/// Native roots come from the process-wide cache in [`tls`], so building many
/// clients hits the OS certificate store once. ALPN advertises both h2 and
/// http/1.1 (`enable_all_versions`); the handshake picks the protocol.
///
/// # Errors
///
/// Fails when the TLS provider rejects the root setup, or when native roots
/// are requested and the OS store yields no usable certificate.
fn build_https_connector(
    tls_roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let tls = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::get_crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            let client_config =
                tls::native_roots_client_config().map_err(|e| HttpError::Tls(e.into()))?;
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(client_config)
        }
    };

    let schemes = match transport {
        TransportSecurity::TlsOnly => tls.https_only(),
        TransportSecurity::AllowInsecureHttp => tls.https_or_http(),
    };

    Ok(schemes.enable_all_versions().build())
}
