use crate::client::{BufferedService, HttpClient, map_buffer_error, try_acquire_buffer_slot};
use crate::config::TransportSecurity;
use crate::decoder::{ApiError, ErrorDecoder, status_fallback};
use crate::error::{HttpError, InvalidUriKind};
use crate::response::{HttpResponse, ResponseBody};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use portico_context::{CallScope, CallerContext};
use serde::Serialize;
use std::sync::Arc;
use tower::Service;
use url::Url;

/// What the builder will send as the request body.
///
/// Json and Form hold already-serialized bytes; the variant only decides
/// which default Content-Type applies.
#[derive(Clone, Debug)]
enum BodyKind {
    Empty,
    Bytes(Bytes),
    Json(Bytes),
    Form(Bytes),
}

/// HTTP request builder with fluent API
///
/// Created by [`HttpClient::get`], [`HttpClient::post`], etc.
/// Supports chaining headers, body and call-context configuration before
/// sending with [`send()`](RequestBuilder::send) or
/// [`dispatch()`](RequestBuilder::dispatch).
///
/// # Call context
///
/// The ambient [`CallScope`] (current caller and tenant) is captured when the
/// builder is created, not when the request is sent. The captured scope feeds
/// the tenant and identity headers; [`caller()`](RequestBuilder::caller) and
/// [`tenant()`](RequestBuilder::tenant) override the captured values
/// per-request.
///
/// # URL Construction
///
/// When the client has a `base_url`, relative paths are resolved against it
/// (RFC 3986 reference resolution). Absolute URLs are always accepted and
/// bypass the base. Query-string composition is not provided; build the URL
/// externally (e.g. via `url::Url`) and pass the final string.
///
/// # Example
///
/// ```ignore
/// use portico_http::HttpClient;
///
/// let client = HttpClient::builder()
///     .base_url("https://api.example.com")
///     .build()?;
///
/// // Simple GET against the base URL
/// let resp = client.get("/users/7").send().await?;
///
/// // POST with JSON body
/// let resp = client
///     .post("/users")
///     .header("x-request-id", "123")
///     .json(&NewUser { name: "Alice" })?
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    method: http::Method,
    url: String,
    headers: Vec<(http::header::HeaderName, http::header::HeaderValue)>,
    body: BodyKind,
    /// Error captured during building (deferred to `send()`)
    error: Option<HttpError>,
    /// Transport security mode for URL scheme validation
    transport_security: TransportSecurity,
    base_url: Option<Url>,
    user_agent: http::HeaderValue,
    decoder: Option<Arc<ErrorDecoder>>,
    /// Ambient call context, captured at construction
    scope: CallScope,
    /// Operation name for error decoding (empty when not set)
    method_key: String,
}

impl RequestBuilder {
    /// Create a new request builder (internal use only)
    pub(crate) fn new(client: &HttpClient, method: http::Method, url: String) -> Self {
        Self {
            service: client.service.clone(),
            max_body_size: client.max_body_size,
            method,
            url,
            headers: Vec::new(),
            body: BodyKind::Empty,
            error: None,
            transport_security: client.transport_security,
            base_url: client.base_url.clone(),
            user_agent: client.user_agent.clone(),
            decoder: client.decoder.clone(),
            scope: CallScope::capture(),
            method_key: String::new(),
        }
    }

    /// Add a single header to the request
    ///
    /// Explicit headers win over context-derived ones: a request that sets
    /// the tenant, user or authorization header here is passed through with
    /// that value.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let resp = client
    ///     .get("/orders")
    ///     .header("x-request-id", "abc123")
    ///     .send()
    ///     .await?;
    /// ```
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = self.push_header(name, value) {
            self.error = Some(e);
        }
        self
    }

    /// Add multiple headers to the request
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        if self.error.is_some() {
            return self;
        }
        for (name, value) in headers {
            if let Err(e) = self.push_header(&name, &value) {
                self.error = Some(e);
                break;
            }
        }
        self
    }

    fn push_header(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        let name = http::header::HeaderName::try_from(name)?;
        let value = http::header::HeaderValue::try_from(value)?;
        self.headers.push((name, value));
        Ok(())
    }

    /// Override the caller identity for this request
    ///
    /// Replaces the caller captured from the ambient context when the
    /// builder was created.
    pub fn caller(mut self, caller: CallerContext) -> Self {
        self.scope = self.scope.with_caller(caller);
        self
    }

    /// Override the tenant identifier for this request
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.scope = self.scope.with_tenant(tenant);
        self
    }

    /// Replace the whole captured call scope for this request
    ///
    /// Useful when a scope was captured elsewhere (e.g. before handing work
    /// to a task) and should drive this request instead of the ambient one.
    pub fn scope(mut self, scope: CallScope) -> Self {
        self.scope = scope;
        self
    }

    /// Name the calling operation for error decoding
    ///
    /// The name selects which registered error rules apply when
    /// [`dispatch()`](RequestBuilder::dispatch) decodes a failed response.
    /// Generated clients use the `Service#operation` convention.
    pub fn operation(mut self, method_key: impl Into<String>) -> Self {
        self.method_key = method_key.into();
        self
    }

    /// Set request body as JSON
    ///
    /// Serializes the value using `serde_json` and sets Content-Type to
    /// application/json unless a Content-Type header was already provided.
    ///
    /// # Errors
    ///
    /// Returns `Err(HttpError::Json)` if serialization fails.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let json_bytes = serde_json::to_vec(body)?;
        self.body = BodyKind::Json(Bytes::from(json_bytes));
        Ok(self)
    }

    /// Set request body as form URL-encoded
    ///
    /// Serializes the fields and sets Content-Type to
    /// application/x-www-form-urlencoded unless a Content-Type header was
    /// already provided.
    ///
    /// # Errors
    ///
    /// Returns `Err(HttpError::FormEncode)` if encoding fails.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let form_string = serde_urlencoded::to_string(fields)?;
        self.body = BodyKind::Form(Bytes::from(form_string));
        Ok(self)
    }

    /// Set request body as raw bytes
    pub fn body_bytes(mut self, body: Bytes) -> Self {
        self.body = BodyKind::Bytes(body);
        self
    }

    /// Set request body as a string
    pub fn body_string(mut self, body: String) -> Self {
        self.body = BodyKind::Bytes(Bytes::from(body));
        self
    }

    /// Send the request and return the response
    ///
    /// Returns `Ok` for every HTTP status the server produces; only failures
    /// of the request itself (invalid input, transport, timeout) are errors.
    /// Use [`dispatch()`](RequestBuilder::dispatch) to turn failed statuses
    /// into typed errors.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` if:
    /// - Request building failed (invalid headers, URL, etc.)
    /// - URL scheme is invalid for the transport security mode
    /// - Network/transport error
    /// - Request timeout
    /// - Concurrency limit reached (`Overloaded`)
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        // Return any deferred error
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = resolve_request_url(
            &self.url,
            self.base_url.as_ref(),
            self.transport_security,
        )?;

        let mut builder = Request::builder().method(self.method).uri(uri);

        let caller_set = |header: &http::header::HeaderName| {
            self.headers.iter().any(|(name, _)| name == header)
        };

        // Default Content-Type and User-Agent apply only when the caller set
        // neither themselves.
        if !caller_set(&http::header::CONTENT_TYPE) {
            let default_content_type = match &self.body {
                BodyKind::Json(_) => Some("application/json"),
                BodyKind::Form(_) => Some("application/x-www-form-urlencoded"),
                BodyKind::Empty | BodyKind::Bytes(_) => None,
            };
            if let Some(content_type) = default_content_type {
                builder = builder.header(http::header::CONTENT_TYPE, content_type);
            }
        }
        if !caller_set(&http::header::USER_AGENT) {
            builder = builder.header(http::header::USER_AGENT, self.user_agent);
        }

        // Add user-provided headers. The http builder appends rather than
        // replacing, so the defaults above are skipped whenever the user
        // provided their own value.
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }

        let body_bytes = match self.body {
            BodyKind::Empty => Bytes::new(),
            BodyKind::Bytes(b) | BodyKind::Json(b) | BodyKind::Form(b) => b,
        };

        let mut request = builder.body(Full::new(body_bytes))?;

        // The captured scope rides in the request extensions; the tenant and
        // identity layers read it from there.
        request.extensions_mut().insert(self.scope);

        // Fail-fast if buffer is full
        try_acquire_buffer_slot(&mut self.service).await?;

        let inner: Response<ResponseBody> =
            self.service.call(request).await.map_err(map_buffer_error)?;

        Ok(HttpResponse {
            inner,
            max_body_size: self.max_body_size,
        })
    }

    /// Send the request and decode failed responses into typed errors
    ///
    /// 2xx responses pass through unchanged. Any other status is captured
    /// and decoded: rules registered for the operation named via
    /// [`operation()`](RequestBuilder::operation) apply first, then the
    /// fixed status mapping (400, 403, 404, 500, otherwise
    /// [`ApiError::UnexpectedStatus`]).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] when the request itself fails, otherwise
    /// the decoded error for the failed response.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let customer: Customer = client
    ///     .get("/customers/7")
    ///     .operation("CustomerService#find")
    ///     .dispatch()
    ///     .await?
    ///     .json()
    ///     .await
    ///     .map_err(ApiError::Http)?;
    /// ```
    pub async fn dispatch(mut self) -> Result<HttpResponse, ApiError> {
        let method_key = std::mem::take(&mut self.method_key);
        let decoder = self.decoder.take();

        let response = self.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let snapshot = response.into_error_response().await?;
        let err = match decoder {
            Some(decoder) => decoder.decode(&method_key, &snapshot),
            None => status_fallback(&method_key, &snapshot),
        };
        Err(err)
    }
}

/// Resolve the request URL, applying the client base URL to relative paths,
/// and validate the scheme against the transport security configuration.
fn resolve_request_url(
    raw: &str,
    base_url: Option<&Url>,
    transport: TransportSecurity,
) -> Result<http::Uri, HttpError> {
    let absolute = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base_url {
            Some(base) => base.join(raw).map_err(|e| HttpError::InvalidUri {
                url: raw.to_owned(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?,
            None => {
                return Err(HttpError::InvalidUri {
                    url: raw.to_owned(),
                    kind: InvalidUriKind::RelativeWithoutBase,
                    reason: "relative URL requires a client base URL".to_owned(),
                });
            }
        },
        Err(e) => {
            return Err(HttpError::InvalidUri {
                url: raw.to_owned(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            });
        }
    };

    enforce_scheme(absolute.scheme(), transport)?;

    // url::Url guarantees a host for http/https, so the converted Uri always
    // carries an authority.
    absolute
        .as_str()
        .parse::<http::Uri>()
        .map_err(|e| HttpError::InvalidUri {
            url: raw.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })
}

/// Apply the transport security policy to a URL scheme.
///
/// # Errors
/// Rejects `http` under [`TransportSecurity::TlsOnly`] and any scheme other
/// than `http` or `https` unconditionally.
pub fn enforce_scheme(scheme: &str, transport: TransportSecurity) -> Result<(), HttpError> {
    match scheme {
        "https" => Ok(()),
        "http" => match transport {
            TransportSecurity::AllowInsecureHttp => Ok(()),
            TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
            }),
        },
        other => Err(HttpError::InvalidScheme {
            scheme: other.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
    }
}
