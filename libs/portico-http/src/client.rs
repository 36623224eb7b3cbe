use crate::builder::HttpClientBuilder;
use crate::config::TransportSecurity;
use crate::cookie::CookieJar;
use crate::decoder::ErrorDecoder;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tower::Service;
use tower::buffer::Buffer;
use url::Url;

/// Boxed response future produced by the middleware stack
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// The buffered service shared by all clones of a client
///
/// `Buffer<Req, F>` in tower 0.5 takes the request type and the inner
/// service's future type.
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// HTTP client with a tower middleware stack
///
/// Every request runs through a tower service stack that handles timeouts,
/// ambient context headers (tenant and caller identity), cookie capture and
/// replay, and response decompression. Failed responses can be decoded into
/// operation-declared error types via [`RequestBuilder::dispatch`].
///
/// Use [`HttpClientBuilder`] to construct instances with custom configuration.
///
/// # Thread Safety
///
/// `HttpClient` is `Clone + Send + Sync` and cloning is cheap: requests flow
/// through a `tower::buffer::Buffer` channel to a single worker task, so
/// clones issue requests concurrently without any lock around the client.
///
/// # Example
///
/// ```ignore
/// struct CustomerApi {
///     http: HttpClient,
/// }
///
/// impl CustomerApi {
///     async fn find(&self, id: u64) -> Result<Customer, ApiError> {
///         let resp = self
///             .http
///             .get(&format!("/customers/{id}"))
///             .operation("CustomerApi#find")
///             .dispatch()
///             .await?;
///         Ok(resp.json().await?)
///     }
/// }
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
    pub(crate) base_url: Option<Url>,
    pub(crate) user_agent: HeaderValue,
    pub(crate) decoder: Option<Arc<ErrorDecoder>>,
    pub(crate) jar: Arc<CookieJar>,
}

impl HttpClient {
    /// Client with the default configuration
    ///
    /// # Errors
    /// Fails when the TLS connector cannot be built
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    /// Entry point for a configured client
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Start a GET request
    ///
    /// `url` may be absolute (`https://api.example.com/users`) or, when the
    /// client carries a base URL, a path that resolves against it
    /// (`/users/7`, `search?q=x`). URL problems surface when the request is
    /// sent, not here.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let user: User = client.get("/users/7").send().await?.json().await?;
    /// ```
    pub fn get(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self, http::Method::GET, url.to_owned())
    }

    /// Start a POST request
    ///
    /// # Example
    ///
    /// ```ignore
    /// let resp = client
    ///     .post("/customers")
    ///     .json(&NewCustomer { name: "Alice" })?
    ///     .send()
    ///     .await?;
    /// ```
    pub fn post(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self, http::Method::POST, url.to_owned())
    }

    /// Start a PUT request
    pub fn put(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self, http::Method::PUT, url.to_owned())
    }

    /// Start a PATCH request
    pub fn patch(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self, http::Method::PATCH, url.to_owned())
    }

    /// Start a DELETE request
    pub fn delete(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self, http::Method::DELETE, url.to_owned())
    }

    /// Seed the cookie jar with a cookie scoped to the given path
    ///
    /// The cookie is stored against the client's base URL origin and replayed
    /// on matching requests, exactly as if the server had answered with
    /// `Set-Cookie: {name}={value}; Path={path}`.
    ///
    /// # Panics
    ///
    /// Panics if the client was built without a base URL, or if `name`,
    /// `value`, or `path` fall outside the RFC 6265 grammar for cookie
    /// names, values, and paths.
    pub fn put_cookie(&self, path: &str, name: &str, value: &str) {
        let Some(base) = self.base_url.as_ref() else {
            panic!("put_cookie requires a client built with a base_url");
        };
        self.jar.seed(base, path, name, value);
    }
}

/// Map buffer errors to `HttpError`
///
/// `tower::buffer` surfaces inner service errors as `ServiceError` and
/// reports a dead worker task as `Closed`.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            // Not an inner service error: the buffer worker panicked or its
            // channel was dropped. ServiceClosed rather than Overloaded,
            // since the worker is gone rather than busy.
            tracing::error!(error = %err, "client worker task is gone; failing the request");
            HttpError::ServiceClosed
        }
    }
}

/// Try to acquire a buffer slot with fail-fast semantics.
///
/// If the buffer is full, returns `HttpError::Overloaded` immediately instead
/// of blocking. This prevents request pile-up under load.
pub async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    use std::task::Poll;

    // One poll only: Pending means the buffer is full right now
    let poll_result = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match poll_result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_USER_AGENT, HttpClientConfig};
    use crate::decoder::ApiError;
    use crate::error::InvalidUriKind;
    use httpmock::prelude::*;
    use portico_context::{CallScope, CallerContext, CallerGuard, TenantGuard};
    use serde_json::json;

    fn test_client(server: &MockServer) -> HttpClient {
        HttpClientBuilder::new()
            .allow_insecure_http()
            .base_url(server.base_url())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_against_base_url() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET).path("/customers/7");
            then.status(200).json_body(json!({"id": 7}));
        });

        let client = test_client(&server);
        let resp = client.get("/customers/7").send().await.unwrap();

        assert_eq!(resp.status(), hyper::StatusCode::OK);
        mock.assert();
    }

    #[tokio::test]
    async fn test_post_form_body_and_content_type() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/token")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("grant_type=client_credentials&scope=read");
            then.status(200);
        });

        let client = test_client(&server);
        client
            .post("/token")
            .form(&[("grant_type", "client_credentials"), ("scope", "read")])
            .unwrap()
            .send()
            .await
            .unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_json_body_parsing() {
        #[derive(serde::Deserialize)]
        struct Customer {
            name: String,
            balance: i64,
        }

        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/customers/1");
            then.status(200)
                .json_body(json!({"name": "Imani", "balance": 250}));
        });

        let client = test_client(&server);
        let customer: Customer = client
            .get("/customers/1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(customer.name, "Imani");
        assert_eq!(customer.balance, 250);
    }

    #[tokio::test]
    async fn test_post_json_body_and_content_type() {
        #[derive(serde::Serialize)]
        struct NewCustomer {
            name: String,
        }

        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/customers")
                .header("content-type", "application/json")
                .json_body(json!({"name": "Alice"}));
            then.status(201).json_body(json!({"id": 1}));
        });

        let client = test_client(&server);
        let resp = client
            .post("/customers")
            .json(&NewCustomer {
                name: "Alice".to_owned(),
            })
            .unwrap()
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), hyper::StatusCode::CREATED);
        mock.assert();
    }

    #[tokio::test]
    async fn test_absolute_url_bypasses_base_url() {
        let base_server = MockServer::start();
        let other_server = MockServer::start();
        let _m = other_server.mock(|when, then| {
            when.method(Method::GET).path("/elsewhere");
            then.status(200);
        });

        let client = test_client(&base_server);
        let url = format!("{}/elsewhere", other_server.base_url());
        let resp = client.get(&url).send().await.unwrap();

        assert_eq!(resp.status(), hyper::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_relative_url_without_base_fails() {
        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .build()
            .unwrap();

        let result = client.get("/nowhere").send().await;

        assert!(matches!(
            result,
            Err(HttpError::InvalidUri {
                kind: InvalidUriKind::RelativeWithoutBase,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_tenant_header_added_from_guard() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ctx")
                .header("x-tenant-identifier", "acme");
            then.status(200);
        });

        let client = test_client(&server);
        let _tenant = TenantGuard::new("acme");
        client.get("/ctx").send().await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_identity_headers_added_from_guard() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ctx")
                .header("user", "svc-billing")
                .header("authorization", "Bearer token-1");
            then.status(200);
        });

        let client = test_client(&server);
        let _caller = CallerGuard::new(CallerContext::new("svc-billing", "Bearer token-1"));
        client.get("/ctx").send().await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_explicit_header_wins_over_ambient_context() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ctx")
                .header("x-tenant-identifier", "explicit");
            then.status(200);
        });

        let client = test_client(&server);
        let _tenant = TenantGuard::new("ambient");
        client
            .get("/ctx")
            .header("X-Tenant-Identifier", "explicit")
            .send()
            .await
            .unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_builder_tenant_overrides_ambient() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ctx")
                .header("x-tenant-identifier", "chosen");
            then.status(200);
        });

        let client = test_client(&server);
        let _tenant = TenantGuard::new("ambient");
        client.get("/ctx").tenant("chosen").send().await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_builder_caller_overrides_ambient() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ctx")
                .header("user", "svc-b")
                .header("authorization", "tok-b");
            then.status(200);
        });

        let client = test_client(&server);
        let _caller = CallerGuard::new(CallerContext::new("svc-a", "tok-a"));
        client
            .get("/ctx")
            .caller(CallerContext::new("svc-b", "tok-b"))
            .send()
            .await
            .unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_explicit_scope_replaces_captured_context() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ctx")
                .header_missing("x-tenant-identifier");
            then.status(200);
        });

        let client = test_client(&server);
        let _tenant = TenantGuard::new("ambient");
        client
            .get("/ctx")
            .scope(CallScope::empty())
            .send()
            .await
            .unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_scope_captured_when_builder_is_created() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ctx")
                .header("x-tenant-identifier", "acme");
            then.status(200);
        });

        let client = test_client(&server);
        let request = {
            let _tenant = TenantGuard::new("acme");
            client.get("/ctx")
        };

        // The guard is gone, but the builder holds the scope it captured at
        // construction time.
        request.send().await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_bound_scope_applies_on_another_thread() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/scoped")
                .header("x-tenant-identifier", "acme");
            then.status(200);
        });

        let client = test_client(&server);
        let scope = CallScope::empty().with_tenant("acme");
        let request = std::thread::spawn(scope.bind(move || client.get("/scoped")))
            .join()
            .unwrap();

        request.send().await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_post_with_empty_body_sends_content_length_zero() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/submit")
                .header("content-length", "0");
            then.status(200);
        });

        let client = test_client(&server);
        client.post("/submit").send().await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_cookie_recorded_and_replayed() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(Method::GET).path("/login");
            then.status(200).header("set-cookie", "session=abc123; Path=/");
        });
        let portal = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/portal")
                .header("cookie", "session=abc123");
            then.status(200);
        });

        let client = test_client(&server);
        client.get("/login").send().await.unwrap();
        client.get("/portal").send().await.unwrap();

        login.assert();
        portal.assert();
    }

    #[tokio::test]
    async fn test_cookie_not_replayed_outside_its_path() {
        let server = MockServer::start();
        let _login = server.mock(|when, then| {
            when.method(Method::GET).path("/portal/login");
            then.status(200).header("set-cookie", "sid=1; Path=/portal");
        });
        let other = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/other")
                .header_missing("cookie");
            then.status(200);
        });

        let client = test_client(&server);
        client.get("/portal/login").send().await.unwrap();
        client.get("/other").send().await.unwrap();

        other.assert();
    }

    #[tokio::test]
    async fn test_put_cookie_seeds_the_jar() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/v1/data")
                .header("cookie", "preset=42");
            then.status(200);
        });

        let client = test_client(&server);
        client.put_cookie("/v1", "preset", "42");
        client.get("/v1/data").send().await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    #[should_panic(expected = "put_cookie requires a client built with a base_url")]
    async fn test_put_cookie_without_base_url_panics() {
        let client = HttpClientBuilder::new().build().unwrap();
        client.put_cookie("/", "name", "value");
    }

    #[tokio::test]
    #[should_panic(expected = "invalid cookie name")]
    async fn test_put_cookie_rejects_invalid_name() {
        let client = HttpClientBuilder::new()
            .base_url("https://svc.local")
            .build()
            .unwrap();
        client.put_cookie("/", "bad;name", "v");
    }

    #[tokio::test]
    async fn test_dispatch_returns_declared_error() {
        #[derive(Debug, thiserror::Error)]
        #[error("customer missing: {0}")]
        struct CustomerMissing(String);

        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/customers/7");
            then.status(404).body("customer 7 is gone");
        });

        let decoder = ErrorDecoder::builder()
            .rule(
                "CustomerApi#find",
                hyper::StatusCode::NOT_FOUND,
                |resp: &crate::decoder::ErrorResponse| {
                    CustomerMissing(resp.text().unwrap_or_default().to_owned())
                },
            )
            .build();

        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .base_url(server.base_url())
            .error_decoder(decoder)
            .build()
            .unwrap();

        let err = client
            .get("/customers/7")
            .operation("CustomerApi#find")
            .dispatch()
            .await
            .unwrap_err();

        let declared = err.declared_as::<CustomerMissing>().expect("declared error");
        assert_eq!(declared.0, "customer 7 is gone");
    }

    #[tokio::test]
    async fn test_dispatch_falls_back_on_status() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::POST).path("/orders");
            then.status(400).body("quantity must be positive");
        });

        let client = test_client(&server);
        let err = client
            .post("/orders")
            .operation("OrderApi#create")
            .dispatch()
            .await
            .unwrap_err();

        match err {
            ApiError::BadRequest(Some(message)) => {
                assert_eq!(message, "quantity must be positive");
            }
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_reports_unexpected_status() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/orders/9");
            then.status(418).body("teapot");
        });

        let client = test_client(&server);
        let err = client
            .get("/orders/9")
            .operation("OrderApi#find")
            .dispatch()
            .await
            .unwrap_err();

        match err {
            ApiError::UnexpectedStatus {
                method_key,
                status,
                body,
            } => {
                assert_eq!(method_key, "OrderApi#find");
                assert_eq!(status, hyper::StatusCode::IM_A_TEAPOT);
                assert_eq!(body.as_ref(), b"teapot");
            }
            other => panic!("expected UnexpectedStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_passes_success_through() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::POST).path("/orders");
            then.status(201).json_body(json!({"id": 9}));
        });

        let client = test_client(&server);
        let resp = client
            .post("/orders")
            .operation("OrderApi#create")
            .dispatch()
            .await
            .unwrap();

        assert_eq!(resp.status(), hyper::StatusCode::CREATED);
    }

    fn gzip_compress(data: &[u8]) -> Vec<u8> {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_gzip_response_is_decompressed() {
        let server = MockServer::start();
        let body = gzip_compress(br#"{"compressed": true}"#);
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/gz");
            then.status(200)
                .header("content-encoding", "gzip")
                .body(body);
        });

        let client = test_client(&server);
        let resp = client.get("/gz").send().await.unwrap();
        let text = resp.text().await.unwrap();

        assert_eq!(text, r#"{"compressed": true}"#);
    }

    #[tokio::test]
    async fn test_default_user_agent_is_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ua")
                .header("user-agent", DEFAULT_USER_AGENT);
            then.status(200);
        });

        let client = test_client(&server);
        client.get("/ua").send().await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_custom_user_agent_wins() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ua")
                .header("user-agent", "portico-tests/0.0");
            then.status(200);
        });

        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .base_url(server.base_url())
            .user_agent("portico-tests/0.0")
            .build()
            .unwrap();
        client.get("/ua").send().await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_request_header_overrides_client_user_agent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/ua")
                .header("user-agent", "per-request/1");
            then.status(200);
        });

        let client = test_client(&server);
        client
            .get("/ua")
            .header("User-Agent", "per-request/1")
            .send()
            .await
            .unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn test_client_is_clone() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/test");
            then.status(200);
        });

        let client = test_client(&server);
        let clone = client.clone();

        let r1 = client.get("/test").send().await.unwrap();
        let r2 = clone.get("/test").send().await.unwrap();

        assert_eq!(r1.status(), hyper::StatusCode::OK);
        assert_eq!(r2.status(), hyper::StatusCode::OK);
    }

    #[test]
    fn test_client_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpClient>();
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_client() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/test");
            then.status(200).body("ok");
        });

        let client = test_client(&server);
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.get("/test").send().await })
            })
            .collect();

        for handle in handles {
            let resp = handle.await.unwrap().unwrap();
            assert_eq!(resp.status(), hyper::StatusCode::OK);
        }
    }

    /// With fail-fast buffer semantics, some requests may fail with
    /// `Overloaded` when the buffer is full. This test verifies there is no
    /// deadlock, at least some requests succeed, and failed requests get
    /// `Overloaded` rather than some other error.
    #[tokio::test]
    async fn test_small_buffer_capacity_no_deadlock() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/test");
            then.status(200).body("ok");
        });

        let config = HttpClientConfig {
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 2,
            ..Default::default()
        };
        let client = HttpClientBuilder::with_config(config)
            .base_url(server.base_url())
            .build()
            .unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.get("/test").send().await })
            })
            .collect();

        let mut success_count = 0;
        let mut overloaded_count = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(resp) => {
                    assert_eq!(resp.status(), hyper::StatusCode::OK);
                    success_count += 1;
                }
                Err(HttpError::Overloaded) => {
                    overloaded_count += 1;
                }
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }

        assert!(success_count > 0, "at least one request should succeed");
        assert_eq!(success_count + overloaded_count, 10);
    }

    /// A full single-slot buffer must fail the second request immediately
    /// instead of queueing behind the first.
    #[tokio::test]
    async fn test_buffer_overflow_returns_overloaded() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/slow");
            then.status(200).body("ok");
        });

        let config = HttpClientConfig {
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 1,
            ..Default::default()
        };
        let client = HttpClientBuilder::with_config(config)
            .base_url(server.base_url())
            .build()
            .unwrap();

        let blocker = client.clone();
        let handle = tokio::spawn(async move { blocker.get("/slow").send().await });

        // Give the first request time to claim the buffer slot
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            client.get("/slow").send(),
        )
        .await;

        // Must resolve immediately, either fail-fast or (timing dependent)
        // after the slot was already released
        let inner = result.expect("request should not block waiting for buffer");
        match inner {
            Err(HttpError::Overloaded) | Ok(_) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
        _ = handle.await;
    }

    #[tokio::test]
    async fn test_large_body_reads_complete_concurrently() {
        let server = MockServer::start();
        let large_body = "x".repeat(100 * 1024);
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/large");
            then.status(200).body(&large_body);
        });

        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .base_url(server.base_url())
            .max_body_size(1024 * 1024)
            .build()
            .unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.get("/large").send().await?.bytes().await })
            })
            .collect();

        let all = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            let mut results = Vec::new();
            for handle in handles {
                results.push(handle.await);
            }
            results
        })
        .await;

        let results = all.expect("body reads should complete within timeout");
        for result in results {
            let body = result.unwrap().unwrap();
            assert_eq!(body.len(), 100 * 1024);
        }
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/slow");
            then.status(200).delay(std::time::Duration::from_millis(500));
        });

        let client = HttpClientBuilder::new()
            .allow_insecure_http()
            .base_url(server.base_url())
            .timeout(std::time::Duration::from_millis(50))
            .build()
            .unwrap();

        let result = client.get("/slow").send().await;

        assert!(matches!(result, Err(HttpError::Timeout(_))));
    }

    #[test]
    fn test_map_buffer_error_passes_http_error_through() {
        let err: tower::BoxError = Box::new(HttpError::Overloaded);
        assert!(matches!(map_buffer_error(err), HttpError::Overloaded));
    }

    #[test]
    fn test_map_buffer_error_wraps_unknown_errors() {
        let err: tower::BoxError = Box::new(std::io::Error::other("worker died"));
        assert!(matches!(map_buffer_error(err), HttpError::ServiceClosed));
    }
}
