use http::{HeaderValue, Request, Response};
use portico_context::{CallScope, constants};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that stamps the tenant identifier header from the request's
/// captured [`CallScope`]
#[derive(Clone, Default)]
pub struct TenantLayer;

impl TenantLayer {
    /// Create a new tenant header layer
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TenantLayer {
    type Service = TenantService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantService { inner }
    }
}

/// Service that adds the tenant identifier header to requests
#[derive(Clone)]
pub struct TenantService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TenantService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let header = constants::tenant_header_name();
        // An explicitly set header always wins over the scope-derived one
        if !req.headers().contains_key(&header) {
            let tenant = req
                .extensions()
                .get::<CallScope>()
                .and_then(CallScope::tenant)
                .map(HeaderValue::from_str);
            match tenant {
                Some(Ok(value)) => {
                    req.headers_mut().insert(header, value);
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        error = %err,
                        "tenant identifier is not a valid header value; skipping tenant header"
                    );
                }
                None => {}
            }
        }
        self.inner.call(req)
    }
}
