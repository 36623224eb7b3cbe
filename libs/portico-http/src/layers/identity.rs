use http::header::AUTHORIZATION;
use http::{HeaderValue, Request, Response};
use portico_context::{CallScope, CallerContext, constants};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that stamps caller identity headers from the request's
/// captured [`CallScope`]
///
/// Writes two headers, each only when not already present:
/// - `User`: the caller's user identifier
/// - `Authorization`: the caller's access token, verbatim (any scheme prefix
///   such as `Bearer ` must already be part of the token value)
#[derive(Clone, Default)]
pub struct IdentityLayer;

impl IdentityLayer {
    /// Create a new identity header layer
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for IdentityLayer {
    type Service = IdentityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IdentityService { inner }
    }
}

/// Service that adds caller identity headers to requests
#[derive(Clone)]
pub struct IdentityService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for IdentityService<S>
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
        let caller = req
            .extensions()
            .get::<CallScope>()
            .and_then(CallScope::caller)
            .cloned();
        if let Some(caller) = caller {
            stamp_identity(&mut req, &caller);
        }
        self.inner.call(req)
    }
}

fn stamp_identity<B>(req: &mut Request<B>, caller: &CallerContext) {
    let user_header = constants::user_header_name();
    if !req.headers().contains_key(&user_header) {
        match HeaderValue::from_str(caller.user_identifier()) {
            Ok(value) => {
                req.headers_mut().insert(user_header, value);
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "caller identifier is not a valid header value; skipping user header"
                );
            }
        }
    }

    if !req.headers().contains_key(AUTHORIZATION) {
        match HeaderValue::from_str(caller.access_token()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                req.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => {
                // The token stays out of the log
                tracing::warn!(
                    "caller access token is not a valid header value; skipping authorization header"
                );
            }
        }
    }
}
