use http::header::CONTENT_LENGTH;
use http::{HeaderValue, Method, Request, Response};
use http_body::Body;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that declares `Content-Length: 0` on body-less POST and PUT
/// requests
///
/// Some servers reject POST/PUT requests that carry neither a body nor a
/// `Content-Length` header. The header is only added when the body size is
/// known to be exactly zero and no explicit `Content-Length` is present.
#[derive(Clone, Default)]
pub struct EmptyBodyLayer;

impl EmptyBodyLayer {
    /// Create a new empty-body layer
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for EmptyBodyLayer {
    type Service = EmptyBodyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        EmptyBodyService { inner }
    }
}

/// Service that adds `Content-Length: 0` to body-less POST/PUT requests
#[derive(Clone)]
pub struct EmptyBodyService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for EmptyBodyService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ReqBody: Body,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let takes_body = req.method() == Method::POST || req.method() == Method::PUT;
        if takes_body
            && req.body().size_hint().exact() == Some(0)
            && !req.headers().contains_key(CONTENT_LENGTH)
        {
            req.headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
        self.inner.call(req)
    }
}
