use crate::cookie::CookieJar;
use http::header::COOKIE;
use http::{Request, Response, Uri};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tower::{Layer, Service};

/// Tower layer that replays stored cookies on outbound requests and records
/// `Set-Cookie` response headers into a shared [`CookieJar`]
///
/// Requests that already carry a `Cookie` header are passed through
/// untouched; responses are always inspected for `Set-Cookie`.
#[derive(Clone)]
pub struct CookieLayer {
    jar: Arc<CookieJar>,
}

impl CookieLayer {
    /// Create a layer backed by the given jar
    #[must_use]
    pub fn new(jar: Arc<CookieJar>) -> Self {
        Self { jar }
    }
}

impl<S> Layer<S> for CookieLayer {
    type Service = CookieService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieService {
            inner,
            jar: self.jar.clone(),
        }
    }
}

/// Service that attaches stored cookies and records returned ones
#[derive(Clone)]
pub struct CookieService<S> {
    inner: S,
    jar: Arc<CookieJar>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CookieService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = CookieResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if !req.headers().contains_key(COOKIE)
            && let Some(value) = self.jar.cookie_header_for(req.uri())
        {
            req.headers_mut().insert(COOKIE, value);
        }
        let uri = req.uri().clone();
        CookieResponseFuture {
            inner: self.inner.call(req),
            jar: self.jar.clone(),
            uri,
        }
    }
}

pin_project! {
    /// Response future that records `Set-Cookie` headers into the jar
    pub struct CookieResponseFuture<F> {
        #[pin]
        inner: F,
        jar: Arc<CookieJar>,
        uri: Uri,
    }
}

impl<F, ResBody, E> Future for CookieResponseFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        if let Ok(response) = &result {
            this.jar.store_from_response(this.uri, response.headers());
        }
        Poll::Ready(result)
    }
}
