use crate::decoder::{ERROR_BODY_LIMIT, ErrorResponse};
use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body::Frame;
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Boxed response body, erased so the stack's output type stays the same
/// whether or not the decompression layer rewrote the body (gzip/br/deflate).
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

pin_project! {
    /// Streaming body that counts every frame against a byte budget.
    ///
    /// Produced by [`HttpResponse::into_limited_body()`] for callers that
    /// process a body incrementally but still want the `max_body_size`
    /// protection the buffered readers give. The first frame that pushes the
    /// running total past the budget yields [`HttpError::BodyTooLarge`].
    pub struct LimitedBody {
        #[pin]
        inner: ResponseBody,
        limit: usize,
        read: usize,
    }
}

impl LimitedBody {
    /// Wrap `inner`, rejecting it past `limit` decompressed bytes.
    #[must_use]
    pub fn new(inner: ResponseBody, limit: usize) -> Self {
        Self {
            inner,
            limit,
            read: 0,
        }
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.read
    }

    /// The byte budget this body was created with
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl http_body::Body for LimitedBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        let Some(frame) = std::task::ready!(this.inner.poll_frame(cx)) else {
            return Poll::Ready(None);
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => return Poll::Ready(Some(Err(HttpError::Transport(e)))),
        };

        if let Some(data) = frame.data_ref() {
            *this.read += data.len();
            if *this.read > *this.limit {
                return Poll::Ready(Some(Err(HttpError::BodyTooLarge {
                    limit: *this.limit,
                    actual: *this.read,
                })));
            }
        }
        Poll::Ready(Some(Ok(frame)))
    }
}

/// A received response, any status, with size-limited body readers.
///
/// The helpers read the body without looking at the status; turning a failed
/// response into a typed error is the job of `RequestBuilder::dispatch()`.
/// Every read path honors the client's `max_body_size`.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    /// Response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Take the underlying `http::Response` back out.
    ///
    /// The body has already passed the decompression layer, so it carries
    /// decompressed bytes whatever encoding the server used.
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Read the response body as bytes
    ///
    /// Enforces the `max_body_size` limit (on decompressed bytes).
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Read the response body as text (UTF-8)
    ///
    /// Invalid UTF-8 sequences are replaced with the Unicode replacement
    /// character.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    pub async fn text(self) -> Result<String, HttpError> {
        let body_bytes = read_body_limited(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Parse the response body as JSON
    ///
    /// The status is not inspected; parse only when the response is known to
    /// carry the expected payload (2xx on the dispatch path).
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    /// Returns `HttpError::Json` if parsing fails.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body_bytes = read_body_limited(self.inner, self.max_body_size).await?;
        let value = serde_json::from_slice(&body_bytes)?;
        Ok(value)
    }

    /// The raw body stream, with NO size limit applied.
    ///
    /// For untrusted responses prefer
    /// [`into_limited_body()`](Self::into_limited_body), which keeps the
    /// `max_body_size` protection while still streaming.
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.inner.into_body()
    }

    /// The body as a stream that enforces `max_body_size` frame by frame.
    ///
    /// The limit counts decompressed bytes; a small compressed payload that
    /// inflates past the limit is rejected mid-stream.
    #[must_use]
    pub fn into_limited_body(self) -> LimitedBody {
        LimitedBody::new(self.inner.into_body(), self.max_body_size)
    }

    /// The body size cap this response was configured with
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Capture the response as an immutable snapshot for error decoding.
    ///
    /// The body is read up to the error-capture bound and silently truncated
    /// beyond it; a huge failure payload must never abort decoding.
    pub(crate) async fn into_error_response(self) -> Result<ErrorResponse, HttpError> {
        let cap = self.max_body_size.min(ERROR_BODY_LIMIT);
        let (parts, body) = self.inner.into_parts();
        let body = read_body_truncated(body, cap).await?;
        Ok(ErrorResponse::new(parts.status, parts.headers, body))
    }
}

/// Accumulate the whole body, failing as soon as the running total passes
/// `limit`.
///
/// The limit counts decompressed bytes, which is what keeps a small
/// compressed payload from expanding into an unbounded allocation.
async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

/// Read up to `limit` bytes of the body, dropping the rest.
async fn read_body_truncated(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let remaining = limit - collected.len();
            if chunk.len() >= remaining {
                collected.extend_from_slice(&chunk[..remaining]);
                break;
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
