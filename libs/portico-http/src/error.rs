use thiserror::Error;

/// Classification of URL validation failures.
///
/// Match on this instead of error message strings; message formats are
/// unstable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// Relative path given but the client has no base URL to resolve it against
    RelativeWithoutBase,
}

/// Failures of the request itself: building, transport, and policy.
///
/// HTTP statuses are never represented here; a 4xx/5xx response is still a
/// successful request, decoded into [`ApiError`](crate::ApiError) only
/// through `dispatch()`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// `http::Request` assembly failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// A header name did not parse
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// A header value did not parse
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// The request ran past its configured time budget
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Connection-level failure (DNS, connect, reset, protocol)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body ran past the configured size cap
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Body (de)serialization failure
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form body encoding failure
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Request buffer full; failed fast instead of queueing
    #[error("Service overloaded: request buffer full")]
    Overloaded,

    /// The client's internal worker task is gone
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// The request URL did not parse or resolve.
    ///
    /// Match on `kind`; `reason` is diagnostic text for logs.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// The URL scheme is not permitted by the transport security mode
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
