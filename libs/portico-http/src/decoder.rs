//! Typed decoding of failed responses.
//!
//! Generated service clients register, per operation, which error type each
//! HTTP status maps to. [`ErrorDecoder::decode`] looks the registration up
//! and constructs the declared error from the response; anything unregistered
//! lands in a fixed status-keyed mapping. Decoding is total: every failed
//! response yields an [`ApiError`].

use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Bound on how much of a failed response body is captured for decoding (8 KiB)
pub const ERROR_BODY_LIMIT: usize = 8 * 1024;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Immutable snapshot of a failed response handed to error constructors.
///
/// The body is captured up to [`ERROR_BODY_LIMIT`] bytes; anything beyond
/// that is dropped, never buffered.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The server-sent error text: the captured body as UTF-8.
    ///
    /// `None` when the body is absent, empty, or not valid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        if self.body.is_empty() {
            return None;
        }
        std::str::from_utf8(&self.body).ok()
    }
}

/// Decoded form of a failed response.
///
/// `Declared` wraps an error type registered for the operation; the other
/// variants are the fixed status-keyed mapping applied when no registration
/// matches (or a registered constructor fails).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ApiError {
    /// Status 400; message is the server-sent error text, if any
    #[error("bad request: {}", .0.as_deref().unwrap_or("(no error text)"))]
    BadRequest(Option<String>),

    /// Status 403; message is the server-sent error text, if any
    #[error("invalid token: {}", .0.as_deref().unwrap_or("(no error text)"))]
    InvalidToken(Option<String>),

    /// Status 404; carries no message
    #[error("not found")]
    NotFound,

    /// Status 500; message is the server-sent error text, if any
    #[error("internal server error: {}", .0.as_deref().unwrap_or("(no error text)"))]
    Internal(Option<String>),

    /// Any other status with no registered mapping
    #[error("unexpected HTTP status {status} from {}", if .method_key.is_empty() { "unnamed operation" } else { .method_key.as_str() })]
    UnexpectedStatus {
        /// Operation the request was made for (may be empty)
        method_key: String,
        status: StatusCode,
        /// Captured body, bounded by [`ERROR_BODY_LIMIT`]
        body: Bytes,
    },

    /// An error type registered for the operation, constructed from the
    /// response. Recover the concrete type with [`ApiError::declared_as`].
    #[error("{0}")]
    Declared(#[source] BoxedError),

    /// The request itself failed before a response could be decoded
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl ApiError {
    /// Downcast a `Declared` error back to the registered concrete type.
    #[must_use]
    pub fn declared_as<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            ApiError::Declared(inner) => inner.as_ref().downcast_ref::<E>(),
            _ => None,
        }
    }
}

type Constructor = Box<dyn Fn(&ErrorResponse) -> Result<BoxedError, BoxedError> + Send + Sync>;

struct ErrorRule {
    status: StatusCode,
    type_name: &'static str,
    construct: Constructor,
}

/// Immutable dispatch table mapping (operation, status) to error
/// constructors.
///
/// Built once at client setup via [`ErrorDecoder::builder`]; rules cannot be
/// added after construction.
#[derive(Default)]
pub struct ErrorDecoder {
    rules: HashMap<String, Vec<ErrorRule>>,
}

impl fmt::Debug for ErrorDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorDecoder")
            .field("operations", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl ErrorDecoder {
    #[must_use]
    pub fn builder() -> ErrorDecoderBuilder {
        ErrorDecoderBuilder::default()
    }

    /// Decode a failed response for the named operation.
    ///
    /// Scans the operation's rules in registration order for the first one
    /// matching the response status and invokes its constructor. A missing
    /// operation, an unmatched status, or a failing constructor (logged once
    /// as an error) all land in the status-keyed fallback mapping.
    #[must_use]
    pub fn decode(&self, method_key: &str, response: &ErrorResponse) -> ApiError {
        if let Some(rules) = self.rules.get(method_key)
            && let Some(rule) = rules.iter().find(|r| r.status == response.status())
        {
            match (rule.construct)(response) {
                Ok(declared) => return ApiError::Declared(declared),
                Err(cause) => {
                    tracing::error!(
                        method_key,
                        status = %response.status(),
                        declared = rule.type_name,
                        error = %cause,
                        "failed to construct declared error; using status fallback"
                    );
                }
            }
        }
        status_fallback(method_key, response)
    }
}

/// The fixed status-keyed mapping applied when no registered rule produces an
/// error.
pub fn status_fallback(method_key: &str, response: &ErrorResponse) -> ApiError {
    let message = response.text().map(str::to_owned);
    match response.status() {
        StatusCode::BAD_REQUEST => ApiError::BadRequest(message),
        StatusCode::FORBIDDEN => ApiError::InvalidToken(message),
        StatusCode::NOT_FOUND => ApiError::NotFound,
        StatusCode::INTERNAL_SERVER_ERROR => ApiError::Internal(message),
        status => ApiError::UnexpectedStatus {
            method_key: method_key.to_owned(),
            status,
            body: response.body.clone(),
        },
    }
}

/// Builder collecting (operation, status) → constructor rules.
///
/// `method_key` names the calling operation; generated clients use the
/// `Service#operation` convention but any stable string works.
#[derive(Default)]
pub struct ErrorDecoderBuilder {
    rules: HashMap<String, Vec<ErrorRule>>,
}

impl ErrorDecoderBuilder {
    /// Register an error type for (`method_key`, `status`).
    ///
    /// The constructor receives the response snapshot; a constructor that
    /// ignores it (`|_| MyError::new()`) registers a fixed error. To map
    /// several statuses for one operation, chain `rule` calls; the first
    /// registration wins when a (operation, status) pair is repeated.
    #[must_use]
    pub fn rule<E, F>(self, method_key: impl Into<String>, status: StatusCode, construct: F) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&ErrorResponse) -> E + Send + Sync + 'static,
    {
        self.add_rule(
            method_key.into(),
            status,
            std::any::type_name::<E>(),
            Box::new(move |response| Ok(Box::new(construct(response)) as BoxedError)),
        )
    }

    /// Register a fallible constructor for (`method_key`, `status`).
    ///
    /// When the constructor fails, decoding logs the failure and falls back
    /// to the status-keyed mapping for that response.
    #[must_use]
    pub fn try_rule<E, F, C>(
        self,
        method_key: impl Into<String>,
        status: StatusCode,
        construct: F,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&ErrorResponse) -> Result<E, C> + Send + Sync + 'static,
        C: Into<BoxedError>,
    {
        self.add_rule(
            method_key.into(),
            status,
            std::any::type_name::<E>(),
            Box::new(move |response| match construct(response) {
                Ok(declared) => Ok(Box::new(declared) as BoxedError),
                Err(cause) => Err(cause.into()),
            }),
        )
    }

    #[must_use]
    pub fn build(self) -> ErrorDecoder {
        ErrorDecoder { rules: self.rules }
    }

    fn add_rule(
        mut self,
        method_key: String,
        status: StatusCode,
        type_name: &'static str,
        construct: Constructor,
    ) -> Self {
        let duplicate = self
            .rules
            .get(&method_key)
            .is_some_and(|rules| rules.iter().any(|r| r.status == status));
        if duplicate {
            tracing::warn!(
                method_key = %method_key,
                status = %status,
                declared = type_name,
                "duplicate error rule ignored; the first registration wins"
            );
            return self;
        }

        self.rules.entry(method_key).or_default().push(ErrorRule {
            status,
            type_name,
            construct,
        });
        self
    }
}
