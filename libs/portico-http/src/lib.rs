#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP client infrastructure for Portico service clients
//!
//! This crate provides a hyper-based HTTP client with:
//! - Automatic TLS via rustls (HTTPS only by default)
//! - Configurable timeouts
//! - Ambient call context propagation (tenant and caller identity headers)
//! - Typed error decoding for failed responses
//! - Per-client cookie capture and replay with RFC 6265 path scoping
//! - **Transparent response decompression** (gzip, brotli, deflate)
//!
//! # Call Context
//!
//! Every request captures the ambient [`CallScope`](portico_context::CallScope)
//! at the moment its builder is created. The captured tenant identifier and
//! caller identity travel inside the request and become the
//! `X-Tenant-Identifier`, `User`, and `Authorization` headers on the wire,
//! unless the caller already set those headers explicitly.
//!
//! # Error Decoding
//!
//! `send()` returns `Ok` for every HTTP status and errors only on transport
//! failures. `dispatch()` additionally decodes non-2xx responses: first
//! against the operation's registered [`ErrorDecoder`] rules, then onto the
//! status-keyed [`ApiError`] variants.
//!
//! # Example
//!
//! ```ignore
//! use portico_http::{HttpClient, HttpClientBuilder};
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .base_url("https://customers.internal.example.com")
//!     .timeout(Duration::from_secs(10))
//!     .user_agent("my-app/1.0")
//!     .build()?;
//!
//! // reqwest-like API: response has body-reading methods
//! let customer: Customer = client
//!     .get("/customers/7")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod cookie;
mod decoder;
mod error;
mod layers;
mod request;
mod response;
mod tls;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{DEFAULT_USER_AGENT, HttpClientConfig, TlsRootConfig, TransportSecurity};
pub use cookie::CookieJar;
pub use decoder::{ApiError, ERROR_BODY_LIMIT, ErrorDecoder, ErrorDecoderBuilder, ErrorResponse};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{
    CookieLayer, CookieResponseFuture, CookieService, EmptyBodyLayer, EmptyBodyService,
    IdentityLayer, IdentityService, TenantLayer, TenantService,
};
pub use request::RequestBuilder;
pub use response::{HttpResponse, LimitedBody, ResponseBody};
