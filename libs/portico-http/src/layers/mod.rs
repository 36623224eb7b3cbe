//! Tower layers for HTTP client middleware
//!
//! This module provides Tower service layers that can be composed to build
//! the HTTP client middleware stack.
//!
//! ## Available Layers
//!
//! - [`TenantLayer`] - Stamps the tenant identifier header from the call scope
//! - [`IdentityLayer`] - Stamps caller identity and authorization headers from the call scope
//! - [`EmptyBodyLayer`] - Declares `Content-Length: 0` on body-less POST/PUT requests
//! - [`CookieLayer`] - Replays stored cookies and records returned ones

mod cookie;
mod empty_body;
mod identity;
mod tenant;

pub use cookie::{CookieLayer, CookieResponseFuture, CookieService};
pub use empty_body::{EmptyBodyLayer, EmptyBodyService};
pub use identity::{IdentityLayer, IdentityService};
pub use tenant::{TenantLayer, TenantService};
