//! Ambient caller and tenant context for Portico service clients
//!
//! Call state lives in thread-local slots with guard-based scoping:
//! - [`CallerContext`] / [`CallerGuard`] for the acting user and their token
//! - [`TenantGuard`] for the tenant identifier
//! - [`CallScope`] to snapshot both and carry them across thread boundaries
//!
//! Context never crosses threads implicitly. Capture a [`CallScope`] on the
//! submitting thread and install it in the worker with `enter`, `run`, or
//! `bind`.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod caller;
pub mod constants;
pub mod scope;
pub mod tenant;

pub use caller::{CallerContext, CallerGuard};
pub use scope::{CallScope, ScopeGuard};
pub use tenant::TenantGuard;
