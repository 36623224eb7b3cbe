/// Header carrying the tenant a request operates on (display form)
pub const TENANT_HEADER: &str = "X-Tenant-Identifier";

/// Lowercase tenant header for `HeaderName` construction
const TENANT_HEADER_LOWER: &str = "x-tenant-identifier";

/// Header carrying the acting user's identifier (display form)
pub const USER_HEADER: &str = "User";

/// Lowercase user header for `HeaderName` construction
const USER_HEADER_LOWER: &str = "user";

/// Pre-parsed tenant header name
#[must_use]
pub fn tenant_header_name() -> http::HeaderName {
    http::HeaderName::from_static(TENANT_HEADER_LOWER)
}

/// Pre-parsed user header name
#[must_use]
pub fn user_header_name() -> http::HeaderName {
    http::HeaderName::from_static(USER_HEADER_LOWER)
}
