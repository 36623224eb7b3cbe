//! Session cookie transport for service clients.
//!
//! A [`CookieJar`] records every `Set-Cookie` a service sends and replays the
//! matching cookies on later requests to the same origin, so stateful
//! services (login flows, sticky sessions) work across the sequence of calls
//! a client makes. Entries live for the life of the process; there is no
//! expiry handling.
//!
//! Scoping follows RFC 6265: a cookie without a `Path` attribute gets the
//! default path derived from the request URI (section 5.1.4), and replay uses
//! the path-match algorithm (section 5.1.4 / 5.4, longest path first).

use http::{HeaderMap, HeaderValue, Uri};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Scheme + host + effective port a cookie is bound to.
///
/// Cookies never cross origins: a jar shared by requests to several hosts
/// keeps each host's cookies separate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    fn from_uri(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?;
        let host = uri.host()?;
        let port = uri.port_u16().or_else(|| match scheme {
            "https" => Some(443),
            "http" => Some(80),
            _ => None,
        })?;
        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    fn from_url(url: &url::Url) -> Option<Self> {
        Some(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: url.host_str()?.to_ascii_lowercase(),
            port: url.port_or_known_default()?,
        })
    }
}

#[derive(Debug, Clone)]
struct StoredCookie {
    name: String,
    value: String,
    path: String,
}

/// Process-lifetime cookie store shared by all clones of a client.
#[derive(Debug, Default)]
pub struct CookieJar {
    store: Mutex<HashMap<Origin, Vec<StoredCookie>>>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every `Set-Cookie` of a response against the request's origin.
    ///
    /// Unparseable cookies and cookies a server has no business sending
    /// (invalid name or value octets) are skipped with a warning. A cookie
    /// without a `Path` attribute is stored under the default path of the
    /// request URI.
    pub(crate) fn store_from_response(&self, uri: &Uri, headers: &HeaderMap) {
        let Some(origin) = Origin::from_uri(uri) else {
            return;
        };

        for raw in headers.get_all(http::header::SET_COOKIE) {
            let Ok(raw) = raw.to_str() else {
                tracing::warn!("Set-Cookie header is not valid UTF-8; cookie dropped");
                continue;
            };
            match parse_set_cookie(raw) {
                Some((name, value, path)) => {
                    let path = path.unwrap_or_else(|| default_path(uri.path()));
                    self.insert(origin.clone(), name, value, path);
                }
                None => {
                    tracing::warn!(header = raw, "unparseable Set-Cookie header; cookie dropped");
                }
            }
        }
    }

    /// Manually seed a cookie under `url`'s origin.
    ///
    /// # Panics
    ///
    /// Panics when `name`, `value`, or `path` cannot form a valid cookie:
    /// seeding happens in client setup code, and a bad argument there is a
    /// caller bug rather than a runtime condition to handle.
    pub(crate) fn seed(&self, url: &url::Url, path: &str, name: &str, value: &str) {
        assert!(
            is_valid_cookie_name(name),
            "invalid cookie name {name:?}: cookie names are RFC 6265 tokens"
        );
        assert!(
            is_valid_cookie_value(value),
            "invalid cookie value {value:?}: contains characters outside the cookie-octet set"
        );
        assert!(
            is_valid_cookie_path(path),
            "invalid cookie path {path:?}: must start with '/' and contain no control characters or ';'"
        );
        let Some(origin) = Origin::from_url(url) else {
            panic!("cookie seeding URL {url} has no host");
        };

        self.insert(origin, name.to_owned(), value.to_owned(), path.to_owned());
    }

    fn insert(&self, origin: Origin, name: String, value: String, path: String) {
        let mut store = self.store.lock();
        let cookies = store.entry(origin).or_default();
        if let Some(existing) = cookies
            .iter_mut()
            .find(|c| c.name == name && c.path == path)
        {
            existing.value = value;
        } else {
            cookies.push(StoredCookie { name, value, path });
        }
    }

    /// Assemble the `Cookie` header for a request: all cookies stored for the
    /// request's origin whose path matches the request path, longest path
    /// first, joined as `name=value; name2=value2`. `None` when nothing
    /// matches.
    pub(crate) fn cookie_header_for(&self, uri: &Uri) -> Option<HeaderValue> {
        let origin = Origin::from_uri(uri)?;
        let request_path = uri.path();

        let store = self.store.lock();
        let mut matching: Vec<&StoredCookie> = store
            .get(&origin)?
            .iter()
            .filter(|c| path_matches(request_path, &c.path))
            .collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));

        let header = matching
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");

        // Names and values are validated at insertion, so this can only fail
        // if the jar itself is corrupted.
        match HeaderValue::from_str(&header) {
            Ok(value) => Some(value),
            Err(_) => panic!("cookie jar produced an unencodable Cookie header: {header:?}"),
        }
    }
}

/// Parse a `Set-Cookie` header into (name, value, explicit path).
///
/// Only the `Path` attribute is honored; `Domain`, `Expires`, `Max-Age`,
/// `Secure`, `HttpOnly`, and `SameSite` are ignored. Returns `None` for
/// cookies that are structurally broken or carry invalid octets.
fn parse_set_cookie(raw: &str) -> Option<(String, String, Option<String>)> {
    let mut pieces = raw.split(';');

    let (name, value) = pieces.next()?.split_once('=')?;
    let name = name.trim();
    let value = value.trim();
    if !is_valid_cookie_name(name) || !is_valid_cookie_value(value) {
        return None;
    }

    let mut path = None;
    for attribute in pieces {
        let (key, attr_value) = match attribute.split_once('=') {
            Some((key, attr_value)) => (key.trim(), attr_value.trim()),
            None => (attribute.trim(), ""),
        };
        if key.eq_ignore_ascii_case("path") && is_valid_cookie_path(attr_value) {
            path = Some(attr_value.to_owned());
        }
    }

    Some((name.to_owned(), value.to_owned(), path))
}

/// RFC 6265 section 5.1.4 default path of a request URI.
fn default_path(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_owned();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(last_slash) => request_path[..last_slash].to_owned(),
    }
}

/// RFC 6265 section 5.1.4 path-match: exact match, or the cookie path is a
/// prefix ending in `/`, or a prefix followed by `/` in the request path.
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    match request_path.strip_prefix(cookie_path) {
        Some(rest) => cookie_path.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Cookie names are RFC 2616 tokens (RFC 6265 section 4.1.1).
fn is_valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

/// Cookie values are restricted to the cookie-octet set (RFC 6265
/// section 4.1.1): printable US-ASCII excluding whitespace, double quote,
/// comma, semicolon, and backslash. Empty values are allowed.
fn is_valid_cookie_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E))
}

fn is_valid_cookie_path(path: &str) -> bool {
    path.starts_with('/') && path.bytes().all(|b| b.is_ascii_graphic() && b != b';')
}
