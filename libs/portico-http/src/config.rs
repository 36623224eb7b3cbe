use std::time::Duration;
use url::Url;

/// User-Agent sent when the caller configures none
pub const DEFAULT_USER_AGENT: &str = concat!("portico-http/", env!("CARGO_PKG_VERSION"));

/// Where the TLS trust anchors come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Mozilla's bundled roots (webpki-roots); works on hosts with no OS store
    #[default]
    WebPki,
    /// Roots read from the OS certificate store
    Native,
}

/// Whether plain-HTTP connections are permitted.
///
/// Production clients stay on [`TlsOnly`](TransportSecurity::TlsOnly);
/// [`AllowInsecureHttp`](TransportSecurity::AllowInsecureHttp) exists so
/// tests can talk to local mock servers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Every connection must be HTTPS
    #[default]
    TlsOnly,
    /// Accept `http://` URLs as well. Traffic to such URLs is unencrypted;
    /// never point a client built this way at anything but a test server.
    AllowInsecureHttp,
}

/// Client configuration, consumed by [`HttpClientBuilder`](crate::HttpClientBuilder)
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// URL that relative request paths resolve against (default: none).
    ///
    /// Generated service clients talk to exactly one service, so they
    /// configure the service's root here and issue requests by path
    /// (`/customers/7`). Absolute request URLs bypass the base. Manual
    /// cookie seeding also needs this, to know which origin to store under.
    pub base_url: Option<Url>,

    /// How long a single request may take end to end (default: 30s)
    pub request_timeout: Duration,

    /// Upper bound on response body size in bytes, counted after
    /// decompression (default: 10 MiB)
    pub max_body_size: usize,

    /// User-Agent header value (default: [`DEFAULT_USER_AGENT`])
    pub user_agent: String,

    /// Plain-HTTP policy (default: [`TransportSecurity::TlsOnly`])
    pub transport: TransportSecurity,

    /// TLS trust anchor source (default: [`TlsRootConfig::WebPki`])
    pub tls_roots: TlsRootConfig,

    /// How many requests may be queued in the client's internal buffer
    /// before new ones fail fast with `Overloaded` (default: 1024).
    ///
    /// The buffer is what lets clones of one client issue requests
    /// concurrently without a shared lock.
    pub buffer_capacity: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: 1024,
        }
    }
}

impl HttpClientConfig {
    /// Preset for lightweight clients: tighter timeout, 1 MiB body cap,
    /// small buffer.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            buffer_capacity: 256,
            ..Self::default()
        }
    }

    /// Preset for tests against local mock servers.
    ///
    /// Permits plain HTTP, so it must never leave test code.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_body_size: 1024 * 1024,
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 64,
            ..Self::default()
        }
    }
}
