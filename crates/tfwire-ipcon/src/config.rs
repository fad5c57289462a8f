use std::time::Duration;

use tfwire_transport::Endpoint;

/// Default bound on establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a `call` waits for its response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default bound on a single blocking packet write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings. Passed to [`crate::IpConnection::new`]; nothing is global.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Daemon address used by [`crate::IpConnection::connect`].
    pub endpoint: Endpoint,
    /// Timeout for each TCP connect attempt.
    pub connect_timeout: Duration,
    /// Default response timeout for device calls.
    pub response_timeout: Duration,
    /// Write timeout on the socket. `None` blocks indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
        }
    }
}

impl ConnectionConfig {
    /// Config for a specific daemon address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::default().with_endpoint(Endpoint::new(host, port))
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_daemon() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.endpoint.to_string(), "localhost:4223");
        assert_eq!(cfg.response_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn builder_overrides() {
        let cfg = ConnectionConfig::new("10.0.0.5", 4280)
            .with_response_timeout(Duration::from_millis(100))
            .with_write_timeout(None);
        assert_eq!(cfg.endpoint, Endpoint::new("10.0.0.5", 4280));
        assert_eq!(cfg.response_timeout, Duration::from_millis(100));
        assert!(cfg.write_timeout.is_none());
    }
}
