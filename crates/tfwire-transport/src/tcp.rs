use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpStream;

/// Host brickd listens on by default.
pub const DEFAULT_HOST: &str = "localhost";

/// Port brickd listens on by default.
pub const DEFAULT_PORT: u16 = 4223;

/// A `host:port` pair naming a brickd instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to all candidate socket addresses.
    pub fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                addr: self.to_string(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve {
                addr: self.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ),
            });
        }
        Ok(addrs)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// TCP transport.
///
/// Clients use [`TcpTransport::connect`]. The listener side (`bind`/`accept`)
/// exists for local peers that speak the daemon side of the protocol.
pub struct TcpTransport {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpTransport {
    /// Bind and listen on a socket address. Port 0 picks a free port.
    pub fn bind(addr: impl ToSocketAddrs + fmt::Debug) -> Result<Self> {
        let label = format!("{addr:?}");
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: label.clone(),
            source,
        })?;
        let addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: label,
                source,
            })?;

        info!(%addr, "listening on tcp socket");
        Ok(Self { listener, addr })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        let _ = stream.set_nodelay(true);
        Ok(IpStream::from_tcp(stream))
    }

    /// Connect to an endpoint, trying each resolved address in turn.
    ///
    /// Each attempt is bounded by `timeout`. The error of the last attempt is
    /// returned when none succeed.
    pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<IpStream> {
        let mut last_err = None;
        for addr in endpoint.resolve()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    debug!(%endpoint, %addr, "connected to tcp socket");
                    return Ok(IpStream::from_tcp(stream));
                }
                Err(err) => {
                    debug!(%endpoint, %addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(TransportError::Connect {
            addr: endpoint.to_string(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no address attempted")
            }),
        })
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The bound address as a connectable endpoint.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.addr)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
