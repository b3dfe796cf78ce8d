//! Relay configuration

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default publisher endpoint
pub const DEFAULT_PUBLISHER_ADDR: &str = "127.0.0.1:2000";

/// Default listen endpoint
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:2001";

/// Default size of a single read from either side
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;

/// Environment variable naming the publisher endpoint
pub const ENV_PUBLISHER: &str = "FANOUT_PUBLISHER";

/// Environment variable naming the listen endpoint
pub const ENV_LISTEN: &str = "FANOUT_LISTEN";

/// Environment variable naming the fallback log level
pub const ENV_LOG_LEVEL: &str = "FANOUT_LOG_LEVEL";

/// Relay configuration options
///
/// Fixed for the lifetime of the process and handed to the
/// [`Supervisor`](crate::Supervisor) at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address of the publisher to connect to
    pub publisher_addr: SocketAddr,

    /// Address to accept listeners on (loopback only)
    pub listen_addr: SocketAddr,

    /// Maximum bytes per read from the publisher or a listener
    pub read_buffer_size: usize,

    /// Per-attempt connect timeout
    pub connect_timeout: Duration,

    /// Pause between failed connect attempts
    pub retry_backoff: Duration,

    /// Upper bound on flushing already-queued chunks to a listener at shutdown
    pub drain_timeout: Duration,

    /// Enable TCP_NODELAY on accepted listener sockets
    pub tcp_nodelay: bool,

    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            publisher_addr: SocketAddr::from(([127, 0, 0, 1], 2000)),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 2001)),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            connect_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(1),
            tcp_nodelay: true,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Build a config from `FANOUT_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_PUBLISHER) {
            config.publisher_addr = parse_addr(&value, config.publisher_addr.port())?;
        }
        if let Ok(value) = std::env::var(ENV_LISTEN) {
            config.listen_addr = parse_addr(&value, config.listen_addr.port())?;
        }
        if let Ok(value) = std::env::var(ENV_LOG_LEVEL) {
            config.log_level = value;
        }

        Ok(config)
    }

    /// Set the publisher address
    pub fn publisher(mut self, addr: SocketAddr) -> Self {
        self.publisher_addr = addr;
        self
    }

    /// Set the listen address
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the per-attempt connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the pause between connect attempts
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the shutdown drain bound
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set TCP_NODELAY for accepted listener sockets
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set the fallback log level
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Check the configuration before any socket is opened
    pub fn validate(&self) -> Result<()> {
        if !self.listen_addr.ip().is_loopback() {
            return Err(Error::NonLoopbackListen(self.listen_addr));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig("read_buffer_size must be non-zero"));
        }
        Ok(())
    }
}

/// Parse an endpoint string.
///
/// Accepts `IP:PORT`, a bare `IP` (uses `default_port`), and `localhost`
/// with or without a port.
pub fn parse_addr(arg: &str, default_port: u16) -> Result<SocketAddr> {
    let arg = arg.trim();
    let normalized = match arg.strip_prefix("localhost") {
        Some("") => "127.0.0.1".to_string(),
        Some(port) if port.starts_with(':') => format!("127.0.0.1{port}"),
        _ => arg.to_string(),
    };

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    Err(Error::InvalidAddress(arg.to_string()))
}
