//! Network module - Reference TCP transport for replication sessions
//!
//! Provides:
//! - Server for accepting observer connections
//! - Client for connecting to an authority
//! - Connection management and packet framing
//!
//! The transport only moves wire packets; sessions consume them through
//! the server and client event channels.

mod client;
mod connection;
mod server;

pub use client::*;
pub use connection::*;
pub use server::*;

use std::net::SocketAddr;

use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    pub port: u16,
    /// Interface to bind to
    pub bind_address: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Maximum frame size
    pub max_frame_size: usize,
    /// Outgoing packets buffered per connection
    pub channel_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            connect_timeout_ms: 5000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_capacity: 256,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }
}

impl From<&crate::config::NetworkConfig> for NetworkConfig {
    fn from(config: &crate::config::NetworkConfig) -> Self {
        Self {
            port: config.port,
            bind_address: config
                .bind_address
                .clone()
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            connect_timeout_ms: config.connect_timeout_ms,
            max_frame_size: config.max_frame_size,
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
