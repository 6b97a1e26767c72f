//! Connection handling for ActorNet
//!
//! Manages individual peer connections, including:
//! - Stream framing of wire packets
//! - The connection handshake
//! - Connection state management
//!
//! Handshake payloads:
//! - ConnectionRequest: protocol version (4), client name
//! - ConnectionResponse: accepted (4), connection id (8), session id, reason
//! - ConnectionEnd: reason

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};

use super::NetworkConfig;
use crate::protocol::{
    CodecError, ConnectionId, Decoder, Encoder, PacketType, WirePacket, PROTOCOL_VERSION,
};
use crate::session::PacketSink;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: i32, remote: i32 },

    #[error("Connection timeout")]
    Timeout,

    #[error("Send channel closed")]
    SendChannelClosed,

    #[error("Send buffer full")]
    SendBufferFull,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connection established, awaiting handshake
    Connecting,
    /// Handshake complete, ready for communication
    Connected,
    /// Connection is closing gracefully
    Closing,
    /// Connection has been closed
    Closed,
}

/// First packet a connecting peer sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub protocol_version: i32,
    pub client_name: String,
}

impl ConnectionRequest {
    pub fn to_packet(&self) -> WirePacket {
        let mut packet = WirePacket::new(PacketType::ConnectionRequest);
        let offset = packet.write_i32(0, self.protocol_version);
        packet.write_string(offset, &self.client_name);
        packet
    }

    pub fn from_packet(packet: &WirePacket) -> Self {
        Self {
            protocol_version: packet.read_i32(0),
            client_name: packet.read_string(4),
        }
    }
}

/// The server's answer to a [`ConnectionRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionResponse {
    pub accepted: bool,
    pub connection_id: ConnectionId,
    pub session_id: String,
    pub reason: String,
}

impl ConnectionResponse {
    pub fn to_packet(&self) -> WirePacket {
        let mut packet = WirePacket::new(PacketType::ConnectionResponse);
        let offset = packet.write_i32(0, self.accepted as i32);
        let offset = packet.write_i64(offset, self.connection_id as i64);
        let offset = packet.write_string(offset, &self.session_id);
        packet.write_string(offset, &self.reason);
        packet
    }

    pub fn from_packet(packet: &WirePacket) -> Self {
        let session_id = packet.read_string(12);
        let reason_offset = 12 + 4 + session_id.len();
        Self {
            accepted: packet.read_i32(0) != 0,
            connection_id: packet.read_i64(4) as ConnectionId,
            reason: packet.read_string(reason_offset),
            session_id,
        }
    }
}

pub fn connection_end(reason: &str) -> WirePacket {
    let mut packet = WirePacket::new(PacketType::ConnectionEnd);
    packet.write_string(0, reason);
    packet
}

/// Represents a connection to a remote ActorNet peer
pub struct Connection {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The TCP stream
    stream: TcpStream,
    /// Stream encoder
    encoder: Encoder,
    /// Stream decoder
    decoder: Decoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
    /// Name the peer announced (populated after handshake)
    remote_name: Option<String>,
    /// Connection state
    state: ConnectionState,
    /// Last activity timestamp
    last_activity: Instant,
    /// Statistics
    stats: ConnectionStats,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Packets sent
    pub packets_sent: u64,
    /// Packets received
    pub packets_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

impl Connection {
    /// Create a new connection from an established TCP stream
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, config: &NetworkConfig) -> Self {
        Self {
            remote_addr,
            stream,
            encoder: Encoder::with_max_frame_size(config.max_frame_size),
            decoder: Decoder::with_max_frame_size(config.max_frame_size),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            remote_name: None,
            state: ConnectionState::Connecting,
            last_activity: Instant::now(),
            stats: ConnectionStats::default(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    async fn expect_packet(&mut self, expected: PacketType) -> ConnectionResult<WirePacket> {
        let packet = self.recv().await?.ok_or_else(|| {
            ConnectionError::HandshakeFailed("Connection closed during handshake".to_string())
        })?;
        if packet.packet_type() != expected {
            return Err(ConnectionError::HandshakeFailed(format!(
                "Expected {}, got {}",
                expected,
                packet.packet_type()
            )));
        }
        Ok(packet)
    }

    /// Perform the server-side handshake. Returns the client's name.
    pub async fn handshake_server(
        &mut self,
        connection_id: ConnectionId,
        session_id: &str,
    ) -> ConnectionResult<String> {
        let packet = self.expect_packet(PacketType::ConnectionRequest).await?;
        let request = ConnectionRequest::from_packet(&packet);

        if request.protocol_version != PROTOCOL_VERSION {
            let response = ConnectionResponse {
                accepted: false,
                connection_id,
                session_id: session_id.to_string(),
                reason: format!(
                    "Protocol version mismatch: expected {}, got {}",
                    PROTOCOL_VERSION, request.protocol_version
                ),
            };
            self.send(&response.to_packet()).await?;

            return Err(ConnectionError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: request.protocol_version,
            });
        }

        let response = ConnectionResponse {
            accepted: true,
            connection_id,
            session_id: session_id.to_string(),
            reason: String::new(),
        };
        self.send(&response.to_packet()).await?;

        self.state = ConnectionState::Connected;
        tracing::info!(
            "Handshake complete with {} ({}), connection {}",
            request.client_name,
            self.remote_addr,
            connection_id
        );
        self.remote_name = Some(request.client_name.clone());

        Ok(request.client_name)
    }

    /// Perform the client-side handshake
    pub async fn handshake_client(&mut self, client_name: &str) -> ConnectionResult<ConnectionResponse> {
        let request = ConnectionRequest {
            protocol_version: PROTOCOL_VERSION,
            client_name: client_name.to_string(),
        };
        self.send(&request.to_packet()).await?;

        let packet = self.expect_packet(PacketType::ConnectionResponse).await?;
        let response = ConnectionResponse::from_packet(&packet);
        if !response.accepted {
            let reason = if response.reason.is_empty() {
                "Connection rejected".to_string()
            } else {
                response.reason
            };
            return Err(ConnectionError::HandshakeFailed(reason));
        }

        self.state = ConnectionState::Connected;
        tracing::info!(
            "Handshake complete with {}, session {} as connection {}",
            self.remote_addr,
            response.session_id,
            response.connection_id
        );

        Ok(response)
    }

    /// Send a packet
    pub async fn send(&mut self, packet: &WirePacket) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode(packet, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        self.last_activity = Instant::now();

        Ok(())
    }

    /// Receive a packet (returns None on a clean close)
    pub async fn recv(&mut self) -> ConnectionResult<Option<WirePacket>> {
        loop {
            if let Some(packet) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.packets_received += 1;
                self.last_activity = Instant::now();
                return Ok(Some(packet));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None); // Clean close
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Try to receive a packet with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<WirePacket>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Close the connection gracefully
    pub async fn close(&mut self, reason: &str) -> ConnectionResult<()> {
        self.state = ConnectionState::Closing;

        self.send(&connection_end(reason)).await?;

        self.stream.shutdown().await?;
        self.state = ConnectionState::Closed;

        Ok(())
    }

    /// Check if the connection is still active
    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Get time since last activity
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// A handle for sending packets to a connection
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<WirePacket>,
    connected: Arc<AtomicBool>,
    /// Wakes the connection task when the owner gives up on it
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<WirePacket>) -> Self {
        Self {
            sender,
            connected: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Send a packet through this connection
    pub async fn send(&self, packet: WirePacket) -> ConnectionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        self.sender
            .send(packet)
            .await
            .map_err(|_| ConnectionError::SendChannelClosed)
    }

    /// Queue a packet without waiting for buffer space
    pub fn try_send(&self, packet: WirePacket) -> ConnectionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        self.sender.try_send(packet).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!("Send buffer full, packet dropped");
                ConnectionError::SendBufferFull
            }
            mpsc::error::TrySendError::Closed(_) => ConnectionError::SendChannelClosed,
        })
    }

    /// Check if the connection is still active
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Mark the connection as disconnected
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Ask the task driving this connection to close it
    pub fn shutdown(&self) {
        self.mark_disconnected();
        self.shutdown.notify_one();
    }

    /// Resolves once `shutdown` has been called on any clone
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await
    }
}

impl PacketSink for ConnectionHandle {
    fn deliver(&self, packet: WirePacket) -> bool {
        self.try_send(packet).is_ok()
    }

    fn close(&self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_packets() {
        let request = ConnectionRequest {
            protocol_version: PROTOCOL_VERSION,
            client_name: "observer-1".to_string(),
        };
        let packet = request.to_packet();
        assert_eq!(packet.packet_type(), PacketType::ConnectionRequest);
        assert_eq!(ConnectionRequest::from_packet(&packet), request);

        let response = ConnectionResponse {
            accepted: true,
            connection_id: 12,
            session_id: "abc".to_string(),
            reason: "welcome".to_string(),
        };
        assert_eq!(ConnectionResponse::from_packet(&response.to_packet()), response);

        assert_eq!(connection_end("bye").read_string(0), "bye");
    }

    #[tokio::test]
    async fn test_handle_reports_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);

        assert!(handle.deliver(WirePacket::new(PacketType::Custom)));
        // Buffer of one is now full
        assert!(!handle.deliver(WirePacket::new(PacketType::Custom)));
        assert!(rx.recv().await.is_some());

        handle.mark_disconnected();
        assert!(matches!(
            handle.send(WirePacket::new(PacketType::Custom)).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_connection_task() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);
        let task_handle = handle.clone();

        // Closed before anyone waits: the wakeup is kept
        PacketSink::close(&handle);
        assert!(!task_handle.is_connected());
        tokio::time::timeout(Duration::from_secs(1), task_handle.shutdown_requested())
            .await
            .unwrap();
        assert!(!handle.deliver(WirePacket::new(PacketType::Custom)));
    }
}
