//! ActorNet Client
//!
//! Connects to an authority and forwards the packets it sends as events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};

use super::connection::{
    Connection, ConnectionError, ConnectionHandle, ConnectionResponse,
};
use super::NetworkConfig;
use crate::protocol::{ConnectionId, PacketType, WirePacket};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection timeout")]
    Timeout,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Successfully connected to the authority
    Connected {
        server_addr: SocketAddr,
        connection_id: ConnectionId,
        session_id: String,
    },
    /// Disconnected from the authority
    Disconnected { reason: String },
    /// Received a packet from the authority
    PacketReceived { packet: WirePacket },
}

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// ActorNet Client
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    /// Name announced in the handshake
    name: String,
    /// Current state
    state: Arc<RwLock<ClientState>>,
    /// Event sender
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    /// Connection handle for sending packets
    connection_handle: Arc<RwLock<Option<ConnectionHandle>>>,
    /// Shutdown signal
    shutdown_tx: Arc<RwLock<Option<mpsc::Sender<()>>>>,
}

impl Client {
    /// Create a new client
    pub fn new(config: NetworkConfig, name: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity.max(1));

        Self {
            config,
            name: name.into(),
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            event_tx,
            event_rx: Some(event_rx),
            connection_handle: Arc::new(RwLock::new(None)),
            shutdown_tx: Arc::new(RwLock::new(None)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    async fn set_state(&self, new_state: ClientState) {
        let mut state = self.state.write().await;
        *state = new_state;
    }

    /// Connect to an authority by address
    pub async fn connect(&self, server_addr: SocketAddr) -> ClientResult<ConnectionResponse> {
        {
            let state = self.state.read().await;
            if *state != ClientState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
        }
        self.set_state(ClientState::Connecting).await;

        tracing::info!("Connecting to {}", server_addr);

        // Connect with timeout
        let stream = match tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(server_addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_state(ClientState::Disconnected).await;
                return Err(ClientError::Io(e));
            }
            Err(_) => {
                self.set_state(ClientState::Disconnected).await;
                return Err(ClientError::Timeout);
            }
        };

        let mut conn = Connection::new(stream, server_addr, &self.config);

        let response = match conn.handshake_client(&self.name).await {
            Ok(response) => response,
            Err(e) => {
                self.set_state(ClientState::Disconnected).await;
                return Err(ClientError::Connection(e));
            }
        };

        // Create packet channel
        let (packet_tx, mut packet_rx) =
            mpsc::channel::<WirePacket>(self.config.channel_capacity.max(1));
        let handle = ConnectionHandle::new(packet_tx);

        {
            let mut ch = self.connection_handle.write().await;
            *ch = Some(handle.clone());
        }

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        {
            let mut st = self.shutdown_tx.write().await;
            *st = Some(shutdown_tx);
        }

        self.set_state(ClientState::Connected).await;

        let _ = self
            .event_tx
            .send(ClientEvent::Connected {
                server_addr,
                connection_id: response.connection_id,
                session_id: response.session_id.clone(),
            })
            .await;

        // Spawn the packet loop
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let connection_handle = self.connection_handle.clone();

        tokio::spawn(async move {
            let disconnect_reason = loop {
                tokio::select! {
                    // Receive packets from the authority
                    result = conn.recv() => {
                        match result {
                            Ok(Some(packet)) => {
                                if packet.packet_type() == PacketType::ConnectionEnd {
                                    break packet.read_string(0);
                                }
                                let _ = event_tx.send(ClientEvent::PacketReceived { packet }).await;
                            }
                            Ok(None) => {
                                break "Connection closed".to_string();
                            }
                            Err(e) => {
                                break format!("Error: {}", e);
                            }
                        }
                    }

                    // Send packets to the authority
                    Some(packet) = packet_rx.recv() => {
                        if let Err(e) = conn.send(&packet).await {
                            break format!("Send error: {}", e);
                        }
                    }

                    // The session gave up on this connection
                    _ = handle.shutdown_requested() => {
                        break "Send queue overflow".to_string();
                    }

                    // Shutdown signal
                    _ = shutdown_rx.recv() => {
                        break "Client disconnecting".to_string();
                    }
                }
            };

            // Clean up
            handle.mark_disconnected();

            {
                let mut ch = connection_handle.write().await;
                *ch = None;
            }

            {
                let mut s = state.write().await;
                *s = ClientState::Disconnected;
            }

            let _ = conn.close(&disconnect_reason).await;

            tracing::info!("Disconnected: {}", disconnect_reason);
            let _ = event_tx
                .send(ClientEvent::Disconnected {
                    reason: disconnect_reason,
                })
                .await;
        });

        Ok(response)
    }

    /// Connect to an authority by hostname
    pub async fn connect_hostname(&self, hostname: &str, port: u16) -> ClientResult<ConnectionResponse> {
        let addr = super::resolve_host(hostname, port).await?;
        self.connect(addr).await
    }

    /// Disconnect from the authority
    pub async fn disconnect(&self) -> ClientResult<()> {
        {
            let state = self.state.read().await;
            if *state == ClientState::Disconnected {
                return Err(ClientError::NotConnected);
            }
        }

        // The packet loop sends ConnectionEnd on its way out
        if let Some(tx) = &*self.shutdown_tx.read().await {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    /// Send a packet to the authority
    pub async fn send(&self, packet: WirePacket) -> ClientResult<()> {
        let handle = self.connection_handle.read().await;
        if let Some(h) = &*handle {
            h.send(packet).await?;
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Handle for queueing packets, if connected
    pub async fn handle(&self) -> Option<ConnectionHandle> {
        self.connection_handle.read().await.clone()
    }

    /// Get the current state
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ClientState::Connected
    }
}
