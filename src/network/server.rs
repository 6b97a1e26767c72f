//! ActorNet Server
//!
//! The server accepts connections from observers, assigns each one a
//! connection id and forwards every packet it receives as an event.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::connection::{connection_end, Connection, ConnectionError, ConnectionHandle};
use super::NetworkConfig;
use crate::protocol::{ConnectionId, PacketType, WirePacket};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A client completed the handshake
    ClientConnected {
        connection_id: ConnectionId,
        addr: SocketAddr,
        name: String,
        handle: ConnectionHandle,
    },
    /// A client has disconnected
    ClientDisconnected {
        connection_id: ConnectionId,
        reason: String,
    },
    /// Received a packet from a client
    PacketReceived {
        connection_id: ConnectionId,
        packet: WirePacket,
    },
    /// Server started
    Started { bind_addr: SocketAddr },
    /// Server stopped
    Stopped,
}

/// Information about a connected client
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub connection_id: ConnectionId,
    pub addr: SocketAddr,
    /// Name the client announced
    pub name: String,
    /// Handle for sending packets to this client
    pub handle: ConnectionHandle,
}

type ClientMap = Arc<RwLock<HashMap<ConnectionId, ClientInfo>>>;

/// ActorNet Server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Session announced to clients
    session_id: Uuid,
    /// Connected clients
    clients: ClientMap,
    /// Next connection id
    next_connection_id: Arc<AtomicU64>,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Address actually bound
    local_addr: Option<SocketAddr>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig, session_id: Uuid) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity.max(1));

        Self {
            config,
            session_id,
            clients: Arc::new(RwLock::new(HashMap::new())),
            next_connection_id: Arc::new(AtomicU64::new(1)),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            local_addr: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Start the server
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        tracing::info!("Server listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self
            .event_tx
            .send(ServerEvent::Started {
                bind_addr: local_addr,
            })
            .await;

        let clients = self.clients.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        let next_connection_id = self.next_connection_id.clone();
        let config = self.config.clone();
        let session_id = self.session_id.to_string();

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let connection_id = next_connection_id.fetch_add(1, Ordering::SeqCst);
                                tracing::info!("New connection {} from {}", connection_id, addr);

                                let clients = clients.clone();
                                let event_tx = event_tx.clone();
                                let config = config.clone();
                                let session_id = session_id.clone();

                                tokio::spawn(async move {
                                    if let Err(e) = handle_client(
                                        stream,
                                        addr,
                                        connection_id,
                                        &session_id,
                                        &config,
                                        clients,
                                        event_tx,
                                    ).await {
                                        tracing::error!("Client handler error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.send(ServerEvent::Stopped).await;
        });

        Ok(local_addr)
    }

    /// Stop the server
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        // Disconnect all clients
        let clients = self.clients.read().await;
        for client in clients.values() {
            let _ = client.handle.send(connection_end("Server shutting down")).await;
        }

        Ok(())
    }

    /// Get a list of connected clients
    pub async fn clients(&self) -> Vec<ClientInfo> {
        let clients = self.clients.read().await;
        clients.values().cloned().collect()
    }

    /// Send a packet to a specific client
    pub async fn send_to(&self, connection_id: ConnectionId, packet: WirePacket) -> ServerResult<()> {
        let clients = self.clients.read().await;
        let client = clients
            .get(&connection_id)
            .ok_or(ServerError::UnknownConnection(connection_id))?;
        client.handle.send(packet).await?;
        Ok(())
    }

    /// Send a packet to all connected clients
    pub async fn broadcast(&self, packet: WirePacket) {
        let clients = self.clients.read().await;
        for client in clients.values() {
            let _ = client.handle.send(packet.clone()).await;
        }
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Handle a client connection
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: ConnectionId,
    session_id: &str,
    config: &NetworkConfig,
    clients: ClientMap,
    event_tx: mpsc::Sender<ServerEvent>,
) -> Result<(), ConnectionError> {
    let mut conn = Connection::new(stream, addr, config);

    let name = conn.handshake_server(connection_id, session_id).await?;

    // Create packet channel for this client
    let (packet_tx, mut packet_rx) = mpsc::channel::<WirePacket>(config.channel_capacity.max(1));
    let handle = ConnectionHandle::new(packet_tx);

    {
        let mut clients = clients.write().await;
        clients.insert(
            connection_id,
            ClientInfo {
                connection_id,
                addr,
                name: name.clone(),
                handle: handle.clone(),
            },
        );
    }

    let _ = event_tx
        .send(ServerEvent::ClientConnected {
            connection_id,
            addr,
            name,
            handle: handle.clone(),
        })
        .await;

    // Main packet loop
    let disconnect_reason = loop {
        tokio::select! {
            // Receive packets from the client
            result = conn.recv() => {
                match result {
                    Ok(Some(packet)) => {
                        if packet.packet_type() == PacketType::ConnectionEnd {
                            break packet.read_string(0);
                        }
                        let _ = event_tx.send(ServerEvent::PacketReceived {
                            connection_id,
                            packet,
                        }).await;
                    }
                    Ok(None) => {
                        break "Connection closed".to_string();
                    }
                    Err(e) => {
                        break format!("Error: {}", e);
                    }
                }
            }

            // The session gave up on this client
            _ = handle.shutdown_requested() => {
                break "Send queue overflow".to_string();
            }

            // Send packets to the client
            Some(packet) = packet_rx.recv() => {
                if packet.packet_type() == PacketType::ConnectionEnd {
                    break packet.read_string(0);
                }
                if let Err(e) = conn.send(&packet).await {
                    break format!("Send error: {}", e);
                }
            }
        }
    };

    // Clean up
    handle.mark_disconnected();

    {
        let mut clients = clients.write().await;
        clients.remove(&connection_id);
    }

    tracing::info!("Connection {} closed: {}", connection_id, disconnect_reason);
    let _ = event_tx
        .send(ServerEvent::ClientDisconnected {
            connection_id,
            reason: disconnect_reason.clone(),
        })
        .await;

    let _ = conn.close(&disconnect_reason).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Client, ClientEvent};

    fn local_config() -> NetworkConfig {
        NetworkConfig::new(0).with_bind_address("127.0.0.1")
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = Server::new(NetworkConfig::default(), Uuid::new_v4());
        assert!(!server.is_running().await);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_packets_flow_both_ways() {
        let session_id = Uuid::new_v4();
        let mut server = Server::new(local_config(), session_id);
        let mut server_events = server.take_event_receiver().unwrap();
        let addr = server.start().await.unwrap();
        assert!(matches!(
            server_events.recv().await,
            Some(ServerEvent::Started { .. })
        ));

        let mut client = Client::new(local_config(), "observer");
        let mut client_events = client.take_event_receiver().unwrap();
        let response = client.connect(addr).await.unwrap();
        assert_eq!(response.session_id, session_id.to_string());

        let connection_id = match server_events.recv().await {
            Some(ServerEvent::ClientConnected {
                connection_id,
                name,
                ..
            }) => {
                assert_eq!(name, "observer");
                connection_id
            }
            other => panic!("unexpected event: {:?}", other),
        };
        assert_eq!(connection_id, response.connection_id);
        assert!(matches!(
            client_events.recv().await,
            Some(ClientEvent::Connected { .. })
        ));

        client
            .send(WirePacket::with_payload(PacketType::Custom, b"up"))
            .await
            .unwrap();
        match server_events.recv().await {
            Some(ServerEvent::PacketReceived { packet, .. }) => {
                assert_eq!(packet.payload(), b"up");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        server
            .send_to(connection_id, WirePacket::with_payload(PacketType::Custom, b"down"))
            .await
            .unwrap();
        match client_events.recv().await {
            Some(ClientEvent::PacketReceived { packet }) => {
                assert_eq!(packet.payload(), b"down");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        client.disconnect().await.unwrap();
        assert!(matches!(
            server_events.recv().await,
            Some(ServerEvent::ClientDisconnected { .. })
        ));
        server.stop().await.unwrap();
    }
}
