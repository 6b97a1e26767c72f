//! ActorNet - Replicated entities and RPC over the wire
//!
//! Runs a demo arena as authority, mirrors one as observer, and inspects
//! captured packet streams.

mod demo;

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bytes::BytesMut;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use actornet::config::{self, Config};
use actornet::inspect::{describe_packet, describe_stream};
use actornet::network::{Client, ClientEvent, NetworkConfig as NetConfig, Server, ServerEvent};
use actornet::protocol::{self, ConnectionId, Encoder, PacketType, UniqueId, Vec3, WirePacket};
use actornet::rpc::RpcCall;
use actornet::session::{Session, SessionEvent, SessionRole};

/// Connection id an observer uses for its authority
const AUTHORITY: ConnectionId = 0;

/// ActorNet - State replication and RPC runtime
#[derive(Parser)]
#[command(name = "actornet")]
#[command(author = "ActorNet Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Replicate simulation entities and RPCs between peers", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo arena as authority
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Number of bots to simulate
        #[arg(short, long, default_value_t = 4)]
        bots: usize,

        /// Replication interval in milliseconds
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Connect to an authority as observer
    Connect {
        /// Authority address, `host` or `host:port`
        #[arg(short, long, default_value = "127.0.0.1")]
        server: String,

        /// Authority port
        #[arg(short, long)]
        port: Option<u16>,

        /// Name announced in the handshake
        #[arg(short, long)]
        name: Option<String>,

        /// Write every received packet to this file, length-prefixed
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// Decode a captured packet stream
    Inspect {
        /// Capture file
        file: PathBuf,

        /// The file holds one unframed packet
        #[arg(long)]
        single: bool,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging, RUST_LOG wins over the flags
    let level = if cli.verbose || config.general.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            bots,
            interval,
        } => {
            run_server(config, port, bots, interval).await?;
        }
        Commands::Connect {
            server,
            port,
            name,
            dump,
        } => {
            run_client(config, server, port, name, dump).await?;
        }
        Commands::Inspect { file, single } => {
            run_inspect(&file, single)?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info();
        }
    }

    Ok(())
}

/// Run the demo arena (authority)
async fn run_server(
    config: Config,
    port: Option<u16>,
    bots: usize,
    interval: Option<u64>,
) -> anyhow::Result<()> {
    let mut net_config = NetConfig::from(&config.network);
    if let Some(port) = port {
        net_config.port = port;
    }
    let interval_ms = interval.unwrap_or(config.replication.interval_ms).max(1);

    let mut session = Session::with_config(SessionRole::Authority, config.replication.clone());
    demo::register(&mut session)?;
    demo::install_handlers(&mut session);
    let mut session_events = session
        .take_event_receiver()
        .context("session event receiver already taken")?;
    let mut arena = demo::Arena::populate(&mut session, bots)?;

    let mut server = Server::new(net_config, session.session_id());
    let mut event_rx = server
        .take_event_receiver()
        .context("server event receiver already taken")?;

    // Start the server
    let local_addr = server.start().await?;

    println!("\n========================================");
    println!("  ActorNet Authority Running");
    println!("========================================");
    println!("  Name: {}", config.general.name);
    println!("  Address: {}", local_addr);
    println!("  Session: {}", session.session_id());
    println!("  Bots: {}", arena.bots().len());
    println!("  Tick: {} ms", interval_ms);
    println!("========================================");
    println!("\nWaiting for observers to connect...");
    println!("Press Ctrl+C to stop.\n");

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::ClientConnected { connection_id, addr, name, handle } => {
                        let synced = session.connect(connection_id, handle);
                        if !session.has_connection(connection_id) {
                            // Refused its late join, already dropped
                            continue;
                        }
                        match demo::join(&mut session, connection_id, &name) {
                            Ok(player) => {
                                println!(
                                    "+ {} connected from {} as player {} ({} entities synced)",
                                    name, addr, player, synced
                                );
                            }
                            Err(e) => tracing::error!("Failed to join {}: {}", name, e),
                        }
                    }
                    ServerEvent::ClientDisconnected { connection_id, reason } => {
                        demo::leave(&mut session, connection_id);
                        session.disconnect(connection_id);
                        println!("- Connection {} left ({})", connection_id, reason);
                    }
                    ServerEvent::PacketReceived { connection_id, packet } => {
                        // Failures are logged and counted by the session
                        let _ = session.handle_packet(connection_id, &packet);
                    }
                    _ => {}
                }
            }
            Some(event) = session_events.recv() => {
                match event {
                    SessionEvent::ConnectionDropped { connection, entity } => {
                        if let Some(player) = entity {
                            demo::remove_player(&mut session, player);
                        }
                        println!("- Connection {} dropped, send queue full", connection);
                    }
                    other => tracing::debug!("Session event: {:?}", other),
                }
            }
            _ = ticker.tick() => {
                arena.step(&mut session)?;
                let frames = session.replicate_tick();
                tracing::trace!("Tick sent {} frames", frames);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    let stats = session.stats();
    tracing::info!(
        "Authority stopped: {} packets sent, {} received, {} dropped",
        stats.packets_sent,
        stats.packets_received,
        stats.packets_dropped
    );

    Ok(())
}

/// Mirror an authority (observer)
async fn run_client(
    config: Config,
    server: String,
    port: Option<u16>,
    name: Option<String>,
    dump: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut net_config = NetConfig::from(&config.network);
    if let Some(port) = port {
        net_config.port = port;
    }
    let port = net_config.port;
    let name = name.unwrap_or_else(|| config.general.name.clone());

    let mut session = Session::with_config(SessionRole::Observer, config.replication.clone());
    demo::register(&mut session)?;
    let mut session_events = session
        .take_event_receiver()
        .context("session event receiver already taken")?;

    let mut client = Client::new(net_config, name.clone());
    let mut event_rx = client
        .take_event_receiver()
        .context("client event receiver already taken")?;

    // Connect to the authority
    println!("Connecting to {}...", server);
    let response = match server.parse::<SocketAddr>() {
        Ok(addr) => client.connect(addr).await?,
        Err(_) => client.connect_hostname(&server, port).await?,
    };
    let handle = client.handle().await.context("connection closed during handshake")?;
    session.connect(AUTHORITY, handle);

    let mut dump = match dump {
        Some(path) => {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            Some(std::io::BufWriter::new(file))
        }
        None => None,
    };
    let mut encoder = Encoder::new();
    let mut frame = BytesMut::new();

    println!("\n========================================");
    println!("  ActorNet Observer Connected");
    println!("========================================");
    println!("  Name: {}", name);
    println!("  Connection: {}", response.connection_id);
    println!("  Session: {}", response.session_id);
    println!("========================================");
    println!("\nPress Ctrl+C to disconnect.\n");

    let mut player: Option<UniqueId> = None;
    let mut steps: usize = 0;
    let mut mover = tokio::time::interval(Duration::from_secs(1));

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ClientEvent::Connected { server_addr, connection_id, .. } => {
                        tracing::info!("Connected to {} as connection {}", server_addr, connection_id);
                    }
                    ClientEvent::Disconnected { reason } => {
                        println!("Disconnected: {}", reason);
                        break;
                    }
                    ClientEvent::PacketReceived { packet } => {
                        if let Some(out) = dump.as_mut() {
                            encoder.encode(&packet, &mut frame)?;
                            out.write_all(&frame)?;
                            frame.clear();
                        }
                        let _ = session.handle_packet(AUTHORITY, &packet);
                    }
                }
            }
            Some(event) = session_events.recv() => {
                match &event {
                    SessionEvent::RpcReceived(call) if call.method() == "Announce" => {
                        player = Some(call.unique_id());
                    }
                    SessionEvent::ConnectionDropped { .. } => {
                        println!("Send queue to the authority overflowed");
                        break;
                    }
                    _ => {}
                }
                print_session_event(&session, &event);
            }
            _ = mover.tick() => {
                if let Some(player) = player {
                    let direction = STEPS[steps % STEPS.len()];
                    steps += 1;
                    if let Err(e) = session.invoke(
                        RpcCall::new(player, "Move").arg("direction", direction),
                        None,
                    ) {
                        tracing::warn!("Move failed: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    if client.is_connected().await {
        client.disconnect().await?;
    }
    if let Some(mut out) = dump {
        out.flush()?;
    }
    tracing::info!("Observer stopped with {} entities", session.entity_count());

    Ok(())
}

const STEPS: [Vec3; 4] = [
    Vec3::new(1.0, 0.0, 0.0),
    Vec3::new(0.0, 0.0, 1.0),
    Vec3::new(-1.0, 0.0, 0.0),
    Vec3::new(0.0, 0.0, -1.0),
];

fn print_session_event(session: &Session, event: &SessionEvent) {
    match event {
        SessionEvent::Spawned {
            unique_id,
            type_name,
        } => println!("+ {} {}", type_name, unique_id),
        SessionEvent::Despawned {
            unique_id,
            type_name,
        } => println!("- {} {}", type_name, unique_id),
        SessionEvent::FieldsChanged { unique_id, fields } => {
            let values: Vec<String> = fields
                .iter()
                .map(|field| match session.get_field(*unique_id, field) {
                    Some(value) => format!("{}={:?}", field, value),
                    None => field.clone(),
                })
                .collect();
            println!("  {} {}", unique_id, values.join(" "));
        }
        SessionEvent::RpcReceived(call) => {
            let params: Vec<String> = call
                .params()
                .iter()
                .map(|p| format!("{}={:?}", p.name, p.value))
                .collect();
            println!("> {}.{}({})", call.unique_id(), call.method(), params.join(", "));
        }
        SessionEvent::ConnectionDropped { connection, .. } => {
            println!("- connection {} dropped", connection);
        }
        SessionEvent::Custom { from, payload } => {
            println!("  custom packet from {} ({} bytes)", from, payload.len());
        }
    }
}

/// Decode a capture file and print it as JSON
fn run_inspect(file: &Path, single: bool) -> anyhow::Result<()> {
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;

    let summaries = if single {
        vec![describe_packet(&WirePacket::from_raw(data.as_slice())?)]
    } else {
        describe_stream(&data)?
    };

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

/// Print protocol information
fn print_protocol_info() {
    println!("ActorNet Protocol Information");
    println!("=============================\n");

    println!("Protocol Version: {}", protocol::PROTOCOL_VERSION);
    println!("Default Port: {}", protocol::DEFAULT_PORT);
    println!("Max Frame Size: {} bytes", protocol::DEFAULT_MAX_FRAME_SIZE);

    println!("\nPacket Types:");
    for packet_type in [
        PacketType::ConnectionRequest,
        PacketType::ConnectionResponse,
        PacketType::ConnectionEnd,
        PacketType::Replication,
        PacketType::SpawnActor,
        PacketType::DespawnActor,
        PacketType::NewObject,
        PacketType::DestroyObject,
        PacketType::RpcCall,
        PacketType::RpcCallResponse,
        PacketType::Custom,
    ] {
        println!("  {:>4}  {:?}", packet_type.code(), packet_type);
    }

    println!("\nConfig Search Path:");
    for path in Config::default_paths() {
        println!("  {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["actornet", "info"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["actornet", "serve", "--port", "9000", "--bots", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Serve {
                port: Some(9000),
                bots: 2,
                interval: None
            }
        ));

        let cli = Cli::try_parse_from(["actornet", "-v", "inspect", "capture.bin", "--single"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Inspect { single: true, .. }));
    }

    #[test]
    fn test_demo_schemas_build() {
        assert!(demo::bot_schema().is_ok());
        assert!(demo::player_schema().is_ok());
    }

    #[test]
    fn test_arena_step_replicates() {
        let mut session = Session::new(SessionRole::Authority);
        demo::register(&mut session).unwrap();
        let mut arena = demo::Arena::populate(&mut session, 3).unwrap();
        assert_eq!(session.entity_count(), 3);

        for _ in 0..40 {
            arena.step(&mut session).unwrap();
            session.replicate_tick();
        }
        // Defeated bots are replaced, never dropped
        assert_eq!(arena.bots().len(), 3);
        assert_eq!(session.entity_count(), 3);
    }
}
