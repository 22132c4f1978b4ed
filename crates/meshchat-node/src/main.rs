//! # meshchat-node
//!
//! Headless mesh chat node. Without a radio attached it runs the core over
//! the relay swarm only, which is enough for mutual favorites to exchange
//! direct messages and for out-of-band verification over the relay.
//!
//! The node is driven by a line-oriented protocol on stdin (see
//! [`control`]); notifications are printed to stdout.

mod config;
mod control;
mod keyfile;
mod mesh;

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshchat_core::{
    spawn_engine, CoreConfig, CoreNotification, EngineHandle, MessageRouter, RouterParts,
    SystemClock,
};
use meshchat_net::{
    inbox_topic, relay_keypair, run_relay_bridge, spawn_swarm, GossipRelayTransport, RelayBridge,
    SwarmCommand, SwarmConfig,
};
use meshchat_store::database::{default_data_dir, Database};

use crate::config::NodeConfig;
use crate::control::ControlCommand;
use crate::mesh::DetachedMesh;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing (respects RUST_LOG)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,meshchat_core=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting meshchat node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let node_config = NodeConfig::from_env();
    let core_config = CoreConfig::from_env();
    info!(?node_config, "Loaded node configuration");

    let data_dir: PathBuf = match node_config.data_dir.clone() {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // -----------------------------------------------------------------------
    // 3. Identity and storage
    // -----------------------------------------------------------------------
    let identity = keyfile::load_or_create(&data_dir)?;
    let db = Database::open_in_dir(&data_dir)?;
    let favorites = Database::open_in_dir(&data_dir)?;

    // -----------------------------------------------------------------------
    // 4. Relay swarm
    // -----------------------------------------------------------------------
    let keypair = relay_keypair(&identity)?;
    let local_peer_id = keypair.public().to_peer_id();
    let inbox = inbox_topic(&local_peer_id.to_string());
    let (swarm_tx, swarm_rx, _) = spawn_swarm(
        keypair,
        SwarmConfig {
            listen_port: node_config.listen_port,
            bootstrap: node_config.bootstrap.clone(),
            topics: vec![inbox],
        },
    )
    .await?;

    let relay = GossipRelayTransport::new(
        swarm_tx.clone(),
        local_peer_id,
        identity.noise_public_key_hex(),
        node_config.nickname.clone(),
    );
    let bridge = RelayBridge::new(&relay);

    // -----------------------------------------------------------------------
    // 5. Core engine
    // -----------------------------------------------------------------------
    let router = MessageRouter::new(
        core_config,
        RouterParts {
            identity,
            nickname: node_config.nickname.clone(),
            mesh: Box::new(DetachedMesh),
            relay: Box::new(relay),
            favorites: Box::new(favorites),
            db,
            clock: Box::new(SystemClock),
        },
    )?;
    info!(fingerprint = %router.local_fingerprint(), relay_key = %local_peer_id, "Node ready");

    let (engine, notifications, engine_task) = spawn_engine(router);
    tokio::spawn(run_relay_bridge(bridge, swarm_rx, engine.clone()));
    tokio::spawn(print_notifications(notifications));

    // -----------------------------------------------------------------------
    // 6. Control loop
    // -----------------------------------------------------------------------
    tokio::select! {
        result = control_loop(engine.clone()) => {
            if let Err(e) = result {
                warn!(error = %e, "Control input failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    if engine.shutdown().await.is_ok() {
        let _ = engine_task.await;
    }
    let _ = swarm_tx.send(SwarmCommand::Shutdown).await;

    info!("meshchat node stopped");
    Ok(())
}

async fn control_loop(engine: EngineHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match control::parse(&line) {
            Ok(command) => command,
            Err(control::ParseError::Empty) => continue,
            Err(e) => {
                println!("! {e}");
                continue;
            }
        };

        match command {
            ControlCommand::Send { to, text } => match engine.send_private(to, text).await {
                Ok((id, outcome)) => println!("sent {id} {outcome:?}"),
                Err(e) => println!("! {e}"),
            },
            ControlCommand::Read(peer) => engine.mark_read(peer).await?,
            ControlCommand::Favorite { peer, favorite } => engine.set_favorite(peer, favorite).await?,
            ControlCommand::Block { peer, blocked } => engine.set_blocked(peer, blocked).await?,
            ControlCommand::Verify(code) => match engine.begin_verification(code).await {
                Ok(fingerprint) => println!("verifying {}", fingerprint.short()),
                Err(e) => println!("! {e}"),
            },
            ControlCommand::ShowQr => match engine.verification_qr().await {
                Ok(code) => println!("{code}"),
                Err(e) => println!("! {e}"),
            },
            ControlCommand::Quit => break,
        }
    }

    Ok(())
}

async fn print_notifications(mut rx: mpsc::Receiver<CoreNotification>) {
    while let Some(notification) = rx.recv().await {
        match notification {
            CoreNotification::MessageCommitted { channel, message } => {
                println!("[{channel}] <{}> {}", message.sender_nickname, message.content);
            }
            CoreNotification::PrivateMessageReceived { peer, message } => {
                println!("[dm {peer}] <{}> {}", message.sender_nickname, message.content);
            }
            CoreNotification::DeliveryStatusChanged { id, status } => {
                println!("status {id} {status:?}");
            }
            CoreNotification::SystemMessage { peer, message } => match peer {
                Some(peer) => println!("* [{peer}] {}", message.content),
                None => println!("* {}", message.content),
            },
            CoreNotification::PeerVerified { fingerprint } => {
                println!("* verified {}", fingerprint.short());
            }
            CoreNotification::MutualVerification { fingerprint } => {
                println!("* mutual verification with {}", fingerprint.short());
            }
            CoreNotification::FavoriteChanged {
                fingerprint,
                is_favorite,
                they_favorited_us,
            } => {
                println!(
                    "* favorite {} ours={is_favorite} theirs={they_favorited_us}",
                    fingerprint.short()
                );
            }
        }
    }
}
