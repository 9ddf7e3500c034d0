//! spheroseg-watch - follow segmentation progress from the command line

use anyhow::Result;
use clap::Parser;
use serde_json::Value;
use spheroseg_socket::{
    Credential, RealtimeClient, RoomPolicy, ServerEvent, SocketConfig, TlsConfig,
    CONNECTION_LOST, CONNECT_ERROR, DISCONNECT, NOTIFICATION, QUEUE_STATS_UPDATE, RECONNECTED,
    RECONNECTING, SEGMENTATION_UPDATE, SYSTEM_MESSAGE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Watch segmentation jobs and queue statistics for one or more projects
#[derive(Parser, Debug)]
#[command(name = "spheroseg-watch")]
#[command(version, about = "Follow segmentation progress over the realtime channel")]
struct Args {
    /// Server URL
    #[arg(short, long, env = "SPHEROSEG_SOCKET_URL", default_value = "http://localhost:3001")]
    server: String,

    /// User id the token was issued for
    #[arg(short, long, env = "SPHEROSEG_USER_ID")]
    user: Option<String>,

    /// Bearer token
    #[arg(short, long, env = "SPHEROSEG_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Project to follow (repeatable)
    #[arg(short, long = "project")]
    projects: Vec<String>,

    /// Seconds between queue statistics requests (0 disables polling)
    #[arg(long, default_value_t = 0)]
    stats_interval: u64,

    /// Give up after this many failed reconnection attempts
    #[arg(long, default_value_t = 10)]
    max_attempts: u32,

    /// Keep-alive ping interval in seconds
    #[arg(long, default_value_t = 25)]
    keep_alive: u64,

    /// Keep followed projects across explicit disconnects
    #[arg(long, default_value = "false")]
    retain_rooms: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// CA certificate path for TLS
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Client certificate path for mTLS
    #[arg(long)]
    client_cert: Option<PathBuf>,

    /// Client key path for mTLS (not needed for P12)
    #[arg(long)]
    client_key: Option<PathBuf>,

    /// P12 password (for PKCS#12 format client cert)
    #[arg(long)]
    p12_password: Option<String>,

    /// Skip TLS certificate verification (DEVELOPMENT ONLY)
    #[arg(long, default_value = "false")]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = SocketConfig {
        url: args.server.clone(),
        tls: TlsConfig {
            ca_cert_path: args.ca_cert,
            client_cert_path: args.client_cert,
            client_key_path: args.client_key,
            client_p12_password: args.p12_password,
            danger_accept_invalid_certs: args.insecure,
        },
        keep_alive_interval: Duration::from_secs(args.keep_alive),
        max_reconnect_attempts: args.max_attempts,
        room_policy: if args.retain_rooms {
            RoomPolicy::Retain
        } else {
            RoomPolicy::ClearOnDisconnect
        },
        ..SocketConfig::default()
    };

    let client = RealtimeClient::new(config)?;
    let credential = Credential::from_parts(args.user, args.token)?;
    info!("Starting spheroseg-watch against {} as {}", args.server, credential.user_id);

    register_logging(&client);

    // Commands issued before the connection is up are queued and replayed.
    for project in &args.projects {
        client.join_project(project)?;
        client.request_queue_stats(project)?;
    }
    if let Err(e) = client.connect(credential).await {
        if e.is_terminal() {
            error!("{}. Check the user id and token, then log in again.", e);
        }
        client.cleanup();
        return Err(e.into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = (args.stats_interval > 0).then(|| {
        tokio::spawn(poll_queue_stats(
            client.clone(),
            args.projects.clone(),
            Duration::from_secs(args.stats_interval),
            shutdown_rx,
        ))
    });

    info!("Watching {} project(s). Press Ctrl+C to stop.", args.projects.len());
    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    let _ = shutdown_tx.send(true);
    if let Some(poller) = poller {
        let _ = tokio::time::timeout(Duration::from_secs(5), poller).await;
    }

    client.cleanup();
    info!("spheroseg-watch stopped");
    Ok(())
}

/// Log every inbound event and lifecycle change.
fn register_logging(client: &RealtimeClient) {
    for event in [SEGMENTATION_UPDATE, QUEUE_STATS_UPDATE, NOTIFICATION, SYSTEM_MESSAGE] {
        client.on(
            event,
            Arc::new(move |payload: &Value| match ServerEvent::parse(event, payload) {
                Ok(Some(parsed)) => log_event(&parsed),
                Ok(None) => {}
                Err(e) => warn!("Unreadable {} payload: {}", event, e),
            }),
        );
    }

    for event in [DISCONNECT, CONNECT_ERROR, RECONNECTING, RECONNECTED] {
        client.on(
            event,
            Arc::new(move |payload: &Value| info!("[lifecycle] {} {}", event, payload)),
        );
    }
    client.on(
        CONNECTION_LOST,
        Arc::new(|payload: &Value| error!("Connection lost for good: {}", payload)),
    );
}

fn log_event(event: &ServerEvent) {
    let name = event.name();
    match event {
        ServerEvent::SegmentationUpdate(update) => {
            let progress = update
                .progress
                .map(|p| format!(" ({:.0}%)", p))
                .unwrap_or_default();
            if update.status.is_final() {
                info!(
                    "[{}] {} image {} finished: {:?}{}",
                    name,
                    update.project_id,
                    update.image_id,
                    update.status,
                    update.error.as_deref().map(|e| format!(" ({})", e)).unwrap_or_default()
                );
            } else {
                debug!(
                    "[{}] {} image {} -> {:?}{}",
                    name, update.project_id, update.image_id, update.status, progress
                );
            }
        }
        ServerEvent::QueueStats(stats) => info!(
            "[{}] {} queued={} processing={} total={}",
            name, stats.project_id, stats.queued, stats.processing, stats.total
        ),
        ServerEvent::Notification(n) => info!("[{}] {} at {}", name, n.kind, n.timestamp),
        ServerEvent::SystemMessage(m) => info!("[{}:{:?}] {}", name, m.level, m.message),
    }
}

async fn poll_queue_stats(
    client: RealtimeClient,
    projects: Vec<String>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Stats poller received shutdown signal");
                    break;
                }
            }
            _ = ticker.tick() => {
                for project in &projects {
                    if let Err(e) = client.request_queue_stats(project) {
                        warn!("Queue stats request failed: {}", e);
                        return;
                    }
                }
            }
        }
    }
}
