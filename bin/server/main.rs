//! Watch Control Server
//!
//! Runs the coordinator as a standalone HTTP server for the worker fleet.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use watch_control::{
    ControlConfig, ControlServer, ControlStore, MemStore, PgConfig, PgStore, ServerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "watch-server")]
#[command(about = "Central coordinator for live-stream watch-time worker fleets")]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8080", env = "CONTROL_PORT")]
    port: u16,

    /// Server host
    #[arg(long, default_value = "0.0.0.0", env = "CONTROL_HOST")]
    host: String,

    /// Storage backend: "postgres" or "memory"
    #[arg(long, default_value = "postgres", env = "CONTROL_STORE")]
    store: String,

    /// PostgreSQL host
    #[arg(long, default_value = "localhost", env = "PG_HOST")]
    pg_host: String,

    /// PostgreSQL port
    #[arg(long, default_value = "5432", env = "PG_PORT")]
    pg_port: u16,

    /// PostgreSQL user
    #[arg(long, default_value = "postgres", env = "PG_USER")]
    pg_user: String,

    /// PostgreSQL password
    #[arg(long, default_value = "postgres", env = "PG_PASSWORD")]
    pg_password: String,

    /// PostgreSQL database name
    #[arg(long, default_value = "watch_control", env = "PG_DBNAME")]
    pg_dbname: String,

    /// Seconds without a heartbeat before a worker is considered offline
    #[arg(long, default_value = "60", env = "HEARTBEAT_TIMEOUT")]
    heartbeat_timeout: u64,

    /// Fixed UTC offset (hours east) for all stored timestamps
    #[arg(long, default_value = "8", env = "UTC_OFFSET_HOURS")]
    utc_offset: i32,

    /// JSON file holding the viewer session credentials handed to workers
    #[arg(long, env = "SESSION_FILE")]
    session_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("watch_control=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    info!("Starting Watch Control Server");
    info!("  Store: {}", args.store);
    info!("  Heartbeat timeout: {}s", args.heartbeat_timeout);
    info!("  Listening on: {}:{}", args.host, args.port);

    let mut control_config = ControlConfig {
        heartbeat_timeout_secs: args.heartbeat_timeout,
        utc_offset_hours: args.utc_offset,
        ..ControlConfig::default()
    };

    if let Some(path) = &args.session_file {
        control_config.load_session_file(path)?;
        info!("  Session credentials loaded from {:?}", path);
    }

    let store: Arc<dyn ControlStore> = match args.store.as_str() {
        "memory" => Arc::new(MemStore::new()),
        "postgres" => {
            let pg_config = PgConfig {
                host: args.pg_host,
                port: args.pg_port,
                user: args.pg_user,
                password: args.pg_password,
                dbname: args.pg_dbname,
                ..PgConfig::default()
            };
            Arc::new(PgStore::connect(&pg_config).await?)
        }
        other => anyhow::bail!("unknown store backend: {other} (expected postgres or memory)"),
    };

    let server_config = ServerConfig {
        host: args.host,
        port: args.port,
    };

    let server = ControlServer::new(server_config, store, &control_config)?;

    info!("Watch Control Server ready");

    // Blocks until shutdown
    server.start().await
}
