//! artcap-ui - Artifact Capture web service
//!
//! Field data capture for excavation recording: structured metadata plus
//! photographs, with derived image variants and per-object-type storage.

use anyhow::Result;
use artcap_common::config::ArtcapConfig;
use artcap_common::db;
use artcap_ui::{build_router, AppState};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "artcap-ui", about = "Artifact Capture web service")]
struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Config file path (falls back to ARTCAP_CONFIG, then ./artcap.toml)
    #[arg(long)]
    config: Option<String>,

    /// Data root folder (falls back to ARTCAP_ROOT, then ./artcap_data)
    #[arg(long)]
    root: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting Artifact Capture (artcap-ui) v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let config = ArtcapConfig::load(args.config.as_deref(), args.root.as_deref())?;
    std::fs::create_dir_all(&config.upload_dir)?;
    info!("Upload directory: {}", config.upload_dir.display());
    info!("Database path: {}", config.db_path.display());

    let pool = db::init_database(&config.db_path).await?;
    db::ensure_tables(&pool, config.schemas.values()).await?;
    info!("Database ready: {} object type table(s)", config.schemas.len());

    let state = AppState::new(pool, Arc::new(config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("artcap-ui listening on http://{}:{}", args.host, args.port);
    info!("Health check: http://{}:{}/health", args.host, args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
