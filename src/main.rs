//! voxgate — real-time voice gateway binary.
//!
//! Composition root: loads settings from the environment, opens the
//! database, constructs the vendor clients, and serves the PBX WebSocket
//! plus the ops endpoints.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use voxgate_axum::GatewayContext;
use voxgate_core::GatewaySettings;
use voxgate_db::{setup_database, SqliteAgentDirectory, SqliteBillingLedger, SqliteCallLogRepository};
use voxgate_voice::messaging::HttpMessagingDispatcher;
use voxgate_voice::asr::StreamingAsrConnector;
use voxgate_voice::{HttpTtsClient, PbxProfile, SessionRegistry, SseLlmClient};

#[derive(Parser, Debug)]
#[command(name = "voxgate", about = "PBX voice gateway")]
struct Args {
    /// Listen port (overrides VOXGATE_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides VOXGATE_DB_PATH).
    #[arg(long)]
    db: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is a dev convenience; absence is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = GatewaySettings::from_env().context("loading settings")?;
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(db) = args.db {
        settings.db_path = db;
    }
    let settings = Arc::new(settings);

    let pool = setup_database(&settings.db_path)
        .await
        .context("opening database")?;

    let profile = if settings.mulaw_profile {
        PbxProfile::mulaw()
    } else {
        PbxProfile::linear16()
    };

    let context = Arc::new(GatewayContext {
        settings: Arc::clone(&settings),
        registry: Arc::new(SessionRegistry::new()),
        started_at: chrono::Utc::now(),
        agents: Arc::new(SqliteAgentDirectory::new(pool.clone())),
        billing: Arc::new(SqliteBillingLedger::new(pool.clone())),
        call_log: Arc::new(SqliteCallLogRepository::new(pool)),
        messaging: Arc::new(HttpMessagingDispatcher::new()),
        asr: Arc::new(StreamingAsrConnector::new(
            settings.asr_url.clone(),
            settings.asr_api_key.clone(),
        )),
        llm: Arc::new(SseLlmClient::new(
            settings.llm_url.clone(),
            settings.llm_api_key.clone(),
        )?),
        tts: Arc::new(HttpTtsClient::new(
            settings.tts_url.clone(),
            settings.tts_api_key.clone(),
        )?),
        profile,
    });

    tracing::info!(mulaw = settings.mulaw_profile, "Starting gateway");
    voxgate_axum::serve(context, settings.port)
        .await
        .context("serving")?;

    Ok(())
}
