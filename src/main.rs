use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use forge_engine::{CommandEngine, GenerationEngine};
use forge_server::ServerConfig;
use forge_store::Database;

/// Multi-agent code generation backend.
#[derive(Parser, Debug)]
#[command(name = "forge", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "FORGE_PORT", default_value_t = 8000)]
    port: u16,

    /// SQLite database path
    #[arg(long, env = "FORGE_DB", default_value = "forge.db")]
    db: PathBuf,

    /// Agent-runner command (program plus arguments)
    #[arg(long, env = "FORGE_ENGINE_CMD", default_value = "forge-agent-runner")]
    engine_cmd: String,

    /// Seconds a clarification question waits before using defaults
    #[arg(long, env = "FORGE_QUESTION_TIMEOUT", default_value_t = 300)]
    question_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting Forge server");

    if let Some(parent) = cli.db.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(&cli.db)?;
    tracing::info!(path = %cli.db.display(), "Database opened");

    let mut parts = cli.engine_cmd.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("engine command is empty"))?;
    let engine: Arc<dyn GenerationEngine> =
        Arc::new(CommandEngine::new(program).with_args(parts.collect()));

    let config = ServerConfig {
        port: cli.port,
        question_timeout_secs: cli.question_timeout,
        ..Default::default()
    };
    let handle = forge_server::start(config, db, engine).await?;
    tracing::info!(port = handle.port, "Forge server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
