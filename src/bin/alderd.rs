//! The alder server daemon.
//!
//! Configuration comes from the environment:
//!
//! - `ALDER_ADDR`: listen address (default `127.0.0.1:9012`)
//! - `ALDER_DATA`: data directory; omit for an in-memory store
//! - `ALDER_WORKERS`: repair worker threads (default: CPU count, capped at 4)

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use alder::{
    Database, DatabaseConfig, FileKvConfig, KvConfig, KvFactory, ScriptEvaluator, Server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let addr = std::env::var("ALDER_ADDR").unwrap_or_else(|_| "127.0.0.1:9012".to_string());

    let kv_config = match std::env::var("ALDER_DATA") {
        Ok(path) => KvConfig::File(FileKvConfig::new(path)),
        Err(_) => KvConfig::Memory,
    };

    let mut config = DatabaseConfig::default();
    if let Ok(workers) = std::env::var("ALDER_WORKERS") {
        config.repair_workers = workers
            .parse()
            .with_context(|| format!("ALDER_WORKERS must be a number, got `{workers}`"))?;
    }

    let kv = KvFactory::create(kv_config)?;
    let db = Arc::new(Database::new(kv, Arc::new(ScriptEvaluator::new()), config));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("alder {} listening on {addr}", alder::VERSION);

    Server::new(db).serve(listener).await?;
    Ok(())
}
