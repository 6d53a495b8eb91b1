use clap::Parser;
use r2d2::Pool;
use std::sync::Arc;
use tracing::{error, info};

mod agent;
mod config;
mod db;
mod llm;
mod repl;
mod schema;
mod util;
mod web;

#[cfg(test)]
mod test_support;

use crate::agent::{Pipeline, PipelineSettings};
use crate::config::{AppConfig, CliArgs, Command};
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::duckdb_backend::DuckDbBackend;
use crate::db::executor::QueryExecutor;
use crate::llm::build_model;
use crate::llm::prompts::Prompts;
use crate::schema::cache::{FileSnapshotStore, SystemClock};
use crate::schema::SchemaCache;
use crate::util::logging::init_tracing;
use crate::util::time::parse_timezone;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration; logging format depends on it
    let config = AppConfig::new(&args);
    init_tracing(config.as_ref().map(|c| c.logging.json).unwrap_or(false));
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    let timezone = parse_timezone(&config.agent.timezone)?;

    info!(
        "Opening {} read-only with a pool of {}",
        config.database.connection_string, config.database.pool_size
    );
    let db_manager = DuckDBConnectionManager::new(config.database.connection_string.clone());
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(db_manager)?;
    let backend = Arc::new(DuckDbBackend::new(pool, config.database.schema.clone()));

    let schema_cache = Arc::new(SchemaCache::new(
        backend.clone(),
        Arc::new(FileSnapshotStore::new(config.agent.cache_file.clone())),
        Arc::new(SystemClock),
        config.agent.cache_ttl_secs,
    ));

    info!("Initializing language model with backend: {}", config.llm.backend);
    let llm = build_model(&config.llm)?;

    let pipeline = Arc::new(Pipeline::new(
        llm,
        QueryExecutor::new(backend),
        schema_cache.clone(),
        Arc::new(Prompts::new()?),
        PipelineSettings {
            max_repair_attempts: config.agent.max_repair_attempts,
            row_limit: config.agent.row_limit,
            validation_row_limit: config.agent.validation_row_limit,
        },
    ));

    // Warm the schema cache; a failure here is retried on the first question
    if let Err(e) = schema_cache.get_schema_snapshot().await {
        error!("Failed to load schema snapshot: {}", e);
    }

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let app_state = Arc::new(AppState::new(pipeline, timezone));
            info!("Starting server on {}:{}", config.web.host, config.web.port);
            match web::run_server(config.web, app_state).await {
                Ok(()) => info!("Server stopped gracefully"),
                Err(e) => {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
        }
        Command::Chat => repl::chat(&pipeline, timezone).await?,
        Command::Ask { question } => repl::ask_once(&pipeline, timezone, &question).await?,
    }

    Ok(())
}
