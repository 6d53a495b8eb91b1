use crate::schema::cache::MAX_TTL_SECS;
use crate::util::time::parse_timezone;
use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Path to the DuckDB file. Opened read-only.
    pub connection_string: String,
    pub pool_size: usize,
    /// Schema to introspect and query.
    pub schema: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    /// IANA zone used to resolve relative dates.
    pub timezone: String,
    pub cache_file: PathBuf,
    pub cache_ttl_secs: u64,
    pub max_repair_attempts: u32,
    pub row_limit: usize,
    pub validation_row_limit: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Interactive conversation on the terminal
    Chat,
    /// Answer a single question and exit
    Ask {
        question: String,
    },
}

const DEFAULT_LOCATIONS: [&str; 3] = [
    "config.toml",
    "config/config.toml",
    "/etc/nl-sql/config.toml",
];

impl AppConfig {
    /// Layers defaults, the first config file found, `NL_SQL_*` environment
    /// variables and finally command line overrides.
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else if let Some(location) = DEFAULT_LOCATIONS.iter().find(|l| Path::new(l).exists()) {
            config_builder =
                config_builder.add_source(File::new(location, config::FileFormat::Toml));
        }

        // e.g. NL_SQL_LLM__API_KEY, NL_SQL_AGENT__TIMEZONE
        config_builder = config_builder.add_source(
            Environment::with_prefix("NL_SQL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        parse_timezone(&self.agent.timezone).map_err(|e| ConfigError::Message(e.to_string()))?;

        if self.database.pool_size == 0 {
            return Err(ConfigError::Message(
                "database.pool_size must be at least 1".to_string(),
            ));
        }
        if self.agent.row_limit == 0 || self.agent.validation_row_limit == 0 {
            return Err(ConfigError::Message(
                "agent row limits must be at least 1".to_string(),
            ));
        }
        if self.agent.cache_ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::Message(format!(
                "agent.cache_ttl_secs must be at most {}",
                MAX_TTL_SECS
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: "warehouse.duckdb".to_string(),
                pool_size: 5,
                schema: "main".to_string(),
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                backend: "ollama".to_string(),
                model: "llama3.1".to_string(),
                api_key: None,
                api_url: None,
            },
            agent: AgentConfig {
                timezone: "UTC".to_string(),
                cache_file: PathBuf::from(".schema_snapshot.json"),
                cache_ttl_secs: 300,
                max_repair_attempts: 3,
                row_limit: 100,
                validation_row_limit: 3,
            },
            logging: LoggingConfig::default(),
        }
    }
}
