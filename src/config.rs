use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Which vision provider to run: `mock` or `openrouter`. Selected once
    /// at startup; business logic never sniffs the environment.
    pub provider: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: Option<String>,
    pub openrouter_base_url: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Food photo analysis API")]
pub struct Args {
    /// Host to bind to (overrides FOODLENS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FOODLENS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides FOODLENS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FOODLENS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Vision provider: mock | openrouter (overrides FOODLENS_PROVIDER)
    #[arg(long)]
    pub provider: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("FOODLENS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("FOODLENS_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing FOODLENS_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading FOODLENS_PORT"),
        };
        let env_storage =
            env::var("FOODLENS_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("FOODLENS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/foodlens.db".into());
        let env_provider = env::var("FOODLENS_PROVIDER").unwrap_or_else(|_| "mock".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            provider: args.provider.unwrap_or(env_provider),
            openrouter_api_key: env::var("OPENROUTER_API_KEY").ok(),
            openrouter_model: env::var("OPENROUTER_IMAGE_MODEL").ok(),
            openrouter_base_url: env::var("OPENROUTER_BASE_URL").ok(),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
