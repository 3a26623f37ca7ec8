use std::env;

use anyhow::Context;
use pedro_auth_postgres::PostgresAuthStorage;
use pedro_server::config::loader::load_config;
use pedro_server::{AppState, AuthStores, ServerBuilder, create_session_store};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From PEDRO_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (pedro.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (PEDRO_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    pedro_server::observability::init_tracing();

    let (config_path, source) = resolve_config_path();

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    pedro_server::observability::apply_logging_level(&cfg.logging.level);

    if let Err(err) = run(cfg).await {
        eprintln!("Server error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cfg: pedro_server::AppConfig) -> anyhow::Result<()> {
    let pg = PostgresAuthStorage::connect(&cfg.postgres.url, cfg.postgres.pool_size)
        .await
        .context("connecting to PostgreSQL")?;
    if cfg.postgres.run_migrations {
        pg.migrate().await.context("running migrations")?;
    }
    tracing::info!("Credential store ready");

    let sessions = create_session_store(&cfg.redis).await;
    tracing::info!(backend = sessions.backend_name(), "Session store ready");

    let state = AppState::new(AuthStores::postgres(&pg, sessions), &cfg.auth);
    ServerBuilder::new(cfg, state).build().run().await
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: PEDRO_CONFIG
/// 3. Default: pedro.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("PEDRO_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (
        pedro_server::config::loader::DEFAULT_CONFIG_FILE.to_string(),
        ConfigSource::Default,
    )
}
