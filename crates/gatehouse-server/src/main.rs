use std::env;

use gatehouse_server::ServerBuilder;
use gatehouse_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From GATEHOUSE_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (gatehouse.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (GATEHOUSE_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    gatehouse_server::observability::init_tracing();

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
        provider = %cfg.auth.provider_name(),
        storage = ?cfg.storage.backend,
        "Configuration loaded"
    );

    gatehouse_server::observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err:#}");
        std::process::exit(1);
    }
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: GATEHOUSE_CONFIG
/// 3. Default: gatehouse.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("GATEHOUSE_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}
