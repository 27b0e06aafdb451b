mod check_commands;
mod relay_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    rainbow_config::RelayConfig,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "rainbow", about = "Rainbow: cross-channel message relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: first rainbow.{toml,yaml,yml,json} in ./ or
    /// ~/.config/rainbow/).
    #[arg(long, short, global = true, env = "RAINBOW_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate bridges and report dropped configuration entries.
    Check {
        /// List every bridge, not only the problems.
        #[arg(long)]
        verbose: bool,
    },
    /// Relay message events read from stdin, one JSON object per line.
    Relay {
        /// Do not reload when the config file changes.
        #[arg(long)]
        no_watch: bool,
    },
}

/// Logs go to stderr; stdout belongs to command output.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Load `explicit`, or discover a config file. Without either, an empty
/// configuration is used.
fn load(explicit: Option<&Path>) -> anyhow::Result<(Option<PathBuf>, RelayConfig)> {
    if let Some(path) = explicit {
        let config = rainbow_config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        return Ok((Some(path.to_path_buf()), config));
    }
    match rainbow_config::find_config_file() {
        Some(path) => {
            let config = rainbow_config::load_config(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            Ok((Some(path), config))
        },
        None => {
            debug!("no config file found, starting without bridges");
            Ok((None, RelayConfig::default()))
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "rainbow starting");

    match cli.command {
        Commands::Check { verbose } => check_commands::check(cli.config.as_deref(), verbose),
        Commands::Relay { no_watch } => {
            relay_commands::relay(cli.config.as_deref(), !no_watch).await
        },
    }
}
