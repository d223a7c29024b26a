use clap::{Parser, Subcommand};
use spotwatch::cli::run::RunOverrides;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "spotwatch")]
#[command(about = "Tail a detection log into a deduplicated detection store", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail the detection file until interrupted
    Run {
        /// Detection file to watch (overrides source.path)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Poll interval in milliseconds (overrides source.poll_interval)
        #[arg(long)]
        poll_ms: Option<u64>,

        /// Cooldown window in milliseconds (overrides dedup.cooldown)
        #[arg(long)]
        cooldown_ms: Option<u64>,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the most recently stored detections
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = spotwatch::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run {
            file,
            poll_ms,
            cooldown_ms,
        }) => {
            let overrides = RunOverrides {
                file,
                poll_ms,
                cooldown_ms,
            };
            spotwatch::cli::run::run(config_path, overrides).await?;
        }
        None => {
            spotwatch::cli::run::run(config_path, RunOverrides::default()).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => spotwatch::cli::config::init(stdout)?,
            ConfigAction::Validate => spotwatch::cli::config::validate(config_path)?,
        },
        Some(Commands::Recent { limit, json }) => {
            spotwatch::cli::recent::recent(config_path, limit, json).await?;
        }
    }

    Ok(())
}
