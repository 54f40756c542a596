use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cwtail")]
#[command(about = "Tail a log file into CloudWatch Logs", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/cwtail/config.yml, then /etc/cwtail/config.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ship appended lines until the sentinel line is written
    Run,
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a sample configuration
    Init {
        /// Print the sample instead of writing it to disk
        #[arg(long)]
        stdout: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cwtail=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run) | None => {
            // No config file found means falling back to environment variables
            let config_path = cwtail::config::resolve_config_path(cli.config.as_deref());
            cwtail::cli::run::run(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                cwtail::cli::config::init(stdout)?;
            }
        },
    }

    Ok(())
}
