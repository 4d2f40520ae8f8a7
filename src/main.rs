use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use segmail::config::resolve_config_path;

#[derive(Parser)]
#[command(name = "segmail")]
#[command(about = "Segment-aware batch email dispatch", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and send emails as they are created
    Run,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show an email and its batches
    Status { email_id: Uuid },
    /// Resend the failed batches of an email
    Retry { email_id: Uuid },
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
                .unwrap_or_else(|_| "segmail=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            segmail::cli::run::run(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                segmail::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                segmail::cli::config::validate(config_path)?;
            }
        },
        Some(Commands::Status { email_id }) => {
            segmail::cli::run::status(config_path, email_id).await?;
        }
        Some(Commands::Retry { email_id }) => {
            segmail::cli::run::retry(config_path, email_id).await?;
        }
    }

    Ok(())
}
