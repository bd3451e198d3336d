//! formstream - conversational form session client
//!
#![doc = "formstream - conversational form session client"]
#![doc = "Main entry point for the formstream CLI."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use formstream::cli::{Cli, Commands};
use formstream::commands;
use formstream::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/formstream.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chat { ref session, ref agent } => {
            tracing::info!("Starting interactive session");
            commands::chat::run_chat(config, session.clone(), agent.clone()).await?;
        }
        Commands::Check {
            ref schema,
            ref field,
            ref value,
        } => {
            commands::check::run_check(schema, field, value)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "formstream=debug"
    } else {
        "formstream=info"
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
