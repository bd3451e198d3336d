//! Command-line interface definition for formstream
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive chat sessions and schema checks.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// formstream - conversational form session client
///
/// Streams a conversational form session from the session service,
/// keeping the transcript and collected fields live through drops and
/// fallbacks.
#[derive(Parser, Debug, Clone)]
#[command(name = "formstream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/formstream.yaml")]
    pub config: Option<String>,

    /// Override the service base URL from config
    #[arg(long)]
    pub base_url: Option<String>,

    /// Override the bearer token from config
    #[arg(long)]
    pub token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for formstream
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Stream a session interactively in the terminal
    Chat {
        /// Session id to resume; omit to create a new session
        #[arg(short, long)]
        session: Option<String>,

        /// Agent id to create a new session for (required without --session)
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// Validate a JSON value against an agent schema file
    Check {
        /// Path to the agent schema file (JSON array of field definitions)
        #[arg(short, long)]
        schema: PathBuf,

        /// Field id within the schema to validate against
        #[arg(short, long)]
        field: String,

        /// The value to validate, as JSON (e.g. '"a@b.com"', '42', 'true')
        #[arg(short, long)]
        value: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
