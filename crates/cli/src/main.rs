//! Third-party frame CLI.
//!
//! This tool provides commands for:
//! - Rendering a vendor embed offline and inspecting its host messages
//! - Validating settings files
//! - Listing the vendors a frame would register

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod error;
mod logging;
mod render;

use error::CliError;
use render::{RenderRequest, ScriptOutcome};

#[derive(Parser)]
#[command(name = "tpfcli")]
#[command(about = "Third-party frame CLI for rendering embeds and validating settings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a vendor embed in an offline frame
    Render {
        /// Vendor type to dispatch
        #[arg(long)]
        vendor: String,

        /// Embed attributes as a JSON object
        #[arg(long, default_value = "{}")]
        data: String,

        /// Path to a TOML settings file (defaults to the embedded settings)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Tag name of the embedding element, e.g. AMP-EMBED
        #[arg(long)]
        tag: Option<String>,

        /// How injected scripts finish
        #[arg(long, value_enum, default_value = "succeed")]
        load_scripts: ScriptOutcome,

        /// Run the frame in local development mode
        #[arg(long)]
        local_dev: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List the vendors a frame would register
    Vendors {
        /// Path to a TOML settings file (defaults to the embedded settings)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Include vendors only registered in local development mode
        #[arg(long)]
        local_dev: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate settings against validation rules and vendor blocks
    Validate {
        /// Path to the TOML configuration file
        #[arg(long, short)]
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    logging::init_logger(cli.verbose)?;

    match cli.command {
        Commands::Render {
            vendor,
            data,
            config,
            tag,
            load_scripts,
            local_dev,
        } => render::render(
            config.as_deref(),
            &RenderRequest {
                vendor: &vendor,
                data: &data,
                tag: tag.as_deref(),
                load_scripts,
                local_dev,
            },
        ),
        Commands::Config { action } => match action {
            ConfigAction::Validate { file } => config::validate(&file, cli.verbose),
        },
        Commands::Vendors { config, local_dev } => {
            config::list_vendors(config.as_deref(), local_dev)
        }
    }
}
