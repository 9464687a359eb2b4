//! SpotX adapter CLI.
//!
//! Runs the adapter's validator, request builder, response interpreter and
//! outstream renderer against JSON fixtures, printing the results.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod error;
mod logging;

use error::CliError;

#[derive(Parser)]
#[command(name = "spotxcli")]
#[command(about = "Run the SpotX bidder adapter against page and auction fixtures")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings TOML file (defaults to the embedded settings)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate bid request descriptors against a page
    Validate {
        /// Page fixture JSON
        #[arg(long, short)]
        page: PathBuf,

        /// Bid request descriptors JSON array
        #[arg(long, short)]
        bids: PathBuf,
    },

    /// Build the outbound SpotX request for the valid descriptors
    Build {
        /// Page fixture JSON
        #[arg(long, short)]
        page: PathBuf,

        /// Bid request descriptors JSON array
        #[arg(long, short)]
        bids: PathBuf,

        /// Auction context JSON (referrer, GDPR consent, auction bids)
        #[arg(long)]
        context: Option<PathBuf>,
    },

    /// Interpret a SpotX response against a built request
    Interpret {
        /// Request JSON as printed by `build`
        #[arg(long)]
        request: PathBuf,

        /// SpotX response body
        #[arg(long)]
        response: PathBuf,
    },

    /// Render the first video bid of a response into a page
    Render {
        /// Page fixture JSON
        #[arg(long, short)]
        page: PathBuf,

        /// Request JSON as printed by `build`
        #[arg(long)]
        request: PathBuf,

        /// SpotX response body
        #[arg(long)]
        response: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logger(cli.verbose) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match run(cli) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String, CliError> {
    let settings = commands::load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate { page, bids } => pretty(&commands::validate(settings, &page, &bids)?),
        Commands::Build {
            page,
            bids,
            context,
        } => pretty(&commands::build(
            settings,
            &page,
            &bids,
            context.as_deref(),
        )?),
        Commands::Interpret { request, response } => {
            pretty(&commands::interpret(settings, &request, &response)?)
        }
        Commands::Render {
            page,
            request,
            response,
        } => commands::render(settings, &page, &request, &response),
    }
}

fn pretty(value: &serde_json::Value) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}
