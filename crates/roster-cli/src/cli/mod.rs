//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use roster_core::config;

mod commands;

#[derive(Parser)]
#[command(name = "roster")]
#[command(version)]
#[command(about = "Look up Microsoft Teams meeting attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Do not open a browser during sign-in (print the URL only)
    #[arg(
        long,
        global = true,
        env = "ROSTER_NO_BROWSER",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    no_browser: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sign in with your Microsoft work or school account
    Login,
    /// Sign out (remove the cached account and tokens)
    Logout,
    /// Show the signed-in account
    Status,
    /// Fetch the attendance list of a meeting
    Fetch {
        /// The meeting join URL
        #[arg(value_name = "JOIN_URL")]
        join_url: String,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        no_browser,
    } = cli;

    // config commands must work even when the file is broken
    let load = || config::Config::load().context("load config");

    match command {
        Commands::Login => commands::auth::login(&load()?, no_browser).await,
        Commands::Logout => commands::auth::logout(&load()?),
        Commands::Status => commands::auth::status(),
        Commands::Fetch { join_url, json } => {
            commands::fetch::run(&load()?, &join_url, json, no_browser).await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
