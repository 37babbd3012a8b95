//! `roster config` handlers.

use anyhow::{Context, Result};
use roster_core::config::{CLIENT_ID_ENV, Config, TENANT_ID_ENV, paths};

/// Prints the config location; notes on stderr when it is not created yet.
pub fn path() {
    let config_path = paths::config_path();
    println!("{}", config_path.display());
    if !config_path.exists() {
        eprintln!("(not created yet; run `roster config init`)");
    }
}

/// Writes the commented template and tells the user what still needs filling in.
pub fn init() -> Result<()> {
    let config_path = paths::config_path();
    Config::init(&config_path)
        .with_context(|| format!("create roster config at {}", config_path.display()))?;

    println!("Created config at {}", config_path.display());
    println!();
    println!("Next: set client_id and tenant_id from your app registration,");
    println!("or export {CLIENT_ID_ENV} and {TENANT_ID_ENV}. Then run `roster login`.");
    Ok(())
}
