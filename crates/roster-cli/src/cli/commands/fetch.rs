//! Fetch command handler.

use anyhow::{Context, Result};
use roster_core::attendance::FetchError;
use roster_core::config::Config;

use super::auth::build_page;

pub async fn run(config: &Config, join_url: &str, json: bool, no_browser: bool) -> Result<()> {
    let mut page = build_page(config, no_browser)?;
    page.set_join_url(join_url);
    if !page.state().can_fetch() {
        return Err(FetchError::EmptyJoinUrl.into());
    }

    page.initialize().await;
    tracing::debug!(signed_in = page.state().session.is_ready(), "session restored");

    eprintln!("Loading attendance...");
    let rows = page.fetch().await?;

    if json {
        let out = serde_json::to_string_pretty(&rows).context("serialize attendance")?;
        println!("{out}");
    } else if rows.is_empty() {
        println!("No attendance records.");
    } else {
        for row in &rows {
            println!("{row}");
        }
    }

    Ok(())
}
