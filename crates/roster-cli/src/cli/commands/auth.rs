//! Auth command handlers.

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use roster_core::config::{Config, paths};
use roster_core::graph::GraphClient;
use roster_core::identity::cache::TokenStore;
use roster_core::identity::oauth::mask_token;
use roster_core::identity::{LoginPrompt, MicrosoftIdentity};
use roster_core::page::Page;
use roster_core::session::SessionController;

/// Sign-in interaction on the controlling terminal.
struct TerminalPrompt {
    no_browser: bool,
}

impl LoginPrompt for TerminalPrompt {
    fn show_authorization_url(&self, url: &str) {
        println!("To sign in with your Microsoft account:");
        println!();
        println!("  1. A browser window will open (or visit the URL below)");
        println!("  2. Sign in and approve the requested permissions");
        println!("  3. If redirected to localhost, return here to continue");
        println!("  4. Otherwise, paste the authorization code or URL");
        println!();
        println!("Authorization URL:");
        println!("  {url}");
        println!();

        // best effort
        if !self.no_browser {
            let _ = open::that(url);
        }
    }

    fn use_local_callback(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn read_authorization_input(&self) -> Result<String> {
        print!("Paste authorization code (or full redirect URL): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin()
            .lock()
            .read_line(&mut input)
            .context("read authorization code")?;
        Ok(input)
    }
}

/// Wires the identity provider, session controller and Graph client.
pub fn build_page(config: &Config, no_browser: bool) -> Result<Page<MicrosoftIdentity>> {
    let prompt = Arc::new(TerminalPrompt { no_browser });
    let identity = MicrosoftIdentity::from_config(config, prompt)?;
    let controller = SessionController::new(identity, config.scopes.clone());
    let graph = GraphClient::from_config(config)?;
    Ok(Page::new(controller, graph))
}

pub async fn login(config: &Config, no_browser: bool) -> Result<()> {
    let mut page = build_page(config, no_browser)?;
    page.initialize().await;

    if let Some(username) = page.state().session.username() {
        println!("Already signed in as {username}");
        print!("Do you want to sign in again? [y/N] ");
        io::stdout().flush()?;

        let mut response = String::new();
        io::stdin().lock().read_line(&mut response)?;
        if !response.trim().eq_ignore_ascii_case("y") {
            println!("Login cancelled.");
            return Ok(());
        }
    }

    let session = page.sign_in().await?;
    let username = session.username().unwrap_or_default();

    println!();
    println!("✓ Signed in as {username}");
    println!(
        "  Tokens saved to: {}",
        page.controller().identity().cache_path().display()
    );

    Ok(())
}

pub fn logout(config: &Config) -> Result<()> {
    let mut page = build_page(config, true)?;

    if page.sign_out()? {
        println!("✓ Signed out");
        println!(
            "  Tokens removed from: {}",
            page.controller().identity().cache_path().display()
        );
    } else {
        println!("Not signed in (no cached account).");
    }

    Ok(())
}

/// Reads the token cache only; never contacts the identity provider.
pub fn status() -> Result<()> {
    let store = TokenStore::new(paths::token_cache_path());

    let Some(account) = store.latest_account()? else {
        println!("Not signed in.");
        return Ok(());
    };

    println!("Signed in as {}", account.username);
    if let Some(token) = store.get(&account.home_account_id)? {
        let freshness = if token.is_expired() {
            "expired, refreshed on next use"
        } else {
            "valid"
        };
        println!("  Access token: {} ({freshness})", mask_token(&token.access));
    }
    println!("  Token cache: {}", store.path().display());

    Ok(())
}
