//! Microsoft identity platform client (public client, authorization code + PKCE).

use std::sync::Arc;

use anyhow::{Context, Result};

use super::cache::{CachedToken, TokenStore};
use super::callback::{self, CALLBACK_TIMEOUT, CallbackOutcome};
use super::oauth::{self, AuthorizationInput, OAuthClient};
use super::{Account, AuthResult, IdentityProvider};
use crate::config::{Config, paths};
use crate::graph::build_http_client;

/// Terminal interaction needed by the interactive sign-in.
pub trait LoginPrompt: Send + Sync {
    /// Presents the authorization URL (print it, open a browser).
    fn show_authorization_url(&self, url: &str);

    /// Whether to wait for the browser redirect on the loopback port
    /// before falling back to [`LoginPrompt::read_authorization_input`].
    fn use_local_callback(&self) -> bool;

    /// Reads a pasted authorization code or redirect URL.
    ///
    /// # Errors
    /// Returns an error if input cannot be read.
    fn read_authorization_input(&self) -> Result<String>;
}

/// [`IdentityProvider`] backed by the Microsoft identity platform and a
/// persistent token cache.
pub struct MicrosoftIdentity {
    oauth: OAuthClient,
    store: TokenStore,
    redirect_port: Option<u16>,
    prompt: Arc<dyn LoginPrompt>,
}

impl MicrosoftIdentity {
    pub fn new(
        oauth: OAuthClient,
        store: TokenStore,
        redirect_port: Option<u16>,
        prompt: Arc<dyn LoginPrompt>,
    ) -> Self {
        Self {
            oauth,
            store,
            redirect_port,
            prompt,
        }
    }

    /// Builds the client from configuration, caching tokens under `ROSTER_HOME`.
    ///
    /// # Errors
    /// Returns an error if client id or tenant are missing, or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &Config, prompt: Arc<dyn LoginPrompt>) -> Result<Self> {
        let client_id = config.effective_client_id()?;
        let authority = config.authority()?;
        let http = build_http_client(config.request_timeout())?;
        tracing::debug!(%authority, "configured identity provider");

        Ok(Self::new(
            OAuthClient::new(http, client_id, &authority),
            TokenStore::new(paths::token_cache_path()),
            config.redirect_port,
            prompt,
        ))
    }

    /// Location of the token cache file.
    pub fn cache_path(&self) -> &std::path::Path {
        self.store.path()
    }

    async fn authorization_code(&self, port: u16, state: &str) -> Result<String> {
        let from_callback = if self.prompt.use_local_callback() {
            callback::wait_for_code(port, state.to_string(), CALLBACK_TIMEOUT).await
        } else {
            CallbackOutcome::Unavailable
        };

        match from_callback {
            CallbackOutcome::Code(code) => Ok(code),
            CallbackOutcome::Denied(message) => anyhow::bail!("Sign-in was denied: {message}"),
            CallbackOutcome::Unavailable => {
                let input = self.prompt.read_authorization_input()?;
                match oauth::parse_authorization_input(&input) {
                    AuthorizationInput::Code {
                        code,
                        state: provided,
                    } => {
                        if let Some(provided) = provided
                            && provided != state
                        {
                            anyhow::bail!("State mismatch");
                        }
                        Ok(code)
                    }
                    AuthorizationInput::Denied(message) => {
                        anyhow::bail!("Sign-in was denied: {message}")
                    }
                    AuthorizationInput::Empty => {
                        anyhow::bail!("Authorization code cannot be empty")
                    }
                }
            }
        }
    }
}

fn auth_result(token: CachedToken) -> AuthResult {
    AuthResult {
        account: token.account,
        access_token: token.access,
        expires_on: token.expires,
    }
}

impl IdentityProvider for MicrosoftIdentity {
    fn cached_account(&self) -> Result<Option<Account>> {
        self.store.latest_account()
    }

    async fn acquire_token_silent(&self, account: &Account, scopes: &[String]) -> Result<AuthResult> {
        let cached = self
            .store
            .get(&account.home_account_id)?
            .with_context(|| format!("No cached token for {}", account.username))?;

        if !cached.is_expired() {
            tracing::debug!(username = %account.username, "using cached access token");
            return Ok(auth_result(cached));
        }

        if cached.refresh.is_empty() {
            anyhow::bail!(
                "Access token for {} expired and no refresh token is cached",
                account.username
            );
        }

        tracing::debug!(username = %account.username, "refreshing access token");
        let tokens = self.oauth.refresh_token(&cached.refresh, scopes).await?;
        let refreshed = CachedToken {
            account: cached.account,
            access: tokens.access,
            refresh: tokens.refresh.unwrap_or(cached.refresh),
            expires: tokens.expires,
        };
        self.store.put(refreshed.clone())?;

        Ok(auth_result(refreshed))
    }

    async fn login_interactive(&self, scopes: &[String]) -> Result<AuthResult> {
        let pkce = oauth::generate_pkce();
        let state = uuid::Uuid::new_v4().to_string();
        let port = self.redirect_port.unwrap_or_else(oauth::random_local_port);
        let redirect_uri = oauth::build_redirect_uri(port);
        let auth_url = self
            .oauth
            .build_auth_url(&pkce, &state, &redirect_uri, scopes);

        self.prompt.show_authorization_url(&auth_url);

        let code = self.authorization_code(port, &state).await?;
        let tokens = self
            .oauth
            .exchange_code(&code, &pkce, &redirect_uri, scopes)
            .await?;
        let account = oauth::account_from_tokens(&tokens)?;

        let cached = CachedToken {
            account,
            access: tokens.access,
            refresh: tokens.refresh.unwrap_or_default(),
            expires: tokens.expires,
        };
        self.store.put(cached.clone())?;
        tracing::info!(username = %cached.account.username, "signed in");

        Ok(auth_result(cached))
    }

    fn remove_account(&self, account: &Account) -> Result<bool> {
        self.store.remove(&account.home_account_id)
    }
}
