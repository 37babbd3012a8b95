//! Identity provider abstraction and the Microsoft identity platform client.
//!
//! The session controller only talks to [`IdentityProvider`]; the on-disk
//! token cache, PKCE flow and refresh protocol stay behind it.

use std::future::Future;

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod callback;
mod microsoft;
pub mod oauth;

pub use microsoft::{LoginPrompt, MicrosoftIdentity};

/// A signed-in account as known to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Sign-in name (usually the UPN / email)
    pub username: String,
    /// Opaque account identifier (`<object id>.<tenant id>`)
    pub home_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Result of a successful token acquisition.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub account: Account,
    pub access_token: String,
    /// Expiry timestamp in milliseconds since epoch
    pub expires_on: u64,
}

/// The narrow identity capability the session controller depends on.
pub trait IdentityProvider {
    /// Returns a previously signed-in account from the provider's cache.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be read.
    fn cached_account(&self) -> anyhow::Result<Option<Account>>;

    /// Obtains an access token for `account` without user interaction.
    fn acquire_token_silent(
        &self,
        account: &Account,
        scopes: &[String],
    ) -> impl Future<Output = anyhow::Result<AuthResult>> + Send;

    /// Runs the interactive sign-in flow.
    fn login_interactive(
        &self,
        scopes: &[String],
    ) -> impl Future<Output = anyhow::Result<AuthResult>> + Send;

    /// Forgets `account`. Returns whether it was cached.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be updated.
    fn remove_account(&self, account: &Account) -> anyhow::Result<bool>;
}
