//! Persistent token cache.
//!
//! Stores tokens in `<base>/token_cache.json` with restricted permissions (0600),
//! keyed by home account id.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::Account;
use super::oauth::now_millis_u64;

/// Tokens cached for one signed-in account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    pub account: Account,
    /// The access token (short-lived)
    pub access: String,
    /// The refresh token (long-lived); empty if the provider issued none
    #[serde(default)]
    pub refresh: String,
    /// Expiry timestamp in milliseconds since epoch
    pub expires: u64,
}

impl CachedToken {
    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        now_millis_u64() >= self.expires
    }
}

/// Token cache file contents.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TokenCache {
    /// Home account id -> cached tokens.
    #[serde(flatten)]
    pub accounts: BTreeMap<String, CachedToken>,
}

/// A token cache bound to a file on disk.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the cache from disk.
    /// Returns an empty cache if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<TokenCache> {
        if !self.path.exists() {
            return Ok(TokenCache::default());
        }

        let contents = fs::read_to_string(&self.path).with_context(|| {
            format!("Failed to read token cache from {}", self.path.display())
        })?;

        serde_json::from_str(&contents).with_context(|| {
            format!("Failed to parse token cache from {}", self.path.display())
        })
    }

    /// Saves the cache to disk with restricted permissions (0600).
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, cache: &TokenCache) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents =
            serde_json::to_string_pretty(cache).context("Failed to serialize token cache")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .with_context(|| format!("Failed to open {} for writing", self.path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, contents)
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        Ok(())
    }

    /// Returns the account whose token was issued last, if any.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be loaded.
    pub fn latest_account(&self) -> Result<Option<Account>> {
        let cache = self.load()?;
        Ok(cache
            .accounts
            .values()
            .max_by_key(|t| t.expires)
            .map(|t| t.account.clone()))
    }

    /// Gets the cached tokens for an account.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be loaded.
    pub fn get(&self, home_account_id: &str) -> Result<Option<CachedToken>> {
        Ok(self.load()?.accounts.get(home_account_id).cloned())
    }

    /// Inserts or replaces the tokens for an account.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be loaded or saved.
    pub fn put(&self, token: CachedToken) -> Result<()> {
        let mut cache = self.load()?;
        cache
            .accounts
            .insert(token.account.home_account_id.clone(), token);
        self.save(&cache)
    }

    /// Removes the tokens for an account. Returns whether anything was removed.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be loaded or saved.
    pub fn remove(&self, home_account_id: &str) -> Result<bool> {
        let mut cache = self.load()?;
        let had_entry = cache.accounts.remove(home_account_id).is_some();
        if had_entry {
            self.save(&cache)?;
        }
        Ok(had_entry)
    }
}
