//! OAuth2 authorization code + PKCE helpers for the Microsoft identity platform.
//!
//! Covers the authorize URL, code exchange and refresh against the v2.0 token
//! endpoint, and decoding of the account identity from the returned tokens.
//! Tokens are never logged or displayed in full.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::Account;

/// Scopes always requested next to the configured resource scopes.
///
/// `offline_access` yields a refresh token; `openid profile` yields an
/// `id_token` carrying the username.
pub const OIDC_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Access tokens are treated as expired this long before their real expiry.
const EXPIRY_SKEW_MILLIS: u64 = 5 * 60 * 1000;

pub(crate) fn now_millis_u64() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(u64::MAX)
}

fn compute_expires_at(expires_in_secs: u64) -> u64 {
    let now = now_millis_u64();
    now.saturating_add(
        expires_in_secs
            .saturating_mul(1000)
            .saturating_sub(EXPIRY_SKEW_MILLIS),
    )
}

/// PKCE code verifier and challenge
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

/// Generate PKCE code verifier and challenge
pub fn generate_pkce() -> Pkce {
    // Use two UUIDs (16 bytes each) to get 32 random bytes
    let uuid1 = uuid::Uuid::new_v4();
    let uuid2 = uuid::Uuid::new_v4();
    let mut verifier_bytes = [0u8; 32];
    verifier_bytes[..16].copy_from_slice(uuid1.as_bytes());
    verifier_bytes[16..].copy_from_slice(uuid2.as_bytes());
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    Pkce {
        challenge: challenge_for(&verifier),
        verifier,
    }
}

fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Joins configured scopes with the OIDC scopes, without duplicates.
pub fn scope_string(scopes: &[String]) -> String {
    let mut all: Vec<&str> = scopes.iter().map(String::as_str).collect();
    for extra in OIDC_SCOPES {
        if !all.iter().any(|s| s.eq_ignore_ascii_case(extra)) {
            all.push(extra);
        }
    }
    all.join(" ")
}

/// Builds the redirect URI for a given localhost port.
pub fn build_redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Generates a random high localhost port for OAuth callbacks.
pub fn random_local_port() -> u16 {
    let id = uuid::Uuid::new_v4();
    let bytes = id.as_bytes();
    let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
    49152 + (raw % 16384)
}

/// Endpoints and client identity for one authority.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    authorize_url: String,
    token_url: String,
}

impl OAuthClient {
    /// Creates a client for the tenant-qualified `authority`
    /// (e.g. `https://login.microsoftonline.com/contoso`).
    pub fn new(http: reqwest::Client, client_id: String, authority: &str) -> Self {
        let authority = authority.trim_end_matches('/');
        Self {
            http,
            client_id,
            authorize_url: format!("{authority}/oauth2/v2.0/authorize"),
            token_url: format!("{authority}/oauth2/v2.0/token"),
        }
    }

    /// Build the authorization URL for the interactive sign-in.
    pub fn build_auth_url(
        &self,
        pkce: &Pkce,
        state: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> String {
        let scope = scope_string(scopes);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
            ("response_mode", "query"),
            ("scope", scope.as_str()),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("state", state),
            ("prompt", "select_account"),
        ];

        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        format!("{}?{query}", self.authorize_url)
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    /// Returns an error if the request fails or the endpoint rejects the code.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce: &Pkce,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<TokenSet> {
        let scope = scope_string(scopes);
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("client_id", &self.client_id)
            .append_pair("code", code)
            .append_pair("code_verifier", &pkce.verifier)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &scope)
            .finish();

        self.post_token(body, "Token exchange").await
    }

    /// Refreshes an expired access token.
    ///
    /// # Errors
    /// Returns an error if the request fails or the refresh token is rejected.
    pub async fn refresh_token(&self, refresh_token: &str, scopes: &[String]) -> Result<TokenSet> {
        let scope = scope_string(scopes);
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("client_id", &self.client_id)
            .append_pair("refresh_token", refresh_token)
            .append_pair("scope", &scope)
            .finish();

        self.post_token(body, "Token refresh").await
    }

    async fn post_token(&self, body: String, what: &str) -> Result<TokenSet> {
        let response = self
            .http
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what.to_lowercase()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "{what} failed (HTTP {}): {}",
                status.as_u16(),
                token_error_message(&body)
            );
        }

        let token_data: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        Ok(TokenSet {
            access: token_data.access_token,
            refresh: token_data.refresh_token,
            id_token: token_data.id_token,
            expires: compute_expires_at(token_data.expires_in),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: u64,
}

/// Tokens returned by a successful exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access: String,
    pub refresh: Option<String>,
    pub id_token: Option<String>,
    /// Expiry timestamp in milliseconds since epoch (already skewed)
    pub expires: u64,
}

/// Extracts `error_description` (or `error`) from an OAuth error body.
fn token_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        error_description: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error_description: Some(description),
            ..
        }) => description,
        Ok(ErrorBody {
            error: Some(error), ..
        }) => error,
        _ => body.to_string(),
    }
}

/// Identity claims read from an `id_token` or access token.
#[derive(Debug, Default, Deserialize)]
struct IdentityClaims {
    oid: Option<String>,
    tid: Option<String>,
    sub: Option<String>,
    preferred_username: Option<String>,
    upn: Option<String>,
    unique_name: Option<String>,
    name: Option<String>,
}

fn decode_claims(token: &str) -> Option<IdentityClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')).ok()?;
    serde_json::from_slice(&decoded).ok()
}

/// Derives the signed-in account from a token set.
///
/// Prefers the `id_token`, falling back to the access token claims.
///
/// # Errors
/// Returns an error if neither token carries an object id.
pub fn account_from_tokens(tokens: &TokenSet) -> Result<Account> {
    let claims = tokens
        .id_token
        .as_deref()
        .and_then(decode_claims)
        .or_else(|| decode_claims(&tokens.access))
        .context("Token response did not contain a readable id_token")?;

    let object_id = claims
        .oid
        .or(claims.sub)
        .context("Token is missing the object id claim")?;
    let home_account_id = match claims.tid.as_deref() {
        Some(tid) => format!("{object_id}.{tid}"),
        None => object_id,
    };
    let username = claims
        .preferred_username
        .or(claims.upn)
        .or(claims.unique_name)
        .or(claims.name)
        .unwrap_or_else(|| home_account_id.clone());

    Ok(Account {
        username,
        home_account_id,
        tenant_id: claims.tid,
    })
}

/// Outcome of parsing a pasted authorization response.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthorizationInput {
    Code {
        code: String,
        state: Option<String>,
    },
    /// The provider redirected with `error` / `error_description`.
    Denied(String),
    Empty,
}

/// Parses a pasted authorization input (redirect URL, query string or bare code).
pub fn parse_authorization_input(input: &str) -> AuthorizationInput {
    let value = input.trim();
    if value.is_empty() {
        return AuthorizationInput::Empty;
    }

    let pairs: Vec<(String, String)> = if let Ok(url) = url::Url::parse(value) {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    } else if value.contains("code=") || value.contains("error=") {
        url::form_urlencoded::parse(value.trim_start_matches('?').as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    } else {
        return AuthorizationInput::Code {
            code: value.to_string(),
            state: None,
        };
    };

    authorization_from_pairs(&pairs)
}

pub(crate) fn authorization_from_pairs(pairs: &[(String, String)]) -> AuthorizationInput {
    let find = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };

    if let Some(error) = find("error") {
        return AuthorizationInput::Denied(find("error_description").unwrap_or(error));
    }

    match find("code") {
        Some(code) if !code.is_empty() => AuthorizationInput::Code {
            code,
            state: find("state"),
        },
        _ => AuthorizationInput::Empty,
    }
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.chars().count() <= 16 {
        return "***".to_string();
    }
    let prefix: String = token.chars().take(12).collect();
    format!("{prefix}...")
}
