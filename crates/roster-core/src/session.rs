//! Session controller.
//!
//! Holds a read snapshot of the signed-in account and its access token.
//! The identity provider owns the underlying token cache.

use crate::identity::{Account, IdentityProvider};

/// Read-only view of the current sign-in state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub account: Option<Account>,
    pub access_token: Option<String>,
}

impl Session {
    /// Returns the account username, if signed in.
    pub fn username(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.username.as_str())
    }

    /// True when both an account and a non-empty token are present.
    pub fn is_ready(&self) -> bool {
        self.account.is_some() && self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Interactive sign-in failure, carrying the provider's message verbatim.
#[derive(Debug)]
pub struct SignInError(pub anyhow::Error);

impl std::fmt::Display for SignInError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sign-in failed: {:#}", self.0)
    }
}

impl std::error::Error for SignInError {}

/// Drives sign-in against an [`IdentityProvider`] for a fixed set of scopes.
pub struct SessionController<I> {
    identity: I,
    scopes: Vec<String>,
    session: Session,
}

impl<I: IdentityProvider> SessionController<I> {
    pub fn new(identity: I, scopes: Vec<String>) -> Self {
        Self {
            identity,
            scopes,
            session: Session::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    /// Restores a cached account and tries to get a token silently.
    ///
    /// Never fails: a missing account leaves the session empty, and a failed
    /// silent acquisition leaves the account set with no token.
    pub async fn initialize(&mut self) {
        let account = match self.identity.cached_account() {
            Ok(Some(account)) => account,
            Ok(None) => {
                tracing::debug!("no cached account");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "could not read cached account");
                return;
            }
        };

        self.session.account = Some(account.clone());
        match self
            .identity
            .acquire_token_silent(&account, &self.scopes)
            .await
        {
            Ok(result) => {
                self.session.access_token = Some(result.access_token);
            }
            Err(err) => {
                tracing::warn!(
                    username = %account.username,
                    error = %format!("{err:#}"),
                    "silent token acquisition failed"
                );
            }
        }
    }

    /// Runs the interactive sign-in, then requests a token for the fixed scopes.
    ///
    /// # Errors
    /// Returns [`SignInError`] if the interactive flow fails. The session is
    /// left unchanged in that case.
    pub async fn sign_in(&mut self) -> Result<&Session, SignInError> {
        let login = self
            .identity
            .login_interactive(&self.scopes)
            .await
            .map_err(SignInError)?;

        let account = login.account;
        let token = match self
            .identity
            .acquire_token_silent(&account, &self.scopes)
            .await
        {
            Ok(result) => result.access_token,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "token request after sign-in failed");
                login.access_token
            }
        };

        self.session = Session {
            account: Some(account),
            access_token: Some(token),
        };
        Ok(&self.session)
    }

    /// Forgets the current (or cached) account. Returns whether one existed.
    ///
    /// # Errors
    /// Returns an error if the identity provider cannot update its cache.
    pub fn sign_out(&mut self) -> anyhow::Result<bool> {
        let account = match self.session.account.clone() {
            Some(account) => Some(account),
            None => self.identity.cached_account()?,
        };
        self.session = Session::default();

        match account {
            Some(account) => self.identity.remove_account(&account),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;

    use super::*;
    use crate::identity::AuthResult;

    /// In-memory identity provider with scripted outcomes.
    #[derive(Default)]
    pub(crate) struct FakeIdentity {
        pub cached: Mutex<Option<Account>>,
        pub silent_token: Option<String>,
        pub interactive: Option<Account>,
        pub silent_calls: AtomicUsize,
    }

    pub(crate) fn alice() -> Account {
        Account {
            username: "alice@contoso.com".to_string(),
            home_account_id: "oid-1.tid-1".to_string(),
            tenant_id: Some("tid-1".to_string()),
        }
    }

    impl IdentityProvider for FakeIdentity {
        fn cached_account(&self) -> Result<Option<Account>> {
            Ok(self.cached.lock().unwrap().clone())
        }

        async fn acquire_token_silent(&self, account: &Account, _scopes: &[String]) -> Result<AuthResult> {
            self.silent_calls.fetch_add(1, Ordering::SeqCst);
            match &self.silent_token {
                Some(token) => Ok(AuthResult {
                    account: account.clone(),
                    access_token: token.clone(),
                    expires_on: u64::MAX,
                }),
                None => anyhow::bail!("interaction_required: AADSTS50058"),
            }
        }

        async fn login_interactive(&self, _scopes: &[String]) -> Result<AuthResult> {
            match &self.interactive {
                Some(account) => {
                    *self.cached.lock().unwrap() = Some(account.clone());
                    Ok(AuthResult {
                        account: account.clone(),
                        access_token: "interactive-token".to_string(),
                        expires_on: u64::MAX,
                    })
                }
                None => anyhow::bail!("user_cancelled: User closed the popup window"),
            }
        }

        fn remove_account(&self, account: &Account) -> Result<bool> {
            let mut cached = self.cached.lock().unwrap();
            if cached.as_ref() == Some(account) {
                *cached = None;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    fn scopes() -> Vec<String> {
        vec!["OnlineMeetingArtifact.Read.All".to_string()]
    }

    #[tokio::test]
    async fn test_initialize_without_cached_account() {
        let mut controller = SessionController::new(FakeIdentity::default(), scopes());
        controller.initialize().await;

        assert_eq!(controller.session(), &Session::default());
        assert_eq!(controller.identity().silent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initialize_restores_account_and_token() {
        let identity = FakeIdentity {
            cached: Mutex::new(Some(alice())),
            silent_token: Some("silent-token".to_string()),
            ..FakeIdentity::default()
        };
        let mut controller = SessionController::new(identity, scopes());
        controller.initialize().await;

        assert_eq!(controller.session().username(), Some("alice@contoso.com"));
        assert_eq!(
            controller.session().access_token.as_deref(),
            Some("silent-token")
        );
        assert!(controller.session().is_ready());
    }

    #[tokio::test]
    async fn test_initialize_silent_failure_keeps_account_without_token() {
        let identity = FakeIdentity {
            cached: Mutex::new(Some(alice())),
            ..FakeIdentity::default()
        };
        let mut controller = SessionController::new(identity, scopes());
        controller.initialize().await;

        assert_eq!(controller.session().account, Some(alice()));
        assert_eq!(controller.session().access_token, None);
        assert!(!controller.session().is_ready());
    }

    #[tokio::test]
    async fn test_sign_in_stores_account_and_requests_token() {
        let identity = FakeIdentity {
            interactive: Some(alice()),
            silent_token: Some("silent-token".to_string()),
            ..FakeIdentity::default()
        };
        let mut controller = SessionController::new(identity, scopes());

        let session = controller.sign_in().await.unwrap();
        assert_eq!(session.username(), Some("alice@contoso.com"));
        assert_eq!(session.access_token.as_deref(), Some("silent-token"));
        assert_eq!(controller.identity().silent_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sign_in_falls_back_to_interactive_token() {
        let identity = FakeIdentity {
            interactive: Some(alice()),
            ..FakeIdentity::default()
        };
        let mut controller = SessionController::new(identity, scopes());

        let session = controller.sign_in().await.unwrap();
        assert_eq!(session.access_token.as_deref(), Some("interactive-token"));
    }

    #[tokio::test]
    async fn test_sign_in_failure_surfaces_provider_message() {
        let mut controller = SessionController::new(FakeIdentity::default(), scopes());

        let err = controller.sign_in().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Sign-in failed: user_cancelled: User closed the popup window"
        );
        assert_eq!(controller.session(), &Session::default());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session_and_cache() {
        let identity = FakeIdentity {
            cached: Mutex::new(Some(alice())),
            silent_token: Some("silent-token".to_string()),
            ..FakeIdentity::default()
        };
        let mut controller = SessionController::new(identity, scopes());
        controller.initialize().await;

        assert!(controller.sign_out().unwrap());
        assert_eq!(controller.session(), &Session::default());
        assert!(!controller.sign_out().unwrap());
    }
}
