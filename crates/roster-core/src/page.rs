//! Page state and controller.
//!
//! [`PageState`] is an immutable snapshot; every transition returns a new
//! one. [`Page`] owns the session controller and Graph client and publishes
//! each snapshot on a watch channel, so the idle → loading → settled sequence
//! can be observed without any rendering surface.

use tokio::sync::watch;

use crate::attendance::{AttendanceRow, FetchError, fetch_attendance, rows_from_records};
use crate::graph::GraphClient;
use crate::identity::IdentityProvider;
use crate::session::{Session, SessionController, SignInError};

/// Observable state of the fetch action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FetchState {
    #[default]
    Idle,
    Loading,
    /// Settled with a (possibly empty) list.
    Loaded(Vec<AttendanceRow>),
    /// Settled with a human-readable message.
    Failed(String),
}

/// Snapshot of everything the page shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageState {
    pub session: Session,
    pub join_url: String,
    pub fetch: FetchState,
    /// Provider message from the last failed interactive sign-in.
    pub sign_in_error: Option<String>,
}

impl PageState {
    #[must_use]
    pub fn with_session(&self, session: Session) -> Self {
        Self {
            session,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_join_url(&self, join_url: impl Into<String>) -> Self {
        Self {
            join_url: join_url.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_sign_in_error(&self, message: Option<String>) -> Self {
        Self {
            sign_in_error: message,
            ..self.clone()
        }
    }

    /// Enters `Loading`; any previous list stops being shown.
    #[must_use]
    pub fn begin_fetch(&self) -> Self {
        Self {
            fetch: FetchState::Loading,
            ..self.clone()
        }
    }

    /// Leaves `Loading` with a (possibly empty) list.
    #[must_use]
    pub fn settle_ok(&self, rows: Vec<AttendanceRow>) -> Self {
        Self {
            fetch: FetchState::Loaded(rows),
            ..self.clone()
        }
    }

    /// Leaves `Loading` with an error message and no list.
    #[must_use]
    pub fn settle_err(&self, message: impl Into<String>) -> Self {
        Self {
            fetch: FetchState::Failed(message.into()),
            ..self.clone()
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.fetch, FetchState::Loading)
    }

    /// Whether the fetch action is enabled (non-empty join URL).
    pub fn can_fetch(&self) -> bool {
        !self.join_url.trim().is_empty()
    }

    /// Rows of the last successful fetch; empty in every other state.
    pub fn rows(&self) -> &[AttendanceRow] {
        match &self.fetch {
            FetchState::Loaded(rows) => rows,
            _ => &[],
        }
    }

    pub fn fetch_error(&self) -> Option<&str> {
        match &self.fetch {
            FetchState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// The single page controller: session plus attendance fetch.
pub struct Page<I> {
    controller: SessionController<I>,
    graph: GraphClient,
    state: watch::Sender<PageState>,
}

impl<I: IdentityProvider> Page<I> {
    pub fn new(controller: SessionController<I>, graph: GraphClient) -> Self {
        Self {
            controller,
            graph,
            state: watch::Sender::new(PageState::default()),
        }
    }

    /// Returns a receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PageState> {
        self.state.subscribe()
    }

    /// Returns the current snapshot.
    pub fn state(&self) -> PageState {
        self.state.borrow().clone()
    }

    pub fn controller(&self) -> &SessionController<I> {
        &self.controller
    }

    fn publish(&self, next: PageState) {
        self.state.send_replace(next);
    }

    /// Restores any cached session (failures are logged, not surfaced).
    pub async fn initialize(&mut self) {
        self.controller.initialize().await;
        let next = self.state().with_session(self.controller.session().clone());
        self.publish(next);
    }

    /// Runs the interactive sign-in.
    ///
    /// # Errors
    /// Returns the sign-in failure after publishing its message.
    pub async fn sign_in(&mut self) -> Result<Session, SignInError> {
        match self.controller.sign_in().await {
            Ok(session) => {
                let session = session.clone();
                let next = self
                    .state()
                    .with_session(session.clone())
                    .with_sign_in_error(None);
                self.publish(next);
                Ok(session)
            }
            Err(err) => {
                let next = self
                    .state()
                    .with_sign_in_error(Some(format!("{:#}", err.0)));
                self.publish(next);
                Err(err)
            }
        }
    }

    /// Signs out and clears the session snapshot.
    ///
    /// # Errors
    /// Returns an error if the identity provider cannot update its cache.
    pub fn sign_out(&mut self) -> anyhow::Result<bool> {
        let removed = self.controller.sign_out()?;
        let next = PageState {
            join_url: self.state().join_url,
            ..PageState::default()
        };
        self.publish(next);
        Ok(removed)
    }

    pub fn set_join_url(&mut self, join_url: impl Into<String>) {
        let next = self.state().with_join_url(join_url);
        self.publish(next);
    }

    /// Fetches attendance for the current join URL.
    ///
    /// Publishes `Loading`, then exactly one settled state. A failure never
    /// leaves a previous list visible.
    ///
    /// # Errors
    /// Returns the [`FetchError`] that ended the chain.
    pub async fn fetch(&mut self) -> Result<Vec<AttendanceRow>, FetchError> {
        // TODO: a second fetch started while one is in flight is not rejected;
        // decide whether to guard or cancel the earlier one.
        let started = self.state().begin_fetch();
        let join_url = started.join_url.clone();
        self.publish(started);

        let outcome = fetch_attendance(&self.graph, self.controller.session(), &join_url)
            .await
            .map(|records| rows_from_records(&records));

        let current = self.state();
        let settled = match &outcome {
            Ok(rows) => current.settle_ok(rows.clone()),
            Err(err) => current.settle_err(err.to_string()),
        };
        self.publish(settled);

        if let Err(err) = &outcome {
            tracing::debug!(error = %err, "attendance fetch failed");
        }
        outcome
    }
}
