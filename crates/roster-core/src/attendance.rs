//! Resolves a meeting join URL into its attendance list.
//!
//! Three dependent Graph lookups run strictly in sequence: meeting by join
//! URL, then its attendance reports, then the records of the first report.
//! Any failing step aborts the chain; nothing is retried.

use std::fmt;

use serde::Serialize;

use crate::graph::{AttendanceRecord, GraphClient, GraphError};
use crate::session::Session;

/// Display name used when a record carries no identity.
pub const UNKNOWN_ATTENDEE: &str = "Unknown";

/// Why an attendance fetch did not produce a list.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// No account or no access token in the session.
    NotSignedIn,
    /// The join URL input is blank.
    EmptyJoinUrl,
    /// No meeting of the signed-in user has this join URL.
    MeetingNotFound,
    /// The meeting exists but has no attendance report yet.
    NoReports,
    /// A Graph request failed.
    Graph(GraphError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NotSignedIn => write!(f, "Please sign in first."),
            FetchError::EmptyJoinUrl => write!(f, "Enter a meeting join URL."),
            FetchError::MeetingNotFound => write!(f, "Meeting not found."),
            FetchError::NoReports => write!(f, "No attendance reports found."),
            FetchError::Graph(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Graph(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphError> for FetchError {
    fn from(err: GraphError) -> Self {
        FetchError::Graph(err)
    }
}

/// One rendered line of the attendance list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRow {
    pub name: String,
    pub minutes: u64,
}

impl AttendanceRow {
    pub fn from_record(record: &AttendanceRecord) -> Self {
        let name = record
            .identity
            .as_ref()
            .and_then(|identity| identity.display_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(UNKNOWN_ATTENDEE)
            .to_string();

        Self {
            name,
            minutes: seconds_to_minutes(record.total_attendance_in_seconds.unwrap_or(0.0)),
        }
    }
}

impl fmt::Display for AttendanceRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} — {} min", self.name, self.minutes)
    }
}

/// Whole minutes, rounded half away from zero. Negative or NaN input is 0.
pub fn seconds_to_minutes(seconds: f64) -> u64 {
    if seconds.is_nan() || seconds <= 0.0 {
        return 0;
    }
    (seconds / 60.0).round() as u64
}

/// Converts raw records into display rows, preserving order.
pub fn rows_from_records(records: &[AttendanceRecord]) -> Vec<AttendanceRow> {
    records.iter().map(AttendanceRow::from_record).collect()
}

/// Fetches the attendance records of the meeting behind `join_url`.
///
/// Only the first matching meeting and its first report are used.
///
/// # Errors
/// Returns [`FetchError::NotSignedIn`] without touching the network when the
/// session lacks an account or token, and the step-specific variant when a
/// lookup comes back empty or fails.
pub async fn fetch_attendance(
    graph: &GraphClient,
    session: &Session,
    join_url: &str,
) -> Result<Vec<AttendanceRecord>, FetchError> {
    let token = match (&session.account, session.access_token.as_deref()) {
        (Some(_), Some(token)) if !token.is_empty() => token,
        _ => return Err(FetchError::NotSignedIn),
    };

    let join_url = join_url.trim();
    if join_url.is_empty() {
        return Err(FetchError::EmptyJoinUrl);
    }

    let meetings = graph.find_meetings_by_join_url(token, join_url).await?;
    let meeting = meetings.first().ok_or(FetchError::MeetingNotFound)?;
    if meetings.len() > 1 {
        tracing::debug!(count = meetings.len(), "multiple meetings matched; using the first");
    }

    let reports = graph.list_attendance_reports(token, &meeting.id).await?;
    let report = reports.first().ok_or(FetchError::NoReports)?;
    tracing::debug!(meeting_id = %meeting.id, report_id = %report.id, "resolved attendance report");

    let records = graph
        .list_attendance_records(token, &meeting.id, &report.id)
        .await?;
    tracing::info!(count = records.len(), "fetched attendance records");

    Ok(records)
}
