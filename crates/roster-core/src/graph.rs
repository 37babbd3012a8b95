//! Microsoft Graph client for online meetings and attendance reports.
//!
//! Read-only, bearer-authenticated GETs. Every collection response is a JSON
//! object with a `value` array.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Standard User-Agent header for roster API requests.
pub const USER_AGENT: &str = concat!("roster/", env!("CARGO_PKG_VERSION"));

/// Builds the shared HTTP client used for Graph and token requests.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}

/// An online meeting resource (subset of fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMeeting {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub join_web_url: Option<String>,
}

/// A meeting attendance report (subset of fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReport {
    pub id: String,
    #[serde(default)]
    pub total_participant_count: Option<u32>,
    #[serde(default)]
    pub meeting_start_date_time: Option<String>,
    #[serde(default)]
    pub meeting_end_date_time: Option<String>,
}

/// Identity of an attendee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordIdentity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// One attendee's entry in an attendance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(default)]
    pub identity: Option<RecordIdentity>,
    #[serde(default)]
    pub total_attendance_in_seconds: Option<f64>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

/// Category of a failed Graph request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Non-success HTTP status
    HttpStatus,
    /// Connection or request timeout
    Timeout,
    /// Connection failure before a response arrived
    Network,
    /// Response body was not the expected JSON
    Parse,
}

/// Error from a Graph request, carrying a one-line display message.
#[derive(Debug, Clone)]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub message: String,
    /// HTTP status, when the server answered
    pub status: Option<u16>,
}

impl GraphError {
    /// Creates an HTTP status error, preferring the Graph `error.message`.
    pub fn http_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|json| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(ToString::to_string)
            });
        let message = match detail {
            Some(msg) if !msg.is_empty() => format!("HTTP {status}: {msg}"),
            _ => format!("HTTP {status}"),
        };
        Self {
            kind: GraphErrorKind::HttpStatus,
            message,
            status: Some(status),
        }
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            GraphErrorKind::Timeout
        } else if err.is_decode() {
            GraphErrorKind::Parse
        } else {
            GraphErrorKind::Network
        };
        Self {
            kind,
            message: format!("Request to Microsoft Graph failed: {err}"),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GraphError {}

/// Result type for Graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Percent-encodes a value the way `encodeURIComponent` would for our inputs.
fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Microsoft Graph API client.
#[derive(Debug, Clone)]
pub struct GraphClient {
    base_url: String,
    http: reqwest::Client,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// Creates a client from configuration.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config.effective_graph_base_url()?;
        let http = build_http_client(config.request_timeout())?;
        Ok(Self::new(base_url, http))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Looks up the signed-in user's meetings whose join URL equals `join_url`.
    ///
    /// # Errors
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn find_meetings_by_join_url(
        &self,
        token: &str,
        join_url: &str,
    ) -> GraphResult<Vec<OnlineMeeting>> {
        // OData string literals escape a quote by doubling it.
        let literal = join_url.replace('\'', "''");
        let filter = encode_component(&format!("JoinWebUrl eq '{literal}'"));
        let url = format!("{}/me/onlineMeetings?$filter={filter}", self.base_url);
        self.get_collection(token, &url).await
    }

    /// Lists the attendance reports of a meeting.
    ///
    /// # Errors
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn list_attendance_reports(
        &self,
        token: &str,
        meeting_id: &str,
    ) -> GraphResult<Vec<AttendanceReport>> {
        let url = format!(
            "{}/me/onlineMeetings/{}/attendanceReports",
            self.base_url,
            encode_component(meeting_id)
        );
        self.get_collection(token, &url).await
    }

    /// Lists the attendance records of one report.
    ///
    /// # Errors
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn list_attendance_records(
        &self,
        token: &str,
        meeting_id: &str,
        report_id: &str,
    ) -> GraphResult<Vec<AttendanceRecord>> {
        let url = format!(
            "{}/me/onlineMeetings/{}/attendanceReports/{}/attendanceRecords",
            self.base_url,
            encode_component(meeting_id),
            encode_component(report_id)
        );
        self.get_collection(token, &url).await
    }

    async fn get_collection<T: DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
    ) -> GraphResult<Vec<T>> {
        tracing::debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| GraphError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), "Graph request failed");
            return Err(GraphError::http_status(status.as_u16(), &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GraphError::from_reqwest(&e))?;
        let collection: Collection<T> = serde_json::from_slice(&bytes).map_err(|e| GraphError {
            kind: GraphErrorKind::Parse,
            message: format!("Unexpected response from Microsoft Graph: {e}"),
            status: Some(status.as_u16()),
        })?;
        Ok(collection.value)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const JOIN_URL: &str = "https://teams.microsoft.com/l/meetup-join/19%3ameeting_abc%40thread.v2/0?context=%7b%22Tid%22%3a%22t%22%7d";

    #[test]
    fn test_encode_component_matches_uri_component_encoding() {
        assert_eq!(encode_component("a b"), "a%20b");
        assert_eq!(encode_component("a+b"), "a%2Bb");
        assert_eq!(encode_component("x/y?z=1"), "x%2Fy%3Fz%3D1");
    }

    #[test]
    fn test_http_status_error_uses_graph_message() {
        let body = r#"{"error":{"code":"InvalidAuthenticationToken","message":"Lifetime validation failed, the token is expired."}}"#;
        let err = GraphError::http_status(401, body);
        assert_eq!(err.kind, GraphErrorKind::HttpStatus);
        assert_eq!(err.status, Some(401));
        assert_eq!(
            err.to_string(),
            "HTTP 401: Lifetime validation failed, the token is expired."
        );

        assert_eq!(GraphError::http_status(503, "").to_string(), "HTTP 503");
    }

    #[test]
    fn test_record_deserializes_with_missing_fields() {
        let record: AttendanceRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record.identity, None);
        assert_eq!(record.total_attendance_in_seconds, None);

        let record: AttendanceRecord = serde_json::from_str(
            r#"{"emailAddress":"a@b.c","totalAttendanceInSeconds":125,"role":"Organizer","identity":{"id":"1","displayName":"Alice"}}"#,
        )
        .unwrap();
        assert_eq!(record.total_attendance_in_seconds, Some(125.0));
        assert_eq!(
            record.identity.unwrap().display_name.as_deref(),
            Some("Alice")
        );
    }

    #[tokio::test]
    async fn test_find_meetings_sends_filter_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/onlineMeetings"))
            .and(query_param("$filter", format!("JoinWebUrl eq '{JOIN_URL}'")))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"id": "meeting-1", "subject": "Standup", "joinWebUrl": JOIN_URL}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GraphClient::new(server.uri(), reqwest::Client::new());
        let meetings = client
            .find_meetings_by_join_url("token-1", JOIN_URL)
            .await
            .unwrap();

        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].id, "meeting-1");
        assert_eq!(meetings[0].subject.as_deref(), Some("Standup"));
    }

    #[tokio::test]
    async fn test_list_records_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/me/onlineMeetings/meeting-1/attendanceReports/report-1/attendanceRecords",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"identity": {"displayName": "Bob"}, "totalAttendanceInSeconds": 60}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GraphClient::new(format!("{}/", server.uri()), reqwest::Client::new());
        let records = client
            .list_attendance_records("t", "meeting-1", "report-1")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/onlineMeetings/m/attendanceReports"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        let client = GraphClient::new(server.uri(), reqwest::Client::new());
        let err = client.list_attendance_reports("t", "m").await.unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"value": []}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let http = build_http_client(Some(Duration::from_millis(100))).unwrap();
        let client = GraphClient::new(server.uri(), http);
        let err = client.list_attendance_reports("t", "m").await.unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::Timeout);
    }
}
