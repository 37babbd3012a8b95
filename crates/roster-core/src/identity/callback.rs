//! Loopback listener for the OAuth redirect.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::{Duration, Instant};

use super::oauth::{AuthorizationInput, authorization_from_pairs};

/// How long to wait for the browser to hit the redirect URI.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of waiting on the loopback redirect.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code(String),
    /// The provider redirected back with an error.
    Denied(String),
    /// No usable redirect arrived (bind failure, timeout, state mismatch).
    Unavailable,
}

/// Waits for the authorization redirect on `127.0.0.1:<port>`.
///
/// Runs the blocking accept loop on the blocking thread pool.
pub async fn wait_for_code(port: u16, expected_state: String, timeout: Duration) -> CallbackOutcome {
    tokio::task::spawn_blocking(move || accept_redirect(port, &expected_state, timeout))
        .await
        .unwrap_or(CallbackOutcome::Unavailable)
}

fn accept_redirect(port: u16, expected_state: &str, timeout: Duration) -> CallbackOutcome {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::debug!(port, error = %err, "could not bind OAuth callback listener");
            return CallbackOutcome::Unavailable;
        }
    };
    if listener.set_nonblocking(true).is_err() {
        return CallbackOutcome::Unavailable;
    }

    let start = Instant::now();
    loop {
        match listener.accept() {
            Ok((mut stream, _)) => {
                let _ = stream.set_nonblocking(false);
                // An idle connection must not outlive the overall deadline.
                let remaining = timeout
                    .saturating_sub(start.elapsed())
                    .max(Duration::from_millis(10));
                if stream.set_read_timeout(Some(remaining)).is_err() {
                    continue;
                }
                let mut buffer = [0u8; 4096];
                let read = stream.read(&mut buffer).unwrap_or(0);
                let request = String::from_utf8_lossy(&buffer[..read]);
                let outcome = outcome_from_request(&request, expected_state);
                let response = match outcome {
                    CallbackOutcome::Code(_) => success_response(),
                    _ => error_response(),
                };
                let _ = stream.write_all(response.as_bytes());
                // Favicon and other stray requests carry no code; keep waiting.
                if outcome == CallbackOutcome::Unavailable && start.elapsed() < timeout {
                    continue;
                }
                return outcome;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() > timeout {
                    return CallbackOutcome::Unavailable;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(_) => return CallbackOutcome::Unavailable,
        }
    }
}

fn outcome_from_request(request: &str, expected_state: &str) -> CallbackOutcome {
    let Some(target) = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
    else {
        return CallbackOutcome::Unavailable;
    };

    let Ok(url) = url::Url::parse(&format!("http://localhost{target}")) else {
        return CallbackOutcome::Unavailable;
    };
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    match authorization_from_pairs(&pairs) {
        AuthorizationInput::Code { code, state } if state.as_deref() == Some(expected_state) => {
            CallbackOutcome::Code(code)
        }
        AuthorizationInput::Denied(message) => CallbackOutcome::Denied(message),
        _ => CallbackOutcome::Unavailable,
    }
}

fn success_response() -> String {
    let body = "<html><body><h3>Sign-in complete</h3><p>You can close this window.</p></body></html>";
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn error_response() -> String {
    let body = "<html><body><h3>Sign-in failed</h3><p>Please return to the terminal.</p></body></html>";
    format!(
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_with_matching_state_yields_code() {
        let request = "GET /?code=abc&state=s1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(
            outcome_from_request(request, "s1"),
            CallbackOutcome::Code("abc".to_string())
        );
    }

    #[test]
    fn test_request_with_wrong_state_is_ignored() {
        let request = "GET /?code=abc&state=other HTTP/1.1\r\n\r\n";
        assert_eq!(outcome_from_request(request, "s1"), CallbackOutcome::Unavailable);
    }

    #[test]
    fn test_request_with_error_is_denied() {
        let request =
            "GET /?error=access_denied&error_description=The+user+cancelled HTTP/1.1\r\n\r\n";
        assert_eq!(
            outcome_from_request(request, "s1"),
            CallbackOutcome::Denied("The user cancelled".to_string())
        );
    }

    #[test]
    fn test_favicon_request_is_ignored() {
        let request = "GET /favicon.ico HTTP/1.1\r\n\r\n";
        assert_eq!(outcome_from_request(request, "s1"), CallbackOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_wait_for_code_receives_redirect() {
        let port = crate::identity::oauth::random_local_port();
        let waiter = tokio::spawn(wait_for_code(
            port,
            "s1".to_string(),
            Duration::from_secs(10),
        ));

        // Give the listener a moment to bind, then play the browser.
        let mut stream = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Ok(s) = std::net::TcpStream::connect(("127.0.0.1", port)) {
                stream = Some(s);
                break;
            }
        }
        let mut stream = stream.expect("listener never came up");
        stream
            .write_all(b"GET /?code=xyz&state=s1 HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        assert_eq!(waiter.await.unwrap(), CallbackOutcome::Code("xyz".to_string()));
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_outlive_timeout() {
        let port = crate::identity::oauth::random_local_port();
        let waiter = tokio::spawn(wait_for_code(
            port,
            "s1".to_string(),
            Duration::from_secs(1),
        ));

        // Connect and never send a request line.
        let mut idle = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Ok(s) = std::net::TcpStream::connect(("127.0.0.1", port)) {
                idle = Some(s);
                break;
            }
        }
        let _idle = idle.expect("listener never came up");

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait_for_code kept waiting on an idle connection")
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Unavailable);
    }
}
