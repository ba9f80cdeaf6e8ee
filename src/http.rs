use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .build()
}

fn with_bearer(request: ureq::Request, bearer: Option<&str>) -> ureq::Request {
    match bearer {
        Some(token) => request.set("Authorization", &format!("Bearer {token}")),
        None => request,
    }
}

fn into_body(result: Result<ureq::Response, ureq::Error>) -> Result<String, StoreError> {
    match result {
        Ok(response) => response
            .into_string()
            .map_err(|err| StoreError::Decode(err.to_string())),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().ok().unwrap_or_default();
            Err(StoreError::status(status, &body))
        }
        Err(ureq::Error::Transport(err)) => Err(StoreError::Transport(err.to_string())),
    }
}

/// Single GET attempt; progress reads never retry.
pub(crate) fn get_text(
    url: &str,
    bearer: Option<&str>,
    query: &[(String, String)],
    timeout: Duration,
) -> Result<String, StoreError> {
    let mut request = with_bearer(build_agent(timeout).get(url), bearer);
    for (key, value) in query {
        request = request.query(key, value);
    }
    into_body(request.call())
}

pub(crate) fn get_text_with_retries(
    url: &str,
    bearer: Option<&str>,
    query: &[(String, String)],
    timeout: Duration,
    attempts: usize,
    retry_delay: Duration,
) -> Result<String, StoreError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match get_text(url, bearer, query, timeout) {
            Ok(body) => return Ok(body),
            Err(err) if err.is_retryable() && attempt < attempts => {
                debug!(url, attempt, attempts, error = %err, "retrying catalog request");
                thread::sleep(retry_delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Single POST attempt with a JSON body.
pub(crate) fn post_json(
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    timeout: Duration,
) -> Result<String, StoreError> {
    let request = with_bearer(build_agent(timeout).post(url), bearer)
        .set("Content-Type", "application/json");
    into_body(request.send_string(&body.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{Behavior, TestServer};

    const TIMEOUT: Duration = Duration::from_millis(200);
    const NO_DELAY: Duration = Duration::from_millis(1);

    #[test]
    fn catalog_read_rides_out_throttling() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(429, "slow down".to_string()),
            Behavior::Respond(502, "gateway".to_string()),
            Behavior::Respond(200, r#"[{"id": 1}]"#.to_string()),
        ]);
        let url = format!("{}/episodes/by_serie/3", server.base_url);

        let body = get_text_with_retries(&url, Some("tok"), &[], TIMEOUT, 3, NO_DELAY)
            .expect("third attempt should succeed");

        assert_eq!(body, r#"[{"id": 1}]"#);
        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert!(
            requests
                .iter()
                .all(|request| request.target() == "/episodes/by_serie/3")
        );
    }

    #[test]
    fn client_errors_fail_on_first_attempt() {
        let server = TestServer::spawn(vec![Behavior::Respond(401, "expired".to_string())]);
        let url = format!("{}/movies/77", server.base_url);

        let err = get_text_with_retries(&url, Some("old"), &[], TIMEOUT, 4, NO_DELAY)
            .expect_err("401 is final");

        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "HTTP status 401 (expired)");
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn exhausted_attempts_report_the_last_failure() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(500, "first".to_string()),
            Behavior::Respond(503, "second".to_string()),
            Behavior::Respond(200, "never reached".to_string()),
        ]);

        let err = get_text_with_retries(&server.base_url, None, &[], TIMEOUT, 2, NO_DELAY)
            .expect_err("both attempts fail");

        assert_eq!(err.to_string(), "HTTP status 503 (second)");
        assert_eq!(server.request_count(), 2);
    }

    #[test]
    fn read_timeout_counts_as_transport_failure() {
        let server = TestServer::spawn(vec![
            Behavior::DelayRespond(Duration::from_millis(150), 200, "late".to_string()),
            Behavior::DelayRespond(Duration::from_millis(150), 200, "late".to_string()),
            Behavior::Respond(200, "{}".to_string()),
        ]);

        let single = get_text(&server.base_url, None, &[], Duration::from_millis(40))
            .expect_err("slow reply should time out");
        assert!(matches!(single, StoreError::Transport(_)), "got {single:?}");

        let retried = get_text_with_retries(
            &server.base_url,
            None,
            &[],
            Duration::from_millis(40),
            2,
            NO_DELAY,
        )
        .expect("retry reaches the prompt reply");
        assert_eq!(retried, "{}");
        assert_eq!(server.request_count(), 3);
    }

    #[test]
    fn progress_read_sends_bearer_and_query() {
        let server = TestServer::spawn(vec![Behavior::Respond(200, "{}".to_string())]);
        let query = vec![("movie_id".to_string(), "77".to_string())];

        let body = get_text(
            &format!("{}/progress/get", server.base_url),
            Some("tok-1"),
            &query,
            TIMEOUT,
        )
        .expect("request should succeed");

        assert_eq!(body, "{}");
        let requests = server.requests();
        assert_eq!(requests[0].method(), "GET");
        assert_eq!(requests[0].target(), "/progress/get?movie_id=77");
        assert_eq!(requests[0].header("authorization"), Some("Bearer tok-1"));
    }

    #[test]
    fn anonymous_requests_carry_no_authorization() {
        let server = TestServer::spawn(vec![Behavior::Respond(200, "[]".to_string())]);

        get_text(&server.base_url, None, &[], TIMEOUT).expect("request should succeed");

        assert_eq!(server.requests()[0].header("authorization"), None);
    }

    #[test]
    fn progress_write_is_sent_once() {
        let server = TestServer::spawn(vec![
            Behavior::Respond(503, "down".to_string()),
            Behavior::Respond(200, "ok".to_string()),
        ]);
        let payload = json!({ "episode_id": 9, "series_id": 3, "time_seconds": 48 });

        let err = post_json(
            &format!("{}/progress/save", server.base_url),
            Some("tok"),
            &payload,
            TIMEOUT,
        )
        .expect_err("503 should surface without retry");

        assert!(err.is_retryable());
        assert_eq!(server.request_count(), 1);
        let requests = server.requests();
        assert_eq!(requests[0].method(), "POST");
        assert_eq!(requests[0].header("content-type"), Some("application/json"));
        assert_eq!(requests[0].json_body(), payload);
    }
}
