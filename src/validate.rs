//! Check harvested cookies against the Nest user API.
//!
//! Validation never fails the program: every outcome, transport errors
//! included, is reported as a [`Validation`] value.

use crate::settings::{RetrySettings, ValidationSettings};
use anyhow::Context;
use reqwest::header::{COOKIE, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Build a reqwest client with timeouts from validation settings.
pub fn build_client(settings: &ValidationSettings) -> anyhow::Result<Client> {
    let timeout_secs = settings.timeout_secs.max(1);
    Client::builder()
        .connect_timeout(Duration::from_secs(std::cmp::min(10, timeout_secs)))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("build reqwest client")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid {
        user_id: String,
        email: Option<String>,
    },
    /// 200, but the body carried no user_id.
    NoUserData,
    /// 200, but the body was not JSON.
    Unparseable(String),
    BadStatus {
        status: u16,
        body: String,
    },
    RequestFailed(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid { .. })
    }
}

/// Upper bound on a single backoff delay.
const BACKOFF_CEILING_SECS: f64 = 300.0;

/// 408, 429 and 5xx are worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    let code = status.as_u16();
    code == 408 || code == 429 || (500..600).contains(&code)
}

/// Backoff before retry `attempt` (0 = first retry).
fn backoff_duration(retry: &RetrySettings, attempt: u32) -> Duration {
    let secs = (retry.initial_backoff_secs as f64) * retry.multiplier.powi(attempt as i32);
    let capped = retry
        .max_backoff_secs
        .map(|max| secs.min(max as f64))
        .unwrap_or(secs)
        .min(BACKOFF_CEILING_SECS);
    Duration::try_from_secs_f64(capped).unwrap_or(Duration::from_secs_f64(BACKOFF_CEILING_SECS))
}

/// GET the user endpoint with the cookie string and classify the answer.
pub async fn validate_cookies(
    client: &Client,
    settings: &ValidationSettings,
    user_agent: &str,
    cookies: &str,
) -> Validation {
    let max_attempts = settings
        .retries
        .as_ref()
        .map(|r| r.max_attempts.max(1))
        .unwrap_or(1);
    let mut attempt = 0;
    loop {
        let (outcome, retryable) = attempt_once(client, settings, user_agent, cookies).await;
        attempt += 1;
        let retry = match &settings.retries {
            Some(r) if retryable && attempt < max_attempts => r,
            _ => return outcome,
        };
        let delay = backoff_duration(retry, attempt - 1);
        warn!(
            attempt,
            max_attempts,
            delay_secs = delay.as_secs_f64(),
            outcome = ?outcome,
            "validation request failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

/// One request. The bool says whether the outcome is worth retrying.
async fn attempt_once(
    client: &Client,
    settings: &ValidationSettings,
    user_agent: &str,
    cookies: &str,
) -> (Validation, bool) {
    let response = client
        .get(&settings.url)
        .header(COOKIE, cookies)
        .header(USER_AGENT, user_agent)
        .header(REFERER, &settings.referer)
        .send()
        .await;
    let response = match response {
        Ok(r) => r,
        Err(e) => return (Validation::RequestFailed(e.to_string()), true),
    };
    let status = response.status();
    debug!(status = status.as_u16(), url = %settings.url, "validation response");
    if status != StatusCode::OK {
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return (Validation::RequestFailed(e.to_string()), true),
        };
        let retryable = is_retryable_status(status);
        return (
            Validation::BadStatus {
                status: status.as_u16(),
                body,
            },
            retryable,
        );
    }
    match response.json::<Value>().await {
        Ok(body) => (classify_user(&body), false),
        Err(e) if e.is_decode() => (Validation::Unparseable(e.to_string()), false),
        Err(e) => (Validation::RequestFailed(e.to_string()), true),
    }
}

/// A user only counts when the body is an object with a truthy `user_id`.
fn classify_user(body: &Value) -> Validation {
    let Value::Object(user) = body else {
        return Validation::NoUserData;
    };
    match user.get("user_id") {
        Some(id) if is_truthy(id) => Validation::Valid {
            user_id: display_value(id),
            email: user
                .get("email")
                .filter(|e| !e.is_null())
                .map(display_value),
        },
        _ => Validation::NoUserData,
    }
}

/// null, false, 0 and "" are not a user id.
fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> ValidationSettings {
        ValidationSettings {
            url: format!("{}/api/0.1/user", server.uri()),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_is_retryable_status() {
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_backoff_duration() {
        let retry = RetrySettings {
            max_attempts: 3,
            initial_backoff_secs: 1,
            max_backoff_secs: Some(5),
            multiplier: 2.0,
        };
        assert_eq!(backoff_duration(&retry, 0), Duration::from_secs(1));
        assert_eq!(backoff_duration(&retry, 2), Duration::from_secs(4));
        assert_eq!(backoff_duration(&retry, 8), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_duration_is_bounded() {
        let huge = RetrySettings {
            max_attempts: 3,
            initial_backoff_secs: 1,
            max_backoff_secs: None,
            multiplier: 1e300,
        };
        assert_eq!(backoff_duration(&huge, 5), Duration::from_secs(300));
        let nan = RetrySettings {
            multiplier: f64::NAN,
            ..huge
        };
        assert!(backoff_duration(&nan, 1) <= Duration::from_secs(300));
    }

    #[test]
    fn test_classify_numeric_user_id() {
        assert_eq!(
            classify_user(&json!({"user_id": 123456, "email": "a@b.c"})),
            Validation::Valid {
                user_id: "123456".into(),
                email: Some("a@b.c".into())
            }
        );
        assert_eq!(classify_user(&json!({"user_id": null})), Validation::NoUserData);
    }

    #[test]
    fn test_classify_requires_object_with_truthy_user_id() {
        assert_eq!(classify_user(&json!(["user.9", "x@y.z"])), Validation::NoUserData);
        assert_eq!(classify_user(&json!("user.9")), Validation::NoUserData);
        assert_eq!(classify_user(&json!({"user_id": ""})), Validation::NoUserData);
        assert_eq!(classify_user(&json!({"user_id": 0})), Validation::NoUserData);
        assert_eq!(classify_user(&json!({"user_id": false})), Validation::NoUserData);
    }

    #[test]
    fn test_classify_non_string_email_is_displayed() {
        assert_eq!(
            classify_user(&json!({"user_id": "u", "email": 5})),
            Validation::Valid {
                user_id: "u".into(),
                email: Some("5".into())
            }
        );
        assert_eq!(
            classify_user(&json!({"user_id": "u", "email": null})),
            Validation::Valid {
                user_id: "u".into(),
                email: None
            }
        );
    }

    #[tokio::test]
    async fn test_valid_user_sends_cookie_ua_referer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/0.1/user"))
            .and(header("cookie", "SID=a; SIDCC=b"))
            .and(header("user-agent", "test-agent"))
            .and(header("referer", "https://home.nest.com/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"user_id": "user.42", "email": "me@example.com"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let s = settings(&server);
        let client = build_client(&s).unwrap();
        let v = validate_cookies(&client, &s, "test-agent", "SID=a; SIDCC=b").await;
        assert_eq!(
            v,
            Validation::Valid {
                user_id: "user.42".into(),
                email: Some("me@example.com".into())
            }
        );
        assert!(v.is_valid());
    }

    #[tokio::test]
    async fn test_ok_without_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "none"})))
            .mount(&server)
            .await;
        let s = settings(&server);
        let client = build_client(&s).unwrap();
        let v = validate_cookies(&client, &s, "ua", "SID=a").await;
        assert_eq!(v, Validation::NoUserData);
        assert!(!v.is_valid());
    }

    #[tokio::test]
    async fn test_ok_with_array_body_is_no_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["user.9", "x@y.z"])))
            .mount(&server)
            .await;
        let s = settings(&server);
        let client = build_client(&s).unwrap();
        let v = validate_cookies(&client, &s, "ua", "SID=a").await;
        assert_eq!(v, Validation::NoUserData);
    }

    #[tokio::test]
    async fn test_ok_with_html_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;
        let s = settings(&server);
        let client = build_client(&s).unwrap();
        let v = validate_cookies(&client, &s, "ua", "SID=a").await;
        assert!(matches!(v, Validation::Unparseable(_)), "{v:?}");
    }

    #[tokio::test]
    async fn test_unauthorized_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;
        let mut s = settings(&server);
        s.retries = Some(RetrySettings {
            max_attempts: 3,
            initial_backoff_secs: 0,
            max_backoff_secs: None,
            multiplier: 1.0,
        });
        let client = build_client(&s).unwrap();
        let v = validate_cookies(&client, &s, "ua", "SID=a").await;
        assert_eq!(
            v,
            Validation::BadStatus {
                status: 401,
                body: "unauthorized".into()
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_retried_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "u1"})))
            .mount(&server)
            .await;
        let mut s = settings(&server);
        s.retries = Some(RetrySettings {
            max_attempts: 2,
            initial_backoff_secs: 0,
            max_backoff_secs: None,
            multiplier: 1.0,
        });
        let client = build_client(&s).unwrap();
        let v = validate_cookies(&client, &s, "ua", "SID=a").await;
        assert_eq!(
            v,
            Validation::Valid {
                user_id: "u1".into(),
                email: None
            }
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_request_failed() {
        let s = ValidationSettings {
            url: "http://127.0.0.1:1/api/0.1/user".into(),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = build_client(&s).unwrap();
        let v = validate_cookies(&client, &s, "ua", "SID=a").await;
        assert!(matches!(v, Validation::RequestFailed(_)), "{v:?}");
    }
}
