//! Classify intercepted requests and hold what was captured during the login.
//!
//! The issueToken is the full URL of the first request matching every
//! configured marker. Requests matching the reference marker and carrying a
//! cookie header are recorded for the operator's information only.

use crate::settings::LoginSettings;
use std::sync::{Arc, Mutex};

/// Capture state shared between the per-page interception tasks and the flow.
pub type SharedCapture = Arc<Mutex<CaptureState>>;

pub fn new_shared_capture(login: &LoginSettings) -> SharedCapture {
    Arc::new(Mutex::new(CaptureState::new(login)))
}

/// True when every non-empty marker is a substring of `url`.
pub fn is_issue_token_request(url: &str, markers: &[String]) -> bool {
    let mut any = false;
    for m in markers.iter().filter(|m| !m.is_empty()) {
        if !url.contains(m.as_str()) {
            return false;
        }
        any = true;
    }
    any
}

pub fn is_reference_request(url: &str, marker: &str) -> bool {
    !marker.is_empty() && url.contains(marker)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRequest {
    /// 1-based, in interception order.
    pub index: usize,
    pub url: String,
    pub cookies: String,
    /// RFC 3339.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    IssueToken,
    Reference(usize),
    /// Matched the issueToken markers after a token was already captured.
    DuplicateIssueToken,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct CaptureState {
    markers: Vec<String>,
    reference_marker: String,
    issue_token: Option<String>,
    reference_requests: Vec<ReferenceRequest>,
    seen: u64,
}

impl CaptureState {
    pub fn new(login: &LoginSettings) -> Self {
        Self {
            markers: login.issue_token_markers.clone(),
            reference_marker: login.reference_marker.clone(),
            issue_token: None,
            reference_requests: Vec::new(),
            seen: 0,
        }
    }

    /// Record one intercepted request. A request may be both the issueToken and
    /// a reference request; the issueToken wins the returned observation.
    pub fn observe(&mut self, url: &str, cookie_header: Option<&str>) -> Observation {
        self.seen += 1;
        let mut observation = Observation::Ignored;
        if is_issue_token_request(url, &self.markers) {
            if self.issue_token.is_none() {
                self.issue_token = Some(url.to_string());
                observation = Observation::IssueToken;
            } else {
                observation = Observation::DuplicateIssueToken;
            }
        }
        if is_reference_request(url, &self.reference_marker) {
            if let Some(cookies) = cookie_header.filter(|c| !c.is_empty()) {
                let index = self.reference_requests.len() + 1;
                self.reference_requests.push(ReferenceRequest {
                    index,
                    url: url.to_string(),
                    cookies: cookies.to_string(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                });
                if observation == Observation::Ignored {
                    observation = Observation::Reference(index);
                }
            }
        }
        observation
    }

    pub fn issue_token(&self) -> Option<&str> {
        self.issue_token.as_deref()
    }

    pub fn reference_requests(&self) -> &[ReferenceRequest] {
        &self.reference_requests
    }

    /// Number of requests observed since interception started.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

/// Record a request on the shared state. A poisoned lock is recovered: the state
/// is plain data and stays consistent between calls.
pub fn observe_shared(state: &SharedCapture, url: &str, cookie_header: Option<&str>) -> Observation {
    let mut g = state.lock().unwrap_or_else(|e| e.into_inner());
    g.observe(url, cookie_header)
}

pub fn snapshot(state: &SharedCapture) -> CaptureState {
    state.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/iframerpc?action=issueToken&response_type=token%20id_token&login_hint=abc&client_id=733249279899-1gpkq9duqmdp55a7e5lft1pr2smumdla.apps.googleusercontent.com";

    fn state() -> CaptureState {
        CaptureState::new(&LoginSettings::default())
    }

    #[test]
    fn test_issue_token_requires_all_markers() {
        let markers = LoginSettings::default().issue_token_markers;
        assert!(is_issue_token_request(TOKEN_URL, &markers));
        assert!(!is_issue_token_request(
            "https://accounts.google.com/o/oauth2/iframerpc?action=checkOrigin",
            &markers
        ));
        assert!(!is_issue_token_request(
            "https://example.com/?action=issueToken",
            &markers
        ));
        assert!(!is_issue_token_request(TOKEN_URL, &[String::new()]));
    }

    #[test]
    fn test_first_issue_token_wins() {
        let mut s = state();
        assert_eq!(s.observe(TOKEN_URL, None), Observation::IssueToken);
        let later = format!("{}&later=1", TOKEN_URL);
        assert_eq!(s.observe(&later, None), Observation::DuplicateIssueToken);
        assert_eq!(s.issue_token(), Some(TOKEN_URL));
        assert_eq!(s.seen(), 2);
    }

    #[test]
    fn test_reference_requests_need_cookie_header() {
        let mut s = state();
        let url = "https://accounts.google.com/o/oauth2/iframe#origin=https%3A%2F%2Fhome.nest.com";
        assert_eq!(s.observe(url, None), Observation::Ignored);
        assert_eq!(s.observe(url, Some("")), Observation::Ignored);
        assert_eq!(s.observe(url, Some("SID=1; HSID=2")), Observation::Reference(1));
        assert_eq!(s.observe(url, Some("SID=3")), Observation::Reference(2));
        let refs = s.reference_requests();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].index, 1);
        assert_eq!(refs[1].cookies, "SID=3");
        assert!(chrono::DateTime::parse_from_rfc3339(&refs[0].timestamp).is_ok());
        assert!(s.issue_token().is_none());
    }

    #[test]
    fn test_unrelated_requests_ignored() {
        let mut s = state();
        assert_eq!(
            s.observe("https://home.nest.com/session", Some("a=b")),
            Observation::Ignored
        );
        assert!(s.issue_token().is_none());
        assert!(s.reference_requests().is_empty());
    }

    #[test]
    fn test_shared_state_across_threads() {
        let shared = new_shared_capture(&LoginSettings::default());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    observe_shared(&shared, &format!("https://x.test/{}", i), None);
                    observe_shared(&shared, TOKEN_URL, None);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = snapshot(&shared);
        assert_eq!(snap.seen(), 8);
        assert_eq!(snap.issue_token(), Some(TOKEN_URL));
    }
}
