//! Console narration for the operator (stdout). Logs go to stderr via tracing.

use crate::capture::CaptureState;
use crate::cookies::{CookieReport, preview};
use crate::plugin_config::GoogleAuth;
use crate::validate::Validation;
use std::path::Path;

/// Characters of a secret shown when secrets are redacted.
const REDACTED_PREFIX: usize = 12;
const COOKIE_PREVIEW: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct Narrator {
    pub show_secrets: bool,
}

impl Narrator {
    pub fn new(show_secrets: bool) -> Self {
        Self { show_secrets }
    }

    pub fn secret(&self, s: &str) -> String {
        redact(s, self.show_secrets)
    }

    pub fn banner(&self, output: &Path) {
        println!("=== Nest Authentication Collector ===");
        println!("This tool collects the authentication tokens needed by the homebridge-nest plugin.");
        println!();
        println!("1. A browser window will open and navigate to home.nest.com");
        println!("2. Log in with your Google account when prompted");
        println!("3. The issueToken and cookies are collected automatically");
        println!("4. The result is saved to {}", output.display());
    }

    pub fn pre_login_instructions(&self) {
        println!();
        println!("IMPORTANT:");
        println!("1. Click the \"eye\" icon in the address bar");
        println!("2. Enable \"Third-party cookies\" if they are blocked");
    }

    pub fn monitoring_started(&self) {
        println!();
        println!("Network monitoring started. Complete the Google sign-in now and wait for the Nest home page to load.");
    }

    pub fn capture_results(&self, capture: &CaptureState) {
        println!();
        println!("=== AUTHENTICATION DATA COLLECTION RESULTS ===");
        match capture.issue_token() {
            Some(token) => {
                println!("issueToken: captured");
                println!("issueToken: {}", self.secret(token));
            }
            None => println!("issueToken: NOT FOUND"),
        }
        let refs = capture.reference_requests();
        if !refs.is_empty() {
            println!();
            println!("iframe requests seen (reference only): {}", refs.len());
            for r in refs {
                println!(
                    "  #{} {} {} (cookie header: {} chars)",
                    r.index,
                    r.timestamp,
                    preview(&r.url, 80),
                    r.cookies.len()
                );
            }
        }
    }

    pub fn cookie_results(&self, report: &CookieReport, header: Option<&str>) {
        println!();
        if report.count == 0 {
            println!("No Google cookies found in the browser");
            return;
        }
        println!("Found {} Google cookies in the browser", report.count);
        for (name, present) in &report.sidcc {
            println!("Contains {}: {}", name, if *present { "Yes" } else { "No" });
        }
        println!();
        println!("Critical cookies:");
        for c in &report.critical {
            println!("  {}={}", c.name, self.secret(&c.value));
        }
        if let Some(h) = header {
            println!();
            println!("Cookie string length: {} characters", h.len());
            println!("First {} chars: {}...", COOKIE_PREVIEW, self.secret(preview(h, COOKIE_PREVIEW)));
        }
    }

    pub fn missing(&self, issue_token: bool, cookies: bool) {
        println!();
        println!("Could not collect all required authentication data:");
        println!("- issueToken: {}", if issue_token { "Collected" } else { "Missing" });
        println!("- cookies: {}", if cookies { "Collected" } else { "Missing" });
    }

    pub fn saved(&self, path: &Path) {
        println!();
        println!("Authentication data saved to {}", path.display());
    }

    pub fn validation(&self, v: &Validation) {
        println!();
        match v {
            Validation::Valid { user_id, email } => {
                println!("Authentication successful! User ID: {}", user_id);
                if let Some(email) = email {
                    println!("User email: {}", email);
                }
            }
            Validation::NoUserData => {
                println!("API response was successful but no user data was found")
            }
            Validation::Unparseable(e) => println!("Could not parse API response: {}", e),
            Validation::BadStatus { status, body } => {
                println!("API response error: {}", status);
                println!("Response data: {}", body);
            }
            Validation::RequestFailed(e) => println!("API request error: {}", e),
        }
        if !v.is_valid() {
            println!("Token validation failed. The tokens may not work with the Nest API.");
            println!("Run the tool again or collect the tokens manually.");
        }
    }

    pub fn stored_auth(&self, path: &Path, auth: &GoogleAuth) {
        println!("googleAuth in {}:", path.display());
        println!("  issueToken: {}", self.secret(&auth.issue_token));
        println!("  cookies: {}", self.secret(&auth.cookies));
        println!("  cookie pairs: {}", auth.cookies.split("; ").filter(|s| !s.is_empty()).count());
    }
}

/// Keep a short prefix of a secret unless `show` is set.
pub fn redact(s: &str, show: bool) -> String {
    if show {
        return s.to_string();
    }
    let head = preview(s, REDACTED_PREFIX);
    if head.len() == s.len() {
        "*".repeat(s.chars().count().min(8))
    } else {
        format!("{}… ({} chars, redacted)", head, s.chars().count())
    }
}
