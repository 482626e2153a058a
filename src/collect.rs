//! The interactive collection flow.
//!
//! Navigate without interception, let the operator open the Google sign-in,
//! intercept everything while they log in, then harvest cookies, persist both
//! artifacts and validate them. The browser is always closed before returning.

use crate::browser::BrowserSession;
use crate::capture::{CaptureState, new_shared_capture, snapshot};
use crate::cookies::{CookieReport, cookie_header, select_domain};
use crate::operator::Operator;
use crate::plugin_config::{GoogleAuth, update_config_auth, write_config_file};
use crate::report::Narrator;
use crate::settings::Settings;
use crate::validate::{Validation, build_client, validate_cookies};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const READY_PROMPT: &str =
    "Now click \"Sign in with Google\" but DON'T sign in yet. Press Enter when ready to start monitoring...";
const DONE_PROMPT: &str =
    "Press Enter when you have successfully logged in and are on the Nest home page...";

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub output: PathBuf,
    pub validate: bool,
    /// Replace the whole config file instead of merging googleAuth into it.
    pub overwrite: bool,
    pub narrator: Narrator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedAuth {
    pub issue_token: String,
    pub cookies: String,
}

impl CollectedAuth {
    /// Both artifacts, or an error naming what is missing.
    pub fn from_parts(issue_token: Option<String>, cookies: Option<String>) -> anyhow::Result<Self> {
        match (issue_token, cookies) {
            (Some(issue_token), Some(cookies)) => Ok(Self {
                issue_token,
                cookies,
            }),
            (t, c) => {
                let mut missing = Vec::new();
                if t.is_none() {
                    missing.push("issueToken");
                }
                if c.is_none() {
                    missing.push("cookies");
                }
                anyhow::bail!(
                    "authentication data collection incomplete (missing: {})",
                    missing.join(", ")
                )
            }
        }
    }
}

impl From<&CollectedAuth> for GoogleAuth {
    fn from(a: &CollectedAuth) -> Self {
        GoogleAuth {
            issue_token: a.issue_token.clone(),
            cookies: a.cookies.clone(),
        }
    }
}

#[derive(Debug)]
pub struct CollectOutcome {
    pub auth: CollectedAuth,
    pub output: PathBuf,
    /// None when validation was skipped.
    pub validation: Option<Validation>,
}

/// Run the flow on an already launched session. The session is closed on every path.
pub async fn collect_auth(
    session: &mut dyn BrowserSession,
    operator: &dyn Operator,
    settings: &Settings,
    options: &CollectOptions,
) -> anyhow::Result<CollectOutcome> {
    let result = run(session, operator, settings, options).await;
    if let Err(e) = session.close().await {
        warn!(error = %e, "closing browser");
    }
    info!("browser closed");
    result
}

async fn run(
    session: &mut dyn BrowserSession,
    operator: &dyn Operator,
    settings: &Settings,
    options: &CollectOptions,
) -> anyhow::Result<CollectOutcome> {
    let narrator = options.narrator;

    info!(url = %settings.login.start_url, "navigating to login page");
    session.navigate(&settings.login.start_url).await?;

    narrator.pre_login_instructions();
    operator.confirm(READY_PROMPT).await?;

    let capture = new_shared_capture(&settings.login);
    session.start_interception(capture.clone()).await?;
    narrator.monitoring_started();

    let poll = Duration::from_millis(settings.login.page_poll_ms);
    wait_attaching_pages(session, operator, DONE_PROMPT, poll).await?;

    let captured: CaptureState = snapshot(&capture);
    info!(
        requests = captured.seen(),
        reference_requests = captured.reference_requests().len(),
        issue_token = captured.issue_token().is_some(),
        "interception finished"
    );
    narrator.capture_results(&captured);

    let jar = session.cookies().await?;
    let selected = select_domain(jar, &settings.login.cookie_domain);
    let header = cookie_header(&selected);
    narrator.cookie_results(&CookieReport::new(&selected), header.as_deref());

    let issue_token = captured.issue_token().map(str::to_string);
    if issue_token.is_none() || header.is_none() {
        narrator.missing(issue_token.is_some(), header.is_some());
    }
    let auth = CollectedAuth::from_parts(issue_token, header)?;

    let google_auth = GoogleAuth::from(&auth);
    if options.overwrite {
        write_config_file(&google_auth, &options.output)?;
    } else {
        update_config_auth(&google_auth, &options.output)?;
    }
    narrator.saved(&options.output);

    let validation = if options.validate {
        let client = build_client(&settings.validation)?;
        let v = validate_cookies(
            &client,
            &settings.validation,
            &settings.browser.user_agent,
            &auth.cookies,
        )
        .await;
        if v.is_valid() {
            info!("tokens validated");
        } else {
            warn!(outcome = ?v, "token validation failed");
        }
        narrator.validation(&v);
        Some(v)
    } else {
        None
    };

    Ok(CollectOutcome {
        auth,
        output: options.output.clone(),
        validation,
    })
}

/// Wait for the operator while periodically extending interception to new pages.
async fn wait_attaching_pages(
    session: &mut dyn BrowserSession,
    operator: &dyn Operator,
    prompt: &str,
    poll: Duration,
) -> anyhow::Result<()> {
    let confirmed = operator.confirm(prompt);
    tokio::pin!(confirmed);
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            r = &mut confirmed => return r,
            _ = ticker.tick() => {
                if let Err(e) = session.attach_new_pages().await {
                    warn!(error = %e, "looking for new pages");
                }
            }
        }
    }
}
