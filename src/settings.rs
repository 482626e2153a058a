//! Settings for nest-auth (nest-auth.yaml).
//!
//! Every field has a default, so the file is optional. Values may reference
//! env vars (`$VAR`, `${VAR}`, `${VAR:-default}`).

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Root settings (nest-auth.yaml).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Log level (e.g. "info", "debug"). Env NEST_AUTH_LOG_LEVEL overrides when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty". Env NEST_AUTH_LOG_FORMAT overrides.
    #[serde(default)]
    pub log_format: Option<String>,

    /// homebridge config file that receives googleAuth.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default)]
    pub browser: BrowserSettings,

    #[serde(default)]
    pub login: LoginSettings,

    #[serde(default)]
    pub validation: ValidationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: None,
            output: default_output(),
            browser: BrowserSettings::default(),
            login: LoginSettings::default(),
            validation: ValidationSettings::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from("config.json")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserSettings {
    /// Chrome/Chromium binary. When unset, CHROME env and well-known locations are searched.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    #[serde(default)]
    pub headless: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    #[serde(default = "default_device_scale_factor")]
    pub device_scale_factor: f64,

    /// Extra command line flags passed to the browser.
    #[serde(default = "default_browser_args")]
    pub args: Vec<String>,

    /// Profile directory. A fresh temporary profile is used when unset.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            headless: false,
            user_agent: default_user_agent(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            device_scale_factor: default_device_scale_factor(),
            args: default_browser_args(),
            user_data_dir: None,
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_window_width() -> u32 {
    1280
}
fn default_window_height() -> u32 {
    800
}
fn default_device_scale_factor() -> f64 {
    2.0
}
fn default_browser_args() -> Vec<String> {
    [
        "--disable-blink-features=AutomationControlled",
        "--no-sandbox",
        "--disable-web-security",
        "--disable-features=IsolateOrigins,site-per-process",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginSettings {
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Every marker must appear in a request URL for it to be taken as the issueToken.
    #[serde(default = "default_issue_token_markers")]
    pub issue_token_markers: Vec<String>,

    /// Requests matching this marker are logged for reference, never stored.
    #[serde(default = "default_reference_marker")]
    pub reference_marker: String,

    /// Cookies whose domain contains this string are harvested.
    #[serde(default = "default_cookie_domain")]
    pub cookie_domain: String,

    /// How often to look for new tabs/popups to intercept while waiting on the operator.
    #[serde(default = "default_page_poll_ms")]
    pub page_poll_ms: u64,
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            start_url: default_start_url(),
            issue_token_markers: default_issue_token_markers(),
            reference_marker: default_reference_marker(),
            cookie_domain: default_cookie_domain(),
            page_poll_ms: default_page_poll_ms(),
        }
    }
}

fn default_start_url() -> String {
    "https://home.nest.com/".to_string()
}
fn default_issue_token_markers() -> Vec<String> {
    vec!["iframerpc".to_string(), "action=issueToken".to_string()]
}
fn default_reference_marker() -> String {
    "oauth2/iframe".to_string()
}
fn default_cookie_domain() -> String {
    ".google.com".to_string()
}
fn default_page_poll_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationSettings {
    #[serde(default = "default_validation_enabled")]
    pub enabled: bool,

    #[serde(default = "default_validation_url")]
    pub url: String,

    #[serde(default = "default_referer")]
    pub referer: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retries: Option<RetrySettings>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            enabled: default_validation_enabled(),
            url: default_validation_url(),
            referer: default_referer(),
            timeout_secs: default_timeout_secs(),
            retries: None,
        }
    }
}

fn default_validation_enabled() -> bool {
    true
}
fn default_validation_url() -> String {
    "https://home.nest.com/api/0.1/user".to_string()
}
fn default_referer() -> String {
    "https://home.nest.com/".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default)]
    pub max_backoff_secs: Option<u64>,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_secs() -> u64 {
    1
}
fn default_multiplier() -> f64 {
    2.0
}

impl Settings {
    /// Load and parse settings from path. Expands env vars via shellexpand.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {:?}", path))?;
        Self::parse(&s)
    }

    /// Like [`Settings::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(s)?;
        // An empty (or comment-only) file deserializes to unit, not a mapping.
        if expanded.lines().all(|l| {
            let l = l.trim();
            l.is_empty() || l.starts_with('#')
        }) {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml_ng::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("parse settings: {}", e))?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.login.issue_token_markers.iter().all(|m| m.trim().is_empty()) {
            anyhow::bail!("login.issue_token_markers must contain at least one non-empty marker");
        }
        if self.login.cookie_domain.trim().is_empty() {
            anyhow::bail!("login.cookie_domain must not be empty");
        }
        if self.login.page_poll_ms == 0 {
            anyhow::bail!("login.page_poll_ms must be greater than 0");
        }
        if self.browser.window_width == 0 || self.browser.window_height == 0 {
            anyhow::bail!("browser window size must be non-zero");
        }
        if let Some(r) = &self.validation.retries {
            if !r.multiplier.is_finite() || r.multiplier < 1.0 {
                anyhow::bail!("validation.retries.multiplier must be a finite number >= 1.0");
            }
        }
        Ok(())
    }
}

/// Expand env vars: `$VAR`, `${VAR}`, `${VAR:-default}`. Unset vars expand to empty.
fn expand_env_vars(s: &str) -> anyhow::Result<String> {
    fn context(var: &str) -> Result<Option<std::borrow::Cow<'static, str>>, std::env::VarError> {
        match std::env::var(var) {
            Ok(v) => Ok(Some(v.into())),
            Err(std::env::VarError::NotPresent) => Ok(Some("".into())),
            Err(e) => Err(e),
        }
    }
    shellexpand::env_with_context(s, context)
        .map(|cow| cow.into_owned())
        .map_err(|e| anyhow::anyhow!("settings env expansion: {} ({})", e.var_name, e.cause))
}
