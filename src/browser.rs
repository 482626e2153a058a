//! Browser control: a small seam over the one browser we drive.
//!
//! [`ChromeSession`] talks to Chrome/Chromium over the DevTools protocol via
//! chromiumoxide. Interception uses the Fetch domain: every request of an
//! intercepted page pauses, is classified into the shared capture state, and
//! is then continued unchanged.

use crate::capture::{Observation, SharedCapture, observe_shared};
use crate::cookies::BrowserCookie;
use crate::settings::BrowserSettings;
use anyhow::Context;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, EventRequestPaused, RequestPattern, RequestStage,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> anyhow::Result<()>;

    /// Start intercepting every request of every open page into `capture`.
    async fn start_interception(&mut self, capture: SharedCapture) -> anyhow::Result<()>;

    /// Extend interception to pages opened since the last call (login popups).
    /// Returns the number of newly attached pages. No-op before interception starts.
    async fn attach_new_pages(&mut self) -> anyhow::Result<usize>;

    /// Every cookie in the browser's jar.
    async fn cookies(&mut self) -> anyhow::Result<Vec<BrowserCookie>>;

    async fn close(&mut self) -> anyhow::Result<()>;
}

pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    capture: Option<SharedCapture>,
    intercepted: HashSet<String>,
    intercept_tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl ChromeSession {
    pub async fn launch(settings: &BrowserSettings) -> anyhow::Result<Self> {
        let chrome = find_chrome(settings.executable.as_deref()).context(
            "Chrome/Chromium not found. Install it, set CHROME, or pass --chrome PATH",
        )?;
        debug!(chrome = %chrome.display(), "using browser");

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome)
            .window_size(settings.window_width, settings.window_height)
            .viewport(Viewport {
                width: settings.window_width,
                height: settings.window_height,
                device_scale_factor: Some(settings.device_scale_factor),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .arg(format!("--user-agent={}", settings.user_agent));
        if !settings.headless {
            builder = builder.with_head();
        }
        for arg in &settings.args {
            builder = builder.arg(arg.clone());
        }
        if let Some(dir) = &settings.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("configure browser: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launch browser")?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("open browser page")?;

        Ok(Self {
            browser,
            page,
            handler_task,
            capture: None,
            intercepted: HashSet::new(),
            intercept_tasks: Vec::new(),
            closed: false,
        })
    }

    async fn intercept(&mut self, page: Page, capture: SharedCapture) -> anyhow::Result<()> {
        let id = page.target_id().inner().clone();
        if !self.intercepted.insert(id.clone()) {
            return Ok(());
        }
        match intercept_page(page, capture).await {
            Ok(task) => {
                debug!(target_id = %id, "intercepting page");
                self.intercept_tasks.push(task);
                Ok(())
            }
            Err(e) => {
                self.intercepted.remove(&id);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> anyhow::Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigate to {}", url))?;
        Ok(())
    }

    async fn start_interception(&mut self, capture: SharedCapture) -> anyhow::Result<()> {
        self.capture = Some(capture.clone());
        let page = self.page.clone();
        self.intercept(page, capture).await?;
        self.attach_new_pages().await?;
        Ok(())
    }

    async fn attach_new_pages(&mut self) -> anyhow::Result<usize> {
        let Some(capture) = self.capture.clone() else {
            return Ok(0);
        };
        let pages = self.browser.pages().await.context("list browser pages")?;
        let mut attached = 0;
        for page in pages {
            if self.intercepted.contains(page.target_id().inner()) {
                continue;
            }
            // Popups can close between listing and attaching.
            match self.intercept(page, capture.clone()).await {
                Ok(()) => attached += 1,
                Err(e) => warn!(error = %e, "could not intercept new page"),
            }
        }
        if attached > 0 {
            info!(attached, "intercepting newly opened pages");
        }
        Ok(attached)
    }

    async fn cookies(&mut self) -> anyhow::Result<Vec<BrowserCookie>> {
        let cookies = self
            .browser
            .get_cookies()
            .await
            .context("read browser cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie::new(c.name, c.value, c.domain))
            .collect())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for task in self.intercept_tasks.drain(..) {
            task.abort();
        }
        let result = self.browser.close().await.context("close browser");
        if result.is_ok() {
            let _ = self.browser.wait().await;
        }
        self.handler_task.abort();
        result.map(|_| ())
    }
}

/// Pause every request of `page` at the request stage, record it, continue it.
async fn intercept_page(page: Page, capture: SharedCapture) -> anyhow::Result<JoinHandle<()>> {
    // Listen before enabling so no paused request is missed.
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .context("listen for paused requests")?;
    let enable = fetch::EnableParams::builder()
        .pattern(
            RequestPattern::builder()
                .url_pattern("*")
                .request_stage(RequestStage::Request)
                .build(),
        )
        .build();
    page.execute(enable)
        .await
        .context("enable request interception")?;

    Ok(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let url = event.request.url.as_str();
            let cookie = header_value(event.request.headers.inner(), "cookie");
            match observe_shared(&capture, url, cookie) {
                Observation::IssueToken => {
                    info!("found iframerpc request with action=issueToken");
                    debug!(%url, "issueToken request");
                }
                Observation::Reference(index) => {
                    info!(index, %url, "iframe request (reference only)");
                }
                Observation::DuplicateIssueToken => {
                    debug!(%url, "issueToken already captured, ignoring");
                }
                Observation::Ignored => {}
            }
            // The request must always continue, whatever happened above.
            if let Err(e) = page
                .execute(fetch::ContinueRequestParams::new(event.request_id.clone()))
                .await
            {
                debug!(error = %e, %url, "continue request");
            }
        }
    }))
}

/// Case-insensitive header lookup in a DevTools headers object.
fn header_value<'a>(headers: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    headers
        .as_object()?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
}

/// Locate a Chrome/Chromium binary: explicit path, CHROME env, PATH, well-known locations.
pub fn find_chrome(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("CHROME") {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }
    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_value_case_insensitive() {
        let headers = json!({"Cookie": "SID=1", "User-Agent": "x"});
        assert_eq!(header_value(&headers, "cookie"), Some("SID=1"));
        assert_eq!(header_value(&headers, "referer"), None);
        assert_eq!(header_value(&json!(null), "cookie"), None);
    }

    #[test]
    fn test_find_chrome_explicit_path_wins() {
        let p = Path::new("/opt/custom/chrome");
        assert_eq!(find_chrome(Some(p)), Some(PathBuf::from("/opt/custom/chrome")));
    }
}
