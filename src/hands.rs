use async_trait::async_trait;
use headless_chrome::browser::tab::point::Point;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::protocol::cdp::types::Method;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dom;
use crate::error::{AgentError, AgentResult};
use crate::types::{MouseButton, Viewport};

/// Security-relevant launch settings, kept as one value so they can be
/// inspected and tested without starting a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPolicy {
    pub headless: bool,
    pub sandbox: bool,
    pub allow_extensions: bool,
    pub allow_file_system: bool,
    pub viewport: Viewport,
    pub chrome_path: Option<PathBuf>,
    pub idle_timeout: Duration,
}

impl Default for LaunchPolicy {
    fn default() -> Self {
        Self {
            headless: false,
            sandbox: true,
            allow_extensions: false,
            allow_file_system: false,
            viewport: Viewport::default(),
            chrome_path: None,
            idle_timeout: Duration::from_secs(120),
        }
    }
}

impl LaunchPolicy {
    /// Extra command-line flags derived from the policy.
    pub fn chrome_args(&self) -> Vec<&'static str> {
        let mut args = vec!["--no-first-run", "--no-default-browser-check"];
        if !self.allow_extensions {
            args.push("--disable-extensions");
        }
        if !self.allow_file_system {
            args.push("--disable-file-system");
        }
        args
    }

    /// Page-level metrics override. The window size alone leaves the
    /// viewport smaller than requested once browser chrome is drawn.
    pub fn device_metrics(&self) -> DeviceMetrics {
        DeviceMetrics {
            width: self.viewport.width,
            height: self.viewport.height,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// `Emulation.setDeviceMetricsOverride` carrying only the required fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

impl Method for DeviceMetrics {
    const NAME: &'static str = "Emulation.setDeviceMetricsOverride";
    type ReturnObject = serde_json::Value;
}

/// Maps a key token from the reasoning service onto the key the browser
/// expects. Matching is loose: "Enter", "ENTER", "KP_Enter" all press Enter.
pub fn key_for_token(token: &str) -> &str {
    let lower = token.to_ascii_lowercase();
    if lower.contains("enter") {
        "Enter"
    } else if lower.contains("space") {
        " "
    } else {
        token
    }
}

/// Control surface of one launched browser page.
#[async_trait]
pub trait BrowserControl: Send + Sync {
    async fn navigate(&self, url: &str) -> AgentResult<()>;
    async fn current_url(&self) -> AgentResult<String>;
    /// PNG of the visible viewport only.
    async fn screenshot(&self) -> AgentResult<Vec<u8>>;
    async fn click(&self, x: f64, y: f64, button: MouseButton) -> AgentResult<()>;
    async fn move_pointer(&self, x: f64, y: f64) -> AgentResult<()>;
    async fn scroll_by(&self, dx: f64, dy: f64) -> AgentResult<()>;
    async fn press_key(&self, key: &str) -> AgentResult<()>;
    async fn type_text(&self, text: &str) -> AgentResult<()>;
    async fn close(self: Box<Self>) -> AgentResult<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, policy: &LaunchPolicy) -> AgentResult<Box<dyn BrowserControl>>;
}

/// Launches a fresh headless_chrome instance per run.
#[derive(Debug, Default, Clone)]
pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, policy: &LaunchPolicy) -> AgentResult<Box<dyn BrowserControl>> {
        let policy = policy.clone();
        let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&policy))
            .await
            .map_err(|e| AgentError::Browser(format!("Browser launch panicked: {}", e)))??;
        Ok(Box::new(session))
    }
}

/// One browser process and its single page. Dropping it kills the process.
pub struct ChromeSession {
    browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    pub fn launch(policy: &LaunchPolicy) -> AgentResult<Self> {
        let args: Vec<&OsStr> = policy.chrome_args().into_iter().map(OsStr::new).collect();

        let options = LaunchOptions {
            headless: policy.headless,
            sandbox: policy.sandbox,
            path: policy.chrome_path.clone(),
            window_size: Some((policy.viewport.width, policy.viewport.height)),
            args,
            idle_browser_timeout: policy.idle_timeout,
            ..Default::default()
        };

        info!(headless = policy.headless, sandbox = policy.sandbox, "Starting Chrome");
        let browser = Browser::new(options).map_err(|e| {
            warn!("Browser launch failed: {:#}", e);
            AgentError::Browser(format!("Browser launch failed: {:#}", e))
        })?;

        let tab = browser.new_tab()?;
        tab.call_method(policy.device_metrics())?;
        debug!(
            width = policy.viewport.width,
            height = policy.viewport.height,
            "Chrome ready"
        );

        Ok(Self { browser, tab })
    }

    /// Runs a blocking driver call off the async runtime.
    async fn on_tab<T, F>(&self, f: F) -> AgentResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Arc<Tab>) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| AgentError::Browser(format!("Browser task panicked: {}", e)))?
            .map_err(AgentError::from)
    }
}

#[async_trait]
impl BrowserControl for ChromeSession {
    async fn navigate(&self, url: &str) -> AgentResult<()> {
        let url = url.to_string();
        self.on_tab(move |tab| {
            tab.navigate_to(&url)?.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> AgentResult<String> {
        self.on_tab(|tab| dom::get_current_url(tab)).await
    }

    async fn screenshot(&self) -> AgentResult<Vec<u8>> {
        self.on_tab(|tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        })
        .await
    }

    async fn click(&self, x: f64, y: f64, button: MouseButton) -> AgentResult<()> {
        self.on_tab(move |tab| {
            if button == MouseButton::Left {
                tab.click_point(Point { x, y })?;
            } else {
                tab.move_mouse_to_point(Point { x, y })?;
                dom::click_with_button(tab, x, y, button)?;
            }
            Ok(())
        })
        .await
    }

    async fn move_pointer(&self, x: f64, y: f64) -> AgentResult<()> {
        self.on_tab(move |tab| {
            tab.move_mouse_to_point(Point { x, y })?;
            Ok(())
        })
        .await
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> AgentResult<()> {
        self.on_tab(move |tab| dom::scroll_by(tab, dx, dy)).await
    }

    async fn press_key(&self, key: &str) -> AgentResult<()> {
        let key = key.to_string();
        self.on_tab(move |tab| {
            tab.press_key(&key)?;
            Ok(())
        })
        .await
    }

    async fn type_text(&self, text: &str) -> AgentResult<()> {
        let text = text.to_string();
        self.on_tab(move |tab| {
            tab.type_str(&text)?;
            Ok(())
        })
        .await
    }

    async fn close(self: Box<Self>) -> AgentResult<()> {
        let ChromeSession { browser, tab } = *self;
        tokio::task::spawn_blocking(move || {
            let closed = tab.close(false);
            // Dropping the handle terminates the browser process.
            drop(browser);
            closed.map(|_| ())
        })
        .await
        .map_err(|e| AgentError::Browser(format!("Browser close panicked: {}", e)))??;
        Ok(())
    }
}
