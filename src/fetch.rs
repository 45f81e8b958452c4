use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fantoccini::error::NewSessionError;
use fantoccini::wd::Capabilities;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use tokio::time::{timeout, timeout_at, Instant};

// ── Constants ────────────────────────────────────────────────────────────────

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CHROME_ARGS: &[&str] = &["--disable-gpu", "--no-sandbox", "--window-size=1280,2400"];

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to start browser session: {0}")]
    Connect(String),
    #[error("navigation failed: {0}")]
    Navigate(String),
    #[error("failed to capture page HTML: {0}")]
    Capture(String),
    #[error("page fetch timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("browser session aborted: {0}")]
    Aborted(String),
}

// ── Fetcher seam ─────────────────────────────────────────────────────────────

/// Loads a URL and hands back the rendered HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

// ── Browser configuration ────────────────────────────────────────────────────

/// How the fetcher decides the page has finished rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleMode {
    /// Sleep for the whole settle delay.
    Fixed,
    /// Poll for the ready selector, giving up after the settle delay.
    Selector,
}

impl FromStr for SettleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(SettleMode::Fixed),
            "selector" => Ok(SettleMode::Selector),
            other => Err(format!("unknown settle mode `{}` (expected fixed or selector)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub headless: bool,
    /// Deadline for the whole session: connect, navigate, settle and capture.
    pub timeout: Duration,
    pub settle_delay: Duration,
    pub settle_mode: SettleMode,
    pub ready_selector: String,
}

impl BrowserConfig {
    fn capabilities(&self) -> Capabilities {
        let mut args: Vec<&str> = CHROME_ARGS.to_vec();
        if self.headless {
            args.insert(0, "--headless=new");
        }

        let mut caps = Capabilities::new();
        caps.insert("browserName".to_string(), json!("chrome"));
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
        caps
    }
}

// ── WebDriver-backed fetcher ─────────────────────────────────────────────────

/// Opens a fresh WebDriver session per call and closes it before returning.
#[derive(Debug, Clone)]
pub struct BrowserFetcher {
    config: Arc<BrowserConfig>,
}

impl BrowserFetcher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let config = Arc::clone(&self.config);
        let url = url.to_string();

        // Own task: a dropped caller must not cut the settle step short or
        // skip teardown.
        tokio::spawn(async move { run_session(&config, &url).await })
            .await
            .map_err(|e| FetchError::Aborted(e.to_string()))?
    }
}

async fn run_session(config: &BrowserConfig, url: &str) -> Result<String, FetchError> {
    let started = Instant::now();
    let deadline = started + config.timeout;

    let mut connect = tokio::spawn(open_session(
        config.capabilities(),
        config.webdriver_url.clone(),
    ));
    let client = match timeout_at(deadline, &mut connect).await {
        Ok(Ok(Ok(client))) => client,
        Ok(Ok(Err(e))) => return Err(FetchError::Connect(e.to_string())),
        Ok(Err(e)) => return Err(FetchError::Aborted(e.to_string())),
        Err(_) => {
            // A session that opens after the deadline still gets closed.
            tokio::spawn(async move {
                if let Ok(Ok(client)) = connect.await {
                    tracing::debug!("closing browser session opened after deadline");
                    close_session(client).await;
                }
            });
            return Err(FetchError::Timeout(config.timeout));
        }
    };
    tracing::debug!(webdriver = %config.webdriver_url, "browser session opened");

    let result = match timeout_at(deadline, render(&client, url, config)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(config.timeout)),
    };

    close_session(client).await;

    match &result {
        Ok(html) => log_fetched(url, html, started.elapsed()),
        Err(e) => tracing::warn!(url, error = %e, "page fetch failed"),
    }

    result
}

async fn open_session(caps: Capabilities, webdriver_url: String) -> Result<Client, NewSessionError> {
    let mut builder = ClientBuilder::native();
    builder.capabilities(caps);
    builder.connect(&webdriver_url).await
}

// Full page body goes out at info on every successful fetch.
fn log_fetched(url: &str, html: &str, elapsed: Duration) {
    tracing::info!(url, bytes = html.len(), elapsed = ?elapsed, "fetched page");
    tracing::info!(url, html = %html, "page html");
}

async fn render(client: &Client, url: &str, config: &BrowserConfig) -> Result<String, FetchError> {
    client
        .goto(url)
        .await
        .map_err(|e| FetchError::Navigate(e.to_string()))?;

    settle(client, config).await;

    let root = client
        .find(Locator::Css("html"))
        .await
        .map_err(|e| FetchError::Capture(e.to_string()))?;
    root.html(false)
        .await
        .map_err(|e| FetchError::Capture(e.to_string()))
}

async fn settle(client: &Client, config: &BrowserConfig) {
    match config.settle_mode {
        SettleMode::Fixed => tokio::time::sleep(config.settle_delay).await,
        SettleMode::Selector => {
            let waited = client
                .wait()
                .at_most(config.settle_delay)
                .every(READY_POLL_INTERVAL)
                .for_element(Locator::Css(&config.ready_selector))
                .await;
            if let Err(e) = waited {
                tracing::debug!(error = %e, "ready selector not found, capturing anyway");
            }
        }
    }
}

async fn close_session(client: Client) {
    match timeout(CLOSE_TIMEOUT, client.close()).await {
        Ok(Ok(())) => tracing::debug!("browser session closed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "failed to close browser session"),
        Err(_) => tracing::warn!("timed out closing browser session"),
    }
}
