use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::extract::SelectorSet;
use crate::fetch::{BrowserConfig, SettleMode};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SETTLE_SECS: u64 = 5;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub browser: BrowserConfig,
    pub selectors: SelectorSet,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = SelectorSet::default();
        let selectors = SelectorSet {
            text_block: get("SCRAPE_TEXT_SELECTOR").unwrap_or(defaults.text_block),
            content: get("SCRAPE_CONTENT_SELECTOR").unwrap_or(defaults.content),
            container: get("SCRAPE_CONTAINER_SELECTOR").unwrap_or(defaults.container),
            account: get("SCRAPE_ACCOUNT").unwrap_or(defaults.account),
        };

        let webdriver_url =
            get("WEBDRIVER_URL").unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string());
        Url::parse(&webdriver_url)
            .with_context(|| format!("WEBDRIVER_URL `{}` is not a valid URL", webdriver_url))?;

        let browser = BrowserConfig {
            webdriver_url,
            headless: parse_bool(&get, "BROWSER_HEADLESS", true)?,
            timeout: Duration::from_secs(parse_or(&get, "FETCH_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
            settle_delay: Duration::from_secs(parse_or(&get, "SETTLE_DELAY_SECS", DEFAULT_SETTLE_SECS)?),
            settle_mode: match get("SETTLE_MODE") {
                Some(raw) => raw.parse::<SettleMode>().map_err(|e| anyhow!("SETTLE_MODE: {}", e))?,
                None => SettleMode::Fixed,
            },
            ready_selector: selectors.text_block.clone(),
        };
        if browser.timeout.is_zero() {
            return Err(anyhow!("FETCH_TIMEOUT_SECS must be greater than zero"));
        }

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?,
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            browser,
            selectors,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be valid, got `{}`", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("{} must be a boolean, got `{}`", key, v)),
        },
    }
}
