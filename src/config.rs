use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::deriv::ws::SessionConfig;
use crate::model::window::DEFAULT_WINDOW_CAPACITY;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const DEFAULT_SYMBOL: &str = "R_100";

/// Synthetic markets that stream ticks around the clock.
pub const KNOWN_SYMBOLS: &[(&str, &str)] = &[
    ("R_10", "Volatility 10 Index"),
    ("1HZ10V", "Volatility 10 (1s) Index"),
    ("R_25", "Volatility 25 Index"),
    ("1HZ25V", "Volatility 25 (1s) Index"),
    ("R_50", "Volatility 50 Index"),
    ("1HZ50V", "Volatility 50 (1s) Index"),
    ("R_75", "Volatility 75 Index"),
    ("1HZ75V", "Volatility 75 (1s) Index"),
    ("R_100", "Volatility 100 Index"),
    ("1HZ100V", "Volatility 100 (1s) Index"),
    ("JD10", "Jump 10 Index"),
    ("JD25", "Jump 25 Index"),
    ("JD50", "Jump 50 Index"),
    ("JD100", "Jump 100 Index"),
    ("RDBEAR", "Bear Market Index"),
    ("RDBULL", "Bull Market Index"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub deriv: DerivConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DerivConfig {
    pub ws_base_url: String,
    pub app_id: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Rolling window capacity, also the history length requested on subscribe.
    #[serde(default = "default_tick_count")]
    pub tick_count: usize,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// 0 disables the timeout on correlated calls.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(skip)]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub reference_digit: Option<u8>,
    #[serde(default = "default_recent_digits")]
    pub recent_digits: usize,
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            reference_digit: None,
            recent_digits: default_recent_digits(),
            report_interval_ms: default_report_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_symbol() -> String {
    DEFAULT_SYMBOL.to_string()
}

fn default_symbols() -> Vec<String> {
    KNOWN_SYMBOLS.iter().map(|(s, _)| s.to_string()).collect()
}

fn default_tick_count() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_recent_digits() -> usize {
    50
}

fn default_report_interval_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DerivConfig {
    /// Websocket endpoint with the application id attached as a query parameter.
    pub fn ws_url(&self) -> Result<String> {
        let mut url = url::Url::parse(self.ws_base_url.trim())
            .with_context(|| format!("invalid deriv.ws_base_url '{}'", self.ws_base_url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!(
                "invalid deriv.ws_base_url '{}': scheme must be ws or wss",
                self.ws_base_url
            );
        }
        url.query_pairs_mut()
            .append_pair("app_id", self.app_id.trim());
        Ok(url.to_string())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            url: self.ws_url()?,
            reconnect_delay: self.reconnect_delay(),
            ping_interval: self.ping_interval(),
        })
    }

    /// Primary symbol first, then the configured list, trimmed and deduplicated.
    pub fn tradable_symbols(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.symbol.trim().is_empty() {
            out.push(self.symbol.trim().to_string());
        }
        for sym in &self.symbols {
            let s = sym.trim();
            if !s.is_empty() && !out.iter().any(|v| v == s) {
                out.push(s.to_string());
            }
        }
        out
    }
}

pub fn symbol_label(symbol: &str) -> Option<&'static str> {
    KNOWN_SYMBOLS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, label)| *label)
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))?;
        config.deriv.api_token = std::env::var("DERIV_API_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.deriv.symbol.trim().is_empty() {
            bail!("deriv.symbol must not be empty");
        }
        if self.deriv.tick_count == 0 {
            bail!("deriv.tick_count must be > 0");
        }
        if self.deriv.ping_interval_secs == 0 {
            bail!("deriv.ping_interval_secs must be > 0");
        }
        if self.deriv.app_id.trim().is_empty() {
            bail!("deriv.app_id must not be empty");
        }
        if let Some(digit) = self.analysis.reference_digit {
            if digit > 9 {
                bail!("analysis.reference_digit must be 0..=9, got {}", digit);
            }
        }
        self.deriv.ws_url().context("deriv.ws_base_url is invalid")?;
        Ok(())
    }
}
