// =============================================================================
// Runtime Configuration — capture settings supplied once at start-up
// =============================================================================
//
// Loaded from an optional JSON file, then overridden from the environment
// (`.env` is honoured). After `validate()` the config is frozen behind an
// `Arc` and never mutated again.
//
// All fields carry `#[serde(default)]` so a partial file still loads.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::normalize_symbol;

/// Binance accepts depth limits in this range.
const MIN_DEPTH_LIMIT: u32 = 1;
const MAX_DEPTH_LIMIT: u32 = 5000;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string()]
}

fn default_capture_interval_seconds() -> u64 {
    60
}

fn default_depth_limit() -> u32 {
    100
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_api_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the capture service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbols to sample, upper-cased (e.g. `BTCUSDT`).
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Seconds between two captures of the same symbol.
    #[serde(default = "default_capture_interval_seconds")]
    pub capture_interval_seconds: u64,

    /// Number of depth levels requested per side.
    #[serde(default = "default_depth_limit")]
    pub depth_limit: u32,

    /// Root folder holding `bids/` and `asks/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the REST market-data API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Upper bound on every outbound request.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Address the HTTP surface binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Start capturing as soon as the process boots.
    #[serde(default)]
    pub autostart: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            capture_interval_seconds: default_capture_interval_seconds(),
            depth_limit: default_depth_limit(),
            data_dir: default_data_dir(),
            api_base_url: default_api_base_url(),
            request_timeout_seconds: default_request_timeout_seconds(),
            bind_addr: default_bind_addr(),
            autostart: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error if the file is missing or malformed so the caller can
    /// fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            "config loaded"
        );

        Ok(config)
    }

    /// Apply `HEATMAP_*` overrides through an injectable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("HEATMAP_SYMBOLS") {
            self.symbols = parse_symbols(&raw);
        }
        if let Some(raw) = lookup("HEATMAP_CAPTURE_INTERVAL_SECS") {
            match raw.trim().parse() {
                Ok(secs) => self.capture_interval_seconds = secs,
                Err(_) => warn!(value = %raw, "ignoring invalid HEATMAP_CAPTURE_INTERVAL_SECS"),
            }
        }
        if let Some(raw) = lookup("HEATMAP_DEPTH_LIMIT") {
            match raw.trim().parse() {
                Ok(limit) => self.depth_limit = limit,
                Err(_) => warn!(value = %raw, "ignoring invalid HEATMAP_DEPTH_LIMIT"),
            }
        }
        if let Some(raw) = lookup("HEATMAP_DATA_DIR") {
            self.data_dir = PathBuf::from(raw.trim());
        }
        if let Some(raw) = lookup("HEATMAP_API_BASE_URL") {
            self.api_base_url = raw.trim().trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("HEATMAP_BIND_ADDR") {
            self.bind_addr = raw.trim().to_string();
        }
        if let Some(raw) = lookup("HEATMAP_AUTOSTART") {
            self.autostart = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Normalise and sanity-check the config before it is frozen.
    pub fn validate(mut self) -> Result<Self> {
        let mut symbols = Vec::with_capacity(self.symbols.len());
        for raw in self.symbols.iter().filter(|s| !s.trim().is_empty()) {
            match normalize_symbol(raw) {
                Some(symbol) => symbols.push(symbol),
                None => anyhow::bail!("invalid symbol {raw:?}: expected 1-20 ASCII letters or digits"),
            }
        }
        self.symbols = symbols;
        let mut seen = std::collections::HashSet::new();
        self.symbols.retain(|s| seen.insert(s.clone()));
        if self.symbols.is_empty() {
            anyhow::bail!("at least one symbol must be configured");
        }

        let clamped = self.depth_limit.clamp(MIN_DEPTH_LIMIT, MAX_DEPTH_LIMIT);
        if clamped != self.depth_limit {
            warn!(requested = self.depth_limit, used = clamped, "depth limit clamped");
            self.depth_limit = clamped;
        }

        if self.capture_interval_seconds == 0 {
            warn!("capture interval of 0s raised to 1s");
            self.capture_interval_seconds = 1;
        }
        if self.request_timeout_seconds == 0 {
            self.request_timeout_seconds = default_request_timeout_seconds();
        }

        Ok(self)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Split a comma-separated symbol list, upper-casing and dropping blanks.
fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
