// =============================================================================
// Error taxonomy
// =============================================================================
//
// Fetch errors are swallowed by the capture loop (retried next cycle). Store
// errors surface to query callers as structured diagnostics. Neither is ever
// allowed to take the process down.
// =============================================================================

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the market-data endpoint.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network failure, timeout, non-success status, or local rate-limit refusal.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The response arrived but is missing or mangles expected fields.
    #[error("upstream protocol error: {0}")]
    UpstreamProtocolError(String),
}

impl FetchError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        FetchError::UpstreamUnavailable(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        FetchError::UpstreamProtocolError(msg.into())
    }

    /// Stable machine-readable kind for JSON diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::UpstreamUnavailable(_) => "upstream_unavailable",
            FetchError::UpstreamProtocolError(_) => "upstream_protocol_error",
        }
    }
}

/// Failures on the snapshot log read/write path.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Symbol is not 1-20 ASCII letters or digits, so it never names a log.
    #[error("invalid symbol {symbol:?}")]
    InvalidSymbol { symbol: String },

    #[error("snapshot log not found: {}", path.display())]
    LogNotFound { path: PathBuf },

    #[error("snapshot log {} has invalid header: expected {expected}, found {found}", path.display())]
    LogSchemaInvalid {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("snapshot log {} is corrupt at line {line}: {message}", path.display())]
    LogCorrupt {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable kind for JSON diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::InvalidSymbol { .. } => "invalid_symbol",
            StoreError::LogNotFound { .. } => "log_not_found",
            StoreError::LogSchemaInvalid { .. } => "log_schema_invalid",
            StoreError::LogCorrupt { .. } => "log_corrupt",
            StoreError::Io { .. } => "io",
        }
    }
}

/// Anything a manual `capture_once` can fail with.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The symbol's scheduled task owns its logs while capture is running.
    #[error("{0} is being captured by the scheduler")]
    SymbolBusy(String),
}

impl CaptureError {
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Fetch(e) => e.kind(),
            CaptureError::Store(e) => e.kind(),
            CaptureError::SymbolBusy(_) => "capture_busy",
        }
    }
}
