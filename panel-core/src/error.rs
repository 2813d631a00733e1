use thiserror::Error;

/// Core error type for the panel clients.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Blank user input; raised before any request is issued.
    #[error("{field} must not be empty")]
    EmptyInput { field: &'static str },

    #[error("rate limited by {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("{endpoint} is unavailable")]
    Unavailable { endpoint: String },

    #[error("upstream error from {endpoint}: {code} {message}")]
    Upstream {
        endpoint: String,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PanelError {
    /// True for network and HTTP-status failures, the only errors that end a session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Unavailable { .. } | Self::Upstream { .. }
        )
    }

    /// Short machine-friendly label, used for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::EmptyInput { .. } => "empty_input",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable { .. } => "unavailable",
            Self::Upstream { .. } => "upstream",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, PanelError>;
