//! Error types for forecast loading

use crate::models::Horizon;

/// Result type alias for forecast operations
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors surfaced by the primary data paths.
///
/// Supplementary paths (return periods, medium-range enhancement, reverse
/// geocoding) never return these past their own boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForecastError {
    /// The request exceeded its timeout tier
    #[error("Request timed out: {url}")]
    Timeout { url: String },

    /// Connection or transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream returned a 5xx status
    #[error("Service unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    /// Upstream returned 404 for required data
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Any other non-success status
    #[error("Request failed with status: {status}")]
    Http { status: u16 },

    /// Response body did not have the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The configured base URL cannot carry the request path
    #[error("Invalid request URL: {url}")]
    InvalidUrl { url: String },

    /// Every requested forecast horizon failed
    #[error("All forecast horizons failed: {}", describe_failures(.errors))]
    AllHorizonsFailed { errors: Vec<(Horizon, ForecastError)> },
}

impl ForecastError {
    /// Create a malformed-data error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Whether a retry might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network(_) | Self::Unavailable { .. } => true,
            Self::AllHorizonsFailed { errors } => errors.iter().any(|(_, e)| e.is_retryable()),
            Self::NotFound { .. } | Self::Http { .. } | Self::Malformed(_) | Self::InvalidUrl { .. } => {
                false
            }
        }
    }

    /// Message suitable for showing to a user next to a retry affordance
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout { .. } => {
                "The forecast service is taking too long to respond. Please try again.".to_string()
            }
            Self::Network(_) => {
                "Unable to reach the forecast service. Check your connection and try again."
                    .to_string()
            }
            Self::Unavailable { .. } => {
                "The forecast service is temporarily unavailable. Please try again later."
                    .to_string()
            }
            Self::NotFound { what } => format!("No data is available for {}.", what),
            Self::Http { status } => format!("The forecast service returned an error ({}).", status),
            Self::Malformed(_) => "The forecast service returned unexpected data.".to_string(),
            Self::InvalidUrl { .. } => {
                "The forecast service address is misconfigured.".to_string()
            }
            Self::AllHorizonsFailed { .. } => {
                "No forecast data could be loaded for this river. Please try again.".to_string()
            }
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

fn describe_failures(errors: &[(Horizon, ForecastError)]) -> String {
    errors
        .iter()
        .map(|(horizon, e)| format!("{}: {}", horizon, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure to convert a series between units
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("Unrecognized source unit: {0}")]
    UnrecognizedUnit(String),
}

/// Failures inside the reach cache. Always absorbed by `ReachCache`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
