//! Error types for Waypoint

use thiserror::Error;

/// Result type alias using Waypoint's Error
pub type Result<T> = std::result::Result<T, Error>;

/// How the retry helper should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient failure; the operation may succeed if attempted again
    Retryable,
    /// Retrying cannot help; surface immediately
    Fatal,
}

/// Waypoint error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Guideline '{0}' not found.")]
    GuidelineNotFound(String),

    #[error("Relationship '{0}' not found.")]
    RelationshipNotFound(String),

    #[error("Journey '{0}' not found.")]
    JourneyNotFound(String),

    #[error("Tag '{0}' not found.")]
    TagNotFound(String),

    // Oracle transport errors (E100-E199)
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Oracle timed out after {0} seconds")]
    OracleTimeout(u64),

    // Schema errors (E200-E299)
    #[error("Oracle output does not match schema '{schema}': {message}")]
    SchemaValidation {
        schema: String,
        message: String,
        raw: String,
    },

    // Matching errors (E300-E399)
    #[error("Batch '{batch}' failed after {attempts} attempt(s): {source}")]
    BatchFailed {
        batch: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid journey: {0}")]
    InvalidJourney(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::GuidelineNotFound(_) => "E001",
            Self::RelationshipNotFound(_) => "E002",
            Self::JourneyNotFound(_) => "E003",
            Self::TagNotFound(_) => "E004",
            Self::OracleUnavailable(_) => "E100",
            Self::RateLimited(_) => "E101",
            Self::OracleTimeout(_) => "E102",
            Self::SchemaValidation { .. } => "E200",
            Self::BatchFailed { .. } => "E300",
            Self::InvalidJourney(_) => "E301",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Json(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::OracleUnavailable(_) => Some("Check that the generation backend is reachable".to_string()),
            Self::OracleTimeout(_) => {
                Some("waypoint config set retry.max_attempts <n>".to_string())
            }
            Self::SchemaValidation { schema, .. } => Some(format!(
                "Check that the prompt for '{}' describes the expected output format",
                schema
            )),
            Self::ConfigError(_) => Some("waypoint config list".to_string()),
            _ => None,
        }
    }

    /// Whether a matching cycle should attempt the failed operation again
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::OracleUnavailable(_) | Self::RateLimited(_) | Self::OracleTimeout(_) => {
                ErrorClass::Retryable
            }
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// True for any of the typed not-found errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::GuidelineNotFound(_)
                | Self::RelationshipNotFound(_)
                | Self::JourneyNotFound(_)
                | Self::TagNotFound(_)
        )
    }
}
