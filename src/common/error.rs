use thiserror::Error;

/// Every failure the pipeline can report.
///
/// Adapter failures (`SourceUnavailable`, `AuthenticationError`, `MalformedResponse`)
/// abort one fetch; normalization failures (`UnresolvableUnit`, `UnresolvableTimezone`)
/// drop one record; `PersistenceError` aborts one write and is always surfaced.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("source unavailable ({provider}): {message}")]
    SourceUnavailable { provider: String, message: String },

    #[error("authentication failed ({provider}): {message}")]
    AuthenticationError { provider: String, message: String },

    #[error("malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("unresolvable unit '{unit}' for location {location}")]
    UnresolvableUnit { location: String, unit: String },

    #[error("unresolvable timezone for location {location}: {message}")]
    UnresolvableTimezone { location: String, message: String },

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("batch cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn unavailable(provider: &str, message: impl Into<String>) -> Self {
        PipelineError::SourceUnavailable {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn auth(provider: &str, message: impl Into<String>) -> Self {
        PipelineError::AuthenticationError {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(provider: &str, message: impl Into<String>) -> Self {
        PipelineError::MalformedResponse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn timezone(location: &str, message: impl Into<String>) -> Self {
        PipelineError::UnresolvableTimezone {
            location: location.to_string(),
            message: message.into(),
        }
    }

    /// Short, stable label used for metrics and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable { .. } => "source_unavailable",
            PipelineError::AuthenticationError { .. } => "authentication_error",
            PipelineError::MalformedResponse { .. } => "malformed_response",
            PipelineError::UnresolvableUnit { .. } => "unresolvable_unit",
            PipelineError::UnresolvableTimezone { .. } => "unresolvable_timezone",
            PipelineError::PersistenceError(_) => "persistence_error",
            PipelineError::Config(_) => "config",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::PersistenceError(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
