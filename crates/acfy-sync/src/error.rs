use acfy_adapters::PayloadError;
use acfy_storage::FetchError;
use thiserror::Error;

/// Generated content that does not meet its structural constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("generated content failed validation: {}", violations.join("; "))]
pub struct EnrichmentValidationError {
    pub violations: Vec<String>,
}

impl EnrichmentValidationError {
    pub fn single(violation: impl Into<String>) -> Self {
        Self {
            violations: vec![violation.into()],
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transient fetch failure ({resource}): {source}")]
    TransientFetch {
        resource: String,
        source: FetchError,
    },
    #[error("fatal fetch failure ({resource}): {source}")]
    FatalFetch {
        resource: String,
        source: FetchError,
    },
    #[error(transparent)]
    EnrichmentValidation(#[from] EnrichmentValidationError),
    #[error("persistence failure for {key}: {source}")]
    Persistence { key: String, source: sqlx::Error },
    #[error("invalid payload for {key}: {reason}")]
    InvalidPayload { key: String, reason: String },
    #[error("nothing to process: {what}")]
    EmptyInput { what: String },
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Wraps a fetch error, keeping its transient/fatal classification.
    pub fn fetch(resource: impl Into<String>, source: FetchError) -> Self {
        let resource = resource.into();
        if source.is_transient() {
            Self::TransientFetch { resource, source }
        } else {
            Self::FatalFetch { resource, source }
        }
    }

    pub fn persistence(key: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Persistence {
            key: key.into(),
            source,
        }
    }

    pub fn empty(what: impl Into<String>) -> Self {
        Self::EmptyInput { what: what.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }

    /// Authentication or permission failures end the whole run.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::FatalFetch { source, .. } if source.is_auth_failure())
    }
}

impl From<PayloadError> for SyncError {
    fn from(err: PayloadError) -> Self {
        Self::InvalidPayload {
            key: format!("{} {}", err.what, err.key),
            reason: err.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fatal_with(status: u16) -> FetchError {
        FetchError::Fatal {
            url: "https://api.example".to_string(),
            status: Some(status),
            reason: format!("http status {status}"),
        }
    }

    #[test]
    fn fetch_errors_keep_their_classification() {
        let transient = SyncError::fetch("articles", FetchError::transient("u", "timed out"));
        assert!(transient.is_transient());
        assert!(!transient.is_auth_failure());

        let auth = SyncError::fetch("articles", fatal_with(401));
        assert!(!auth.is_transient());
        assert!(auth.is_auth_failure());

        let not_found = SyncError::fetch("articles", fatal_with(404));
        assert!(!not_found.is_auth_failure());
    }

    #[test]
    fn validation_errors_list_every_violation() {
        let err = SyncError::from(EnrichmentValidationError {
            violations: vec!["headline 2 is 41 characters".into(), "descriptions is empty".into()],
        });
        let text = err.to_string();
        assert!(text.contains("headline 2"));
        assert!(text.contains("descriptions is empty"));
    }
}
