use thiserror::Error;

/// Failure reported by a progress or catalog store.
///
/// The tracker never surfaces these to the user; they are logged and the
/// caller degrades to a less accurate resume point or a dropped sample.
#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status}{detail}")]
    Status { status: u16, detail: String },

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    pub(crate) fn status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let detail = if body.is_empty() {
            String::new()
        } else {
            format!(" ({})", body.chars().take(240).collect::<String>())
        };
        Self::Status { status, detail }
    }

    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => should_retry_http_status(*status),
            Self::Decode(_) | Self::Database(_) => false,
        }
    }
}

pub(crate) fn should_retry_http_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}
