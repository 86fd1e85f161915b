use thiserror::Error;

/// A convenience `Result` alias using [`TaskmeshError`].
pub type TaskmeshResult<T> = Result<T, TaskmeshError>;

/// Substrings that identify a quota or rate-limit rejection in transport errors.
///
/// Providers do not agree on a status code for this, so error text is matched
/// case-insensitively in addition to the status mapping done by the backends.
pub const RATE_LIMIT_MARKERS: &[&str] = &[
    "hourly usage limit",
    "status code: 402",
    "rate limit",
    "too many requests",
];

/// Top-level error type for taskmesh.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum TaskmeshError {
    /// An error raised while driving an agent iteration.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error from an outbound HTTP request to the model collaborator.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The model collaborator reported quota or rate-limit exhaustion.
    ///
    /// This is the one unrecoverable condition: callers must not retry it.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A model call did not finish within its deadline.
    #[error("Model call timed out after {}", format_deadline(*millis))]
    Timeout {
        /// The deadline that elapsed, in milliseconds.
        millis: u64,
    },

    /// An error from the run/agent record store.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An error while writing a report artifact.
    #[error("Report error: {0}")]
    Report(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the orchestration loop itself.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskmeshError {
    /// Returns `true` for failures an iteration can absorb and continue past.
    ///
    /// Timeouts and ordinary transport errors are recoverable; rate limits,
    /// storage and everything else are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TaskmeshError::Timeout { .. } => true,
            TaskmeshError::Http(_) => !is_rate_limited(self),
            _ => false,
        }
    }
}

/// Whole seconds when the deadline is a round number of them, else milliseconds.
fn format_deadline(millis: u64) -> String {
    if millis >= 1000 && millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

/// Determines whether an error signals rate-limit or quota exhaustion.
///
/// Returns `true` for [`TaskmeshError::RateLimited`] and for any other variant
/// whose message carries one of [`RATE_LIMIT_MARKERS`].
pub fn is_rate_limited(err: &TaskmeshError) -> bool {
    if matches!(err, TaskmeshError::RateLimited(_)) {
        return true;
    }
    let lower = err.to_string().to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        assert!(is_rate_limited(&TaskmeshError::RateLimited("402".into())));
        assert!(is_rate_limited(&TaskmeshError::Http(
            "you've reached your hourly usage limit".into()
        )));
        assert!(is_rate_limited(&TaskmeshError::Http(
            "unexpected status code: 402".into()
        )));
        assert!(is_rate_limited(&TaskmeshError::Agent(
            "429 Too Many Requests".into()
        )));

        assert!(!is_rate_limited(&TaskmeshError::Http(
            "500 Internal Server Error".into()
        )));
        assert!(!is_rate_limited(&TaskmeshError::Timeout { millis: 30_000 }));
    }

    #[test]
    fn test_timeout_display() {
        let err = TaskmeshError::Timeout { millis: 300_000 };
        assert_eq!(err.to_string(), "Model call timed out after 300s");
        let err = TaskmeshError::Timeout { millis: 200 };
        assert_eq!(err.to_string(), "Model call timed out after 200ms");
        let err = TaskmeshError::Timeout { millis: 1_500 };
        assert_eq!(err.to_string(), "Model call timed out after 1500ms");
    }

    #[test]
    fn test_recoverable() {
        assert!(TaskmeshError::Timeout { millis: 1_000 }.is_recoverable());
        assert!(TaskmeshError::Http("connection refused".into()).is_recoverable());
        assert!(!TaskmeshError::Http("hourly usage limit".into()).is_recoverable());
        assert!(!TaskmeshError::RateLimited("quota".into()).is_recoverable());
        assert!(!TaskmeshError::Storage("locked".into()).is_recoverable());
    }
}
