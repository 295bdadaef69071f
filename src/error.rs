//! Error types for the sampling core.
//!
//! Configuration problems fail fast and are surfaced to the caller. Missing
//! raw readings are recoverable: the affected measurement is omitted and the
//! next cycle resumes from the untouched baselines.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SamplerError>;

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("Unsupported rate unit '{0}', expected 'second' or 'minute'")]
    UnsupportedRateUnit(String),

    #[error("Invalid rounding: {0} digits (maximum is {max})", max = crate::sampler::MAX_ROUND_DIGITS)]
    InvalidRounding(u32),

    #[error("Data unavailable for {family}: {reason}")]
    DataUnavailable { family: String, reason: String },

    #[error("Invalid sampler state: {0}")]
    State(String),

    #[error("State serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SamplerError {
    /// Shorthand for a [`SamplerError::DataUnavailable`].
    pub fn unavailable(family: impl Into<String>, reason: impl ToString) -> Self {
        SamplerError::DataUnavailable {
            family: family.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that only cost the current reading.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SamplerError::DataUnavailable { .. } | SamplerError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(SamplerError::unavailable("disk", "permission denied").is_recoverable());
        assert!(SamplerError::Io(std::io::Error::other("gone")).is_recoverable());
        assert!(!SamplerError::UnsupportedRateUnit("hour".into()).is_recoverable());
        assert!(!SamplerError::InvalidRounding(40).is_recoverable());
        assert!(!SamplerError::State("bad kind".into()).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let e = SamplerError::unavailable("network", "file absent");
        assert_eq!(e.to_string(), "Data unavailable for network: file absent");

        let e = SamplerError::InvalidRounding(20);
        assert!(e.to_string().contains("20 digits"));
    }
}
