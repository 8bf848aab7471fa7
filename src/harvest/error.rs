//! Error taxonomy for the harvesting engine.
//!
//! Remote failures are classified once, at the boundary that talks to the
//! portal, into a closed set of kinds. Everything downstream (retry policy,
//! identity rotation, the run loop) dispatches on the kind and never on
//! message text.

use thiserror::Error;

use crate::state::StateError;

/// A failed remote call, classified at the call boundary.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The failure matches a known blocking signature (forbidden or
    /// rate-limited status, request timeout, broken proxy tunnel). Never
    /// retried locally; triggers identity rotation instead.
    #[error("request blocked: {context}")]
    Blocked { context: String },

    /// Any other failure: malformed response, momentary network blip.
    /// Safe to retry locally.
    #[error("transient fetch failure: {context}")]
    Transient { context: String },
}

/// HTTP statuses the portal serves when it has decided we are a bot.
const BLOCKED_STATUSES: &[u16] = &[400, 403, 412, 429, 503];

impl FetchError {
    pub fn blocked(context: impl Into<String>) -> Self {
        Self::Blocked {
            context: context.into(),
        }
    }

    pub fn transient(context: impl Into<String>) -> Self {
        Self::Transient {
            context: context.into(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        if BLOCKED_STATUSES.contains(&status) {
            Self::blocked(format!("HTTP {status}"))
        } else {
            Self::transient(format!("HTTP {status}"))
        }
    }

    /// Classify a reqwest transport error. Timeouts and connect failures
    /// (dead proxy tunnels) count as blocking signatures.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16());
        }
        if err.is_timeout() || err.is_connect() {
            Self::blocked(err.to_string())
        } else {
            Self::transient(err.to_string())
        }
    }
}

/// Engine-level failures that abort a segment, dataset or run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A transient failure that survived the whole retry budget.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: FetchError },

    #[error("identity rotation budget exhausted after {rotations} rotations")]
    RotationBudget { rotations: u32 },

    #[error("dataset {dataset} failed: {message}")]
    DatasetFailed { dataset: String, message: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("output write failed: {0}")]
    Output(#[from] std::io::Error),
}

impl HarvestError {
    /// Whether this failure is the kind that a fresh network identity
    /// could plausibly fix.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Fetch(err) if err.is_blocked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(FetchError::from_status(403).is_blocked());
        assert!(FetchError::from_status(412).is_blocked());
        assert!(FetchError::from_status(429).is_blocked());
        assert!(!FetchError::from_status(500).is_blocked());
        assert!(!FetchError::from_status(404).is_blocked());
    }

    #[test]
    fn test_blocking_detection_dispatches_on_kind() {
        let blocked = HarvestError::Fetch(FetchError::blocked("HTTP 403"));
        assert!(blocked.is_blocking());

        // Exhausted retries are always transient by construction; a blocked
        // failure would have short-circuited the retry loop.
        let exhausted = HarvestError::Exhausted {
            attempts: 5,
            source: FetchError::transient("connection reset"),
        };
        assert!(!exhausted.is_blocking());
    }
}
