use foodshare_ai::DelegateError;
use thiserror::Error;
use tracing::warn;

/// Errors produced by the matching layer. None of these escape `find_matches`;
/// they travel through the [`ErrorReporter`] side channel instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid match request: {0}")]
    InvalidRequest(String),
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
    #[error("listing {listing_id} has invalid coordinates")]
    InvalidCoordinates { listing_id: String },
    #[error("ai delegate failed during {operation}: {source}")]
    Delegate {
        operation: &'static str,
        #[source]
        source: DelegateError,
    },
    #[error("mesh signal unavailable: {0}")]
    Mesh(String),
    #[error("history archive error: {0}")]
    Archive(String),
}

/// Shared side channel for failures the engine absorbs locally.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, operation: &str, error: &MatchError);
}

/// Default reporter: one `warn` event per absorbed failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, operation: &str, error: &MatchError) {
        warn!(operation, error = %error, "matching degraded to fallback");
    }
}
