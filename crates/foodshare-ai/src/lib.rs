//! AI delegate contracts + rule-based and HTTP-backed delegate implementations.

use async_trait::async_trait;
use foodshare_core::{Listing, Match, MatchOutcome, Urgency};
use thiserror::Error;

mod http;
mod rules;

pub use http::{is_retryable_status, BackoffPolicy, HttpAiConfig, HttpAiDelegate};
pub use rules::{KeywordRulesDelegate, UrgencyRule, ValueModifier, ValueRules};

pub const CRATE_NAME: &str = "foodshare-ai";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DelegateError {
    /// The delegate does not implement this capability.
    #[error("capability `{0}` not available")]
    Unsupported(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid delegate response: {0}")]
    InvalidResponse(String),
}

impl DelegateError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, DelegateError::Unsupported(_))
    }
}

/// Pluggable model capability consulted by the matching engine.
///
/// Every method has a default body returning [`DelegateError::Unsupported`],
/// so an implementation only overrides what it can actually do. Callers treat
/// `Unsupported` as "not available" and substitute their documented default.
#[async_trait]
pub trait AiDelegate: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify_urgency(&self, _description: &str) -> Result<Urgency, DelegateError> {
        Err(DelegateError::Unsupported("classify_urgency"))
    }

    async fn estimate_value(&self, _item: &Listing) -> Result<f64, DelegateError> {
        Err(DelegateError::Unsupported("estimate_value"))
    }

    async fn learn_from_outcome(
        &self,
        _matched: &Match,
        _outcome: &MatchOutcome,
    ) -> Result<(), DelegateError> {
        Err(DelegateError::Unsupported("learn_from_outcome"))
    }

    /// Preferred ranking path. An empty list means "no opinion".
    async fn rank_matches(
        &self,
        _request: &Listing,
        _offers: &[Listing],
    ) -> Result<Vec<Match>, DelegateError> {
        Err(DelegateError::Unsupported("rank_matches"))
    }
}

/// Delegate with no capabilities at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAiDelegate;

#[async_trait]
impl AiDelegate for NoopAiDelegate {
    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_delegate_reports_every_capability_as_unsupported() {
        let delegate = NoopAiDelegate;
        let listing = Listing::new("offer-1", "produce");

        let err = delegate.classify_urgency("need it today").await.unwrap_err();
        assert!(err.is_unsupported());
        let err = delegate.estimate_value(&listing).await.unwrap_err();
        assert_eq!(err, DelegateError::Unsupported("estimate_value"));
        let err = delegate
            .rank_matches(&listing, std::slice::from_ref(&listing))
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn transport_errors_are_not_unsupported() {
        assert!(!DelegateError::Transport("reset".into()).is_unsupported());
    }
}
