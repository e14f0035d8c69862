use async_trait::async_trait;
use foodshare_core::{Listing, MatchOutcome, MAX_TRUST_SCORE};

use crate::error::MatchError;

/// Local network/connectivity proximity between two listings, added to the
/// location score as a bonus.
#[async_trait]
pub trait MeshSignal: Send + Sync {
    async fn strength(&self, offer: &Listing, request: &Listing) -> Result<f64, MatchError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantMeshSignal(pub f64);

impl Default for ConstantMeshSignal {
    fn default() -> Self {
        Self(1.0)
    }
}

#[async_trait]
impl MeshSignal for ConstantMeshSignal {
    async fn strength(&self, _offer: &Listing, _request: &Listing) -> Result<f64, MatchError> {
        Ok(self.0)
    }
}

/// Moves a user's trust score after a reported outcome.
pub trait TrustPolicy: Send + Sync {
    fn adjust(&self, current: f64, outcome: &MatchOutcome) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StaticTrustPolicy;

impl TrustPolicy for StaticTrustPolicy {
    fn adjust(&self, current: f64, _outcome: &MatchOutcome) -> f64 {
        current
    }
}

/// Success: `+0.5 + 0.1 * rating`. Failure: `-1.0`. Clamped to 0-10.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeTrustPolicy {
    pub success_base: f64,
    pub per_rating_point: f64,
    pub failure_penalty: f64,
}

impl Default for OutcomeTrustPolicy {
    fn default() -> Self {
        Self {
            success_base: 0.5,
            per_rating_point: 0.1,
            failure_penalty: 1.0,
        }
    }
}

impl TrustPolicy for OutcomeTrustPolicy {
    fn adjust(&self, current: f64, outcome: &MatchOutcome) -> f64 {
        let next = if outcome.success {
            let rating = if outcome.rating.is_finite() {
                outcome.rating.clamp(0.0, 5.0)
            } else {
                0.0
            };
            current + self.success_base + self.per_rating_point * rating
        } else {
            current - self.failure_penalty
        };
        next.clamp(0.0, MAX_TRUST_SCORE)
    }
}
