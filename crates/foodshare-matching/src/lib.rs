//! Matching engine for community food sharing.
//!
//! [`MatchingEngine`] scores offers against a request on eight criteria,
//! ranks them, searches for multi-party trade loops and records outcomes.
//! Every external dependency (AI delegate, mesh signal, trust policy, error
//! reporter, history archive) is a pluggable seam with a working default.

mod config;
mod criteria;
mod distance;
mod engine;
mod error;
mod hooks;
mod report;
mod trade_loops;

pub use config::{CriterionWeights, MatchingConfig, TradeLoopBudget, TrustPolicyKind};
pub use criteria::{
    clamp_score, community_factors, community_impact_score, composite_total, days_until,
    food_groups, location_score, match_type_score, mentions_seasonal_food, nutritional_score,
    seasonal_score, trust_score, urgency_score, value_score, CommunityFactors, CriterionScore,
};
pub use distance::{distance_between, haversine_km, EARTH_RADIUS_KM};
pub use engine::{MatchingEngine, ValueObservation};
pub use error::{ErrorReporter, MatchError, TracingErrorReporter};
pub use hooks::{ConstantMeshSignal, MeshSignal, OutcomeTrustPolicy, StaticTrustPolicy, TrustPolicy};
pub use report::{render_brief, write_match_report, MatchRun};
pub use trade_loops::{closes_loop, LoopCandidate, TradeLoopFinder};

pub const CRATE_NAME: &str = "foodshare-matching";
