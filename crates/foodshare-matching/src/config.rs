use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::MatchError;

/// Weights of the composite score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriterionWeights {
    pub location: f64,
    pub urgency: f64,
    pub value: f64,
    pub trust: f64,
    pub seasonal: f64,
    pub nutritional: f64,
    pub community: f64,
    pub match_type: f64,
}

impl Default for CriterionWeights {
    fn default() -> Self {
        Self {
            location: 0.20,
            urgency: 0.20,
            value: 0.15,
            trust: 0.15,
            seasonal: 0.10,
            nutritional: 0.10,
            community: 0.05,
            match_type: 0.05,
        }
    }
}

impl CriterionWeights {
    fn as_array(&self) -> [(&'static str, f64); 8] {
        [
            ("location", self.location),
            ("urgency", self.urgency),
            ("value", self.value),
            ("trust", self.trust),
            ("seasonal", self.seasonal),
            ("nutritional", self.nutritional),
            ("community", self.community),
            ("match_type", self.match_type),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.as_array().iter().map(|(_, w)| w).sum()
    }
}

/// Bounds on the exponential trade-loop search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeLoopBudget {
    pub max_depth: usize,
    /// Offers beyond this many are not considered as loop hops.
    pub max_pool: usize,
    /// Search stops once this many loops are recorded.
    pub max_loops: usize,
    /// A hop is accepted only when its value-match score exceeds this.
    pub value_threshold: f64,
}

impl Default for TradeLoopBudget {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pool: 64,
            max_loops: 32,
            value_threshold: 7.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrustPolicyKind {
    /// Outcomes never move trust scores.
    #[default]
    Static,
    /// Successful trades raise trust, failures lower it.
    Outcome,
}

impl std::str::FromStr for TrustPolicyKind {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(TrustPolicyKind::Static),
            "outcome" => Ok(TrustPolicyKind::Outcome),
            other => Err(MatchError::InvalidConfig(format!(
                "unknown trust policy `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: CriterionWeights,
    /// Offers farther than this from the request are never scored.
    pub max_distance_km: f64,
    /// Distance within which the location score takes no penalty.
    pub nearby_radius_km: f64,
    /// Mesh bonus used when the mesh signal fails.
    pub mesh_default_bonus: f64,
    /// Rescale the 0-1 criteria (seasonal, nutritional, community) to 0-10
    /// before weighting. Off by default to keep the historical totals.
    pub normalize_unit_criteria: bool,
    pub trade_loops: TradeLoopBudget,
    pub trust_policy: TrustPolicyKind,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: CriterionWeights::default(),
            max_distance_km: 50.0,
            nearby_radius_km: 5.0,
            mesh_default_bonus: 1.0,
            normalize_unit_criteria: false,
            trade_loops: TradeLoopBudget::default(),
            trust_policy: TrustPolicyKind::default(),
        }
    }
}

impl MatchingConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("parsing matching config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// `FOODSHARE_CONFIG` (YAML) first, then individual `FOODSHARE_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("FOODSHARE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };

        if let Some(v) = env_parse::<f64>("FOODSHARE_MAX_DISTANCE_KM") {
            config.max_distance_km = v;
        }
        if let Some(v) = env_parse::<usize>("FOODSHARE_LOOP_MAX_DEPTH") {
            config.trade_loops.max_depth = v;
        }
        if let Some(v) = env_parse::<usize>("FOODSHARE_LOOP_MAX_POOL") {
            config.trade_loops.max_pool = v;
        }
        if let Ok(v) = std::env::var("FOODSHARE_NORMALIZE_UNIT_CRITERIA") {
            config.normalize_unit_criteria = matches!(v.as_str(), "1" | "true" | "TRUE" | "True");
        }
        if let Ok(v) = std::env::var("FOODSHARE_TRUST_POLICY") {
            config.trust_policy = v.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        for (name, weight) in self.weights.as_array() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(MatchError::InvalidConfig(format!(
                    "weight `{name}` must be a non-negative number"
                )));
            }
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(MatchError::InvalidConfig(format!(
                "weights must sum to 1.0 (got {sum})"
            )));
        }
        if !(self.max_distance_km.is_finite() && self.max_distance_km > 0.0) {
            return Err(MatchError::InvalidConfig(
                "max_distance_km must be greater than zero".into(),
            ));
        }
        if !(self.nearby_radius_km.is_finite() && self.nearby_radius_km >= 0.0) {
            return Err(MatchError::InvalidConfig(
                "nearby_radius_km must be >= 0".into(),
            ));
        }
        if !self.mesh_default_bonus.is_finite() {
            return Err(MatchError::InvalidConfig(
                "mesh_default_bonus must be finite".into(),
            ));
        }
        if !(0.0..=10.0).contains(&self.trade_loops.value_threshold) {
            return Err(MatchError::InvalidConfig(
                "trade_loops.value_threshold must be within 0..=10".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
