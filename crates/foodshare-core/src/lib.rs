//! Core domain model for community food-share matching.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "foodshare-core";

/// Zone label that marks a requester as living in a food desert.
pub const FOOD_DESERT_ZONE: &str = "food-desert";

/// Trust score assumed for a user with no recorded history (0-10 scale).
pub const DEFAULT_TRUST_SCORE: f64 = 5.0;
pub const MAX_TRUST_SCORE: f64 = 10.0;

/// Value assumed for a listing when neither the lister nor a delegate supplied one.
pub const DEFAULT_ITEM_VALUE: f64 = 5.0;

const MATCH_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_0b3e_94d2_4d7a_8a51_2f0e_9c44_7b10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("listing id must not be empty")]
    EmptyListingId,
    #[error("user id must not be empty")]
    EmptyUserId,
    #[error("unknown urgency label `{0}`")]
    UnknownUrgency(String),
}

/// Geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and inside the latitude/longitude ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Critical,
    High,
    #[default]
    Normal,
    Optional,
}

impl Urgency {
    pub fn level(self) -> u8 {
        match self {
            Urgency::Critical => 4,
            Urgency::High => 3,
            Urgency::Normal => 2,
            Urgency::Optional => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Critical => "critical",
            Urgency::High => "high",
            Urgency::Normal => "normal",
            Urgency::Optional => "optional",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Urgency::Critical),
            "high" => Ok(Urgency::High),
            "normal" | "medium" => Ok(Urgency::Normal),
            "optional" | "low" => Ok(Urgency::Optional),
            other => Err(ModelError::UnknownUrgency(other.to_string())),
        }
    }
}

/// A community member as seen by the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    /// Public 0-5 star rating.
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub community_rating: Option<f64>,
    /// Categories this user is looking for; closes trade loops.
    #[serde(default)]
    pub needs: Vec<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rating: None,
            community_rating: None,
            needs: Vec::new(),
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_community_rating(mut self, rating: f64) -> Self {
        self.community_rating = Some(rating);
        self
    }

    pub fn with_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = needs.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.trim().is_empty() {
            return Err(ModelError::EmptyUserId);
        }
        Ok(())
    }
}

/// An offer or a request. Everything but `id` and `category` is optional and
/// falls back to a documented default at scoring time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    #[serde(rename = "type")]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub zone_type: Option<String>,
    #[serde(default)]
    pub estimated_value: Option<f64>,
    #[serde(default)]
    pub user_estimated_value: Option<f64>,
    #[serde(default)]
    pub urgency: Option<Urgency>,
    #[serde(default)]
    pub need_by_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<User>,
    /// Categories the lister can hand over in exchange.
    #[serde(default)]
    pub trade_items: Vec<String>,
}

impl Listing {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            description: String::new(),
            location: None,
            zone_type: None,
            estimated_value: None,
            user_estimated_value: None,
            urgency: None,
            need_by_date: None,
            quantity: None,
            expiry_date: None,
            user: None,
            trade_items: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.location = Some(GeoPoint::new(lat, lon));
        self
    }

    pub fn with_zone_type(mut self, zone: impl Into<String>) -> Self {
        self.zone_type = Some(zone.into());
        self
    }

    pub fn with_estimated_value(mut self, value: f64) -> Self {
        self.estimated_value = Some(value);
        self
    }

    pub fn with_user_estimated_value(mut self, value: f64) -> Self {
        self.user_estimated_value = Some(value);
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn with_need_by_date(mut self, at: DateTime<Utc>) -> Self {
        self.need_by_date = Some(at);
        self
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_expiry_date(mut self, at: DateTime<Utc>) -> Self {
        self.expiry_date = Some(at);
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_trade_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trade_items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.trim().is_empty() {
            return Err(ModelError::EmptyListingId);
        }
        if let Some(user) = &self.user {
            user.validate()?;
        }
        Ok(())
    }

    /// Explicit value, preferring the listing's own estimate over the user's guess.
    /// Unusable numbers (negative, NaN, infinite) on either field are skipped.
    pub fn declared_value(&self) -> Option<f64> {
        let usable = |v: &f64| v.is_finite() && *v >= 0.0;
        self.estimated_value
            .filter(usable)
            .or(self.user_estimated_value.filter(usable))
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Offer and request share a category.
    Direct,
    /// Different categories; only reachable through a trade loop.
    LoopCandidate,
}

impl MatchKind {
    pub fn label(self) -> &'static str {
        match self {
            MatchKind::Direct => "Direct Trade",
            MatchKind::LoopCandidate => "Loop Trade Candidate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrigin {
    #[default]
    Traditional,
    Delegate,
}

/// Per-criterion scores. Seasonal, nutritional and community live on 0-1,
/// the rest on 0-10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MatchScores {
    pub location: f64,
    pub urgency: f64,
    pub value: f64,
    pub trust: f64,
    pub seasonal: f64,
    pub nutritional: f64,
    pub community: f64,
    pub match_type: f64,
    pub total: f64,
}

/// Human-readable "why this match" notes, one per criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MatchInsights {
    pub location: String,
    pub urgency: String,
    pub value: String,
    pub trust: String,
    pub seasonal: String,
    pub nutritional: String,
    pub community: String,
    pub match_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub request_id: String,
    #[serde(default)]
    pub requester_id: Option<String>,
    pub offer: Listing,
    pub scores: MatchScores,
    #[serde(rename = "type")]
    pub kind: MatchKind,
    pub insights: MatchInsights,
    #[serde(default)]
    pub origin: MatchOrigin,
}

impl Match {
    /// Stable id for an (request, offer) pair.
    pub fn derive_id(request_id: &str, offer_id: &str) -> String {
        Uuid::new_v5(
            &MATCH_ID_NAMESPACE,
            format!("{request_id}:{offer_id}").as_bytes(),
        )
        .to_string()
    }

    /// Users whose trust is affected by this match's outcome.
    pub fn party_ids(&self) -> Vec<&str> {
        let mut ids = Vec::with_capacity(2);
        if let Some(id) = self.offer.user_id() {
            ids.push(id);
        }
        if let Some(id) = self.requester_id.as_deref() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub success: bool,
    /// 0-5 stars given by the requester.
    pub rating: f64,
    #[serde(default)]
    pub feedback: String,
}

/// Immutable record of what happened to a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchHistoryEntry {
    pub match_id: String,
    #[serde(rename = "match")]
    pub matched: Match,
    pub outcome: MatchOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// One hop of a trade loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLink {
    pub offer_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub category: String,
    pub value: f64,
    /// Value-match score against the previous hop.
    pub value_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLoop {
    pub id: String,
    pub request_id: String,
    pub links: Vec<TradeLink>,
}

impl TradeLoop {
    pub fn new(request_id: impl Into<String>, links: Vec<TradeLink>) -> Self {
        let request_id = request_id.into();
        let chain = links
            .iter()
            .map(|l| l.offer_id.as_str())
            .collect::<Vec<_>>()
            .join(">");
        let id = Uuid::new_v5(
            &MATCH_ID_NAMESPACE,
            format!("loop:{request_id}:{chain}").as_bytes(),
        )
        .to_string();
        Self {
            id,
            request_id,
            links,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Entry of a ranked result list: scored pairs first, trade loops appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RankedMatch {
    Direct(Match),
    TradeLoop(TradeLoop),
}

impl RankedMatch {
    pub fn as_match(&self) -> Option<&Match> {
        match self {
            RankedMatch::Direct(m) => Some(m),
            RankedMatch::TradeLoop(_) => None,
        }
    }

    pub fn as_trade_loop(&self) -> Option<&TradeLoop> {
        match self {
            RankedMatch::Direct(_) => None,
            RankedMatch::TradeLoop(l) => Some(l),
        }
    }
}
