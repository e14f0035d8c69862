use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use foodshare_ai::{AiDelegate, DelegateError, NoopAiDelegate};
use foodshare_core::{
    Listing, Match, MatchHistoryEntry, MatchInsights, MatchKind, MatchOrigin, MatchOutcome,
    MatchScores, RankedMatch, TradeLoop, Urgency, User, DEFAULT_ITEM_VALUE, DEFAULT_TRUST_SCORE,
    MAX_TRUST_SCORE,
};
use foodshare_storage::HistoryArchive;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{MatchingConfig, TradeLoopBudget, TrustPolicyKind};
use crate::criteria::{
    clamp_score, community_factors, composite_total, days_until, food_groups, location_score,
    match_type_score, mentions_seasonal_food, nutritional_score, seasonal_score, trust_score,
    urgency_score, value_score, CriterionScore,
};
use crate::distance::haversine_km;
use crate::error::{ErrorReporter, MatchError, TracingErrorReporter};
use crate::hooks::{ConstantMeshSignal, MeshSignal, OutcomeTrustPolicy, StaticTrustPolicy, TrustPolicy};
use crate::trade_loops::{LoopCandidate, TradeLoopFinder};

/// Running record of the values seen for one `(offer type, request type)` pair.
///
/// `mean_ratio` averages `offer / request` over observations with a positive
/// request value; the others only update the `last_*` fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValueObservation {
    pub samples: u64,
    pub mean_ratio: f64,
    pub last_offer_value: f64,
    pub last_request_value: f64,
}

impl ValueObservation {
    fn observe(&mut self, offer_value: f64, request_value: f64) {
        self.last_offer_value = offer_value;
        self.last_request_value = request_value;
        if request_value > 0.0 {
            self.samples += 1;
            let ratio = offer_value / request_value;
            self.mean_ratio += (ratio - self.mean_ratio) / self.samples as f64;
        }
    }
}

type PairKey = (String, String);

/// Scores offers against requests, finds trade loops and records outcomes.
///
/// The trust, value-equivalency and history maps live behind async `RwLock`s
/// so one engine can be shared (`Arc<MatchingEngine>`) across request
/// handlers without lost updates.
pub struct MatchingEngine {
    config: MatchingConfig,
    delegate: Arc<dyn AiDelegate>,
    mesh: Arc<dyn MeshSignal>,
    trust_policy: Arc<dyn TrustPolicy>,
    reporter: Arc<dyn ErrorReporter>,
    archive: Option<HistoryArchive>,
    trust_scores: RwLock<HashMap<String, f64>>,
    value_equivalency: RwLock<HashMap<PairKey, ValueObservation>>,
    match_history: RwLock<HashMap<String, MatchHistoryEntry>>,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::from_valid_config(MatchingConfig::default())
    }
}

impl MatchingEngine {
    pub fn new(config: MatchingConfig) -> Result<Self, MatchError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: MatchingConfig) -> Self {
        let trust_policy: Arc<dyn TrustPolicy> = match config.trust_policy {
            TrustPolicyKind::Static => Arc::new(StaticTrustPolicy),
            TrustPolicyKind::Outcome => Arc::new(OutcomeTrustPolicy::default()),
        };
        Self {
            config,
            delegate: Arc::new(NoopAiDelegate),
            mesh: Arc::new(ConstantMeshSignal::default()),
            trust_policy,
            reporter: Arc::new(TracingErrorReporter),
            archive: None,
            trust_scores: RwLock::new(HashMap::new()),
            value_equivalency: RwLock::new(HashMap::new()),
            match_history: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn AiDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_mesh_signal(mut self, mesh: Arc<dyn MeshSignal>) -> Self {
        self.mesh = mesh;
        self
    }

    pub fn with_trust_policy(mut self, policy: Arc<dyn TrustPolicy>) -> Self {
        self.trust_policy = policy;
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_history_archive(mut self, archive: HistoryArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn delegate_name(&self) -> &'static str {
        self.delegate.name()
    }

    fn report(&self, operation: &str, error: &MatchError) {
        self.reporter.report(operation, error);
    }

    fn absorb(&self, operation: &str, score: CriterionScore) -> CriterionScore {
        for diagnostic in &score.diagnostics {
            self.report(operation, diagnostic);
        }
        score
    }

    /// `Unsupported` collapses to `None` silently; real failures become diagnostics.
    fn delegate_failure(operation: &'static str, err: DelegateError) -> Option<MatchError> {
        if err.is_unsupported() {
            None
        } else {
            Some(MatchError::Delegate {
                operation,
                source: err,
            })
        }
    }

    /// Any fallback taken is also sent to the error reporter.
    pub async fn evaluate_location_match(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        self.absorb("location", self.location_criterion(offer, request).await)
    }

    pub async fn evaluate_urgency_match(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        self.absorb("urgency", self.urgency_criterion(offer, request).await)
    }

    pub async fn evaluate_value_match(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        self.absorb("value", self.value_criterion(offer, request).await)
    }

    async fn location_criterion(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        let (Some(a), Some(b)) = (offer.location.as_ref(), request.location.as_ref()) else {
            return CriterionScore::new(0.0, "location unknown");
        };

        let mut diagnostics = Vec::new();
        for (listing, point) in [(offer, a), (request, b)] {
            if !point.is_valid() {
                diagnostics.push(MatchError::InvalidCoordinates {
                    listing_id: listing.id.clone(),
                });
            }
        }
        if !diagnostics.is_empty() {
            return CriterionScore::new(0.0, "invalid coordinates").with_diagnostics(diagnostics);
        }

        let distance = haversine_km(a, b);
        let same_zone = matches!(
            (offer.zone_type.as_deref(), request.zone_type.as_deref()),
            (Some(x), Some(y)) if x == y
        );
        let mesh_bonus = match self.mesh.strength(offer, request).await {
            Ok(bonus) if bonus.is_finite() => bonus,
            Ok(bonus) => {
                diagnostics.push(MatchError::Mesh(format!("non-finite mesh strength {bonus}")));
                self.config.mesh_default_bonus
            }
            Err(err) => {
                diagnostics.push(err);
                self.config.mesh_default_bonus
            }
        };

        let score = location_score(distance, same_zone, mesh_bonus, self.config.nearby_radius_km);
        let insight = if same_zone {
            format!("{distance:.1} km apart, same zone")
        } else {
            format!("{distance:.1} km apart")
        };
        CriterionScore::new(score, insight).with_diagnostics(diagnostics)
    }

    /// Explicit urgency wins; otherwise the delegate classifies the description.
    pub async fn resolve_urgency(&self, request: &Listing) -> (Urgency, Option<MatchError>) {
        if let Some(urgency) = request.urgency {
            return (urgency, None);
        }
        if request.description.trim().is_empty() {
            return (Urgency::default(), None);
        }
        match self.delegate.classify_urgency(&request.description).await {
            Ok(urgency) => (urgency, None),
            Err(err) => (Urgency::default(), Self::delegate_failure("classify_urgency", err)),
        }
    }

    async fn urgency_criterion(&self, _offer: &Listing, request: &Listing) -> CriterionScore {
        let (urgency, failure) = self.resolve_urgency(request).await;
        let days = request.need_by_date.map(|at| days_until(at, Utc::now()));
        let score = urgency_score(urgency, days);
        let insight = match days {
            Some(d) if d > 0.0 => format!("{urgency} urgency, needed in {d:.0} days"),
            Some(_) => format!("{urgency} urgency, due now"),
            None => format!("{urgency} urgency"),
        };
        CriterionScore::new(score, insight).with_diagnostics(failure.into_iter().collect())
    }

    /// Declared value, then the delegate's estimate, then [`DEFAULT_ITEM_VALUE`].
    pub async fn resolve_value(&self, item: &Listing) -> (f64, Option<MatchError>) {
        if let Some(value) = item.declared_value() {
            return (value, None);
        }
        match self.delegate.estimate_value(item).await {
            Ok(value) if value.is_finite() && value >= 0.0 => (value, None),
            Ok(value) => (
                DEFAULT_ITEM_VALUE,
                Some(MatchError::Delegate {
                    operation: "estimate_value",
                    source: DelegateError::InvalidResponse(format!(
                        "estimate {value} for {} is not a non-negative number",
                        item.id
                    )),
                }),
            ),
            Err(err) => (DEFAULT_ITEM_VALUE, Self::delegate_failure("estimate_value", err)),
        }
    }

    async fn value_criterion(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        let (offer_value, offer_failure) = self.resolve_value(offer).await;
        let (request_value, request_failure) = self.resolve_value(request).await;
        self.observe_values(&offer.category, &request.category, offer_value, request_value)
            .await;

        let score = value_score(offer_value, request_value);
        CriterionScore::new(
            score,
            format!("offer worth {offer_value:.2}, request worth {request_value:.2}"),
        )
        .with_diagnostics(offer_failure.into_iter().chain(request_failure).collect())
    }

    async fn observe_values(
        &self,
        offer_type: &str,
        request_type: &str,
        offer_value: f64,
        request_value: f64,
    ) {
        let mut map = self.value_equivalency.write().await;
        map.entry((offer_type.to_string(), request_type.to_string()))
            .or_default()
            .observe(offer_value, request_value);
    }

    pub async fn evaluate_trust_match(
        &self,
        offer_user: Option<&User>,
        request_user: Option<&User>,
    ) -> CriterionScore {
        let scores = self.trust_scores.read().await;
        let lookup = |user: Option<&User>| {
            user.and_then(|u| scores.get(&u.id).copied())
                .unwrap_or(DEFAULT_TRUST_SCORE)
        };
        let offer_trust = lookup(offer_user);
        let request_trust = lookup(request_user);
        CriterionScore::new(
            trust_score(offer_trust, request_trust),
            format!("trust {offer_trust:.1} and {request_trust:.1}"),
        )
    }

    pub fn evaluate_seasonal_match(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        let month = Utc::now().month();
        let score = seasonal_score(&offer.description, &request.description, month);
        let insight = match (
            mentions_seasonal_food(&offer.description, month),
            mentions_seasonal_food(&request.description, month),
        ) {
            (true, true) => "both sides in season",
            (true, false) => "offer in season",
            (false, true) => "request in season",
            (false, false) => "no seasonal produce",
        };
        CriterionScore::new(score, insight)
    }

    pub fn evaluate_nutritional_match(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        let score = nutritional_score(&offer.description, &request.description);
        let mut groups = food_groups(&offer.description);
        for group in food_groups(&request.description) {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        let insight = if groups.is_empty() {
            "no food groups recognised".to_string()
        } else {
            format!("covers {}", groups.join(", "))
        };
        CriterionScore::new(score, insight)
    }

    pub fn evaluate_community_impact(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        let factors = community_factors(offer, request, Utc::now());
        CriterionScore::new(
            clamp_score(factors.average(), 1.0),
            format!(
                "servings {:.2}, freshness {:.2}, access {:.2}, community {:.2}",
                factors.serving_size,
                factors.freshness,
                factors.accessibility,
                factors.community_rating
            ),
        )
    }

    pub fn evaluate_match_type(&self, offer: &Listing, request: &Listing) -> CriterionScore {
        CriterionScore::new(match_type_score(offer, request), match_kind(offer, request).label())
    }

    /// Runs every criterion for one pair and builds the scored match. Never fails.
    pub async fn score_pair(&self, offer: &Listing, request: &Listing) -> Match {
        let location = self.evaluate_location_match(offer, request).await;
        let urgency = self.evaluate_urgency_match(offer, request).await;
        let value = self.evaluate_value_match(offer, request).await;
        let trust = self.evaluate_trust_match(offer.user.as_ref(), request.user.as_ref()).await;
        let seasonal = self.evaluate_seasonal_match(offer, request);
        let nutritional = self.evaluate_nutritional_match(offer, request);
        let community = self.evaluate_community_impact(offer, request);
        let match_type = self.evaluate_match_type(offer, request);

        let total = composite_total(
            &self.config.weights,
            self.config.normalize_unit_criteria,
            location.value,
            urgency.value,
            value.value,
            trust.value,
            seasonal.value,
            nutritional.value,
            community.value,
            match_type.value,
        );

        Match {
            id: Match::derive_id(&request.id, &offer.id),
            request_id: request.id.clone(),
            requester_id: request.user_id().map(str::to_string),
            offer: offer.clone(),
            scores: MatchScores {
                location: location.value,
                urgency: urgency.value,
                value: value.value,
                trust: trust.value,
                seasonal: seasonal.value,
                nutritional: nutritional.value,
                community: community.value,
                match_type: match_type.value,
                total,
            },
            kind: match_kind(offer, request),
            insights: MatchInsights {
                location: location.insight,
                urgency: urgency.insight,
                value: value.insight,
                trust: trust.insight,
                seasonal: seasonal.insight,
                nutritional: nutritional.insight,
                community: community.insight,
                match_type: match_type.insight,
            },
            origin: MatchOrigin::Traditional,
        }
    }

    /// Ranked matches for `request`. Failures are reported and yield an empty
    /// list, so "nothing matched" and "matching failed" look the same here;
    /// use [`MatchingEngine::try_find_matches`] to tell them apart.
    pub async fn find_matches(&self, request: &Listing, offers: &[Listing]) -> Vec<RankedMatch> {
        match self.try_find_matches(request, offers).await {
            Ok(results) => results,
            Err(err) => {
                self.report("find_matches", &err);
                Vec::new()
            }
        }
    }

    pub async fn try_find_matches(
        &self,
        request: &Listing,
        offers: &[Listing],
    ) -> Result<Vec<RankedMatch>, MatchError> {
        request
            .validate()
            .map_err(|e| MatchError::InvalidRequest(e.to_string()))?;
        self.config.validate()?;

        let span = info_span!("find_matches", request_id = %request.id, pool = offers.len());
        Ok(self.rank_pool(request, offers).instrument(span).await)
    }

    async fn rank_pool(&self, request: &Listing, offers: &[Listing]) -> Vec<RankedMatch> {
        if let Some(ranked) = self.delegate_ranking(request, offers).await {
            info!(matches = ranked.len(), delegate = self.delegate.name(), "delegate ranking used");
            return ranked.into_iter().map(RankedMatch::Direct).collect();
        }

        let mut scored = Vec::new();
        for offer in offers {
            if let Err(err) = offer.validate() {
                self.report(
                    "find_matches",
                    &MatchError::InvalidRequest(format!("offer skipped: {err}")),
                );
                continue;
            }
            if !self.within_reach(offer, request) {
                continue;
            }
            let matched = self.score_pair(offer, request).await;
            debug!(offer_id = %offer.id, total = matched.scores.total, "scored offer");
            scored.push(matched);
        }
        // `sort_by` is stable: equal totals keep pool order.
        scored.sort_by(|a, b| b.scores.total.total_cmp(&a.scores.total));

        let loops = self
            .find_trade_loops_with_budget(request, offers, self.config.trade_loops)
            .await;
        info!(matches = scored.len(), loops = loops.len(), "traditional ranking complete");

        let mut results: Vec<RankedMatch> = scored.into_iter().map(RankedMatch::Direct).collect();
        results.extend(loops.into_iter().map(RankedMatch::TradeLoop));
        results
    }

    /// `None` means fall back: capability absent, failed or had no opinion.
    async fn delegate_ranking(&self, request: &Listing, offers: &[Listing]) -> Option<Vec<Match>> {
        match self.delegate.rank_matches(request, offers).await {
            Ok(matches) if matches.is_empty() => {
                debug!("delegate returned no matches; using traditional ranking");
                None
            }
            Ok(matches) => Some(
                matches
                    .into_iter()
                    .map(|mut m| {
                        if m.id.is_empty() {
                            m.id = Match::derive_id(&request.id, &m.offer.id);
                        }
                        m.scores.total = clamp_score(m.scores.total, 10.0);
                        m.origin = MatchOrigin::Delegate;
                        m
                    })
                    .collect(),
            ),
            Err(err) => {
                if let Some(failure) = Self::delegate_failure("rank_matches", err) {
                    self.report("find_matches", &failure);
                }
                None
            }
        }
    }

    /// Geographic pre-filter: both sides located and no farther apart than
    /// `max_distance_km`.
    fn within_reach(&self, offer: &Listing, request: &Listing) -> bool {
        match (offer.location.as_ref(), request.location.as_ref()) {
            (Some(a), Some(b)) => haversine_km(a, b) <= self.config.max_distance_km,
            _ => false,
        }
    }

    pub async fn find_trade_loops(&self, request: &Listing, offers: &[Listing]) -> Vec<TradeLoop> {
        self.find_trade_loops_with_budget(request, offers, self.config.trade_loops)
            .await
    }

    pub async fn find_trade_loops_with_budget(
        &self,
        request: &Listing,
        offers: &[Listing],
        budget: TradeLoopBudget,
    ) -> Vec<TradeLoop> {
        let span = info_span!("find_trade_loops", request_id = %request.id, max_depth = budget.max_depth);
        async {
            if request.trade_items.is_empty() || budget.max_depth == 0 {
                return Vec::new();
            }
            let requester = request.user_id();
            let eligible: Vec<&Listing> = offers
                .iter()
                .filter(|o| o.validate().is_ok())
                .filter(|o| requester.is_none() || o.user_id() != requester)
                .take(budget.max_pool)
                .collect();

            let (request_value, failure) = self.resolve_value(request).await;
            if let Some(err) = failure {
                self.report("find_trade_loops", &err);
            }
            let mut candidates = Vec::with_capacity(eligible.len());
            for offer in eligible {
                let (value, failure) = self.resolve_value(offer).await;
                if let Some(err) = failure {
                    self.report("find_trade_loops", &err);
                }
                candidates.push(LoopCandidate { offer, value });
            }

            let loops = TradeLoopFinder::new(budget).find(request, request_value, &candidates);
            debug!(candidates = candidates.len(), loops = loops.len(), "trade loop search done");
            loops
        }
        .instrument(span)
        .await
    }

    /// Records the outcome, moves both parties' trust through the configured
    /// policy, archives the entry when an archive is attached and forwards the
    /// pair to the delegate's learning hook. Nothing here propagates an error.
    pub async fn record_match_outcome(&self, matched: &Match, outcome: MatchOutcome) {
        let entry = MatchHistoryEntry {
            match_id: matched.id.clone(),
            matched: matched.clone(),
            outcome,
            recorded_at: Utc::now(),
        };

        if self.apply_entry(&entry).await {
            warn!(match_id = %entry.match_id, "replacing existing history entry");
        }

        if let Some(archive) = &self.archive {
            if let Err(err) = archive.store_entry(&entry).await {
                self.report("record_match_outcome", &MatchError::Archive(err.to_string()));
            }
        }

        if let Err(err) = self.delegate.learn_from_outcome(matched, &entry.outcome).await {
            if let Some(failure) = Self::delegate_failure("learn_from_outcome", err) {
                self.report("record_match_outcome", &failure);
            }
        }
    }

    /// Stores the entry and moves trust for its parties. Returns whether an
    /// entry with the same match id was replaced.
    async fn apply_entry(&self, entry: &MatchHistoryEntry) -> bool {
        let replaced = self
            .match_history
            .write()
            .await
            .insert(entry.match_id.clone(), entry.clone())
            .is_some();

        let mut scores = self.trust_scores.write().await;
        for user_id in entry.matched.party_ids() {
            let current = scores.get(user_id).copied().unwrap_or(DEFAULT_TRUST_SCORE);
            let next = clamp_score(self.trust_policy.adjust(current, &entry.outcome), MAX_TRUST_SCORE);
            if next != current || scores.contains_key(user_id) {
                scores.insert(user_id.to_string(), next);
            }
        }
        replaced
    }

    /// Replays the attached archive, oldest first, into history and trust
    /// scores. Entries are neither re-archived nor sent to the delegate.
    pub async fn restore_from_archive(&self) -> Result<usize, MatchError> {
        let Some(archive) = &self.archive else {
            return Ok(0);
        };
        let entries = archive
            .load_entries()
            .await
            .map_err(|err| MatchError::Archive(err.to_string()))?;
        for entry in &entries {
            self.apply_entry(entry).await;
        }
        info!(entries = entries.len(), root = %archive.root().display(), "history restored from archive");
        Ok(entries.len())
    }

    pub async fn match_history(&self, match_id: &str) -> Option<MatchHistoryEntry> {
        self.match_history.read().await.get(match_id).cloned()
    }

    pub async fn history_len(&self) -> usize {
        self.match_history.read().await.len()
    }

    pub async fn trust_score(&self, user_id: &str) -> f64 {
        self.trust_scores
            .read()
            .await
            .get(user_id)
            .copied()
            .unwrap_or(DEFAULT_TRUST_SCORE)
    }

    pub async fn set_trust_score(&self, user_id: impl Into<String>, score: f64) {
        self.trust_scores
            .write()
            .await
            .insert(user_id.into(), clamp_score(score, MAX_TRUST_SCORE));
    }

    pub async fn value_equivalency(
        &self,
        offer_type: &str,
        request_type: &str,
    ) -> Option<ValueObservation> {
        self.value_equivalency
            .read()
            .await
            .get(&(offer_type.to_string(), request_type.to_string()))
            .copied()
    }
}

fn match_kind(offer: &Listing, request: &Listing) -> MatchKind {
    if offer.category == request.category {
        MatchKind::Direct
    } else {
        MatchKind::LoopCandidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        seen: Mutex<Vec<(String, MatchError)>>,
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, operation: &str, error: &MatchError) {
            self.seen
                .lock()
                .unwrap()
                .push((operation.to_string(), error.clone()));
        }
    }

    struct FailingDelegate;

    #[async_trait]
    impl AiDelegate for FailingDelegate {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn classify_urgency(&self, _description: &str) -> Result<Urgency, DelegateError> {
            Err(DelegateError::Transport("connection reset".into()))
        }

        async fn estimate_value(&self, _item: &Listing) -> Result<f64, DelegateError> {
            Ok(f64::NAN)
        }
    }

    struct BrokenMesh;

    #[async_trait]
    impl MeshSignal for BrokenMesh {
        async fn strength(&self, _offer: &Listing, _request: &Listing) -> Result<f64, MatchError> {
            Err(MatchError::Mesh("no peers".into()))
        }
    }

    fn nyc(id: &str) -> Listing {
        Listing::new(id, "produce").with_location(40.7128, -74.0060)
    }

    #[tokio::test]
    async fn missing_location_scores_zero_without_diagnostics() {
        let engine = MatchingEngine::default();
        let score = engine
            .evaluate_location_match(&Listing::new("o", "produce"), &nyc("r"))
            .await;
        assert_eq!(score.value, 0.0);
        assert!(!score.is_degraded());
    }

    #[tokio::test]
    async fn invalid_coordinates_score_zero_with_diagnostic() {
        let engine = MatchingEngine::default();
        let bad = Listing::new("o", "produce").with_location(95.0, 0.0);
        let score = engine.evaluate_location_match(&bad, &nyc("r")).await;
        assert_eq!(score.value, 0.0);
        assert_eq!(
            score.diagnostics,
            vec![MatchError::InvalidCoordinates {
                listing_id: "o".into()
            }]
        );
    }

    #[tokio::test]
    async fn mesh_failure_falls_back_to_configured_bonus() {
        let config = MatchingConfig {
            mesh_default_bonus: 0.0,
            ..MatchingConfig::default()
        };
        let engine = MatchingEngine::new(config)
            .unwrap()
            .with_mesh_signal(Arc::new(BrokenMesh));
        // ~8.5 km apart: 10 - 1.75 + 0 bonus.
        let far = Listing::new("o", "produce").with_location(40.7893, -74.0060);
        let score = engine.evaluate_location_match(&far, &nyc("r")).await;
        assert!((score.value - 8.25).abs() < 0.05, "got {}", score.value);
        assert_eq!(score.diagnostics, vec![MatchError::Mesh("no peers".into())]);
    }

    #[tokio::test]
    async fn delegate_failures_default_and_are_reported() {
        let reporter = Arc::new(RecordingReporter::default());
        let engine = MatchingEngine::default()
            .with_delegate(Arc::new(FailingDelegate))
            .with_error_reporter(reporter.clone());

        let request = nyc("r").with_description("need formula for tonight");
        let offer = nyc("o");
        let matched = engine.score_pair(&offer, &request).await;

        // Normal urgency, no deadline.
        assert_eq!(matched.scores.urgency, 10.0);
        // Both values default to 5.
        assert_eq!(matched.scores.value, 10.0);

        let seen = reporter.seen.lock().unwrap();
        let ops: Vec<&str> = seen.iter().map(|(op, _)| op.as_str()).collect();
        assert_eq!(ops, vec!["urgency", "value", "value"]);
    }

    #[tokio::test]
    async fn standalone_evaluators_report_their_fallbacks() {
        let reporter = Arc::new(RecordingReporter::default());
        let engine = MatchingEngine::default()
            .with_delegate(Arc::new(FailingDelegate))
            .with_error_reporter(reporter.clone());
        let request = nyc("r").with_description("need formula for tonight");

        let urgency = engine.evaluate_urgency_match(&nyc("o"), &request).await;
        assert_eq!(urgency.value, 10.0);
        assert_eq!(urgency.diagnostics.len(), 1);

        let bad = Listing::new("o", "produce").with_location(95.0, 0.0);
        engine.evaluate_location_match(&bad, &request).await;

        let seen = reporter.seen.lock().unwrap();
        let ops: Vec<&str> = seen.iter().map(|(op, _)| op.as_str()).collect();
        assert_eq!(ops, vec!["urgency", "location"]);
        assert!(matches!(
            seen[0].1,
            MatchError::Delegate {
                operation: "classify_urgency",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unsupported_capabilities_default_silently() {
        let reporter = Arc::new(RecordingReporter::default());
        let engine = MatchingEngine::default().with_error_reporter(reporter.clone());
        let request = nyc("r").with_description("need bread");
        engine.score_pair(&nyc("o"), &request).await;
        engine
            .record_match_outcome(
                &engine.score_pair(&nyc("o"), &request).await,
                MatchOutcome {
                    success: true,
                    rating: 4.0,
                    feedback: String::new(),
                },
            )
            .await;
        assert!(reporter.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn due_deadline_adds_immediacy_bonus() {
        let engine = MatchingEngine::default();
        let offer = nyc("o");
        let due = nyc("r")
            .with_urgency(Urgency::Optional)
            .with_need_by_date(Utc::now() - Duration::hours(1));
        let later = nyc("r")
            .with_urgency(Urgency::Optional)
            .with_need_by_date(Utc::now() + Duration::days(3));
        let due_score = engine.evaluate_urgency_match(&offer, &due).await;
        let later_score = engine.evaluate_urgency_match(&offer, &later).await;
        assert_eq!(due_score.value, 8.5);
        assert_eq!(later_score.value, 6.0);
        assert!(due_score.insight.contains("due now"));
    }

    #[tokio::test]
    async fn value_equivalency_tracks_observed_pairs() {
        let engine = MatchingEngine::default();
        let offer = nyc("o").with_estimated_value(20.0);
        let request = Listing::new("r", "bread").with_estimated_value(40.0);
        engine.evaluate_value_match(&offer, &request).await;
        let request = Listing::new("r2", "bread").with_estimated_value(20.0);
        engine.evaluate_value_match(&offer, &request).await;

        let obs = engine.value_equivalency("produce", "bread").await.unwrap();
        assert_eq!(obs.samples, 2);
        assert!((obs.mean_ratio - 0.75).abs() < 1e-9);
        assert_eq!(obs.last_request_value, 20.0);
        assert!(engine.value_equivalency("bread", "produce").await.is_none());
    }

    #[tokio::test]
    async fn outcome_policy_moves_both_parties() {
        let config = MatchingConfig {
            trust_policy: TrustPolicyKind::Outcome,
            ..MatchingConfig::default()
        };
        let engine = MatchingEngine::new(config).unwrap();
        let offer = nyc("o").with_user(User::new("giver"));
        let request = nyc("r").with_user(User::new("taker"));
        let matched = engine.score_pair(&offer, &request).await;

        engine
            .record_match_outcome(
                &matched,
                MatchOutcome {
                    success: false,
                    rating: 1.0,
                    feedback: "no show".into(),
                },
            )
            .await;
        assert_eq!(engine.trust_score("giver").await, 4.0);
        assert_eq!(engine.trust_score("taker").await, 4.0);
    }

    #[tokio::test]
    async fn static_policy_leaves_unknown_users_unrecorded() {
        let engine = MatchingEngine::default();
        let offer = nyc("o").with_user(User::new("giver"));
        let matched = engine.score_pair(&offer, &nyc("r")).await;
        engine
            .record_match_outcome(
                &matched,
                MatchOutcome {
                    success: true,
                    rating: 5.0,
                    feedback: String::new(),
                },
            )
            .await;
        assert_eq!(engine.trust_score("giver").await, DEFAULT_TRUST_SCORE);
        assert!(engine.trust_scores.read().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_history_ids_overwrite() {
        let engine = MatchingEngine::default();
        let matched = engine.score_pair(&nyc("o"), &nyc("r")).await;
        for rating in [2.0, 4.0] {
            engine
                .record_match_outcome(
                    &matched,
                    MatchOutcome {
                        success: true,
                        rating,
                        feedback: String::new(),
                    },
                )
                .await;
        }
        assert_eq!(engine.history_len().await, 1);
        let entry = engine.match_history(&matched.id).await.unwrap();
        assert_eq!(entry.outcome.rating, 4.0);
    }

    #[tokio::test]
    async fn set_trust_score_clamps() {
        let engine = MatchingEngine::default();
        engine.set_trust_score("u", 42.0).await;
        engine.set_trust_score("v", -3.0).await;
        assert_eq!(engine.trust_score("u").await, 10.0);
        assert_eq!(engine.trust_score("v").await, 0.0);
        assert_eq!(engine.trust_score("nobody").await, DEFAULT_TRUST_SCORE);
    }

    #[tokio::test]
    async fn empty_request_id_is_reported_and_yields_nothing() {
        let reporter = Arc::new(RecordingReporter::default());
        let engine = MatchingEngine::default().with_error_reporter(reporter.clone());
        let request = Listing::new("", "produce").with_location(40.7, -74.0);

        assert!(matches!(
            engine.try_find_matches(&request, &[nyc("o")]).await,
            Err(MatchError::InvalidRequest(_))
        ));
        assert!(engine.find_matches(&request, &[nyc("o")]).await.is_empty());
        assert_eq!(reporter.seen.lock().unwrap()[0].0, "find_matches");
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = MatchingConfig {
            max_distance_km: -1.0,
            ..MatchingConfig::default()
        };
        assert!(matches!(
            MatchingEngine::new(config),
            Err(MatchError::InvalidConfig(_))
        ));
    }
}
