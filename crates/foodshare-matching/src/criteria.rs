//! Pure scoring functions for each matching criterion.
//!
//! The engine resolves the inputs (distances, delegate lookups, trust scores)
//! and feeds them through these functions, so everything here is
//! deterministic and synchronous.

use chrono::{DateTime, Utc};
use foodshare_core::{Listing, Urgency, FOOD_DESERT_ZONE, MAX_TRUST_SCORE};
use serde::Serialize;

use crate::config::CriterionWeights;
use crate::error::MatchError;

/// One criterion's result: the bounded score, a human-readable insight and
/// any failure that forced a fallback value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionScore {
    pub value: f64,
    pub insight: String,
    #[serde(skip)]
    pub diagnostics: Vec<MatchError>,
}

impl CriterionScore {
    pub fn new(value: f64, insight: impl Into<String>) -> Self {
        Self {
            value,
            insight: insight.into(),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<MatchError>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

const SEASONAL_FOODS: [(&[u32], &[&str]); 4] = [
    (
        &[12, 1, 2],
        &[
            "citrus", "orange", "grapefruit", "kale", "cabbage", "leek", "turnip", "parsnip",
            "pomegranate", "brussels sprout",
        ],
    ),
    (
        &[3, 4, 5],
        &[
            "asparagus", "pea", "strawberry", "spinach", "radish", "lettuce", "artichoke",
            "rhubarb", "spring onion",
        ],
    ),
    (
        &[6, 7, 8],
        &[
            "tomato", "corn", "zucchini", "berry", "blueberry", "peach", "watermelon",
            "cucumber", "pepper", "plum",
        ],
    ),
    (
        &[9, 10, 11],
        &[
            "apple", "pumpkin", "pear", "squash", "sweet potato", "cranberry", "grape", "beet",
            "cauliflower",
        ],
    ),
];

const FOOD_GROUPS: [(&str, &[&str]); 5] = [
    (
        "proteins",
        &[
            "meat", "chicken", "beef", "pork", "turkey", "fish", "salmon", "tuna", "egg", "bean",
            "lentil", "tofu", "nut", "peanut",
        ],
    ),
    (
        "grains",
        &[
            "bread", "rice", "pasta", "oat", "oatmeal", "cereal", "flour", "wheat", "quinoa",
            "tortilla", "bagel",
        ],
    ),
    (
        "vegetables",
        &[
            "vegetable", "carrot", "broccoli", "spinach", "lettuce", "tomato", "kale", "pepper",
            "onion", "potato", "cabbage", "eggplant",
        ],
    ),
    (
        "fruits",
        &[
            "fruit", "apple", "banana", "orange", "berry", "strawberry", "blueberry", "grape",
            "pear", "peach", "melon", "mango",
        ],
    ),
    ("dairy", &["milk", "cheese", "yogurt", "butter", "cream"]),
];

/// Lowercased alphanumeric words of `text`.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `word` is `keyword` or one of its plain English plurals.
fn is_word_form(word: &str, keyword: &str) -> bool {
    if word == keyword {
        return true;
    }
    match word.strip_prefix(keyword) {
        Some("s") | Some("es") => true,
        _ => keyword
            .strip_suffix('y')
            .is_some_and(|stem| word.strip_prefix(stem) == Some("ies")),
    }
}

/// Whole-word keyword match; multi-word keywords must appear as consecutive
/// words, with the plural allowed on the last one.
fn mentions(words: &[String], keyword: &str) -> bool {
    let parts: Vec<&str> = keyword.split(' ').collect();
    let Some((last, leading)) = parts.split_last() else {
        return false;
    };
    words.windows(parts.len()).any(|window| {
        window[..leading.len()]
            .iter()
            .zip(leading)
            .all(|(w, k)| w == k)
            && is_word_form(&window[leading.len()], last)
    })
}

pub fn clamp_score(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, max)
}

/// Whole days from `now` until `at`, rounded up. Zero or negative means due.
pub fn days_until(at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((at - now).num_seconds() as f64 / 86_400.0).ceil()
}

/// 0-10. Full marks inside the nearby radius, half a point lost per km past
/// it (at most 5), +2 for the same zone, plus the mesh bonus.
pub fn location_score(
    distance_km: f64,
    same_zone: bool,
    mesh_bonus: f64,
    nearby_radius_km: f64,
) -> f64 {
    if !distance_km.is_finite() {
        return 0.0;
    }
    let mut score = 10.0;
    if distance_km > nearby_radius_km {
        score -= ((distance_km - nearby_radius_km) * 0.5).min(5.0);
    }
    if same_zone {
        score += 2.0;
    }
    clamp_score(score + mesh_bonus, 10.0)
}

/// 0-10. Base 5 plus 2.5 per urgency level; a future deadline takes up to 3
/// points off, a deadline already due adds one.
pub fn urgency_score(urgency: Urgency, days_until_needed: Option<f64>) -> f64 {
    let mut score = 5.0 + f64::from(urgency.level()) * 2.5;
    match days_until_needed {
        Some(days) if days > 0.0 => score -= (days * 0.5).min(3.0),
        Some(_) => score += 1.0,
        None => {}
    }
    clamp_score(score, 10.0)
}

/// 0-10, falling linearly with the relative value difference.
pub fn value_score(offer_value: f64, request_value: f64) -> f64 {
    let max = offer_value.max(request_value);
    if !max.is_finite() || max <= 0.0 {
        return 10.0;
    }
    let relative = (offer_value - request_value).abs() / max;
    clamp_score(10.0 - 10.0 * relative, 10.0)
}

pub fn trust_score(offer_trust: f64, request_trust: f64) -> f64 {
    clamp_score((offer_trust + request_trust) / 2.0, MAX_TRUST_SCORE)
}

pub fn mentions_seasonal_food(description: &str, month: u32) -> bool {
    let words = words(description);
    SEASONAL_FOODS
        .iter()
        .find(|(months, _)| months.contains(&month))
        .map(|(_, foods)| foods.iter().any(|food| mentions(&words, food)))
        .unwrap_or(false)
}

/// 0-1: 1.0 when both sides mention an in-season food, 0.7 for one, 0.5 otherwise.
pub fn seasonal_score(offer_description: &str, request_description: &str, month: u32) -> f64 {
    let offer = mentions_seasonal_food(offer_description, month);
    let request = mentions_seasonal_food(request_description, month);
    match (offer, request) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.7,
        (false, false) => 0.5,
    }
}

pub fn food_groups(description: &str) -> Vec<&'static str> {
    let words = words(description);
    FOOD_GROUPS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| mentions(&words, k)))
        .map(|(group, _)| *group)
        .collect()
}

/// 0-1: distinct food groups covered by either side, saturating at three.
pub fn nutritional_score(offer_description: &str, request_description: &str) -> f64 {
    let mut groups = food_groups(offer_description);
    for group in food_groups(request_description) {
        if !groups.contains(&group) {
            groups.push(group);
        }
    }
    (groups.len() as f64 / 3.0).min(1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommunityFactors {
    pub serving_size: f64,
    pub freshness: f64,
    pub accessibility: f64,
    pub community_rating: f64,
}

impl CommunityFactors {
    pub fn average(&self) -> f64 {
        (self.serving_size + self.freshness + self.accessibility + self.community_rating) / 4.0
    }
}

/// Missing quantity counts as a single serving, missing expiry as neutral
/// freshness, missing rating as 0.5.
pub fn community_factors(offer: &Listing, request: &Listing, now: DateTime<Utc>) -> CommunityFactors {
    let quantity = offer.quantity.filter(|q| q.is_finite()).unwrap_or(1.0);
    let serving_size = clamp_score(quantity / 5.0, 1.0);
    let freshness = offer
        .expiry_date
        .map(|expiry| clamp_score(days_until(expiry, now) / 7.0, 1.0))
        .unwrap_or(0.5);
    let accessibility = if request.zone_type.as_deref() == Some(FOOD_DESERT_ZONE) {
        1.0
    } else {
        0.6
    };
    let community_rating = offer
        .user
        .as_ref()
        .and_then(|u| u.community_rating)
        .filter(|r| r.is_finite())
        .map(|r| clamp_score(r / 10.0, 1.0))
        .unwrap_or(0.5);
    CommunityFactors {
        serving_size,
        freshness,
        accessibility,
        community_rating,
    }
}

pub fn community_impact_score(offer: &Listing, request: &Listing, now: DateTime<Utc>) -> f64 {
    clamp_score(community_factors(offer, request, now).average(), 1.0)
}

pub fn match_type_score(offer: &Listing, request: &Listing) -> f64 {
    if offer.category == request.category {
        10.0
    } else {
        5.0
    }
}

/// Weighted composite of all criteria, bounded to 0-10.
///
/// The 0-1 criteria enter the sum unscaled unless `normalize_unit_criteria`
/// is set, in which case they are lifted to 0-10 first.
#[allow(clippy::too_many_arguments)]
pub fn composite_total(
    weights: &CriterionWeights,
    normalize_unit_criteria: bool,
    location: f64,
    urgency: f64,
    value: f64,
    trust: f64,
    seasonal: f64,
    nutritional: f64,
    community: f64,
    match_type: f64,
) -> f64 {
    let unit = if normalize_unit_criteria { 10.0 } else { 1.0 };
    let total = weights.location * location
        + weights.urgency * urgency
        + weights.value * value
        + weights.trust * trust
        + weights.seasonal * seasonal * unit
        + weights.nutritional * nutritional * unit
        + weights.community * community * unit
        + weights.match_type * match_type;
    clamp_score(total, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use foodshare_core::User;

    #[test]
    fn location_penalty_is_capped_and_bonuses_clamp() {
        assert_eq!(location_score(2.0, false, 1.0, 5.0), 10.0);
        assert_eq!(location_score(9.0, false, 0.0, 5.0), 8.0);
        assert_eq!(location_score(3935.0, false, 1.0, 5.0), 6.0);
        assert_eq!(location_score(3935.0, true, 1.0, 5.0), 8.0);
        assert_eq!(location_score(f64::INFINITY, true, 1.0, 5.0), 0.0);
        assert!(location_score(1.0, false, 1.0, 5.0) > location_score(3935.0, false, 1.0, 5.0));
    }

    #[test]
    fn urgency_orders_labels_and_deadlines() {
        assert_eq!(urgency_score(Urgency::Critical, Some(0.0)), 10.0);
        assert_eq!(urgency_score(Urgency::Optional, Some(0.0)), 8.5);
        assert_eq!(urgency_score(Urgency::Normal, None), 10.0);
        assert_eq!(urgency_score(Urgency::Optional, Some(2.0)), 6.5);
        assert_eq!(urgency_score(Urgency::Optional, Some(30.0)), 4.5);
    }

    #[test]
    fn value_score_tracks_relative_difference() {
        assert_eq!(value_score(50.0, 50.0), 10.0);
        assert_eq!(value_score(50.0, 100.0), 5.0);
        assert!(value_score(50.0, 55.0) > value_score(50.0, 100.0));
        assert_eq!(value_score(0.0, 0.0), 10.0);
        assert_eq!(value_score(0.0, 10.0), 0.0);
    }

    #[test]
    fn trust_is_the_capped_average() {
        assert_eq!(trust_score(9.0, 5.0), 7.0);
        assert_eq!(trust_score(12.0, 12.0), 10.0);
    }

    #[test]
    fn seasonal_keywords_depend_on_month() {
        assert_eq!(seasonal_score("ripe tomatoes", "sweet corn", 7), 1.0);
        assert_eq!(seasonal_score("ripe tomatoes", "bread", 7), 0.7);
        assert_eq!(seasonal_score("ripe tomatoes", "bread", 1), 0.5);
        assert_eq!(seasonal_score("Pumpkin pie filling", "", 10), 0.7);
    }

    #[test]
    fn keywords_match_whole_words_and_plurals() {
        assert_eq!(nutritional_score("ready in 5 minutes", ""), 0.0);
        assert_eq!(food_groups("grilled eggplant"), vec!["vegetables"]);
        assert_eq!(food_groups("goat cheese"), vec!["dairy"]);
        assert!(food_groups("price dropped").is_empty());
        assert_eq!(food_groups("a dozen eggs"), vec!["proteins"]);
        assert_eq!(food_groups("fresh strawberries"), vec!["fruits"]);
        assert!(!mentions_seasonal_food("fresh peaches", 4));
        assert!(mentions_seasonal_food("fresh peas", 4));
        assert!(mentions_seasonal_food("roasted Brussels sprouts", 1));
        assert!(!mentions_seasonal_food("sprouts", 1));
        assert!(mentions_seasonal_food("sweet potatoes", 10));
    }

    #[test]
    fn nutritional_diversity_saturates_at_three_groups() {
        assert_eq!(nutritional_score("", ""), 0.0);
        assert!((nutritional_score("brown rice", "") - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(nutritional_score("rice and beans", "cheddar cheese, apples"), 1.0);
        // Same group on both sides counts once.
        assert!((nutritional_score("milk", "yogurt") - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn community_factors_use_documented_defaults() {
        let now = Utc::now();
        let offer = Listing::new("o", "produce");
        let request = Listing::new("r", "produce");
        let f = community_factors(&offer, &request, now);
        assert_eq!(f.serving_size, 0.2);
        assert_eq!(f.freshness, 0.5);
        assert_eq!(f.accessibility, 0.6);
        assert_eq!(f.community_rating, 0.5);

        let offer = Listing::new("o", "produce")
            .with_quantity(10.0)
            .with_expiry_date(now + Duration::days(14))
            .with_user(User::new("giver").with_community_rating(8.0));
        let request = Listing::new("r", "produce").with_zone_type(FOOD_DESERT_ZONE);
        let f = community_factors(&offer, &request, now);
        assert_eq!(f.serving_size, 1.0);
        assert_eq!(f.freshness, 1.0);
        assert_eq!(f.accessibility, 1.0);
        assert_eq!(f.community_rating, 0.8);
        assert!((community_impact_score(&offer, &request, now) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn expired_food_has_no_freshness() {
        let now = Utc::now();
        let offer = Listing::new("o", "dairy").with_expiry_date(now - Duration::days(2));
        let request = Listing::new("r", "dairy");
        assert_eq!(community_factors(&offer, &request, now).freshness, 0.0);
    }

    #[test]
    fn composite_keeps_unit_criteria_unscaled_by_default() {
        let w = CriterionWeights::default();
        let raw = composite_total(&w, false, 10.0, 10.0, 10.0, 10.0, 1.0, 1.0, 1.0, 10.0);
        assert!((raw - 7.75).abs() < 1e-9, "got {raw}");
        let scaled = composite_total(&w, true, 10.0, 10.0, 10.0, 10.0, 1.0, 1.0, 1.0, 10.0);
        assert!((scaled - 10.0).abs() < 1e-9, "got {scaled}");
    }
}
