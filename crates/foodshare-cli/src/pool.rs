use std::path::Path;

use anyhow::{bail, Context, Result};
use foodshare_core::Listing;
use serde::Deserialize;

/// A request plus the offers it is matched against, as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchPool {
    pub request: Listing,
    #[serde(default)]
    pub offers: Vec<Listing>,
}

impl MatchPool {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let pool: Self = serde_json::from_str(text).context("parsing match pool")?;
        pool.request
            .validate()
            .with_context(|| format!("request `{}`", pool.request.id))?;
        Ok(pool)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn offer(&self, offer_id: &str) -> Result<&Listing> {
        match self.offers.iter().find(|o| o.id == offer_id) {
            Some(offer) => Ok(offer),
            None => bail!("offer `{offer_id}` is not in the pool"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foodshare_core::Urgency;
    use foodshare_matching::{MatchingEngine, MatchingConfig};

    fn sample_pool_path() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/sample/pool.json")
    }

    #[test]
    fn sample_fixture_parses() {
        let pool = MatchPool::load(&sample_pool_path()).expect("sample pool");
        assert_eq!(pool.request.id, "req-bk-001");
        assert_eq!(pool.request.urgency, Some(Urgency::High));
        assert_eq!(pool.offers.len(), 4);
        assert!(pool.offer("offer-milk").is_ok());
        assert!(pool.offer("offer-missing").is_err());
    }

    #[tokio::test]
    async fn sample_fixture_ranks_nearby_produce_first() {
        let pool = MatchPool::load(&sample_pool_path()).expect("sample pool");
        let engine = MatchingEngine::new(MatchingConfig::default()).expect("engine");
        let results = engine.find_matches(&pool.request, &pool.offers).await;

        let direct: Vec<_> = results.iter().filter_map(|r| r.as_match()).collect();
        assert_eq!(direct.len(), 3, "boston offer is out of range");
        assert_eq!(direct[0].offer.id, "offer-carrots");

        let loops: Vec<_> = results.iter().filter_map(|r| r.as_trade_loop()).collect();
        assert!(loops
            .iter()
            .any(|l| l.links.len() == 1 && l.links[0].offer_id == "offer-milk"));
    }

    #[test]
    fn missing_request_id_is_rejected() {
        let err = MatchPool::from_json_str(r#"{"request": {"id": "", "type": "produce"}}"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("listing id"));
    }
}
