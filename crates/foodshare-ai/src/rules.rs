use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use foodshare_core::{Listing, Urgency, DEFAULT_ITEM_VALUE};
use serde::Deserialize;

use crate::{AiDelegate, DelegateError};

#[derive(Debug, Clone, Deserialize)]
struct UrgencyRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    default: Urgency,
    #[serde(default)]
    rules: Vec<UrgencyRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrgencyRule {
    pub urgency: Urgency,
    pub contains_any: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ValueRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(flatten)]
    rules: ValueRules,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueRules {
    #[serde(default = "default_item_value")]
    pub default_value: f64,
    #[serde(default)]
    pub categories: Vec<CategoryValue>,
    #[serde(default)]
    pub modifiers: Vec<ValueModifier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryValue {
    pub category: String,
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueModifier {
    pub contains_any: Vec<String>,
    pub multiplier: f64,
}

fn default_item_value() -> f64 {
    DEFAULT_ITEM_VALUE
}

/// Keyword heuristics loaded from `rules/urgency.yaml` and `rules/values.yaml`.
pub struct KeywordRulesDelegate {
    default_urgency: Urgency,
    urgency_rules: Vec<UrgencyRule>,
    value_rules: ValueRules,
}

impl KeywordRulesDelegate {
    pub fn from_rules_dir(rules_dir: &Path) -> Result<Self> {
        let urgency_path = rules_dir.join("urgency.yaml");
        let values_path = rules_dir.join("values.yaml");
        let urgency = std::fs::read_to_string(&urgency_path)
            .with_context(|| format!("reading {}", urgency_path.display()))?;
        let values = std::fs::read_to_string(&values_path)
            .with_context(|| format!("reading {}", values_path.display()))?;
        Self::from_yaml(&urgency, &values)
    }

    pub fn from_yaml(urgency_yaml: &str, values_yaml: &str) -> Result<Self> {
        let urgency: UrgencyRulesFile =
            serde_yaml::from_str(urgency_yaml).context("parsing urgency rules")?;
        let values: ValueRulesFile =
            serde_yaml::from_str(values_yaml).context("parsing value rules")?;
        Ok(Self {
            default_urgency: urgency.default,
            urgency_rules: urgency.rules,
            value_rules: values.rules,
        })
    }

    fn matches_any(haystack: &str, needles: &[String]) -> bool {
        needles
            .iter()
            .any(|needle| haystack.contains(&needle.to_ascii_lowercase()))
    }
}

#[async_trait]
impl AiDelegate for KeywordRulesDelegate {
    fn name(&self) -> &'static str {
        "keyword-rules"
    }

    async fn classify_urgency(&self, description: &str) -> Result<Urgency, DelegateError> {
        let text = description.to_ascii_lowercase();
        Ok(self
            .urgency_rules
            .iter()
            .find(|rule| Self::matches_any(&text, &rule.contains_any))
            .map(|rule| rule.urgency)
            .unwrap_or(self.default_urgency))
    }

    async fn estimate_value(&self, item: &Listing) -> Result<f64, DelegateError> {
        let base = self
            .value_rules
            .categories
            .iter()
            .find(|c| c.category.eq_ignore_ascii_case(item.category.trim()))
            .map(|c| c.value)
            .unwrap_or(self.value_rules.default_value);

        let text = item.description.to_ascii_lowercase();
        let value = self
            .value_rules
            .modifiers
            .iter()
            .filter(|m| Self::matches_any(&text, &m.contains_any))
            .fold(base, |acc, m| acc * m.multiplier);

        if !value.is_finite() || value < 0.0 {
            return Err(DelegateError::InvalidResponse(format!(
                "value rules produced {value} for {}",
                item.id
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const URGENCY: &str = r#"
version: 1
default: normal
rules:
  - urgency: critical
    contains_any: ["emergency", "asap"]
  - urgency: high
    contains_any: ["tomorrow", "family of"]
  - urgency: optional
    contains_any: ["no rush"]
"#;

    const VALUES: &str = r#"
version: 1
default_value: 5.0
categories:
  - category: produce
    value: 6.0
  - category: prepared
    value: 12.0
modifiers:
  - contains_any: ["organic"]
    multiplier: 1.5
"#;

    #[tokio::test]
    async fn urgency_rules_apply_in_order_with_default() {
        let delegate = KeywordRulesDelegate::from_yaml(URGENCY, VALUES).expect("rules");
        assert_eq!(
            delegate.classify_urgency("Need formula ASAP").await.unwrap(),
            Urgency::Critical
        );
        assert_eq!(
            delegate
                .classify_urgency("feeding a family of five tomorrow")
                .await
                .unwrap(),
            Urgency::High
        );
        assert_eq!(
            delegate.classify_urgency("some apples").await.unwrap(),
            Urgency::Normal
        );
    }

    #[tokio::test]
    async fn value_rules_use_category_and_modifiers() {
        let delegate = KeywordRulesDelegate::from_yaml(URGENCY, VALUES).expect("rules");
        let organic = Listing::new("o1", "Produce").with_description("Organic kale");
        assert_eq!(delegate.estimate_value(&organic).await.unwrap(), 9.0);
        let unknown = Listing::new("o2", "canned");
        assert_eq!(delegate.estimate_value(&unknown).await.unwrap(), 5.0);
    }

    #[test]
    fn loads_from_rules_dir() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("urgency.yaml"), URGENCY).expect("write");
        std::fs::write(dir.path().join("values.yaml"), VALUES).expect("write");
        assert!(KeywordRulesDelegate::from_rules_dir(dir.path()).is_ok());

        let missing = tempdir().expect("tempdir");
        let err = KeywordRulesDelegate::from_rules_dir(missing.path())
            .err()
            .expect("missing files should fail");
        assert!(err.to_string().contains("urgency.yaml"));
    }
}
