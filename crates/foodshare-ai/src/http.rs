use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use foodshare_core::{Listing, Match, MatchOutcome, Urgency};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::{AiDelegate, DelegateError};

/// Throttling, request timeouts and server errors are worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// One failed call to the model service.
#[derive(Debug)]
enum AttemptFailure {
    Retry(DelegateError),
    Fail(DelegateError),
}

impl AttemptFailure {
    fn from_status(status: StatusCode, url: &str) -> Self {
        let err = DelegateError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        };
        if is_retryable_status(status) {
            Self::Retry(err)
        } else {
            Self::Fail(err)
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let retry = err.is_timeout() || err.is_connect();
        let err = DelegateError::Transport(err.to_string());
        if retry {
            Self::Retry(err)
        } else {
            Self::Fail(err)
        }
    }
}

/// Exponential delay between delegate retries, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        let exponent = u32::try_from(retry).unwrap_or(u32::MAX);
        let factor = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpAiConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl HttpAiConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }

    /// `None` when `FOODSHARE_AI_ENDPOINT` is unset or blank.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("FOODSHARE_AI_ENDPOINT").ok()?;
        if endpoint.trim().is_empty() {
            return None;
        }
        let mut config = Self::new(endpoint.trim());
        config.timeout = Duration::from_secs(
            std::env::var("FOODSHARE_AI_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        );
        config.user_agent = Some(
            std::env::var("FOODSHARE_AI_USER_AGENT")
                .unwrap_or_else(|_| "foodshare-matcher/0.1".to_string()),
        );
        Some(config)
    }
}

#[derive(Debug, Serialize)]
struct ClassifyUrgencyBody<'a> {
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyUrgencyReply {
    urgency: String,
}

#[derive(Debug, Serialize)]
struct EstimateValueBody<'a> {
    item: &'a Listing,
}

#[derive(Debug, Deserialize)]
struct EstimateValueReply {
    value: f64,
}

#[derive(Debug, Serialize)]
struct LearnBody<'a> {
    #[serde(rename = "match")]
    matched: &'a Match,
    outcome: &'a MatchOutcome,
}

/// Delegate backed by a JSON model service.
#[derive(Debug)]
pub struct HttpAiDelegate {
    client: reqwest::Client,
    endpoint: String,
    backoff: BackoffPolicy,
}

impl HttpAiDelegate {
    pub fn new(config: HttpAiConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            backoff: config.backoff,
        })
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, DelegateError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let bytes = self.post(path, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DelegateError::InvalidResponse(format!("{path}: {e}")))
    }

    async fn post<B>(&self, path: &str, body: &B) -> Result<Vec<u8>, DelegateError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.endpoint, path);
        let span = info_span!("ai_delegate_call", url = %url);

        async {
            let mut retry = 0;
            loop {
                match self.send_once(&url, body).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(AttemptFailure::Retry(err)) if retry < self.backoff.max_retries => {
                        debug!(retry, error = %err, "retrying delegate call");
                        tokio::time::sleep(self.backoff.delay_for_attempt(retry)).await;
                        retry += 1;
                    }
                    Err(AttemptFailure::Retry(err) | AttemptFailure::Fail(err)) => return Err(err),
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn send_once<B>(&self, url: &str, body: &B) -> Result<Vec<u8>, AttemptFailure>
    where
        B: Serialize + ?Sized,
    {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(AttemptFailure::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AttemptFailure::from_status(status, url));
        }
        let bytes = resp.bytes().await.map_err(AttemptFailure::from_reqwest)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl AiDelegate for HttpAiDelegate {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn classify_urgency(&self, description: &str) -> Result<Urgency, DelegateError> {
        let reply: ClassifyUrgencyReply = self
            .post_json("classify-urgency", &ClassifyUrgencyBody { description })
            .await?;
        reply
            .urgency
            .parse()
            .map_err(|e: foodshare_core::ModelError| DelegateError::InvalidResponse(e.to_string()))
    }

    async fn estimate_value(&self, item: &Listing) -> Result<f64, DelegateError> {
        let reply: EstimateValueReply = self
            .post_json("estimate-value", &EstimateValueBody { item })
            .await?;
        if !reply.value.is_finite() || reply.value < 0.0 {
            return Err(DelegateError::InvalidResponse(format!(
                "estimate-value returned {}",
                reply.value
            )));
        }
        Ok(reply.value)
    }

    async fn learn_from_outcome(
        &self,
        matched: &Match,
        outcome: &MatchOutcome,
    ) -> Result<(), DelegateError> {
        self.post("learn", &LearnBody { matched, outcome }).await?;
        Ok(())
    }
}
