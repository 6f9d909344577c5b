//! Remote attribution scoring client
//!
//! Submits journeys in bounded chunks to the scoring service and reconciles
//! responses. The service is a black box: it receives journeys and returns
//! one credit weight per touchpoint, echoing the identifiers back.
//!
//! Rate limiting uses a token bucket awaited before every request; transient
//! failures retry with bounded exponential backoff plus jitter. A chunk that
//! cannot be scored is reported and skipped, never allowed to abort the run.

use crate::journey::Journey;
use attrib_common::db::AttributionResult;
use governor::{Quota, RateLimiter};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default maximum journeys per request
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Scoring client configuration
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Scoring service URL
    pub endpoint: String,
    /// API key sent as `x-api-key`
    pub api_key: String,
    /// Maximum journeys per request
    pub chunk_size: usize,
    /// Total per-request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Attempts per chunk before giving up (first try included)
    pub max_attempts: u32,
    /// Backoff before the first retry; doubles per attempt
    pub initial_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Remote quota: requests per second
    pub requests_per_second: NonZeroU32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            requests_per_second: NonZeroU32::new(1).expect("1 is non-zero"),
        }
    }
}

/// Errors from a single chunk submission
#[derive(Debug, Error)]
pub enum ScoringError {
    /// Network-level failure, including timeouts
    #[error("Scoring request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// HTTP 429 from the service
    #[error("Rate limited by scoring service")]
    RateLimited,

    /// HTTP 5xx from the service
    #[error("Scoring service error: HTTP {0}")]
    Server(StatusCode),

    /// Any other non-success status: the request itself was rejected
    #[error("Scoring request rejected (HTTP {status}): {message}")]
    Rejected { status: StatusCode, message: String },

    /// Response body did not match the service contract
    #[error("Unparseable scoring response: {0}")]
    Parse(String),
}

impl ScoringError {
    /// Transient errors are worth retrying; rejection and parse failures
    /// are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScoringError::Transport(_) | ScoringError::RateLimited | ScoringError::Server(_)
        )
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    customer_journeys: &'a [Journey],
}

#[derive(Debug, Deserialize)]
pub struct ScoreResponse {
    #[serde(default)]
    pub results: Vec<WireResult>,
    /// Per-journey failures inside an otherwise successful response
    #[serde(default)]
    pub failures: Vec<WireFailure>,
}

#[derive(Debug, Deserialize)]
pub struct WireResult {
    pub session_id: String,
    pub conversion_id: String,
    pub ihc_weight: f64,
}

#[derive(Debug, Deserialize)]
pub struct WireFailure {
    pub conversion_id: String,
    #[serde(default)]
    pub error: String,
}

/// Outcome of submitting all chunks
#[derive(Debug, Default)]
pub struct Submission {
    /// Successfully parsed weights across all chunks
    pub results: Vec<AttributionResult>,
    /// Conversions whose chunk exhausted its retries
    pub failed_remote: Vec<String>,
    /// Conversions rejected by the service (not retried this run)
    pub failed_validation: Vec<String>,
}

/// Client for the attribution scoring service
pub struct ScoringClient {
    http_client: Client,
    config: ScoringConfig,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl ScoringClient {
    /// Create a client, validating the endpoint and API key.
    pub fn new(config: ScoringConfig) -> attrib_common::Result<Self> {
        if config.endpoint.is_empty() {
            return Err(attrib_common::Error::Config(
                "Scoring endpoint is required".to_string(),
            ));
        }
        if config.api_key.is_empty() {
            return Err(attrib_common::Error::Config(
                "Scoring API key is required".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                attrib_common::Error::Internal(format!("Failed to build HTTP client: {}", e))
            })?;

        let rate_limiter =
            RateLimiter::direct(Quota::per_second(config.requests_per_second));

        Ok(Self {
            http_client,
            config,
            rate_limiter,
        })
    }

    /// Submit one chunk of journeys.
    async fn score_chunk(&self, chunk: &[Journey]) -> Result<ScoreResponse, ScoringError> {
        // Wait for a rate limiter permit before touching the network
        self.rate_limiter.until_ready().await;

        debug!(journeys = chunk.len(), "Submitting chunk to scoring service");

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.config.api_key)
            .json(&ScoreRequest {
                customer_journeys: chunk,
            })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ScoringError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ScoringError::Server(status));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScoringError::Rejected { status, message });
        }

        response
            .json::<ScoreResponse>()
            .await
            .map_err(|e| ScoringError::Parse(e.to_string()))
    }

    /// Submit one chunk, retrying transient failures with exponential
    /// backoff and jitter.
    async fn score_chunk_with_retry(
        &self,
        chunk: &[Journey],
    ) -> Result<ScoreResponse, ScoringError> {
        let mut backoff = self.config.initial_backoff;

        for attempt in 1..=self.config.max_attempts {
            match self.score_chunk(chunk).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                    let delay = jittered(backoff);
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Chunk submission failed, will retry: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(err) => return Err(err),
            }
        }

        // max_attempts >= 1, so the loop always returns before this
        Err(ScoringError::Parse("retry loop exhausted".to_string()))
    }

    /// Submit all journeys in order-preserving chunks.
    ///
    /// Chunk failures are isolated: the failing chunk's conversions are
    /// recorded in the submission outcome and the loop continues.
    pub async fn submit(&self, journeys: Vec<Journey>) -> Submission {
        let chunks = crate::journey::chunk_journeys(journeys, self.config.chunk_size);
        let total = chunks.len();
        let mut submission = Submission::default();

        for (index, chunk) in chunks.into_iter().enumerate() {
            info!(
                chunk = index + 1,
                total,
                journeys = chunk.len(),
                "Scoring chunk"
            );

            match self.score_chunk_with_retry(&chunk).await {
                Ok(response) => {
                    let reconciled = reconcile(&chunk, response);
                    submission.results.extend(reconciled.results);
                    submission
                        .failed_validation
                        .extend(reconciled.failed_conversions);
                }
                Err(err) => {
                    let conversions = conversion_ids(&chunk);
                    warn!(
                        chunk = index + 1,
                        conversions = ?conversions,
                        "Chunk could not be scored: {}",
                        err
                    );
                    if err.is_transient() {
                        submission.failed_remote.extend(conversions);
                    } else {
                        submission.failed_validation.extend(conversions);
                    }
                }
            }
        }

        info!(
            results = submission.results.len(),
            failed_remote = submission.failed_remote.len(),
            failed_validation = submission.failed_validation.len(),
            "Submission complete"
        );
        submission
    }
}

fn conversion_ids(chunk: &[Journey]) -> Vec<String> {
    chunk.iter().map(|j| j.conversion_id.clone()).collect()
}

/// Backoff plus up to 50% random jitter
fn jittered(base: Duration) -> Duration {
    let half = base.as_millis() as u64 / 2;
    let extra = if half > 0 {
        rand::thread_rng().gen_range(0..=half)
    } else {
        0
    };
    base + Duration::from_millis(extra)
}

/// Result of matching one chunk's response against what was submitted
#[derive(Debug, Default)]
pub struct ChunkReconciliation {
    pub results: Vec<AttributionResult>,
    /// Conversions the service reported as failed within this chunk
    pub failed_conversions: Vec<String>,
}

/// Match returned weights back to their originating touchpoints.
///
/// Matching is by the echoed `(session_id, conversion_id)` pair, never by
/// position: the service may return fewer or more entries than submitted.
/// Entries for unknown pairs and weights outside [0, 1] are dropped with a
/// warning.
pub fn reconcile(chunk: &[Journey], response: ScoreResponse) -> ChunkReconciliation {
    let submitted: HashSet<(&str, &str)> = chunk
        .iter()
        .flat_map(|journey| {
            journey
                .touchpoints
                .iter()
                .map(move |t| (t.session_id.as_str(), journey.conversion_id.as_str()))
        })
        .collect();
    let chunk_conversions: HashSet<&str> =
        chunk.iter().map(|j| j.conversion_id.as_str()).collect();

    let mut reconciliation = ChunkReconciliation::default();

    for entry in response.results {
        let pair = (entry.session_id.as_str(), entry.conversion_id.as_str());
        if !submitted.contains(&pair) {
            warn!(
                session_id = %entry.session_id,
                conversion_id = %entry.conversion_id,
                "Scoring response references a pair that was not submitted; dropping"
            );
            continue;
        }
        if !(0.0..=1.0).contains(&entry.ihc_weight) {
            warn!(
                session_id = %entry.session_id,
                conversion_id = %entry.conversion_id,
                ihc_weight = entry.ihc_weight,
                "Scoring response weight outside [0, 1]; dropping"
            );
            continue;
        }
        reconciliation.results.push(AttributionResult {
            session_id: entry.session_id,
            conversion_id: entry.conversion_id,
            ihc_weight: entry.ihc_weight,
        });
    }

    for failure in response.failures {
        if !chunk_conversions.contains(failure.conversion_id.as_str()) {
            continue;
        }
        warn!(
            conversion_id = %failure.conversion_id,
            error = %failure.error,
            "Scoring service reported journey failure"
        );
        reconciliation.failed_conversions.push(failure.conversion_id);
    }

    reconciliation
}
