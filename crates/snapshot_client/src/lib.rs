//! Snapshot dataset client.
//!
//! Fetches per-suburb feature collections from the upstream snapshot
//! dataset. The upstream file naming is not guaranteed, so a lookup tries
//! several candidate paths in order (see [`candidates`]) under a bounded
//! number of concurrent fetches (see [`scheduler`]).

pub mod candidates;
pub mod rate_limit;
pub mod scheduler;

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use common::config::SourceConfig;
use common::{Error, FeatureCollection, LocationKey};
use tracing::{debug, warn};

pub use candidates::candidate_paths;
pub use rate_limit::RateLimiter;
pub use scheduler::{Admission, FetchScheduler};

/// A successfully fetched and parsed candidate.
#[derive(Debug, Clone)]
pub struct FetchedSnapshot {
    pub url: String,
    pub collection: FeatureCollection,
}

/// Anything that can resolve a relative candidate path to a parsed payload.
pub trait SnapshotSource: Send + Sync {
    /// Fetch one candidate path. Non-success status and unparseable bodies
    /// are errors; the caller moves on to the next candidate.
    fn fetch(&self, path: &str) -> impl Future<Output = Result<FetchedSnapshot, Error>> + Send;
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

/// HTTP snapshot source backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct SnapshotClient {
    client: reqwest::Client,
    base_url: String,
    extension: String,
    limiter: RateLimiter,
}

impl SnapshotClient {
    pub fn new(config: &SourceConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(4);
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            extension: config.extension.clone(),
            limiter: RateLimiter::per_second(config.requests_per_second)?,
        })
    }

    /// Absolute URL for a relative candidate path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Candidate paths for a location, using this client's file extension.
    pub fn candidates(&self, suburb: &str, state: &str) -> Vec<String> {
        candidate_paths(suburb, state, &self.extension)
    }
}

impl SnapshotSource for SnapshotClient {
    async fn fetch(&self, path: &str) -> Result<FetchedSnapshot, Error> {
        let url = self.url_for(path);
        if !self.limiter.try_acquire() {
            debug!("Upstream rate limit reached, pacing {}", url);
            self.limiter.wait().await;
        }

        debug!("Fetching snapshot candidate: {}", url);

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/geo+json, application/json")
            .send()
            .await
            .map_err(|e| Error::Http(format!("{url}: {}", format_reqwest_error(&e))))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("{url}: {}", format_reqwest_error(&e))))?;

        let collection: FeatureCollection =
            serde_json::from_slice(&body).map_err(|e| Error::Parse {
                url: url.clone(),
                message: e.to_string(),
            })?;

        debug!("Got {} features from {}", collection.len(), url);

        Ok(FetchedSnapshot { url, collection })
    }
}

/// Try `paths` left to right; the first success wins.
///
/// Fails with `LookupExhausted` carrying the last candidate error, or with
/// `NoCandidates` when `paths` is empty.
pub async fn try_candidates<S: SnapshotSource>(
    source: &S,
    key: &LocationKey,
    paths: &[String],
) -> Result<FetchedSnapshot, Error> {
    let mut last: Option<Error> = None;
    let mut attempts = 0;

    for path in paths {
        attempts += 1;
        match source.fetch(path).await {
            Ok(snapshot) => {
                debug!("{}: candidate {} succeeded after {} attempt(s)", key, path, attempts);
                return Ok(snapshot);
            }
            Err(e) => {
                if e.is_candidate_failure() {
                    debug!("{}: candidate {} failed: {}", key, path, e);
                } else {
                    warn!("{}: candidate {} failed unexpectedly: {}", key, path, e);
                }
                last = Some(e);
            }
        }
    }

    match last {
        Some(last) => Err(Error::LookupExhausted {
            key: key.to_string(),
            attempts,
            last: Box::new(last),
        }),
        None => Err(Error::NoCandidates {
            key: key.to_string(),
        }),
    }
}
