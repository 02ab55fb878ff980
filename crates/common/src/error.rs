//! Unified error type for nbn-lookup.
//!
//! Two tiers: everything except `NoCandidates` and `LookupExhausted` is
//! recoverable and absorbed where it happens (a failed candidate is skipped,
//! a failed cache read is a miss, a failed cache write is logged). Only the
//! terminal variants are returned from a lookup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Snapshot source returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Unparseable payload from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache read failed: {0}")]
    CacheRead(String),

    #[error("Cache write failed: {0}")]
    CacheWrite(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No candidate paths for {key}")]
    NoCandidates { key: String },

    #[error("Lookup exhausted for {key} after {attempts} candidate(s): {last}")]
    LookupExhausted {
        key: String,
        attempts: usize,
        #[source]
        last: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the errors a lookup surfaces to its caller.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::NoCandidates { .. } | Error::LookupExhausted { .. })
    }

    /// True for a single failed candidate path (bad status or bad body).
    pub fn is_candidate_failure(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Status { .. } | Error::Parse { .. } | Error::Json(_)
        )
    }
}
