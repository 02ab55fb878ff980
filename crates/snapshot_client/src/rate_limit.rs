//! Request pacing against the upstream snapshot host.

use std::num::NonZeroU32;
use std::sync::Arc;

use common::Error;
use governor::{Quota, RateLimiter as GovLimiter};

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Single-bucket limiter shared by every clone of the client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    /// Allow at most `requests_per_sec` requests per second.
    pub fn per_second(requests_per_sec: u32) -> Result<Self, Error> {
        let rate = NonZeroU32::new(requests_per_sec)
            .ok_or_else(|| Error::Config("requests_per_second must be > 0".into()))?;

        Ok(Self {
            limiter: Arc::new(GovLimiter::direct(Quota::per_second(rate))),
        })
    }

    /// Wait until a request slot is available.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to take a slot without waiting. Returns true if acquired.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
