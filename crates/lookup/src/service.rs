//! Core-facing lookup API.
//!
//! A lookup is served from the cache while the entry is fresh. Otherwise
//! (or when forced) the candidate paths are tried inside one scheduler
//! admission and the winning payload replaces the cached entry.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{CacheEntry, Error, FeatureCollection, FeatureRecord, LocationKey, LookupConfig};
use serde::Serialize;
use snapshot_client::{candidate_paths, try_candidates, FetchScheduler, SnapshotSource};
use tracing::{debug, info};

use crate::address::match_address;
use crate::cache::{CacheEvent, CacheStore, SubscriptionId, SweepPolicy, SweepReport};
use crate::summary::{summarize, Summary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Cache,
    Network,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::Cache => "cache",
            Origin::Network => "network",
        })
    }
}

#[derive(Debug, Clone)]
pub struct LookupOutcome {
    pub entry: CacheEntry,
    pub origin: Origin,
}

impl LookupOutcome {
    pub fn collection(&self) -> &FeatureCollection {
        &self.entry.payload
    }
}

/// Suburb summary plus the exact street match, when one was asked for.
#[derive(Debug, Clone)]
pub struct LocationReport {
    pub outcome: LookupOutcome,
    pub summary: Summary,
    pub matched: Option<FeatureRecord>,
}

pub struct LookupService<S> {
    source: S,
    store: CacheStore,
    scheduler: Arc<FetchScheduler>,
    extension: String,
    ttl: Duration,
    sweep_policy: SweepPolicy,
}

impl<S: SnapshotSource> LookupService<S> {
    pub fn new(source: S, store: CacheStore, config: &LookupConfig) -> Self {
        Self {
            source,
            store,
            scheduler: Arc::new(FetchScheduler::new(config.scheduler.max_concurrent)),
            extension: config.source.extension.clone(),
            ttl: config.cache.ttl(),
            sweep_policy: SweepPolicy::from(&config.cache),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<FetchScheduler> {
        &self.scheduler
    }

    pub fn resolve_location(&self, suburb: &str, state: &str) -> LocationKey {
        LocationKey::resolve(suburb, state)
    }

    pub async fn lookup(
        &self,
        suburb: &str,
        state: &str,
        force_refresh: bool,
    ) -> Result<LookupOutcome, Error> {
        self.lookup_as_of(suburb, state, force_refresh, Utc::now()).await
    }

    /// [`lookup`](Self::lookup) against an explicit clock. `now` is both the
    /// freshness reference and the `fetched_at` of a new entry.
    pub async fn lookup_as_of(
        &self,
        suburb: &str,
        state: &str,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<LookupOutcome, Error> {
        let key = self.resolve_location(suburb, state);
        if !key.is_addressable() {
            // Punctuation-only names would otherwise share one `STATE/` row.
            return Err(Error::NoCandidates {
                key: key.to_string(),
            });
        }

        if force_refresh {
            debug!("{}: forced refresh", key);
        } else if let Some(entry) = self.store.get(&key).await {
            if entry.is_fresh(now, self.ttl) {
                info!("{}: cache hit ({} features)", key, entry.payload.len());
                return Ok(LookupOutcome {
                    entry,
                    origin: Origin::Cache,
                });
            }
            debug!("{}: cached entry is stale, refetching", key);
        } else {
            debug!("{}: cache miss", key);
        }

        let paths = candidate_paths(suburb, state, &self.extension);
        let entry = self
            .scheduler
            .run(async {
                let snapshot = try_candidates(&self.source, &key, &paths).await?;
                let entry = CacheEntry::new(key.clone(), now, snapshot.url, snapshot.collection);
                self.store.set(&entry).await;
                Ok(entry)
            })
            .await?;

        info!(
            "{}: fetched {} features from {}",
            key,
            entry.payload.len(),
            entry.source_url
        );

        Ok(LookupOutcome {
            entry,
            origin: Origin::Network,
        })
    }

    /// Lookup, summarize, and optionally match a street address.
    pub async fn locate(
        &self,
        suburb: &str,
        state: &str,
        street: Option<&str>,
        force_refresh: bool,
    ) -> Result<LocationReport, Error> {
        let outcome = self.lookup(suburb, state, force_refresh).await?;
        let summary = summarize(outcome.collection());
        let matched = street
            .and_then(|s| match_address(outcome.collection(), s))
            .cloned();
        if let (Some(street), None) = (street, &matched) {
            debug!("{}: no exact match for {:?}", outcome.entry.key, street);
        }
        Ok(LocationReport {
            outcome,
            summary,
            matched,
        })
    }

    pub fn summarize(&self, collection: &FeatureCollection) -> Summary {
        summarize(collection)
    }

    pub fn match_address<'a>(
        &self,
        collection: &'a FeatureCollection,
        street: &str,
    ) -> Option<&'a FeatureRecord> {
        match_address(collection, street)
    }

    /// Drop the cached entry so the next lookup refetches.
    pub async fn invalidate(&self, suburb: &str, state: &str) -> LocationKey {
        let key = self.resolve_location(suburb, state);
        self.store.delete(&key).await;
        key
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_as_of(Utc::now()).await
    }

    pub async fn sweep_as_of(&self, now: DateTime<Utc>) -> SweepReport {
        self.store.sweep(now, self.sweep_policy).await
    }

    pub fn subscribe<F>(&self, key: LocationKey, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.store.subscribe(key, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }
}
