//! Persistent snapshot cache backed by SQLite.
//!
//! One row per location key. All statements run on the blocking pool
//! against a single connection behind a mutex, so `get`, `set`, `delete`
//! and the eviction sweep never interleave.
//!
//! Caching is best-effort: read faults degrade to a miss and write faults
//! are logged, neither is returned to the lookup in progress.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use common::config::CacheConfig;
use common::{CacheEntry, Error, FeatureCollection, LocationKey};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    key TEXT PRIMARY KEY,
    suburb_slug TEXT NOT NULL,
    state_code TEXT NOT NULL,
    fetched_at_ms INTEGER NOT NULL,
    generated_at TEXT,
    source_url TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_fetched_at ON entries (fetched_at_ms);
";

const ENTRY_COLUMNS: &str =
    "key, suburb_slug, state_code, fetched_at_ms, generated_at, source_url, payload";

/// Rows fetched per round trip by [`EntryCursor`].
const CURSOR_BATCH: usize = 32;

// ── Events ────────────────────────────────────────────────────────────

/// Change notification delivered to per-key subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A new payload was written for the key.
    Refreshed(LocationKey),
    /// The entry was removed on request.
    Invalidated(LocationKey),
    /// The entry was removed by the eviction sweep.
    Evicted(LocationKey),
}

impl CacheEvent {
    pub fn key(&self) -> &LocationKey {
        match self {
            CacheEvent::Refreshed(k) | CacheEvent::Invalidated(k) | CacheEvent::Evicted(k) => k,
        }
    }
}

pub type CacheCallback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    by_key: DashMap<LocationKey, Vec<(SubscriptionId, CacheCallback)>>,
}

impl Subscribers {
    fn add(&self, key: LocationKey, callback: CacheCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.by_key.entry(key).or_default().push((id, callback));
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for mut callbacks in self.by_key.iter_mut() {
            let before = callbacks.len();
            callbacks.retain(|(existing, _)| *existing != id);
            removed |= callbacks.len() != before;
        }
        self.by_key.retain(|_, callbacks| !callbacks.is_empty());
        removed
    }

    fn notify(&self, event: CacheEvent) {
        // Clone out first so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<CacheCallback> = match self.by_key.get(event.key()) {
            Some(entry) => entry.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(&event);
        }
    }
}

// ── Sweep policy ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    /// Entries fetched longer ago than this are always removed.
    pub expiry: Duration,
    /// Upper bound on entries kept; the oldest by fetch time go first.
    pub max_entries: usize,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for SweepPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            expiry: config.expiry(),
            max_entries: config.max_entries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Removed for being past the expiry horizon.
    pub expired: Vec<LocationKey>,
    /// Removed to get back under the entry bound.
    pub trimmed: Vec<LocationKey>,
    pub remaining: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired.len() + self.trimmed.len()
    }
}

// ── Row decoding ──────────────────────────────────────────────────────

struct StoredRow {
    key: String,
    suburb_slug: String,
    state_code: String,
    fetched_at_ms: i64,
    generated_at: Option<String>,
    source_url: String,
    payload: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            suburb_slug: row.get(1)?,
            state_code: row.get(2)?,
            fetched_at_ms: row.get(3)?,
            generated_at: row.get(4)?,
            source_url: row.get(5)?,
            payload: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, Error> {
        let fetched_at = DateTime::<Utc>::from_timestamp_millis(self.fetched_at_ms)
            .ok_or_else(|| {
                Error::CacheRead(format!("{}: bad fetched_at {}", self.key, self.fetched_at_ms))
            })?;
        let payload: FeatureCollection = serde_json::from_str(&self.payload)
            .map_err(|e| Error::CacheRead(format!("{}: undecodable payload: {e}", self.key)))?;

        Ok(CacheEntry {
            key: LocationKey {
                suburb_slug: self.suburb_slug,
                state_code: self.state_code,
            },
            fetched_at,
            generated_at: self.generated_at,
            source_url: self.source_url,
            payload,
        })
    }
}

fn read_err(e: rusqlite::Error) -> Error {
    Error::CacheRead(e.to_string())
}

fn write_err(e: rusqlite::Error) -> Error {
    Error::CacheWrite(e.to_string())
}

fn keys_of(rows: Vec<(String, String)>) -> Vec<LocationKey> {
    rows.into_iter()
        .map(|(suburb_slug, state_code)| LocationKey {
            suburb_slug,
            state_code,
        })
        .collect()
}

// ── Store ─────────────────────────────────────────────────────────────

/// Shared handle; clones refer to the same connection and subscribers.
#[derive(Clone)]
pub struct CacheStore {
    conn: Arc<Mutex<Connection>>,
    subscribers: Arc<Subscribers>,
}

impl CacheStore {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(read_err)?;
        debug!("Opened snapshot cache at {}", path.display());
        Self::with_connection(conn)
    }

    /// A private in-memory cache (nothing survives the process).
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::with_connection(Connection::open_in_memory().map_err(read_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(SCHEMA).map_err(write_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            subscribers: Arc::new(Subscribers::default()),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Connection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Other("cache connection mutex poisoned".into()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| Error::Other(format!("cache task failed: {e}")))?
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub async fn try_get(&self, key: &LocationKey) -> Result<Option<CacheEntry>, Error> {
        let storage_key = key.storage_key();
        let row = self
            .blocking(move |conn| {
                conn.query_row(
                    &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE key = ?1"),
                    params![storage_key],
                    StoredRow::from_row,
                )
                .optional()
                .map_err(read_err)
            })
            .await?;

        row.map(StoredRow::into_entry).transpose()
    }

    /// Cached entry for `key`, fresh or not. Read faults count as a miss.
    pub async fn get(&self, key: &LocationKey) -> Option<CacheEntry> {
        match self.try_get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("{}: cache read failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    pub async fn len(&self) -> usize {
        let counted = self
            .blocking(|conn| {
                conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get::<_, i64>(0))
                    .map_err(read_err)
            })
            .await;
        match counted {
            Ok(n) => n.max(0) as usize,
            Err(e) => {
                warn!("Cache count failed: {}", e);
                0
            }
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Lazy cursor over all entries in key order. Call again to restart.
    pub fn iterate(&self) -> EntryCursor {
        EntryCursor {
            store: self.clone(),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    // ── Writes ────────────────────────────────────────────────────────

    pub async fn try_set(&self, entry: &CacheEntry) -> Result<(), Error> {
        let payload = serde_json::to_string(&entry.payload)
            .map_err(|e| Error::CacheWrite(format!("{}: {e}", entry.key)))?;
        let storage_key = entry.key.storage_key();
        let suburb_slug = entry.key.suburb_slug.clone();
        let state_code = entry.key.state_code.clone();
        let fetched_at_ms = entry.fetched_at.timestamp_millis();
        let generated_at = entry.generated_at.clone();
        let source_url = entry.source_url.clone();

        self.blocking(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO entries ({ENTRY_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    storage_key,
                    suburb_slug,
                    state_code,
                    fetched_at_ms,
                    generated_at,
                    source_url,
                    payload
                ],
            )
            .map(|_| ())
            .map_err(write_err)
        })
        .await
    }

    /// Upsert `entry`, replacing any previous one for the key. Write faults
    /// are logged and otherwise ignored.
    pub async fn set(&self, entry: &CacheEntry) {
        match self.try_set(entry).await {
            Ok(()) => {
                debug!("{}: cached {} features", entry.key, entry.payload.len());
                self.subscribers
                    .notify(CacheEvent::Refreshed(entry.key.clone()));
            }
            Err(e) => warn!("{}: cache write failed, continuing uncached: {}", entry.key, e),
        }
    }

    /// Returns whether a row was removed.
    pub async fn try_delete(&self, key: &LocationKey) -> Result<bool, Error> {
        let storage_key = key.storage_key();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM entries WHERE key = ?1", params![storage_key])
                .map(|n| n > 0)
                .map_err(write_err)
        })
        .await
    }

    pub async fn delete(&self, key: &LocationKey) {
        match self.try_delete(key).await {
            Ok(true) => self.subscribers.notify(CacheEvent::Invalidated(key.clone())),
            Ok(false) => debug!("{}: nothing cached to delete", key),
            Err(e) => warn!("{}: cache delete failed: {}", key, e),
        }
    }

    // ── Eviction ──────────────────────────────────────────────────────

    /// Remove everything past the expiry horizon, then the oldest entries
    /// until at most `max_entries` remain. Runs as one transaction.
    pub async fn try_sweep(
        &self,
        now: DateTime<Utc>,
        policy: SweepPolicy,
    ) -> Result<SweepReport, Error> {
        let cutoff_ms = now
            .checked_sub_signed(policy.expiry)
            .map_or(i64::MIN, |cutoff| cutoff.timestamp_millis());
        let max_entries = i64::try_from(policy.max_entries).unwrap_or(i64::MAX);

        self.blocking(move |conn| {
            let tx = conn.transaction().map_err(write_err)?;

            let expired = {
                let mut stmt = tx
                    .prepare("SELECT suburb_slug, state_code FROM entries WHERE fetched_at_ms < ?1")
                    .map_err(read_err)?;
                let rows = stmt
                    .query_map(params![cutoff_ms], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(read_err)?
                    .collect::<rusqlite::Result<Vec<(String, String)>>>()
                    .map_err(read_err)?;
                keys_of(rows)
            };
            tx.execute("DELETE FROM entries WHERE fetched_at_ms < ?1", params![cutoff_ms])
                .map_err(write_err)?;

            let count: i64 = tx
                .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
                .map_err(read_err)?;
            let excess = (count - max_entries).max(0);

            let trimmed = if excess > 0 {
                let oldest = "SELECT key FROM entries \
                              ORDER BY fetched_at_ms ASC, key ASC LIMIT ?1";
                let rows = {
                    let mut stmt = tx
                        .prepare(&format!(
                            "SELECT suburb_slug, state_code FROM entries WHERE key IN ({oldest})"
                        ))
                        .map_err(read_err)?;
                    let selected = stmt
                        .query_map(params![excess], |row| Ok((row.get(0)?, row.get(1)?)))
                        .map_err(read_err)?
                        .collect::<rusqlite::Result<Vec<(String, String)>>>()
                        .map_err(read_err)?;
                    selected
                };
                tx.execute(
                    &format!("DELETE FROM entries WHERE key IN ({oldest})"),
                    params![excess],
                )
                .map_err(write_err)?;
                keys_of(rows)
            } else {
                Vec::new()
            };

            tx.commit().map_err(write_err)?;

            Ok(SweepReport {
                remaining: (count - excess).max(0) as usize,
                expired,
                trimmed,
            })
        })
        .await
    }

    /// Eviction sweep with faults logged. Subscribers of every removed key
    /// receive [`CacheEvent::Evicted`].
    pub async fn sweep(&self, now: DateTime<Utc>, policy: SweepPolicy) -> SweepReport {
        match self.try_sweep(now, policy).await {
            Ok(report) => {
                if report.removed() > 0 {
                    info!(
                        "Cache sweep removed {} expired and {} over-bound entries, {} remain",
                        report.expired.len(),
                        report.trimmed.len(),
                        report.remaining
                    );
                }
                for key in report.expired.iter().chain(report.trimmed.iter()) {
                    self.subscribers.notify(CacheEvent::Evicted(key.clone()));
                }
                report
            }
            Err(e) => {
                warn!("Cache sweep failed: {}", e);
                SweepReport::default()
            }
        }
    }

    // ── Subscriptions ─────────────────────────────────────────────────

    /// Register `callback` for changes to `key`.
    pub fn subscribe<F>(&self, key: LocationKey, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.subscribers.add(key, Arc::new(callback))
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }
}

// ── Cursor ────────────────────────────────────────────────────────────

/// Keyset-paginated walk over the store. Rows that fail to decode are
/// skipped; a read fault ends the walk early.
pub struct EntryCursor {
    store: CacheStore,
    after: Option<String>,
    buffer: VecDeque<CacheEntry>,
    exhausted: bool,
}

impl EntryCursor {
    pub async fn next(&mut self) -> Option<CacheEntry> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(entry);
            }
            if self.exhausted {
                return None;
            }
            self.fill().await;
        }
    }

    async fn fill(&mut self) {
        let after = self.after.clone().unwrap_or_default();
        let fetched = self
            .store
            .blocking(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {ENTRY_COLUMNS} FROM entries WHERE key > ?1 ORDER BY key LIMIT ?2"
                    ))
                    .map_err(read_err)?;
                let rows = stmt
                    .query_map(params![after, CURSOR_BATCH as i64], StoredRow::from_row)
                    .map_err(read_err)?
                    .collect::<rusqlite::Result<Vec<StoredRow>>>()
                    .map_err(read_err)?;
                Ok(rows)
            })
            .await;

        let rows = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Cache iteration stopped early: {}", e);
                self.exhausted = true;
                return;
            }
        };

        if rows.len() < CURSOR_BATCH {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.after = Some(last.key.clone());
        }
        for row in rows {
            match row.into_entry() {
                Ok(entry) => self.buffer.push_back(entry),
                Err(e) => warn!("Skipping cache row: {}", e),
            }
        }
    }

    /// Drain the remaining entries.
    pub async fn collect(mut self) -> Vec<CacheEntry> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await {
            entries.push(entry);
        }
        entries
    }
}
