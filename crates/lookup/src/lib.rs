//! Location lookup core: persistent snapshot cache, technology summaries,
//! and exact address matching on top of the snapshot client.

pub mod address;
pub mod cache;
pub mod service;
pub mod summary;

pub use address::{match_address, normalize_address, AddressIndex};
pub use cache::{CacheEvent, CacheStore, SubscriptionId, SweepPolicy, SweepReport};
pub use service::{LocationReport, LookupOutcome, LookupService, Origin};
pub use summary::{categorize, classify_label, summarize, PropertyKeys, Summary};
