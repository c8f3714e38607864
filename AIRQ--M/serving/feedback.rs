use std::str::FromStr;

use airq_forecasting::SiteId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of entries returned when no limit is given.
pub const DEFAULT_LIMIT: usize = 50;

/// How the air felt to the person reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feeling {
    /// Clean air.
    Fresh,
    /// Smoke or burning smell.
    Smoky,
    /// Dust or haze.
    Dusty,
    /// Nothing noticeable.
    Normal,
}

impl Feeling {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Smoky => "smoky",
            Self::Dusty => "dusty",
            Self::Normal => "normal",
        }
    }
}

impl FromStr for Feeling {
    type Err = FeedbackError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fresh" => Ok(Self::Fresh),
            "smoky" => Ok(Self::Smoky),
            "dusty" => Ok(Self::Dusty),
            "normal" => Ok(Self::Normal),
            _ => Err(FeedbackError::UnknownFeeling(raw.to_string())),
        }
    }
}

/// A report as submitted, before the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeedback {
    /// Site the report refers to.
    pub site: SiteId,
    /// Perceived air quality.
    pub feeling: Feeling,
    /// Free text, possibly empty.
    #[serde(default)]
    pub description: String,
}

/// A stored report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Sequential id starting at 1.
    pub id: u64,
    /// Site the report refers to.
    pub site: SiteId,
    /// Perceived air quality.
    pub feeling: Feeling,
    /// Free text, possibly empty.
    pub description: String,
    /// Submission time (UTC).
    pub timestamp: DateTime<Utc>,
}

/// Errors raised by feedback stores.
#[derive(Debug, Error)]
pub enum FeedbackError {
    /// Feeling outside `fresh|smoky|dusty|normal`.
    #[error("unknown feeling '{0}', expected fresh, smoky, dusty or normal")]
    UnknownFeeling(String),
    /// Site outside the accepted set.
    #[error("site {0} is not accepted")]
    UnknownSite(SiteId),
    /// Backend failure in a store implementation.
    #[error("feedback store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only feedback storage, injected into whatever serves feedback requests.
pub trait FeedbackStore: Send + Sync {
    /// Stores `feedback`, assigning the next id and the current time.
    fn append(&self, feedback: NewFeedback) -> Result<FeedbackEntry, FeedbackError>;

    /// Entries for `site` (all sites when `None`), newest first, at most `limit`.
    fn query(&self, site: Option<SiteId>, limit: usize) -> Result<Vec<FeedbackEntry>, FeedbackError>;
}

fn newest_first(
    entries: impl Iterator<Item = FeedbackEntry>,
    site: Option<SiteId>,
    limit: usize,
) -> Vec<FeedbackEntry> {
    let mut selected: Vec<FeedbackEntry> = entries
        .filter(|entry| site.map_or(true, |site| entry.site == site))
        .collect();
    selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    selected.truncate(limit);
    selected
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryFeedbackStore {
    entries: RwLock<Vec<FeedbackEntry>>,
}

impl MemoryFeedbackStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl FeedbackStore for MemoryFeedbackStore {
    fn append(&self, feedback: NewFeedback) -> Result<FeedbackEntry, FeedbackError> {
        let mut entries = self.entries.write();
        let entry = FeedbackEntry {
            id: entries.len() as u64 + 1,
            site: feedback.site,
            feeling: feedback.feeling,
            description: feedback.description,
            timestamp: Utc::now(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    fn query(&self, site: Option<SiteId>, limit: usize) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        Ok(newest_first(self.entries.read().iter().cloned(), site, limit))
    }
}

/// Rejects reports for sites outside `accepted`, then appends.
pub fn submit(
    store: &dyn FeedbackStore,
    accepted: &[SiteId],
    feedback: NewFeedback,
) -> Result<FeedbackEntry, FeedbackError> {
    if !accepted.contains(&feedback.site) {
        return Err(FeedbackError::UnknownSite(feedback.site));
    }
    store.append(feedback)
}
