mod dispatch;
mod remote;
mod resolver;
mod sequencer;
mod session;
mod surface;
mod throttle;

pub(crate) use dispatch::*;
pub(crate) use remote::*;
pub(crate) use resolver::*;
pub(crate) use sequencer::*;
pub(crate) use session::*;
pub(crate) use surface::*;
pub(crate) use throttle::*;

use crate::error::StoreError;

/// Minimum advance, in whole seconds, between two persisted samples.
pub(crate) const MIN_DELTA_SECONDS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ItemKind {
    Movie,
    Episode,
}

impl ItemKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            ItemKind::Movie => "movie",
            ItemKind::Episode => "episode",
        }
    }

    /// Query/body field naming the item on the progress API.
    pub(crate) fn id_field(self) -> &'static str {
        match self {
            ItemKind::Movie => "movie_id",
            ItemKind::Episode => "episode_id",
        }
    }

    fn local_key_prefix(self) -> &'static str {
        match self {
            ItemKind::Movie => "filme_",
            ItemKind::Episode => "episodio_",
        }
    }

    pub(crate) fn local_key(self, item_id: &str) -> String {
        format!("{}{item_id}_tempo", self.local_key_prefix())
    }

    /// Inverse of [`ItemKind::local_key`].
    pub(crate) fn parse_local_key(key: &str) -> Option<(ItemKind, &str)> {
        for kind in [ItemKind::Movie, ItemKind::Episode] {
            if let Some(id) = key
                .strip_prefix(kind.local_key_prefix())
                .and_then(|rest| rest.strip_suffix("_tempo"))
                && !id.is_empty()
            {
                return Some((kind, id));
            }
        }
        None
    }
}

/// One watchable unit: a movie, or one episode of a series.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlaybackItem {
    pub(crate) item_id: String,
    pub(crate) kind: ItemKind,
    pub(crate) parent_id: Option<String>,
    pub(crate) duration_seconds: Option<f64>,
    pub(crate) title: Option<String>,
}

impl PlaybackItem {
    pub(crate) fn movie(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            kind: ItemKind::Movie,
            parent_id: None,
            duration_seconds: None,
            title: None,
        }
    }

    pub(crate) fn episode(item_id: impl Into<String>, series_id: Option<String>) -> Self {
        Self {
            item_id: item_id.into(),
            kind: ItemKind::Episode,
            parent_id: series_id,
            duration_seconds: None,
            title: None,
        }
    }

    pub(crate) fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub(crate) fn with_duration(mut self, duration_seconds: Option<f64>) -> Self {
        self.duration_seconds = duration_seconds.filter(|d| d.is_finite() && *d > 0.0);
        self
    }

    pub(crate) fn local_key(&self) -> String {
        self.kind.local_key(&self.item_id)
    }

    pub(crate) fn display_name(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => format!("{} {}", self.kind.label(), self.item_id),
        }
    }

    /// Display-only ratio of `seconds` to the known duration.
    pub(crate) fn progress_ratio(&self, seconds: f64) -> Option<f64> {
        let duration = self.duration_seconds?;
        Some((seconds / duration).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressSource {
    Remote,
    Local,
}

impl ProgressSource {
    pub(crate) fn label(self) -> &'static str {
        match self {
            ProgressSource::Remote => "remote",
            ProgressSource::Local => "local",
        }
    }
}

/// A single saved position. `source` is `None` for the zero record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgressRecord {
    pub(crate) item_id: String,
    pub(crate) time_seconds: f64,
    pub(crate) source: Option<ProgressSource>,
}

impl ProgressRecord {
    pub(crate) fn zero(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            time_seconds: 0.0,
            source: None,
        }
    }

    pub(crate) fn has_progress(&self) -> bool {
        self.time_seconds > 0.0
    }

    /// "Resuming from ..." banner; a zero record never produces one.
    pub(crate) fn resume_prompt(&self) -> Option<String> {
        if !self.has_progress() {
            return None;
        }
        let seconds = self.time_seconds.floor() as u64;
        Some(format!(
            "Resuming from {}min ({seconds}s)",
            seconds / 60
        ))
    }
}

/// Parses a locally stored progress value. Non-numeric, non-finite and
/// negative values are treated as absent.
pub(crate) fn parse_stored_seconds(raw: &str) -> Option<f64> {
    let value = raw.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Ordered episodes of one season, in caller order. Never re-sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct EpisodeList {
    items: Vec<PlaybackItem>,
}

impl EpisodeList {
    pub(crate) fn new(items: Vec<PlaybackItem>) -> Self {
        Self { items }
    }

    pub(crate) fn items(&self) -> &[PlaybackItem] {
        &self.items
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn position(&self, item_id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.item_id == item_id)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&PlaybackItem> {
        self.items.get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveOutcome {
    Saved,
    /// No credential was available; nothing was sent.
    Skipped,
}

/// Remote progress store shared with background writers.
pub(crate) trait RemoteProgressStore: Send + Sync {
    /// `Ok(None)` when the store has no record for the item.
    fn fetch(&self, item: &PlaybackItem) -> Result<Option<f64>, StoreError>;

    fn save(&self, item: &PlaybackItem, time_seconds: u64) -> Result<SaveOutcome, StoreError>;

    /// Whether a save would be attempted at all (a credential is present).
    fn accepts_writes(&self) -> bool {
        true
    }
}

/// Device-local key/value fallback store.
pub(crate) trait LocalProgressStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Supplies the bearer credential for remote calls.
pub(crate) trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

#[cfg(test)]
pub(crate) mod fakes;
