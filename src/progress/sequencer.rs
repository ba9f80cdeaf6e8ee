use tracing::debug;

use super::{EpisodeList, PlaybackItem};

/// Item following `current_item_id` in `episodes`, if any. No cross-season
/// continuation is attempted.
pub(crate) fn next_episode<'a>(
    current_item_id: &str,
    episodes: &'a EpisodeList,
) -> Option<&'a PlaybackItem> {
    let index = episodes.position(current_item_id)?;
    episodes.get(index + 1)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionPhase {
    Playing,
    Ended { next: Option<PlaybackItem> },
}

/// End-of-media handling for one playback session.
///
/// `Playing` moves to `Ended` once; the next item is computed at that point
/// and never recomputed. Navigating to it is left to the caller.
#[derive(Debug, Clone)]
pub(crate) struct EpisodeSequencer {
    current_item_id: String,
    episodes: EpisodeList,
    phase: SessionPhase,
}

impl EpisodeSequencer {
    pub(crate) fn new(current_item_id: impl Into<String>, episodes: EpisodeList) -> Self {
        Self {
            current_item_id: current_item_id.into(),
            episodes,
            phase: SessionPhase::Playing,
        }
    }

    pub(crate) fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub(crate) fn is_playing(&self) -> bool {
        matches!(self.phase, SessionPhase::Playing)
    }

    pub(crate) fn on_ended(&mut self) -> Option<&PlaybackItem> {
        if self.is_playing() {
            let next = next_episode(&self.current_item_id, &self.episodes).cloned();
            debug!(
                item_id = %self.current_item_id,
                next = next.as_ref().map(|item| item.item_id.as_str()).unwrap_or("none"),
                "playback ended"
            );
            self.phase = SessionPhase::Ended { next };
        }
        self.advance_target()
    }

    /// The item an "advance" affordance would start; only set once ended.
    pub(crate) fn advance_target(&self) -> Option<&PlaybackItem> {
        match &self.phase {
            SessionPhase::Ended { next } => next.as_ref(),
            SessionPhase::Playing => None,
        }
    }
}
