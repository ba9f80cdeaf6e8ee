use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{LocalProgressStore, MIN_DELTA_SECONDS, PlaybackItem, WriteDispatcher};

/// Per-session throttle gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ThrottleState {
    last_persisted_seconds: u64,
}

impl ThrottleState {
    pub(crate) fn new(last_persisted_seconds: u64) -> Self {
        Self {
            last_persisted_seconds,
        }
    }

    /// Baseline for a session that starts at `resume_seconds`.
    pub(crate) fn from_resume_point(resume_seconds: f64) -> Self {
        let baseline = if resume_seconds.is_finite() && resume_seconds > 0.0 {
            resume_seconds.floor() as u64
        } else {
            0
        };
        Self::new(baseline)
    }

    pub(crate) fn last_persisted_seconds(&self) -> u64 {
        self.last_persisted_seconds
    }

    /// Returns the whole-second value to persist, if this sample passes the
    /// gate. Samples behind the baseline never pass.
    pub(crate) fn gate(&mut self, current_seconds: f64) -> Option<u64> {
        if !current_seconds.is_finite() || current_seconds < 0.0 {
            return None;
        }
        let rounded = current_seconds.floor() as u64;
        if rounded.saturating_sub(self.last_persisted_seconds) < MIN_DELTA_SECONDS {
            return None;
        }
        self.last_persisted_seconds = rounded;
        Some(rounded)
    }
}

/// Throttled write-back of live playback time to the local and remote stores.
pub(crate) struct ProgressWriter {
    local_key: String,
    state: ThrottleState,
    local: Rc<dyn LocalProgressStore>,
    dispatcher: WriteDispatcher,
}

impl ProgressWriter {
    pub(crate) fn new(
        item: &PlaybackItem,
        state: ThrottleState,
        local: Rc<dyn LocalProgressStore>,
        dispatcher: WriteDispatcher,
    ) -> Self {
        Self {
            local_key: item.local_key(),
            state,
            local,
            dispatcher,
        }
    }

    pub(crate) fn state(&self) -> ThrottleState {
        self.state
    }

    /// Handles one time-update sample and returns the persisted value, if any.
    ///
    /// The local write is synchronous and best-effort; the remote write is
    /// handed to the dispatcher and not awaited.
    pub(crate) fn on_time_update(&mut self, current_seconds: f64) -> Option<u64> {
        let rounded = self.state.gate(current_seconds)?;

        if let Err(err) = self.local.set(&self.local_key, &rounded.to_string()) {
            warn!(key = %self.local_key, seconds = rounded, error = %err, "local progress write failed");
        } else {
            debug!(key = %self.local_key, seconds = rounded, "local progress written");
        }

        self.dispatcher.dispatch(rounded);
        Some(rounded)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.wait_idle(timeout)
    }
}
