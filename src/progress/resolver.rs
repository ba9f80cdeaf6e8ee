use tracing::{debug, warn};

use super::{
    LocalProgressStore, PlaybackItem, ProgressRecord, ProgressSource, RemoteProgressStore,
    parse_stored_seconds,
};

/// Determines where a session should start.
///
/// The remote record wins whenever it holds a positive time, since it
/// reflects progress from any device. Otherwise the local fallback is used,
/// and if that is missing or malformed the zero record is returned. Remote
/// failures never propagate.
pub(crate) fn resolve(
    item: &PlaybackItem,
    remote: &dyn RemoteProgressStore,
    local: &dyn LocalProgressStore,
) -> ProgressRecord {
    match remote.fetch(item) {
        Ok(Some(seconds)) if seconds.is_finite() && seconds > 0.0 => {
            debug!(item_id = %item.item_id, seconds, "resume point from remote store");
            return ProgressRecord {
                item_id: item.item_id.clone(),
                time_seconds: seconds,
                source: Some(ProgressSource::Remote),
            };
        }
        Ok(_) => debug!(item_id = %item.item_id, "no remote progress"),
        Err(err) => {
            warn!(item_id = %item.item_id, error = %err, "remote progress fetch failed; using local fallback");
        }
    }

    match read_local_seconds(item, local) {
        Some(seconds) => {
            debug!(item_id = %item.item_id, seconds, "resume point from local store");
            ProgressRecord {
                item_id: item.item_id.clone(),
                time_seconds: seconds,
                source: Some(ProgressSource::Local),
            }
        }
        None => ProgressRecord::zero(item.item_id.clone()),
    }
}

pub(crate) fn read_local_seconds(
    item: &PlaybackItem,
    local: &dyn LocalProgressStore,
) -> Option<f64> {
    let key = item.local_key();
    let raw = match local.get(&key) {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(key = %key, error = %err, "local progress read failed");
            return None;
        }
    };
    let parsed = parse_stored_seconds(&raw);
    if parsed.is_none() {
        debug!(key = %key, raw = %raw, "ignoring malformed local progress value");
    }
    parsed
}
