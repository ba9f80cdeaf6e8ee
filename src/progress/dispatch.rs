use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{PlaybackItem, RemoteProgressStore, SaveOutcome};

/// How remote progress writes leave the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum WritePolicy {
    /// Every accepted sample gets its own background write. Writes may race
    /// and arrive out of order.
    #[default]
    Detached,
    /// One background worker per session with a single pending slot; a newer
    /// sample replaces one that has not been sent yet.
    Coalescing,
}

impl WritePolicy {
    pub(crate) fn label(self) -> &'static str {
        match self {
            WritePolicy::Detached => "detached",
            WritePolicy::Coalescing => "coalescing",
        }
    }
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "detached" => Ok(WritePolicy::Detached),
            "coalescing" => Ok(WritePolicy::Coalescing),
            other => Err(format!("unknown write policy `{other}`")),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn begin(&self) {
        *lock(&self.count) += 1;
    }

    fn end(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn current(&self) -> usize {
        *lock(&self.count)
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let count = lock(&self.count);
        let (count, _) = self
            .idle
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count == 0
    }
}

/// Ends one in-flight unit when dropped, including when a writer panics or
/// its thread never starts.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.end();
    }
}

#[derive(Default)]
struct SlotState {
    pending: Option<u64>,
    closed: bool,
}

#[derive(Default)]
struct PendingSlot {
    state: Mutex<SlotState>,
    wake: Condvar,
}

enum Mode {
    Detached,
    Coalescing(Arc<PendingSlot>),
}

/// Sends throttled samples to the remote store without blocking the caller.
///
/// Outcomes only reach the log. Nothing is retried, and dropping the
/// dispatcher does not cancel writes already handed off.
pub(crate) struct WriteDispatcher {
    item: Arc<PlaybackItem>,
    remote: Arc<dyn RemoteProgressStore>,
    in_flight: Arc<InFlight>,
    mode: Mode,
}

impl WriteDispatcher {
    pub(crate) fn new(
        item: PlaybackItem,
        remote: Arc<dyn RemoteProgressStore>,
        policy: WritePolicy,
    ) -> Self {
        let item = Arc::new(item);
        let in_flight = Arc::new(InFlight::default());
        let mode = match policy {
            WritePolicy::Detached => Mode::Detached,
            WritePolicy::Coalescing => {
                let slot = Arc::new(PendingSlot::default());
                spawn_coalescing_worker(
                    Arc::clone(&slot),
                    Arc::clone(&item),
                    Arc::clone(&remote),
                    Arc::clone(&in_flight),
                );
                Mode::Coalescing(slot)
            }
        };
        Self {
            item,
            remote,
            in_flight,
            mode,
        }
    }

    pub(crate) fn dispatch(&self, time_seconds: u64) {
        if !self.remote.accepts_writes() {
            debug!(item_id = %self.item.item_id, time_seconds, "no credential; remote save skipped");
            return;
        }

        match &self.mode {
            Mode::Detached => self.spawn_detached(time_seconds),
            Mode::Coalescing(slot) => {
                let mut state = lock(&slot.state);
                if state.closed {
                    warn!(item_id = %self.item.item_id, time_seconds, "remote save worker unavailable; sample dropped");
                    return;
                }
                match state.pending.replace(time_seconds) {
                    Some(superseded) => {
                        debug!(item_id = %self.item.item_id, superseded, time_seconds, "pending remote save superseded");
                    }
                    None => self.in_flight.begin(),
                }
                slot.wake.notify_one();
            }
        }
    }

    fn spawn_detached(&self, time_seconds: u64) {
        self.in_flight.begin();
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let item = Arc::clone(&self.item);
        let remote = Arc::clone(&self.remote);
        let spawned = thread::Builder::new()
            .name("cinetrack-save".to_string())
            .spawn(move || {
                let _guard = guard;
                send_write(remote.as_ref(), &item, time_seconds);
            });
        if let Err(err) = spawned {
            warn!(item_id = %self.item.item_id, time_seconds, error = %err, "failed to start remote save");
        }
    }

    /// Writes handed off but not yet finished.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Blocks until every handed-off write finished or `timeout` elapsed.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        self.in_flight.wait_idle(timeout)
    }
}

impl Drop for WriteDispatcher {
    fn drop(&mut self) {
        if let Mode::Coalescing(slot) = &self.mode {
            lock(&slot.state).closed = true;
            slot.wake.notify_one();
        }
    }
}

fn spawn_coalescing_worker(
    slot: Arc<PendingSlot>,
    item: Arc<PlaybackItem>,
    remote: Arc<dyn RemoteProgressStore>,
    in_flight: Arc<InFlight>,
) {
    let worker_item = Arc::clone(&item);
    let worker_slot = Arc::clone(&slot);
    let spawned = thread::Builder::new()
        .name("cinetrack-save-slot".to_string())
        .spawn(move || {
            loop {
                let next = {
                    let state = lock(&worker_slot.state);
                    let mut state = worker_slot
                        .wake
                        .wait_while(state, |state| state.pending.is_none() && !state.closed)
                        .unwrap_or_else(PoisonError::into_inner);
                    state.pending.take()
                };
                let Some(time_seconds) = next else {
                    break;
                };
                let _guard = InFlightGuard(Arc::clone(&in_flight));
                send_write(remote.as_ref(), &worker_item, time_seconds);
            }
        });
    if let Err(err) = spawned {
        warn!(item_id = %item.item_id, error = %err, "failed to start remote save worker; remote saves disabled");
        lock(&slot.state).closed = true;
    }
}

fn send_write(remote: &dyn RemoteProgressStore, item: &PlaybackItem, time_seconds: u64) {
    match remote.save(item, time_seconds) {
        Ok(SaveOutcome::Saved) => {
            info!(item_id = %item.item_id, kind = item.kind.label(), time_seconds, "progress saved")
        }
        Ok(SaveOutcome::Skipped) => {
            debug!(item_id = %item.item_id, time_seconds, "no credential; remote save skipped")
        }
        Err(err) => {
            warn!(item_id = %item.item_id, time_seconds, error = %err, "remote progress save failed; not retried")
        }
    }
}
