use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use super::{LocalProgressStore, PlaybackItem, RemoteProgressStore, SaveOutcome};
use crate::error::StoreError;

#[derive(Default)]
pub(crate) struct MemoryLocalStore {
    values: RefCell<HashMap<String, String>>,
    writes: RefCell<Vec<(String, String)>>,
    fail_writes: Cell<bool>,
    fail_reads: Cell<bool>,
}

impl MemoryLocalStore {
    pub(crate) fn with_value(key: &str, value: &str) -> Self {
        let store = Self::default();
        store
            .values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        store
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.set(fail);
    }

    pub(crate) fn value(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    pub(crate) fn writes(&self) -> Vec<(String, String)> {
        self.writes.borrow().clone()
    }
}

impl LocalProgressStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads.get() {
            return Err(StoreError::Decode("local store unavailable".to_string()));
        }
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.writes
            .borrow_mut()
            .push((key.to_string(), value.to_string()));
        if self.fail_writes.get() {
            return Err(StoreError::Decode("quota exceeded".to_string()));
        }
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum FetchBehavior {
    Found(f64),
    NotFound,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedSave {
    pub(crate) item_id: String,
    pub(crate) parent_id: Option<String>,
    pub(crate) time_seconds: u64,
}

/// Test side of a gated `FakeRemote`: observes saves as they start and
/// lets each one finish.
pub(crate) struct SaveGate {
    started: Receiver<u64>,
    release: Sender<()>,
}

impl SaveGate {
    /// Waits for the next save to start and returns its position.
    pub(crate) fn next_started(&self, timeout: Duration) -> Option<u64> {
        self.started.recv_timeout(timeout).ok()
    }

    pub(crate) fn release(&self, saves: usize) {
        for _ in 0..saves {
            let _ = self.release.send(());
        }
    }
}

struct GateHooks {
    started: Sender<u64>,
    release: Receiver<()>,
}

pub(crate) struct FakeRemote {
    fetch: FetchBehavior,
    accepts_writes: bool,
    fail_saves: bool,
    save_delay: Duration,
    gate: Option<Mutex<GateHooks>>,
    fetches: Mutex<usize>,
    saves: Mutex<Vec<RecordedSave>>,
}

impl FakeRemote {
    pub(crate) fn new(fetch: FetchBehavior) -> Self {
        Self {
            fetch,
            accepts_writes: true,
            fail_saves: false,
            save_delay: Duration::ZERO,
            gate: None,
            fetches: Mutex::new(0),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn without_credential(mut self) -> Self {
        self.accepts_writes = false;
        self
    }

    pub(crate) fn failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    pub(crate) fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    /// Every save blocks until the returned gate releases it.
    pub(crate) fn gated_saves(mut self) -> (Self, SaveGate) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.gate = Some(Mutex::new(GateHooks {
            started: started_tx,
            release: release_rx,
        }));
        let gate = SaveGate {
            started: started_rx,
            release: release_tx,
        };
        (self, gate)
    }

    pub(crate) fn fetch_count(&self) -> usize {
        *self.fetches.lock().expect("lock fetches")
    }

    pub(crate) fn saves(&self) -> Vec<RecordedSave> {
        self.saves.lock().expect("lock saves").clone()
    }

    pub(crate) fn saved_seconds(&self) -> Vec<u64> {
        self.saves().into_iter().map(|save| save.time_seconds).collect()
    }
}

impl RemoteProgressStore for FakeRemote {
    fn fetch(&self, _item: &PlaybackItem) -> Result<Option<f64>, StoreError> {
        *self.fetches.lock().expect("lock fetches") += 1;
        match self.fetch {
            FetchBehavior::Found(seconds) => Ok(Some(seconds)),
            FetchBehavior::NotFound => Ok(None),
            FetchBehavior::Fail => Err(StoreError::Transport("connection refused".to_string())),
        }
    }

    fn save(&self, item: &PlaybackItem, time_seconds: u64) -> Result<SaveOutcome, StoreError> {
        if !self.accepts_writes {
            return Ok(SaveOutcome::Skipped);
        }
        if let Some(gate) = &self.gate {
            let hooks = gate.lock().expect("lock save gate");
            let _ = hooks.started.send(time_seconds);
            let _ = hooks.release.recv_timeout(Duration::from_secs(5));
        }
        if !self.save_delay.is_zero() {
            std::thread::sleep(self.save_delay);
        }
        self.saves.lock().expect("lock saves").push(RecordedSave {
            item_id: item.item_id.clone(),
            parent_id: item.parent_id.clone(),
            time_seconds,
        });
        if self.fail_saves {
            return Err(StoreError::status(500, "boom"));
        }
        Ok(SaveOutcome::Saved)
    }

    fn accepts_writes(&self) -> bool {
        self.accepts_writes
    }
}
