use std::cell::{Cell, RefCell};
use std::io::{self, BufRead, Write};
use std::rc::{Rc, Weak};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SurfaceEvent {
    TimeUpdate(f64),
    Ended,
}

type Listener = Rc<RefCell<Box<dyn FnMut(SurfaceEvent)>>>;
type ListenerTable = RefCell<Vec<(u64, Listener)>>;

/// Observer registry for a video surface's time-update and end signals.
#[derive(Default)]
pub(crate) struct SurfaceEvents {
    listeners: Rc<ListenerTable>,
    next_id: Cell<u64>,
}

impl SurfaceEvents {
    pub(crate) fn subscribe(&self, listener: impl FnMut(SurfaceEvent) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let listener: Listener = Rc::new(RefCell::new(Box::new(listener)));
        self.listeners.borrow_mut().push((id, listener));
        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    /// Delivers `event` to every listener registered when the call starts
    /// and still registered when its turn comes. A listener re-entered by
    /// its own callback is skipped.
    pub(crate) fn emit(&self, event: SurfaceEvent) {
        // The table stays sorted by id, so walking ids needs no snapshot.
        let limit = self.next_id.get();
        let mut cursor = 0;
        while let Some((id, listener)) = self.listener_from(cursor, limit) {
            cursor = id + 1;
            if let Ok(mut callback) = listener.try_borrow_mut() {
                (*callback)(event);
            }
        }
    }

    fn listener_from(&self, cursor: u64, limit: u64) -> Option<(u64, Listener)> {
        let listeners = self.listeners.borrow();
        let index = listeners.partition_point(|(id, _)| *id < cursor);
        listeners
            .get(index)
            .filter(|(id, _)| *id < limit)
            .map(|(id, listener)| (*id, Rc::clone(listener)))
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

/// Unsubscribes its listener when dropped.
#[must_use = "dropping a subscription unsubscribes the listener"]
pub(crate) struct Subscription {
    id: u64,
    listeners: Weak<ListenerTable>,
}

impl Subscription {
    pub(crate) fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

/// The player collaborator: takes a source and a one-time seek, and emits
/// time updates followed by a single end-of-media signal.
pub(crate) trait VideoSurface {
    fn load(&mut self, source_url: &str) -> io::Result<()>;

    fn seek(&mut self, seconds: f64) -> io::Result<()>;

    fn events(&self) -> &SurfaceEvents;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpEnd {
    Ended,
    EndOfInput,
}

/// Line-driven surface: instructions are printed to `out`, samples are read
/// from any `BufRead` (an external player piping its position, or a user).
pub(crate) struct ConsoleSurface<W: Write> {
    out: W,
    events: SurfaceEvents,
}

impl<W: Write> ConsoleSurface<W> {
    pub(crate) fn new(out: W) -> Self {
        Self {
            out,
            events: SurfaceEvents::default(),
        }
    }

    /// Feeds samples to listeners until end-of-media or end of input.
    pub(crate) fn pump<R: BufRead>(&self, reader: &mut R) -> io::Result<PumpEnd> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(PumpEnd::EndOfInput);
            }
            match parse_sample_line(&line) {
                Ok(Some(SurfaceEvent::Ended)) => {
                    self.events.emit(SurfaceEvent::Ended);
                    return Ok(PumpEnd::Ended);
                }
                Ok(Some(event)) => self.events.emit(event),
                Ok(None) => {}
                Err(reason) => warn!("{reason}; sample skipped"),
            }
        }
    }

    pub(crate) fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> VideoSurface for ConsoleSurface<W> {
    fn load(&mut self, source_url: &str) -> io::Result<()> {
        writeln!(self.out, "source {source_url}")
    }

    fn seek(&mut self, seconds: f64) -> io::Result<()> {
        writeln!(self.out, "seek {seconds}")
    }

    fn events(&self) -> &SurfaceEvents {
        &self.events
    }
}

/// Parses one sample line: seconds (`83.4`), clock form (`1:23`,
/// `1:02:03`) or `end`. Blank lines yield `Ok(None)`.
pub(crate) fn parse_sample_line(line: &str) -> Result<Option<SurfaceEvent>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.eq_ignore_ascii_case("end") || trimmed.eq_ignore_ascii_case("ended") {
        return Ok(Some(SurfaceEvent::Ended));
    }
    parse_clock_seconds(trimmed)
        .map(|seconds| Some(SurfaceEvent::TimeUpdate(seconds)))
        .ok_or_else(|| format!("unrecognized sample `{trimmed}`"))
}

fn parse_clock_seconds(raw: &str) -> Option<f64> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    let (last, leading) = parts.split_last()?;
    let seconds = last.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    if leading.is_empty() {
        return Some(seconds);
    }
    if seconds >= 60.0 {
        return None;
    }

    let mut minutes: u64 = 0;
    for (idx, part) in leading.iter().enumerate() {
        let value = part.trim().parse::<u64>().ok()?;
        // Minutes after an hour field are bounded like clock minutes.
        if idx > 0 && value >= 60 {
            return None;
        }
        minutes = minutes.checked_mul(60)?.checked_add(value)?;
    }
    Some(minutes as f64 * 60.0 + seconds)
}
