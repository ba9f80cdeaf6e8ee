use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{
    EpisodeList, EpisodeSequencer, LocalProgressStore, PlaybackItem, ProgressRecord,
    ProgressWriter, RemoteProgressStore, SessionPhase, Subscription, SurfaceEvent, SurfaceEvents,
    ThrottleState, VideoSurface, WriteDispatcher, WritePolicy, resolve,
};

/// One playback of one item: resolve once, throttle write-backs while
/// playing, compute the next episode on end-of-media.
pub(crate) struct PlaybackSession {
    item: PlaybackItem,
    resume: ProgressRecord,
    writer: ProgressWriter,
    sequencer: EpisodeSequencer,
    skip_next_sample: bool,
}

impl PlaybackSession {
    pub(crate) fn start(
        item: PlaybackItem,
        episodes: EpisodeList,
        remote: Arc<dyn RemoteProgressStore>,
        local: Rc<dyn LocalProgressStore>,
        policy: WritePolicy,
    ) -> Self {
        let resume = resolve(&item, remote.as_ref(), local.as_ref());
        let state = ThrottleState::from_resume_point(resume.time_seconds);
        let dispatcher = WriteDispatcher::new(item.clone(), remote, policy);
        let writer = ProgressWriter::new(&item, state, local, dispatcher);
        let sequencer = EpisodeSequencer::new(item.item_id.clone(), episodes);

        info!(
            item_id = %item.item_id,
            kind = item.kind.label(),
            resume_seconds = resume.time_seconds,
            source = resume.source.map(|source| source.label()).unwrap_or("none"),
            policy = policy.label(),
            "playback session started"
        );

        Self {
            item,
            resume,
            writer,
            sequencer,
            skip_next_sample: false,
        }
    }

    pub(crate) fn item(&self) -> &PlaybackItem {
        &self.item
    }

    pub(crate) fn resume_point(&self) -> &ProgressRecord {
        &self.resume
    }

    /// Loads the source and seeks once to the resume point. The first sample
    /// after a seek still carries the pre-seek position and is ignored.
    pub(crate) fn attach(
        &mut self,
        surface: &mut dyn VideoSurface,
        source_url: &str,
    ) -> io::Result<()> {
        surface.load(source_url)?;
        if self.resume.has_progress() {
            surface.seek(self.resume.time_seconds)?;
            self.skip_next_sample = true;
        }
        Ok(())
    }

    pub(crate) fn handle(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::TimeUpdate(seconds) => {
                self.on_time_update(seconds);
            }
            SurfaceEvent::Ended => {
                self.on_ended();
            }
        }
    }

    pub(crate) fn on_time_update(&mut self, current_seconds: f64) -> Option<u64> {
        if !self.sequencer.is_playing() {
            return None;
        }
        if self.skip_next_sample {
            self.skip_next_sample = false;
            debug!(item_id = %self.item.item_id, current_seconds, "sample after seek ignored");
            return None;
        }
        self.writer.on_time_update(current_seconds)
    }

    pub(crate) fn on_ended(&mut self) -> Option<&PlaybackItem> {
        self.sequencer.on_ended()
    }

    pub(crate) fn phase(&self) -> &SessionPhase {
        self.sequencer.phase()
    }

    pub(crate) fn advance_target(&self) -> Option<&PlaybackItem> {
        self.sequencer.advance_target()
    }

    pub(crate) fn last_persisted_seconds(&self) -> u64 {
        self.writer.state().last_persisted_seconds()
    }

    pub(crate) fn pending_writes(&self) -> usize {
        self.writer.in_flight()
    }

    /// Waits for handed-off remote writes; their results are only logged.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        self.writer.wait_idle(timeout)
    }
}

/// Routes surface events into `session` until the subscription is dropped.
pub(crate) fn observe(session: &Rc<RefCell<PlaybackSession>>, events: &SurfaceEvents) -> Subscription {
    let session = Rc::clone(session);
    events.subscribe(move |event| session.borrow_mut().handle(event))
}
