// The transport state machine.
//
// All commands go through one mutex (`inner`), so overlapping user actions are
// applied one at a time. Two things happen off that lock:
//   - generation: play/resume drop the lock while they wait on a flight, so a
//     second play for the same context can attach to the same task
//   - device ticks: the pump thread only touches the playhead cell and the
//     event bus, never `inner`
//
// `epoch` is bumped whenever waits in progress must be abandoned (stop,
// disable, session replaced). A waiter that wakes up to a different epoch
// reports the generation as cancelled and leaves the state alone.
//
// Every start/seek/resume is a jump. Until the device reports the target bar,
// ticks it queued before the jump are dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crossbeam_channel::Receiver;

use crate::config::TransportConfig;
use crate::device::{DeviceEvent, OutputDevice};
use crate::error::{DeviceError, GenerationError, TransportError};
use crate::pipeline::context::SongContext;
use crate::pipeline::song::{Mix, PartId, Song};
use crate::session::{
    FlightHandle, GeneratedSequence, GenerationFlights, PlaybackSession, SequenceGenerator, SessionId, SessionKind,
    SessionState,
};
use crate::shared::{LoopMode, PlaybackState, Position, TransportEvent};
use crate::timeline::{LeadSheetPosition, PositionTranslator, SongPartNavigator};

use super::events::EventBus;

// Where the device says we are, plus the bounds it must stay inside
struct Playhead {
    position: Position,
    live: bool,            // accept device ticks (only while Playing)
    awaiting: Option<u32>, // jump target the device hasn't reported yet
    origin: u32,
    end: u32,
}

impl Playhead {
    fn clamp(&self, p: Position) -> Position {
        if self.end <= self.origin {
            return Position::at_bar(self.origin);
        }
        if p.bar < self.origin {
            Position::at_bar(self.origin)
        } else if p.bar >= self.end {
            Position::at_bar(self.end - 1)
        } else {
            p
        }
    }
}

struct Inner {
    state: PlaybackState,
    song: Option<Arc<Song>>,
    mix: Arc<Mix>,
    session: Option<PlaybackSession>,
    device: Box<dyn OutputDevice>,
    session_kind: SessionKind,
    loop_mode: LoopMode,
    epoch: u64,
    pending: Vec<FlightHandle>,     // play/resume waits in progress
    refresh: Option<FlightHandle>, // background regeneration of the installed session
}

impl Inner {
    fn cancel_pending(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("cancelling {} pending generation wait(s)", self.pending.len());
        }
        for handle in self.pending.drain(..) {
            handle.cancel();
        }
        self.epoch += 1;
    }

    fn cancel_refresh(&mut self) {
        if let Some(handle) = self.refresh.take() {
            handle.cancel();
        }
    }

    fn forget_pending(&mut self, handle: &FlightHandle) {
        if let Some(i) = self.pending.iter().position(|h| h.same_task(handle)) {
            self.pending.swap_remove(i);
        }
    }

    fn live_session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref().filter(|s| s.state() != SessionState::Closed)
    }

    fn live_session_mut(&mut self) -> Option<&mut PlaybackSession> {
        self.session.as_mut().filter(|s| s.state() != SessionState::Closed)
    }

    // The installed session's context, else a fresh one over the current song
    fn current_context(&self) -> Result<SongContext, TransportError> {
        if let Some(session) = self.live_session() {
            return Ok(session.context().clone());
        }
        let song = self.song.clone().ok_or(TransportError::NoSong)?;
        Ok(SongContext::new(song, self.mix.clone()))
    }

    fn arm(&mut self, data: &Arc<GeneratedSequence>, loop_mode: LoopMode, from_bar: u32) -> Result<(), DeviceError> {
        self.device.load(data.clone())?;
        self.device.set_loop_count(loop_mode.loop_count());
        self.device.start_at(from_bar)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    playhead: Arc<Mutex<Playhead>>,
    events: Arc<EventBus>,
    flights: GenerationFlights,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, new: PlaybackState) {
        let old = inner.state;
        if old == new {
            return;
        }
        inner.state = new;
        log::info!("transport {old:?} -> {new:?}");
        self.events.publish(TransportEvent::StateChanged { old, new });
    }

    // Swaps the installed session, closing the old one
    fn install(&self, inner: &mut Inner, session: Option<PlaybackSession>) {
        let old = inner.session.take().map(|mut s| {
            s.close();
            s.id()
        });
        let new = session.as_ref().map(PlaybackSession::id);
        inner.session = session;

        let (origin, end) = inner
            .session
            .as_ref()
            .map(|s| (s.origin_bar(), s.end_bar()))
            .unwrap_or((0, 0));
        self.set_bounds(origin, end);

        if old != new {
            log::debug!("session {old:?} -> {new:?}");
            self.events.publish(TransportEvent::SessionChanged { old, new });
        }
    }

    fn set_bounds(&self, origin: u32, end: u32) {
        let mut ph = lock(&self.playhead);
        ph.origin = origin;
        ph.end = end;
    }

    fn set_playhead(&self, position: Position, live: bool) {
        let mut ph = lock(&self.playhead);
        let old = ph.position;
        let new = ph.clamp(position);
        ph.position = new;
        ph.live = live;
        drop(ph);
        if old != new {
            self.events.publish(TransportEvent::PositionChanged { old, new });
        }
    }

    fn expect_jump(&self, bar: u32) {
        lock(&self.playhead).awaiting = Some(bar);
    }

    fn cancel_jump(&self) {
        lock(&self.playhead).awaiting = None;
    }

    // Loads and starts the device at `from_bar`. A device that fails is halted again.
    fn arm_device(
        &self,
        inner: &mut Inner,
        data: &Arc<GeneratedSequence>,
        loop_mode: LoopMode,
        from_bar: u32,
    ) -> Result<(), DeviceError> {
        self.expect_jump(from_bar);
        let armed = inner.arm(data, loop_mode, from_bar);
        if armed.is_err() {
            self.cancel_jump();
            inner.device.halt_emission();
        }
        armed
    }

    fn set_live(&self, live: bool) {
        lock(&self.playhead).live = live;
    }

    fn position(&self) -> Position {
        lock(&self.playhead).position
    }

    fn origin(&self) -> u32 {
        lock(&self.playhead).origin
    }

    fn enter_playing(&self, inner: &mut Inner, from_bar: u32) {
        self.set_playhead(Position::at_bar(from_bar), true);
        self.set_state(inner, PlaybackState::Playing);
    }

    // Playing: restart the device at `bar`. Paused: just move the frozen playhead.
    fn seek_locked(&self, inner: &mut Inner, bar: u32, operation: &'static str) -> Result<(), TransportError> {
        let end = match inner.live_session() {
            Some(session) if inner.state.is_active() => {
                if !session.contains_bar(bar) {
                    return Err(TransportError::BarOutOfRange { bar, total: session.end_bar() });
                }
                session.end_bar()
            }
            _ => {
                return Err(TransportError::InvalidTransition {
                    operation,
                    state: inner.state,
                });
            }
        };
        log::debug!("{operation} -> bar {bar} (of {end})");

        match inner.state {
            PlaybackState::Playing => {
                self.expect_jump(bar);
                if let Err(e) = inner.device.start_at(bar) {
                    self.cancel_jump();
                    return Err(e.into());
                }
                self.set_playhead(Position::at_bar(bar), true);
            }
            _ => self.set_playhead(Position::at_bar(bar), false),
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the transport state, the installed session and the playhead.
pub struct TransportController {
    shared: Arc<Shared>,
}

impl TransportController {
    /// `ticks` is the device's outbound event stream. The controller starts in
    /// `Disabled`; attach a song with [`set_song`](Self::set_song) and enable it.
    pub fn new(
        device: Box<dyn OutputDevice>,
        ticks: Receiver<DeviceEvent>,
        generator: Arc<dyn SequenceGenerator>,
        config: &TransportConfig,
    ) -> std::io::Result<Self> {
        let playhead = Arc::new(Mutex::new(Playhead {
            position: Position::default(),
            live: false,
            awaiting: None,
            origin: 0,
            end: 0,
        }));
        let events = Arc::new(EventBus::new());

        let pump_playhead = playhead.clone();
        let pump_events = events.clone();
        std::thread::Builder::new()
            .name("barline-ticks".to_string())
            .spawn(move || pump_ticks(ticks, pump_playhead, pump_events))?;

        let inner = Inner {
            state: PlaybackState::Disabled,
            song: None,
            mix: Arc::new(Mix::default()),
            session: None,
            device,
            session_kind: config.session_kind,
            loop_mode: config.loop_mode,
            epoch: 0,
            pending: Vec::new(),
            refresh: None,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                playhead,
                events,
                flights: GenerationFlights::new(generator),
            }),
        })
    }

    // ── Observers ──────────────────────────────────────────────────

    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    pub fn position(&self) -> Position {
        self.shared.position()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.lock().session.as_ref().map(PlaybackSession::id)
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.shared.lock().session.as_ref().map(PlaybackSession::state)
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.shared.lock().loop_mode
    }

    pub fn song(&self) -> Option<Arc<Song>> {
        self.shared.lock().song.clone()
    }

    /// Generation tasks spawned over the controller's lifetime.
    pub fn generation_tasks_started(&self) -> usize {
        self.shared.flights.tasks_started()
    }

    /// play/resume calls currently waiting on generation.
    pub fn pending_generations(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// The current position on the lead sheet, via the installed session's song
    /// (or the current song when nothing is installed).
    pub fn lead_sheet_position(&self) -> Result<LeadSheetPosition, TransportError> {
        let song = {
            let inner = self.shared.lock();
            match inner.live_session() {
                Some(session) => session.context().song().clone(),
                None => inner.song.clone().ok_or(TransportError::NoSong)?,
            }
        };
        let bar = self.shared.position().bar;
        Ok(PositionTranslator::for_song(&song).to_lead_sheet_position(bar)?)
    }

    // ── Document wiring ────────────────────────────────────────────

    /// Attaches a new snapshot of the song. A dynamic installed session follows
    /// it: it goes Outdated, and while playing it is regenerated in the
    /// background and swapped into the device. The returned handle reports how
    /// that regeneration went.
    pub fn set_song(&self, song: Arc<Song>) -> Option<FlightHandle> {
        let mut inner = self.shared.lock();
        inner.song = Some(song.clone());
        self.retarget_installed(&mut inner, |ctx| ctx.retarget(song))
    }

    pub fn set_mix(&self, mix: Arc<Mix>) -> Option<FlightHandle> {
        let mut inner = self.shared.lock();
        inner.mix = mix.clone();
        self.retarget_installed(&mut inner, |ctx| ctx.with_mix(mix))
    }

    fn retarget_installed(
        &self,
        inner: &mut Inner,
        retarget: impl FnOnce(&SongContext) -> SongContext,
    ) -> Option<FlightHandle> {
        let session = inner.session.as_mut()?;
        let context = retarget(session.context());
        if !session.retarget(context.clone()) {
            return None;
        }
        let (session_id, origin, end) = (session.id(), session.origin_bar(), session.end_bar());
        log::info!("session {session_id} outdated by a song change");

        self.shared.set_bounds(origin, end);
        let live = inner.state == PlaybackState::Playing;
        self.shared.set_playhead(self.shared.position(), live);

        inner.cancel_refresh();
        if inner.state != PlaybackState::Playing {
            return None; // regenerated on the next play/resume
        }

        let handle = self.shared.flights.request(&context);
        inner.refresh = Some(handle.clone());
        let weak = Arc::downgrade(&self.shared);
        let worker_handle = handle.clone();
        let spawned = std::thread::Builder::new()
            .name("barline-refresh".to_string())
            .spawn(move || apply_refresh(weak, session_id, worker_handle));
        if let Err(e) = spawned {
            log::warn!("could not start background regeneration: {e}");
            inner.refresh = None;
            handle.cancel();
        }
        Some(handle)
    }

    // ── Commands ───────────────────────────────────────────────────

    pub fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();
        match (enabled, inner.state) {
            (true, PlaybackState::Disabled) => {
                if inner.song.is_none() {
                    return Err(TransportError::NoSong);
                }
                let origin = self.shared.origin();
                self.shared.set_playhead(Position::at_bar(origin), false);
                self.shared.set_state(&mut inner, PlaybackState::Stopped);
            }
            (true, _) | (false, PlaybackState::Disabled) => {}
            (false, state) => {
                if state.is_active() {
                    inner.device.halt_emission();
                }
                inner.cancel_pending();
                inner.cancel_refresh();
                self.shared.install(&mut inner, None);
                self.shared.set_playhead(Position::default(), false);
                self.shared.set_state(&mut inner, PlaybackState::Disabled);
            }
        }
        Ok(())
    }

    /// Starts playback of the current context at structure bar `from_bar`.
    /// Returns the session that ended up playing.
    pub fn play(&self, from_bar: u32) -> Result<SessionId, TransportError> {
        let context = {
            let inner = self.shared.lock();
            if inner.state != PlaybackState::Stopped {
                return Err(TransportError::InvalidTransition {
                    operation: "play",
                    state: inner.state,
                });
            }
            inner.current_context()?
        };
        self.play_context(context, from_bar)
    }

    /// Like [`play`](Self::play), with a context the caller already holds.
    pub fn play_context(&self, context: SongContext, from_bar: u32) -> Result<SessionId, TransportError> {
        let (handle, epoch, mut candidate, seen_song, seen_mix) = {
            let mut inner = self.shared.lock();
            if inner.state != PlaybackState::Stopped {
                return Err(TransportError::InvalidTransition {
                    operation: "play",
                    state: inner.state,
                });
            }
            if !context.contains_bar(from_bar) {
                return Err(TransportError::BarOutOfRange {
                    bar: from_bar,
                    total: context.end_bar(),
                });
            }

            let reuse = inner.live_session().is_some_and(|s| *s.context() == context);
            if reuse {
                if let Some(data) = inner.session.as_ref().filter(|s| s.is_generated()).and_then(|s| s.generated()) {
                    // already generated, straight to the device
                    let data = data.clone();
                    return self.start_installed(&mut inner, &data, from_bar);
                }
            }

            let candidate = (!reuse).then(|| PlaybackSession::new(context.clone(), inner.session_kind, inner.loop_mode));
            let handle = self.shared.flights.request(&context);
            inner.pending.push(handle.clone());
            (handle, inner.epoch, candidate, inner.song.clone(), inner.mix.clone())
        };

        let outcome = handle.wait();

        let mut inner = self.shared.lock();
        inner.forget_pending(&handle);
        let close_candidate = |candidate: &mut Option<PlaybackSession>| {
            if let Some(c) = candidate.as_mut() {
                c.close();
            }
        };

        if inner.epoch != epoch {
            close_candidate(&mut candidate);
            return Err(GenerationError::Cancelled.into());
        }
        let data = match outcome {
            Ok(data) => data,
            Err(e) => {
                log::warn!("play aborted: {e}");
                close_candidate(&mut candidate);
                return Err(e.into());
            }
        };

        // a twin play() for the same context got here first
        if inner.state == PlaybackState::Playing {
            if let Some(session) = inner.live_session().filter(|s| *s.context() == context) {
                close_candidate(&mut candidate);
                return Ok(session.id());
            }
        }
        if inner.state != PlaybackState::Stopped {
            close_candidate(&mut candidate);
            return Err(TransportError::InvalidTransition {
                operation: "play",
                state: inner.state,
            });
        }

        match candidate {
            None => {
                // replacing the session bumps the epoch, so this is still ours
                let Some(session) = inner.live_session_mut() else {
                    return Err(GenerationError::Cancelled.into());
                };
                if !session.complete_generation(&context, data.clone()) && !session.is_generated() {
                    // edited while we waited: generate what it holds now
                    let current = session.context().clone();
                    drop(inner);
                    return self.play_context(current, from_bar);
                }
                let data = session.generated().cloned().unwrap_or(data);
                self.start_installed(&mut inner, &data, from_bar)
            }
            Some(mut session) => {
                session.complete_generation(&context, data.clone());
                let loop_mode = session.loop_mode();
                if let Err(e) = self.shared.arm_device(&mut inner, &data, loop_mode, from_bar) {
                    session.close();
                    return Err(e.into());
                }
                let id = session.id();
                self.shared.install(&mut inner, Some(session));
                self.shared.enter_playing(&mut inner, from_bar);

                // the song or mix moved on while we were generating
                let song_edit = inner
                    .song
                    .clone()
                    .filter(|song| !seen_song.as_ref().is_some_and(|seen| Arc::ptr_eq(seen, song)));
                let mix_edit = Some(inner.mix.clone()).filter(|mix| !Arc::ptr_eq(mix, &seen_mix));
                if song_edit.is_some() || mix_edit.is_some() {
                    self.retarget_installed(&mut inner, |ctx| {
                        let ctx = match song_edit {
                            Some(song) => ctx.retarget(song),
                            None => ctx.clone(),
                        };
                        match mix_edit {
                            Some(mix) => ctx.with_mix(mix),
                            None => ctx,
                        }
                    });
                }
                Ok(id)
            }
        }
    }

    fn start_installed(
        &self,
        inner: &mut Inner,
        data: &Arc<GeneratedSequence>,
        from_bar: u32,
    ) -> Result<SessionId, TransportError> {
        let Some((id, loop_mode)) = inner.session.as_ref().map(|s| (s.id(), s.loop_mode())) else {
            return Err(TransportError::NoSong);
        };
        self.shared.arm_device(inner, data, loop_mode, from_bar)?;
        self.shared.enter_playing(inner, from_bar);
        Ok(id)
    }

    pub fn pause(&self) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();
        match inner.state {
            PlaybackState::Paused => Ok(()),
            PlaybackState::Playing => {
                inner.device.halt_emission();
                self.shared.set_live(false);
                self.shared.set_state(&mut inner, PlaybackState::Paused);
                Ok(())
            }
            state => Err(TransportError::InvalidTransition { operation: "pause", state }),
        }
    }

    /// Picks up from the frozen position. An Outdated session is regenerated
    /// first, again if the song is edited during the wait; if that fails the
    /// transport stays Paused.
    pub fn resume(&self) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();
        if inner.state != PlaybackState::Paused {
            return Err(TransportError::InvalidTransition {
                operation: "resume",
                state: inner.state,
            });
        }
        let Some(session_id) = inner.session.as_ref().map(PlaybackSession::id) else {
            return Err(TransportError::InvalidTransition {
                operation: "resume",
                state: inner.state,
            });
        };

        loop {
            let Some(session) = inner.session.as_ref().filter(|s| s.id() == session_id) else {
                return Err(GenerationError::Cancelled.into());
            };
            if !session.needs_generation() {
                return self.resume_locked(&mut inner);
            }
            let handle = self.shared.flights.request(session.context());
            inner.pending.push(handle.clone());
            let epoch = inner.epoch;
            drop(inner);

            let outcome = handle.wait();

            inner = self.shared.lock();
            inner.forget_pending(&handle);
            if inner.epoch != epoch {
                return Err(GenerationError::Cancelled.into());
            }
            let data = outcome.inspect_err(|e| log::warn!("resume aborted, staying paused: {e}"))?;

            if inner.state != PlaybackState::Paused {
                return Err(TransportError::InvalidTransition {
                    operation: "resume",
                    state: inner.state,
                });
            }
            let Some(session) = inner.session.as_mut().filter(|s| s.id() == session_id) else {
                return Err(GenerationError::Cancelled.into());
            };
            if session.complete_generation(handle.context(), data.clone()) {
                inner.device.load(data)?;
            } else if session.needs_generation() {
                log::debug!("session {session_id} edited during regeneration, going again");
            }
        }
    }

    fn resume_locked(&self, inner: &mut Inner) -> Result<(), TransportError> {
        let position = self.shared.position();
        self.shared.expect_jump(position.bar);
        if let Err(e) = inner.device.resume_from(position) {
            self.shared.cancel_jump();
            return Err(e.into());
        }
        self.shared.set_live(true);
        self.shared.set_state(inner, PlaybackState::Playing);
        Ok(())
    }

    /// Halts playback and rewinds to the session origin. Also abandons any
    /// play() still waiting on generation.
    pub fn stop(&self) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();
        inner.cancel_pending();
        if !inner.state.is_active() {
            return Ok(());
        }
        inner.device.halt_emission();
        let origin = self.shared.origin();
        self.shared.set_playhead(Position::at_bar(origin), false);
        self.shared.set_state(&mut inner, PlaybackState::Stopped);
        Ok(())
    }

    /// Replaces the installed session (closing the old one). Only allowed while
    /// nothing is playing.
    pub fn set_playback_session(&self, session: PlaybackSession) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();
        if inner.state.is_active() {
            return Err(TransportError::InvalidTransition {
                operation: "set_playback_session",
                state: inner.state,
            });
        }
        inner.cancel_pending();
        inner.cancel_refresh();
        let origin = session.origin_bar();
        self.shared.install(&mut inner, Some(session));
        self.shared.set_playhead(Position::at_bar(origin), false);
        Ok(())
    }

    pub fn set_loop_mode(&self, loop_mode: LoopMode) {
        let mut inner = self.shared.lock();
        inner.loop_mode = loop_mode;
        if let Some(session) = inner.session.as_mut() {
            session.set_loop_mode(loop_mode);
        }
        if inner.state.is_active() {
            inner.device.set_loop_count(loop_mode.loop_count());
        }
    }

    pub fn change_paused_bar(&self, bar: u32) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();
        if inner.state != PlaybackState::Paused {
            return Err(TransportError::InvalidTransition {
                operation: "change_paused_bar",
                state: inner.state,
            });
        }
        self.shared.seek_locked(&mut inner, bar, "change_paused_bar")
    }

    pub fn seek(&self, bar: u32) -> Result<(), TransportError> {
        let mut inner = self.shared.lock();
        self.shared.seek_locked(&mut inner, bar, "seek")
    }

    /// Jumps to the start of the next song part. `Ok(None)` when there is none.
    pub fn skip_to_next_part(&self) -> Result<Option<u32>, TransportError> {
        self.skip_part("skip_to_next_part", |nav, position, loop_mode| nav.next(position.bar, loop_mode))
    }

    /// Restarts the current part, or goes to the previous one when already at
    /// its top.
    pub fn skip_to_previous_part(&self) -> Result<Option<u32>, TransportError> {
        self.skip_part("skip_to_previous_part", |nav, position, loop_mode| nav.previous(position, loop_mode))
    }

    fn skip_part(
        &self,
        operation: &'static str,
        pick: impl FnOnce(&SongPartNavigator<'_>, Position, LoopMode) -> Option<u32>,
    ) -> Result<Option<u32>, TransportError> {
        let mut inner = self.shared.lock();
        let target = match inner.live_session() {
            Some(session) if inner.state.is_active() => {
                let nav = SongPartNavigator::new(&session.context().song().parts);
                pick(&nav, self.shared.position(), session.loop_mode()).filter(|bar| session.contains_bar(*bar))
            }
            _ => return Err(TransportError::InvalidTransition { operation, state: inner.state }),
        };
        let Some(bar) = target else {
            log::debug!("{operation}: nothing to skip to");
            return Ok(None);
        };
        self.shared.seek_locked(&mut inner, bar, operation)?;
        Ok(Some(bar))
    }

    /// Seeks to a lead-sheet bar, resolving the song part through `preferred`
    /// first. `Ok(None)` when the section was never placed in the arrangement.
    pub fn seek_lead_sheet_bar(&self, lead_sheet_bar: u32, preferred: &[PartId]) -> Result<Option<u32>, TransportError> {
        let mut inner = self.shared.lock();
        let target = match inner.live_session() {
            Some(session) if inner.state.is_active() => {
                PositionTranslator::for_song(session.context().song()).to_structure_bar(lead_sheet_bar, preferred)
            }
            _ => {
                return Err(TransportError::InvalidTransition {
                    operation: "seek_lead_sheet_bar",
                    state: inner.state,
                });
            }
        };
        let Some(bar) = target else { return Ok(None) };
        self.shared.seek_locked(&mut inner, bar, "seek_lead_sheet_bar")?;
        Ok(Some(bar))
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.cancel_pending();
        inner.cancel_refresh();
        if inner.state.is_active() {
            inner.device.halt_emission();
        }
    }
}

// Device tick pump. Runs until the device drops its end of the channel.
fn pump_ticks(ticks: Receiver<DeviceEvent>, playhead: Arc<Mutex<Playhead>>, events: Arc<EventBus>) {
    for event in ticks.iter() {
        match event {
            DeviceEvent::Position(reported) => {
                let mut ph = lock(&playhead);
                if let Some(target) = ph.awaiting {
                    if reported.bar != target {
                        continue; // queued before the jump
                    }
                    ph.awaiting = None;
                }
                if !ph.live {
                    continue;
                }
                let old = ph.position;
                let new = ph.clamp(reported);
                ph.position = new;
                drop(ph);
                if old != new {
                    events.publish(TransportEvent::PositionChanged { old, new });
                }
            }
            DeviceEvent::EndOfSequence => {
                let current = {
                    let ph = lock(&playhead);
                    ph.live && ph.awaiting.is_none()
                };
                if current {
                    events.publish(TransportEvent::EndOfSequence);
                }
            }
        }
    }
    log::debug!("device tick stream closed");
}

// Waits out a background regeneration and swaps the result into the device,
// as long as the same session is still installed for the same context.
fn apply_refresh(shared: Weak<Shared>, session_id: SessionId, handle: FlightHandle) {
    let outcome = handle.wait();
    let Some(shared) = shared.upgrade() else { return };
    let mut inner = shared.lock();

    if inner.refresh.as_ref().is_some_and(|h| h.same_task(&handle)) {
        inner.refresh = None;
    }
    let data = match outcome {
        Ok(data) => data,
        Err(e) => {
            log::warn!("background regeneration failed, session stays outdated: {e}");
            return;
        }
    };
    let state = inner.state;
    let Some(session) = inner.session.as_mut().filter(|s| s.id() == session_id) else {
        return;
    };
    if !session.complete_generation(handle.context(), data.clone()) {
        return; // superseded by a newer edit
    }
    if state.is_active() {
        if let Err(e) = inner.device.load(data) {
            log::warn!("regenerated sequence not delivered to the device: {e}");
        }
    }
    log::info!("session {session_id} regenerated");
}
