// A playback session is one renderable instance of a song context: the key it
// was generated from, the generated data, and where it is in its lifecycle.
//
//   New --generate--> Generated <--song changed / regenerate--> Outdated
//    \                   |                                          |
//     `------------------+-------------- close ---------------------'--> Closed
//
// Generation itself happens elsewhere (see flight.rs); a session only records
// the outcome.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::pipeline::context::SongContext;
use crate::shared::LoopMode;

mod flight;
mod generator;

pub use flight::{FlightHandle, GenerationFlights, Outcome};
pub use generator::{CancelToken, ClickTrack, GeneratedSequence, SequenceEvent, SequenceGenerator};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, never reused. Shows up as `#7` in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    New,
    Generated,
    Outdated,
    Closed,
}

// Static sessions are frozen snapshots; dynamic ones follow song edits and get
// regenerated while installed (auto-updating preview)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    Static,
    #[default]
    Dynamic,
}

#[derive(Debug)]
pub struct PlaybackSession {
    id: SessionId,
    kind: SessionKind,
    context: SongContext,
    state: SessionState,
    loop_mode: LoopMode,
    data: Option<Arc<GeneratedSequence>>,
}

impl PlaybackSession {
    pub fn new(context: SongContext, kind: SessionKind, loop_mode: LoopMode) -> Self {
        Self {
            id: SessionId::next(),
            kind,
            context,
            state: SessionState::New,
            loop_mode,
            data: None,
        }
    }

    pub fn new_static(context: SongContext) -> Self {
        Self::new(context, SessionKind::Static, LoopMode::Off)
    }

    pub fn new_dynamic(context: SongContext) -> Self {
        Self::new(context, SessionKind::Dynamic, LoopMode::Off)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == SessionKind::Dynamic
    }

    pub fn context(&self) -> &SongContext {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, loop_mode: LoopMode) {
        self.loop_mode = loop_mode;
    }

    pub fn generated(&self) -> Option<&Arc<GeneratedSequence>> {
        self.data.as_ref()
    }

    pub fn is_generated(&self) -> bool {
        self.state == SessionState::Generated
    }

    // New and Outdated sessions need a generation pass before they can play
    pub fn needs_generation(&self) -> bool {
        matches!(self.state, SessionState::New | SessionState::Outdated)
    }

    pub fn origin_bar(&self) -> u32 {
        self.context.origin_bar()
    }

    pub fn end_bar(&self) -> u32 {
        self.context.end_bar()
    }

    pub fn contains_bar(&self, bar: u32) -> bool {
        self.context.contains_bar(bar)
    }

    /// Records a finished generation pass. Only New/Outdated sessions accept it,
    /// and only for the context they currently hold.
    pub fn complete_generation(&mut self, context: &SongContext, data: Arc<GeneratedSequence>) -> bool {
        if !self.needs_generation() || *context != self.context {
            return false;
        }
        self.data = Some(data);
        self.state = SessionState::Generated;
        true
    }

    /// Points a dynamic session at a newer song snapshot. Static and closed
    /// sessions ignore this.
    pub fn retarget(&mut self, context: SongContext) -> bool {
        if self.kind == SessionKind::Static || self.state == SessionState::Closed {
            return false;
        }
        if context == self.context {
            return false;
        }
        self.context = context;
        if self.state == SessionState::Generated {
            self.state = SessionState::Outdated;
        }
        true
    }

    // Idempotent; releases the generated data
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            log::debug!("closing session {}", self.id);
        }
        self.state = SessionState::Closed;
        self.data = None;
    }
}
