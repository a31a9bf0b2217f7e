// Types every layer passes around: the transport state, the playhead position,
// loop policy and the events observers get.
//
// The rough picture:
//   - the controller (transport/) owns the state machine and the installed session
//   - the device (device/) runs its own clock and reports ticks back over a channel
//   - the timeline helpers (timeline/) do all the bar arithmetic between the
//     lead sheet and the arranged structure
//   - observers only ever see TransportEvents, never the controller's insides

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

// "previous" restarts the current part unless we're this close to its first beat
pub const PREVIOUS_PART_BEAT_THRESHOLD: f64 = 2.0;

// loop count handed to the device for LoopMode::Continuous
pub const LOOP_FOREVER: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    Disabled, // no song context attached
    Stopped,
    Paused,
    Playing,
}

impl PlaybackState {
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Paused)
    }
}

/// A point on the structure timeline (unless explicitly converted).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub bar: u32,
    pub beat: f64,
}

impl Position {
    pub fn new(bar: u32, beat: f64) -> Self {
        Self { bar, beat: beat.max(0.0) }
    }

    pub fn at_bar(bar: u32) -> Self {
        Self { bar, beat: 0.0 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopMode {
    #[default]
    Off, // play through once, seeking past the last part goes nowhere
    Continuous,
}

impl LoopMode {
    pub fn loop_count(self) -> u32 {
        match self {
            LoopMode::Off => 1,
            LoopMode::Continuous => LOOP_FOREVER,
        }
    }
}

// Everything an observer can hear about. Each change carries old and new values.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    StateChanged { old: PlaybackState, new: PlaybackState },
    SessionChanged { old: Option<SessionId>, new: Option<SessionId> },
    PositionChanged { old: Position, new: Position },
    // the device ran off the end with no loops left; the owner decides whether to stop
    EndOfSequence,
}
