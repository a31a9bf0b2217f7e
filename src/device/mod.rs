// The output side of the transport. The real driver (note scheduling, MIDI,
// audio) is somebody else's problem; the transport only needs to arm it, start
// it at a bar, halt it, resume it, and hear back where it is.

use std::sync::Arc;

use crate::error::DeviceError;
use crate::session::GeneratedSequence;
use crate::shared::Position;

mod clock;

pub use clock::{ClockCommand, ClockDevice};

// What the device reports from its own thread
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeviceEvent {
    Position(Position),
    EndOfSequence,
}

pub trait OutputDevice: Send {
    /// Hands the device the sequence to render. Replaces whatever was loaded
    /// without moving the playhead.
    fn load(&mut self, sequence: Arc<GeneratedSequence>) -> Result<(), DeviceError>;

    /// Starts emitting from the top of `bar`. The first position reported
    /// afterwards must be in `bar`; anything reported before that is treated
    /// as left over from the old position and dropped.
    fn start_at(&mut self, bar: u32) -> Result<(), DeviceError>;

    fn halt_emission(&mut self);

    /// Same contract as [`start_at`](Self::start_at), for `position.bar`.
    fn resume_from(&mut self, position: Position) -> Result<(), DeviceError>;

    fn set_loop_count(&mut self, count: u32);
}
