//! Transport control for an arranged song.
//!
//! Plays, pauses, resumes and stops a generated sequence, tracks the live
//! playhead, and translates between the lead-sheet timeline (sections) and the
//! arranged structure timeline (song parts that place those sections, possibly
//! repeated or reordered).
//!
//! - [`TransportController`] - the state machine everything else hangs off
//! - [`PlaybackSession`] - one generated, renderable instance of a [`SongContext`]
//! - [`PositionTranslator`] / [`SongPartNavigator`] - the bar arithmetic
//! - [`OutputDevice`] / [`SequenceGenerator`] - the seams to the renderer and the
//!   content generator

pub mod config;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod shared;
pub mod timeline;
pub mod transport;

pub use config::TransportConfig;
pub use device::{ClockDevice, DeviceEvent, OutputDevice};
pub use error::{DeviceError, GenerationError, SongError, TimelineError, TransportError};
pub use pipeline::context::SongContext;
pub use pipeline::song::{Mix, MixChannel, PartId, Section, SectionId, Song, SongPart};
pub use session::{
    CancelToken, ClickTrack, GeneratedSequence, PlaybackSession, SequenceGenerator, SessionId, SessionKind,
    SessionState,
};
pub use shared::{LoopMode, PlaybackState, Position, TransportEvent, PREVIOUS_PART_BEAT_THRESHOLD};
pub use timeline::{LeadSheetPosition, PositionTranslator, SongPartNavigator};
pub use transport::TransportController;
