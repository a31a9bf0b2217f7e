//! # Error Types
//!
//! Everything the transport can refuse or fail at.
//!
//! - `TransportError` - returned by controller commands
//! - `GenerationError` - the content generator rejected a context, or the task was cancelled
//! - `DeviceError` - the output device could not be armed
//! - `TimelineError` - a structure bar or part that does not exist on the timeline
//! - `SongError` - a song document that breaks the section/part invariants
//!
//! A lead-sheet bar with no song part to land on is not an error; the translator
//! returns `None` for it.

use thiserror::Error;

use crate::pipeline::song::{PartId, SectionId};
use crate::shared::PlaybackState;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The generator rejected the context. The operation was aborted and the
    /// transport is back in the state it was in before the call.
    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),

    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(#[from] DeviceError),

    /// The command is illegal in the current state. This is a caller bug, the
    /// state is never coerced to make the command fit.
    ///
    /// ```
    /// # use barline::{PlaybackState, TransportError};
    /// let err = TransportError::InvalidTransition {
    ///     operation: "pause",
    ///     state: PlaybackState::Stopped,
    /// };
    /// assert_eq!(err.to_string(), "Cannot pause while Stopped");
    /// ```
    #[error("Cannot {operation} while {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: PlaybackState,
    },

    #[error("Bar {bar} is outside the structure (0..{total})")]
    BarOutOfRange { bar: u32, total: u32 },

    #[error("No song is loaded")]
    NoSong,

    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("{0}")]
    Rejected(String),

    #[error("generation was cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("{0}")]
    Unavailable(String),

    #[error("device clock has shut down")]
    Disconnected,

    #[error("no sequence loaded")]
    NothingLoaded,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimelineError {
    #[error("Structure bar {bar} is not inside any song part")]
    OutsideStructure { bar: u32 },

    #[error("Song part {part:?} references unknown section {section:?}")]
    UnknownSection { part: PartId, section: SectionId },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SongError {
    #[error("Song part {part:?} references unknown section {section:?}")]
    UnknownSection { part: PartId, section: SectionId },

    #[error("Song part {part:?} is {part_len} bars but its section is {section_len}")]
    LengthMismatch {
        part: PartId,
        part_len: u32,
        section_len: u32,
    },

    #[error("Section {0:?} has zero length")]
    EmptySection(SectionId),

    #[error("Section {0:?} overlaps or precedes the section before it")]
    SectionsOutOfOrder(SectionId),

    #[error("Song part {0:?} overlaps or precedes the part before it")]
    PartsOutOfOrder(PartId),

    #[error("Song part {part:?} leaves a gap in the structure (expected it at bar {expected})")]
    StructureGap { part: PartId, expected: u32 },

    #[error("Section {0:?} runs past the last representable bar")]
    SectionOverflow(SectionId),

    #[error("Song part {0:?} runs past the last representable bar")]
    PartOverflow(PartId),

    #[error("Duplicate section id {0:?}")]
    DuplicateSection(SectionId),

    #[error("Tempo must be positive, got {0}")]
    InvalidTempo(f32),
}
