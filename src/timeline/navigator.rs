// Part-to-part skipping on the structure timeline, like next/previous track
// buttons on a player.

use crate::pipeline::song::SongPart;
use crate::shared::{LoopMode, Position, PREVIOUS_PART_BEAT_THRESHOLD};

#[derive(Clone, Copy, Debug)]
pub struct SongPartNavigator<'a> {
    parts: &'a [SongPart], // structure order
}

impl<'a> SongPartNavigator<'a> {
    pub fn new(parts: &'a [SongPart]) -> Self {
        Self { parts }
    }

    fn index_of(&self, bar: u32) -> Option<usize> {
        self.parts.iter().position(|p| p.contains(bar))
    }

    /// Start of the part after the one holding `current_bar`. Past the last part
    /// this wraps to the first only when looping.
    pub fn next(&self, current_bar: u32, loop_mode: LoopMode) -> Option<u32> {
        let idx = self.index_of(current_bar)?;
        match self.parts.get(idx + 1) {
            Some(part) => Some(part.start_bar),
            None if loop_mode == LoopMode::Continuous => self.parts.first().map(|p| p.start_bar),
            None => None,
        }
    }

    /// Right at the top of a part (first bar, under two beats in) this goes to
    /// the part before; anywhere later it restarts the current part.
    pub fn previous(&self, current: Position, loop_mode: LoopMode) -> Option<u32> {
        let idx = self.index_of(current.bar)?;
        let part = &self.parts[idx];

        let at_top = current.bar == part.start_bar && current.beat < PREVIOUS_PART_BEAT_THRESHOLD;
        if !at_top {
            return Some(part.start_bar);
        }

        match idx.checked_sub(1) {
            Some(prev) => Some(self.parts[prev].start_bar),
            None if loop_mode == LoopMode::Continuous => self.parts.last().map(|p| p.start_bar),
            None => None,
        }
    }
}
