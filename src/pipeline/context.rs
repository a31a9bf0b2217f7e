// The generation key: which snapshot of the song, with which mix, over which bars.
//
// Two contexts are equal when they point at the *same* snapshots (Arc identity),
// not when the snapshots happen to hold equal data. The document hands out a
// fresh Arc<Song> on every edit, so a new Arc means "something changed".

use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

use super::song::{Mix, Song};

#[derive(Clone, Debug)]
pub struct SongContext {
    song: Arc<Song>,
    mix: Arc<Mix>,
    bars: Option<Range<u32>>, // structure bars; None = the whole song
}

impl SongContext {
    pub fn new(song: Arc<Song>, mix: Arc<Mix>) -> Self {
        Self { song, mix, bars: None }
    }

    // Restricts playback to a slice of the structure, clamped to the song
    pub fn with_bar_range(mut self, bars: Range<u32>) -> Self {
        let total = self.song.structure_bars();
        let start = bars.start.min(total);
        let end = bars.end.clamp(start, total);
        self.bars = Some(start..end);
        self
    }

    pub fn song(&self) -> &Arc<Song> {
        &self.song
    }

    pub fn mix(&self) -> &Arc<Mix> {
        &self.mix
    }

    pub fn bar_range(&self) -> Option<&Range<u32>> {
        self.bars.as_ref()
    }

    // First structure bar this context plays from
    pub fn origin_bar(&self) -> u32 {
        self.bars.as_ref().map(|r| r.start).unwrap_or(0)
    }

    // One past the last playable structure bar
    pub fn end_bar(&self) -> u32 {
        self.bars
            .as_ref()
            .map(|r| r.end)
            .unwrap_or_else(|| self.song.structure_bars())
    }

    pub fn contains_bar(&self, bar: u32) -> bool {
        bar >= self.origin_bar() && bar < self.end_bar()
    }

    // Same mix and bar range over a newer song snapshot
    pub fn retarget(&self, song: Arc<Song>) -> Self {
        let fresh = Self::new(song, self.mix.clone());
        match &self.bars {
            Some(r) => fresh.with_bar_range(r.clone()),
            None => fresh,
        }
    }

    pub fn with_mix(&self, mix: Arc<Mix>) -> Self {
        Self { song: self.song.clone(), mix, bars: self.bars.clone() }
    }
}

impl PartialEq for SongContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.song, &other.song)
            && Arc::ptr_eq(&self.mix, &other.mix)
            && self.bars == other.bars
    }
}

impl Eq for SongContext {}

impl Hash for SongContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.song).hash(state);
        Arc::as_ptr(&self.mix).hash(state);
        self.bars.hash(state);
    }
}
