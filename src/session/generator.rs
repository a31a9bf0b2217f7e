// The seam to whatever writes the actual notes. The transport doesn't know or
// care how content gets made; it hands over a context and gets a sequence back
// (eventually, possibly from another thread, possibly never if cancelled).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::GenerationError;
use crate::pipeline::context::SongContext;

/// Shared cancel flag. Generators are expected to poll it between chunks of work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    // `?`-friendly check for generator loops
    pub fn check(&self) -> Result<(), GenerationError> {
        if self.is_cancelled() {
            Err(GenerationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SequenceEvent {
    pub bar: u32, // structure bar
    pub beat: f64,
    pub channel: u8,
    pub pitch: u8,
    pub velocity: u8,
    pub length_beats: f64,
}

/// Rendered output of one generation pass, ready for the device.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedSequence {
    pub tempo_bpm: f32,
    pub beats_per_bar: u32,
    pub start_bar: u32,
    pub end_bar: u32, // exclusive
    pub events: Vec<SequenceEvent>,
}

impl GeneratedSequence {
    pub fn total_bars(&self) -> u32 {
        self.end_bar.saturating_sub(self.start_bar)
    }
}

pub trait SequenceGenerator: Send + Sync {
    fn generate(&self, context: &SongContext, cancel: &CancelToken) -> Result<GeneratedSequence, GenerationError>;
}

// Closures make handy one-off generators (tests, previews)
impl<F> SequenceGenerator for F
where
    F: Fn(&SongContext, &CancelToken) -> Result<GeneratedSequence, GenerationError> + Send + Sync,
{
    fn generate(&self, context: &SongContext, cancel: &CancelToken) -> Result<GeneratedSequence, GenerationError> {
        self(context, cancel)
    }
}

const CLICK_CHANNEL: u8 = 9; // GM drums
const CLICK_ACCENT: u8 = 76; // hi wood block
const CLICK_PLAIN: u8 = 77; // low wood block

/// Metronome: one click per beat, accented on the downbeat of every part.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClickTrack;

impl SequenceGenerator for ClickTrack {
    fn generate(&self, context: &SongContext, cancel: &CancelToken) -> Result<GeneratedSequence, GenerationError> {
        let song = context.song();
        if song.parts.is_empty() {
            return Err(GenerationError::Rejected(format!("\"{}\" has no song parts", song.name)));
        }
        let start_bar = context.origin_bar();
        let end_bar = context.end_bar();
        if start_bar >= end_bar {
            return Err(GenerationError::Rejected("empty bar range".to_string()));
        }

        let mut events = Vec::with_capacity(((end_bar - start_bar) * song.beats_per_bar) as usize);
        for bar in start_bar..end_bar {
            cancel.check()?;
            let part_start = song.parts.iter().any(|p| p.start_bar == bar);
            for beat in 0..song.beats_per_bar {
                let accent = beat == 0 && part_start;
                events.push(SequenceEvent {
                    bar,
                    beat: beat as f64,
                    channel: CLICK_CHANNEL,
                    pitch: if accent { CLICK_ACCENT } else { CLICK_PLAIN },
                    velocity: if beat == 0 { 110 } else { 80 },
                    length_beats: 0.25,
                });
            }
        }

        Ok(GeneratedSequence {
            tempo_bpm: song.tempo_bpm,
            beats_per_bar: song.beats_per_bar,
            start_bar,
            end_bar,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::song::{Mix, Section, SectionId, Song};

    fn context() -> SongContext {
        let mut song = Song::new("click", 90.0, vec![Section::new(0, "A", 0, 2)]);
        song.push_part(SectionId(0));
        song.push_part(SectionId(0));
        SongContext::new(Arc::new(song), Arc::new(Mix::default()))
    }

    #[test]
    fn click_track_accents_part_downbeats() {
        let seq = ClickTrack.generate(&context(), &CancelToken::new()).unwrap();
        assert_eq!(seq.total_bars(), 4);
        assert_eq!(seq.events.len(), 16);

        let accents: Vec<u32> = seq
            .events
            .iter()
            .filter(|e| e.pitch == CLICK_ACCENT)
            .map(|e| e.bar)
            .collect();
        assert_eq!(accents, vec![0, 2]);
    }

    #[test]
    fn click_track_respects_bar_range() {
        let ctx = context().with_bar_range(1..3);
        let seq = ClickTrack.generate(&ctx, &CancelToken::new()).unwrap();
        assert_eq!((seq.start_bar, seq.end_bar), (1, 3));
        assert!(seq.events.iter().all(|e| (1..3).contains(&e.bar)));
    }

    #[test]
    fn cancelled_token_stops_generation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(ClickTrack.generate(&context(), &cancel), Err(GenerationError::Cancelled));
    }

    #[test]
    fn song_without_parts_is_rejected() {
        let song = Song::new("empty", 90.0, vec![Section::new(0, "A", 0, 2)]);
        let ctx = SongContext::new(Arc::new(song), Arc::new(Mix::default()));
        assert!(matches!(
            ClickTrack.generate(&ctx, &CancelToken::new()),
            Err(GenerationError::Rejected(_))
        ));
    }
}
