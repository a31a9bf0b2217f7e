// The song document as far as the transport cares: the lead sheet (sections)
// and the arrangement built out of it (song parts).

use serde::{Deserialize, Serialize};

use crate::error::SongError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartId(pub u32);

/// A named bar range on the lead-sheet timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String, // "Verse", "Chorus", "A", ...
    pub start_bar: u32,
    pub length_bars: u32,
}

impl Section {
    pub fn new(id: u32, name: &str, start_bar: u32, length_bars: u32) -> Self {
        Self {
            id: SectionId(id),
            name: name.to_string(),
            start_bar,
            length_bars,
        }
    }

    // saturates on unvalidated data; validate() rejects such sections
    pub fn end_bar(&self) -> u32 {
        self.start_bar.saturating_add(self.length_bars)
    }

    pub fn contains(&self, bar: u32) -> bool {
        bar >= self.start_bar && bar < self.end_bar()
    }
}

/// One placement of a section onto the structure timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SongPart {
    pub id: PartId,
    pub section: SectionId, // the parent section on the lead sheet
    pub start_bar: u32,     // structure timeline
    pub length_bars: u32,   // always the parent section's length
}

impl SongPart {
    pub fn end_bar(&self) -> u32 {
        self.start_bar.saturating_add(self.length_bars)
    }

    pub fn contains(&self, bar: u32) -> bool {
        bar >= self.start_bar && bar < self.end_bar()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub name: String,
    pub tempo_bpm: f32,
    pub beats_per_bar: u32,
    pub sections: Vec<Section>, // lead sheet order
    pub parts: Vec<SongPart>,   // structure order
}

impl Song {
    pub fn new(name: &str, tempo_bpm: f32, sections: Vec<Section>) -> Self {
        Self {
            name: name.to_string(),
            tempo_bpm,
            beats_per_bar: 4,
            sections,
            parts: Vec::new(),
        }
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Appends a part for `section` right after the last part of the structure.
    /// Returns `None` when the section does not exist.
    pub fn push_part(&mut self, section: SectionId) -> Option<PartId> {
        let length_bars = self.section(section)?.length_bars;
        let id = PartId(self.parts.iter().map(|p| p.id.0.saturating_add(1)).max().unwrap_or(0));
        self.parts.push(SongPart {
            id,
            section,
            start_bar: self.structure_bars(),
            length_bars,
        });
        Some(id)
    }

    pub fn lead_sheet_bars(&self) -> u32 {
        self.sections.last().map(Section::end_bar).unwrap_or(0)
    }

    pub fn structure_bars(&self) -> u32 {
        self.parts.last().map(SongPart::end_bar).unwrap_or(0)
    }

    // Checks everything the timeline maths relies on. Sections may leave gaps on
    // the lead sheet; parts must tile the structure from bar 0 with no gaps.
    // Nothing may run past u32::MAX.
    pub fn validate(&self) -> Result<(), SongError> {
        if self.tempo_bpm.is_nan() || self.tempo_bpm <= 0.0 {
            return Err(SongError::InvalidTempo(self.tempo_bpm));
        }

        let mut prev_end = 0;
        for (i, section) in self.sections.iter().enumerate() {
            if section.length_bars == 0 {
                return Err(SongError::EmptySection(section.id));
            }
            if self.sections[..i].iter().any(|s| s.id == section.id) {
                return Err(SongError::DuplicateSection(section.id));
            }
            if i > 0 && section.start_bar < prev_end {
                return Err(SongError::SectionsOutOfOrder(section.id));
            }
            prev_end = section
                .start_bar
                .checked_add(section.length_bars)
                .ok_or(SongError::SectionOverflow(section.id))?;
        }

        let mut prev_end = 0;
        for (i, part) in self.parts.iter().enumerate() {
            let section = self.section(part.section).ok_or(SongError::UnknownSection {
                part: part.id,
                section: part.section,
            })?;
            if part.length_bars != section.length_bars {
                return Err(SongError::LengthMismatch {
                    part: part.id,
                    part_len: part.length_bars,
                    section_len: section.length_bars,
                });
            }
            if part.start_bar < prev_end {
                return Err(SongError::PartsOutOfOrder(part.id));
            }
            if part.start_bar > prev_end {
                return Err(SongError::StructureGap {
                    part: part.id,
                    expected: prev_end,
                });
            }
            prev_end = part
                .start_bar
                .checked_add(part.length_bars)
                .ok_or(SongError::PartOverflow(part.id))?;
        }
        Ok(())
    }
}

/// Mixer settings handed to the generator. The transport only uses it as part
/// of the generation key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Mix {
    pub channels: Vec<MixChannel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MixChannel {
    pub name: String,
    pub program: u8, // GM program number
    pub volume: u8,  // 0-127
    pub muted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_sections() -> Song {
        Song::new(
            "test",
            120.0,
            vec![
                Section::new(1, "S1", 0, 4),
                Section::new(2, "S2", 4, 2),
                Section::new(3, "S3", 6, 4),
            ],
        )
    }

    #[test]
    fn push_part_lays_parts_end_to_end() {
        let mut song = three_sections();
        song.push_part(SectionId(1));
        song.push_part(SectionId(1));
        song.push_part(SectionId(3));

        let starts: Vec<u32> = song.parts.iter().map(|p| p.start_bar).collect();
        assert_eq!(starts, vec![0, 4, 8]);
        assert_eq!(song.structure_bars(), 12);
        assert_eq!(song.lead_sheet_bars(), 10);
        assert!(song.validate().is_ok());
    }

    #[test]
    fn push_part_for_missing_section() {
        let mut song = three_sections();
        assert_eq!(song.push_part(SectionId(9)), None);
        assert!(song.parts.is_empty());
    }

    #[test]
    fn validate_rejects_length_mismatch() {
        let mut song = three_sections();
        song.parts.push(SongPart {
            id: PartId(0),
            section: SectionId(2),
            start_bar: 0,
            length_bars: 3,
        });
        assert_eq!(
            song.validate(),
            Err(SongError::LengthMismatch {
                part: PartId(0),
                part_len: 3,
                section_len: 2
            })
        );
    }

    #[test]
    fn validate_rejects_unknown_section() {
        let mut song = three_sections();
        song.parts.push(SongPart {
            id: PartId(0),
            section: SectionId(7),
            start_bar: 0,
            length_bars: 4,
        });
        assert!(matches!(song.validate(), Err(SongError::UnknownSection { .. })));
    }

    #[test]
    fn validate_rejects_overlapping_parts() {
        let mut song = three_sections();
        song.push_part(SectionId(1));
        song.push_part(SectionId(2));
        song.parts[1].start_bar = 2;
        assert_eq!(song.validate(), Err(SongError::PartsOutOfOrder(PartId(1))));
    }

    #[test]
    fn validate_rejects_gaps_in_the_structure() {
        let mut song = three_sections();
        song.push_part(SectionId(1));
        song.push_part(SectionId(2));
        song.parts[1].start_bar = 6;
        assert_eq!(
            song.validate(),
            Err(SongError::StructureGap {
                part: PartId(1),
                expected: 4
            })
        );

        // the first part has to start the structure
        let mut late = three_sections();
        late.push_part(SectionId(1));
        late.parts[0].start_bar = 2;
        assert!(matches!(late.validate(), Err(SongError::StructureGap { expected: 0, .. })));
    }

    #[test]
    fn validate_rejects_bars_past_u32_max() {
        let mut song = three_sections();
        song.sections.push(Section::new(4, "S4", u32::MAX, 4));
        assert_eq!(song.validate(), Err(SongError::SectionOverflow(SectionId(4))));
        assert_eq!(song.sections[3].end_bar(), u32::MAX);

        // one huge section placed twice: the second part can't end
        let mut song = Song::new("long", 120.0, vec![Section::new(1, "Long", 0, u32::MAX)]);
        song.push_part(SectionId(1));
        song.push_part(SectionId(1));
        assert_eq!(song.parts[1].start_bar, u32::MAX);
        assert_eq!(song.validate(), Err(SongError::PartOverflow(PartId(1))));
    }

    #[test]
    fn validate_rejects_overlapping_sections() {
        let mut song = three_sections();
        song.sections[1].start_bar = 3;
        assert_eq!(song.validate(), Err(SongError::SectionsOutOfOrder(SectionId(2))));
    }
}
