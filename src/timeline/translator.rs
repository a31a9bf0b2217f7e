//! Mapping between lead-sheet bars and structure bars.
//!
//! Structure → lead sheet is always unambiguous: a structure bar sits inside
//! exactly one song part, and that part points at exactly one section.
//!
//! Lead sheet → structure is not. A section can be placed zero, one or many
//! times. The tie-break is: a preferred part (usually whatever the caller has
//! selected) if one of them places the section, otherwise the first placement
//! in structure order. A section that was never placed has no mapping.

use crate::error::TimelineError;
use crate::pipeline::song::{PartId, Section, SectionId, Song, SongPart};
use crate::shared::Position;

/// Where a structure bar lands on the lead sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeadSheetPosition {
    pub section: SectionId,
    pub part: PartId, // the placement we came through
    pub bar: u32,     // lead-sheet bar
    pub offset: u32,  // bars into the section
}

#[derive(Clone, Copy, Debug)]
pub struct PositionTranslator<'a> {
    sections: &'a [Section],
    parts: &'a [SongPart],
}

impl<'a> PositionTranslator<'a> {
    pub fn new(sections: &'a [Section], parts: &'a [SongPart]) -> Self {
        Self { sections, parts }
    }

    pub fn for_song(song: &'a Song) -> Self {
        Self::new(&song.sections, &song.parts)
    }

    pub fn part_at(&self, structure_bar: u32) -> Option<&'a SongPart> {
        self.parts.iter().find(|p| p.contains(structure_bar))
    }

    pub fn section_at(&self, lead_sheet_bar: u32) -> Option<&'a Section> {
        self.sections.iter().find(|s| s.contains(lead_sheet_bar))
    }

    /// Every placement of `section`, in structure order.
    pub fn placements(self, section: SectionId) -> impl Iterator<Item = &'a SongPart> {
        self.parts.iter().filter(move |p| p.section == section)
    }

    pub fn to_lead_sheet_position(&self, structure_bar: u32) -> Result<LeadSheetPosition, TimelineError> {
        let part = self
            .part_at(structure_bar)
            .ok_or(TimelineError::OutsideStructure { bar: structure_bar })?;
        let section = self
            .sections
            .iter()
            .find(|s| s.id == part.section)
            .ok_or(TimelineError::UnknownSection {
                part: part.id,
                section: part.section,
            })?;

        let offset = structure_bar - part.start_bar;
        Ok(LeadSheetPosition {
            section: section.id,
            part: part.id,
            bar: section.start_bar + offset,
            offset,
        })
    }

    pub fn to_structure_bar(&self, lead_sheet_bar: u32, preferred: &[PartId]) -> Option<u32> {
        let section = self.section_at(lead_sheet_bar)?;
        let offset = lead_sheet_bar - section.start_bar;

        let preferred_part = preferred
            .iter()
            .filter_map(|id| self.parts.iter().find(|p| p.id == *id))
            .find(|p| p.section == section.id);

        let part = match preferred_part {
            Some(p) => p,
            None => self.placements(section.id).next()?,
        };
        Some(part.start_bar + offset)
    }

    // Same as to_structure_bar but carries the beat along
    pub fn to_structure_position(&self, lead_sheet: Position, preferred: &[PartId]) -> Option<Position> {
        self.to_structure_bar(lead_sheet.bar, preferred)
            .map(|bar| Position::new(bar, lead_sheet.beat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S1[0..4) S2[4..6) S3[6..10), arranged as [S1, S1, S3]
    fn song() -> Song {
        let mut song = Song::new(
            "translate",
            120.0,
            vec![
                Section::new(1, "S1", 0, 4),
                Section::new(2, "S2", 4, 2),
                Section::new(3, "S3", 6, 4),
            ],
        );
        song.push_part(SectionId(1));
        song.push_part(SectionId(1));
        song.push_part(SectionId(3));
        song
    }

    #[test]
    fn second_placement_maps_back_to_its_section() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        let pos = t.to_lead_sheet_position(5).unwrap();
        assert_eq!(pos.section, SectionId(1));
        assert_eq!(pos.part, PartId(1));
        assert_eq!(pos.offset, 1);
        assert_eq!(pos.bar, 1);
    }

    #[test]
    fn later_section_maps_with_its_own_origin() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        // structure bar 9 is S3 offset 1 -> lead sheet 7
        assert_eq!(t.to_lead_sheet_position(9).unwrap().bar, 7);
    }

    #[test]
    fn bar_past_the_structure_is_a_contract_error() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        assert_eq!(
            t.to_lead_sheet_position(12),
            Err(TimelineError::OutsideStructure { bar: 12 })
        );
    }

    #[test]
    fn first_placement_wins_without_preference() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        assert_eq!(t.to_structure_bar(2, &[]), Some(2));
    }

    #[test]
    fn preferred_part_wins_when_it_places_the_section() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        assert_eq!(t.to_structure_bar(2, &[PartId(1)]), Some(6));
        // preferred part for another section is ignored
        assert_eq!(t.to_structure_bar(2, &[PartId(2)]), Some(2));
        // first matching preference counts
        assert_eq!(t.to_structure_bar(2, &[PartId(2), PartId(1), PartId(0)]), Some(6));
    }

    #[test]
    fn unplaced_section_has_no_mapping() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        for bar in 4..6 {
            assert_eq!(t.to_structure_bar(bar, &[]), None);
            assert_eq!(t.to_structure_bar(bar, &[PartId(0)]), None);
        }
    }

    #[test]
    fn lead_sheet_bar_outside_every_section() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        assert_eq!(t.to_structure_bar(10, &[]), None);
    }

    #[test]
    fn every_structure_bar_round_trips_through_its_own_part() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        for part in &song.parts {
            for bar in part.start_bar..part.end_bar() {
                let lead = t.to_lead_sheet_position(bar).unwrap();
                let back = t.to_structure_bar(lead.bar, &[part.id]).unwrap();
                assert_eq!(back, bar);
                assert_eq!(t.to_lead_sheet_position(back).unwrap().offset, lead.offset);
            }
        }
    }

    #[test]
    fn structure_position_keeps_the_beat() {
        let song = song();
        let t = PositionTranslator::for_song(&song);
        let pos = t.to_structure_position(Position::new(7, 2.5), &[]).unwrap();
        assert_eq!(pos, Position::new(9, 2.5));
    }
}
