//! Interval source maps between generated SQL and host source text.
//!
//! Every resolved statement carries a list of intervals, each declaring that
//! bytes `[text_start, text_end)` of the generated SQL came from
//! `source_offset` in the original host file. Literal runs map linearly; a
//! substituted view reference is opaque, so any offset inside it maps to the
//! start of the reference's own source position.

use serde::{Deserialize, Serialize};

/// One mapping interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapEntry {
    /// Offset into the original source text.
    pub source_offset: u32,
    /// First byte of the run in the generated text.
    pub text_start: u32,
    /// One past the last byte of the run in the generated text.
    pub text_end: u32,
    /// Whether this run is a substituted reference rather than literal text.
    #[serde(default, skip_serializing_if = "is_false")]
    pub substitution: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl MapEntry {
    /// A literal run: generated bytes copied verbatim from the source.
    pub fn literal(source_offset: u32, text_start: u32, text_end: u32) -> MapEntry {
        MapEntry {
            source_offset,
            text_start,
            text_end,
            substitution: false,
        }
    }

    /// A substituted run: generated bytes that replaced a reference whose own
    /// source position is `source_offset`.
    pub fn substitution(source_offset: u32, text_start: u32, text_end: u32) -> MapEntry {
        MapEntry {
            source_offset,
            text_start,
            text_end,
            substitution: true,
        }
    }
}

/// A two-way position map between generated SQL and source text.
///
/// Entries are kept sorted by `text_start`; lookups binary-search for the
/// enclosing interval rather than assuming production order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<MapEntry>", into = "Vec<MapEntry>")]
pub struct SourceMap {
    entries: Vec<MapEntry>,
}

impl From<Vec<MapEntry>> for SourceMap {
    fn from(entries: Vec<MapEntry>) -> SourceMap {
        SourceMap::new(entries)
    }
}

impl From<SourceMap> for Vec<MapEntry> {
    fn from(map: SourceMap) -> Vec<MapEntry> {
        map.entries
    }
}

impl SourceMap {
    /// Builds a map, sorting the entries by generated-text position.
    pub fn new(mut entries: Vec<MapEntry>) -> SourceMap {
        entries.sort_by_key(|e| e.text_start);
        SourceMap { entries }
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The mapping intervals, sorted by generated-text position.
    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// Maps an offset in the generated text back to a source offset.
    ///
    /// Offsets past the final interval clamp to its end; offsets before the
    /// first interval clamp to its start. Returns `None` only for an empty
    /// map.
    pub fn to_source(&self, text_offset: u32) -> Option<u32> {
        let entry = self.enclosing(text_offset)?;
        if entry.substitution {
            return Some(entry.source_offset);
        }
        let clamped = text_offset
            .max(entry.text_start)
            .min(entry.text_end.saturating_sub(1).max(entry.text_start));
        Some(entry.source_offset + (clamped - entry.text_start))
    }

    /// Maps a source offset to an offset in the generated text, when some
    /// literal run covers it.
    pub fn to_generated(&self, source_offset: u32) -> Option<u32> {
        for entry in &self.entries {
            if entry.substitution {
                continue;
            }
            let len = entry.text_end - entry.text_start;
            if source_offset >= entry.source_offset && source_offset < entry.source_offset + len {
                return Some(entry.text_start + (source_offset - entry.source_offset));
            }
        }
        None
    }

    fn enclosing(&self, text_offset: u32) -> Option<&MapEntry> {
        if self.entries.is_empty() {
            return None;
        }
        // Index of the first entry starting after the offset; the enclosing
        // (or nearest preceding) entry is the one before it.
        let idx = self.entries.partition_point(|e| e.text_start <= text_offset);
        Some(&self.entries[idx.saturating_sub(1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SourceMap {
        // generated: [0, 10) literal from 100, [10, 25) substitution from 40,
        // [25, 30) literal from 200.
        SourceMap::new(vec![
            MapEntry::literal(200, 25, 30),
            MapEntry::literal(100, 0, 10),
            MapEntry::substitution(40, 10, 25),
        ])
    }

    #[test]
    fn test_literal_runs_map_linearly() {
        let map = sample();
        assert_eq!(map.to_source(0), Some(100));
        assert_eq!(map.to_source(7), Some(107));
        assert_eq!(map.to_source(26), Some(201));
    }

    #[test]
    fn test_substituted_runs_map_to_reference_start() {
        let map = sample();
        assert_eq!(map.to_source(10), Some(40));
        assert_eq!(map.to_source(24), Some(40));
    }

    #[test]
    fn test_out_of_range_offsets_clamp() {
        let map = sample();
        assert_eq!(map.to_source(1000), Some(204));
        assert!(SourceMap::default().to_source(3).is_none());
    }

    #[test]
    fn test_inverse_lookup() {
        let map = sample();
        assert_eq!(map.to_generated(103), Some(3));
        assert_eq!(map.to_generated(202), Some(27));
        // No literal run covers the substituted reference's source range.
        assert_eq!(map.to_generated(40), None);
    }

    #[test]
    fn test_entries_sorted_regardless_of_input_order() {
        let map = sample();
        let starts: Vec<u32> = map.entries().iter().map(|e| e.text_start).collect();
        assert_eq!(starts, vec![0, 10, 25]);
    }
}
