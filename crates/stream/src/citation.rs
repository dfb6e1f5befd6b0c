//! Inline `[N]` citation markers and highlight rendering for cited sections.

use std::ops::Range;

use super::model::{DocumentSource, HighlightRegion};

/// A run of section text, emphasized or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub highlighted: bool,
}

impl<'a> Segment<'a> {
    pub fn plain(text: &'a str) -> Self {
        Self {
            text,
            highlighted: false,
        }
    }

    pub fn highlight(text: &'a str) -> Self {
        Self {
            text,
            highlighted: true,
        }
    }
}

/// Splits `text` into left-to-right plain and highlighted runs.
///
/// Regions arrive in any order and are sorted by start first. Offsets are character
/// positions; regions past the end are clamped, and empty regions or regions that
/// overlap an earlier one are dropped.
pub fn highlight_segments<'a>(text: &'a str, highlights: &[HighlightRegion]) -> Vec<Segment<'a>> {
    let char_count = text.chars().count();
    let mut regions = highlights
        .iter()
        .map(|region| region.start.min(char_count)..region.end.min(char_count))
        .filter(|range| range.start < range.end)
        .collect::<Vec<_>>();
    regions.sort_by_key(|range| (range.start, range.end));

    let mut segments = Vec::new();
    let mut cursor = 0;
    for range in regions {
        if range.start < cursor {
            tracing::debug!(
                start = range.start,
                end = range.end,
                "skipping overlapping highlight region"
            );
            continue;
        }

        if range.start > cursor {
            segments.push(Segment::plain(char_slice(text, cursor..range.start)));
        }
        segments.push(Segment::highlight(char_slice(text, range.clone())));
        cursor = range.end;
    }

    if cursor < char_count {
        segments.push(Segment::plain(char_slice(text, cursor..char_count)));
    }

    segments
}

fn char_slice(text: &str, range: Range<usize>) -> &str {
    let byte_at = |char_index: usize| {
        text.char_indices()
            .nth(char_index)
            .map_or(text.len(), |(byte_index, _)| byte_index)
    };
    &text[byte_at(range.start)..byte_at(range.end)]
}

/// One `[N]` marker found in answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationMarker {
    pub number: u32,
    /// Byte range of the whole marker, brackets included.
    pub range: Range<usize>,
}

pub fn citation_markers(content: &str) -> Vec<CitationMarker> {
    let bytes = content.as_bytes();
    let mut markers = Vec::new();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] != b'[' {
            index += 1;
            continue;
        }

        let digits_start = index + 1;
        let digits_end = bytes[digits_start..]
            .iter()
            .position(|byte| !byte.is_ascii_digit())
            .map_or(bytes.len(), |offset| digits_start + offset);

        let closed = digits_end < bytes.len() && bytes[digits_end] == b']';
        if closed && digits_end > digits_start {
            if let Ok(number) = content[digits_start..digits_end].parse::<u32>() {
                markers.push(CitationMarker {
                    number,
                    range: index..digits_end + 1,
                });
            }
            index = digits_end + 1;
        } else {
            index += 1;
        }
    }

    markers
}

/// Finds the source for marker `[number]`: an explicit citation number wins,
/// otherwise the `number`-th source (1-based).
pub fn resolve_citation(sources: &[DocumentSource], number: u32) -> Option<&DocumentSource> {
    sources
        .iter()
        .find(|source| source.citation_index == Some(number))
        .or_else(|| {
            let position = usize::try_from(number).ok()?.checked_sub(1)?;
            sources
                .get(position)
                .filter(|source| source.citation_index.is_none())
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn region(text: &str, start: usize, end: usize) -> HighlightRegion {
        HighlightRegion {
            text: text.to_string(),
            start,
            end,
        }
    }

    fn source(id: &str, citation_index: Option<u32>) -> DocumentSource {
        DocumentSource {
            id: id.to_string(),
            node_id: None,
            document_name: "doc.pdf".to_string(),
            section_title: Some(id.to_string()),
            start_page: 1,
            end_page: None,
            content: String::new(),
            summary: None,
            citation_index,
            highlights: Vec::new(),
            score: None,
        }
    }

    #[test]
    fn regions_are_sorted_before_rendering() {
        let segments = highlight_segments("ABCD", &[region("B", 2, 3), region("A", 0, 1)]);

        assert_eq!(
            segments,
            vec![
                Segment::highlight("A"),
                Segment::plain("B"),
                Segment::highlight("C"),
                Segment::plain("D"),
            ]
        );
    }

    #[test]
    fn no_regions_yields_single_plain_run() {
        assert_eq!(highlight_segments("ABCD", &[]), vec![Segment::plain("ABCD")]);
        assert!(highlight_segments("", &[]).is_empty());
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let segments = highlight_segments("caf\u{00e9} cr\u{00e8}me", &[region("cr\u{00e8}me", 5, 10)]);

        assert_eq!(
            segments,
            vec![
                Segment::plain("caf\u{00e9} "),
                Segment::highlight("cr\u{00e8}me")
            ]
        );
    }

    #[test]
    fn overlapping_empty_and_out_of_range_regions() {
        let segments = highlight_segments(
            "0123456789",
            &[
                region("", 4, 4),
                region("2345", 2, 6),
                region("45", 4, 6),
                region("89+", 8, 40),
            ],
        );

        assert_eq!(
            segments,
            vec![
                Segment::plain("01"),
                Segment::highlight("2345"),
                Segment::plain("67"),
                Segment::highlight("89"),
            ]
        );
    }

    #[test]
    fn finds_numeric_markers_only() {
        let markers = citation_markers("Revenue rose [1] while costs [fell] [23][x] [");

        assert_eq!(
            markers,
            vec![
                CitationMarker {
                    number: 1,
                    range: 13..16,
                },
                CitationMarker {
                    number: 23,
                    range: 36..40,
                },
            ]
        );
    }

    #[test]
    fn resolves_by_citation_number_then_position() {
        let sources = vec![source("a", None), source("b", Some(3)), source("c", None)];

        assert_eq!(resolve_citation(&sources, 3).map(|s| s.id.as_str()), Some("b"));
        assert_eq!(resolve_citation(&sources, 1).map(|s| s.id.as_str()), Some("a"));
        assert_eq!(resolve_citation(&sources, 2), None);
        assert_eq!(resolve_citation(&sources, 0), None);
        assert_eq!(resolve_citation(&sources, 9), None);
    }
}
