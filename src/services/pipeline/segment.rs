use crate::core::project::{new_id, Segment};
use regex::Regex;
use std::sync::OnceLock;

/// Texts at or above this length are windowed.
pub const SEGMENT_THRESHOLD: usize = 20_000;
pub const WINDOW_SIZE: usize = 15_000;
pub const WINDOW_OVERLAP: usize = 500;

fn file_marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)====FILE_START: (.*?)====(.*?)====FILE_END====").expect("valid pattern")
    })
}

/// Partition a working text into segments. Explicit file markers win; below
/// the threshold the whole text is one segment; otherwise fixed-size
/// overlapping windows. Lengths are in chars, not bytes.
pub fn partition_text(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();

    for capture in file_marker_pattern().captures_iter(text) {
        let index = segments.len();
        segments.push(Segment {
            id: new_id("seg"),
            name: capture[1].to_string(),
            content: capture[2].trim().to_string(),
            index,
        });
    }
    if !segments.is_empty() {
        return segments;
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() < SEGMENT_THRESHOLD {
        return vec![Segment {
            id: new_id("seg"),
            name: "Full Text".to_string(),
            content: text.to_string(),
            index: 0,
        }];
    }

    let mut start = 0usize;
    let mut index = 0usize;
    while start < chars.len() {
        let end = (start + WINDOW_SIZE).min(chars.len());
        segments.push(Segment {
            id: new_id("seg"),
            name: format!("Batch {} ({}-{})", index + 1, start, end),
            content: chars[start..end].iter().collect(),
            index,
        });
        start += WINDOW_SIZE - WINDOW_OVERLAP;
        index += 1;
    }
    segments
}
