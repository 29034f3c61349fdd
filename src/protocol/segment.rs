//! Bilingual turn splitting
//!
//! Tutor replies put the English segment first and the translation second,
//! separated by a line holding only `---`. Only the first segment is spoken.

/// Line content separating the primary and secondary segments
pub const SEGMENT_DELIMITER: &str = "---";

/// A completed turn routed to its consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnText<'a> {
    /// Full text for the renderer, both segments included
    pub render: &'a str,
    /// Primary segment for speech synthesis, trimmed
    pub speech: &'a str,
    /// Secondary segment, if the turn carried a delimiter
    pub secondary: Option<&'a str>,
}

/// Split completed turn text at the first delimiter line
#[must_use]
pub fn split_turn(text: &str) -> TurnText<'_> {
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim() == SEGMENT_DELIMITER {
            return TurnText {
                render: text,
                speech: text[..offset].trim(),
                secondary: Some(text[offset + line.len()..].trim()),
            };
        }
        offset += line.len();
    }

    TurnText {
        render: text,
        speech: text.trim(),
        secondary: None,
    }
}
