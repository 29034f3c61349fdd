//! Spoken control commands recognised in completed turns

/// Phrase that pauses the session
pub const PAUSE_PHRASE: &str = "can i have a break";

/// Phrase that resumes a paused session
pub const RESUME_PHRASE: &str = "ok let's continue";

/// Control command carried by a completed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Suspend outbound audio
    Pause,
    /// Resume a paused session
    Resume,
    /// No control phrase present
    None,
}

/// Detect a control phrase in completed turn text
///
/// Matching is a case-insensitive substring test. The pause phrase is checked
/// first and wins when both appear; the resume phrase only counts while the
/// session is already paused.
#[must_use]
pub fn detect_command(text: &str, paused: bool) -> ControlCommand {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");

    if normalized.contains(PAUSE_PHRASE) {
        ControlCommand::Pause
    } else if paused && normalized.contains(RESUME_PHRASE) {
        ControlCommand::Resume
    } else {
        ControlCommand::None
    }
}
