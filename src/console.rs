//! Terminal rendering of session events
//!
//! Progress marks go on one line per utterance: `🎤 :` when the learner
//! starts speaking, `*` per voiced chunk, then `♻️ processing:` and a `-` per
//! reply fragment. Completed turns are printed in full under a rule.

use std::io::{self, Write};

use tokio::sync::mpsc;

use crate::protocol::{RESUME_PHRASE, SessionState};
use crate::session::SessionEvent;

const RULE: &str = "=============================================";

/// Writes session events to a terminal (or any writer)
pub struct Reporter<W> {
    out: W,
}

impl<W: Write> Reporter<W> {
    /// Create a reporter writing to `out`
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render events until the channel closes
    ///
    /// # Errors
    ///
    /// Returns error if writing fails
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) -> io::Result<W> {
        while let Some(event) = events.recv().await {
            self.render(&event)?;
        }
        Ok(self.out)
    }

    /// Render one event
    ///
    /// # Errors
    ///
    /// Returns error if writing fails
    pub fn render(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::Ready => {
                writeln!(self.out, "✅ ready")?;
                writeln!(self.out, "🎤 speak English")?;
            }
            SessionEvent::StateChanged { from, to } => match (from, to) {
                (SessionState::Idle, SessionState::CaptureActive) => write!(self.out, "🎤 :")?,
                (_, SessionState::Processing) => write!(self.out, "\n♻️ processing: ")?,
                _ => {}
            },
            SessionEvent::Voiced { .. } => write!(self.out, "*")?,
            SessionEvent::UtteranceScored { score } => write!(self.out, " [energy {score}/100]")?,
            SessionEvent::Fragment(_) => write!(self.out, "-")?,
            SessionEvent::TurnCompleted { text, .. } => {
                writeln!(self.out, "\n🤖 {RULE}")?;
                writeln!(self.out, "{}", text.trim_end())?;
            }
            SessionEvent::Paused => {
                writeln!(self.out, "\n⏸️ paused. Say {RESUME_PHRASE:?} to continue")?;
            }
            SessionEvent::Resumed => writeln!(self.out, "\n▶️ resumed")?,
            SessionEvent::SpeechStarted => writeln!(self.out, "🙎 speaking...")?,
            SessionEvent::SpeechFinished => writeln!(self.out, "🙎 done")?,
            SessionEvent::SpeechFailed(reason) => writeln!(self.out, "speech failed: {reason}")?,
        }
        self.out.flush()
    }
}
