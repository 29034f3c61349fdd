//! Events emitted by a running session
//!
//! The protocol core never writes to the terminal itself; it publishes these
//! events and a renderer (see [`crate::console`]) decides what to show.

use tokio::sync::mpsc;

use crate::protocol::SessionState;

/// Something observable happened in the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake acknowledged, the microphone is live
    Ready,
    /// The shared state moved
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// A captured chunk crossed the volume threshold
    Voiced {
        /// Mean absolute amplitude of the chunk
        loudness: f32,
    },
    /// Energy score for the utterance that just ended
    UtteranceScored {
        /// 0-100
        score: u8,
    },
    /// A reply fragment arrived
    Fragment(String),
    /// A reply turn completed
    TurnCompleted {
        /// Full text for rendering
        text: String,
        /// Segment chosen for speech
        speech: String,
    },
    /// The pause phrase was recognised
    Paused,
    /// The resume phrase was recognised
    Resumed,
    /// Speech playback started
    SpeechStarted,
    /// Speech playback finished
    SpeechFinished,
    /// Speech synthesis or playback failed; the session continues
    SpeechFailed(String),
}

/// Sending side of the event channel
///
/// Emitting never blocks and never fails: with no renderer attached, events
/// are dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSender {
    /// Create a connected sender/receiver pair
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that discards every event
    #[must_use]
    pub const fn discard() -> Self {
        Self { tx: None }
    }

    /// Publish an event
    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
