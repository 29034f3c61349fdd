//! Streaming session protocol engine
//!
//! A session runs in two phases. The handshake is sequential: setup, the
//! tutor prompt, and the `OK` acknowledgement. After that three flows run
//! concurrently under one [`TaskGroup`]:
//!
//! ```text
//!  microphone ──► capture ──► queue ──► send ──► socket
//!                    ▲                   ▲
//!                    └──── SharedState ──┘
//!                    ▼                   ▼
//!  speaker ◄──── receive ◄────────────────────── socket
//! ```
//!
//! The flows coordinate only through [`SharedState`]. Any fatal error in one
//! flow cancels the other two.

mod events;
mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use events::{EventSender, SessionEvent};
pub use supervisor::TaskGroup;

use crate::protocol::{
    ControlCommand, InboundMessage, SessionState, SharedState, Transition, TurnAggregator,
    detect_command, messages, split_turn,
};
use crate::transport::{MessageSink, MessageStream};
use crate::voice::{AudioChunk, AudioSource, Speaker, UtteranceMeter};
use crate::{Error, Result};

/// Token the tutor must open its acknowledgement with
pub const ACK_TOKEN: &str = "OK";

/// How long a graceful close may take on shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// What the session asks of the service
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Model name, with or without the `models/` prefix
    pub model: String,
    /// Instructional prompt sent as the first user turn
    pub prompt: String,
}

/// Owns a live conversation over an open transport
pub struct SessionProtocol {
    options: SessionOptions,
    sink: Box<dyn MessageSink>,
    stream: Box<dyn MessageStream>,
    speaker: Option<Arc<dyn Speaker>>,
    events: EventSender,
    state: SharedState,
    ready: bool,
}

impl SessionProtocol {
    /// Create a session over an already connected transport
    #[must_use]
    pub fn new(
        options: SessionOptions,
        sink: Box<dyn MessageSink>,
        stream: Box<dyn MessageStream>,
        events: EventSender,
    ) -> Self {
        Self {
            options,
            sink,
            stream,
            speaker: None,
            events,
            state: SharedState::default(),
            ready: false,
        }
    }

    /// Speak completed turns through `speaker`
    #[must_use]
    pub fn with_speaker(mut self, speaker: Arc<dyn Speaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    /// Handle to the session state
    #[must_use]
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Run the startup handshake
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeRejected`] if the reply to the prompt does not
    /// open with `OK`, or [`Error::Transport`] if the connection fails first
    pub async fn handshake(&mut self) -> Result<()> {
        self.sink.send(messages::setup(&self.options.model)?).await?;

        // Whatever arrives first counts as the setup reply
        match self.stream.next_message().await {
            Some(Ok(raw)) => match messages::decode(&raw) {
                Ok(InboundMessage::SetupAck) => tracing::debug!("setup acknowledged"),
                Ok(other) => tracing::debug!(?other, "setup answered with an unexpected message"),
                Err(e) => tracing::debug!(error = %e, "setup reply not decodable"),
            },
            Some(Err(e)) if e.is_recoverable() => {
                tracing::debug!(error = %e, "setup reply not decodable");
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(Error::Transport(
                    "connection closed during handshake".to_string(),
                ));
            }
        }

        self.sink
            .send(messages::user_turn(&self.options.prompt)?)
            .await?;

        let mut turn = TurnAggregator::new();
        loop {
            let InboundMessage::Content {
                fragments,
                turn_complete,
            } = next_inbound(self.stream.as_mut()).await?
            else {
                continue;
            };

            for fragment in fragments {
                turn.push(fragment);
            }
            if !turn_complete {
                continue;
            }
            let Some(reply) = turn.finish() else {
                continue;
            };

            if !reply.trim_start().starts_with(ACK_TOKEN) {
                return Err(Error::HandshakeRejected(reply));
            }

            tracing::info!(reply = %reply.trim(), "tutor acknowledged");
            self.ready = true;
            self.state.set(SessionState::Idle);
            self.events.emit(SessionEvent::Ready);
            return Ok(());
        }
    }

    /// Run the session until the connection fails or `shutdown` fires
    ///
    /// Performs the handshake first if it has not been done yet.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error raised by any flow
    pub async fn run(
        mut self,
        source: Box<dyn AudioSource>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        if !self.ready {
            tokio::select! {
                result = self.handshake() => result?,
                () = shutdown.cancelled() => {
                    tracing::info!("shutdown requested during handshake");
                    return Ok(());
                }
            }
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let mut group = TaskGroup::new(shutdown);

        group.spawn(
            "capture",
            capture_flow(source, self.state.clone(), queue_tx, self.events.clone()),
        );

        let sink = self.sink;
        let send_state = self.state.clone();
        group.spawn_with_token("send", move |cancel| {
            send_flow(sink, queue_rx, send_state, cancel)
        });

        let router = TurnRouter::new(self.state.clone(), self.events.clone(), self.speaker);
        group.spawn("receive", receive_flow(self.stream, router));

        tracing::info!(flows = ?group.names(), "session running");
        let outcome = group.join().await;

        match &outcome {
            Ok(()) => tracing::info!("session ended"),
            Err(e) => tracing::debug!(error = %e, "session aborted"),
        }
        outcome
    }
}

/// Apply a state function and publish the change
fn apply(
    state: &SharedState,
    events: &EventSender,
    next: impl FnOnce(SessionState) -> SessionState,
) -> Transition {
    let transition = state.update(next);
    if transition.changed() {
        tracing::debug!(from = %transition.from, to = %transition.to, "state changed");
        events.emit(SessionEvent::StateChanged {
            from: transition.from,
            to: transition.to,
        });
    }
    transition
}

/// Next decodable inbound message
///
/// Undecodable frames are logged and skipped; a closed stream is fatal.
async fn next_inbound(stream: &mut dyn MessageStream) -> Result<InboundMessage> {
    loop {
        let raw = match stream.next_message().await {
            Some(Ok(raw)) => raw,
            Some(Err(e)) if e.is_recoverable() => {
                tracing::debug!(error = %e, "skipping inbound frame");
                continue;
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::Transport("connection closed by server".to_string())),
        };

        match messages::decode(&raw) {
            Ok(message) => return Ok(message),
            Err(e) => tracing::debug!(error = %e, "ignoring malformed message"),
        }
    }
}

/// Microphone to outbound queue
///
/// Reads continuously except while paused. Chunks captured while a reply is
/// in flight are read and dropped so the device buffer never backs up.
async fn capture_flow(
    mut source: Box<dyn AudioSource>,
    state: SharedState,
    queue: mpsc::UnboundedSender<AudioChunk>,
    events: EventSender,
) -> Result<()> {
    let mut meter = UtteranceMeter::default();

    loop {
        if state.get().is_paused() {
            tracing::debug!("capture suspended");
            state.wait_until(|s| !s.is_paused()).await;
            source.discard_pending();
            tracing::debug!("capture resumed");
        }

        let chunk = tokio::select! {
            biased;
            _ = state.wait_until(|s| s.is_paused()) => continue,
            chunk = source.read_chunk() => chunk?,
        };

        if !state.get().accepts_audio() {
            if let Some(score) = meter.finish() {
                tracing::debug!(score, "utterance scored");
                events.emit(SessionEvent::UtteranceScored { score });
            }
            continue;
        }

        if chunk.is_voiced() {
            meter.record(&chunk);
            apply(&state, &events, SessionState::on_voiced);
            events.emit(SessionEvent::Voiced {
                loudness: chunk.loudness(),
            });
        }

        if queue.send(chunk).is_err() {
            tracing::debug!("outbound queue closed, capture stopping");
            return Ok(());
        }
    }
}

/// Outbound queue to transport, closing the connection on cancellation
async fn send_flow(
    mut sink: Box<dyn MessageSink>,
    mut queue: mpsc::UnboundedReceiver<AudioChunk>,
    state: SharedState,
    cancel: CancellationToken,
) -> Result<()> {
    let outcome = tokio::select! {
        result = pump_audio(sink.as_mut(), &mut queue, &state) => result,
        () = cancel.cancelled() => Ok(()),
    };

    if outcome.is_ok() {
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => tracing::debug!("connection closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "close failed"),
            Err(_) => tracing::debug!("close timed out"),
        }
    }
    outcome
}

async fn pump_audio(
    sink: &mut dyn MessageSink,
    queue: &mut mpsc::UnboundedReceiver<AudioChunk>,
    state: &SharedState,
) -> Result<()> {
    let mut sent: u64 = 0;

    loop {
        state.wait_until(|s| !s.is_paused()).await;

        tokio::select! {
            chunk = queue.recv() => {
                let Some(chunk) = chunk else {
                    tracing::debug!(sent, "outbound queue drained");
                    return Ok(());
                };
                sink.send(messages::audio_chunk(chunk.as_bytes())?).await?;
                sent += 1;
                tracing::trace!(sent, "audio chunk sent");
            }
            _ = state.wait_until(|s| s.is_paused()) => {
                tracing::debug!(sent, "sending suspended");
            }
        }
    }
}

/// Transport to turn router
async fn receive_flow(mut stream: Box<dyn MessageStream>, mut router: TurnRouter) -> Result<()> {
    loop {
        let message = next_inbound(stream.as_mut()).await?;
        router.route(message).await?;
    }
}

/// Routes inbound content into turns, commands and speech
///
/// Speech is played inline: the next turn is not processed until playback of
/// the current one has finished.
pub struct TurnRouter {
    state: SharedState,
    events: EventSender,
    speaker: Option<Arc<dyn Speaker>>,
    turn: TurnAggregator,
}

impl TurnRouter {
    /// Create a router over the session state
    #[must_use]
    pub const fn new(
        state: SharedState,
        events: EventSender,
        speaker: Option<Arc<dyn Speaker>>,
    ) -> Self {
        Self {
            state,
            events,
            speaker,
            turn: TurnAggregator::new(),
        }
    }

    /// Handle one inbound message
    ///
    /// # Errors
    ///
    /// Returns the speaker's error when it is not recoverable, such as a
    /// missing output device
    pub async fn route(&mut self, message: InboundMessage) -> Result<()> {
        let InboundMessage::Content {
            fragments,
            turn_complete,
        } = message
        else {
            return Ok(());
        };

        for fragment in fragments {
            if self.turn.push(fragment.clone()) {
                tracing::debug!("reply turn opened");
            }
            apply(&self.state, &self.events, SessionState::on_fragment);
            self.events.emit(SessionEvent::Fragment(fragment));
        }

        if turn_complete {
            self.complete_turn().await?;
        }
        Ok(())
    }

    async fn complete_turn(&mut self) -> Result<()> {
        let Some(text) = self.turn.finish() else {
            return Ok(());
        };

        let command = detect_command(&text, self.state.get().is_paused());
        apply(&self.state, &self.events, |s| s.after_command(command));

        match command {
            ControlCommand::Pause => {
                tracing::info!("session paused");
                self.events.emit(SessionEvent::Paused);
            }
            ControlCommand::Resume => {
                tracing::info!("session resumed");
                self.events.emit(SessionEvent::Resumed);
            }
            ControlCommand::None => {}
        }

        let turn = split_turn(&text);
        tracing::debug!(
            chars = text.len(),
            bilingual = turn.secondary.is_some(),
            "reply turn completed"
        );
        self.events.emit(SessionEvent::TurnCompleted {
            text: turn.render.to_string(),
            speech: turn.speech.to_string(),
        });

        let should_speak = !self.state.get().is_paused() && !turn.speech.is_empty();
        if let Some(speaker) = self.speaker.as_ref().filter(|_| should_speak) {
            self.events.emit(SessionEvent::SpeechStarted);
            match speaker.speak(turn.speech).await {
                Ok(()) => self.events.emit(SessionEvent::SpeechFinished),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "speech failed, continuing without it");
                    self.events.emit(SessionEvent::SpeechFailed(e.to_string()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "speech output unavailable");
                    self.events.emit(SessionEvent::SpeechFailed(e.to_string()));
                    return Err(e);
                }
            }
        }

        apply(&self.state, &self.events, SessionState::settle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted(Vec<Option<Result<String>>>);

    #[async_trait]
    impl MessageStream for Scripted {
        async fn next_message(&mut self) -> Option<Result<String>> {
            if self.0.is_empty() {
                None
            } else {
                self.0.remove(0)
            }
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl Speaker for Recorder {
        async fn speak(&self, text: &str) -> Result<()> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn content(fragments: &[&str], turn_complete: bool) -> InboundMessage {
        InboundMessage::Content {
            fragments: fragments.iter().map(ToString::to_string).collect(),
            turn_complete,
        }
    }

    #[tokio::test]
    async fn test_next_inbound_skips_garbage() {
        let mut stream = Scripted(vec![
            Some(Ok("not json".to_string())),
            Some(Err(Error::Decode("binary".into()))),
            Some(Ok(r#"{"setupComplete":{}}"#.to_string())),
        ]);
        assert_eq!(
            next_inbound(&mut stream).await.unwrap(),
            InboundMessage::SetupAck
        );
    }

    #[tokio::test]
    async fn test_next_inbound_end_of_stream_is_fatal() {
        let mut stream = Scripted(vec![]);
        assert!(matches!(
            next_inbound(&mut stream).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_router_speaks_primary_segment() {
        let state = SharedState::default();
        let speaker = Arc::new(Recorder::default());
        let mut router = TurnRouter::new(
            state.clone(),
            EventSender::discard(),
            Some(speaker.clone() as Arc<dyn Speaker>),
        );

        router.route(content(&["Well done.\n"], false)).await.unwrap();
        assert_eq!(state.get(), SessionState::Processing);

        router.route(content(&["---\n很好。"], true)).await.unwrap();
        assert_eq!(state.get(), SessionState::Idle);
        assert_eq!(*speaker.0.lock().unwrap(), vec!["Well done.".to_string()]);
    }

    #[tokio::test]
    async fn test_router_pause_and_resume() {
        let state = SharedState::default();
        let (events, mut rx) = EventSender::channel();
        let mut router = TurnRouter::new(state.clone(), events, None);

        router.route(content(&["Sure, can I have a break?"], true)).await.unwrap();
        assert_eq!(state.get(), SessionState::Paused);

        router.route(content(&["Hello again"], true)).await.unwrap();
        assert_eq!(state.get(), SessionState::Paused);

        router.route(content(&["OK let's continue"], true)).await.unwrap();
        assert_eq!(state.get(), SessionState::Idle);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&SessionEvent::Paused));
        assert!(seen.contains(&SessionEvent::Resumed));
    }
}
