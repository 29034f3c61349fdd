//! Shared test utilities
//!
//! In-memory doubles for the transport, the microphone and the speaker, and
//! a harness that runs a full session over them.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use live_tutor::session::{SessionOptions, SessionProtocol};
use live_tutor::transport::{MessageSink, MessageStream};
use live_tutor::voice::{AudioChunk, AudioSource, CHUNK_FRAMES, Speaker};
use live_tutor::{Error, EventSender, Result, SessionEvent, SharedState};

/// How long any single expectation may take
pub const WAIT: Duration = Duration::from_secs(2);

/// Outbound half that forwards every frame to the test
pub struct FakeSink {
    sent: mpsc::UnboundedSender<String>,
    delay: Duration,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSink for FakeSink {
    async fn send(&mut self, text: String) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.sent
            .send(text)
            .map_err(|_| Error::Transport("test receiver gone".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Inbound half fed by [`FakeServer`]
pub struct FakeStream {
    inbound: mpsc::UnboundedReceiver<Result<String>>,
}

#[async_trait]
impl MessageStream for FakeStream {
    async fn next_message(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await
    }
}

/// Test side of the fake service; dropping it closes the connection
pub struct FakeServer {
    tx: mpsc::UnboundedSender<Result<String>>,
}

impl FakeServer {
    pub fn raw(&self, frame: &str) {
        let _ = self.tx.send(Ok(frame.to_string()));
    }

    pub fn fail(&self, error: Error) {
        let _ = self.tx.send(Err(error));
    }

    pub fn setup_complete(&self) {
        self.raw(r#"{"setupComplete":{}}"#);
    }

    /// One content message carrying `fragments`
    pub fn fragments(&self, fragments: &[&str], turn_complete: bool) {
        let parts: Vec<_> = fragments
            .iter()
            .map(|text| serde_json::json!({ "text": text }))
            .collect();
        let message = serde_json::json!({
            "serverContent": {
                "modelTurn": { "parts": parts },
                "turnComplete": turn_complete,
            }
        });
        self.raw(&message.to_string());
    }

    /// A whole reply in one message
    pub fn reply(&self, text: &str) {
        self.fragments(&[text], true);
    }
}

/// Microphone double fed by the test
pub struct ScriptedSource {
    chunks: mpsc::UnboundedReceiver<AudioChunk>,
    reads: Arc<AtomicUsize>,
    discards: Arc<AtomicUsize>,
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn read_chunk(&mut self) -> Result<AudioChunk> {
        match self.chunks.recv().await {
            Some(chunk) => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(chunk)
            }
            // A silent microphone never completes a read
            None => std::future::pending().await,
        }
    }

    fn discard_pending(&mut self) {
        while self.chunks.try_recv().is_ok() {}
        self.discards.fetch_add(1, Ordering::SeqCst);
    }
}

/// Speaker double recording what it was asked to say
#[derive(Default)]
pub struct RecordingSpeaker {
    spoken: Mutex<Vec<String>>,
    failure: Option<fn() -> Error>,
}

impl RecordingSpeaker {
    /// Every synthesis request fails
    pub fn failing() -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            failure: Some(|| Error::Synthesis("quota exceeded".to_string())),
        }
    }

    /// The output device is gone
    pub fn without_device() -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            failure: Some(|| Error::Device("no output device".to_string())),
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        match self.failure {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }
}

/// A chunk of constant samples
pub fn chunk_of(sample: i16) -> AudioChunk {
    AudioChunk::from_samples(&vec![sample; CHUNK_FRAMES])
}

/// A chunk well above the volume threshold
pub fn voiced_chunk() -> AudioChunk {
    chunk_of(1000)
}

/// Decode the PCM bytes of an outbound audio message
pub fn audio_payload(message: &str) -> Option<Vec<u8>> {
    let value: serde_json::Value = serde_json::from_str(message).ok()?;
    let data = value["realtime_input"]["media_chunks"][0]["data"].as_str()?;
    BASE64.decode(data).ok()
}

/// Poll `condition` until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A session running over fakes
pub struct Harness {
    pub server: FakeServer,
    pub sent: mpsc::UnboundedReceiver<String>,
    pub mic: mpsc::UnboundedSender<AudioChunk>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub state: SharedState,
    pub shutdown: CancellationToken,
    pub closed: Arc<AtomicBool>,
    pub reads: Arc<AtomicUsize>,
    pub discards: Arc<AtomicUsize>,
    pub session: JoinHandle<Result<()>>,
}

/// Options for [`Harness::start`]
#[derive(Default)]
pub struct HarnessOptions {
    pub speaker: Option<Arc<dyn Speaker>>,
    pub send_delay: Duration,
}

impl Harness {
    pub fn start(options: HarnessOptions) -> Self {
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let (server_tx, inbound) = mpsc::unbounded_channel();
        let (mic, chunks) = mpsc::unbounded_channel();
        let (events_tx, events) = EventSender::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicUsize::new(0));
        let discards = Arc::new(AtomicUsize::new(0));

        let sink = FakeSink {
            sent: sent_tx,
            delay: options.send_delay,
            closed: closed.clone(),
        };
        let source = ScriptedSource {
            chunks,
            reads: reads.clone(),
            discards: discards.clone(),
        };

        let mut protocol = SessionProtocol::new(
            SessionOptions {
                model: "gemini-2.0-flash-exp".to_string(),
                prompt: "Be my tutor. Reply OK.".to_string(),
            },
            Box::new(sink),
            Box::new(FakeStream { inbound }),
            events_tx,
        );
        if let Some(speaker) = options.speaker {
            protocol = protocol.with_speaker(speaker);
        }
        let state = protocol.state();

        let shutdown = CancellationToken::new();
        let session = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { protocol.run(Box::new(source), &shutdown).await })
        };

        Self {
            server: FakeServer { tx: server_tx },
            sent,
            mic,
            events,
            state,
            shutdown,
            closed,
            reads,
            discards,
            session,
        }
    }

    /// Drive the handshake to completion
    pub async fn ready(options: HarnessOptions) -> Self {
        let mut harness = Self::start(options);
        harness.server.setup_complete();
        harness.server.reply("OK. 好的。");
        harness
            .expect_event(|e| matches!(e, SessionEvent::Ready))
            .await;
        // Setup and prompt
        harness.next_sent().await;
        harness.next_sent().await;
        harness
    }

    pub async fn next_sent(&mut self) -> String {
        tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("nothing sent in time")
            .expect("sink dropped")
    }

    /// Next outbound audio payload
    pub async fn next_audio(&mut self) -> Vec<u8> {
        let message = self.next_sent().await;
        audio_payload(&message).expect("not an audio message")
    }

    /// Skip events until one matches, returning it
    pub async fn expect_event(&mut self, wanted: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if wanted(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not seen in time")
    }

    /// Wait for the session to end
    pub async fn finish(self) -> Result<()> {
        tokio::time::timeout(WAIT, self.session)
            .await
            .expect("session did not stop in time")
            .expect("session task panicked")
    }
}
