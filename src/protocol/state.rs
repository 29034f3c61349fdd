//! Session state machine
//!
//! The state is the one value shared by every concurrent flow of a session.
//! It lives in a `watch` channel so updates are atomic and suspended flows
//! can wait for the state they need.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use super::ControlCommand;

/// Conversation state of a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Listening, no reply in flight
    #[default]
    Idle,
    /// Listening, and a voiced chunk was seen in this window
    CaptureActive,
    /// A reply turn is streaming in (or being spoken)
    Processing,
    /// Outbound audio suspended until the resume phrase
    Paused,
}

impl SessionState {
    /// Whether captured audio may be queued for sending
    #[must_use]
    pub const fn accepts_audio(self) -> bool {
        matches!(self, Self::Idle | Self::CaptureActive)
    }

    /// Whether the session is paused
    #[must_use]
    pub const fn is_paused(self) -> bool {
        matches!(self, Self::Paused)
    }

    /// State after a voiced chunk is captured
    #[must_use]
    pub const fn on_voiced(self) -> Self {
        match self {
            Self::Idle => Self::CaptureActive,
            other => other,
        }
    }

    /// State after a reply fragment arrives
    #[must_use]
    pub const fn on_fragment(self) -> Self {
        match self {
            Self::Idle | Self::CaptureActive => Self::Processing,
            other => other,
        }
    }

    /// State while a completed turn is being handled
    ///
    /// Resuming goes through `Processing` so the reply can be spoken before
    /// the microphone is live again.
    #[must_use]
    pub const fn after_command(self, command: ControlCommand) -> Self {
        match command {
            ControlCommand::Pause => Self::Paused,
            ControlCommand::Resume => Self::Processing,
            ControlCommand::None => self,
        }
    }

    /// State once handling of a completed turn has finished
    #[must_use]
    pub const fn settle(self) -> Self {
        match self {
            Self::Paused => Self::Paused,
            _ => Self::Idle,
        }
    }

    /// Full transition for a completed turn carrying `command`
    #[must_use]
    pub const fn on_turn_complete(self, command: ControlCommand) -> Self {
        self.after_command(command).settle()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CaptureActive => "capture-active",
            Self::Processing => "processing",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// A state change applied to [`SharedState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the update
    pub from: SessionState,
    /// State after the update
    pub to: SessionState,
}

impl Transition {
    /// Whether the update changed the state
    #[must_use]
    pub fn changed(self) -> bool {
        self.from != self.to
    }
}

/// Session state shared between flows
#[derive(Debug, Clone)]
pub struct SharedState {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SharedState {
    /// Create shared state starting at `initial`
    #[must_use]
    pub fn new(initial: SessionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Apply a state function atomically, waking waiters only on change
    pub fn update(&self, next: impl FnOnce(SessionState) -> SessionState) -> Transition {
        let mut transition = None;
        self.tx.send_if_modified(|state| {
            let from = *state;
            *state = next(from);
            transition = Some(Transition { from, to: *state });
            from != *state
        });

        let current = self.get();
        transition.unwrap_or(Transition {
            from: current,
            to: current,
        })
    }

    /// Force the state to `state`
    pub fn set(&self, state: SessionState) -> Transition {
        self.update(|_| state)
    }

    /// Suspend until the state satisfies `predicate`, returning that state
    pub async fn wait_until(&self, predicate: impl FnMut(&SessionState) -> bool) -> SessionState {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting
        match rx.wait_for(predicate).await {
            Ok(state) => *state,
            Err(_) => self.get(),
        }
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(SessionState::Idle)
    }
}
