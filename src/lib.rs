//! Live Tutor - real-time spoken-English practice over a streaming model
//!
//! The learner's microphone is streamed to a bidirectional model session;
//! the tutor's replies stream back as text, are rendered on the terminal and
//! optionally spoken aloud.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Devices                         │
//! │   Microphone (cpal)   │   Speaker (cpal + minimp3)   │
//! └────────────┬──────────────────────────▲─────────────┘
//!              │                          │
//! ┌────────────▼──────────────────────────┴─────────────┐
//! │                 Session Protocol                     │
//! │   capture │ send │ receive │ shared state │ events   │
//! └────────────┬──────────────────────────▲─────────────┘
//!              │                          │
//! ┌────────────▼──────────────────────────┴─────────────┐
//! │        Transport (WebSocket, HTTP CONNECT proxy)     │
//! │        Gemini BidiGenerateContent  │  ElevenLabs TTS │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod console;
pub mod error;
pub mod prompt;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::{Config, Overrides};
pub use console::Reporter;
pub use error::{Error, Result};
pub use prompt::{THEMES, Theme, tutor_prompt};
pub use protocol::{ControlCommand, SessionState, SharedState};
pub use session::{EventSender, SessionEvent, SessionOptions, SessionProtocol, TaskGroup};
