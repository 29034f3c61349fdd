//! Conversation protocol building blocks
//!
//! Pure pieces of the streaming session: wire envelopes, turn aggregation,
//! control phrase detection, bilingual turn splitting and the shared session
//! state. Nothing in here touches a socket or an audio device.

mod control;
pub mod messages;
mod segment;
mod state;
mod turn;

pub use control::{ControlCommand, PAUSE_PHRASE, RESUME_PHRASE, detect_command};
pub use messages::InboundMessage;
pub use segment::{SEGMENT_DELIMITER, TurnText, split_turn};
pub use state::{SessionState, SharedState, Transition};
pub use turn::TurnAggregator;
