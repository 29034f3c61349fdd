//! Wire envelopes for the bidirectional generate-content socket
//!
//! Outbound messages use the snake_case field names the service accepts on
//! input; inbound messages arrive camelCase.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// MIME type attached to every realtime audio chunk
pub const AUDIO_MIME_TYPE: &str = "audio/pcm";

/// Response modality requested at setup
const RESPONSE_MODALITY: &str = "TEXT";

#[derive(Serialize)]
struct SetupEnvelope<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize)]
struct Setup<'a> {
    model: String,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct GenerationConfig<'a> {
    response_modalities: [&'a str; 1],
}

#[derive(Serialize)]
struct ClientContentEnvelope<'a> {
    client_content: ClientContent<'a>,
}

#[derive(Serialize)]
struct ClientContent<'a> {
    turns: [ContentTurn<'a>; 1],
    turn_complete: bool,
}

#[derive(Serialize)]
struct ContentTurn<'a> {
    role: &'a str,
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct RealtimeInputEnvelope<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
struct RealtimeInput<'a> {
    media_chunks: [MediaChunk<'a>; 1],
}

#[derive(Serialize)]
struct MediaChunk<'a> {
    data: String,
    mime_type: &'a str,
}

/// Qualify a bare model name with the `models/` prefix
fn qualified_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Encode the setup message naming the model and asking for text replies
///
/// # Errors
///
/// Returns error if serialization fails
pub fn setup(model: &str) -> Result<String> {
    let envelope = SetupEnvelope {
        setup: Setup {
            model: qualified_model(model),
            generation_config: GenerationConfig {
                response_modalities: [RESPONSE_MODALITY],
            },
        },
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Encode a complete user turn carrying a single text part
///
/// # Errors
///
/// Returns error if serialization fails
pub fn user_turn(text: &str) -> Result<String> {
    let envelope = ClientContentEnvelope {
        client_content: ClientContent {
            turns: [ContentTurn {
                role: "user",
                parts: [TextPart { text }],
            }],
            turn_complete: true,
        },
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Encode one raw PCM chunk as a realtime input message
///
/// # Errors
///
/// Returns error if serialization fails
pub fn audio_chunk(pcm: &[u8]) -> Result<String> {
    let envelope = RealtimeInputEnvelope {
        realtime_input: RealtimeInput {
            media_chunks: [MediaChunk {
                data: BASE64.encode(pcm),
                mime_type: AUDIO_MIME_TYPE,
            }],
        },
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// A decoded inbound message, classified for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Acknowledgement of the setup message
    SetupAck,
    /// Model output: zero or more text fragments, possibly closing the turn
    Content {
        /// Text parts in arrival order
        fragments: Vec<String>,
        /// Whether this message ends the current turn
        turn_complete: bool,
    },
    /// Anything this client does not act on
    Other,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Decode and classify a raw inbound frame
///
/// # Errors
///
/// Returns [`Error::Decode`] if the frame is not a JSON object
pub fn decode(raw: &str) -> Result<InboundMessage> {
    let message: ServerMessage =
        serde_json::from_str(raw).map_err(|e| Error::Decode(e.to_string()))?;

    if let Some(content) = message.server_content {
        let fragments: Vec<String> = content
            .model_turn
            .map(|turn| turn.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if fragments.is_empty() && !content.turn_complete {
            return Ok(InboundMessage::Other);
        }

        return Ok(InboundMessage::Content {
            fragments,
            turn_complete: content.turn_complete,
        });
    }

    if message.setup_complete.is_some() {
        return Ok(InboundMessage::SetupAck);
    }

    Ok(InboundMessage::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn parse(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn test_setup_envelope() {
        let msg = parse(&setup("gemini-2.0-flash-exp").unwrap());
        assert_eq!(
            msg,
            json!({
                "setup": {
                    "model": "models/gemini-2.0-flash-exp",
                    "generation_config": {"response_modalities": ["TEXT"]}
                }
            })
        );
    }

    #[test]
    fn test_setup_keeps_qualified_model() {
        let msg = parse(&setup("models/custom").unwrap());
        assert_eq!(msg["setup"]["model"], "models/custom");
    }

    #[test]
    fn test_user_turn_envelope() {
        let msg = parse(&user_turn("hello").unwrap());
        assert_eq!(
            msg,
            json!({
                "client_content": {
                    "turns": [{"role": "user", "parts": [{"text": "hello"}]}],
                    "turn_complete": true
                }
            })
        );
    }

    #[test]
    fn test_audio_chunk_envelope() {
        let msg = parse(&audio_chunk(&[0x01, 0x02, 0x03]).unwrap());
        let chunk = &msg["realtime_input"]["media_chunks"][0];
        assert_eq!(chunk["data"], "AQID");
        assert_eq!(chunk["mime_type"], "audio/pcm");
    }

    #[test]
    fn test_decode_content_with_turn_complete() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[{"text":"Hel"},{"text":"lo"}]},"turnComplete":true}}"#;
        assert_eq!(
            decode(raw).unwrap(),
            InboundMessage::Content {
                fragments: vec!["Hel".into(), "lo".into()],
                turn_complete: true,
            }
        );
    }

    #[test]
    fn test_decode_bare_turn_complete() {
        let raw = r#"{"serverContent":{"turnComplete":true}}"#;
        assert_eq!(
            decode(raw).unwrap(),
            InboundMessage::Content {
                fragments: vec![],
                turn_complete: true,
            }
        );
    }

    #[test]
    fn test_decode_skips_non_text_parts() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"AA=="}},{"text":"hi"}]}}}"#;
        assert_eq!(
            decode(raw).unwrap(),
            InboundMessage::Content {
                fragments: vec!["hi".into()],
                turn_complete: false,
            }
        );
    }

    #[test]
    fn test_decode_setup_complete() {
        assert_eq!(decode(r#"{"setupComplete":{}}"#).unwrap(), InboundMessage::SetupAck);
    }

    #[test]
    fn test_decode_other_shapes() {
        assert_eq!(decode(r#"{"toolCall":{}}"#).unwrap(), InboundMessage::Other);
        assert_eq!(decode(r#"{"serverContent":{"interrupted":true}}"#).unwrap(), InboundMessage::Other);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("not json"), Err(Error::Decode(_))));
        assert!(matches!(decode("[1,2]"), Err(Error::Decode(_))));
    }
}
