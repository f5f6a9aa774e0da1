//! Wire codec: JSON message arrays <-> [`Message`] envelopes
//!
//! Decoding never fails as a whole. A frame is split into its elements and
//! each element either becomes a [`Message`] or a [`DecodeFailure`] that
//! carries the raw element text, so one bad element cannot take the rest of
//! the frame down with it.

use super::channels::validate_channel;
use super::messages::Message;
use crate::error::BayeuxError;
use serde_json::Value;

/// Element of a frame that could not be decoded
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    /// Raw text of the offending element (or the whole frame)
    pub payload: String,
    pub error: BayeuxError,
}

/// Result of decoding one inbound frame
#[derive(Debug, Default)]
pub struct DecodedFrame {
    pub messages: Vec<Message>,
    pub failures: Vec<DecodeFailure>,
}

/// Encode messages into a wire frame (always a JSON array)
pub fn encode(messages: &[Message]) -> Result<String, BayeuxError> {
    serde_json::to_string(messages).map_err(|e| BayeuxError::Serialization(e.to_string()))
}

/// Encode a single message as a one-element frame
pub fn encode_one(message: &Message) -> Result<String, BayeuxError> {
    encode(std::slice::from_ref(message))
}

/// Decode a wire frame holding an array of messages or a single message object
pub fn decode(text: &str) -> DecodedFrame {
    let mut frame = DecodedFrame::default();

    let elements = match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(elements)) => elements,
        Ok(object @ Value::Object(_)) => vec![object],
        Ok(other) => {
            frame.failures.push(DecodeFailure {
                payload: text.to_string(),
                error: BayeuxError::Deserialization(format!(
                    "expected message array or object, got {}",
                    json_kind(&other)
                )),
            });
            return frame;
        }
        Err(e) => {
            frame.failures.push(DecodeFailure {
                payload: text.to_string(),
                error: BayeuxError::Deserialization(format!("malformed JSON: {e}")),
            });
            return frame;
        }
    };

    for element in elements {
        match decode_element(element) {
            Ok(message) => frame.messages.push(message),
            Err(failure) => frame.failures.push(failure),
        }
    }

    frame
}

fn decode_element(element: Value) -> Result<Message, DecodeFailure> {
    let payload = element.to_string();

    let message: Message =
        serde_json::from_value(element).map_err(|e| DecodeFailure {
            payload: payload.clone(),
            error: BayeuxError::Deserialization(e.to_string()),
        })?;

    validate_channel(&message.channel).map_err(|e| DecodeFailure {
        payload,
        error: BayeuxError::Deserialization(e.to_string()),
    })?;

    Ok(message)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
