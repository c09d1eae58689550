//! Wire envelope and the kind-specific payloads carried inside it.
//!
//! On the wire an envelope is one flat JSON object: the `type` discriminator
//! next to the payload fields, e.g. `{"type":"chat","message":"hi","sheet_data":null}`.
//! Everything else travels as `{"type":...,"payload":...}`: null and non-object
//! payloads, and objects that carry their own `type` or `payload` key.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// Known envelope kinds.
pub mod kind {
    pub const CHAT: &str = "chat";
    pub const CHAT_RESPONSE: &str = "chat_response";
    pub const SHEET_LOADED: &str = "sheet_loaded";
    pub const ERROR: &str = "error";
    pub const LOAD_SHEET: &str = "load_sheet";
}

const TYPE_KEY: &str = "type";
const PAYLOAD_KEY: &str = "payload";

/// Unit of message exchange: a kind tag plus a kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Build an envelope from a serializable payload struct.
    pub fn from_payload<T: Serialize>(kind: &str, payload: &T) -> Result<Self, ClientError> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Wire form. Object payloads are flattened next to `type` unless a key
    /// would collide; anything else is nested under `payload`.
    pub fn to_json(&self) -> Value {
        let mut object = match &self.payload {
            Value::Object(fields)
                if !fields.contains_key(TYPE_KEY) && !fields.contains_key(PAYLOAD_KEY) =>
            {
                fields.clone()
            }
            other => {
                let mut m = Map::new();
                m.insert(PAYLOAD_KEY.into(), other.clone());
                m
            }
        };
        object.insert(TYPE_KEY.into(), Value::String(self.kind.clone()));
        Value::Object(object)
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }

    /// Parse the flat wire form. Accepts `kind` as an alias of `type`.
    pub fn from_json(value: Value) -> Result<Self, ClientError> {
        let mut object = match value {
            Value::Object(o) => o,
            other => {
                return Err(ClientError::Protocol(format!(
                    "envelope must be a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };
        let kind = match object.remove(TYPE_KEY).or_else(|| object.remove("kind")) {
            Some(Value::String(k)) if !k.is_empty() => k,
            Some(_) => return Err(ClientError::Protocol("envelope type must be a string".into())),
            None => return Err(ClientError::Protocol("missing type".into())),
        };
        // A lone `payload` key is a nested payload; a flattened one never has it.
        let payload = match object.remove(PAYLOAD_KEY) {
            Some(nested) if object.is_empty() => nested,
            Some(nested) => {
                object.insert(PAYLOAD_KEY.into(), nested);
                Value::Object(object)
            }
            None => Value::Object(object),
        };
        Ok(Self { kind, payload })
    }

    pub fn from_text(text: &str) -> Result<Self, ClientError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(value)
    }

    /// Decode the payload into its kind-specific shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        decode_payload(&self.kind, self.payload.clone())
    }
}

/// Decode a payload for `kind`, tagging failures with the kind.
pub fn decode_payload<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ClientError> {
    serde_json::from_value(payload)
        .map_err(|e| ClientError::Protocol(format!("invalid {} payload: {}", kind, e)))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Client → server: chat message with the current dataset as context.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    #[serde(rename = "sheet_data")]
    pub context: Option<&'a Value>,
}

/// Client → server: ask the backend to load a sheet.
#[derive(Debug, Clone, Serialize)]
pub struct LoadSheetRequest<'a> {
    pub sheet_id: &'a str,
    pub range: &'a str,
}

/// Server → client: generated chat answer.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub message: String,
}

/// Server → client: loaded dataset.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SheetLoaded {
    pub data: Value,
}

/// Server → client: error.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ErrorMessage {
    pub message: String,
}
