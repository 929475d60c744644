//! The one shape every public storage operation hands back to its caller.
//!
//! Serialized form is always `{ok, error, data, meta}`; `error` is `null` on
//! success and `data` is `null` on failure.

use crate::error::WardenError;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{Map, Value};

/// Structured failure carried by [`Envelope::Err`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    pub extra: Map<String, Value>,
}

/// Uniform result of a public operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Ok {
        data: Value,
        meta: Map<String, Value>,
    },
    Err(EnvelopeError),
}

impl Envelope {
    /// Wrap a serializable payload in a success envelope.
    pub fn ok<T: serde::Serialize>(data: T) -> Self {
        Self::ok_with_meta(data, Map::new())
    }

    pub fn ok_with_meta<T: serde::Serialize>(data: T, meta: Map<String, Value>) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Envelope::Ok { data, meta },
            Err(err) => Envelope::fail(
                "serialization",
                format!("failed to serialize payload: {err}"),
                Map::new(),
            ),
        }
    }

    pub fn fail(
        code: impl Into<String>,
        message: impl Into<String>,
        extra: Map<String, Value>,
    ) -> Self {
        Envelope::Err(EnvelopeError {
            code: code.into(),
            message: message.into(),
            extra,
        })
    }

    pub fn from_error(err: &WardenError) -> Self {
        Envelope::fail(err.kind().as_str(), err.to_string(), err.extra())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Ok { .. })
    }

    /// Payload of a success envelope; `None` for failures.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Envelope::Ok { data, .. } => Some(data),
            Envelope::Err(_) => None,
        }
    }

    pub fn error(&self) -> Option<&EnvelopeError> {
        match self {
            Envelope::Ok { .. } => None,
            Envelope::Err(err) => Some(err),
        }
    }

    pub fn meta(&self) -> Option<&Map<String, Value>> {
        match self {
            Envelope::Ok { meta, .. } => Some(meta),
            Envelope::Err(_) => None,
        }
    }
}

impl From<WardenError> for Envelope {
    fn from(err: WardenError) -> Self {
        Envelope::from_error(&err)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 4)?;
        match self {
            Envelope::Ok { data, meta } => {
                state.serialize_field("ok", &true)?;
                state.serialize_field("error", &Option::<EnvelopeError>::None)?;
                state.serialize_field("data", data)?;
                state.serialize_field("meta", meta)?;
            }
            Envelope::Err(err) => {
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", err)?;
                state.serialize_field("data", &Value::Null)?;
                state.serialize_field("meta", &Map::new())?;
            }
        }
        state.end()
    }
}
