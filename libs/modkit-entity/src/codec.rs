//! Wire codecs.
//!
//! An [`crate::endpoint::Api`] is constructed with a [`MessageCodec`]; the
//! codec turns request bodies into [`Message`]s and responses back into
//! bodies. [`JsonCodec`] implements the protojson-style mapping:
//!
//! - integers as JSON numbers (numeric strings are accepted on input)
//! - bytes as standard base64 (url-safe accepted on input)
//! - date-times as RFC 3339 strings
//! - enums by name (numbers accepted on input)
//! - nested messages as objects, repeated fields as arrays
//! - `null` and missing keys leave a field unset; unknown keys are ignored

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as Json};
use tracing::trace;

use crate::error::ConversionError;
use crate::message::Message;
use crate::schema::{FieldDescriptor, MessageSchema, WireType};
use crate::value::Value;

pub trait MessageCodec: Send + Sync {
    /// Media type of encoded bodies.
    fn content_type(&self) -> &'static str;

    /// # Errors
    /// `ConversionError` when the body is malformed or a field value does
    /// not fit its wire type.
    fn decode(&self, schema: &Arc<MessageSchema>, body: &str) -> Result<Message, ConversionError>;

    /// # Errors
    /// `ConversionError::Malformed` when a value has no representation in
    /// this codec (e.g. a non-finite float in JSON).
    fn encode(&self, message: &Message) -> Result<String, ConversionError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Decode an already-parsed JSON object.
    ///
    /// # Errors
    /// Same as [`MessageCodec::decode`].
    pub fn decode_value(
        &self,
        schema: &Arc<MessageSchema>,
        json: &Json,
    ) -> Result<Message, ConversionError> {
        decode_object(schema, json)
    }

    /// Encode into a JSON object value.
    ///
    /// # Errors
    /// Same as [`MessageCodec::encode`].
    pub fn encode_value(&self, message: &Message) -> Result<Json, ConversionError> {
        encode_object(message)
    }
}

impl MessageCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn decode(&self, schema: &Arc<MessageSchema>, body: &str) -> Result<Message, ConversionError> {
        if body.trim().is_empty() {
            return Ok(Message::new(Arc::clone(schema)));
        }
        let json: Json = serde_json::from_str(body)
            .map_err(|e| ConversionError::Malformed(format!("invalid JSON body: {e}")))?;
        decode_object(schema, &json)
    }

    fn encode(&self, message: &Message) -> Result<String, ConversionError> {
        let json = encode_object(message)?;
        serde_json::to_string(&json).map_err(|e| ConversionError::Malformed(e.to_string()))
    }
}

fn decode_object(schema: &Arc<MessageSchema>, json: &Json) -> Result<Message, ConversionError> {
    let Json::Object(map) = json else {
        return Err(ConversionError::Malformed(format!(
            "expected a JSON object for {}",
            schema.name()
        )));
    };
    let mut message = Message::new(Arc::clone(schema));
    for (name, raw) in map {
        let Some(field) = schema.field(name) else {
            trace!(schema = %schema.name(), field = %name, "ignoring unknown field");
            continue;
        };
        if raw.is_null() {
            continue;
        }
        let value = decode_field(field, raw)?;
        message.set(name, value)?;
    }
    Ok(message)
}

fn decode_field(field: &FieldDescriptor, raw: &Json) -> Result<Value, ConversionError> {
    if !field.is_repeated() {
        return decode_scalar(field.name(), field.wire_type(), raw);
    }
    let Json::Array(items) = raw else {
        return Err(shape(field.name(), "array", raw));
    };
    items
        .iter()
        .map(|item| decode_scalar(field.name(), field.wire_type(), item))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List)
}

fn shape(field: &str, expected: &str, raw: &Json) -> ConversionError {
    let got = match raw {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    };
    ConversionError::TypeMismatch {
        field: field.to_owned(),
        expected: expected.to_owned(),
        got: got.to_owned(),
    }
}

fn decode_scalar(field: &str, wire: &WireType, raw: &Json) -> Result<Value, ConversionError> {
    match (wire, raw) {
        (WireType::String, Json::String(s)) => Ok(Value::String(s.clone())),
        (WireType::Boolean, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (WireType::Integer, Json::Number(n)) => n
            .as_i64()
            .map(Value::Integer)
            .ok_or_else(|| shape(field, "int64", raw)),
        (WireType::Integer, Json::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| shape(field, "int64", raw)),
        (WireType::Float, Json::Number(n)) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| shape(field, "double", raw)),
        (WireType::Float, Json::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| shape(field, "double", raw)),
        (WireType::Bytes, Json::String(s)) => base64::engine::general_purpose::STANDARD
            .decode(s)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s))
            .map(Value::Bytes)
            .map_err(|_| shape(field, "base64 bytes", raw)),
        (WireType::DateTime, Json::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .map_err(|_| shape(field, "RFC 3339 date-time", raw)),
        (WireType::Enum(ty), Json::String(s)) => ty
            .by_name(s)
            .map(Value::Enum)
            .ok_or_else(|| shape(field, &format!("{} name", ty.name()), raw)),
        (WireType::Enum(ty), Json::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .and_then(|i| ty.by_number(i))
            .map(Value::Enum)
            .ok_or_else(|| shape(field, &format!("{} number", ty.name()), raw)),
        (WireType::Message(schema), Json::Object(_)) => {
            decode_object(schema, raw).map(Value::Message)
        }
        (wire, raw) => Err(shape(field, &wire.to_string(), raw)),
    }
}

fn encode_object(message: &Message) -> Result<Json, ConversionError> {
    let mut map = Map::new();
    for (field, value) in message.iter() {
        map.insert(field.name().to_owned(), encode_value(field.name(), value)?);
    }
    Ok(Json::Object(map))
}

fn encode_value(field: &str, value: &Value) -> Result<Json, ConversionError> {
    Ok(match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| ConversionError::Malformed(format!("{field}: non-finite float")))?,
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(base64::engine::general_purpose::STANDARD.encode(b)),
        Value::DateTime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Enum(e) => Json::String(e.name.clone()),
        Value::Message(m) => encode_object(m)?,
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|v| encode_value(field, v))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => return Err(ConversionError::mismatch(field, "wire value", other)),
    })
}

/// Machine-readable description of a schema, nested message types inline.
#[must_use]
pub fn describe_schema(schema: &MessageSchema) -> Json {
    let fields: Vec<Json> = schema
        .fields()
        .iter()
        .map(|f| {
            let mut entry = Map::new();
            entry.insert("name".to_owned(), Json::from(f.name()));
            entry.insert("number".to_owned(), Json::from(f.number()));
            let wire = match f.wire_type() {
                WireType::Message(nested) => describe_schema(nested),
                WireType::Enum(ty) => serde_json::json!({
                    "enum": ty.name(),
                    "values": ty.variants().map(|v| v.name).collect::<Vec<_>>(),
                }),
                other => Json::from(other.to_string()),
            };
            entry.insert("type".to_owned(), wire);
            if f.is_repeated() {
                entry.insert("repeated".to_owned(), Json::Bool(true));
            }
            if f.is_required() {
                entry.insert("required".to_owned(), Json::Bool(true));
            }
            if let Some(default) = f.default_value()
                && let Ok(json) = encode_value(f.name(), default)
            {
                entry.insert("default".to_owned(), json);
            }
            Json::Object(entry)
        })
        .collect();
    serde_json::json!({ "message": schema.name(), "fields": fields })
}
