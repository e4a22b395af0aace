//! Transport encoding for the values and exceptions channels.
//!
//! A value is written as `{"type": <basic type>, "data": <payload>}`; nested
//! sequences and maps carry encoded values all the way down. An exception is
//! written as `{"message", "stacktrace", "type"}`, or as `null` when the call
//! did not fail.

use crate::errors::HarnessError;
use crate::invoker::SubmissionError;
use crate::separator::SeparatorToken;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ABSENT_EXCEPTION: &str = "null";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasicType {
    Nothing,
    Boolean,
    Integer,
    Real,
    Text,
    Sequence,
    Map,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedValue {
    #[serde(rename = "type")]
    pub kind: BasicType,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MapEntry {
    key: EncodedValue,
    value: EncodedValue,
}

impl EncodedValue {
    pub fn nothing() -> Self {
        Self {
            kind: BasicType::Nothing,
            data: Value::Null,
        }
    }

    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::nothing(),
            Value::Bool(b) => Self {
                kind: BasicType::Boolean,
                data: Value::Bool(b),
            },
            Value::Number(n) => {
                let kind = if n.is_f64() {
                    BasicType::Real
                } else {
                    BasicType::Integer
                };
                Self {
                    kind,
                    data: Value::Number(n),
                }
            }
            Value::String(s) => Self::text(s),
            Value::Array(items) => Self {
                kind: BasicType::Sequence,
                data: Value::Array(
                    items
                        .into_iter()
                        .map(|item| Self::from_json(item).into_json())
                        .collect(),
                ),
            },
            Value::Object(fields) => Self {
                kind: BasicType::Map,
                data: Value::Array(
                    fields
                        .into_iter()
                        .map(|(key, value)| {
                            serde_json::json!({
                                "key": Self::text(key).into_json(),
                                "value": Self::from_json(value).into_json(),
                            })
                        })
                        .collect(),
                ),
            },
        }
    }

    fn text(value: String) -> Self {
        Self {
            kind: BasicType::Text,
            data: Value::String(value),
        }
    }

    fn into_json(self) -> Value {
        serde_json::json!({ "type": self.kind, "data": self.data })
    }

    /// Strips the type tags back off, recovering the plain JSON value.
    pub fn to_plain(&self) -> Result<Value, HarnessError> {
        match self.kind {
            BasicType::Nothing => Ok(Value::Null),
            BasicType::Boolean | BasicType::Integer | BasicType::Real | BasicType::Text => {
                Ok(self.data.clone())
            }
            BasicType::Sequence => {
                let items: Vec<EncodedValue> = serde_json::from_value(self.data.clone())
                    .map_err(|e| HarnessError::Decode(format!("sequence: {e}")))?;
                items
                    .iter()
                    .map(EncodedValue::to_plain)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            BasicType::Map => {
                let entries: Vec<MapEntry> = serde_json::from_value(self.data.clone())
                    .map_err(|e| HarnessError::Decode(format!("map: {e}")))?;
                let mut object = serde_json::Map::new();
                for entry in entries {
                    let key = match entry.key.to_plain()? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    object.insert(key, entry.value.to_plain()?);
                }
                Ok(Value::Object(object))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub message: String,
    pub stacktrace: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<&SubmissionError> for ExceptionRecord {
    fn from(error: &SubmissionError) -> Self {
        Self {
            message: error.message.clone(),
            stacktrace: error.stacktrace.clone(),
            kind: error.kind.clone(),
        }
    }
}

/// What one segment of a channel holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// The segment is empty: no record was written for this step.
    Missing,
    /// An explicit "no value" / "no exception" record.
    Absent,
    Present(T),
}

pub fn encode_value<T: Serialize + ?Sized>(
    value: &T,
    token: &SeparatorToken,
) -> Result<String, HarnessError> {
    let json = serde_json::to_value(value).map_err(|e| HarnessError::Encode(e.to_string()))?;
    let encoded = serde_json::to_string(&EncodedValue::from_json(json))
        .map_err(|e| HarnessError::Encode(e.to_string()))?;
    Ok(shield(&encoded, token))
}

pub fn encode_absent_value() -> Result<String, HarnessError> {
    serde_json::to_string(&EncodedValue::nothing()).map_err(|e| HarnessError::Encode(e.to_string()))
}

pub fn encode_exception(
    error: Option<&SubmissionError>,
    token: &SeparatorToken,
) -> Result<String, HarnessError> {
    let Some(error) = error else {
        return Ok(ABSENT_EXCEPTION.to_string());
    };
    let encoded = serde_json::to_string(&ExceptionRecord::from(error))
        .map_err(|e| HarnessError::Encode(e.to_string()))?;
    Ok(shield(&encoded, token))
}

/// Rewrites every occurrence of the token inside encoded JSON so the token
/// cannot show up in a record.
///
/// The token can only occur inside a JSON string, where `\u002d` decodes
/// back to the `-` it replaces.
pub fn shield(encoded: &str, token: &SeparatorToken) -> String {
    let token = token.as_str();
    if !encoded.contains(token) {
        return encoded.to_string();
    }
    let replacement = format!("\\u002d{}", &token[1..]);
    encoded.replace(token, &replacement)
}

pub fn decode_value(segment: &str) -> Result<Decoded<EncodedValue>, HarnessError> {
    if segment.trim().is_empty() {
        return Ok(Decoded::Missing);
    }
    let value: EncodedValue =
        serde_json::from_str(segment).map_err(|e| HarnessError::Decode(format!("value: {e}")))?;
    if value.kind == BasicType::Nothing {
        return Ok(Decoded::Absent);
    }
    Ok(Decoded::Present(value))
}

pub fn decode_exception(segment: &str) -> Result<Decoded<ExceptionRecord>, HarnessError> {
    if segment.trim().is_empty() {
        return Ok(Decoded::Missing);
    }
    let record: Option<ExceptionRecord> = serde_json::from_str(segment)
        .map_err(|e| HarnessError::Decode(format!("exception: {e}")))?;
    Ok(match record {
        Some(record) => Decoded::Present(record),
        None => Decoded::Absent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token() -> SeparatorToken {
        SeparatorToken::new("EjgkIhoLX").expect("token")
    }

    #[test]
    fn text_value_is_tagged() {
        let encoded = encode_value("input-1", &token()).expect("encode");
        assert_eq!(encoded, r#"{"type":"text","data":"input-1"}"#);
    }

    #[test]
    fn numbers_split_into_integer_and_real() {
        let int = EncodedValue::from_json(json!(3));
        let real = EncodedValue::from_json(json!(2.5));
        assert_eq!(int.kind, BasicType::Integer);
        assert_eq!(real.kind, BasicType::Real);
    }

    #[test]
    fn nested_values_recover_their_plain_form() {
        let original = json!({"counts": [1, 2, null], "ok": true});
        let encoded = EncodedValue::from_json(original.clone());
        assert_eq!(encoded.kind, BasicType::Map);
        assert_eq!(encoded.to_plain().expect("plain"), original);
    }

    #[test]
    fn none_encodes_as_nothing_not_as_empty_text() {
        let encoded = encode_value(&Option::<String>::None, &token()).expect("encode");
        assert_eq!(encoded, encode_absent_value().expect("absent"));
        assert_eq!(decode_value(&encoded).expect("decode"), Decoded::Absent);
    }

    #[test]
    fn token_inside_a_value_is_shielded() {
        let sneaky = "before --EjgkIhoLX-- SEP after";
        let encoded = encode_value(sneaky, &token()).expect("encode");
        assert!(!encoded.contains(token().as_str()));

        let Decoded::Present(value) = decode_value(&encoded).expect("decode") else {
            panic!("expected a value");
        };
        assert_eq!(value.to_plain().expect("plain"), json!(sneaky));
    }

    #[test]
    fn shield_keeps_escaped_backslashes_intact() {
        let tricky = "\\--EjgkIhoLX-- SEP";
        let encoded = encode_value(tricky, &token()).expect("encode");
        assert!(!encoded.contains(token().as_str()));
        let Decoded::Present(value) = decode_value(&encoded).expect("decode") else {
            panic!("expected a value");
        };
        assert_eq!(value.data, json!(tricky));
    }

    #[test]
    fn exception_round_trips_and_absent_is_null() {
        let error = SubmissionError::new("ValueError", "bad input");
        let encoded = encode_exception(Some(&error), &token()).expect("encode");
        let Decoded::Present(record) = decode_exception(&encoded).expect("decode") else {
            panic!("expected an exception");
        };
        assert_eq!(record.kind, "ValueError");
        assert_eq!(record.message, "bad input");

        let absent = encode_exception(None, &token()).expect("encode");
        assert_eq!(absent, "null");
        assert_eq!(decode_exception(&absent).expect("decode"), Decoded::Absent);
        assert_eq!(decode_exception("").expect("decode"), Decoded::Missing);
    }

    #[test]
    fn garbage_segment_is_a_decode_error() {
        assert!(matches!(
            decode_value("not json"),
            Err(HarnessError::Decode(_))
        ));
    }
}
