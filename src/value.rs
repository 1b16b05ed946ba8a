//! Payload carried by a successful event.

use crate::event::EventId;

/// The value an event succeeds with, or a process exits with.
///
/// `Text` and `Int` cover most test and demo needs; `Data` is the opaque
/// escape hatch for host code with its own encoding.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// No payload (plain signals, resource grants, process start).
    #[default]
    None,
    Int(i64),
    Float(f64),
    Text(String),
    /// Raw bytes.
    Data(Vec<u8>),
    /// Result of a composite event: every constituent that had been
    /// processed successfully when the composite fired, in constituent order.
    Conditions(Vec<(EventId, Value)>),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Value of constituent `id` inside a composite result.
    pub fn condition(&self, id: EventId) -> Option<&Value> {
        match self {
            Value::Conditions(entries) => entries
                .iter()
                .find(|(event, _)| *event == id)
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => {
                if s.len() > 32 {
                    let cut = s.char_indices().nth(32).map_or(s.len(), |(i, _)| i);
                    write!(f, "{:?}…", &s[..cut])
                } else {
                    write!(f, "{:?}", s)
                }
            }
            Value::Data(d) => write!(f, "Data({} bytes)", d.len()),
            Value::Conditions(entries) => write!(f, "Conditions({})", entries.len()),
        }
    }
}
