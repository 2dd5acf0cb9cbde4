//! State values and typed keys

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Value kinds the state store can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<StateValue>),
    Json(serde_json::Value),
}

impl StateValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            StateValue::Bool(_) => "bool",
            StateValue::Int(_) => "int",
            StateValue::Float(_) => "float",
            StateValue::Text(_) => "text",
            StateValue::List(_) => "list",
            StateValue::Json(_) => "json",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int(value)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int(i64::from(value))
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Float(value)
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(value: Vec<StateValue>) -> Self {
        StateValue::List(value)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(value: serde_json::Value) -> Self {
        StateValue::Json(value)
    }
}

/// Returned when a stored value has a different kind than requested
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct ValueKindMismatch {
    pub expected: &'static str,
    pub found: &'static str,
}

macro_rules! impl_try_from_value {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl TryFrom<StateValue> for $ty {
            type Error = ValueKindMismatch;

            fn try_from(value: StateValue) -> Result<Self, Self::Error> {
                match value {
                    StateValue::$variant(inner) => Ok(inner),
                    other => Err(ValueKindMismatch {
                        expected: $name,
                        found: other.type_name(),
                    }),
                }
            }
        }
    };
}

impl_try_from_value!(bool, Bool, "bool");
impl_try_from_value!(i64, Int, "int");
impl_try_from_value!(f64, Float, "float");
impl_try_from_value!(String, Text, "text");
impl_try_from_value!(Vec<StateValue>, List, "list");
impl_try_from_value!(serde_json::Value, Json, "json");

/// Key bound to the type stored under it
///
/// ```ignore
/// const ACTIVE_PERSONA: StateKey<String> = StateKey::new("active_persona");
/// state.set_typed(&ACTIVE_PERSONA, "Boss".to_string());
/// let persona: Option<String> = state.get_typed(&ACTIVE_PERSONA);
/// ```
pub struct StateKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> std::fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateKey").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from_matching_kind() {
        assert_eq!(bool::try_from(StateValue::Bool(true)), Ok(true));
        assert_eq!(i64::try_from(StateValue::from(7)), Ok(7));
        assert_eq!(
            String::try_from(StateValue::from("persona")),
            Ok("persona".to_string())
        );
    }

    #[test]
    fn test_try_from_mismatched_kind() {
        let err = i64::try_from(StateValue::from("seven")).unwrap_err();
        assert_eq!(err.expected, "int");
        assert_eq!(err.found, "text");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(StateValue::Int(3)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "int", "value": 3}));

        let back: StateValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, StateValue::Int(3));
    }
}
