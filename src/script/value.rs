use indexmap::IndexMap;

/// Generic value handed to script callbacks.
///
/// Mirrors what a dynamically typed scripting language can represent:
/// nil, booleans, numbers, strings, ordered sequences and mappings.
/// Mappings keep their keys in insertion order.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    List(Vec<ScriptValue>),
    Map(IndexMap<String, ScriptValue>),
}

impl ScriptValue {
    /// Error descriptor passed to callbacks on failure: `{ error = message }`.
    pub fn error_descriptor(message: &str) -> Self {
        let mut map = IndexMap::new();
        map.insert("error".to_string(), ScriptValue::String(message.to_string()));
        ScriptValue::Map(map)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Field lookup on a mapping; `None` for every other variant.
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        match self {
            ScriptValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Boolean(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::List(_) => "list",
            ScriptValue::Map(_) => "map",
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Boolean(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Number(value)
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ScriptValue::Nil)
    }
}
