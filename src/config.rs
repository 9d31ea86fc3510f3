use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fs::File, io::BufReader, path::Path};
use thiserror::Error;

pub const SENDER_ID_KEY: &str = "android.gcm_sender_id";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to open config file: {message}")]
    Io { message: String },
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
    #[error("Config root must be an object, got {got}")]
    NotAnObject { got: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Host configuration as loaded from the project's JSON config file.
///
/// Keys are looked up with the host's `section.key` convention. A key is
/// resolved either as a literal top-level entry (`{"android.gcm_sender_id": ..}`)
/// or by walking nested objects (`{"android": {"gcm_sender_id": ..}}`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    root: serde_json::Map<String, Value>,
}

impl ConfigFile {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_value(value: Value) -> ConfigResult<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(ConfigError::NotAnObject {
                got: json_kind(&other).to_string(),
            }),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::from_value(from_file(path)?)
    }

    pub fn from_str(s: &str) -> ConfigResult<Self> {
        Self::from_value(from_str(s)?)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.lookup(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.lookup(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.root.get(key) {
            return Some(value);
        }
        let mut parts = key.split('.');
        let mut current = self.root.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }
}

/// Settings the push extension reads once at application startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PushConfig {
    /// Sender (application) identifier handed to the platform SDK.
    #[serde(default)]
    pub sender_id: String,
}

impl PushConfig {
    pub fn from_config_file(config: &ConfigFile) -> Self {
        Self {
            sender_id: config.get_string(SENDER_ID_KEY, ""),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ConfigResult<T> {
    let file = File::open(path).map_err(|e| ConfigError::Io {
        message: e.to_string(),
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ConfigResult<T> {
    let config = serde_json::from_str(s).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })?;
    Ok(config)
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
