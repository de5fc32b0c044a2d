use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

pub const SCRIPT_ERROR_FLAG: &str = "engine.script_error";
pub const LAST_SCRIPT_ERROR: &str = "engine.last_script_error";
pub const MOVIES_ENABLED: &str = "rendering.movies";
pub const AMBIENT_SOUNDS_ENABLED: &str = "rendering.ambient_sounds";
pub const SOUND_GAIN: &str = "sound.gain";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for EngineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineValue::Bool(value) => write!(f, "{value}"),
            EngineValue::Integer(value) => write!(f, "{value}"),
            EngineValue::Float(value) => write!(f, "{value}"),
            EngineValue::String(value) => f.write_str(value),
        }
    }
}

impl From<bool> for EngineValue {
    fn from(value: bool) -> Self {
        EngineValue::Bool(value)
    }
}

impl From<i64> for EngineValue {
    fn from(value: i64) -> Self {
        EngineValue::Integer(value)
    }
}

impl From<f64> for EngineValue {
    fn from(value: f64) -> Self {
        EngineValue::Float(value)
    }
}

impl From<&str> for EngineValue {
    fn from(value: &str) -> Self {
        EngineValue::String(value.to_string())
    }
}

impl From<String> for EngineValue {
    fn from(value: String) -> Self {
        EngineValue::String(value)
    }
}

pub fn default_engine_variables() -> BTreeMap<String, EngineValue> {
    BTreeMap::from([
        (MOVIES_ENABLED.to_string(), EngineValue::Bool(true)),
        (AMBIENT_SOUNDS_ENABLED.to_string(), EngineValue::Bool(true)),
        (SOUND_GAIN.to_string(), EngineValue::Float(1.0)),
        (SCRIPT_ERROR_FLAG.to_string(), EngineValue::Bool(false)),
    ])
}

/// Process-wide engine variable store keyed by dotted path. Every call takes
/// the lock once; there is no ordering between distinct variables.
#[derive(Debug, Default)]
pub struct EngineVariables {
    values: Mutex<BTreeMap<String, EngineValue>>,
}

impl EngineVariables {
    pub fn new(initial: BTreeMap<String, EngineValue>) -> Self {
        Self {
            values: Mutex::new(initial),
        }
    }

    pub fn get(&self, path: &str) -> Option<EngineValue> {
        self.lock().get(path).cloned()
    }

    pub fn set(&self, path: impl Into<String>, value: impl Into<EngineValue>) {
        self.lock().insert(path.into(), value.into());
    }

    pub fn get_bool(&self, path: &str) -> bool {
        matches!(self.get(path), Some(EngineValue::Bool(true)))
    }

    pub fn get_u32(&self, path: &str) -> u32 {
        match self.get(path) {
            Some(EngineValue::Integer(value)) => u32::try_from(value).unwrap_or(0),
            _ => 0,
        }
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        match self.get(path)? {
            EngineValue::Float(value) => Some(value),
            EngineValue::Integer(value) => Some(value as f64),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, EngineValue> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, EngineValue>> {
        // a panicking writer cannot leave a half-written value behind
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn typed_accessors_fall_back_on_mismatch() {
        let vars = EngineVariables::new(default_engine_variables());
        assert!(vars.get_bool(MOVIES_ENABLED));
        assert!(!vars.get_bool("missing.flag"));
        vars.set("debug.level", 3i64);
        assert_eq!(vars.get_u32("debug.level"), 3);
        assert_eq!(vars.get_u32(MOVIES_ENABLED), 0);
        vars.set("debug.level", -1i64);
        assert_eq!(vars.get_u32("debug.level"), 0);
    }

    #[test]
    fn write_on_one_thread_reads_back_on_another() {
        let vars = Arc::new(EngineVariables::default());
        let writer = vars.clone();
        thread::spawn(move || writer.set(SOUND_GAIN, 0.5))
            .join()
            .unwrap();
        let reader = vars.clone();
        let gain = thread::spawn(move || reader.get_f64(SOUND_GAIN))
            .join()
            .unwrap();
        assert_eq!(gain, Some(0.5));
    }

    #[test]
    fn concurrent_writers_never_tear_values() {
        let vars = Arc::new(EngineVariables::default());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let vars = vars.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        vars.set("game.flag", format!("writer-{n}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        match vars.get("game.flag") {
            Some(EngineValue::String(value)) => assert!(value.starts_with("writer-")),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn values_deserialize_untagged() {
        let parsed: BTreeMap<String, EngineValue> =
            serde_json::from_str(r#"{"a": true, "b": 2, "c": 0.25, "d": "x"}"#).unwrap();
        assert_eq!(parsed["a"], EngineValue::Bool(true));
        assert_eq!(parsed["b"], EngineValue::Integer(2));
        assert_eq!(parsed["c"], EngineValue::Float(0.25));
        assert_eq!(parsed["d"], EngineValue::String("x".into()));
    }
}
