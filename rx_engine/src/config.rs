use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::events::DEFAULT_EVENT_LOG_CAPACITY;
use crate::geometry::Size;
use crate::stack::SimpleCardDescriptor;
use crate::variables::{default_engine_variables, EngineValue};

pub const CORE_VIEWPORT: Size = Size::new(608.0, 392.0);
pub const INVENTORY_MARGIN: f32 = 80.0;

/// Engine tuning loaded from an optional JSON file; every field defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub core_viewport: Size,
    pub inventory_margin: f32,
    pub viewport: Size,
    pub transition_ms: u64,
    pub animation_interval_ms: u64,
    pub variables: BTreeMap<String, EngineValue>,
    pub preload: Vec<String>,
    pub start: Option<SimpleCardDescriptor>,
    pub event_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            core_viewport: CORE_VIEWPORT,
            inventory_margin: INVENTORY_MARGIN,
            viewport: Size::new(CORE_VIEWPORT.width, CORE_VIEWPORT.height + INVENTORY_MARGIN),
            transition_ms: 500,
            animation_interval_ms: 50,
            variables: BTreeMap::new(),
            preload: Vec::new(),
            start: None,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse engine config: {}", path.display()))
    }

    pub fn transition_duration(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }

    pub fn animation_interval(&self) -> Duration {
        Duration::from_millis(self.animation_interval_ms.max(1))
    }

    /// Built-in engine variables overlaid with the configured ones.
    pub fn initial_variables(&self) -> BTreeMap<String, EngineValue> {
        let mut values = default_engine_variables();
        values.extend(
            self.variables
                .iter()
                .map(|(path, value)| (path.clone(), value.clone())),
        );
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{MOVIES_ENABLED, SOUND_GAIN};
    use tempfile::tempdir;

    #[test]
    fn missing_path_yields_defaults() {
        let config = EngineConfig::from_json_file(None).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.transition_duration(), Duration::from_millis(500));
        assert_eq!(config.viewport, Size::new(608.0, 472.0));
    }

    #[test]
    fn partial_file_overrides_selected_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{
                "transition_ms": 120,
                "variables": {"sound.gain": 0.25, "rendering.movies": false},
                "start": {"stack": "aspit", "id": 1}
            }"#,
        )
        .unwrap();
        let config = EngineConfig::from_json_file(Some(&path)).unwrap();
        assert_eq!(config.transition_ms, 120);
        assert_eq!(config.animation_interval_ms, 50);
        assert_eq!(config.event_log_capacity, DEFAULT_EVENT_LOG_CAPACITY);
        assert_eq!(config.start, Some(SimpleCardDescriptor::new("aspit", 1)));

        let values = config.initial_variables();
        assert_eq!(values[SOUND_GAIN], EngineValue::Float(0.25));
        assert_eq!(values[MOVIES_ENABLED], EngineValue::Bool(false));
        assert!(values.contains_key("rendering.ambient_sounds"));
    }

    #[test]
    fn unreadable_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = EngineConfig::from_json_file(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("absent.json"));
    }
}
