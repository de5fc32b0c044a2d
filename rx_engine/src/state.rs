use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::stack::SimpleCardDescriptor;

/// Persistable player progress: where they stand and the game variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    #[serde(default)]
    pub location: Option<SimpleCardDescriptor>,
    #[serde(default)]
    pub variables: BTreeMap<String, u16>,
}

impl GameState {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading game state {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing game state {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing game state")?;
        fs::write(path, json).with_context(|| format!("writing game state {}", path.display()))
    }
}

/// Game variables written by `SET_VARIABLE` and read by `BRANCH`.
/// Unset variables read as zero.
#[derive(Debug, Default)]
pub struct GameVariables {
    values: Mutex<BTreeMap<String, u16>>,
}

impl GameVariables {
    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, u16>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> u16 {
        self.lock().get(name).copied().unwrap_or(0)
    }

    pub fn set(&self, name: &str, value: u16) {
        self.lock().insert(name.to_string(), value);
    }

    pub fn snapshot(&self) -> BTreeMap<String, u16> {
        self.lock().clone()
    }

    pub fn replace(&self, values: BTreeMap<String, u16>) {
        *self.lock() = values;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn game_state_survives_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("save.json");
        let state = GameState {
            location: Some(SimpleCardDescriptor::new("bspit", 40)),
            variables: BTreeMap::from([("atemp".to_string(), 2)]),
        };
        state.save(&path).unwrap();
        assert_eq!(GameState::load(&path).unwrap(), state);
    }

    #[test]
    fn older_saves_without_variables_still_load() {
        let state: GameState = serde_json::from_str(r#"{"location": null}"#).unwrap();
        assert_eq!(state, GameState::default());
    }

    #[test]
    fn unset_game_variables_read_zero() {
        let vars = GameVariables::default();
        assert_eq!(vars.get("ttelescope"), 0);
        vars.set("ttelescope", 3);
        assert_eq!(vars.get("ttelescope"), 3);
        vars.replace(BTreeMap::new());
        assert_eq!(vars.get("ttelescope"), 0);
    }
}
