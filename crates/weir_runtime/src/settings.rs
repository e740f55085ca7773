//! Runtime settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub ticks: u64,
    pub spawn_per_tick: u32,
    pub starting_hp: i32,
    pub damage_per_tick: i32,
    /// Clear the wreck group every this many ticks. Zero disables sweeping.
    pub wreck_sweep_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            simulation: SimulationSettings::default(),
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            ticks: 60,
            spawn_per_tick: 8,
            starting_hp: 30,
            damage_per_tick: 10,
            wreck_sweep_interval: 10,
        }
    }
}

impl Settings {
    /// Read settings from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading settings from {}", path.display()))
            }
        };
        serde_json::from_str(&text)
            .with_context(|| format!("parsing settings from {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(Path::new("definitely-not-here.json")).unwrap();
        assert_eq!(settings.simulation.ticks, 60);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"simulation": {"ticks": 5}}"#).unwrap();
        assert_eq!(settings.simulation.ticks, 5);
        assert_eq!(settings.simulation.spawn_per_tick, 8);
    }
}
