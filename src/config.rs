use std::{fs::File, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::TallerError;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_DIR_NAME: &str = "taller";

/// How the predetermined winner of a round is drawn.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum OutcomePolicy {
    /// Win probability proportional to each car's clicks, plus an optional additive luck floor
    /// for car A.
    Weighted { luck_floor: f64 },
    /// The higher level car wins with `favourite_odds`, equal levels flip a coin.
    Level { favourite_odds: f64 },
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        OutcomePolicy::Weighted { luck_floor: 0. }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum SeriesFormat {
    SingleRace,
    /// Race until one side collects `wins_needed` rounds, with a pit stop between rounds.
    BestOf { wins_needed: u32 },
}

impl SeriesFormat {
    pub fn wins_needed(&self) -> u32 {
        match self {
            SeriesFormat::SingleRace => 1,
            SeriesFormat::BestOf { wins_needed } => *wins_needed,
        }
    }
}

/// Click thresholds used to bucket a minigame score into a [`crate::PowerLevel`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LevelThresholds {
    /// Scores below this are level 1
    pub level_two: u32,
    /// Scores below this (and at least `level_two`) are level 2, the rest level 3
    pub level_three: u32,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            level_two: 15,
            level_three: 30,
        }
    }
}

/// Speed model for the animated race. Units are track units per frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SpeedModel {
    pub min_speed: f64,
    pub speed_per_click: f64,
    /// Clicks above this do not make the car any faster
    pub max_counted_clicks: u32,
    pub winner_boost: f64,
}

impl Default for SpeedModel {
    fn default() -> Self {
        // the boost is larger than the whole click-driven spread so the predetermined winner
        // is always the faster car
        Self {
            min_speed: 0.3,
            speed_per_click: 0.002,
            max_counted_clicks: 100,
            winner_boost: 0.25,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub countdown_labels: Vec<String>,
    pub countdown_step_ms: u64,
    pub finish_line: f64,
    pub result_dwell_ms: u64,
    pub series_result_dwell_ms: u64,
    pub pit_stop_ms: u64,
    pub release_debounce_ms: u64,
    pub history_limit: usize,
    pub outcome_policy: OutcomePolicy,
    pub series_format: SeriesFormat,
    pub speed_model: SpeedModel,
    pub level_thresholds: LevelThresholds,
    pub minigame_duration_s: u32,
    pub default_tolerance: u32,
    pub undo_depth: usize,
    pub max_name_len: usize,
    pub image_height_px: u32,
    pub image_max_width_px: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            countdown_labels: ["3", "2", "1", "GO!"].iter().map(|s| s.to_string()).collect(),
            countdown_step_ms: 1000,
            finish_line: 85.,
            result_dwell_ms: 6000,
            series_result_dwell_ms: 8000,
            pit_stop_ms: 5000,
            release_debounce_ms: 3000,
            history_limit: 5,
            outcome_policy: OutcomePolicy::default(),
            series_format: SeriesFormat::SingleRace,
            speed_model: SpeedModel::default(),
            level_thresholds: LevelThresholds::default(),
            minigame_duration_s: 5,
            default_tolerance: 30,
            undo_depth: 5,
            max_name_len: 12,
            image_height_px: 158,
            image_max_width_px: 400,
        }
    }
}

impl GameConfig {
    pub fn countdown_step(&self) -> Duration {
        Duration::from_millis(self.countdown_step_ms)
    }

    pub fn result_dwell(&self) -> Duration {
        Duration::from_millis(self.result_dwell_ms)
    }

    pub fn series_result_dwell(&self) -> Duration {
        Duration::from_millis(self.series_result_dwell_ms)
    }

    pub fn pit_stop(&self) -> Duration {
        Duration::from_millis(self.pit_stop_ms)
    }

    pub fn release_debounce(&self) -> Duration {
        Duration::from_millis(self.release_debounce_ms)
    }

    pub fn from_local_file() -> Option<Self> {
        let config_path = dirs::config_dir()?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME);

        if config_path.exists() {
            match Self::from_path(&config_path) {
                Ok(config) => Some(config),
                Err(e) => {
                    log::warn!("Ignoring unreadable config file {:?}: {}", config_path, e);
                    None
                }
            }
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, TallerError> {
        let file = File::open(path).map_err(|e| TallerError::ConfigIOError { source: e })?;
        serde_json::from_reader(file).map_err(|e| TallerError::ConfigSerializeError { source: e })
    }

    pub fn save(&self) -> Result<(), TallerError> {
        let config_path = dirs::config_dir()
            .ok_or(TallerError::NoConfigDir)?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME);
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), TallerError> {
        if let Some(parent) = config_path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| TallerError::ConfigIOError { source: e })?;
        }

        let file =
            File::create(config_path).map_err(|e| TallerError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| TallerError::ConfigSerializeError { source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_countdown_sequence() {
        let config = GameConfig::default();
        assert_eq!(config.countdown_labels, vec!["3", "2", "1", "GO!"]);
        assert_eq!(config.countdown_step(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_winner_boost_covers_click_spread() {
        let model = SpeedModel::default();
        let spread = model.speed_per_click * model.max_counted_clicks as f64;
        assert!(model.winner_boost > spread);
    }

    #[test]
    fn test_save_and_reload_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = GameConfig {
            finish_line: 90.,
            series_format: SeriesFormat::BestOf { wins_needed: 2 },
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = GameConfig::from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = GameConfig::from_path(&temp_dir.path().join("missing.json"));
        assert!(matches!(result, Err(TallerError::ConfigIOError { .. })));
    }
}
