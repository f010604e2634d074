use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{TallerError, config::LevelThresholds, minigame::PowerLevel};

/// One participant of a simulated party, as read from a JSON Lines scenario file.
///
/// ```json
/// {"name": "alpha", "clicks": 10, "image": "photos/alpha.jpg"}
/// {"name": "beta", "level": 3, "boost_taps": 12}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub name: String,
    #[serde(default)]
    pub clicks: Option<u32>,
    #[serde(default)]
    pub level: Option<PowerLevel>,
    /// Photo to upload. A plain generated car is used when absent.
    #[serde(default)]
    pub image: Option<PathBuf>,
    /// Taps sent during each pit stop
    #[serde(default)]
    pub boost_taps: u32,
}

impl ScenarioEntry {
    /// Minigame taps to play. Explicit clicks win; a level maps to the lowest score of that level.
    pub fn taps(&self, thresholds: &LevelThresholds) -> u32 {
        match (self.clicks, self.level) {
            (Some(clicks), _) => clicks,
            (None, Some(PowerLevel::One)) | (None, None) => 0,
            (None, Some(PowerLevel::Two)) => thresholds.level_two,
            (None, Some(PowerLevel::Three)) => thresholds.level_three,
        }
    }
}

pub fn load_scenario(source_file: &Path) -> Result<Vec<ScenarioEntry>, TallerError> {
    let entries = serde_jsonlines::json_lines(source_file)
        .map_err(|e| TallerError::ScenarioLoaderError { source: e })?
        .collect::<Result<Vec<ScenarioEntry>, std::io::Error>>()
        .map_err(|e| TallerError::ScenarioLoaderError { source: e })?;
    info!(
        "Loaded {} participants from {:?}",
        entries.len(),
        source_file
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_scenario_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"name": "alpha", "clicks": 10}}"#).unwrap();
        writeln!(file, r#"{{"name": "beta", "level": 3, "boost_taps": 4}}"#).unwrap();

        let entries = load_scenario(file.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "alpha");
        assert_eq!(entries[0].image, None);
        assert_eq!(entries[1].level, Some(PowerLevel::Three));
        assert_eq!(entries[1].boost_taps, 4);
    }

    #[test]
    fn test_taps_from_clicks_or_level() {
        let thresholds = LevelThresholds::default();
        let entry = |clicks, level| ScenarioEntry {
            name: "x".to_string(),
            clicks,
            level,
            image: None,
            boost_taps: 0,
        };
        assert_eq!(entry(Some(7), Some(PowerLevel::Three)).taps(&thresholds), 7);
        assert_eq!(entry(None, Some(PowerLevel::Two)).taps(&thresholds), 15);
        assert_eq!(entry(None, Some(PowerLevel::Three)).taps(&thresholds), 30);
        assert_eq!(entry(None, None).taps(&thresholds), 0);
    }

    #[test]
    fn test_bad_scenario_line_is_loader_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"clicks": 10}}"#).unwrap();
        assert!(matches!(
            load_scenario(file.path()),
            Err(TallerError::ScenarioLoaderError { .. })
        ));
    }
}
