pub mod engine;
pub mod orchestrator;
pub mod sequencer;

use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{TallerError, minigame::PowerLevel};

pub use engine::{Contender, RaceEngine, RandomSource, RngSource, win_probability};
pub use orchestrator::{OrchestratorEvent, OrchestratorPhase, RaceOrchestrator};
pub use sequencer::PhaseSequencer;

/// A registered car. Entries are never changed after submission; the active race and the
/// history keep copies.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarEntry {
    /// Key of the entry in the waiting room. Empty until the store assigns one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    /// PNG data URL of the cut out photo
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<PowerLevel>,
    #[serde(default)]
    pub clicks: u32,
    #[serde(default)]
    pub created_at_ms: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaceStatus {
    Racing,
    PitStop,
}

/// Lane of a car in the active race. P1 is the car that waited longest.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RaceSlot {
    P1,
    P2,
}

impl RaceSlot {
    pub fn index(self) -> usize {
        match self {
            RaceSlot::P1 => 0,
            RaceSlot::P2 => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            RaceSlot::P1 => RaceSlot::P2,
            RaceSlot::P2 => RaceSlot::P1,
        }
    }

    /// Field of the active race marker holding this slot's pit stop boost counter.
    pub fn boost_field(self) -> &'static str {
        match self {
            RaceSlot::P1 => "p1_boost",
            RaceSlot::P2 => "p2_boost",
        }
    }
}

/// Shared marker present only while a race (or its pit stop) is running.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActiveRace {
    pub p1_id: String,
    pub p2_id: String,
    pub p1: CarEntry,
    pub p2: CarEntry,
    pub status: RaceStatus,
    #[serde(default)]
    pub p1_boost: u32,
    #[serde(default)]
    pub p2_boost: u32,
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub score: [u32; 2],
}

impl ActiveRace {
    pub fn new(p1: CarEntry, p2: CarEntry) -> Self {
        Self {
            p1_id: p1.id.clone(),
            p2_id: p2.id.clone(),
            p1,
            p2,
            status: RaceStatus::Racing,
            p1_boost: 0,
            p2_boost: 0,
            round: 1,
            score: [0, 0],
        }
    }

    pub fn slot_of(&self, id: &str) -> Option<RaceSlot> {
        if self.p1_id == id {
            Some(RaceSlot::P1)
        } else if self.p2_id == id {
            Some(RaceSlot::P2)
        } else {
            None
        }
    }

    pub fn boosts(&self) -> [u32; 2] {
        [self.p1_boost, self.p2_boost]
    }

    pub fn from_value(value: Value) -> Result<Self, TallerError> {
        serde_json::from_value(value).map_err(|e| TallerError::StoreDecode {
            path: crate::store::ACTIVE_RACE_PATH.to_string(),
            source: e,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub winner: CarEntry,
    pub loser: CarEntry,
}

/// Turns the waiting room value into its entries, oldest first. Entries that can't be decoded
/// are skipped.
pub fn parse_waiting_room(value: Option<Value>) -> Vec<CarEntry> {
    let Some(Value::Object(entries)) = value else {
        return Vec::new();
    };
    entries
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .filter_map(
            |(key, value)| match serde_json::from_value::<CarEntry>(value) {
                Ok(mut entry) => {
                    entry.id = key;
                    Some(entry)
                }
                Err(e) => {
                    warn!("Skipping malformed waiting room entry {}: {}", key, e);
                    None
                }
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_waiting_room_is_ordered_by_key() {
        let value = json!({
            "-0000000000000000002": {"name": "BETA", "image": "", "clicks": 9},
            "-0000000000000000001": {"name": "ALPHA", "image": "", "clicks": 3},
            "-0000000000000000003": {"name": "GAMMA", "image": "", "level": 2},
        });
        let entries = parse_waiting_room(Some(value));
        let names = entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["ALPHA", "BETA", "GAMMA"]);
        assert_eq!(entries[0].id, "-0000000000000000001");
        assert_eq!(entries[2].level, Some(PowerLevel::Two));
        assert_eq!(entries[2].clicks, 0);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let value = json!({
            "-1": {"name": "OK", "image": ""},
            "-2": "garbage",
        });
        assert_eq!(parse_waiting_room(Some(value)).len(), 1);
        assert!(parse_waiting_room(None).is_empty());
    }

    #[test]
    fn test_marker_round_trips_through_store_format() {
        let car = |id: &str| CarEntry {
            id: id.to_string(),
            name: id.to_uppercase(),
            image: String::new(),
            level: None,
            clicks: 1,
            created_at_ms: 0,
        };
        let marker = ActiveRace::new(car("a"), car("b"));
        let value = serde_json::to_value(&marker).unwrap();
        assert_eq!(value["status"], json!("RACING"));
        assert_eq!(value["p1_id"], json!("a"));
        assert_eq!(ActiveRace::from_value(value).unwrap(), marker);
        assert_eq!(marker.slot_of("b"), Some(RaceSlot::P2));
        assert_eq!(marker.slot_of("c"), None);
    }
}
