use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::LevelThresholds;

/// Discrete engine level derived from the minigame score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PowerLevel {
    One,
    Two,
    Three,
}

impl PowerLevel {
    pub fn from_clicks(clicks: u32, thresholds: &LevelThresholds) -> Self {
        if clicks < thresholds.level_two {
            PowerLevel::One
        } else if clicks < thresholds.level_three {
            PowerLevel::Two
        } else {
            PowerLevel::Three
        }
    }
}

impl From<PowerLevel> for u8 {
    fn from(level: PowerLevel) -> Self {
        match level {
            PowerLevel::One => 1,
            PowerLevel::Two => 2,
            PowerLevel::Three => 3,
        }
    }
}

impl TryFrom<u8> for PowerLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PowerLevel::One),
            2 => Ok(PowerLevel::Two),
            3 => Ok(PowerLevel::Three),
            other => Err(format!("invalid power level {}", other)),
        }
    }
}

impl fmt::Display for PowerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinigameState {
    Idle,
    Active { remaining_s: u32, taps: u32 },
    Finished { taps: u32 },
}

/// Fixed-duration tap counter producing the car's power score.
///
/// The owner drives the clock by calling [`PowerMinigame::tick_second`] once per elapsed second
/// while the game is active; taps are counted independently of the clock.
#[derive(Debug)]
pub struct PowerMinigame {
    state: MinigameState,
    duration_s: u32,
}

impl PowerMinigame {
    pub fn new(duration_s: u32) -> Self {
        Self {
            state: MinigameState::Idle,
            duration_s,
        }
    }

    pub fn state(&self) -> MinigameState {
        self.state
    }

    pub fn duration_s(&self) -> u32 {
        self.duration_s
    }

    /// Starts the countdown. Only one attempt is allowed until [`PowerMinigame::reset`] is
    /// called, so this returns false unless the game is idle.
    pub fn start(&mut self) -> bool {
        if self.state != MinigameState::Idle {
            return false;
        }
        self.state = MinigameState::Active {
            remaining_s: self.duration_s,
            taps: 0,
        };
        true
    }

    /// Counts one tap. Taps outside the active window are ignored.
    pub fn tap(&mut self) -> bool {
        if let MinigameState::Active { taps, .. } = &mut self.state {
            *taps += 1;
            true
        } else {
            false
        }
    }

    /// Advances the countdown by one second and returns the frozen score once time is up.
    pub fn tick_second(&mut self) -> Option<u32> {
        if let MinigameState::Active { remaining_s, taps } = self.state {
            let remaining_s = remaining_s.saturating_sub(1);
            if remaining_s == 0 {
                self.state = MinigameState::Finished { taps };
                return Some(taps);
            }
            self.state = MinigameState::Active { remaining_s, taps };
        }
        None
    }

    pub fn result(&self) -> Option<u32> {
        match self.state {
            MinigameState::Finished { taps } => Some(taps),
            _ => None,
        }
    }

    /// Discards any score and returns to idle.
    pub fn reset(&mut self) {
        self.state = MinigameState::Idle;
    }
}
