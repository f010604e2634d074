use log::debug;
use rand::Rng;

use super::RaceSlot;
use crate::{
    config::{GameConfig, OutcomePolicy},
    minigame::PowerLevel,
};

/// A trait for the source of uniform random numbers used to draw race outcomes.
pub trait RandomSource {
    /// A value in `[0, 1)`.
    fn next_f64(&mut self) -> f64;
}

/// [`RandomSource`] backed by any [`rand::Rng`].
pub struct RngSource<R: Rng>(pub R);

impl<R: Rng> RandomSource for RngSource<R> {
    fn next_f64(&mut self) -> f64 {
        self.0.r#gen::<f64>()
    }
}

/// Probability that car A wins under the weighted policy.
///
/// Proportional to A's share of the combined clicks, plus `luck_floor`, clamped to `[0, 1]`.
/// Two cars that never tapped have equal odds.
pub fn win_probability(clicks_a: u32, clicks_b: u32, luck_floor: f64) -> f64 {
    let total = clicks_a as f64 + clicks_b as f64;
    let share = if total == 0. {
        0.5
    } else {
        clicks_a as f64 / total.max(1.)
    };
    (share + luck_floor).clamp(0., 1.)
}

/// Probability that car A wins when outcomes are decided by power level alone.
pub fn level_win_probability(level_a: PowerLevel, level_b: PowerLevel, favourite_odds: f64) -> f64 {
    match level_a.cmp(&level_b) {
        std::cmp::Ordering::Greater => favourite_odds,
        std::cmp::Ordering::Less => 1. - favourite_odds,
        std::cmp::Ordering::Equal => 0.5,
    }
}

/// One car as seen by the engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contender {
    pub clicks: u32,
    pub level: PowerLevel,
}

/// Per-frame simulation of a single round.
///
/// The winner is drawn once up front and given a speed boost; the finish is still decided by
/// comparing positions, so the animation and the declared result can never disagree.
#[derive(Debug, Clone)]
pub struct RaceEngine {
    positions: [f64; 2],
    speeds: [f64; 2],
    favourite: RaceSlot,
    finish_line: f64,
    winner: Option<RaceSlot>,
    frames: u32,
}

impl RaceEngine {
    pub fn new(
        contenders: [Contender; 2],
        config: &GameConfig,
        random: &mut dyn RandomSource,
    ) -> Self {
        let [a, b] = contenders;
        let p_a = match config.outcome_policy {
            OutcomePolicy::Weighted { luck_floor } => {
                win_probability(a.clicks, b.clicks, luck_floor)
            }
            OutcomePolicy::Level { favourite_odds } => {
                level_win_probability(a.level, b.level, favourite_odds)
            }
        };
        let draw = random.next_f64();
        let favourite = if draw < p_a {
            RaceSlot::P1
        } else {
            RaceSlot::P2
        };
        debug!(
            "Drew {:.3} against p(A)={:.3}, favourite is {:?}",
            draw, p_a, favourite
        );

        let model = &config.speed_model;
        let mut speeds = contenders.map(|c| {
            model.min_speed + c.clicks.min(model.max_counted_clicks) as f64 * model.speed_per_click
        });
        speeds[favourite.index()] += model.winner_boost;

        Self {
            positions: [0., 0.],
            speeds,
            favourite,
            finish_line: config.finish_line,
            winner: None,
            frames: 0,
        }
    }

    pub fn favourite(&self) -> RaceSlot {
        self.favourite
    }

    pub fn positions(&self) -> [f64; 2] {
        self.positions
    }

    pub fn speeds(&self) -> [f64; 2] {
        self.speeds
    }

    pub fn winner(&self) -> Option<RaceSlot> {
        self.winner
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Advances both cars by one frame. Returns the winner on the frame either car reaches the
    /// finish line; later calls do nothing and keep returning it.
    pub fn tick(&mut self) -> Option<RaceSlot> {
        if self.winner.is_some() {
            return self.winner;
        }
        self.frames += 1;
        for (position, speed) in self.positions.iter_mut().zip(self.speeds) {
            *position += speed;
        }
        let [p1, p2] = self.positions;
        if p1 >= self.finish_line || p2 >= self.finish_line {
            // ties go to P2
            self.winner = Some(if p1 > p2 { RaceSlot::P1 } else { RaceSlot::P2 });
        }
        self.winner
    }

    /// Runs the round to completion and returns the winner.
    pub fn run_to_finish(&mut self) -> RaceSlot {
        loop {
            if let Some(winner) = self.tick() {
                return winner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    struct FixedRandom(f64);

    impl RandomSource for FixedRandom {
        fn next_f64(&mut self) -> f64 {
            self.0
        }
    }

    fn contender(clicks: u32) -> Contender {
        Contender {
            clicks,
            level: PowerLevel::from_clicks(clicks, &Default::default()),
        }
    }

    #[test]
    fn test_probability_is_click_share() {
        assert!((win_probability(80, 20, 0.) - 0.8).abs() < 1e-9);
        assert!((win_probability(0, 10, 0.)).abs() < 1e-9);
        assert!((win_probability(0, 0, 0.) - 0.5).abs() < 1e-9);
        assert!((win_probability(9, 1, 0.3) - 1.).abs() < 1e-9);
        assert!((win_probability(1, 9, -0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_level_policy_odds() {
        assert_eq!(
            level_win_probability(PowerLevel::Three, PowerLevel::One, 0.9),
            0.9
        );
        assert!((level_win_probability(PowerLevel::One, PowerLevel::Two, 0.9) - 0.1).abs() < 1e-9);
        assert_eq!(
            level_win_probability(PowerLevel::Two, PowerLevel::Two, 0.9),
            0.5
        );
    }

    #[test]
    fn test_low_draw_favours_heavier_tapper() {
        let config = GameConfig::default();
        let mut engine = RaceEngine::new(
            [contender(80), contender(20)],
            &config,
            &mut FixedRandom(0.05),
        );
        assert_eq!(engine.favourite(), RaceSlot::P1);
        assert_eq!(engine.run_to_finish(), RaceSlot::P1);
    }

    #[test]
    fn test_high_draw_lets_underdog_win() {
        let config = GameConfig::default();
        let mut engine = RaceEngine::new(
            [contender(80), contender(20)],
            &config,
            &mut FixedRandom(0.95),
        );
        assert_eq!(engine.run_to_finish(), RaceSlot::P2);
        let [p1, p2] = engine.positions();
        assert!(p2 >= config.finish_line);
        assert!(p2 > p1);
    }

    #[test]
    fn test_tick_stops_after_finish() {
        let config = GameConfig::default();
        let mut engine =
            RaceEngine::new([contender(0), contender(0)], &config, &mut FixedRandom(0.));
        let winner = engine.run_to_finish();
        let frames = engine.frames();
        let positions = engine.positions();
        assert_eq!(engine.tick(), Some(winner));
        assert_eq!(engine.frames(), frames);
        assert_eq!(engine.positions(), positions);
    }

    #[test]
    fn test_level_policy_ignores_clicks() {
        let config = GameConfig {
            outcome_policy: OutcomePolicy::Level {
                favourite_odds: 0.9,
            },
            ..Default::default()
        };
        let a = Contender {
            clicks: 0,
            level: PowerLevel::Three,
        };
        let b = Contender {
            clicks: 90,
            level: PowerLevel::One,
        };
        let mut engine = RaceEngine::new([a, b], &config, &mut FixedRandom(0.85));
        assert_eq!(engine.run_to_finish(), RaceSlot::P1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_declared_winner_is_the_car_ahead(
            clicks_a in 0u32..200,
            clicks_b in 0u32..200,
            seed in any::<u64>(),
        ) {
            let config = GameConfig::default();
            let mut random = RngSource(StdRng::seed_from_u64(seed));
            let mut engine = RaceEngine::new(
                [contender(clicks_a), contender(clicks_b)],
                &config,
                &mut random,
            );
            let winner = engine.run_to_finish();
            let positions = engine.positions();
            prop_assert_eq!(winner, engine.favourite());
            prop_assert!(positions[winner.index()] > positions[winner.other().index()]);
            prop_assert!(positions[winner.index()] >= config.finish_line);
        }

        #[test]
        fn prop_probability_stays_in_unit_range(
            clicks_a in any::<u32>(),
            clicks_b in any::<u32>(),
            luck in -2.0f64..2.0,
        ) {
            let p = win_probability(clicks_a, clicks_b, luck);
            prop_assert!((0. ..=1.).contains(&p));
        }
    }
}
