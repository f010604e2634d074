use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use super::{
    ActiveRace, CarEntry, HistoryEntry, RaceSlot, RaceStatus,
    engine::{Contender, RaceEngine, RandomSource},
    parse_waiting_room,
    sequencer::PhaseSequencer,
};
use crate::{
    TallerError,
    config::GameConfig,
    minigame::PowerLevel,
    store::{
        ACTIVE_RACE_PATH, HISTORY_PATH, SharedStore, Subscription, WAITING_ROOM_PATH, child_path,
    },
};

/// What the track display is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrchestratorPhase {
    Lobby,
    /// Index into the configured countdown labels
    Countdown { step: usize },
    Racing,
    /// A round that did not decide the series
    RoundResult { winner: RaceSlot },
    PitStop,
    /// The race (or series) is decided and the winner is on screen
    Result { winner: RaceSlot },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    CountdownStep,
    RoundResultEnd,
    PitStopEnd,
    ResultEnd,
}

/// Discrete things that happened during a [`RaceOrchestrator::tick`], in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Paired { p1: String, p2: String },
    Countdown { label: String },
    RoundStarted { round: u32, boosts: [u32; 2] },
    Positions { p1: f64, p2: f64 },
    RoundWon { round: u32, winner: String, score: [u32; 2] },
    PitStopOpened { round: u32 },
    PitStopClosed { boosts: [u32; 2] },
    RaceWon { winner: String, loser: String },
    Released,
}

/// What the lobby screen shows while no race is running.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyView<'a> {
    /// The oldest waiting car
    pub ready_to_race: Option<&'a CarEntry>,
    /// True while only one car is waiting
    pub waiting_for_rival: bool,
    pub queued: usize,
    pub recent_results: &'a [HistoryEntry],
}

struct Matchup {
    marker: ActiveRace,
    engine: Option<RaceEngine>,
}

impl Matchup {
    fn car(&self, slot: RaceSlot) -> &CarEntry {
        match slot {
            RaceSlot::P1 => &self.marker.p1,
            RaceSlot::P2 => &self.marker.p2,
        }
    }
}

/// `RaceOrchestrator` runs the track display: it pairs waiting cars, animates the race and
/// records the result.
///
/// # Fields
///
/// * `store` - Shared store holding the waiting room, the active race marker and the history.
/// * `random` - Source for the outcome draw of every round.
/// * `sequencer` - The single pending timer of the current phase.
/// * `matchup` - The pair being raced, present from pairing until the marker is cleared.
///
/// # Methods
///
/// * `new` - Subscribes to the store and loads recent history.
/// * `tick` - Advances the state machine. Timed phases use `dt`; while racing each call is one
///   animation frame.
///
/// The orchestrator assumes it is the only one running against the store. Two displays
/// watching the same waiting room can claim the same pair.
pub struct RaceOrchestrator<S: SharedStore, R: RandomSource> {
    store: S,
    random: R,
    config: GameConfig,
    waiting_room: Subscription,
    marker_updates: Subscription,
    waiting: Vec<CarEntry>,
    waiting_changed: bool,
    marker_present: bool,
    phase: OrchestratorPhase,
    sequencer: PhaseSequencer<Timer>,
    matchup: Option<Matchup>,
    history: Vec<HistoryEntry>,
}

impl<S: SharedStore, R: RandomSource> RaceOrchestrator<S, R> {
    pub fn new(store: S, random: R, config: GameConfig) -> Result<Self, TallerError> {
        let waiting_room = store.subscribe(WAITING_ROOM_PATH)?;
        let marker_updates = store.subscribe(ACTIVE_RACE_PATH)?;
        let mut orchestrator = Self {
            store,
            random,
            config,
            waiting_room,
            marker_updates,
            waiting: Vec::new(),
            waiting_changed: false,
            marker_present: false,
            phase: OrchestratorPhase::Lobby,
            sequencer: PhaseSequencer::new(),
            matchup: None,
            history: Vec::new(),
        };
        orchestrator.refresh_history();
        Ok(orchestrator)
    }

    pub fn phase(&self) -> OrchestratorPhase {
        self.phase
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Cars in the waiting room, oldest first.
    pub fn waiting(&self) -> &[CarEntry] {
        &self.waiting
    }

    /// Most recent results, oldest first.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn active_race(&self) -> Option<&ActiveRace> {
        self.matchup.as_ref().map(|m| &m.marker)
    }

    pub fn positions(&self) -> Option<[f64; 2]> {
        self.matchup.as_ref()?.engine.as_ref().map(|e| e.positions())
    }

    pub fn countdown_label(&self) -> Option<&str> {
        match self.phase {
            OrchestratorPhase::Countdown { step } => {
                self.config.countdown_labels.get(step).map(|s| s.as_str())
            }
            _ => None,
        }
    }

    pub fn lobby_view(&self) -> LobbyView<'_> {
        LobbyView {
            ready_to_race: self.waiting.first(),
            waiting_for_rival: self.waiting.len() == 1,
            queued: self.waiting.len(),
            recent_results: &self.history,
        }
    }

    pub fn tick(&mut self, dt: Duration) -> Result<Vec<OrchestratorEvent>, TallerError> {
        self.sync_waiting_room()?;
        self.sync_marker()?;

        let mut events = Vec::new();
        match self.phase {
            OrchestratorPhase::Lobby => {
                if self.waiting_changed {
                    self.waiting_changed = false;
                    if self.waiting.len() >= 2 && !self.marker_present {
                        self.start_matchup(&mut events)?;
                    }
                }
            }
            OrchestratorPhase::Racing => self.race_frame(&mut events),
            _ => {
                if let Some(timer) = self.sequencer.advance(dt) {
                    self.on_timer(timer, &mut events);
                }
            }
        }
        Ok(events)
    }

    fn sync_waiting_room(&mut self) -> Result<(), TallerError> {
        if let Some(value) = self.waiting_room.latest()? {
            self.waiting = parse_waiting_room(value);
            self.waiting_changed = true;
            debug!("{} cars waiting", self.waiting.len());
        }
        Ok(())
    }

    fn sync_marker(&mut self) -> Result<(), TallerError> {
        let Some(value) = self.marker_updates.latest()? else {
            return Ok(());
        };
        let Some(value) = value else {
            self.marker_present = false;
            // a marker removed while in the lobby can unblock a pairing
            self.waiting_changed = true;
            return Ok(());
        };
        let remote = match ActiveRace::from_value(value) {
            Ok(remote) => remote,
            Err(e) if self.matchup.is_none() => {
                // late boost writes can recreate a partial record after release
                warn!("Clearing leftover active race record: {}", e);
                if let Err(e) = self.store.remove(ACTIVE_RACE_PATH) {
                    error!("Could not clear the leftover active race record: {}", e);
                }
                self.marker_present = false;
                self.waiting_changed = true;
                return Ok(());
            }
            Err(e) => {
                warn!("Ignoring unreadable active race marker: {}", e);
                return Ok(());
            }
        };
        self.marker_present = true;
        if self.phase != OrchestratorPhase::PitStop {
            return Ok(());
        }
        let Some(matchup) = self.matchup.as_mut() else {
            return Ok(());
        };
        if remote.p1_id == matchup.marker.p1_id {
            matchup.marker.p1_boost = remote.p1_boost;
            matchup.marker.p2_boost = remote.p2_boost;
        } else {
            warn!("Active race marker was replaced by another writer");
        }
        Ok(())
    }

    fn write_marker(&self, marker: &ActiveRace) -> Result<(), TallerError> {
        let value = serde_json::to_value(marker).map_err(|e| TallerError::StoreDecode {
            path: ACTIVE_RACE_PATH.to_string(),
            source: e,
        })?;
        self.store.set(ACTIVE_RACE_PATH, value)
    }

    fn start_matchup(&mut self, events: &mut Vec<OrchestratorEvent>) -> Result<(), TallerError> {
        let marker = ActiveRace::new(self.waiting[0].clone(), self.waiting[1].clone());
        // the pair is only claimed once both entries are gone and the marker is written
        let claimed = self.take_from_waiting_room(&marker).and_then(|()| {
            self.write_marker(&marker).inspect_err(|_| {
                self.restore_to_waiting_room(&marker.p1);
                self.restore_to_waiting_room(&marker.p2);
            })
        });
        if let Err(e) = claimed {
            warn!(
                "Could not claim {} and {}, retrying: {}",
                marker.p1.name, marker.p2.name, e
            );
            self.waiting_changed = true;
            return Err(e);
        }
        self.marker_present = true;
        self.waiting
            .retain(|car| car.id != marker.p1_id && car.id != marker.p2_id);

        info!("Pairing {} against {}", marker.p1.name, marker.p2.name);
        events.push(OrchestratorEvent::Paired {
            p1: marker.p1.name.clone(),
            p2: marker.p2.name.clone(),
        });
        self.matchup = Some(Matchup {
            marker,
            engine: None,
        });
        self.begin_countdown(events);
        Ok(())
    }

    /// Removes both cars of `marker` from the waiting room. If the second removal fails the
    /// first car is put back, so either both entries are consumed or neither is.
    fn take_from_waiting_room(&self, marker: &ActiveRace) -> Result<(), TallerError> {
        self.store
            .remove(&child_path(WAITING_ROOM_PATH, &marker.p1_id))?;
        if let Err(e) = self
            .store
            .remove(&child_path(WAITING_ROOM_PATH, &marker.p2_id))
        {
            self.restore_to_waiting_room(&marker.p1);
            return Err(e);
        }
        Ok(())
    }

    fn restore_to_waiting_room(&self, car: &CarEntry) {
        let path = child_path(WAITING_ROOM_PATH, &car.id);
        let restored = serde_json::to_value(car)
            .map_err(|e| TallerError::StoreDecode {
                path: path.clone(),
                source: e,
            })
            .and_then(|value| self.store.set(&path, value));
        if let Err(e) = restored {
            error!("Could not put {} back in the waiting room: {}", car.name, e);
        }
    }

    fn begin_countdown(&mut self, events: &mut Vec<OrchestratorEvent>) {
        self.show_countdown_step(0, events);
    }

    fn show_countdown_step(&mut self, step: usize, events: &mut Vec<OrchestratorEvent>) {
        match self.config.countdown_labels.get(step) {
            Some(label) => {
                events.push(OrchestratorEvent::Countdown {
                    label: label.clone(),
                });
                self.phase = OrchestratorPhase::Countdown { step };
                self.sequencer
                    .schedule(Timer::CountdownStep, self.config.countdown_step());
            }
            None => self.start_round(events),
        }
    }

    fn start_round(&mut self, events: &mut Vec<OrchestratorEvent>) {
        let Some(matchup) = self.matchup.as_mut() else {
            self.phase = OrchestratorPhase::Lobby;
            return;
        };
        let boosts = matchup.marker.boosts();
        let thresholds = self.config.level_thresholds;
        let contender = |car: &CarEntry, boost: u32| Contender {
            clicks: car.clicks.saturating_add(boost),
            level: car
                .level
                .unwrap_or_else(|| PowerLevel::from_clicks(car.clicks, &thresholds)),
        };
        let contenders = [
            contender(&matchup.marker.p1, boosts[0]),
            contender(&matchup.marker.p2, boosts[1]),
        ];
        let engine = RaceEngine::new(contenders, &self.config, &mut self.random);
        debug!(
            "Round {} speeds {:?}, favourite {:?}",
            matchup.marker.round,
            engine.speeds(),
            engine.favourite()
        );
        matchup.engine = Some(engine);
        events.push(OrchestratorEvent::RoundStarted {
            round: matchup.marker.round,
            boosts,
        });
        self.phase = OrchestratorPhase::Racing;
    }

    fn race_frame(&mut self, events: &mut Vec<OrchestratorEvent>) {
        let Some(engine) = self.matchup.as_mut().and_then(|m| m.engine.as_mut()) else {
            warn!("Racing without an engine, returning to the lobby");
            self.phase = OrchestratorPhase::Lobby;
            return;
        };
        let finished = engine.tick();
        let [p1, p2] = engine.positions();
        events.push(OrchestratorEvent::Positions { p1, p2 });
        if let Some(winner) = finished {
            self.finish_round(winner, events);
        }
    }

    fn finish_round(&mut self, winner: RaceSlot, events: &mut Vec<OrchestratorEvent>) {
        let wins_needed = self.config.series_format.wins_needed();
        let Some(matchup) = self.matchup.as_mut() else {
            return;
        };
        matchup.marker.score[winner.index()] += 1;
        let round = matchup.marker.round;
        let score = matchup.marker.score;
        let winner_car = matchup.car(winner).clone();
        let loser_car = matchup.car(winner.other()).clone();
        info!("{} wins round {} ({:?})", winner_car.name, round, score);
        events.push(OrchestratorEvent::RoundWon {
            round,
            winner: winner_car.name.clone(),
            score,
        });

        if score[winner.index()] < wins_needed {
            self.phase = OrchestratorPhase::RoundResult { winner };
            self.sequencer
                .schedule(Timer::RoundResultEnd, self.config.result_dwell());
            return;
        }

        events.push(OrchestratorEvent::RaceWon {
            winner: winner_car.name.clone(),
            loser: loser_car.name.clone(),
        });
        self.record_result(HistoryEntry {
            winner: winner_car,
            loser: loser_car,
        });
        let dwell = if wins_needed > 1 {
            self.config.series_result_dwell()
        } else {
            self.config.result_dwell()
        };
        self.phase = OrchestratorPhase::Result { winner };
        self.sequencer.schedule(Timer::ResultEnd, dwell);
    }

    fn record_result(&mut self, entry: HistoryEntry) {
        let pushed = serde_json::to_value(&entry)
            .map_err(|e| TallerError::StoreDecode {
                path: HISTORY_PATH.to_string(),
                source: e,
            })
            .and_then(|value| self.store.push(HISTORY_PATH, value));
        match pushed {
            Ok(key) => debug!("Recorded result {}", key),
            Err(e) => {
                error!("Could not record race result: {}", e);
                self.history.push(entry);
                let excess = self.history.len().saturating_sub(self.config.history_limit);
                self.history.drain(..excess);
                return;
            }
        }
        self.refresh_history();
    }

    fn refresh_history(&mut self) {
        match self.store.read_last(HISTORY_PATH, self.config.history_limit) {
            Ok(entries) => {
                self.history = entries
                    .into_iter()
                    .filter_map(|(key, value)| match serde_json::from_value(value) {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            warn!("Skipping malformed history entry {}: {}", key, e);
                            None
                        }
                    })
                    .collect();
            }
            Err(e) => warn!("Could not read race history: {}", e),
        }
    }

    fn on_timer(&mut self, timer: Timer, events: &mut Vec<OrchestratorEvent>) {
        match (timer, self.phase) {
            (Timer::CountdownStep, OrchestratorPhase::Countdown { step }) => {
                self.show_countdown_step(step + 1, events)
            }
            (Timer::RoundResultEnd, OrchestratorPhase::RoundResult { .. }) => {
                self.open_pit_stop(events)
            }
            (Timer::PitStopEnd, OrchestratorPhase::PitStop) => self.close_pit_stop(events),
            (Timer::ResultEnd, OrchestratorPhase::Result { .. }) => self.release(events),
            (timer, phase) => warn!("Ignoring {:?} timer in {:?}", timer, phase),
        }
    }

    fn open_pit_stop(&mut self, events: &mut Vec<OrchestratorEvent>) {
        let Some(matchup) = self.matchup.as_mut() else {
            return;
        };
        matchup.marker.status = RaceStatus::PitStop;
        matchup.marker.p1_boost = 0;
        matchup.marker.p2_boost = 0;
        matchup.engine = None;
        let round = matchup.marker.round;
        let marker = matchup.marker.clone();
        if let Err(e) = self.write_marker(&marker) {
            error!("Could not open the pit stop: {}", e);
        }
        info!("Pit stop after round {}", round);
        events.push(OrchestratorEvent::PitStopOpened { round });
        self.phase = OrchestratorPhase::PitStop;
        self.sequencer
            .schedule(Timer::PitStopEnd, self.config.pit_stop());
    }

    fn close_pit_stop(&mut self, events: &mut Vec<OrchestratorEvent>) {
        // pick up taps that landed since the last tick
        if let Err(e) = self.sync_marker() {
            warn!("Could not read final boosts: {}", e);
        }
        let Some(matchup) = self.matchup.as_mut() else {
            return;
        };
        matchup.marker.status = RaceStatus::Racing;
        matchup.marker.round += 1;
        let boosts = matchup.marker.boosts();
        let marker = matchup.marker.clone();
        if let Err(e) = self.write_marker(&marker) {
            error!("Could not close the pit stop: {}", e);
        }
        events.push(OrchestratorEvent::PitStopClosed { boosts });
        self.begin_countdown(events);
    }

    fn release(&mut self, events: &mut Vec<OrchestratorEvent>) {
        if let Err(e) = self.store.remove(ACTIVE_RACE_PATH) {
            error!("Could not clear the active race: {}", e);
        }
        self.matchup = None;
        self.phase = OrchestratorPhase::Lobby;
        // re-check the waiting room on the next tick
        self.waiting_changed = true;
        info!("Track released");
        events.push(OrchestratorEvent::Released);
    }
}
