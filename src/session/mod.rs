use std::time::{Duration, SystemTime, UNIX_EPOCH};

use image::RgbaImage;
use log::{debug, info, warn};
use serde_json::json;

use crate::{
    TallerError,
    config::GameConfig,
    minigame::{MinigameState, PowerLevel, PowerMinigame},
    race::{ActiveRace, CarEntry, PhaseSequencer, RaceSlot, RaceStatus},
    segmentation::{SegmentationCanvas, decode_and_scale},
    store::{ACTIVE_RACE_PATH, SharedStore, Subscription, WAITING_ROOM_PATH, child_path},
};

const SECOND: Duration = Duration::from_secs(1);

/// Mode of the phone screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Filling in name, photo and power score
    Form,
    /// In the waiting room under `id`
    Submitted { id: String },
    /// On track, spectating
    Racing { id: String, slot: RaceSlot },
    /// Pit stop open, taps are sent as boost
    Boost { id: String, slot: RaceSlot, taps: u32 },
    /// The race marker is gone; the form comes back once the debounce timer fires
    Releasing { id: String },
}

impl SessionState {
    pub fn car_id(&self) -> Option<&str> {
        match self {
            SessionState::Form => None,
            SessionState::Submitted { id }
            | SessionState::Racing { id, .. }
            | SessionState::Boost { id, .. }
            | SessionState::Releasing { id } => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    MinigameTick { remaining_s: u32 },
    MinigameFinished { clicks: u32, level: PowerLevel },
    RaceJoined { slot: RaceSlot },
    PitStopOpened,
    PitStopClosed,
    RaceCleared,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    MinigameSecond,
    Release,
}

/// The registration flow running on a participant's phone.
///
/// Collects a name, a cut out photo and a minigame score, submits them as a car to the waiting
/// room and then follows the active race marker until its race is over. Time moves only
/// through [`RegistrationSession::tick`]; the session owns at most one pending timer, which
/// is dropped on every reset.
pub struct RegistrationSession<S: SharedStore> {
    store: S,
    config: GameConfig,
    name: String,
    canvas: Option<SegmentationCanvas>,
    minigame: PowerMinigame,
    state: SessionState,
    sequencer: PhaseSequencer<Timer>,
    marker_updates: Option<Subscription>,
}

impl<S: SharedStore> RegistrationSession<S> {
    pub fn new(store: S, config: GameConfig) -> Self {
        let minigame = PowerMinigame::new(config.minigame_duration_s);
        Self {
            store,
            config,
            name: String::new(),
            canvas: None,
            minigame,
            state: SessionState::Form,
            sequencer: PhaseSequencer::new(),
            marker_updates: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn canvas(&self) -> Option<&SegmentationCanvas> {
        self.canvas.as_ref()
    }

    /// The photo being edited. Only available while the form is shown.
    pub fn canvas_mut(&mut self) -> Option<&mut SegmentationCanvas> {
        match self.state {
            SessionState::Form => self.canvas.as_mut(),
            _ => None,
        }
    }

    pub fn minigame(&self) -> &PowerMinigame {
        &self.minigame
    }

    /// Sets the display name, trimmed and upper-cased.
    pub fn set_name(&mut self, name: &str) -> Result<(), TallerError> {
        self.ensure_form("name")?;
        let name = name.trim().to_uppercase();
        if name.is_empty() {
            return Err(TallerError::InvalidUserInput {
                field: "name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if name.chars().count() > self.config.max_name_len {
            return Err(TallerError::InvalidUserInput {
                field: "name".to_string(),
                reason: format!("longer than {} characters", self.config.max_name_len),
            });
        }
        self.name = name;
        Ok(())
    }

    /// Decodes an uploaded photo and scales it for the track. On failure the previous photo,
    /// if any, is kept.
    pub fn load_photo(&mut self, bytes: &[u8]) -> Result<(), TallerError> {
        self.ensure_form("photo")?;
        let image = decode_and_scale(
            bytes,
            self.config.image_height_px,
            self.config.image_max_width_px,
        )?;
        self.load_image(image)
    }

    /// Uses an already decoded image as the photo, replacing any previous one.
    pub fn load_image(&mut self, image: RgbaImage) -> Result<(), TallerError> {
        self.ensure_form("photo")?;
        debug!("Loaded {}x{} photo", image.width(), image.height());
        self.canvas = Some(SegmentationCanvas::new(image, self.config.undo_depth));
        Ok(())
    }

    pub fn start_minigame(&mut self) -> bool {
        if self.state != SessionState::Form || !self.minigame.start() {
            return false;
        }
        self.sequencer.schedule(Timer::MinigameSecond, SECOND);
        true
    }

    /// Throws away the minigame score so it can be played again.
    pub fn reset_minigame(&mut self) {
        if self.state != SessionState::Form {
            return;
        }
        self.minigame.reset();
        if self.sequencer.pending() == Some(Timer::MinigameSecond) {
            self.sequencer.cancel();
        }
    }

    /// A tap on the big button: counts towards the minigame while it runs, and is sent as boost
    /// during a pit stop. Returns whether the tap counted.
    pub fn tap(&mut self) -> Result<bool, TallerError> {
        match &mut self.state {
            SessionState::Form => Ok(self.minigame.tap()),
            SessionState::Boost { slot, taps, .. } => {
                let next = *taps + 1;
                let path = child_path(ACTIVE_RACE_PATH, slot.boost_field());
                self.store.set(&path, json!(next))?;
                *taps = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Inputs still needed before [`RegistrationSession::submit`] is allowed.
    pub fn missing_inputs(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.is_empty() {
            missing.push("name");
        }
        if self.canvas.is_none() {
            missing.push("photo");
        }
        if self.minigame.result().is_none() {
            missing.push("power");
        }
        missing
    }

    pub fn can_submit(&self) -> bool {
        self.state == SessionState::Form && self.missing_inputs().is_empty()
    }

    /// Sends the car to the waiting room and returns its id.
    ///
    /// On any failure the session stays in the form with everything entered so far, so the
    /// participant can simply try again.
    pub fn submit(&mut self) -> Result<String, TallerError> {
        self.ensure_form("session")?;
        if let Some(field) = self.missing_inputs().first() {
            return Err(TallerError::MissingInput {
                field: field.to_string(),
            });
        }
        let (Some(canvas), Some(clicks)) = (self.canvas.as_ref(), self.minigame.result()) else {
            return Err(TallerError::MissingInput {
                field: "photo".to_string(),
            });
        };

        let entry = CarEntry {
            id: String::new(),
            name: self.name.clone(),
            image: canvas.export_data_url()?,
            level: Some(PowerLevel::from_clicks(
                clicks,
                &self.config.level_thresholds,
            )),
            clicks,
            created_at_ms: now_ms(),
        };
        let value = serde_json::to_value(&entry).map_err(|e| TallerError::StoreDecode {
            path: WAITING_ROOM_PATH.to_string(),
            source: e,
        })?;

        // subscribe first so the pairing can't slip past us
        let marker_updates = self.store.subscribe(ACTIVE_RACE_PATH)?;
        let id = self.store.push(WAITING_ROOM_PATH, value)?;
        info!("{} joined the waiting room as {}", self.name, id);
        self.marker_updates = Some(marker_updates);
        self.state = SessionState::Submitted { id: id.clone() };
        Ok(id)
    }

    pub fn tick(&mut self, dt: Duration) -> Result<Vec<SessionEvent>, TallerError> {
        let mut events = Vec::new();
        self.follow_marker(&mut events)?;

        match self.sequencer.advance(dt) {
            Some(Timer::MinigameSecond) => {
                if let Some(clicks) = self.minigame.tick_second() {
                    let level = PowerLevel::from_clicks(clicks, &self.config.level_thresholds);
                    debug!("Minigame finished with {} clicks (level {})", clicks, level);
                    events.push(SessionEvent::MinigameFinished { clicks, level });
                } else if let MinigameState::Active { remaining_s, .. } = self.minigame.state() {
                    events.push(SessionEvent::MinigameTick { remaining_s });
                    self.sequencer.schedule(Timer::MinigameSecond, SECOND);
                }
            }
            Some(Timer::Release) => {
                self.reset();
                events.push(SessionEvent::Reset);
            }
            None => {}
        }
        Ok(events)
    }

    /// Clears every field and timer and shows an empty form.
    pub fn reset(&mut self) {
        if let Some(id) = self.state.car_id() {
            info!("Session for {} ({}) reset", self.name, id);
        }
        self.sequencer.cancel();
        self.marker_updates = None;
        self.name.clear();
        self.canvas = None;
        self.minigame.reset();
        self.state = SessionState::Form;
    }

    fn ensure_form(&self, field: &str) -> Result<(), TallerError> {
        match self.state {
            SessionState::Form => Ok(()),
            _ => Err(TallerError::InvalidUserInput {
                field: field.to_string(),
                reason: "car already submitted".to_string(),
            }),
        }
    }

    fn follow_marker(&mut self, events: &mut Vec<SessionEvent>) -> Result<(), TallerError> {
        let Some(subscription) = self.marker_updates.as_ref() else {
            return Ok(());
        };
        // every value matters: a whole race can start and end between two ticks
        for value in subscription.pending()? {
            let marker = match value.map(ActiveRace::from_value).transpose() {
                Ok(marker) => marker,
                Err(e) => {
                    warn!("Ignoring unreadable active race marker: {}", e);
                    continue;
                }
            };
            self.on_marker(marker, events);
        }
        Ok(())
    }

    fn on_marker(&mut self, marker: Option<ActiveRace>, events: &mut Vec<SessionEvent>) {
        let Some(id) = self.state.car_id().map(|id| id.to_string()) else {
            return;
        };
        let seat = marker
            .as_ref()
            .and_then(|m| m.slot_of(&id).map(|slot| (slot, m.status)));

        let next = match (seat, &self.state) {
            (Some((slot, RaceStatus::Racing)), SessionState::Boost { .. }) => {
                events.push(SessionEvent::PitStopClosed);
                SessionState::Racing { id, slot }
            }
            (Some((slot, RaceStatus::Racing)), SessionState::Submitted { .. })
            | (Some((slot, RaceStatus::Racing)), SessionState::Releasing { .. }) => {
                self.sequencer.cancel();
                events.push(SessionEvent::RaceJoined { slot });
                SessionState::Racing { id, slot }
            }
            // still the same pit stop
            (Some((_, RaceStatus::PitStop)), SessionState::Boost { .. }) => return,
            (Some((slot, RaceStatus::PitStop)), _) => {
                self.sequencer.cancel();
                events.push(SessionEvent::PitStopOpened);
                SessionState::Boost { id, slot, taps: 0 }
            }
            (None, SessionState::Racing { .. }) | (None, SessionState::Boost { .. }) => {
                debug!("Race for {} is over, releasing", id);
                events.push(SessionEvent::RaceCleared);
                self.sequencer
                    .schedule(Timer::Release, self.config.release_debounce());
                SessionState::Releasing { id }
            }
            _ => return,
        };
        self.state = next;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
