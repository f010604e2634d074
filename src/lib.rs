// Library interface for taller
// The binary and the integration tests drive the game through these modules

pub mod config;
pub mod errors;
pub mod minigame;
pub mod race;
pub mod scenario;
pub mod segmentation;
pub mod session;
pub mod store;
pub mod writer;

// Re-export commonly used types
pub use config::{GameConfig, OutcomePolicy, SeriesFormat};
pub use errors::TallerError;
pub use minigame::{MinigameState, PowerLevel, PowerMinigame};
pub use race::{
    ActiveRace, CarEntry, HistoryEntry, OrchestratorEvent, OrchestratorPhase, RaceOrchestrator,
    RaceSlot, RaceStatus, RandomSource, RngSource,
};
pub use segmentation::{LassoPoint, SegmentationCanvas};
pub use session::{RegistrationSession, SessionEvent, SessionState};
pub use store::{InMemoryStore, SharedStore};
