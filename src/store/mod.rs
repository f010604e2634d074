pub mod memory;

use std::sync::mpsc::{Receiver, TryRecvError};

use serde_json::Value;

use crate::TallerError;

pub use memory::InMemoryStore;

/// Collection of cars waiting to be paired, keyed by generated push ids.
pub const WAITING_ROOM_PATH: &str = "waiting_room";
/// The single active race marker. Absent when no race is running.
pub const ACTIVE_RACE_PATH: &str = "active_race";
/// Append-only list of finished races.
pub const HISTORY_PATH: &str = "history";

/// Joins path segments with `/`.
pub fn child_path(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

/// A trait for the real-time key/value store shared by the track display and every phone.
///
/// The store is the only rendezvous point between sessions. Writes are fire-and-forget from the
/// caller's point of view and there are no transactions or compare-and-swap: concurrent writers
/// to the same path resolve as last writer wins. Callers assume a single race orchestrator and
/// cooperative registration sessions.
///
/// Values are JSON documents addressed by `/` separated paths.
pub trait SharedStore {
    /// Replace the whole value at `path`. Writing `null` removes it.
    fn set(&self, path: &str, value: Value) -> Result<(), TallerError>;

    /// Remove the value at `path`. Removing a missing path is not an error.
    fn remove(&self, path: &str) -> Result<(), TallerError>;

    /// Append `value` under a newly generated child key of `path` and return the key.
    ///
    /// Generated keys sort in insertion order.
    fn push(&self, path: &str, value: Value) -> Result<String, TallerError>;

    /// Subscribe to every change at or below `path`. The current value is delivered
    /// immediately, then the full value again after each change.
    fn subscribe(&self, path: &str) -> Result<Subscription, TallerError>;

    /// The last `limit` children of the collection at `path`, oldest first.
    fn read_last(&self, path: &str, limit: usize) -> Result<Vec<(String, Value)>, TallerError>;
}

/// Receiving end of a [`SharedStore::subscribe`] call. `None` values mean the path is empty.
pub struct Subscription {
    path: String,
    receiver: Receiver<Option<Value>>,
}

impl Subscription {
    pub fn new(path: String, receiver: Receiver<Option<Value>>) -> Self {
        Self { path, receiver }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Drains pending notifications without blocking and returns the newest one, or `None` when
    /// nothing changed since the last call.
    pub fn latest(&self) -> Result<Option<Option<Value>>, TallerError> {
        Ok(self.pending()?.pop())
    }

    /// Drains every pending notification, oldest first. Use this instead of
    /// [`Subscription::latest`] when a short-lived value must not be missed.
    pub fn pending(&self) -> Result<Vec<Option<Value>>, TallerError> {
        let mut values = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(value) => values.push(value),
                Err(TryRecvError::Empty) => return Ok(values),
                Err(TryRecvError::Disconnected) if values.is_empty() => {
                    return Err(TallerError::StoreRead {
                        path: self.path.clone(),
                        reason: "subscription closed".to_string(),
                    });
                }
                Err(TryRecvError::Disconnected) => return Ok(values),
            }
        }
    }
}
