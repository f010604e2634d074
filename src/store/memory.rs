use std::sync::{
    Arc, Mutex, MutexGuard,
    mpsc::{self, Sender},
};

use itertools::Itertools;
use log::{debug, warn};
use serde_json::{Map, Value};

use super::{SharedStore, Subscription};
use crate::TallerError;

struct Subscriber {
    segments: Vec<String>,
    sender: Sender<Option<Value>>,
}

#[derive(Default)]
struct StoreState {
    root: Map<String, Value>,
    next_key: u64,
    subscribers: Vec<Subscriber>,
    offline: bool,
}

/// An in-process [`SharedStore`] used by the headless simulator and by tests.
///
/// Clones share the same underlying document, so a clone can be handed to each session and to
/// the orchestrator the same way separate browser tabs share the hosted database.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn lookup<'a>(root: &'a Map<String, Value>, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut cur = root.get(first)?;
    for segment in rest {
        cur = cur.as_object()?.get(segment)?;
    }
    Some(cur)
}

fn insert(root: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut cur = root;
    for segment in parents {
        let entry = cur
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry.as_object_mut() {
            Some(next) => cur = next,
            None => return,
        }
    }
    cur.insert(last.clone(), value);
}

/// Removes the value and prunes parents left empty, like the hosted store does.
fn delete(map: &mut Map<String, Value>, segments: &[String]) {
    match segments {
        [] => {}
        [last] => {
            map.remove(last);
        }
        [first, rest @ ..] => {
            if let Some(Value::Object(child)) = map.get_mut(first) {
                delete(child, rest);
                if child.is_empty() {
                    map.remove(first);
                }
            }
        }
    }
}

fn related(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a dropped connection: while offline every call fails with a store error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// A snapshot of the whole document, for debugging and tests.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.lock().root.clone())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // a panic while holding the lock can't leave the document half written
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(state: &StoreState, path: &str, write: bool) -> Result<(), TallerError> {
        if !state.offline {
            return Ok(());
        }
        let reason = "store is offline".to_string();
        let path = path.to_string();
        if write {
            Err(TallerError::StoreWrite { path, reason })
        } else {
            Err(TallerError::StoreRead { path, reason })
        }
    }

    fn notify(state: &mut StoreState, changed: &[String]) {
        let StoreState {
            root, subscribers, ..
        } = state;
        let root: &Map<String, Value> = root;
        subscribers.retain(|subscriber| {
            if !related(&subscriber.segments, changed) {
                return true;
            }
            let value = lookup(root, &subscriber.segments).cloned();
            // a closed receiver means the subscriber went away
            subscriber.sender.send(value).is_ok()
        });
    }
}

impl SharedStore for InMemoryStore {
    fn set(&self, path: &str, value: Value) -> Result<(), TallerError> {
        let mut state = self.lock();
        Self::check_online(&state, path, true)?;
        let segs = segments(path);
        if segs.is_empty() {
            return Err(TallerError::StoreWrite {
                path: path.to_string(),
                reason: "cannot replace the store root".to_string(),
            });
        }
        if value.is_null() {
            delete(&mut state.root, &segs);
        } else {
            insert(&mut state.root, &segs, value);
        }
        Self::notify(&mut state, &segs);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), TallerError> {
        self.set(path, Value::Null)
    }

    fn push(&self, path: &str, value: Value) -> Result<String, TallerError> {
        let key = {
            let mut state = self.lock();
            Self::check_online(&state, path, true)?;
            state.next_key += 1;
            format!("-{:019}", state.next_key)
        };
        self.set(&super::child_path(path, &key), value)?;
        debug!("Pushed new entry {} under {}", key, path);
        Ok(key)
    }

    fn subscribe(&self, path: &str) -> Result<Subscription, TallerError> {
        let mut state = self.lock();
        Self::check_online(&state, path, false)?;
        let segs = segments(path);
        let (sender, receiver) = mpsc::channel();
        if sender.send(lookup(&state.root, &segs).cloned()).is_err() {
            warn!("Subscriber for {} dropped before first value", path);
        }
        state.subscribers.push(Subscriber {
            segments: segs,
            sender,
        });
        Ok(Subscription::new(path.to_string(), receiver))
    }

    fn read_last(&self, path: &str, limit: usize) -> Result<Vec<(String, Value)>, TallerError> {
        let state = self.lock();
        Self::check_online(&state, path, false)?;
        let children = match lookup(&state.root, &segments(path)) {
            Some(Value::Object(children)) => children,
            Some(_) | None => return Ok(Vec::new()),
        };
        let sorted = children
            .iter()
            .sorted_by(|a, b| a.0.cmp(b.0))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        let skip = sorted.len().saturating_sub(limit);
        Ok(sorted.into_iter().skip(skip).collect())
    }
}
