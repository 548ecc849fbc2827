//! The event store
//!
//! Owns every event, keeps the open and closed identity indexes, allocates
//! ids, and fans commits out to registered observers.  Mutation happens on
//! checked-out copies; `commit` is the serialization point.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ZinoError, ZinoResult};
use crate::models::events::{Event, EventKind, EventState, SubIndex};

/// Identity triple of an event
pub type EventIndexKey = (String, SubIndex, EventKind);

/// Observer invoked synchronously on every commit with the committed event,
/// the prior committed copy (if any) and the names of changed fields
pub type EventObserver = Box<dyn Fn(&Event, Option<&Event>, &[&'static str]) + Send + Sync>;

/// How many closed events are kept in memory for lookup.  Older ones only
/// survive in the on-disk archive.
const CLOSED_RETENTION: usize = 500;

/// The store of all events, open and recently closed
#[derive(Serialize, Deserialize, Default)]
pub struct EventStore {
    events: HashMap<u32, Event>,
    closed: HashMap<u32, Event>,
    last_event_id: u32,
    #[serde(skip)]
    open_index: HashMap<EventIndexKey, u32>,
    #[serde(skip)]
    closed_index: HashMap<EventIndexKey, u32>,
    #[serde(skip)]
    observers: Vec<EventObserver>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the identity indexes from the event maps.  Required after
    /// deserializing a snapshot, as the indexes are not part of it.
    pub fn rebuild_indexes(&mut self) {
        self.open_index = self
            .events
            .values()
            .filter_map(|event| Some((index_key(event), event.id?)))
            .collect();
        // Latest close wins when several closed events share an identity
        self.closed_index.clear();
        let mut by_updated: Vec<&Event> = self.closed.values().collect();
        by_updated.sort_by_key(|event| event.updated);
        for event in by_updated {
            if let Some(id) = event.id {
                self.closed_index.insert(index_key(event), id);
            }
        }
    }

    /// Adds an observer that will be called on every commit, in registration
    /// order
    pub fn add_observer(&mut self, observer: EventObserver) {
        self.observers.push(observer);
    }

    /// Returns the open event with the given identity
    pub fn get(&self, router: &str, sub_index: SubIndex, kind: EventKind) -> Option<&Event> {
        let id = self
            .open_index
            .get(&(router.to_string(), sub_index, kind))?;
        self.events.get(id)
    }

    /// Returns the most recently closed event with the given identity
    pub fn get_closed(&self, router: &str, sub_index: SubIndex, kind: EventKind) -> Option<&Event> {
        let id = self
            .closed_index
            .get(&(router.to_string(), sub_index, kind))?;
        self.closed.get(id)
    }

    /// Returns any committed event by id, open or closed
    pub fn get_by_id(&self, id: u32) -> Option<&Event> {
        self.events.get(&id).or_else(|| self.closed.get(&id))
    }

    /// Creates a new detached embryonic event for the given identity.  Fails
    /// if an open event with that identity already exists.
    pub fn create(&mut self, router: &str, sub_index: SubIndex, kind: EventKind) -> ZinoResult<Event> {
        let key = (router.to_string(), sub_index, kind);
        if self.open_index.contains_key(&key) {
            return Err(ZinoError::EventExists(format!(
                "({}, {}, {})",
                router, sub_index, kind
            )));
        }
        let event = Event::new(router, sub_index, kind);
        debug!("created embryonic event for ({}, {}, {})", router, sub_index, kind);
        Ok(event)
    }

    /// Returns a mutable working copy of the open event with this identity,
    /// or a fresh embryonic event if none exists.  The boolean is true for a
    /// new event.  Changes only take effect through `commit`.
    pub fn get_or_create(
        &mut self,
        router: &str,
        sub_index: SubIndex,
        kind: EventKind,
    ) -> (Event, bool) {
        match self.create(router, sub_index, kind) {
            Ok(event) => (event, true),
            Err(_) => {
                let existing = self
                    .get(router, sub_index, kind)
                    .cloned()
                    .unwrap_or_else(|| Event::new(router, sub_index, kind));
                (existing, false)
            }
        }
    }

    /// Returns a deep copy of a committed event for mutation without
    /// observable effects until committed
    pub fn checkout(&self, id: u32) -> ZinoResult<Event> {
        self.get_by_id(id)
            .cloned()
            .ok_or(ZinoError::EventNotFound(id))
    }

    /// Commits a working copy, replacing the committed event by the same id.
    ///
    /// Embryonic events are opened and assigned an id.  The diff against the
    /// prior committed copy (or a pristine embryonic baseline for new
    /// events) is computed before the copy is replaced, and all observers
    /// are invoked with it after the store is consistent again.
    pub fn commit(&mut self, mut event: Event, user: &str) -> ZinoResult<u32> {
        if event.state == EventState::Embryonic {
            event.set_state(EventState::Open, user)?;
        }

        let old_event = match event.id {
            Some(id) => self.get_by_id(id).cloned(),
            None => None,
        };
        let id = match event.id {
            Some(id) => id,
            None => {
                let id = self.next_event_id();
                event.id = Some(id);
                id
            }
        };

        let baseline;
        let changed = match &old_event {
            Some(old) => event.changed_fields(old),
            None => {
                baseline = Event::new(event.router.clone(), event.sub_index, event.kind());
                event.changed_fields(&baseline)
            }
        };

        let key = index_key(&event);
        if event.state == EventState::Closed {
            self.events.remove(&id);
            self.open_index.remove(&key);
            self.closed_index.insert(key, id);
            self.closed.insert(id, event.clone());
            self.trim_closed();
        } else {
            self.open_index.insert(key, id);
            self.events.insert(id, event.clone());
        }

        // The store is consistent at this point; a misbehaving observer must
        // not be able to poison the commit
        for observer in &self.observers {
            let call = std::panic::AssertUnwindSafe(|| observer(&event, old_event.as_ref(), &changed));
            if std::panic::catch_unwind(call).is_err() {
                tracing::error!("event observer panicked during commit of event {}", id);
            }
        }
        Ok(id)
    }

    /// Ids of all non-closed events, ascending
    pub fn open_event_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.events.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// All non-closed events
    pub fn open_events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn next_event_id(&mut self) -> u32 {
        self.last_event_id += 1;
        self.last_event_id
    }

    fn trim_closed(&mut self) {
        while self.closed.len() > CLOSED_RETENTION {
            let oldest = self
                .closed
                .values()
                .min_by_key(|event| event.updated)
                .and_then(|event| event.id);
            match oldest {
                Some(id) => {
                    if let Some(event) = self.closed.remove(&id) {
                        let key = index_key(&event);
                        if self.closed_index.get(&key) == Some(&id) {
                            self.closed_index.remove(&key);
                        }
                    }
                }
                None => break,
            }
        }
    }
}

fn index_key(event: &Event) -> EventIndexKey {
    (event.router.clone(), event.sub_index, event.kind())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn identity() -> (&'static str, SubIndex, EventKind) {
        ("example-gw", SubIndex::Interface(1), EventKind::PortState)
    }

    #[test]
    fn only_one_open_event_per_identity() {
        let mut store = EventStore::new();
        let (router, sub_index, kind) = identity();
        let event = store.create(router, sub_index, kind).unwrap();
        store.commit(event, "monitor").unwrap();
        assert!(matches!(
            store.create(router, sub_index, kind),
            Err(ZinoError::EventExists(_))
        ));
    }

    #[test]
    fn commit_opens_and_assigns_monotonic_ids() {
        let mut store = EventStore::new();
        let (router, sub_index, kind) = identity();
        let event = store.create(router, sub_index, kind).unwrap();
        let first = store.commit(event, "monitor").unwrap();

        let event = store
            .create(router, SubIndex::Interface(2), kind)
            .unwrap();
        let second = store.commit(event, "monitor").unwrap();
        assert!(second > first);

        let committed = store.get(router, sub_index, kind).unwrap();
        assert_eq!(committed.state, EventState::Open);
        assert_eq!(committed.id, Some(first));
    }

    #[test]
    fn get_or_create_returns_checkout_of_existing() {
        let mut store = EventStore::new();
        let (router, sub_index, kind) = identity();
        let (event, created) = store.get_or_create(router, sub_index, kind);
        assert!(created);
        let id = store.commit(event, "monitor").unwrap();

        let (copy, created) = store.get_or_create(router, sub_index, kind);
        assert!(!created);
        assert_eq!(copy.id, Some(id));
        // Mutating the copy must not affect the committed event
        let mut copy = copy;
        copy.priority = 999;
        assert_eq!(store.get(router, sub_index, kind).unwrap().priority, 100);
    }

    #[test]
    fn observers_see_the_commit_diff() {
        let mut store = EventStore::new();
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        store.add_observer(Box::new(move |_new, _old, changed| {
            seen_clone
                .lock()
                .unwrap()
                .push(changed.iter().map(|s| s.to_string()).collect());
        }));

        let (router, sub_index, kind) = identity();
        let (event, _) = store.get_or_create(router, sub_index, kind);
        let id = store.commit(event, "monitor").unwrap();

        let mut copy = store.checkout(id).unwrap();
        copy.priority = 200;
        store.commit(copy, "monitor").unwrap();

        let seen = seen.lock().unwrap();
        // New event: the diff against the embryonic baseline includes state
        assert!(seen[0].contains(&"state".to_string()));
        assert_eq!(seen[1], vec!["priority".to_string()]);
    }

    #[test]
    fn no_op_commit_still_notifies_with_empty_diff() {
        let mut store = EventStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let empty_diffs = Arc::new(AtomicUsize::new(0));
        let (calls_clone, empty_clone) = (calls.clone(), empty_diffs.clone());
        store.add_observer(Box::new(move |_, _, changed| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if changed.is_empty() {
                empty_clone.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let (router, sub_index, kind) = identity();
        let (event, _) = store.get_or_create(router, sub_index, kind);
        let id = store.commit(event, "monitor").unwrap();
        let copy = store.checkout(id).unwrap();
        store.commit(copy, "monitor").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(empty_diffs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closing_moves_event_to_closed_index() {
        let mut store = EventStore::new();
        let (router, sub_index, kind) = identity();
        let (event, _) = store.get_or_create(router, sub_index, kind);
        let id = store.commit(event, "monitor").unwrap();

        let mut copy = store.checkout(id).unwrap();
        copy.set_state(EventState::Closed, "operator").unwrap();
        store.commit(copy, "operator").unwrap();

        assert!(store.get(router, sub_index, kind).is_none());
        let closed = store.get_closed(router, sub_index, kind).unwrap();
        assert_eq!(closed.id, Some(id));
        assert!(store.open_event_ids().is_empty());

        // A new embryonic event for the same identity is now allowed
        let (event, created) = store.get_or_create(router, sub_index, kind);
        assert!(created);
        let new_id = store.commit(event, "monitor").unwrap();
        assert!(new_id > id);
    }

    #[test]
    fn indexes_rebuild_after_snapshot_round_trip() {
        let mut store = EventStore::new();
        let (router, sub_index, kind) = identity();
        let (event, _) = store.get_or_create(router, sub_index, kind);
        store.commit(event, "monitor").unwrap();

        let json = serde_json::to_string(&store).unwrap();
        let mut restored: EventStore = serde_json::from_str(&json).unwrap();
        restored.rebuild_indexes();
        assert!(restored.get(router, sub_index, kind).is_some());
        assert_eq!(restored.open_event_ids(), store.open_event_ids());
    }
}
