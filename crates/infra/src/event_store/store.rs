use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use tracing::debug;

use stratum_core::{AggregateId, ExpectedVersion};
use stratum_events::{Event, MessageBus, WILDCARD_TOPIC};

use super::error::EventStoreError;
use crate::persistence::{DocumentStorage, InMemoryStorage, JsonFileStorage};

/// Persisted layout: aggregate id → events, streams in creation order.
pub type EventStreams = IndexMap<AggregateId, Vec<Event>>;

/// Append-only store of per-aggregate event streams.
///
/// The store is fed by the bus: `subscribe_to_all` registers a wildcard
/// handler, so every validated event that is published gets appended. Within
/// a stream, versions are contiguous and start at 0; an event that does not
/// land on the next position is rejected.
pub struct EventStore {
    streams: RwLock<EventStreams>,
    storage: Box<dyn DocumentStorage<EventStreams>>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventStore")
            .field("streams", &streams.len())
            .finish_non_exhaustive()
    }
}

impl EventStore {
    pub fn in_memory() -> Self {
        Self {
            streams: RwLock::new(EventStreams::new()),
            storage: Box::new(InMemoryStorage::new()),
        }
    }

    /// Open a store backed by a JSON file, loading any existing streams.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EventStoreError> {
        Self::with_storage(Box::new(JsonFileStorage::new(path)))
    }

    pub fn with_storage(
        storage: Box<dyn DocumentStorage<EventStreams>>,
    ) -> Result<Self, EventStoreError> {
        let streams = storage.load()?;
        debug!(streams = streams.len(), "event store loaded");
        Ok(Self {
            streams: RwLock::new(streams),
            storage,
        })
    }

    /// Append every event published on `bus`.
    pub fn subscribe_to_all(self: &Arc<Self>, bus: &MessageBus) {
        let store = Arc::clone(self);
        bus.subscribe(WILDCARD_TOPIC, move |event| {
            store.append(event.clone())?;
            Ok(())
        });
    }

    pub fn append(&self, event: Event) -> Result<(), EventStoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::LockPoisoned)?;

        let aggregate_id = event.aggregate_id().clone();
        let next = streams.get(&aggregate_id).map_or(0, Vec::len) as u64;
        let expected = ExpectedVersion::Exact(event.version() as i64 - 1);
        if !expected.matches(next as i64 - 1) {
            return Err(EventStoreError::VersionConflict {
                aggregate_id,
                expected: next,
                actual: event.version(),
            });
        }

        let event_type = event.event_type().to_string();
        let version = event.version();
        streams.entry(aggregate_id.clone()).or_default().push(event);

        if let Err(err) = self.storage.save(&streams) {
            // Keep memory and storage in step.
            if let Some(stream) = streams.get_mut(&aggregate_id) {
                stream.pop();
                if stream.is_empty() {
                    streams.shift_remove(&aggregate_id);
                }
            }
            return Err(err.into());
        }

        debug!(aggregate_id = %aggregate_id, event_type, version, "event persisted");
        Ok(())
    }

    /// Events of one stream in version order (empty for unknown ids).
    pub fn read_stream(&self, aggregate_id: &AggregateId) -> Vec<Event> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(aggregate_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every event, stream by stream in stream-creation order.
    pub fn read_all_events(&self) -> Vec<Event> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Version of the last event in the stream, `-1` when the stream is empty.
    pub fn stream_version(&self, aggregate_id: &AggregateId) -> i64 {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(aggregate_id)
            .and_then(|stream| stream.last())
            .map_or(-1, |event| event.version() as i64)
    }

    pub fn clear(&self) -> Result<(), EventStoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::LockPoisoned)?;
        streams.clear();
        self.storage.save(&streams)?;
        debug!("event store cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use stratum_events::SchemaRegistry;

    fn event(id: &AggregateId, event_type: &str, version: u64) -> Event {
        Event::new(event_type, id.clone(), version, Map::new())
    }

    #[test]
    fn append_and_read_stream_in_order() {
        let store = EventStore::in_memory();
        let id = AggregateId::generate();
        store.append(event(&id, "UserRegistered", 0)).unwrap();
        store.append(event(&id, "UserUpdated", 1)).unwrap();

        let stream = store.read_stream(&id);
        assert_eq!(stream.len(), 2);
        assert_eq!(stream[0].event_type(), "UserRegistered");
        assert_eq!(stream[1].version(), 1);
        assert_eq!(store.stream_version(&id), 1);
    }

    #[test]
    fn unknown_stream_reads_empty() {
        let store = EventStore::in_memory();
        let id = AggregateId::generate();
        assert!(store.read_stream(&id).is_empty());
        assert_eq!(store.stream_version(&id), -1);
    }

    #[test]
    fn gaps_and_duplicates_are_rejected() {
        let store = EventStore::in_memory();
        let id = AggregateId::generate();
        store.append(event(&id, "UserRegistered", 0)).unwrap();

        let Err(EventStoreError::VersionConflict { expected, actual, .. }) =
            store.append(event(&id, "UserUpdated", 2))
        else {
            panic!("expected version conflict for a gap");
        };
        assert_eq!((expected, actual), (1, 2));

        assert!(matches!(
            store.append(event(&id, "UserRegistered", 0)),
            Err(EventStoreError::VersionConflict { .. })
        ));
        assert_eq!(store.read_stream(&id).len(), 1);
    }

    #[test]
    fn read_all_events_follows_stream_creation_order() {
        let store = EventStore::in_memory();
        let a = AggregateId::generate();
        let b = AggregateId::generate();
        store.append(event(&a, "UserRegistered", 0)).unwrap();
        store.append(event(&b, "UserRegistered", 0)).unwrap();
        store.append(event(&a, "UserDeactivated", 1)).unwrap();

        let all: Vec<_> = store
            .read_all_events()
            .into_iter()
            .map(|e| (e.aggregate_id().clone(), e.version()))
            .collect();
        assert_eq!(all, vec![(a.clone(), 0), (a, 1), (b, 0)]);
    }

    #[test]
    fn clear_empties_every_stream() {
        let store = EventStore::in_memory();
        let id = AggregateId::generate();
        store.append(event(&id, "UserRegistered", 0)).unwrap();
        store.clear().unwrap();
        assert!(store.read_all_events().is_empty());
        store.append(event(&id, "UserRegistered", 0)).unwrap();
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("event_store.json");
        let id = AggregateId::generate();
        {
            let store = EventStore::open(&path).unwrap();
            store.append(event(&id, "UserRegistered", 0)).unwrap();
        }

        let reopened = EventStore::open(&path).unwrap();
        assert_eq!(reopened.read_stream(&id).len(), 1);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[id.as_str()][0]["type"], json!("UserRegistered"));
    }

    #[test]
    fn wildcard_subscription_persists_published_events() {
        let registry = std::sync::Arc::new(SchemaRegistry::new());
        registry.register("UserRegistered", json!({ "type": "object" }));
        let bus = MessageBus::new(registry);
        let store = Arc::new(EventStore::in_memory());
        store.subscribe_to_all(&bus);

        let id = AggregateId::generate();
        bus.publish("UserRegistered", &event(&id, "UserRegistered", 0))
            .unwrap();
        assert_eq!(store.read_stream(&id).len(), 1);

        // A conflicting append surfaces to the publisher.
        let err = bus
            .publish("UserRegistered", &event(&id, "UserRegistered", 0))
            .unwrap_err();
        assert!(err.to_string().contains("UserRegistered"));
    }
}
