//! Local State Store - the in-memory projection of the project collections.
//!
//! One slice per [`EntityKind`]. A slice that was never loaded is `None`,
//! which is different from an empty slice. Feeds call [`LocalStore::replace`];
//! the mutation executor calls [`LocalStore::pin`] / [`LocalStore::unpin`],
//! [`LocalStore::upsert`] and [`LocalStore::remove`].
//!
//! # Pins
//!
//! While a mutation is unresolved its optimistic value is pinned. A snapshot
//! replacing the slice records what the server sent for that identity and
//! then re-applies the pin, so a snapshot that predates the write cannot make
//! the optimistic value flicker away.

use rtgrefit_protocol::defaults::STORE_EVENT_CAPACITY;
use rtgrefit_protocol::{Entity, EntityKind, Record, RecordKey, ScopeKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Change notifications for consuming modules.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ScopeChanged { scope: Option<ScopeKey>, epoch: u64 },
    SliceReplaced { kind: EntityKind, len: usize },
    Upserted { key: RecordKey },
    Removed { key: RecordKey },
}

/// Ordered records of one kind, unique by id.
#[derive(Debug, Clone, Default)]
struct Slice {
    records: Vec<Record>,
    index: HashMap<String, usize>,
}

impl Slice {
    /// Duplicate ids collapse to the last value, kept at the first position.
    fn from_records(records: Vec<Record>) -> Self {
        let mut slice = Self::default();
        for record in records {
            slice.upsert(record);
        }
        slice
    }

    fn get(&self, id: &str) -> Option<&Record> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    fn upsert(&mut self, record: Record) {
        match self.index.get(record.id()) {
            Some(&pos) => self.records[pos] = record,
            None => {
                let pos = self.records.len();
                self.index.insert(record.id().to_string(), pos);
                self.records.push(record);
            }
        }
    }

    fn remove(&mut self, id: &str) -> Option<Record> {
        let pos = self.index.remove(id)?;
        let removed = self.records.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(removed)
    }
}

#[derive(Debug, Clone, Default)]
struct Pin {
    value: Option<Record>,
    /// Latest value a snapshot delivered while pinned.
    server: Option<Option<Record>>,
}

pub struct LocalStore {
    slices: HashMap<EntityKind, Slice>,
    pins: HashMap<RecordKey, Pin>,
    scope: Option<ScopeKey>,
    epoch: u64,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(STORE_EVENT_CAPACITY);
        Self {
            slices: HashMap::new(),
            pins: HashMap::new(),
            scope: None,
            epoch: 0,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub fn scope(&self) -> Option<&ScopeKey> {
        self.scope.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Drop everything and start a new epoch for `scope`.
    pub fn begin_scope(&mut self, scope: Option<ScopeKey>) -> u64 {
        self.epoch += 1;
        self.slices.clear();
        self.pins.clear();
        self.scope = scope;
        debug!("Store epoch {} for scope {:?}", self.epoch, self.scope);
        self.emit(StoreEvent::ScopeChanged {
            scope: self.scope.clone(),
            epoch: self.epoch,
        });
        self.epoch
    }

    // ========================================================================
    // Slice contract
    // ========================================================================

    /// Replace a whole slice with a snapshot. Records owned by another
    /// project are dropped.
    pub fn replace(&mut self, kind: EntityKind, records: Vec<Record>) {
        let scope = self.scope.clone();
        let records: Vec<Record> = records
            .into_iter()
            .filter(|r| r.kind() == kind)
            .filter(|r| match (&scope, r.project_id()) {
                (Some(scope), Some(project)) => scope == project,
                _ => true,
            })
            .collect();

        let mut slice = Slice::from_records(records);

        for (key, pin) in self.pins.iter_mut().filter(|(key, _)| key.kind == kind) {
            pin.server = Some(slice.get(&key.id).cloned());
            match &pin.value {
                Some(value) => slice.upsert(value.clone()),
                None => {
                    slice.remove(&key.id);
                }
            }
        }

        let len = slice.records.len();
        self.slices.insert(kind, slice);
        self.emit(StoreEvent::SliceReplaced { kind, len });
    }

    /// Replace only if no scope transition happened since `epoch`.
    pub fn replace_for_epoch(
        &mut self,
        epoch: u64,
        kind: EntityKind,
        records: Vec<Record>,
    ) -> bool {
        if epoch != self.epoch {
            debug!(
                "Dropping {} snapshot from epoch {} (current {})",
                kind, epoch, self.epoch
            );
            return false;
        }
        self.replace(kind, records);
        true
    }

    pub fn upsert(&mut self, record: Record) {
        let key = record.key();
        self.slices.entry(key.kind).or_default().upsert(record);
        self.emit(StoreEvent::Upserted { key });
    }

    pub fn remove(&mut self, kind: EntityKind, id: &str) -> Option<Record> {
        let removed = self.slices.get_mut(&kind)?.remove(id);
        if removed.is_some() {
            self.emit(StoreEvent::Removed {
                key: RecordKey::new(kind, id),
            });
        }
        removed
    }

    /// Records of a kind in slice order; `None` until the slice is loaded.
    pub fn get(&self, kind: EntityKind) -> Option<&[Record]> {
        self.slices.get(&kind).map(|s| s.records.as_slice())
    }

    pub fn is_loaded(&self, kind: EntityKind) -> bool {
        self.slices.contains_key(&kind)
    }

    pub fn find(&self, kind: EntityKind, id: &str) -> Option<&Record> {
        self.slices.get(&kind)?.get(id)
    }

    // ========================================================================
    // Typed access
    // ========================================================================

    pub fn all<T: Entity>(&self) -> impl Iterator<Item = &T> + '_ {
        self.get(T::KIND)
            .unwrap_or(&[])
            .iter()
            .filter_map(T::from_record_ref)
    }

    pub fn entity<T: Entity>(&self, id: &str) -> Option<&T> {
        self.find(T::KIND, id).and_then(T::from_record_ref)
    }

    // ========================================================================
    // Pins
    // ========================================================================

    /// Apply an optimistic value and keep it across snapshots.
    pub fn pin(&mut self, key: RecordKey, value: Option<Record>) {
        self.apply(&key, value.clone());
        self.pins.entry(key).or_default().value = value;
    }

    /// Release a pin and apply the settled value.
    pub fn unpin(&mut self, key: &RecordKey, settled: Option<Record>) {
        self.pins.remove(key);
        self.apply(key, settled);
    }

    /// Server value observed by a snapshot since the last call.
    pub fn take_server_value(&mut self, key: &RecordKey) -> Option<Option<Record>> {
        self.pins.get_mut(key).and_then(|pin| pin.server.take())
    }

    pub fn is_pinned(&self, key: &RecordKey) -> bool {
        self.pins.contains_key(key)
    }

    fn apply(&mut self, key: &RecordKey, value: Option<Record>) {
        let current = self.find(key.kind, &key.id);
        if current == value.as_ref() {
            return;
        }
        match value {
            Some(record) => self.upsert(record),
            None => {
                self.remove(key.kind, &key.id);
            }
        }
    }
}

/// Cloneable handle to the single store of a session.
///
/// The lock is only ever held for the duration of a closure and never across
/// an `.await`. Writes are crate-private: outside code reads, and mutates
/// through the multiplexer or the executor.
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<LocalStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T>(&self, f: impl FnOnce(&LocalStore) -> T) -> T {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut LocalStore) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.read(|store| store.subscribe())
    }

    /// Owned copy of a slice.
    pub fn get(&self, kind: EntityKind) -> Option<Vec<Record>> {
        self.read(|store| store.get(kind).map(<[Record]>::to_vec))
    }

    pub fn entities<T: Entity>(&self) -> Vec<T> {
        self.read(|store| store.all::<T>().cloned().collect())
    }

    pub fn entity<T: Entity>(&self, id: &str) -> Option<T> {
        self.read(|store| store.entity::<T>(id).cloned())
    }

    pub fn scope(&self) -> Option<ScopeKey> {
        self.read(|store| store.scope().cloned())
    }

    pub fn epoch(&self) -> u64 {
        self.read(LocalStore::epoch)
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("inner", &"<Mutex>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{unit, work_order};
    use rtgrefit_protocol::EquipmentUnit;

    fn scoped_store(scope: &str) -> LocalStore {
        let mut store = LocalStore::new();
        store.begin_scope(Some(ScopeKey::from(scope)));
        store
    }

    fn ids(store: &LocalStore, kind: EntityKind) -> Vec<&str> {
        store.get(kind).unwrap().iter().map(Record::id).collect()
    }

    fn u1_name(store: &LocalStore) -> &str {
        &store.entity::<EquipmentUnit>("U1").unwrap().name
    }

    #[test]
    fn test_unloaded_differs_from_empty() {
        let mut store = scoped_store("P1");
        assert!(store.get(EntityKind::Units).is_none());
        store.replace(EntityKind::Units, vec![]);
        assert_eq!(store.get(EntityKind::Units).unwrap().len(), 0);
    }

    #[test]
    fn test_replace_dedups_last_wins() {
        let mut store = scoped_store("P1");
        let mut second = unit("P1", "U1");
        second.name = "renamed".to_string();
        store.replace(
            EntityKind::Units,
            vec![
                unit("P1", "U1").into(),
                unit("P1", "U2").into(),
                second.into(),
            ],
        );

        let units: Vec<_> = store.all::<EquipmentUnit>().collect();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].name, "renamed");
        assert_eq!(units[1].id.as_str(), "U2");
    }

    #[test]
    fn test_replace_filters_foreign_scope() {
        let mut store = scoped_store("P2");
        store.replace(
            EntityKind::WorkOrders,
            vec![
                work_order("P1", "U1", "wo1").into(),
                work_order("P2", "U1", "wo2").into(),
            ],
        );
        assert_eq!(ids(&store, EntityKind::WorkOrders), vec!["wo2"]);
    }

    #[test]
    fn test_stale_epoch_is_rejected() {
        let mut store = scoped_store("P1");
        let stale = store.epoch();
        store.begin_scope(Some(ScopeKey::from("P2")));
        let snapshot = vec![unit("P2", "U1").into()];
        assert!(!store.replace_for_epoch(stale, EntityKind::Units, snapshot));
        assert!(store.get(EntityKind::Units).is_none());
    }

    #[test]
    fn test_remove_keeps_order_and_index() {
        let mut store = scoped_store("P1");
        store.replace(
            EntityKind::Units,
            vec![
                unit("P1", "A").into(),
                unit("P1", "B").into(),
                unit("P1", "C").into(),
            ],
        );
        assert!(store.remove(EntityKind::Units, "A").is_some());
        assert!(store.remove(EntityKind::Units, "A").is_none());
        assert_eq!(store.find(EntityKind::Units, "C").unwrap().id(), "C");
        assert_eq!(ids(&store, EntityKind::Units), vec!["B", "C"]);
    }

    #[test]
    fn test_pin_survives_snapshot() {
        let mut store = scoped_store("P1");
        store.replace(EntityKind::Units, vec![unit("P1", "U1").into()]);

        let mut optimistic = unit("P1", "U1");
        optimistic.name = "optimistic".to_string();
        let key = RecordKey::new(EntityKind::Units, "U1");
        store.pin(key.clone(), Some(optimistic.clone().into()));

        store.replace(EntityKind::Units, vec![unit("P1", "U1").into()]);
        assert_eq!(u1_name(&store), "optimistic");
        let server: Record = unit("P1", "U1").into();
        assert_eq!(store.take_server_value(&key), Some(Some(server)));
        assert_eq!(store.take_server_value(&key), None);

        store.unpin(&key, Some(unit("P1", "U1").into()));
        assert!(!store.is_pinned(&key));
        assert_eq!(u1_name(&store), "Unit U1");
    }

    #[test]
    fn test_pinned_delete_survives_snapshot() {
        let mut store = scoped_store("P1");
        store.replace(EntityKind::Units, vec![unit("P1", "U1").into()]);
        let key = RecordKey::new(EntityKind::Units, "U1");
        store.pin(key.clone(), None);
        store.replace(EntityKind::Units, vec![unit("P1", "U1").into()]);
        assert!(store.find(EntityKind::Units, "U1").is_none());
    }

    #[test]
    fn test_events_are_published() {
        let mut store = scoped_store("P1");
        let mut rx = store.subscribe();
        store.upsert(unit("P1", "U1").into());
        store.remove(EntityKind::Units, "U1");
        let key = RecordKey::new(EntityKind::Units, "U1");
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Upserted { key: key.clone() }
        );
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Removed { key });
    }
}
