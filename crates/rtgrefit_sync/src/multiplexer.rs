//! Subscription Multiplexer
//!
//! Owns the live feeds of a session: at most one per (kind, scope). Each feed
//! carries a [`FeedToken`] and the store epoch it was opened under. A snapshot
//! is applied only while the token is open and the epoch is current, so a
//! callback that races an unsubscribe or a scope switch is dropped.

use crate::gateway::{RemoteGateway, SnapshotSink, Subscription};
use crate::store::SharedStore;
use rtgrefit_protocol::{EntityKind, Record, ScopeKey, SyncError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Observer for snapshots the store accepted.
pub type SnapshotTap = Arc<dyn Fn(EntityKind, &ScopeKey, &[Record]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    pub kind: EntityKind,
    pub scope: ScopeKey,
}

/// Closed flag shared between a feed handle and its sink.
///
/// Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct FeedToken {
    closed: Arc<AtomicBool>,
}

impl FeedToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn same(&self, other: &FeedToken) -> bool {
        Arc::ptr_eq(&self.closed, &other.closed)
    }
}

#[derive(Debug, Clone)]
pub struct FeedHandle {
    pub key: FeedKey,
    token: FeedToken,
}

impl FeedHandle {
    pub fn is_open(&self) -> bool {
        !self.token.is_closed()
    }
}

struct ActiveFeed {
    handle: FeedHandle,
    // Held for its Drop.
    _subscription: Subscription,
}

pub struct SubscriptionMultiplexer {
    store: SharedStore,
    gateway: Arc<dyn RemoteGateway>,
    feeds: Mutex<HashMap<FeedKey, ActiveFeed>>,
    tap: Option<SnapshotTap>,
}

impl SubscriptionMultiplexer {
    pub fn new(store: SharedStore, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            store,
            gateway,
            feeds: Mutex::new(HashMap::new()),
            tap: None,
        }
    }

    pub fn with_tap(mut self, tap: SnapshotTap) -> Self {
        self.tap = Some(tap);
        self
    }

    fn feeds(&self) -> MutexGuard<'_, HashMap<FeedKey, ActiveFeed>> {
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the feed for (kind, scope), or return the one already open.
    pub fn open_feed(&self, kind: EntityKind, scope: &ScopeKey) -> Result<FeedHandle, SyncError> {
        let key = FeedKey {
            kind,
            scope: scope.clone(),
        };
        let mut feeds = self.feeds();
        if let Some(active) = feeds.get(&key) {
            return Ok(active.handle.clone());
        }

        let token = FeedToken::new();
        let epoch = self.store.epoch();
        let sink = self.sink(kind, scope.clone(), epoch, token.clone());

        let subscription = match self.gateway.subscribe(kind, scope, sink) {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!("Feed {} for {} failed: {}", kind, scope, err);
                return Err(SyncError::subscription(kind, err));
            }
        };

        debug!("Opened {} feed for {} (epoch {})", kind, scope, epoch);
        let handle = FeedHandle {
            key: key.clone(),
            token,
        };
        feeds.insert(
            key,
            ActiveFeed {
                handle: handle.clone(),
                _subscription: subscription,
            },
        );
        Ok(handle)
    }

    fn sink(
        &self,
        kind: EntityKind,
        scope: ScopeKey,
        epoch: u64,
        token: FeedToken,
    ) -> SnapshotSink {
        let store = self.store.clone();
        let tap = self.tap.clone();
        Arc::new(move |records: Vec<Record>| {
            if token.is_closed() {
                debug!("Dropping {} snapshot for closed feed in {}", kind, scope);
                return;
            }
            let snapshot = tap.as_ref().map(|_| records.clone());
            let accepted = store.write(|s| s.replace_for_epoch(epoch, kind, records));
            if let (true, Some(tap), Some(snapshot)) = (accepted, tap.as_ref(), snapshot) {
                tap(kind, &scope, &snapshot);
            }
        })
    }

    pub fn close_feed(&self, handle: &FeedHandle) {
        let mut feeds = self.feeds();
        let owned = feeds
            .get(&handle.key)
            .map(|active| active.handle.token.same(&handle.token))
            .unwrap_or(false);
        handle.token.close();
        if owned {
            feeds.remove(&handle.key);
            debug!("Closed {} feed for {}", handle.key.kind, handle.key.scope);
        }
    }

    pub fn close_all(&self) {
        let drained: Vec<ActiveFeed> = self.feeds().drain().map(|(_, active)| active).collect();
        for active in &drained {
            active.handle.token.close();
        }
        if !drained.is_empty() {
            debug!("Closed {} feeds", drained.len());
        }
    }

    /// Close every feed and start a new store epoch without opening feeds.
    pub fn detach(&self, scope: Option<&ScopeKey>) -> u64 {
        self.close_all();
        self.store.write(|s| s.begin_scope(scope.cloned()))
    }

    /// Tear down all feeds, bump the epoch, then open every feed-backed kind
    /// for the new scope. Failed feeds leave their slice unloaded.
    pub fn switch_scope(&self, scope: Option<&ScopeKey>) -> Vec<SyncError> {
        self.detach(scope);
        let Some(scope) = scope else {
            return Vec::new();
        };
        info!("Opening feeds for scope {}", scope);
        EntityKind::FEEDS
            .into_iter()
            .filter_map(|kind| self.open_feed(kind, scope).err())
            .collect()
    }

    pub fn open_handles(&self) -> Vec<FeedHandle> {
        self.feeds().values().map(|active| active.handle.clone()).collect()
    }
}

impl Drop for SubscriptionMultiplexer {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::testing::{unit, work_order};

    fn setup() -> (SharedStore, MemoryGateway, SubscriptionMultiplexer) {
        let store = SharedStore::new();
        let gateway = MemoryGateway::new();
        let mux = SubscriptionMultiplexer::new(store.clone(), Arc::new(gateway.clone()));
        (store, gateway, mux)
    }

    #[test]
    fn test_open_feed_is_idempotent() {
        let (_store, gateway, mux) = setup();
        let scope = ScopeKey::from("P1");
        mux.detach(Some(&scope));
        let a = mux.open_feed(EntityKind::Units, &scope).unwrap();
        let b = mux.open_feed(EntityKind::Units, &scope).unwrap();
        assert!(a.token.same(&b.token));
        assert_eq!(gateway.open_feed_count(), 1);
    }

    #[test]
    fn test_switch_scope_loads_feeds() {
        let (store, gateway, mux) = setup();
        gateway.seed([unit("P1", "U1").into(), work_order("P1", "U1", "wo1").into()]);

        let errors = mux.switch_scope(Some(&ScopeKey::from("P1")));
        assert!(errors.is_empty());
        assert_eq!(mux.open_handles().len(), EntityKind::FEEDS.len());
        assert_eq!(store.get(EntityKind::Units).unwrap().len(), 1);
        assert_eq!(store.get(EntityKind::Zones).unwrap().len(), 0);
        assert!(store.get(EntityKind::Users).is_none());
    }

    #[test]
    fn test_failed_feed_reports_and_leaves_slice() {
        let (store, gateway, mux) = setup();
        gateway.fail_feed(EntityKind::Zones);
        let errors = mux.switch_scope(Some(&ScopeKey::from("P1")));
        assert_eq!(errors.len(), 1);
        let SyncError::Subscription { kind, .. } = &errors[0] else {
            panic!("expected a subscription error, got {:?}", errors[0]);
        };
        assert_eq!(*kind, EntityKind::Zones);
        assert!(!store.read(|s| s.is_loaded(EntityKind::Zones)));
    }

    #[test]
    fn test_closed_feed_ignores_late_snapshot() {
        let (store, gateway, mux) = setup();
        let scope = ScopeKey::from("P1");
        mux.detach(Some(&scope));
        let handle = mux.open_feed(EntityKind::Units, &scope).unwrap();
        mux.close_feed(&handle);
        assert!(!handle.is_open());

        gateway.seed([unit("P1", "U1").into()]);
        gateway.replay_to_closed_feeds(EntityKind::Units, &scope);
        assert_eq!(store.get(EntityKind::Units).unwrap().len(), 0);
    }

    #[test]
    fn test_tap_sees_accepted_snapshots() {
        let store = SharedStore::new();
        let gateway = MemoryGateway::new();
        gateway.seed([unit("P1", "U1").into()]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mux = SubscriptionMultiplexer::new(store, Arc::new(gateway)).with_tap(Arc::new(
            move |kind, _scope: &ScopeKey, records: &[Record]| {
                sink.lock().unwrap().push((kind, records.len()));
            },
        ));
        mux.switch_scope(Some(&ScopeKey::from("P1")));
        assert!(seen.lock().unwrap().contains(&(EntityKind::Units, 1)));
    }
}
