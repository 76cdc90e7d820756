//! In-process gateway.
//!
//! Holds collections per (kind, scope) and delivers snapshots to registered
//! sinks. Writes, deletes and uploads consume scripted [`Reply`] values in
//! order, which lets tests fail the N-th write or delay a reply to force an
//! interleaving. Without a script every call succeeds immediately.

use super::{RemoteGateway, SnapshotSink, Subscription, UploadedObject};
use async_trait::async_trait;
use rtgrefit_protocol::{
    EntityKind, Record, RemoteWriteError, ScopeKey, SubscriptionError, UploadError,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

const STORAGE_URL_PREFIX: &str = "https://storage.rtgrefit.local/";

/// Closed feeds kept for `replay_to_closed_feeds`; older ones are dropped.
const MAX_CLOSED_FEEDS: usize = 32;

/// Scripted outcome of one remote call.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub delay: Option<Duration>,
    pub fail: Option<String>,
    /// Replaces the written value as the server's canonical answer.
    pub canonical: Option<Record>,
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            fail: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn canonical(mut self, record: impl Into<Record>) -> Self {
        self.canonical = Some(record.into());
        self
    }
}

#[derive(Clone)]
struct Feed {
    kind: EntityKind,
    scope: ScopeKey,
    sink: SnapshotSink,
}

#[derive(Default)]
struct State {
    collections: HashMap<(EntityKind, ScopeKey), Vec<Record>>,
    feeds: BTreeMap<u64, Feed>,
    closed: Vec<Feed>,
    next_feed: u64,
    write_replies: VecDeque<Reply>,
    delete_replies: VecDeque<Reply>,
    upload_replies: VecDeque<Reply>,
    failing_feeds: HashSet<EntityKind>,
    blobs: BTreeMap<String, Vec<u8>>,
    writes: usize,
    hold_initial: bool,
    auto_publish: bool,
}

impl State {
    fn snapshot(&self, kind: EntityKind, scope: &ScopeKey) -> Vec<Record> {
        self.collections
            .get(&(kind, scope.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn sinks_for(&self, kind: EntityKind, scope: &ScopeKey) -> Vec<SnapshotSink> {
        self.feeds
            .values()
            .filter(|feed| feed.kind == kind && &feed.scope == scope)
            .map(|feed| feed.sink.clone())
            .collect()
    }

    fn put(&mut self, scope: ScopeKey, record: Record) {
        let records = self.collections.entry((record.kind(), scope)).or_default();
        match records.iter().position(|r| r.id() == record.id()) {
            Some(pos) => records[pos] = record,
            None => records.push(record),
        }
    }

    fn close(&mut self, id: u64) {
        let Some(feed) = self.feeds.remove(&id) else {
            return;
        };
        if self.closed.len() == MAX_CLOSED_FEEDS {
            self.closed.remove(0);
        }
        self.closed.push(feed);
    }

    /// Remove a record from whichever scope holds it.
    fn take(&mut self, kind: EntityKind, id: &str) -> Option<ScopeKey> {
        for ((k, scope), records) in self.collections.iter_mut() {
            if *k != kind {
                continue;
            }
            if let Some(pos) = records.iter().position(|r| r.id() == id) {
                records.remove(pos);
                return Some(scope.clone());
            }
        }
        None
    }
}

fn scope_of(record: &Record) -> ScopeKey {
    record
        .project_id()
        .cloned()
        .unwrap_or_else(|| ScopeKey::from(""))
}

/// Cloneable handle; clones share the same collections.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<State>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Test controls
    // ========================================================================

    /// Insert records without notifying feeds.
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) {
        let mut state = self.lock();
        for record in records {
            state.put(scope_of(&record), record);
        }
    }

    /// Push the current collection to every open feed for (kind, scope).
    pub fn publish(&self, kind: EntityKind, scope: &ScopeKey) {
        let (sinks, snapshot) = {
            let state = self.lock();
            (state.sinks_for(kind, scope), state.snapshot(kind, scope))
        };
        for sink in sinks {
            sink(snapshot.clone());
        }
    }

    /// Deliver the current collection to feeds that were already closed, as a
    /// callback that was in flight during unsubscribe would. Each closed feed
    /// is replayed at most once.
    pub fn replay_to_closed_feeds(&self, kind: EntityKind, scope: &ScopeKey) {
        let (sinks, snapshot) = {
            let mut state = self.lock();
            let (replayed, kept): (Vec<Feed>, Vec<Feed>) = std::mem::take(&mut state.closed)
                .into_iter()
                .partition(|feed| feed.kind == kind && &feed.scope == scope);
            state.closed = kept;
            let sinks: Vec<SnapshotSink> = replayed.into_iter().map(|feed| feed.sink).collect();
            (sinks, state.snapshot(kind, scope))
        };
        for sink in sinks {
            sink(snapshot.clone());
        }
    }

    pub fn script_writes(&self, replies: impl IntoIterator<Item = Reply>) {
        self.lock().write_replies.extend(replies);
    }

    pub fn script_deletes(&self, replies: impl IntoIterator<Item = Reply>) {
        self.lock().delete_replies.extend(replies);
    }

    pub fn script_uploads(&self, replies: impl IntoIterator<Item = Reply>) {
        self.lock().upload_replies.extend(replies);
    }

    pub fn fail_feed(&self, kind: EntityKind) {
        self.lock().failing_feeds.insert(kind);
    }

    /// Skip the snapshot normally sent on subscribe.
    pub fn hold_initial_snapshots(&self, hold: bool) {
        self.lock().hold_initial = hold;
    }

    /// Publish to open feeds after every successful write or delete.
    pub fn auto_publish(&self, enabled: bool) {
        self.lock().auto_publish = enabled;
    }

    pub fn collection(&self, kind: EntityKind, scope: &ScopeKey) -> Vec<Record> {
        self.lock().snapshot(kind, scope)
    }

    pub fn has_blob(&self, url: &str) -> bool {
        self.lock().blobs.contains_key(url)
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn open_feed_count(&self) -> usize {
        self.lock().feeds.len()
    }

    pub fn closed_feed_count(&self) -> usize {
        self.lock().closed.len()
    }

    async fn settle(reply: &Reply) {
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    fn subscribe(
        &self,
        kind: EntityKind,
        scope: &ScopeKey,
        sink: SnapshotSink,
    ) -> Result<Subscription, SubscriptionError> {
        let (id, initial) = {
            let mut state = self.lock();
            if state.failing_feeds.contains(&kind) {
                return Err(SubscriptionError::new(format!("{} feed unavailable", kind)));
            }
            let id = state.next_feed;
            state.next_feed += 1;
            state.feeds.insert(
                id,
                Feed {
                    kind,
                    scope: scope.clone(),
                    sink: sink.clone(),
                },
            );
            let initial = (!state.hold_initial).then(|| state.snapshot(kind, scope));
            (id, initial)
        };
        debug!("Memory feed {} opened for {} in {}", id, kind, scope);

        if let Some(snapshot) = initial {
            sink(snapshot);
        }

        let state = self.state.clone();
        Ok(Subscription::new(move || {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .close(id);
        }))
    }

    async fn write(
        &self,
        kind: EntityKind,
        id: &str,
        record: Record,
    ) -> Result<Record, RemoteWriteError> {
        let reply = self.lock().write_replies.pop_front().unwrap_or_default();
        Self::settle(&reply).await;

        if let Some(reason) = reply.fail {
            return Err(RemoteWriteError::new(reason));
        }
        if record.kind() != kind || record.id() != id {
            return Err(RemoteWriteError::new(format!(
                "record {} does not match {}/{}",
                record.key(),
                kind,
                id
            )));
        }

        let canonical = reply.canonical.unwrap_or(record);
        let scope = scope_of(&canonical);
        let publish = {
            let mut state = self.lock();
            state.writes += 1;
            state.put(scope.clone(), canonical.clone());
            state.auto_publish
        };
        if publish {
            self.publish(kind, &scope);
        }
        Ok(canonical)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteWriteError> {
        let reply = self.lock().delete_replies.pop_front().unwrap_or_default();
        Self::settle(&reply).await;

        if let Some(reason) = reply.fail {
            return Err(RemoteWriteError::new(reason));
        }
        let (scope, publish) = {
            let mut state = self.lock();
            state.writes += 1;
            (state.take(kind, id), state.auto_publish)
        };
        if let (Some(scope), true) = (scope, publish) {
            self.publish(kind, &scope);
        }
        Ok(())
    }

    async fn upload_binary(
        &self,
        path: &str,
        blob: Vec<u8>,
    ) -> Result<UploadedObject, UploadError> {
        let reply = self.lock().upload_replies.pop_front().unwrap_or_default();
        Self::settle(&reply).await;

        if let Some(reason) = reply.fail {
            return Err(UploadError::new(reason));
        }
        let url = format!("{}{}", STORAGE_URL_PREFIX, path);
        self.lock().blobs.insert(url.clone(), blob);
        Ok(UploadedObject { url })
    }

    async fn delete_binary(&self, url: &str) -> Result<(), UploadError> {
        self.lock().blobs.remove(url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::unit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_sink() -> (SnapshotSink, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sink: SnapshotSink = Arc::new(move |records: Vec<Record>| {
            seen.store(records.len(), Ordering::SeqCst);
        });
        (sink, count)
    }

    fn p1() -> ScopeKey {
        ScopeKey::from("P1")
    }

    #[test]
    fn test_subscribe_delivers_initial_snapshot() {
        let gateway = MemoryGateway::new();
        gateway.seed([
            unit("P1", "U1").into(),
            unit("P2", "U2").into(),
            unit("P1", "U3").into(),
        ]);

        let (sink, count) = counting_sink();
        let _sub = gateway.subscribe(EntityKind::Units, &p1(), sink).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.open_feed_count(), 1);
    }

    #[test]
    fn test_dropped_subscription_moves_to_closed() {
        let gateway = MemoryGateway::new();
        let (sink, _) = counting_sink();
        let sub = gateway.subscribe(EntityKind::Units, &p1(), sink).unwrap();
        drop(sub);
        assert_eq!(gateway.open_feed_count(), 0);
        assert_eq!(gateway.closed_feed_count(), 1);
    }

    #[test]
    fn test_closed_feed_is_replayed_once() {
        let gateway = MemoryGateway::new();
        gateway.seed([unit("P1", "U1").into()]);
        gateway.hold_initial_snapshots(true);
        let (sink, count) = counting_sink();
        drop(gateway.subscribe(EntityKind::Units, &p1(), sink).unwrap());

        gateway.replay_to_closed_feeds(EntityKind::Units, &p1());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.closed_feed_count(), 0);

        gateway.seed([unit("P1", "U2").into()]);
        gateway.replay_to_closed_feeds(EntityKind::Units, &p1());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_feeds_are_capped() {
        let gateway = MemoryGateway::new();
        for _ in 0..MAX_CLOSED_FEEDS + 5 {
            let (sink, _) = counting_sink();
            drop(gateway.subscribe(EntityKind::Zones, &p1(), sink).unwrap());
        }
        assert_eq!(gateway.closed_feed_count(), MAX_CLOSED_FEEDS);
    }

    #[test]
    fn test_failing_feed() {
        let gateway = MemoryGateway::new();
        gateway.fail_feed(EntityKind::Zones);
        let (sink, _) = counting_sink();
        assert!(gateway.subscribe(EntityKind::Zones, &p1(), sink).is_err());
    }

    #[tokio::test]
    async fn test_scripted_writes_in_order() {
        let gateway = MemoryGateway::new();
        gateway.script_writes([Reply::ok(), Reply::fail("denied")]);

        let record: Record = unit("P1", "U1").into();
        let first = gateway.write(EntityKind::Units, "U1", record.clone()).await;
        assert!(first.is_ok());
        let second = gateway.write(EntityKind::Units, "U1", record.clone()).await;
        assert_eq!(second.unwrap_err().reason, "denied");
        assert!(gateway.write(EntityKind::Units, "U1", record).await.is_ok());
        assert_eq!(gateway.write_count(), 2);
    }

    #[tokio::test]
    async fn test_upload_and_delete_binary() {
        let gateway = MemoryGateway::new();
        let object = gateway
            .upload_binary("zones/Z1.jpg", vec![1, 2, 3])
            .await
            .unwrap();
        assert!(gateway.has_blob(&object.url));
        gateway.delete_binary(&object.url).await.unwrap();
        assert_eq!(gateway.blob_count(), 0);
    }
}
