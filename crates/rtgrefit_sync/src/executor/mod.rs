//! Optimistic Mutation Executor
//!
//! Every local edit goes through [`MutationExecutor::mutate`]:
//!
//! 1. compute the next value from the current one and pin it in the store
//! 2. issue the remote write (or delete)
//! 3. reconcile the canonical value, or roll back on failure
//!
//! Steps 1 and 3 run under the ledger lock and then the store lock, in that
//! order, and never across an `.await`. Step 2 is the only suspension point.
//!
//! Editor flows (inspection, work orders, painting) live in submodules and
//! are thin layers over `mutate` and [`MutationExecutor::attach_image`].

mod inspection;
mod ledger;
mod painting;
mod work_orders;

use crate::gateway::RemoteGateway;
use crate::notices::NoticeBoard;
use crate::store::{LocalStore, SharedStore};
use chrono::{DateTime, Utc};
use ledger::{EntryState, Ledger};
use rtgrefit_protocol::{
    Entity, EntityKind, ImageRef, Record, RecordKey, RemoteWriteError, Result, ScopeKey, SyncError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Read-only view handed to mutation patches.
pub struct MutationContext<'a> {
    pub store: &'a LocalStore,
    pub scope: &'a ScopeKey,
    pub now: DateTime<Utc>,
}

impl<'a> MutationContext<'a> {
    pub fn entity<T: Entity>(&self, id: &str) -> Option<&'a T> {
        self.store.entity::<T>(id)
    }

    pub fn require<T: Entity>(&self, id: &str) -> Result<&'a T> {
        self.entity::<T>(id)
            .ok_or_else(|| SyncError::not_found(T::KIND, id))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub key: RecordKey,
    /// 0 when nothing was issued.
    pub version: u64,
    /// Value displayed for the identity after reconciliation.
    pub value: Option<Record>,
    /// A newer local mutation of the same identity was issued meanwhile.
    pub superseded: bool,
    pub changed: bool,
}

impl MutationOutcome {
    fn unchanged(key: RecordKey, value: Option<Record>) -> Self {
        Self {
            key,
            version: 0,
            value,
            superseded: false,
            changed: false,
        }
    }

    pub fn value_as<T: Entity>(&self) -> Option<T> {
        self.value.clone().and_then(T::from_record)
    }
}

/// Binary payload of an image attached by an editor.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "image/jpeg")
    }

    pub fn extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            "image/heic" => "heic",
            _ => "jpg",
        }
    }

    /// Unique storage path `<dir>/<stem>-<uuid>.<ext>`.
    fn storage_path(&self, dir: &str, stem: &str) -> String {
        format!("{}/{}-{}.{}", dir, stem, Uuid::new_v4(), self.extension())
    }
}

/// A mutation that has been applied locally but not yet sent.
struct Pending {
    key: RecordKey,
    version: u64,
    epoch: u64,
    next: Option<Record>,
}

pub struct MutationExecutor {
    store: SharedStore,
    gateway: Mutex<Arc<dyn RemoteGateway>>,
    ledgers: Mutex<HashMap<RecordKey, Ledger>>,
    versions: AtomicU64,
    notices: NoticeBoard,
}

impl MutationExecutor {
    pub fn new(store: SharedStore, gateway: Arc<dyn RemoteGateway>, notices: NoticeBoard) -> Self {
        Self {
            store,
            gateway: Mutex::new(gateway),
            ledgers: Mutex::new(HashMap::new()),
            versions: AtomicU64::new(0),
            notices,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    fn gateway(&self) -> Arc<dyn RemoteGateway> {
        self.gateway
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_gateway(&self, gateway: Arc<dyn RemoteGateway>) {
        *self.gateway.lock().unwrap_or_else(PoisonError::into_inner) = gateway;
    }

    fn ledgers(&self) -> MutexGuard<'_, HashMap<RecordKey, Ledger>> {
        self.ledgers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget every in-flight mutation. Called on scope transitions, after
    /// the store has already dropped its pins.
    pub fn reset(&self) {
        let mut ledgers = self.ledgers();
        if !ledgers.is_empty() {
            debug!("Discarding {} mutation ledgers", ledgers.len());
        }
        ledgers.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.ledgers().len()
    }

    fn fail<T>(&self, err: SyncError) -> Result<T> {
        self.notices.push(&err);
        Err(err)
    }

    /// Like `fail`, but only notifies while the store is still in the epoch
    /// the mutation started in. Failures of a scope already left are logged.
    fn fail_in<T>(&self, epoch: u64, err: SyncError) -> Result<T> {
        if self.store.epoch() != epoch {
            debug!("Failure after leaving its scope: {}", err);
            return Err(err);
        }
        self.fail(err)
    }

    // ========================================================================
    // Core protocol
    // ========================================================================

    /// Apply `patch` optimistically, write it remotely, then reconcile.
    ///
    /// The patch gets the current value (`None` when absent) and returns the
    /// next one (`None` deletes). Returning the current value unchanged is a
    /// no-op that never reaches the remote.
    pub async fn mutate<F>(&self, kind: EntityKind, id: &str, patch: F) -> Result<MutationOutcome>
    where
        F: FnOnce(&MutationContext<'_>, Option<&Record>) -> Result<Option<Record>>,
    {
        let pending = match self.begin(kind, id, patch) {
            Ok(Ok(pending)) => pending,
            Ok(Err(unchanged)) => return Ok(unchanged),
            Err(err) => return self.fail(err),
        };
        self.commit(pending).await
    }

    fn begin<F>(
        &self,
        kind: EntityKind,
        id: &str,
        patch: F,
    ) -> Result<std::result::Result<Pending, MutationOutcome>>
    where
        F: FnOnce(&MutationContext<'_>, Option<&Record>) -> Result<Option<Record>>,
    {
        let key = RecordKey::new(kind, id);
        let mut ledgers = self.ledgers();
        self.store.write(|store| {
            let scope = store.scope().cloned().ok_or(SyncError::ScopeMissing)?;
            let current = store.find(kind, id).cloned();
            let next = {
                let ctx = MutationContext {
                    store: &*store,
                    scope: &scope,
                    now: Utc::now(),
                };
                patch(&ctx, current.as_ref())?
            };

            if next == current {
                return Ok(Err(MutationOutcome::unchanged(key, current)));
            }
            if let Some(record) = &next {
                if record.key() != key {
                    return Err(SyncError::precondition(format!(
                        "mutation of {} produced {}",
                        key,
                        record.key()
                    )));
                }
            }

            let epoch = store.epoch();
            let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
            let ledger = ledgers
                .entry(key.clone())
                .or_insert_with(|| Ledger::new(epoch, current.clone()));
            if ledger.epoch != epoch {
                *ledger = Ledger::new(epoch, current.clone());
            }
            ledger.push(version, next.clone());
            store.pin(key.clone(), ledger.display());

            debug!("Applied {} v{} locally", key, version);
            Ok(Ok(Pending {
                key,
                version,
                epoch,
                next,
            }))
        })
    }

    async fn commit(&self, pending: Pending) -> Result<MutationOutcome> {
        let gateway = self.gateway();
        let Pending {
            key,
            version,
            epoch,
            next,
        } = pending;
        let result = match next {
            Some(record) => gateway.write(key.kind, &key.id, record).await.map(Some),
            None => gateway.delete(key.kind, &key.id).await.map(|_| None),
        };

        match result {
            Ok(canonical) => {
                let state = EntryState::Confirmed(canonical);
                Ok(self.resolve(&key, version, state))
            }
            Err(err) => {
                let outcome = self.resolve(&key, version, EntryState::RolledBack);
                let shown = outcome.value.as_ref().map(Record::id);
                warn!("{} v{} rolled back: {}", key, version, err.reason);
                debug!("{} now displays {:?}", key, shown);
                self.fail_in(epoch, SyncError::conflict(key.kind, key.id.clone(), err))
            }
        }
    }

    fn resolve(&self, key: &RecordKey, version: u64, state: EntryState) -> MutationOutcome {
        let confirmed = matches!(state, EntryState::Confirmed(_));
        let mut ledgers = self.ledgers();
        self.store.write(|store| {
            let Some(ledger) = ledgers.get_mut(key) else {
                debug!(
                    "{} v{} resolved after its ledger was discarded",
                    key, version
                );
                return MutationOutcome {
                    key: key.clone(),
                    version,
                    value: None,
                    superseded: true,
                    changed: confirmed,
                };
            };
            if ledger.epoch != store.epoch() {
                ledgers.remove(key);
                return MutationOutcome {
                    key: key.clone(),
                    version,
                    value: None,
                    superseded: true,
                    changed: confirmed,
                };
            }

            if let Some(server) = store.take_server_value(key) {
                ledger.rebase(server);
            }
            ledger.resolve(version, state);
            let superseded = ledger.has_later(version);
            ledger.compact();
            let value = ledger.display();

            if ledger.is_settled() {
                store.unpin(key, value.clone());
                ledgers.remove(key);
            } else {
                store.pin(key.clone(), value.clone());
            }
            if confirmed {
                info!("{} v{} confirmed", key, version);
            }

            MutationOutcome {
                key: key.clone(),
                version,
                value,
                superseded,
                changed: confirmed,
            }
        })
    }

    // ========================================================================
    // Two-phase image attachment
    // ========================================================================

    /// Show a local preview at once, upload the blob, then write the record
    /// with the durable URL in place of the preview.
    ///
    /// `place` puts the given image into the current record. It is called once
    /// with the preview; the durable URL is substituted afterwards.
    pub async fn attach_image<F>(
        &self,
        kind: EntityKind,
        id: &str,
        path: &str,
        upload: ImageUpload,
        place: F,
    ) -> Result<MutationOutcome>
    where
        F: FnOnce(&MutationContext<'_>, Option<&Record>, &ImageRef) -> Result<Option<Record>>,
    {
        let preview = ImageRef::preview(&upload.content_type, &upload.bytes);
        let pending = match self.begin(kind, id, |ctx, current| place(ctx, current, &preview)) {
            Ok(Ok(pending)) => pending,
            Ok(Err(unchanged)) => return Ok(unchanged),
            Err(err) => return self.fail(err),
        };
        let Pending {
            key,
            version,
            epoch,
            ..
        } = pending;

        let gateway = self.gateway();
        let object = match gateway.upload_binary(path, upload.bytes).await {
            Ok(object) => object,
            Err(err) => {
                self.drop_preview(&key, version, &preview);
                warn!("Upload of {} for {} failed: {}", path, key, err.reason);
                return self.fail_in(epoch, SyncError::upload(path, err));
            }
        };

        let durable = ImageRef::remote(object.url.clone());
        let Some(record) = self.swap_preview(&key, version, &preview, &durable) else {
            delete_orphan(gateway.as_ref(), &object.url).await;
            let reason = RemoteWriteError::new("scope changed during upload");
            return self.fail_in(epoch, SyncError::conflict(kind, id, reason));
        };

        match gateway.write(kind, id, record).await {
            Ok(canonical) => {
                let state = EntryState::Confirmed(Some(canonical));
                Ok(self.resolve(&key, version, state))
            }
            Err(err) => {
                self.resolve(&key, version, EntryState::RolledBack);
                delete_orphan(gateway.as_ref(), &object.url).await;
                self.fail_in(epoch, SyncError::conflict(kind, id, err))
            }
        }
    }

    /// Best-effort removal of a blob no record references any more.
    async fn discard_blob(&self, image: &ImageRef) {
        if !image.is_durable() {
            return;
        }
        if let Err(err) = self.gateway().delete_binary(image.as_str()).await {
            warn!("Could not delete blob {}: {}", image, err.reason);
        }
    }

    fn drop_preview(&self, key: &RecordKey, version: u64, preview: &ImageRef) {
        {
            let mut ledgers = self.ledgers();
            if let Some(ledger) = ledgers.get_mut(key) {
                ledger.swap_image(preview, None);
            }
        }
        self.resolve(key, version, EntryState::RolledBack);
    }

    /// Substitute the durable URL everywhere the preview appears and return
    /// the value to write for `version`.
    fn swap_preview(
        &self,
        key: &RecordKey,
        version: u64,
        preview: &ImageRef,
        durable: &ImageRef,
    ) -> Option<Record> {
        let mut ledgers = self.ledgers();
        self.store.write(|store| {
            let ledger = ledgers.get_mut(key)?;
            if ledger.epoch != store.epoch() {
                return None;
            }
            ledger.swap_image(preview, Some(durable));
            store.pin(key.clone(), ledger.display());
            ledger.optimistic(version).cloned()
        })
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    /// Insert a new record; fails if the identity already exists.
    pub async fn create<T: Entity>(&self, entity: T) -> Result<MutationOutcome> {
        let id = entity.record_id().to_string();
        self.mutate(T::KIND, &id, move |_, current| match current {
            Some(_) => Err(SyncError::precondition(format!(
                "{}/{} already exists",
                T::KIND,
                entity.record_id()
            ))),
            None => Ok(Some(entity.into_record())),
        })
        .await
    }

    /// Edit an existing record in place.
    pub async fn update<T, F>(&self, id: &str, edit: F) -> Result<MutationOutcome>
    where
        T: Entity,
        F: FnOnce(&MutationContext<'_>, &mut T) -> Result<()>,
    {
        self.mutate(T::KIND, id, |ctx, current| {
            let mut value = current
                .and_then(T::from_record_ref)
                .cloned()
                .ok_or_else(|| SyncError::not_found(T::KIND, id))?;
            edit(ctx, &mut value)?;
            Ok(Some(value.into_record()))
        })
        .await
    }

    pub async fn delete<T: Entity>(&self, id: &str) -> Result<MutationOutcome> {
        self.mutate(T::KIND, id, |_, current| match current {
            Some(_) => Ok(None),
            None => Err(SyncError::not_found(T::KIND, id)),
        })
        .await
    }
}

/// Remove an uploaded blob no record will reference.
async fn delete_orphan(gateway: &dyn RemoteGateway, url: &str) {
    if let Err(err) = gateway.delete_binary(url).await {
        warn!("Orphaned blob {}: {}", url, err.reason);
    }
}
