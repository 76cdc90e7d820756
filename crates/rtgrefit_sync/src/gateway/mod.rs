//! Remote gateway abstraction.
//!
//! The only surface through which the engine talks to the remote document
//! collections and binary storage. Two implementations ship:
//! - [`MemoryGateway`]: in-process collections with scriptable replies
//! - [`OfflineGateway`]: remote disabled, every call fails

use async_trait::async_trait;
use rtgrefit_protocol::{
    EntityKind, Record, RemoteWriteError, ScopeKey, SubscriptionError, UploadError,
};
use std::fmt;
use std::sync::Arc;

mod memory;
mod offline;

pub use memory::{MemoryGateway, Reply};
pub use offline::OfflineGateway;

/// Callback receiving full snapshots for one feed.
pub type SnapshotSink = Arc<dyn Fn(Vec<Record>) + Send + Sync>;

/// Durable object returned by binary storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub url: String,
}

/// Live feed registration. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Transport to the remote collections and binary storage.
///
/// `subscribe` is synchronous: it registers the sink and returns. The gateway
/// delivers snapshots whenever the remote collection changes, from whatever
/// thread or task it likes. Retry and backoff are the gateway's business.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    fn subscribe(
        &self,
        kind: EntityKind,
        scope: &ScopeKey,
        sink: SnapshotSink,
    ) -> Result<Subscription, SubscriptionError>;

    /// Create or replace a record. Returns the canonical stored value.
    async fn write(
        &self,
        kind: EntityKind,
        id: &str,
        record: Record,
    ) -> Result<Record, RemoteWriteError>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteWriteError>;

    async fn upload_binary(&self, path: &str, blob: Vec<u8>) -> Result<UploadedObject, UploadError>;

    async fn delete_binary(&self, url: &str) -> Result<(), UploadError>;
}
