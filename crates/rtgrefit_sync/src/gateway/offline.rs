use super::{RemoteGateway, SnapshotSink, Subscription, UploadedObject};
use async_trait::async_trait;
use rtgrefit_protocol::{
    EntityKind, Record, RemoteWriteError, ScopeKey, SubscriptionError, UploadError,
};

const REASON: &str = "remote disabled";

/// Gateway used when the remote is switched off in configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGateway;

#[async_trait]
impl RemoteGateway for OfflineGateway {
    fn subscribe(
        &self,
        _kind: EntityKind,
        _scope: &ScopeKey,
        _sink: SnapshotSink,
    ) -> Result<Subscription, SubscriptionError> {
        Err(SubscriptionError::new(REASON))
    }

    async fn write(
        &self,
        _kind: EntityKind,
        _id: &str,
        _record: Record,
    ) -> Result<Record, RemoteWriteError> {
        Err(RemoteWriteError::new(REASON))
    }

    async fn delete(&self, _kind: EntityKind, _id: &str) -> Result<(), RemoteWriteError> {
        Err(RemoteWriteError::new(REASON))
    }

    async fn upload_binary(
        &self,
        _path: &str,
        _blob: Vec<u8>,
    ) -> Result<UploadedObject, UploadError> {
        Err(UploadError::new(REASON))
    }

    async fn delete_binary(&self, _url: &str) -> Result<(), UploadError> {
        Err(UploadError::new(REASON))
    }
}
