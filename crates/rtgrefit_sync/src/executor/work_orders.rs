//! Washing and sandblasting flows (work orders), plus fleet status.

use super::{ImageUpload, MutationExecutor, MutationOutcome};
use chrono::{DateTime, Utc};
use rtgrefit_protocol::{
    Entity, EntityKind, EquipmentUnit, ImageRef, PhotoSetKey, RemoteWriteError, Result, SyncError,
    UnitId, UnitStatus, WorkOrder, WorkOrderId, WorkOrderStatus,
};

fn order_missing(work_order_id: &WorkOrderId) -> SyncError {
    SyncError::not_found(EntityKind::WorkOrders, work_order_id.as_str())
}

impl MutationExecutor {
    pub async fn set_work_order_status(
        &self,
        work_order_id: &WorkOrderId,
        status: WorkOrderStatus,
    ) -> Result<MutationOutcome> {
        self.update::<WorkOrder, _>(work_order_id.as_str(), |_, order| {
            order.status = status;
            Ok(())
        })
        .await
    }

    pub async fn set_checklist_item(
        &self,
        work_order_id: &WorkOrderId,
        item: &str,
        done: bool,
    ) -> Result<MutationOutcome> {
        let item = item.trim();
        if item.is_empty() {
            return self.fail(SyncError::precondition("checklist item name must not be empty"));
        }
        self.update::<WorkOrder, _>(work_order_id.as_str(), |_, order| {
            order.checklist.insert(item.to_string(), done);
            Ok(())
        })
        .await
    }

    /// Add a photo to the named set of a work order.
    pub async fn upload_work_order_photo(
        &self,
        work_order_id: &WorkOrderId,
        set: PhotoSetKey,
        upload: ImageUpload,
    ) -> Result<ImageRef> {
        let path = upload.storage_path(&format!("work-orders/{}", work_order_id), set.as_str());
        let before: Vec<ImageRef> = self
            .store
            .entity::<WorkOrder>(work_order_id.as_str())
            .map(|order| order.photo_set(set).to_vec())
            .unwrap_or_default();

        let outcome = self
            .attach_image(
                EntityKind::WorkOrders,
                work_order_id.as_str(),
                &path,
                upload,
                |_, current, image| {
                    let mut order = current
                        .and_then(WorkOrder::from_record_ref)
                        .cloned()
                        .ok_or_else(|| order_missing(work_order_id))?;
                    order.photo_set_mut(set).push(image.clone());
                    Ok(Some(order.into()))
                },
            )
            .await?;

        let added = outcome.value_as::<WorkOrder>().and_then(|order| {
            order
                .photo_set(set)
                .iter()
                .find(|image| image.is_durable() && !before.contains(image))
                .cloned()
        });
        match added {
            Some(image) => Ok(image),
            None => self.fail(SyncError::conflict(
                EntityKind::WorkOrders,
                work_order_id.as_str(),
                RemoteWriteError::new("photo replaced before the upload finished"),
            )),
        }
    }

    /// Remove a photo from a set, then delete its blob.
    pub async fn remove_work_order_photo(
        &self,
        work_order_id: &WorkOrderId,
        set: PhotoSetKey,
        image: &ImageRef,
    ) -> Result<MutationOutcome> {
        let outcome = self
            .update::<WorkOrder, _>(work_order_id.as_str(), |_, order| {
                let photos = order.photo_set_mut(set);
                let before = photos.len();
                photos.retain(|p| p != image);
                if photos.len() == before {
                    return Err(SyncError::precondition(format!(
                        "photo not in {} set of {}",
                        set, work_order_id
                    )));
                }
                if photos.is_empty() {
                    order.photos.remove(set.as_str());
                }
                Ok(())
            })
            .await?;
        self.discard_blob(image).await;
        Ok(outcome)
    }

    /// Complete and stamp a work order. Every checklist item must be done.
    pub async fn validate_work_order(&self, work_order_id: &WorkOrderId) -> Result<DateTime<Utc>> {
        let mut validated = None;
        let slot = &mut validated;
        self.update::<WorkOrder, _>(work_order_id.as_str(), move |ctx, order| {
            if let Some(at) = order.validated_at {
                *slot = Some(at);
                return Ok(());
            }
            let open: Vec<&str> = order
                .checklist
                .iter()
                .filter(|(_, done)| !**done)
                .map(|(item, _)| item.as_str())
                .collect();
            if !open.is_empty() {
                return Err(SyncError::precondition(format!(
                    "work order {} has open checklist items: {}",
                    order.id,
                    open.join(", ")
                )));
            }
            order.status = WorkOrderStatus::Completed;
            order.validated_at = Some(ctx.now);
            *slot = Some(ctx.now);
            Ok(())
        })
        .await?;

        validated.ok_or_else(|| order_missing(work_order_id))
    }

    pub async fn set_unit_status(
        &self,
        unit_id: &UnitId,
        status: UnitStatus,
    ) -> Result<MutationOutcome> {
        self.update::<EquipmentUnit, _>(unit_id.as_str(), |ctx, unit| {
            if unit.status != status {
                unit.status = status;
                unit.updated_at = ctx.now;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryGateway, Reply};
    use crate::notices::NoticeBoard;
    use crate::store::SharedStore;
    use crate::testing::{unit, work_order};
    use rtgrefit_protocol::ScopeKey;
    use std::sync::Arc;

    fn setup() -> (SharedStore, MemoryGateway, MutationExecutor) {
        let store = SharedStore::new();
        store.write(|s| {
            s.begin_scope(Some(ScopeKey::from("P1")));
            s.replace(EntityKind::Units, vec![unit("P1", "U1").into()]);
            let mut order = work_order("P1", "U1", "wo1");
            order.checklist.insert("rinse".to_string(), false);
            order.checklist.insert("degrease".to_string(), true);
            s.replace(EntityKind::WorkOrders, vec![order.into()]);
        });
        let gateway = MemoryGateway::new();
        let executor = MutationExecutor::new(
            store.clone(),
            Arc::new(gateway.clone()),
            NoticeBoard::new(),
        );
        (store, gateway, executor)
    }

    fn wo1() -> WorkOrderId {
        WorkOrderId::from("wo1")
    }

    #[tokio::test]
    async fn test_validate_requires_complete_checklist() {
        let (store, _gateway, executor) = setup();
        let err = executor.validate_work_order(&wo1()).await.unwrap_err();
        assert!(err.to_string().contains("rinse"));

        executor
            .set_checklist_item(&wo1(), "rinse", true)
            .await
            .unwrap();
        let at = executor.validate_work_order(&wo1()).await.unwrap();
        let order = store.entity::<WorkOrder>("wo1").unwrap();
        assert_eq!(order.status, WorkOrderStatus::Completed);
        assert_eq!(order.validated_at, Some(at));
        assert_eq!(executor.validate_work_order(&wo1()).await.unwrap(), at);
    }

    #[tokio::test]
    async fn test_photo_upload_and_removal() {
        let (store, gateway, executor) = setup();
        let photo = executor
            .upload_work_order_photo(&wo1(), PhotoSetKey::Before, ImageUpload::jpeg(vec![4, 5]))
            .await
            .unwrap();
        assert!(gateway.has_blob(photo.as_str()));
        let order = store.entity::<WorkOrder>("wo1").unwrap();
        assert_eq!(order.photo_set(PhotoSetKey::Before), &[photo.clone()]);
        assert!(order.photo_set(PhotoSetKey::After).is_empty());

        executor
            .remove_work_order_photo(&wo1(), PhotoSetKey::Before, &photo)
            .await
            .unwrap();
        assert!(!gateway.has_blob(photo.as_str()));
        assert!(store.entity::<WorkOrder>("wo1").unwrap().photos.is_empty());

        let err = executor
            .remove_work_order_photo(&wo1(), PhotoSetKey::Before, &photo)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ValidationPrecondition(_)));
    }

    #[tokio::test]
    async fn test_failed_status_write_rolls_back() {
        let (store, gateway, executor) = setup();
        gateway.script_writes([Reply::fail("offline")]);
        let result = executor
            .set_work_order_status(&wo1(), WorkOrderStatus::InProgress)
            .await;
        assert!(result.is_err());
        let order = store.entity::<WorkOrder>("wo1").unwrap();
        assert_eq!(order.status, WorkOrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_set_unit_status() {
        let (store, _gateway, executor) = setup();
        let u1 = UnitId::from("U1");
        executor
            .set_unit_status(&u1, UnitStatus::Painting)
            .await
            .unwrap();
        let unit = store.entity::<EquipmentUnit>("U1").unwrap();
        assert_eq!(unit.status, UnitStatus::Painting);

        let outcome = executor
            .set_unit_status(&u1, UnitStatus::Painting)
            .await
            .unwrap();
        assert!(!outcome.changed);
    }
}
