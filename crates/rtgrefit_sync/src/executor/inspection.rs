//! Corrosion inspection flows.
//!
//! All writes go to the unit's own inspection record
//! (`InspectionRecord::id_for_unit`). Older records for the same unit are read
//! through the aggregator but only rewritten when a point they hold is edited
//! or removed.

use super::{ImageUpload, MutationContext, MutationExecutor};
use crate::aggregator::{merge_zone, ValidationState};
use chrono::{DateTime, Utc};
use rtgrefit_protocol::{
    CorrosionPoint, Entity, EntityKind, ImageRef, InspectionId, InspectionRecord, PointDraft,
    PointId, Record, RemoteWriteError, Result, SyncError, UnitId, Zone, ZoneId,
};
use tracing::debug;

/// The zone, checked to belong to the unit.
fn zone_of_unit<'a>(
    ctx: &MutationContext<'a>,
    unit_id: &UnitId,
    zone_id: &ZoneId,
) -> Result<&'a Zone> {
    let zone = ctx.require::<Zone>(zone_id.as_str())?;
    if &zone.unit_id != unit_id {
        return Err(SyncError::precondition(format!(
            "zone {} does not belong to unit {}",
            zone_id, unit_id
        )));
    }
    Ok(zone)
}

fn inspection_for(
    ctx: &MutationContext<'_>,
    current: Option<&Record>,
    unit_id: &UnitId,
) -> InspectionRecord {
    current
        .and_then(InspectionRecord::from_record_ref)
        .cloned()
        .unwrap_or_else(|| InspectionRecord::new(ctx.scope.clone(), unit_id.clone()))
}

fn point_missing(point_id: &PointId) -> SyncError {
    SyncError::not_found(EntityKind::Inspections, point_id.as_str())
}

fn holds_point(record: &InspectionRecord, point_id: &PointId) -> bool {
    record
        .findings
        .values()
        .any(|f| f.points.iter().any(|p| &p.id == point_id))
}

impl MutationExecutor {
    fn records_holding(&self, point_id: &PointId) -> Vec<InspectionId> {
        self.store.read(|s| {
            s.all::<InspectionRecord>()
                .filter(|r| holds_point(r, point_id))
                .map(|r| r.id.clone())
                .collect()
        })
    }

    pub async fn add_corrosion_point(
        &self,
        unit_id: &UnitId,
        zone_id: &ZoneId,
        draft: PointDraft,
    ) -> Result<CorrosionPoint> {
        let point = CorrosionPoint {
            id: PointId::new(),
            unit_id: unit_id.clone(),
            zone_id: zone_id.clone(),
            x: draft.x,
            y: draft.y,
            severity: draft.severity,
            notes: draft.notes.clone(),
            created_at: Utc::now(),
        };
        let added = point.clone();
        let record_id = InspectionRecord::id_for_unit(unit_id);

        self.mutate(EntityKind::Inspections, record_id.as_str(), move |ctx, current| {
            draft.check().map_err(SyncError::precondition)?;
            zone_of_unit(ctx, unit_id, zone_id)?;
            let mut record = inspection_for(ctx, current, unit_id);
            record.zone_mut(zone_id).points.push(point);
            record.updated_at = Some(ctx.now);
            Ok(Some(record.into()))
        })
        .await?;

        debug!(
            "Added corrosion point {} to {}/{}",
            added.id, unit_id, zone_id
        );
        Ok(added)
    }

    /// Replace position, severity and notes. Identity, owner and creation
    /// date are kept.
    pub async fn update_corrosion_point(
        &self,
        point_id: &PointId,
        draft: PointDraft,
    ) -> Result<CorrosionPoint> {
        let Some(record_id) = self.records_holding(point_id).into_iter().next() else {
            return self.fail(point_missing(point_id));
        };

        let mut updated = None;
        let slot = &mut updated;
        self.mutate(EntityKind::Inspections, record_id.as_str(), move |ctx, current| {
            draft.check().map_err(SyncError::precondition)?;
            let mut record = current
                .and_then(InspectionRecord::from_record_ref)
                .cloned()
                .ok_or_else(|| point_missing(point_id))?;
            let point = record
                .findings
                .values_mut()
                .flat_map(|f| f.points.iter_mut())
                .find(|p| &p.id == point_id)
                .ok_or_else(|| point_missing(point_id))?;
            point.x = draft.x;
            point.y = draft.y;
            point.severity = draft.severity;
            point.notes = draft.notes;
            *slot = Some(point.clone());
            record.updated_at = Some(ctx.now);
            Ok(Some(record.into()))
        })
        .await?;

        updated.ok_or_else(|| point_missing(point_id))
    }

    /// Remove a point from every inspection record that carries it.
    pub async fn remove_corrosion_point(&self, point_id: &PointId) -> Result<()> {
        let holders = self.records_holding(point_id);
        if holders.is_empty() {
            return self.fail(point_missing(point_id));
        }

        for record_id in holders {
            self.mutate(EntityKind::Inspections, record_id.as_str(), |ctx, current| {
                let Some(record) = current.and_then(InspectionRecord::from_record_ref) else {
                    return Ok(None);
                };
                let mut record = record.clone();
                for findings in record.findings.values_mut() {
                    findings.points.retain(|p| &p.id != point_id);
                }
                record.updated_at = Some(ctx.now);
                Ok(Some(record.into()))
            })
            .await?;
        }
        Ok(())
    }

    /// Attach the zone's reference image. The previous image written by this
    /// client is deleted from storage once the new one is durable.
    pub async fn upload_zone_image(
        &self,
        unit_id: &UnitId,
        zone_id: &ZoneId,
        upload: ImageUpload,
    ) -> Result<ImageRef> {
        let record_id = InspectionRecord::id_for_unit(unit_id);
        let previous = self.store.read(|s| {
            s.entity::<InspectionRecord>(record_id.as_str())
                .and_then(|r| r.findings.get(zone_id))
                .and_then(|f| f.image.clone())
        });
        let path = upload.storage_path(&format!("inspections/{}", unit_id), zone_id.as_str());

        let outcome = self
            .attach_image(
                EntityKind::Inspections,
                record_id.as_str(),
                &path,
                upload,
                |ctx, current, image| {
                    zone_of_unit(ctx, unit_id, zone_id)?;
                    let mut record = inspection_for(ctx, current, unit_id);
                    record.zone_mut(zone_id).image = Some(image.clone());
                    record.updated_at = Some(ctx.now);
                    Ok(Some(record.into()))
                },
            )
            .await?;

        let image = outcome
            .value_as::<InspectionRecord>()
            .and_then(|r| r.findings.get(zone_id).and_then(|f| f.image.clone()))
            .filter(ImageRef::is_durable);
        let Some(image) = image else {
            return self.fail(SyncError::conflict(
                EntityKind::Inspections,
                record_id.as_str(),
                RemoteWriteError::new("image replaced before the upload finished"),
            ));
        };

        if let Some(previous) = previous.filter(|p| p != &image) {
            self.discard_blob(&previous).await;
        }
        Ok(image)
    }

    /// Mark a zone validated. Requires a durable image; validating an already
    /// validated zone returns its existing timestamp.
    pub async fn validate_zone(&self, unit_id: &UnitId, zone_id: &ZoneId) -> Result<DateTime<Utc>> {
        let record_id = InspectionRecord::id_for_unit(unit_id);
        let mut validated = None;
        let slot = &mut validated;

        self.mutate(EntityKind::Inspections, record_id.as_str(), move |ctx, current| {
            zone_of_unit(ctx, unit_id, zone_id)?;
            let view = merge_zone(ctx.store, unit_id, zone_id);
            if let ValidationState::Validated(at) = view.validation {
                *slot = Some(at);
                return Ok(current.cloned());
            }
            let image = match view.image {
                Some(image) if image.is_durable() => image,
                Some(_) => {
                    let reason = format!("zone {} image is still uploading", zone_id);
                    return Err(SyncError::precondition(reason));
                }
                None => {
                    let reason = format!("zone {} has no image", zone_id);
                    return Err(SyncError::precondition(reason));
                }
            };

            let mut record = inspection_for(ctx, current, unit_id);
            let findings = record.zone_mut(zone_id);
            findings.validated_at = Some(ctx.now);
            findings.image.get_or_insert(image);
            record.updated_at = Some(ctx.now);
            *slot = Some(ctx.now);
            Ok(Some(record.into()))
        })
        .await?;

        let reason = format!("zone {} was not validated", zone_id);
        validated.ok_or_else(|| SyncError::precondition(reason))
    }
}
