//! Painting and quality-control flows.

use super::{ImageUpload, MutationContext, MutationExecutor, MutationOutcome};
use chrono::{DateTime, Utc};
use rtgrefit_protocol::defaults::MAX_LAYER_PHOTOS;
use rtgrefit_protocol::{
    AmbientConditions, CoatingControl, CoatingControlId, Entity, EntityKind, ImageRef, LayerStatus,
    PaintingSystem, PaintingSystemId, RemoteWriteError, Result, SyncError, UnitId, Zone, ZoneId,
};
use tracing::debug;

fn require_zone_of_unit(
    ctx: &MutationContext<'_>,
    unit_id: &UnitId,
    zone_id: &ZoneId,
) -> Result<()> {
    let zone = ctx.require::<Zone>(zone_id.as_str())?;
    if &zone.unit_id != unit_id {
        return Err(SyncError::precondition(format!(
            "zone {} does not belong to unit {}",
            zone_id, unit_id
        )));
    }
    Ok(())
}

fn system_missing(system_id: &PaintingSystemId) -> SyncError {
    SyncError::not_found(EntityKind::PaintingSystems, system_id.as_str())
}

fn layer_missing(layer_name: &str) -> SyncError {
    SyncError::precondition(format!("no layer {}", layer_name))
}

fn check_readings(readings: &[f64]) -> Result<()> {
    if readings.is_empty() {
        return Err(SyncError::precondition("at least one DFT reading is required"));
    }
    if let Some(bad) = readings.iter().find(|r| !r.is_finite() || **r <= 0.0) {
        return Err(SyncError::precondition(format!("invalid DFT reading {}", bad)));
    }
    Ok(())
}

impl MutationExecutor {
    /// Complete a layer for a zone with the weather at application time.
    /// Layers are validated in order.
    pub async fn validate_layer(
        &self,
        system_id: &PaintingSystemId,
        layer_name: &str,
        zone_id: &ZoneId,
        weather: AmbientConditions,
    ) -> Result<DateTime<Utc>> {
        let mut validated = None;
        let slot = &mut validated;
        self.update::<PaintingSystem, _>(system_id.as_str(), move |ctx, system| {
            require_zone_of_unit(ctx, &system.unit_id, zone_id)?;
            let Some(position) = system.layers.iter().position(|l| l.name == layer_name) else {
                let reason = format!("painting system {} has no layer {}", system.id, layer_name);
                return Err(SyncError::precondition(reason));
            };
            if let Some(pending) = system.layers[..position]
                .iter()
                .find(|l| l.status != LayerStatus::Completed)
            {
                return Err(SyncError::precondition(format!(
                    "layer {} must be validated before {}",
                    pending.name, layer_name
                )));
            }

            let layer = &mut system.layers[position];
            if let (LayerStatus::Completed, Some(at)) = (layer.status, layer.validated_at) {
                *slot = Some(at);
                return Ok(());
            }
            layer.status = LayerStatus::Completed;
            layer.validated_at = Some(ctx.now);
            layer.validated_zone = Some(zone_id.clone());
            layer.weather = Some(weather);
            *slot = Some(ctx.now);
            Ok(())
        })
        .await?;

        validated.ok_or_else(|| system_missing(system_id))
    }

    pub async fn upload_layer_photo(
        &self,
        system_id: &PaintingSystemId,
        layer_name: &str,
        upload: ImageUpload,
    ) -> Result<ImageRef> {
        let path = upload.storage_path(&format!("painting/{}", system_id), layer_name);
        let before: Vec<ImageRef> = self
            .store
            .entity::<PaintingSystem>(system_id.as_str())
            .and_then(|s| s.layer(layer_name).map(|l| l.photos.clone()))
            .unwrap_or_default();
        if before.len() >= MAX_LAYER_PHOTOS {
            debug!(
                "Layer {} of {} already has {} photos",
                layer_name,
                system_id,
                before.len()
            );
        }

        let outcome = self
            .attach_image(
                EntityKind::PaintingSystems,
                system_id.as_str(),
                &path,
                upload,
                |_, current, image| {
                    let mut system = current
                        .and_then(PaintingSystem::from_record_ref)
                        .cloned()
                        .ok_or_else(|| system_missing(system_id))?;
                    let layer = system
                        .layers
                        .iter_mut()
                        .find(|l| l.name == layer_name)
                        .ok_or_else(|| layer_missing(layer_name))?;
                    layer.photos.push(image.clone());
                    Ok(Some(system.into()))
                },
            )
            .await?;

        let added = outcome.value_as::<PaintingSystem>().and_then(|system| {
            system.layer(layer_name).and_then(|layer| {
                layer
                    .photos
                    .iter()
                    .find(|p| p.is_durable() && !before.contains(p))
                    .cloned()
            })
        });
        match added {
            Some(image) => Ok(image),
            None => self.fail(SyncError::conflict(
                EntityKind::PaintingSystems,
                system_id.as_str(),
                RemoteWriteError::new("photo replaced before the upload finished"),
            )),
        }
    }

    /// Record a DFT control. The target thickness comes from the unit's
    /// painting system; average and pass/fail are derived.
    pub async fn record_coating_control(
        &self,
        unit_id: &UnitId,
        zone_id: &ZoneId,
        layer_name: &str,
        readings: Vec<f64>,
        ambient: AmbientConditions,
    ) -> Result<CoatingControl> {
        let id = CoatingControlId::new();
        let mut recorded = None;
        let slot = &mut recorded;

        self.mutate(EntityKind::CoatingControls, id.as_str(), |ctx, _| {
            check_readings(&readings)?;
            require_zone_of_unit(ctx, unit_id, zone_id)?;
            let target = ctx
                .store
                .all::<PaintingSystem>()
                .filter(|s| &s.unit_id == unit_id)
                .find_map(|s| s.layer(layer_name))
                .map(|l| l.target_thickness);
            let Some(target) = target else {
                let reason = format!("unit {} has no painting layer {}", unit_id, layer_name);
                return Err(SyncError::precondition(reason));
            };

            let control = CoatingControl {
                id: id.clone(),
                project_id: ctx.scope.clone(),
                unit_id: unit_id.clone(),
                zone_id: zone_id.clone(),
                layer_name: layer_name.to_string(),
                average: CoatingControl::average_of(&readings),
                status: CoatingControl::evaluate(&readings, target),
                readings,
                ambient,
                images: Vec::new(),
                created_at: ctx.now,
            };
            *slot = Some(control.clone());
            Ok(Some(control.into()))
        })
        .await?;

        recorded.ok_or_else(|| SyncError::not_found(EntityKind::CoatingControls, id.as_str()))
    }

    pub async fn delete_coating_control(&self, id: &CoatingControlId) -> Result<MutationOutcome> {
        self.delete::<CoatingControl>(id.as_str()).await
    }
}
