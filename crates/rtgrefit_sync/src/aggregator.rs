//! Zone Aggregator
//!
//! Reshapes the flat inspection, zone and work-order slices into per-zone
//! views. Every editor reads zones through here, so they all agree on which
//! points, image and validation state a zone has.
//!
//! Merge rules for one (unit, zone):
//! - points from legacy findings first, then structured ones; a point id seen
//!   twice keeps its first position and its last value
//! - image and `validated_at` come from structured findings, the record this
//!   client writes winning over older ones; the Zone entity is the fallback
//! - once any source carries a validation timestamp the zone stays validated

use crate::store::{LocalStore, SharedStore};
use chrono::{DateTime, Utc};
use rtgrefit_protocol::{
    CorrosionPoint, FindingsShape, ImageRef, InspectionRecord, LayerStatus, PaintingSystem,
    ScopeKey, Severity, UnitId, WorkOrder, WorkOrderStatus, Zone, ZoneFindings, ZoneId,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "at", rename_all = "lowercase")]
pub enum ValidationState {
    Unvalidated,
    Validated(DateTime<Utc>),
}

impl ValidationState {
    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            ValidationState::Unvalidated => None,
            ValidationState::Validated(at) => Some(*at),
        }
    }

    pub fn is_validated(&self) -> bool {
        matches!(self, ValidationState::Validated(_))
    }
}

impl From<Option<DateTime<Utc>>> for ValidationState {
    fn from(at: Option<DateTime<Utc>>) -> Self {
        at.map_or(ValidationState::Unvalidated, ValidationState::Validated)
    }
}

/// Everything an editor needs to render one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneView {
    pub unit_id: UnitId,
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub position: u32,
    pub points: Vec<CorrosionPoint>,
    pub image: Option<ImageRef>,
    pub validation: ValidationState,
}

// ============================================================================
// Pure derivation
// ============================================================================

/// Findings for `zone_id` across the unit's inspection records, ordered so
/// that later sources win.
fn sources<'a>(
    unit_id: &UnitId,
    zone_id: &ZoneId,
    inspections: &[&'a InspectionRecord],
) -> Vec<&'a ZoneFindings> {
    let canonical = InspectionRecord::id_for_unit(unit_id);
    let mut found: Vec<(bool, bool, &str, &ZoneFindings)> = inspections
        .iter()
        .copied()
        .filter(|record| &record.unit_id == unit_id)
        .filter_map(|record| {
            record.findings.get(zone_id).map(|findings| {
                (
                    findings.shape == FindingsShape::Structured,
                    record.id == canonical,
                    record.id.as_str(),
                    findings,
                )
            })
        })
        .collect();
    found.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
    found.into_iter().map(|(_, _, _, findings)| findings).collect()
}

fn merge(
    unit_id: &UnitId,
    zone_id: &ZoneId,
    zone: Option<&Zone>,
    inspections: &[&InspectionRecord],
) -> ZoneView {
    let sources = sources(unit_id, zone_id, inspections);

    let mut points: Vec<CorrosionPoint> = Vec::new();
    for point in sources.iter().flat_map(|f| f.points.iter()) {
        match points.iter_mut().find(|p| p.id == point.id) {
            Some(existing) => *existing = point.clone(),
            None => points.push(point.clone()),
        }
    }

    let structured = sources
        .iter()
        .filter(|f| f.shape == FindingsShape::Structured);
    let image = structured
        .clone()
        .filter_map(|f| f.image.clone())
        .last()
        .or_else(|| zone.and_then(|z| z.image_url.clone()));
    let validated_at = structured
        .filter_map(|f| f.validated_at)
        .max()
        .or_else(|| zone.and_then(|z| z.validated_at));

    ZoneView {
        unit_id: unit_id.clone(),
        zone_id: zone_id.clone(),
        zone_name: zone.map_or_else(|| zone_id.to_string(), |z| z.name.clone()),
        position: zone.map_or(u32::MAX, |z| z.position),
        points,
        image,
        validation: validated_at.into(),
    }
}

/// Views for every zone of a unit in display order, followed by findings
/// whose zone no longer exists.
pub fn aggregate(
    unit_id: &UnitId,
    inspections: &[InspectionRecord],
    zones: &[Zone],
) -> Vec<ZoneView> {
    let records: Vec<&InspectionRecord> = inspections
        .iter()
        .filter(|r| &r.unit_id == unit_id)
        .collect();

    let mut unit_zones: Vec<&Zone> = zones.iter().filter(|z| &z.unit_id == unit_id).collect();
    unit_zones.sort_by(|a, b| (a.position, &a.id).cmp(&(b.position, &b.id)));
    let known: BTreeSet<&ZoneId> = unit_zones.iter().map(|z| &z.id).collect();

    let orphans: BTreeSet<&ZoneId> = records
        .iter()
        .flat_map(|r| r.findings.keys())
        .filter(|zone_id| !known.contains(zone_id))
        .collect();

    let mut views: Vec<ZoneView> = unit_zones
        .iter()
        .map(|zone| merge(unit_id, &zone.id, Some(*zone), &records))
        .collect();
    for zone_id in orphans {
        views.push(merge(unit_id, zone_id, None, &records));
    }
    views
}

/// Inverse of [`aggregate`]: one record in the current shape carrying every
/// view's findings.
pub fn flatten(project_id: &ScopeKey, unit_id: &UnitId, views: &[ZoneView]) -> InspectionRecord {
    let mut record = InspectionRecord::new(project_id.clone(), unit_id.clone());
    for view in views {
        let findings = record.zone_mut(&view.zone_id);
        findings.points = view.points.clone();
        findings.image = view.image.clone();
        findings.validated_at = view.validation.at();
    }
    record
}

/// Merged view of one zone straight from the store.
pub fn merge_zone(store: &LocalStore, unit_id: &UnitId, zone_id: &ZoneId) -> ZoneView {
    let zone = store
        .entity::<Zone>(zone_id.as_str())
        .filter(|z| &z.unit_id == unit_id);
    let records: Vec<&InspectionRecord> = store
        .all::<InspectionRecord>()
        .filter(|r| &r.unit_id == unit_id)
        .collect();
    merge(unit_id, zone_id, zone, &records)
}

// ============================================================================
// Store-backed aggregator
// ============================================================================

/// Report figures for one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitProgress {
    pub unit_id: UnitId,
    pub zones_total: usize,
    pub zones_validated: usize,
    pub points_by_severity: BTreeMap<Severity, usize>,
    pub work_orders_total: usize,
    pub work_orders_completed: usize,
    pub checklist_done: usize,
    pub checklist_total: usize,
    pub layers_total: usize,
    pub layers_completed: usize,
}

impl UnitProgress {
    pub fn point_count(&self) -> usize {
        self.points_by_severity.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct ZoneAggregator {
    store: SharedStore,
}

impl ZoneAggregator {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn points_for(&self, unit_id: &UnitId, zone_id: &ZoneId) -> Vec<CorrosionPoint> {
        self.store.read(|s| merge_zone(s, unit_id, zone_id).points)
    }

    pub fn image_for(&self, unit_id: &UnitId, zone_id: &ZoneId) -> Option<ImageRef> {
        self.store.read(|s| merge_zone(s, unit_id, zone_id).image)
    }

    /// Unit is taken from the zone entity, or from whichever inspection has
    /// findings for the zone.
    pub fn validation_state_for(&self, zone_id: &ZoneId) -> ValidationState {
        self.store.read(|s| {
            let unit_id = s
                .entity::<Zone>(zone_id.as_str())
                .map(|z| z.unit_id.clone())
                .or_else(|| {
                    s.all::<InspectionRecord>()
                        .find(|r| r.findings.contains_key(zone_id))
                        .map(|r| r.unit_id.clone())
                });
            match unit_id {
                Some(unit_id) => merge_zone(s, &unit_id, zone_id).validation,
                None => ValidationState::Unvalidated,
            }
        })
    }

    pub fn zone_views(&self, unit_id: &UnitId) -> Vec<ZoneView> {
        self.store.read(|s| {
            let inspections: Vec<InspectionRecord> = s.all::<InspectionRecord>().cloned().collect();
            let zones: Vec<Zone> = s.all::<Zone>().cloned().collect();
            aggregate(unit_id, &inspections, &zones)
        })
    }

    pub fn unit_progress(&self, unit_id: &UnitId) -> UnitProgress {
        let views = self.zone_views(unit_id);
        let mut points_by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        for point in views.iter().flat_map(|v| v.points.iter()) {
            *points_by_severity.entry(point.severity).or_default() += 1;
        }

        self.store.read(|s| {
            let orders: Vec<&WorkOrder> = s
                .all::<WorkOrder>()
                .filter(|w| &w.unit_id == unit_id)
                .collect();
            let (checklist_done, checklist_total) = orders
                .iter()
                .map(|w| w.checklist_progress())
                .fold((0, 0), |(d, t), (dd, tt)| (d + dd, t + tt));
            let layers: Vec<_> = s
                .all::<PaintingSystem>()
                .filter(|p| &p.unit_id == unit_id)
                .flat_map(|p| p.layers.iter())
                .collect();

            UnitProgress {
                unit_id: unit_id.clone(),
                zones_total: views.len(),
                zones_validated: views
                    .iter()
                    .filter(|v| v.validation.is_validated())
                    .count(),
                points_by_severity,
                work_orders_total: orders.len(),
                work_orders_completed: orders
                    .iter()
                    .filter(|w| w.status == WorkOrderStatus::Completed)
                    .count(),
                checklist_done,
                checklist_total,
                layers_total: layers.len(),
                layers_completed: layers
                    .iter()
                    .filter(|l| l.status == LayerStatus::Completed)
                    .count(),
            }
        })
    }
}
