//! Inspection records and the two historical shapes of their findings.
//!
//! Older clients stored each zone's findings as a bare list of points; the
//! current shape is `{points, imageUrl, validated_at}`. Both are parsed into
//! [`ZoneFindings`] at deserialization time so nothing downstream branches on
//! shape. Records are always serialized in the current shape.

use crate::images::{swap_in_slot, ImageRef};
use crate::types::{CorrosionPoint, Severity};
use chrono::{DateTime, Utc};
use rtgrefit_ids::{InspectionId, PointId, ScopeKey, UnitId, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which shape a zone's findings arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FindingsShape {
    Legacy,
    #[default]
    Structured,
}

/// Normalized findings for one zone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneFindings {
    pub points: Vec<CorrosionPoint>,
    pub image: Option<ImageRef>,
    pub validated_at: Option<DateTime<Utc>>,
    pub shape: FindingsShape,
}

impl ZoneFindings {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.image.is_none() && self.validated_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "InspectionWire", into = "InspectionWire")]
pub struct InspectionRecord {
    pub id: InspectionId,
    pub project_id: ScopeKey,
    pub unit_id: UnitId,
    pub findings: BTreeMap<ZoneId, ZoneFindings>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl InspectionRecord {
    /// Id of the record this client writes for a unit. Legacy records under
    /// other ids are still read and merged.
    pub fn id_for_unit(unit_id: &UnitId) -> InspectionId {
        InspectionId::from(format!("inspection-{}", unit_id).as_str())
    }

    pub fn new(project_id: ScopeKey, unit_id: UnitId) -> Self {
        Self {
            id: Self::id_for_unit(&unit_id),
            project_id,
            unit_id,
            findings: BTreeMap::new(),
            updated_at: None,
        }
    }

    /// Findings for a zone, created in the current shape on first touch.
    pub fn zone_mut(&mut self, zone_id: &ZoneId) -> &mut ZoneFindings {
        let findings = self.findings.entry(zone_id.clone()).or_default();
        findings.shape = FindingsShape::Structured;
        findings
    }

    pub fn point_count(&self) -> usize {
        self.findings.values().map(|f| f.points.len()).sum()
    }

    pub fn severity_count(&self, severity: Severity) -> usize {
        self.findings
            .values()
            .flat_map(|f| f.points.iter())
            .filter(|p| p.severity == severity)
            .count()
    }

    pub(crate) fn swap_image(&mut self, from: &ImageRef, to: Option<&ImageRef>) -> bool {
        let mut changed = false;
        for findings in self.findings.values_mut() {
            changed |= swap_in_slot(&mut findings.image, from, to);
        }
        changed
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

/// Point as stored inside findings; older documents omit the owning unit
/// and zone because the map key already carries them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointWire {
    id: PointId,
    #[serde(default, rename = "rtgId", skip_serializing_if = "Option::is_none")]
    unit_id: Option<UnitId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    zone_id: Option<ZoneId>,
    x: f64,
    y: f64,
    severity: Severity,
    #[serde(default)]
    notes: String,
    #[serde(alias = "date")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FindingsWire {
    Legacy(Vec<PointWire>),
    Structured {
        #[serde(default)]
        points: Vec<PointWire>,
        #[serde(default, rename = "imageUrl", skip_serializing_if = "Option::is_none")]
        image_url: Option<ImageRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        validated_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectionWire {
    id: InspectionId,
    project_id: ScopeKey,
    #[serde(rename = "rtgId")]
    unit_id: UnitId,
    #[serde(default)]
    findings: BTreeMap<ZoneId, FindingsWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl PointWire {
    fn into_point(self, unit_id: &UnitId, zone_id: &ZoneId) -> CorrosionPoint {
        CorrosionPoint {
            id: self.id,
            unit_id: unit_id.clone(),
            // The map key wins over whatever the point claims.
            zone_id: zone_id.clone(),
            x: self.x,
            y: self.y,
            severity: self.severity,
            notes: self.notes,
            created_at: self.created_at,
        }
    }
}

impl From<CorrosionPoint> for PointWire {
    fn from(point: CorrosionPoint) -> Self {
        Self {
            id: point.id,
            unit_id: Some(point.unit_id),
            zone_id: Some(point.zone_id),
            x: point.x,
            y: point.y,
            severity: point.severity,
            notes: point.notes,
            created_at: point.created_at,
        }
    }
}

impl From<InspectionWire> for InspectionRecord {
    fn from(wire: InspectionWire) -> Self {
        let unit_id = wire.unit_id;
        let findings = wire
            .findings
            .into_iter()
            .map(|(zone_id, raw)| {
                let normalized = match raw {
                    FindingsWire::Legacy(points) => ZoneFindings {
                        points: points
                            .into_iter()
                            .map(|p| p.into_point(&unit_id, &zone_id))
                            .collect(),
                        image: None,
                        validated_at: None,
                        shape: FindingsShape::Legacy,
                    },
                    FindingsWire::Structured {
                        points,
                        image_url,
                        validated_at,
                    } => ZoneFindings {
                        points: points
                            .into_iter()
                            .map(|p| p.into_point(&unit_id, &zone_id))
                            .collect(),
                        image: image_url,
                        validated_at,
                        shape: FindingsShape::Structured,
                    },
                };
                (zone_id, normalized)
            })
            .collect();

        Self {
            id: wire.id,
            project_id: wire.project_id,
            unit_id,
            findings,
            updated_at: wire.updated_at,
        }
    }
}

impl From<InspectionRecord> for InspectionWire {
    fn from(record: InspectionRecord) -> Self {
        let findings = record
            .findings
            .into_iter()
            .map(|(zone_id, f)| {
                let wire = FindingsWire::Structured {
                    points: f.points.into_iter().map(PointWire::from).collect(),
                    image_url: f.image,
                    validated_at: f.validated_at,
                };
                (zone_id, wire)
            })
            .collect();

        Self {
            id: record.id,
            project_id: record.project_id,
            unit_id: record.unit_id,
            findings,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "x": 12.5,
            "y": 40.0,
            "severity": "high",
            "notes": "flaking",
            "date": "2024-03-04T07:30:00Z"
        })
    }

    #[test]
    fn test_legacy_findings_are_normalized() {
        let raw = json!({
            "id": "insp-old",
            "projectId": "P1",
            "rtgId": "U1",
            "findings": { "Z1": [point_json("p1"), point_json("p2")] }
        });
        let record: InspectionRecord = serde_json::from_value(raw).unwrap();
        let zone = &record.findings[&ZoneId::from("Z1")];
        assert_eq!(zone.shape, FindingsShape::Legacy);
        assert_eq!(zone.points.len(), 2);
        assert_eq!(zone.points[0].unit_id.as_str(), "U1");
        assert_eq!(zone.points[0].zone_id.as_str(), "Z1");
        assert!(zone.image.is_none());
    }

    #[test]
    fn test_structured_findings_are_normalized() {
        let raw = json!({
            "id": "insp-1",
            "projectId": "P1",
            "rtgId": "U1",
            "findings": {
                "Z2": {
                    "points": [point_json("p3")],
                    "imageUrl": "https://storage/z2.jpg",
                    "validated_at": "2024-03-05T10:00:00Z"
                },
                "Z3": {}
            }
        });
        let record: InspectionRecord = serde_json::from_value(raw).unwrap();
        let z2 = &record.findings[&ZoneId::from("Z2")];
        assert_eq!(z2.shape, FindingsShape::Structured);
        assert_eq!(z2.image, Some(ImageRef::remote("https://storage/z2.jpg")));
        assert!(z2.validated_at.is_some());
        assert!(record.findings[&ZoneId::from("Z3")].is_empty());
    }

    #[test]
    fn test_serializes_in_current_shape() {
        let raw = json!({
            "id": "insp-old",
            "projectId": "P1",
            "rtgId": "U1",
            "findings": { "Z1": [point_json("p1")] }
        });
        let record: InspectionRecord = serde_json::from_value(raw).unwrap();
        let out = serde_json::to_value(&record).unwrap();
        assert!(out["findings"]["Z1"]["points"].is_array());
        assert_eq!(out["findings"]["Z1"]["points"][0]["zoneId"], "Z1");
    }

    #[test]
    fn test_id_for_unit_is_stable() {
        let unit = UnitId::from("U9");
        let id = InspectionRecord::id_for_unit(&unit);
        assert_eq!(id.as_str(), "inspection-U9");
    }
}
