//! Domain records as they travel between the remote collections and the
//! local store.

use crate::defaults::{COORDINATE_MAX, COORDINATE_MIN, PHOTO_SET_AFTER, PHOTO_SET_BEFORE};
use crate::images::{swap_in_list, swap_in_slot, ImageRef};
use chrono::{DateTime, Utc};
use rtgrefit_ids::{
    CoatingControlId, PaintingSystemId, PointId, ScopeKey, UnitId, UserId, WorkOrderId, ZoneId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Canonical Enums
// ============================================================================

/// Lifecycle of an equipment unit on the refurbishment floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UnitStatus {
    #[default]
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
    Issue,
    Cleaning,
    Painting,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "Pending",
            UnitStatus::InProgress => "In Progress",
            UnitStatus::Completed => "Completed",
            UnitStatus::Issue => "Issue",
            UnitStatus::Cleaning => "Cleaning",
            UnitStatus::Painting => "Painting",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], " ").as_str() {
            "pending" => Ok(UnitStatus::Pending),
            "in progress" => Ok(UnitStatus::InProgress),
            "completed" => Ok(UnitStatus::Completed),
            "issue" => Ok(UnitStatus::Issue),
            "cleaning" => Ok(UnitStatus::Cleaning),
            "painting" => Ok(UnitStatus::Painting),
            _ => Err(format!("Invalid unit status: '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WorkOrderStatus {
    #[default]
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
}

impl WorkOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOrderStatus::Pending => "Pending",
            WorkOrderStatus::InProgress => "In Progress",
            WorkOrderStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Corrosion severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "Low")]
    Low,
    #[serde(alias = "Medium")]
    Medium,
    #[serde(alias = "High")]
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(format!("Invalid severity: '{}'. Expected: low, medium, or high", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LayerStatus {
    #[default]
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Inspector,
    #[default]
    Operator,
}

/// Photo set names. The vocabulary is closed; any other key found on a
/// record is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhotoSetKey {
    Before,
    After,
}

impl PhotoSetKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoSetKey::Before => PHOTO_SET_BEFORE,
            PhotoSetKey::After => PHOTO_SET_AFTER,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            PHOTO_SET_BEFORE => Some(PhotoSetKey::Before),
            PHOTO_SET_AFTER => Some(PhotoSetKey::After),
            _ => None,
        }
    }
}

impl fmt::Display for PhotoSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentUnit {
    pub id: UnitId,
    pub project_id: ScopeKey,
    pub name: String,
    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: ZoneId,
    pub project_id: ScopeKey,
    #[serde(rename = "rtgId")]
    pub unit_id: UnitId,
    pub name: String,
    /// Display order within the unit.
    #[serde(default)]
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageRef>,
    #[serde(
        default,
        rename = "validated_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated_at: Option<DateTime<Utc>>,
}

impl Zone {
    pub(crate) fn swap_image(&mut self, from: &ImageRef, to: Option<&ImageRef>) -> bool {
        swap_in_slot(&mut self.image_url, from, to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    pub id: WorkOrderId,
    pub project_id: ScopeKey,
    #[serde(rename = "rtgId")]
    pub unit_id: UnitId,
    pub title: String,
    #[serde(default)]
    pub status: WorkOrderStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checklist: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub photos: BTreeMap<String, Vec<ImageRef>>,
    #[serde(
        default,
        rename = "validated_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkOrder {
    pub fn photo_set(&self, key: PhotoSetKey) -> &[ImageRef] {
        self.photos.get(key.as_str()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn photo_set_mut(&mut self, key: PhotoSetKey) -> &mut Vec<ImageRef> {
        self.photos.entry(key.as_str().to_string()).or_default()
    }

    /// (done, total) over the checklist.
    pub fn checklist_progress(&self) -> (usize, usize) {
        let done = self.checklist.values().filter(|done| **done).count();
        (done, self.checklist.len())
    }

    pub(crate) fn swap_image(&mut self, from: &ImageRef, to: Option<&ImageRef>) -> bool {
        let mut changed = false;
        for set in self.photos.values_mut() {
            changed |= swap_in_list(set, from, to);
        }
        changed
    }
}

/// A single annotated defect within a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrosionPoint {
    pub id: PointId,
    #[serde(rename = "rtgId")]
    pub unit_id: UnitId,
    pub zone_id: ZoneId,
    pub x: f64,
    pub y: f64,
    pub severity: Severity,
    pub notes: String,
    #[serde(alias = "date")]
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields of a new corrosion point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointDraft {
    pub x: f64,
    pub y: f64,
    pub severity: Severity,
    pub notes: String,
}

impl PointDraft {
    pub fn new(x: f64, y: f64, severity: Severity, notes: impl Into<String>) -> Self {
        Self {
            x,
            y,
            severity,
            notes: notes.into(),
        }
    }

    /// Write-boundary checks: coordinates in range, notes present.
    pub fn check(&self) -> Result<(), String> {
        for (axis, value) in [("x", self.x), ("y", self.y)] {
            if !value.is_finite() || !(COORDINATE_MIN..=COORDINATE_MAX).contains(&value) {
                return Err(format!(
                    "{} coordinate {} outside {}..={}",
                    axis, value, COORDINATE_MIN, COORDINATE_MAX
                ));
            }
        }
        if self.notes.trim().is_empty() {
            return Err("corrosion point notes must not be empty".to_string());
        }
        Ok(())
    }
}

/// Weather or ambient readings captured alongside painting work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbientConditions {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dew_point_c: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintLayer {
    pub name: String,
    /// Target dry-film thickness in micrometres.
    pub target_thickness: f64,
    #[serde(default)]
    pub status: LayerStatus,
    #[serde(
        default,
        rename = "validated_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_zone: Option<ZoneId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<AmbientConditions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<ImageRef>,
}

impl PaintLayer {
    pub fn new(name: impl Into<String>, target_thickness: f64) -> Self {
        Self {
            name: name.into(),
            target_thickness,
            status: LayerStatus::Pending,
            validated_at: None,
            validated_zone: None,
            weather: None,
            photos: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintingSystem {
    pub id: PaintingSystemId,
    pub project_id: ScopeKey,
    #[serde(rename = "rtgId")]
    pub unit_id: UnitId,
    #[serde(rename = "type")]
    pub system_type: String,
    #[serde(default)]
    pub layers: Vec<PaintLayer>,
}

impl PaintingSystem {
    pub fn layer(&self, name: &str) -> Option<&PaintLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    pub(crate) fn swap_image(&mut self, from: &ImageRef, to: Option<&ImageRef>) -> bool {
        let mut changed = false;
        for layer in &mut self.layers {
            changed |= swap_in_list(&mut layer.photos, from, to);
        }
        changed
    }
}

/// Dry-film thickness quality-control record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoatingControl {
    pub id: CoatingControlId,
    pub project_id: ScopeKey,
    #[serde(rename = "rtgId")]
    pub unit_id: UnitId,
    pub zone_id: ZoneId,
    pub layer_name: String,
    pub readings: Vec<f64>,
    pub average: f64,
    pub ambient: AmbientConditions,
    pub status: ControlStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
    pub created_at: DateTime<Utc>,
}

impl CoatingControl {
    pub fn average_of(readings: &[f64]) -> f64 {
        if readings.is_empty() {
            return 0.0;
        }
        readings.iter().sum::<f64>() / readings.len() as f64
    }

    /// Pass when the mean reading reaches the target thickness.
    pub fn evaluate(readings: &[f64], target_thickness: f64) -> ControlStatus {
        if !readings.is_empty() && Self::average_of(readings) >= target_thickness {
            ControlStatus::Pass
        } else {
            ControlStatus::Fail
        }
    }

    pub(crate) fn swap_image(&mut self, from: &ImageRef, to: Option<&ImageRef>) -> bool {
        swap_in_list(&mut self.images, from, to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
}
