//! Entity kinds and the type-erased [`Record`] the store holds.

use crate::images::ImageRef;
use crate::inspection::InspectionRecord;
use crate::types::{CoatingControl, EquipmentUnit, PaintingSystem, User, WorkOrder, Zone};
use rtgrefit_ids::ScopeKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote collections mirrored by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Units,
    Zones,
    WorkOrders,
    PaintingSystems,
    CoatingControls,
    Inspections,
    Users,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Units,
        EntityKind::Zones,
        EntityKind::WorkOrders,
        EntityKind::PaintingSystems,
        EntityKind::CoatingControls,
        EntityKind::Inspections,
        EntityKind::Users,
    ];

    /// Kinds delivered by live project feeds. Users only exist in the
    /// fallback dataset.
    pub const FEEDS: [EntityKind; 6] = [
        EntityKind::Units,
        EntityKind::Zones,
        EntityKind::WorkOrders,
        EntityKind::PaintingSystems,
        EntityKind::CoatingControls,
        EntityKind::Inspections,
    ];

    /// Kinds persisted to the local cache.
    pub const CACHED: [EntityKind; 2] = [EntityKind::Units, EntityKind::WorkOrders];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Units => "units",
            EntityKind::Zones => "zones",
            EntityKind::WorkOrders => "work_orders",
            EntityKind::PaintingSystems => "painting_systems",
            EntityKind::CoatingControls => "coating_controls",
            EntityKind::Inspections => "inspections",
            EntityKind::Users => "users",
        }
    }

    pub fn is_cached(&self) -> bool {
        Self::CACHED.contains(self)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Invalid entity kind: '{}'", s))
    }
}

/// Identity of a record across kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub kind: EntityKind,
    pub id: String,
}

impl RecordKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Record {
    Unit(EquipmentUnit),
    Zone(Zone),
    WorkOrder(WorkOrder),
    PaintingSystem(PaintingSystem),
    CoatingControl(CoatingControl),
    Inspection(InspectionRecord),
    User(User),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Unit(_) => EntityKind::Units,
            Record::Zone(_) => EntityKind::Zones,
            Record::WorkOrder(_) => EntityKind::WorkOrders,
            Record::PaintingSystem(_) => EntityKind::PaintingSystems,
            Record::CoatingControl(_) => EntityKind::CoatingControls,
            Record::Inspection(_) => EntityKind::Inspections,
            Record::User(_) => EntityKind::Users,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Unit(r) => r.id.as_str(),
            Record::Zone(r) => r.id.as_str(),
            Record::WorkOrder(r) => r.id.as_str(),
            Record::PaintingSystem(r) => r.id.as_str(),
            Record::CoatingControl(r) => r.id.as_str(),
            Record::Inspection(r) => r.id.as_str(),
            Record::User(r) => r.id.as_str(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.kind(), self.id())
    }

    /// Owning project, if the kind is project-scoped.
    pub fn project_id(&self) -> Option<&ScopeKey> {
        match self {
            Record::Unit(r) => Some(&r.project_id),
            Record::Zone(r) => Some(&r.project_id),
            Record::WorkOrder(r) => Some(&r.project_id),
            Record::PaintingSystem(r) => Some(&r.project_id),
            Record::CoatingControl(r) => Some(&r.project_id),
            Record::Inspection(r) => Some(&r.project_id),
            Record::User(_) => None,
        }
    }

    /// Replace (or drop, when `to` is `None`) every occurrence of an image
    /// anywhere in the record. Returns whether anything changed.
    pub fn swap_image(&mut self, from: &ImageRef, to: Option<&ImageRef>) -> bool {
        match self {
            Record::Zone(r) => r.swap_image(from, to),
            Record::WorkOrder(r) => r.swap_image(from, to),
            Record::PaintingSystem(r) => r.swap_image(from, to),
            Record::CoatingControl(r) => r.swap_image(from, to),
            Record::Inspection(r) => r.swap_image(from, to),
            Record::Unit(_) | Record::User(_) => false,
        }
    }
}

/// Typed access to a [`Record`] variant.
pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn record_id(&self) -> &str;
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
    fn from_record_ref(record: &Record) -> Option<&Self>;
}

macro_rules! impl_entity {
    ($ty:ty, $variant:ident, $kind:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn record_id(&self) -> &str {
                self.id.as_str()
            }

            fn into_record(self) -> Record {
                Record::$variant(self)
            }

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn from_record_ref(record: &Record) -> Option<&Self> {
                match record {
                    Record::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Record {
            fn from(value: $ty) -> Self {
                Record::$variant(value)
            }
        }
    };
}

impl_entity!(EquipmentUnit, Unit, EntityKind::Units);
impl_entity!(Zone, Zone, EntityKind::Zones);
impl_entity!(WorkOrder, WorkOrder, EntityKind::WorkOrders);
impl_entity!(PaintingSystem, PaintingSystem, EntityKind::PaintingSystems);
impl_entity!(CoatingControl, CoatingControl, EntityKind::CoatingControls);
impl_entity!(InspectionRecord, Inspection, EntityKind::Inspections);
impl_entity!(User, User, EntityKind::Users);
