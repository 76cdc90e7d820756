//! Record builders shared by unit tests.

use chrono::{DateTime, TimeZone, Utc};
use rtgrefit_protocol::{
    CorrosionPoint, EquipmentUnit, ImageRef, InspectionRecord, PaintLayer, PaintingSystem,
    PointId, ScopeKey, Severity, UnitId, UnitStatus, WorkOrder, WorkOrderId, WorkOrderStatus,
    Zone, ZoneId,
};
use std::collections::BTreeMap;

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, minute, 0).unwrap()
}

pub fn unit(project: &str, id: &str) -> EquipmentUnit {
    EquipmentUnit {
        id: UnitId::from(id),
        project_id: ScopeKey::from(project),
        name: format!("Unit {}", id),
        status: UnitStatus::Pending,
        location: "Yard A".to_string(),
        created_at: at(0),
        updated_at: at(0),
    }
}

pub fn zone(project: &str, unit: &str, id: &str, position: u32) -> Zone {
    Zone {
        id: ZoneId::from(id),
        project_id: ScopeKey::from(project),
        unit_id: UnitId::from(unit),
        name: format!("Zone {}", id),
        position,
        image_url: None,
        validated_at: None,
    }
}

pub fn work_order(project: &str, unit: &str, id: &str) -> WorkOrder {
    WorkOrder {
        id: WorkOrderId::from(id),
        project_id: ScopeKey::from(project),
        unit_id: UnitId::from(unit),
        title: "washing".to_string(),
        status: WorkOrderStatus::Pending,
        checklist: BTreeMap::new(),
        photos: BTreeMap::new(),
        validated_at: None,
        created_at: at(0),
    }
}

pub fn point(unit: &str, zone: &str, id: &str, severity: Severity) -> CorrosionPoint {
    CorrosionPoint {
        id: PointId::from(id),
        unit_id: UnitId::from(unit),
        zone_id: ZoneId::from(zone),
        x: 10.0,
        y: 20.0,
        severity,
        notes: format!("point {}", id),
        created_at: at(1),
    }
}

pub fn inspection(project: &str, unit: &str) -> InspectionRecord {
    InspectionRecord::new(ScopeKey::from(project), UnitId::from(unit))
}

pub fn remote_image(name: &str) -> ImageRef {
    ImageRef::remote(format!("https://storage.test/{}", name))
}

pub fn painting_system(project: &str, unit: &str, id: &str) -> PaintingSystem {
    PaintingSystem {
        id: id.into(),
        project_id: ScopeKey::from(project),
        unit_id: UnitId::from(unit),
        system_type: "exterior".to_string(),
        layers: vec![PaintLayer::new("Primer", 80.0), PaintLayer::new("Topcoat", 60.0)],
    }
}
