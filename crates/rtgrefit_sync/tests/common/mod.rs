//! Builders shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rtgrefit_protocol::{
    CorrosionPoint, EquipmentUnit, PointId, ScopeKey, Severity, UnitId, UnitStatus, WorkOrder,
    WorkOrderId, WorkOrderStatus, Zone, ZoneId,
};
use rtgrefit_sync::{MemoryGateway, SyncConfig, SyncSession};
use std::collections::BTreeMap;
use std::sync::Arc;

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 13, 9, minute, 0).unwrap()
}

pub fn unit(project: &str, id: &str) -> EquipmentUnit {
    EquipmentUnit {
        id: UnitId::from(id),
        project_id: ScopeKey::from(project),
        name: format!("RTG {}", id),
        status: UnitStatus::Pending,
        location: "Quay 3".to_string(),
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
        title: "sandblasting".to_string(),
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
        x: 25.0,
        y: 75.0,
        severity,
        notes: format!("finding {}", id),
        created_at: at(5),
    }
}

/// Config that never touches the real home directory.
pub fn config(home: &std::path::Path) -> SyncConfig {
    SyncConfig {
        home: home.to_path_buf(),
        ..SyncConfig::default()
    }
}

/// Live session over an in-memory remote seeded with one unit (U1, zones Z1
/// and Z2) in project P1.
pub fn live_session(home: &std::path::Path) -> (MemoryGateway, SyncSession) {
    let gateway = MemoryGateway::new();
    gateway.seed([
        unit("P1", "U1").into(),
        zone("P1", "U1", "Z1", 0).into(),
        zone("P1", "U1", "Z2", 1).into(),
        work_order("P1", "U1", "wo1").into(),
    ]);
    let session = SyncSession::new(config(home), Arc::new(gateway.clone()));
    (gateway, session)
}
