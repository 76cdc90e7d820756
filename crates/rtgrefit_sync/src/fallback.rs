//! Fallback Dataset Provider
//!
//! Deterministic demo data used when nobody is signed in. The same
//! [`SeedConfig`] always yields the same dataset: randomness comes from a
//! ChaCha RNG seeded from the config, ids are derived from positions, and
//! every timestamp is an offset from a fixed base instant.

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rtgrefit_protocol::defaults::{
    DEFAULT_FALLBACK_SEED, DEFAULT_FALLBACK_UNITS, FALLBACK_BASE_TIME, STANDARD_LAYERS,
    STANDARD_TASKS, STANDARD_ZONES,
};
use rtgrefit_protocol::{
    AmbientConditions, CoatingControl, CoatingControlId, CorrosionPoint, EntityKind,
    EquipmentUnit, ImageRef, InspectionRecord, LayerStatus, PaintLayer, PaintingSystem,
    PaintingSystemId, PointId, Record, ScopeKey, Severity, UnitId, UnitStatus, User, UserId,
    UserRole, WorkOrder, WorkOrderId, WorkOrderStatus, Zone, ZoneId,
};
use std::collections::BTreeMap;

pub const DEMO_SCOPE: &str = "demo";
const DEMO_STORAGE: &str = "https://storage.rtgrefit.local/demo";

const LOCATIONS: &[&str] = &["Yard A", "Yard B", "Quay 3", "Workshop"];
const NOTES: &[&str] = &[
    "surface rust",
    "paint blistering",
    "pitting near weld seam",
    "flaking coating",
    "rust bleed at bolt heads",
];

fn checklist_for(task: &str) -> &'static [&'static str] {
    match task {
        "washing" => &["rinse", "degrease", "dry"],
        "sandblasting" => &["mask", "blast", "dust off"],
        "painting" => &["primer", "intermediate", "topcoat"],
        "corrosion inspection" => &["survey", "photograph", "report"],
        _ => &["dft readings", "adhesion test", "sign-off"],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedConfig {
    pub seed: u64,
    pub unit_count: usize,
    pub project: ScopeKey,
    pub base_time: DateTime<Utc>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_FALLBACK_SEED,
            unit_count: DEFAULT_FALLBACK_UNITS,
            project: ScopeKey::from(DEMO_SCOPE),
            base_time: DateTime::parse_from_rfc3339(FALLBACK_BASE_TIME)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default(),
        }
    }
}

impl SeedConfig {
    pub fn new(seed: u64, unit_count: usize) -> Self {
        Self {
            seed,
            unit_count,
            ..Self::default()
        }
    }
}

/// Every slice of a demo project. All slices are present, possibly empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FallbackDataset {
    pub units: Vec<EquipmentUnit>,
    pub zones: Vec<Zone>,
    pub work_orders: Vec<WorkOrder>,
    pub painting_systems: Vec<PaintingSystem>,
    pub inspections: Vec<InspectionRecord>,
    pub coating_controls: Vec<CoatingControl>,
    pub users: Vec<User>,
}

impl FallbackDataset {
    /// (kind, records) for every kind, in `EntityKind::ALL` order.
    pub fn slices(&self) -> Vec<(EntityKind, Vec<Record>)> {
        fn records<T: Clone + Into<Record>>(items: &[T]) -> Vec<Record> {
            items.iter().cloned().map(Into::into).collect()
        }
        EntityKind::ALL
            .into_iter()
            .map(|kind| {
                let records = match kind {
                    EntityKind::Units => records(&self.units),
                    EntityKind::Zones => records(&self.zones),
                    EntityKind::WorkOrders => records(&self.work_orders),
                    EntityKind::PaintingSystems => records(&self.painting_systems),
                    EntityKind::CoatingControls => records(&self.coating_controls),
                    EntityKind::Inspections => records(&self.inspections),
                    EntityKind::Users => records(&self.users),
                };
                (kind, records)
            })
            .collect()
    }
}

pub fn generate(config: &SeedConfig) -> FallbackDataset {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut data = FallbackDataset {
        users: users(),
        ..FallbackDataset::default()
    };

    for n in 1..=config.unit_count {
        let unit = unit(config, n, &mut rng);
        let zones = zones(config, &unit, &mut rng);
        let orders = work_orders(config, &unit, &mut rng);
        data.work_orders.extend(orders);

        let system = painting_system(config, &unit, &mut rng);
        let controls = coating_controls(config, &unit, &zones, &system, &mut rng);
        data.coating_controls.extend(controls);
        let record = inspection(config, &unit, &zones, &mut rng);
        data.inspections.push(record);

        data.painting_systems.push(system);
        data.zones.extend(zones);
        data.units.push(unit);
    }
    data
}

fn minutes(config: &SeedConfig, offset: i64) -> DateTime<Utc> {
    config.base_time + Duration::minutes(offset)
}

fn unit(config: &SeedConfig, n: usize, rng: &mut ChaCha8Rng) -> EquipmentUnit {
    const STATUSES: [UnitStatus; 6] = [
        UnitStatus::Pending,
        UnitStatus::InProgress,
        UnitStatus::Cleaning,
        UnitStatus::Painting,
        UnitStatus::Issue,
        UnitStatus::Completed,
    ];
    let created = minutes(config, n as i64 * 60);
    let location = LOCATIONS.choose(rng).copied().unwrap_or("Yard A");
    EquipmentUnit {
        id: UnitId::from(format!("rtg-{:02}", n).as_str()),
        project_id: config.project.clone(),
        name: format!("RTG {:02}", n),
        status: *STATUSES.choose(rng).unwrap_or(&UnitStatus::Pending),
        location: location.to_string(),
        created_at: created,
        updated_at: created + Duration::minutes(rng.gen_range(0..600)),
    }
}

fn zones(config: &SeedConfig, unit: &EquipmentUnit, rng: &mut ChaCha8Rng) -> Vec<Zone> {
    STANDARD_ZONES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let id = format!("{}-z{}", unit.id, i + 1);
            let image_url = rng
                .gen_bool(0.5)
                .then(|| ImageRef::remote(format!("{}/{}/{}.jpg", DEMO_STORAGE, unit.id, id)));
            let validated_at = (image_url.is_some() && rng.gen_bool(0.5))
                .then(|| unit.created_at + Duration::minutes(rng.gen_range(60..2880)));
            Zone {
                id: ZoneId::from(id.as_str()),
                project_id: config.project.clone(),
                unit_id: unit.id.clone(),
                name: name.to_string(),
                position: i as u32,
                image_url,
                validated_at,
            }
        })
        .collect()
}

fn work_orders(config: &SeedConfig, unit: &EquipmentUnit, rng: &mut ChaCha8Rng) -> Vec<WorkOrder> {
    const STATUSES: [WorkOrderStatus; 3] = [
        WorkOrderStatus::Pending,
        WorkOrderStatus::InProgress,
        WorkOrderStatus::Completed,
    ];
    STANDARD_TASKS
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let status = *STATUSES.choose(rng).unwrap_or(&WorkOrderStatus::Pending);
            let checklist: BTreeMap<String, bool> = checklist_for(task)
                .iter()
                .map(|item| {
                    let done = match status {
                        WorkOrderStatus::Pending => false,
                        WorkOrderStatus::InProgress => rng.gen_bool(0.5),
                        WorkOrderStatus::Completed => true,
                    };
                    (item.to_string(), done)
                })
                .collect();
            let created = unit.created_at + Duration::minutes(i as i64 * 15);
            WorkOrder {
                id: WorkOrderId::from(format!("{}-wo{}", unit.id, i + 1).as_str()),
                project_id: config.project.clone(),
                unit_id: unit.id.clone(),
                title: task.to_string(),
                status,
                checklist,
                photos: BTreeMap::new(),
                validated_at: (status == WorkOrderStatus::Completed)
                    .then(|| created + Duration::hours(8)),
                created_at: created,
            }
        })
        .collect()
}

fn painting_system(
    config: &SeedConfig,
    unit: &EquipmentUnit,
    rng: &mut ChaCha8Rng,
) -> PaintingSystem {
    let completed = rng.gen_range(0..=STANDARD_LAYERS.len());
    let layers = STANDARD_LAYERS
        .iter()
        .enumerate()
        .map(|(i, (name, target))| {
            let mut layer = PaintLayer::new(*name, *target);
            if i < completed {
                layer.status = LayerStatus::Completed;
                layer.validated_at = Some(unit.created_at + Duration::days(i as i64 + 1));
                layer.validated_zone = Some(ZoneId::from(format!("{}-z1", unit.id).as_str()));
                layer.weather = Some(ambient(rng));
            }
            layer
        })
        .collect();
    PaintingSystem {
        id: PaintingSystemId::from(format!("{}-ps", unit.id).as_str()),
        project_id: config.project.clone(),
        unit_id: unit.id.clone(),
        system_type: "exterior".to_string(),
        layers,
    }
}

fn ambient(rng: &mut ChaCha8Rng) -> AmbientConditions {
    let temperature_c = (rng.gen_range(80..280) as f64) / 10.0;
    let humidity_pct = rng.gen_range(35..85) as f64;
    AmbientConditions {
        temperature_c,
        humidity_pct,
        dew_point_c: Some(temperature_c - (100.0 - humidity_pct) / 5.0),
    }
}

fn coating_controls(
    config: &SeedConfig,
    unit: &EquipmentUnit,
    zones: &[Zone],
    system: &PaintingSystem,
    rng: &mut ChaCha8Rng,
) -> Vec<CoatingControl> {
    system
        .layers
        .iter()
        .filter(|layer| layer.status == LayerStatus::Completed)
        .enumerate()
        .filter_map(|(i, layer)| {
            let zone = zones.choose(rng)?;
            let count = rng.gen_range(3..=5);
            let readings: Vec<f64> = (0..count)
                .map(|_| {
                    let spread = rng.gen_range(-15..=15) as f64 / 100.0;
                    (layer.target_thickness * (1.0 + spread)).round()
                })
                .collect();
            Some(CoatingControl {
                id: CoatingControlId::from(format!("{}-dft{}", unit.id, i + 1).as_str()),
                project_id: config.project.clone(),
                unit_id: unit.id.clone(),
                zone_id: zone.id.clone(),
                layer_name: layer.name.clone(),
                average: CoatingControl::average_of(&readings),
                status: CoatingControl::evaluate(&readings, layer.target_thickness),
                readings,
                ambient: layer.weather.clone().unwrap_or_else(|| ambient(rng)),
                images: Vec::new(),
                created_at: layer.validated_at.unwrap_or(unit.created_at),
            })
        })
        .collect()
}

fn inspection(
    config: &SeedConfig,
    unit: &EquipmentUnit,
    zones: &[Zone],
    rng: &mut ChaCha8Rng,
) -> InspectionRecord {
    let mut record = InspectionRecord::new(config.project.clone(), unit.id.clone());
    for zone in zones {
        let count = rng.gen_range(0..=3);
        let findings = record.zone_mut(&zone.id);
        for k in 1..=count {
            let point = CorrosionPoint {
                id: PointId::from(format!("{}-p{}", zone.id, k).as_str()),
                unit_id: unit.id.clone(),
                zone_id: zone.id.clone(),
                x: rng.gen_range(0..=1000) as f64 / 10.0,
                y: rng.gen_range(0..=1000) as f64 / 10.0,
                severity: *Severity::ALL.choose(rng).unwrap_or(&Severity::Low),
                notes: NOTES.choose(rng).copied().unwrap_or("rust").to_string(),
                created_at: unit.created_at + Duration::minutes(30 + k as i64),
            };
            findings.points.push(point);
        }
        findings.image = zone.image_url.clone();
        findings.validated_at = zone.validated_at;
    }
    record.updated_at = Some(minutes(config, 0));
    record
}

fn users() -> Vec<User> {
    [
        ("user-1", "Marta Ruiz", "marta@rtgrefit.local", UserRole::Admin),
        ("user-2", "Jonas Berg", "jonas@rtgrefit.local", UserRole::Inspector),
        ("user-3", "Ade Okafor", "ade@rtgrefit.local", UserRole::Operator),
    ]
    .into_iter()
    .map(|(id, name, email, role)| User {
        id: UserId::from(id),
        name: name.to_string(),
        email: email.to_string(),
        role,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let config = SeedConfig::default();
        assert_eq!(generate(&config), generate(&config));
        let other = SeedConfig::new(7, DEFAULT_FALLBACK_UNITS);
        assert_ne!(generate(&config), generate(&other));
    }

    #[test]
    fn test_every_slice_is_present() {
        let data = generate(&SeedConfig::new(1, 3));
        let slices = data.slices();
        assert_eq!(slices.len(), EntityKind::ALL.len());
        assert_eq!(data.units.len(), 3);
        assert_eq!(data.zones.len(), 3 * STANDARD_ZONES.len());
        assert_eq!(data.work_orders.len(), 3 * STANDARD_TASKS.len());
        assert_eq!(data.inspections.len(), 3);
        assert!(!data.users.is_empty());

        let empty = generate(&SeedConfig::new(1, 0));
        assert!(empty.units.is_empty());
        assert_eq!(empty.slices().len(), EntityKind::ALL.len());
    }

    #[test]
    fn test_referential_integrity() {
        let data = generate(&SeedConfig::default());
        let points = data
            .inspections
            .iter()
            .flat_map(|r| r.findings.values())
            .flat_map(|f| f.points.iter());
        for point in points {
            let zone = data.zones.iter().find(|z| z.id == point.zone_id).unwrap();
            assert_eq!(zone.unit_id, point.unit_id);
            assert!(point.x >= 0.0 && point.x <= 100.0);
            assert!(!point.notes.is_empty());
        }
        for zone in &data.zones {
            if zone.validated_at.is_some() {
                assert!(zone.image_url.is_some());
            }
        }
        assert!(data.units.iter().all(|u| u.project_id.as_str() == DEMO_SCOPE));
    }
}
