//! End-to-end scenarios over a live session backed by the in-memory remote.

mod common;

use common::{live_session, point, unit, work_order, zone};
use rtgrefit_protocol::{
    EntityKind, InspectionRecord, PointDraft, ScopeKey, Severity, SyncError, UnitId, WorkOrder,
    ZoneId,
};
use rtgrefit_sync::{aggregate, flatten, ImageUpload, Reply, SessionMode, ValidationState};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn p1() -> ScopeKey {
    ScopeKey::from("P1")
}

fn u1() -> UnitId {
    UnitId::from("U1")
}

#[tokio::test(start_paused = true)]
async fn test_third_write_failing_converges_to_second_canonical() {
    let temp = TempDir::new().unwrap();
    let (gateway, session) = live_session(temp.path());
    session.select_scope(&p1());
    let executor = session.executor();

    let mut server_1 = work_order("P1", "U1", "wo1");
    server_1.title = "server-1".to_string();
    let mut server_2 = work_order("P1", "U1", "wo1");
    server_2.title = "server-2".to_string();
    let ms = Duration::from_millis;
    gateway.script_writes([
        Reply::ok().after(ms(30)).canonical(server_1),
        Reply::ok().after(ms(10)).canonical(server_2),
        Reply::fail("permission denied").after(ms(20)),
    ]);

    let edit = |title: &'static str| {
        let executor = executor.clone();
        async move {
            executor
                .update::<WorkOrder, _>("wo1", |_, order| {
                    order.title = title.to_string();
                    Ok(())
                })
                .await
        }
    };

    let (first, second, third) = tokio::join!(edit("local-1"), edit("local-2"), edit("local-3"));
    assert!(first.unwrap().superseded);
    assert!(second.unwrap().superseded);
    let err = third.unwrap_err();
    assert!(matches!(err, SyncError::MutationConflict { .. }));

    let order = session.store().entity::<WorkOrder>("wo1").unwrap();
    assert_eq!(order.title, "server-2");
    assert_eq!(executor.pending_count(), 0);
    assert_eq!(session.notices().active().len(), 1);
}

#[tokio::test]
async fn test_validate_without_image_is_rejected_and_store_unchanged() {
    let temp = TempDir::new().unwrap();
    let (gateway, session) = live_session(temp.path());
    session.select_scope(&p1());
    let before = session.store().get(EntityKind::Inspections);
    let z1 = ZoneId::from("Z1");

    let err = session
        .executor()
        .validate_zone(&u1(), &z1)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ValidationPrecondition(_)));
    assert_eq!(session.store().get(EntityKind::Inspections), before);
    assert_eq!(gateway.write_count(), 0);
    let state = session.aggregator().validation_state_for(&z1);
    assert_eq!(state, ValidationState::Unvalidated);
}

#[tokio::test]
async fn test_empty_notes_rejected_then_accepted() {
    let temp = TempDir::new().unwrap();
    let (_gateway, session) = live_session(temp.path());
    session.select_scope(&p1());
    let executor = session.executor();
    let z1 = ZoneId::from("Z1");

    let blank = PointDraft::new(40.0, 60.0, Severity::Medium, "   ");
    let err = executor
        .add_corrosion_point(&u1(), &z1, blank)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ValidationPrecondition(_)));
    assert!(session.aggregator().points_for(&u1(), &z1).is_empty());

    let noted = PointDraft::new(40.0, 60.0, Severity::Medium, "blistering");
    let added = executor
        .add_corrosion_point(&u1(), &z1, noted)
        .await
        .unwrap();
    let points = session.aggregator().points_for(&u1(), &z1);
    assert_eq!(points, vec![added]);
    assert_eq!(points[0].notes, "blistering");
}

#[tokio::test]
async fn test_failed_zone_upload_leaves_no_image() {
    let temp = TempDir::new().unwrap();
    let (gateway, session) = live_session(temp.path());
    session.select_scope(&p1());
    gateway.script_uploads([Reply::fail("quota exceeded")]);
    let z2 = ZoneId::from("Z2");

    let err = session
        .executor()
        .upload_zone_image(&u1(), &z2, ImageUpload::jpeg(vec![0xff, 0xd8]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UploadFailure { .. }));
    assert!(session.aggregator().image_for(&u1(), &z2).is_none());
    assert_eq!(gateway.blob_count(), 0);
    assert_eq!(gateway.write_count(), 0);
}

#[tokio::test]
async fn test_zone_validation_after_upload() {
    let temp = TempDir::new().unwrap();
    let (gateway, session) = live_session(temp.path());
    session.select_scope(&p1());
    let executor = session.executor();
    let z1 = ZoneId::from("Z1");

    let image = executor
        .upload_zone_image(&u1(), &z1, ImageUpload::jpeg(vec![1, 2, 3]))
        .await
        .unwrap();
    assert!(gateway.has_blob(image.as_str()));
    let at = executor.validate_zone(&u1(), &z1).await.unwrap();

    let aggregator = session.aggregator();
    assert_eq!(aggregator.image_for(&u1(), &z1), Some(image));
    let validated = ValidationState::Validated(at);
    assert_eq!(aggregator.validation_state_for(&z1), validated);
    let progress = aggregator.unit_progress(&u1());
    assert_eq!((progress.zones_validated, progress.zones_total), (1, 2));
}

#[test]
fn test_scope_switch_never_exposes_previous_work_orders() {
    let temp = TempDir::new().unwrap();
    let (gateway, session) = live_session(temp.path());
    gateway.seed([
        unit("P2", "U7").into(),
        work_order("P2", "U7", "wo7").into(),
        work_order("P2", "U7", "wo8").into(),
    ]);

    session.select_scope(&p1());
    assert_eq!(session.store().entities::<WorkOrder>().len(), 1);

    let p2 = ScopeKey::from("P2");
    session.select_scope(&p2);
    gateway.replay_to_closed_feeds(EntityKind::WorkOrders, &p1());
    gateway.publish(EntityKind::WorkOrders, &p1());

    let orders = session.store().entities::<WorkOrder>();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.project_id == p2));
    assert_eq!(session.mode(), SessionMode::Live { scope: p2 });
}

#[tokio::test(start_paused = true)]
async fn test_writes_in_flight_across_scope_switch_stay_out_of_new_scope() {
    let temp = TempDir::new().unwrap();
    let (gateway, session) = live_session(temp.path());
    gateway.seed([
        unit("P2", "U7").into(),
        work_order("P2", "U7", "wo7").into(),
    ]);
    session.select_scope(&p1());
    let executor = session.executor();

    let ms = Duration::from_millis;
    gateway.script_writes([Reply::ok().after(ms(50)), Reply::fail("x").after(ms(50))]);
    gateway.script_uploads([Reply::ok().after(ms(50))]);

    let rename = |title: &'static str| {
        let executor = executor.clone();
        async move {
            executor
                .update::<WorkOrder, _>("wo1", |_, order| {
                    order.title = title.to_string();
                    Ok(())
                })
                .await
        }
    };
    let upload = async {
        let z1 = ZoneId::from("Z1");
        let image = ImageUpload::jpeg(vec![1, 2, 3]);
        executor.upload_zone_image(&u1(), &z1, image).await
    };
    let switch = async {
        tokio::time::sleep(ms(10)).await;
        session.select_scope(&ScopeKey::from("P2"))
    };

    let (kept, failed, uploaded, errors) =
        tokio::join!(rename("local-1"), rename("local-2"), upload, switch);
    assert!(errors.is_empty());
    assert!(kept.unwrap().superseded);
    assert!(matches!(failed, Err(SyncError::MutationConflict { .. })));
    assert!(matches!(uploaded, Err(SyncError::MutationConflict { .. })));

    let orders = session.store().entities::<WorkOrder>();
    let ids: Vec<_> = orders.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["wo7"]);
    let inspections = session.store().get(EntityKind::Inspections);
    assert_eq!(inspections.map(|slice| slice.len()), Some(0));
    assert_eq!(gateway.blob_count(), 0);
    assert_eq!(executor.pending_count(), 0);
    assert!(session.notices().active().is_empty());
}

#[test]
fn test_snapshot_replay_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let (gateway, session) = live_session(temp.path());
    session.select_scope(&p1());

    gateway.publish(EntityKind::Zones, &p1());
    let once = session.store().get(EntityKind::Zones);
    gateway.publish(EntityKind::Zones, &p1());
    assert_eq!(session.store().get(EntityKind::Zones), once);
    assert_eq!(once.map(|z| z.len()), Some(2));
}

#[test]
fn test_legacy_document_round_trips_through_views() {
    let legacy: InspectionRecord = serde_json::from_value(json!({
        "id": "insp-2019",
        "projectId": "P1",
        "rtgId": "U1",
        "findings": {
            "Z1": [{
                "id": "p1",
                "x": 12.5,
                "y": 40.0,
                "severity": "High",
                "notes": "pitting",
                "date": "2024-03-04T07:30:00Z"
            }]
        }
    }))
    .unwrap();
    let zones = vec![zone("P1", "U1", "Z1", 0), zone("P1", "U1", "Z2", 1)];

    let views = aggregate(&u1(), &[legacy], &zones);
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].points.len(), 1);
    assert_eq!(views[0].points[0].severity, Severity::High);

    let flat = flatten(&p1(), &u1(), &views);
    let wire = serde_json::to_value(&flat).unwrap();
    let parsed: InspectionRecord = serde_json::from_value(wire).unwrap();
    assert_eq!(aggregate(&u1(), &[parsed], &zones), views);
}

#[test]
fn test_structured_record_wins_over_legacy_points() {
    let mut legacy = InspectionRecord::new(p1(), u1());
    legacy.id = "insp-old".into();
    let findings = legacy.zone_mut(&ZoneId::from("Z1"));
    findings.points = vec![point("U1", "Z1", "p1", Severity::Low)];
    findings.shape = rtgrefit_protocol::FindingsShape::Legacy;

    let mut current = InspectionRecord::new(p1(), u1());
    current.zone_mut(&ZoneId::from("Z1")).points = vec![
        point("U1", "Z1", "p1", Severity::High),
        point("U1", "Z1", "p2", Severity::Medium),
    ];

    let views = aggregate(&u1(), &[current, legacy], &[zone("P1", "U1", "Z1", 0)]);
    let severities: Vec<Severity> = views[0].points.iter().map(|p| p.severity).collect();
    assert_eq!(severities, vec![Severity::High, Severity::Medium]);
}
