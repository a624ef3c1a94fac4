//! Restore pipeline tests
//!
//! Shapes, node validation, re-registration, id translation and the
//! fallback chain after re-registration.

mod fixtures;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use courier_console::error::{ConsoleError, RestoreError};
use courier_console::model::{CourierCount, CourierId, Demand, Tour};
use courier_console::restore::{FileShape, ResyncPath};
use courier_console::{Console, ConsoleSettings};

use fixtures::*;

fn fresh_console(prefix: &'static str) -> Console<MockBackend> {
    let mut console = Console::new(MockBackend::with_prefix(prefix), ConsoleSettings::default());
    console.load_map(lyon_map());
    console
}

fn tour_file(tours: &[Tour], demands: &[Demand], courier_count: Option<i64>) -> Value {
    let mut file = json!({
        "tours": serde_json::to_value(tours).unwrap(),
        "demands": serde_json::to_value(demands).unwrap(),
    });
    if let Some(count) = courier_count {
        file["courierCount"] = json!(count);
    }
    file
}

fn node_pairs(demands: &[Demand]) -> BTreeSet<(String, String)> {
    demands
        .iter()
        .map(|demand| (demand.pickup_node_id.to_string(), demand.delivery_node_id.to_string()))
        .collect()
}

fn ids_of(demands: &[Demand]) -> Vec<String> {
    demands.iter().map(|demand| demand.id.to_string()).collect()
}

fn visitation(tours: &[Tour]) -> BTreeMap<u32, BTreeSet<String>> {
    tours
        .iter()
        .map(|tour| {
            let nodes = tour.visited_nodes().into_iter().map(|node| node.to_string()).collect();
            (tour.courier_id.get(), nodes)
        })
        .collect()
}

/// A single courier serving `a` (Terreaux -> Guillotiere).
fn single_demand_file() -> Value {
    let pickup = PRESQUILE[0].id;
    let delivery = LEFT_BANK[0].id;
    let tour = TourBuilder::new(1)
        .warehouse(DEPOTS[0].id)
        .pickup(pickup, "a")
        .delivery(delivery, "a")
        .build();
    tour_file(&[tour], &[demand("a", pickup, delivery)], Some(3))
}

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn test_export_then_restore_round_trip() {
    let mut source = lyon_console();
    add_demands(&mut source, &sample_pairs(4));
    source.set_courier_count(2);
    source.calculate().unwrap();
    let saved_at = Utc.with_ymd_and_hms(2026, 5, 2, 17, 45, 0).unwrap();
    let file = source.export(saved_at).unwrap().to_value().unwrap();
    assert_eq!(file["courierCount"], 2);

    let mut target = fresh_console("new");
    let report = target.restore(&file).unwrap();

    assert_eq!(report.shape, FileShape::TourList);
    assert_eq!(report.path, ResyncPath::Recalculated);
    assert_eq!(report.restored, 4);
    assert!(report.registration_failures.is_empty());
    assert!(report.translation.iter().all(|(_, new)| new.as_str().starts_with("new-")));

    assert_eq!(node_pairs(&target.requests().demands), node_pairs(&source.requests().demands));
    assert_eq!(visitation(target.tours().unwrap()), visitation(source.tours().unwrap()));
    assert_eq!(target.requests().warehouse, source.requests().warehouse);
    assert_eq!(target.courier_count(), CourierCount::new(2));

    let sent = target.backend().recalculations();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), 4);
    assert!(sent[0].iter().all(|entry| entry.courier_id.is_some()));
}

#[test]
fn test_restored_demands_are_recoloured() {
    let mut console = fresh_console("new");
    console.restore(&single_demand_file()).unwrap();
    let demands = &console.requests().demands;
    assert_eq!(demands.len(), 1);
    assert!(demands[0].color.is_some());
    assert_eq!(demands[0].pickup_duration_sec, 300);
}

// ============================================================================
// Restoring over existing demands
// ============================================================================

#[test]
fn test_restore_replaces_existing_demands() {
    let mut console = lyon_console();
    let previous = add_demands(&mut console, &sample_pairs(2));
    console.calculate().unwrap();
    let saved_at = Utc.with_ymd_and_hms(2026, 5, 2, 18, 0, 0).unwrap();
    let file = console.export(saved_at).unwrap().to_value().unwrap();

    console.restore(&file).unwrap();

    let local = ids_of(&console.requests().demands);
    let backend = ids_of(&console.backend().demands.borrow());
    assert_eq!(local, backend);
    assert_eq!(local.len(), 2);
    assert!(previous.iter().all(|id| !local.contains(&id.to_string())));

    let calls = console.backend().calls();
    let last_removal = calls
        .iter()
        .rposition(|call| matches!(call, Call::RemoveDemand(_)))
        .unwrap();
    let registered_after = calls[last_removal..]
        .iter()
        .filter(|call| matches!(call, Call::AddDemand(_)))
        .count();
    assert_eq!(registered_after, 2);
}

#[test]
fn test_fallback_tours_only_serve_restored_demands() {
    let mut console = lyon_console();
    add_demands(&mut console, &sample_pairs(3));
    console.calculate().unwrap();
    console.backend().fail_recalculate.set(true);

    let report = console.restore(&single_demand_file()).unwrap();

    assert_eq!(report.path, ResyncPath::Calculated(CourierCount::new(3)));
    assert_eq!(console.requests().demands.len(), 1);
    assert_eq!(console.backend().demands.borrow().len(), 1);
    let served: u32 = console.tours().unwrap().iter().map(|tour| tour.request_count).sum();
    assert_eq!(served, 1);
}

#[test]
fn test_failed_clear_stops_restore() {
    let mut console = lyon_console();
    let previous = add_demands(&mut console, &sample_pairs(2));
    console.calculate().unwrap();
    console.backend().fail_remove.borrow_mut().insert(previous[1].clone());
    let registrations = console.backend().count(|call| matches!(call, Call::AddDemand(_)));

    let err = console.restore(&single_demand_file()).unwrap_err();

    assert!(matches!(err, ConsoleError::Restore(RestoreError::ClearFailed { .. })));
    assert_eq!(console.backend().count(|call| matches!(call, Call::AddDemand(_))), registrations);
    let local: Vec<_> = console.requests().demands.iter().map(|d| d.id.clone()).collect();
    assert_eq!(local, vec![previous[1].clone()]);
    assert_eq!(console.backend().demands.borrow().len(), 1);
    assert!(console.tours().is_none());
    assert!(!console.is_busy());
}

#[test]
fn test_rejected_warehouse_keeps_previous_one() {
    let mut console = lyon_console();
    let file = json!([{
        "courierId": 1,
        "stops": [
            {"idNode": PRESQUILE[0].id, "idDemande": "a", "typeStop": "PICKUP"},
            {"idNode": LEFT_BANK[0].id, "idDemande": "a", "typeStop": "DELIVERY"}
        ]
    }]);
    console.backend().fail_warehouse.set(true);
    console.restore(&file).unwrap();
    let warehouse = console.requests().warehouse.as_ref();
    assert_eq!(warehouse.map(|w| w.node_id.as_str()), Some(DEPOTS[0].id));
}

// ============================================================================
// Local stages
// ============================================================================

#[test]
fn test_demand_on_unknown_node_is_fatal() {
    let mut console = fresh_console("new");
    let file = tour_file(
        &[TourBuilder::new(1).build()],
        &[demand("d1", MISSING_NODE, LEFT_BANK[0].id)],
        None,
    );
    let err = console.restore(&file).unwrap_err();
    assert!(matches!(err, ConsoleError::Restore(RestoreError::NoMatchingDemands { dropped: 1 })));
    assert!(console.backend().calls().is_empty());
    assert!(!console.is_busy());
}

#[test]
fn test_unknown_nodes_are_dropped_and_counted() {
    let mut console = fresh_console("new");
    let file = tour_file(
        &[TourBuilder::new(1).build()],
        &[
            demand("d1", PRESQUILE[0].id, LEFT_BANK[0].id),
            demand("d2", MISSING_NODE, LEFT_BANK[1].id),
        ],
        None,
    );
    let report = console.restore(&file).unwrap();
    assert_eq!(report.dropped_unknown_nodes, 1);
    assert_eq!(report.restored, 1);
}

#[test]
fn test_unrecognised_and_malformed_files() {
    let mut console = fresh_console("new");
    assert!(matches!(
        console.restore(&json!({"routes": []})),
        Err(ConsoleError::Restore(RestoreError::UnrecognizedShape))
    ));
    assert!(matches!(
        console.start_restore_text("{\"tours\": ["),
        Err(ConsoleError::Restore(RestoreError::Malformed(_)))
    ));
    assert!(console.backend().calls().is_empty());
}

#[test]
fn test_legacy_single_tour_file() {
    let pickup = PRESQUILE[1].id;
    let delivery = LEFT_BANK[1].id;
    let file = json!({
        "tour": [
            {"stopDepart": {"idNode": DEPOTS[1].id, "typeStop": "WAREHOUSE"},
             "stopArrivee": {"idNode": pickup, "idDemande": 41, "typeStop": "PICKUP"}},
            {"stopDepart": {"idNode": pickup, "idDemande": 41, "typeStop": "PICKUP"},
             "stopArrivee": {"idNode": delivery, "idDemande": 41, "typeStop": "DELIVERY"}}
        ],
        "stops": []
    });

    let mut console = fresh_console("new");
    let report = console.restore(&file).unwrap();
    assert_eq!(report.shape, FileShape::LegacySingleTour);
    assert_eq!(report.path, ResyncPath::Recalculated);
    let warehouse = console.requests().warehouse.as_ref();
    assert_eq!(warehouse.map(|w| w.node_id.as_str()), Some(DEPOTS[1].id));
    assert_eq!(warehouse.map(|w| w.departure_time.as_str()), Some("08:00"));
    assert_eq!(console.tours().unwrap().len(), 1);
    assert_eq!(console.tours().unwrap()[0].courier_id, CourierId::new(1));
}

#[test]
fn test_bare_array_with_bad_courier_ids() {
    let pairs = sample_pairs(3);
    let tours: Vec<Value> = pairs
        .iter()
        .zip([json!("x"), json!(2), json!(2)])
        .enumerate()
        .map(|(index, ((pickup, delivery), courier))| {
            let id = format!("old-{index}");
            json!({
                "courierId": courier,
                "stops": [
                    {"idNode": pickup, "idDemande": id, "typeStop": "PICKUP"},
                    {"idNode": delivery, "idDemande": id, "typeStop": "DELIVERY"}
                ]
            })
        })
        .collect();

    let mut console = fresh_console("new");
    let report = console.restore(&Value::Array(tours)).unwrap();
    assert_eq!(report.shape, FileShape::BareArray);
    assert_eq!(report.replaced_courier_ids, 2);

    let couriers: BTreeSet<u32> =
        console.tours().unwrap().iter().map(|tour| tour.courier_id.get()).collect();
    assert_eq!(couriers.len(), 3);
    assert!(console.duplicate_courier_ids().is_empty());
}

#[test]
fn test_explicit_warehouse_off_map_falls_back() {
    let mut file = single_demand_file();
    file["warehouse"] = json!({"nodeId": MISSING_NODE, "departureTime": "07:30"});
    let mut console = fresh_console("new");
    let ticket = console.start_restore(&file).unwrap();
    let warehouse = ticket.prepared().warehouse.clone().unwrap();
    assert_eq!(warehouse.node_id.as_str(), DEPOTS[0].id);
    assert_eq!(warehouse.departure_time, "07:30");
}

// ============================================================================
// Re-registration
// ============================================================================

#[test]
fn test_partial_registration_failure() {
    let pairs = sample_pairs(3);
    let demands: Vec<Demand> = pairs
        .iter()
        .enumerate()
        .map(|(index, (pickup, delivery))| demand(&format!("old-{index}"), pickup, delivery))
        .collect();
    let file = tour_file(&[TourBuilder::new(1).build()], &demands, Some(1));

    let mut console = fresh_console("new");
    console.backend().reject_pickups.borrow_mut().insert(pairs[1].0.into());
    let report = console.restore(&file).unwrap();

    assert_eq!(report.restored, 2);
    assert_eq!(report.registration_failures.len(), 1);
    assert_eq!(report.registration_failures[0].old_id.as_str(), "old-1");
    assert!(report.translation.translate(&"old-1".into()).is_none());
    assert_eq!(console.requests().demands.len(), 2);
    assert!(!report.warnings.is_empty());
}

#[test]
fn test_every_registration_failing_is_fatal() {
    let mut console = fresh_console("new");
    console.backend().reject_pickups.borrow_mut().insert(PRESQUILE[0].id.into());
    let err = console.restore(&single_demand_file()).unwrap_err();
    assert!(matches!(err, ConsoleError::Restore(RestoreError::RegistrationFailed { failed: 1 })));
    assert!(console.tours().is_none());
    assert!(!console.is_busy());
}

#[test]
fn test_warehouse_rejection_is_a_warning() {
    let mut console = fresh_console("new");
    console.backend().fail_warehouse.set(true);
    let report = console.restore(&single_demand_file()).unwrap();
    assert!(console.requests().warehouse.is_none());
    assert!(report.warnings.iter().any(|warning| warning.contains("warehouse")));
    assert_eq!(report.path, ResyncPath::Recalculated);
}

// ============================================================================
// Resynchronisation
// ============================================================================

#[test]
fn test_recalculation_failure_falls_back_to_calculation() {
    let mut console = fresh_console("new");
    console.backend().fail_recalculate.set(true);
    let report = console.restore(&single_demand_file()).unwrap();

    assert_eq!(report.path, ResyncPath::Calculated(CourierCount::new(3)));
    let calls = console.backend().calls();
    assert!(matches!(calls[calls.len() - 2], Call::Recalculate(_)));
    assert_eq!(calls[calls.len() - 1], Call::Calculate(CourierCount::new(3)));
}

#[test]
fn test_without_associations_calculates_directly() {
    let file = json!({
        "tours": [
            {"courierId": 4, "stops": [{"idNode": DEPOTS[0].id, "typeStop": "WAREHOUSE"}]},
            {"courierId": 7, "stops": []}
        ],
        "demands": [{"id": "a", "pickupNodeId": PRESQUILE[0].id, "deliveryNodeId": LEFT_BANK[0].id}]
    });
    let mut console = fresh_console("new");
    let report = console.restore(&file).unwrap();

    assert_eq!(report.path, ResyncPath::Calculated(CourierCount::new(2)));
    assert!(console.backend().recalculations().is_empty());
}

#[test]
fn test_both_calls_failing_shows_file_tours() {
    let mut console = fresh_console("new");
    console.backend().fail_recalculate.set(true);
    console.backend().fail_calculate.set(true);
    let report = console.restore(&single_demand_file()).unwrap();

    assert_eq!(report.path, ResyncPath::FileTours);
    assert_eq!(report.warnings.len(), 2);
    let tours = console.tours().unwrap();
    assert_eq!(tours.len(), 1);
    assert_eq!(tours[0].stops.len(), 3);
    // demands stay registered, under their new ids
    assert_eq!(console.backend().demands.borrow().len(), 1);
    assert_eq!(console.requests().demands[0].id.as_str(), "new-1");
    let referenced: BTreeSet<String> = tours[0]
        .all_stops()
        .filter_map(|stop| stop.demand())
        .map(|id| id.to_string())
        .collect();
    assert_eq!(referenced, BTreeSet::from(["new-1".to_string()]));
}

#[test]
fn test_file_tours_export_restores_associations() {
    let mut console = fresh_console("new");
    console.backend().fail_recalculate.set(true);
    console.backend().fail_calculate.set(true);
    console.restore(&single_demand_file()).unwrap();
    let saved_at = Utc.with_ymd_and_hms(2026, 5, 3, 9, 0, 0).unwrap();
    let file = console.export(saved_at).unwrap().to_value().unwrap();

    let mut target = fresh_console("next");
    let report = target.restore(&file).unwrap();
    assert_eq!(report.path, ResyncPath::Recalculated);
    let sent = target.backend().recalculations();
    assert_eq!(sent[0].len(), 1);
    assert_eq!(sent[0][0].courier_id, Some(CourierId::new(1)));
}

// ============================================================================
// Stale results
// ============================================================================

#[test]
fn test_stale_restore_is_discarded() {
    let mut console = fresh_console("new");
    let ticket = console.start_restore(&single_demand_file()).unwrap();
    assert!(console.is_busy());
    assert!(matches!(console.begin_edit(), Err(ConsoleError::Busy)));

    let execution = ticket.execute(console.backend());
    assert!(execution.outcome.is_ok());
    console.clear_map();

    assert!(matches!(console.finish_restore(ticket, execution), Err(ConsoleError::Stale)));
    assert!(console.requests().demands.is_empty());
    assert!(console.tours().is_none());
}
