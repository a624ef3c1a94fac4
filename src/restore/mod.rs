//! Importing a previously exported tour file.
//!
//! The import runs as an ordered pipeline:
//!
//! 1. detect the file layout ([`shape`])
//! 2. normalize courier ids
//! 3. extract demands (explicit list, else rebuilt from stops)
//! 4. keep only demands whose nodes exist on the loaded map
//! 5. derive the warehouse
//! 6. re-register demands and the warehouse with the backend
//! 7. re-derive the assignment through the id translation table and
//!    recalculate tours
//!
//! Stages 1 to 5 are local ([`prepare`]) and abort with nothing sent to the
//! backend. Stage 6 ([`register`]) is sequential, one demand at a time.
//! Stage 7 ([`resynchronize`]) never aborts: when the recalculation fails it
//! falls back to a plain tour calculation, then to the file's own tours.
//! Demands registered in stage 6 are not rolled back.

pub mod shape;

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::RestoreError;
use crate::model::{
    CityMap, CourierCount, CourierId, DEFAULT_SERVICE_DURATION_SEC, Demand, DemandId, NodeId,
    StopType, Tour, Warehouse, non_empty_tours, normalize_courier_ids,
};
use crate::palette;
use crate::traits::{AssignmentRequest, DemandDraft, SolverBackend, TourCalculation};

pub use shape::FileShape;
use shape::{ParsedFile, RawDemand, RawTour};

/// Old demand id -> id assigned by the backend on re-registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdTranslation {
    entries: HashMap<DemandId, DemandId>,
}

impl IdTranslation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, old: DemandId, new: DemandId) {
        self.entries.insert(old, new);
    }

    pub fn translate(&self, old: &DemandId) -> Option<&DemandId> {
        self.entries.get(old)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DemandId, &DemandId)> {
        self.entries.iter()
    }

    /// Rewrites every stop's demand reference to its new id. References
    /// without a translation are cleared.
    pub fn apply_to_tours(&self, tours: &mut [Tour]) {
        for tour in tours {
            let leg_stops = tour.trajets.iter_mut().flat_map(|trajet| {
                trajet
                    .stop_depart
                    .iter_mut()
                    .chain(trajet.stop_arrivee.iter_mut())
            });
            for stop in leg_stops.chain(tour.stops.iter_mut()) {
                if let Some(old) = stop.id_demande.take() {
                    stop.id_demande = self.translate(&old).cloned();
                }
            }
        }
    }
}

/// Result of the local stages.
#[derive(Debug, Clone)]
pub struct PreparedRestore {
    pub shape: FileShape,
    /// File tours with normalized courier ids; stops still use old demand ids.
    pub tours: Vec<Tour>,
    /// Demands that passed node validation, with their old ids.
    pub demands: Vec<Demand>,
    pub warehouse: Option<Warehouse>,
    pub dropped_unknown_nodes: usize,
    pub replaced_courier_ids: usize,
    /// Explicit `courierCount` of the file.
    pub file_courier_count: Option<i64>,
    /// Distinct usable courier ids found in the file's tours.
    pub file_courier_ids: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationFailure {
    pub old_id: DemandId,
    pub reason: String,
}

/// Result of the backend registration stage.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Registered demands carrying their new ids, in file order.
    pub demands: Vec<Demand>,
    pub translation: IdTranslation,
    pub failures: Vec<RegistrationFailure>,
    /// The warehouse as accepted by the backend.
    pub warehouse: Option<Warehouse>,
    pub warnings: Vec<String>,
}

/// Which stage-7 path produced the tours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncPath {
    /// Tours recomputed from the file's courier associations.
    Recalculated,
    /// Tours computed from scratch for this many couriers.
    Calculated(CourierCount),
    /// Both backend calls failed; the file's tours are shown as they were.
    FileTours,
}

#[derive(Debug, Clone)]
pub struct Resync {
    pub path: ResyncPath,
    pub tours: Vec<Tour>,
    pub solver_unassigned: Vec<Demand>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub shape: FileShape,
    pub restored: usize,
    pub dropped_unknown_nodes: usize,
    pub replaced_courier_ids: usize,
    pub registration_failures: Vec<RegistrationFailure>,
    pub translation: IdTranslation,
    pub path: ResyncPath,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub tours: Vec<Tour>,
    pub demands: Vec<Demand>,
    pub warehouse: Option<Warehouse>,
    pub solver_unassigned: Vec<Demand>,
    pub report: RestoreReport,
}

/// Settings the pipeline needs from the console.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Courier count configured in the console, the last fallback.
    pub courier_count: CourierCount,
    pub default_departure_time: String,
    pub default_service_duration_sec: u32,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            courier_count: CourierCount::default(),
            default_departure_time: crate::model::DEFAULT_DEPARTURE_TIME.to_string(),
            default_service_duration_sec: DEFAULT_SERVICE_DURATION_SEC,
        }
    }
}

/// Parses raw file text.
pub fn parse_contents(text: &str) -> Result<Value, RestoreError> {
    Ok(serde_json::from_str(text)?)
}

/// Runs the whole pipeline.
pub fn restore<B: SolverBackend + ?Sized>(
    contents: &Value,
    map: &CityMap,
    backend: &B,
    options: &RestoreOptions,
) -> Result<RestoreOutcome, RestoreError> {
    let prepared = prepare(contents, map, options)?;
    complete(prepared, backend, options.courier_count)
}

/// Stages 6 and 7 on an already prepared file.
pub fn complete<B: SolverBackend + ?Sized>(
    prepared: PreparedRestore,
    backend: &B,
    configured: CourierCount,
) -> Result<RestoreOutcome, RestoreError> {
    let registration = register(&prepared, backend)?;
    let resync = resynchronize(&prepared, &registration, backend, configured);

    let Registration {
        demands,
        translation,
        failures,
        warehouse,
        mut warnings,
    } = registration;
    warnings.extend(resync.warnings);

    info!(
        restored = demands.len(),
        dropped = prepared.dropped_unknown_nodes,
        failed = failures.len(),
        path = ?resync.path,
        "tour file restored"
    );

    Ok(RestoreOutcome {
        tours: resync.tours,
        demands,
        warehouse,
        solver_unassigned: resync.solver_unassigned,
        report: RestoreReport {
            shape: prepared.shape,
            restored: translation.len(),
            dropped_unknown_nodes: prepared.dropped_unknown_nodes,
            replaced_courier_ids: prepared.replaced_courier_ids,
            registration_failures: failures,
            translation,
            path: resync.path,
            warnings,
        },
    })
}

/// Stages 1 to 5. Pure: nothing is sent anywhere.
pub fn prepare(
    contents: &Value,
    map: &CityMap,
    options: &RestoreOptions,
) -> Result<PreparedRestore, RestoreError> {
    let parsed = shape::detect(contents).ok_or(RestoreError::UnrecognizedShape)?;
    let ParsedFile {
        shape,
        tours: raw_tours,
        demands: explicit_demands,
        warehouse: explicit_warehouse,
        courier_count,
        ..
    } = parsed;

    let raw_ids: Vec<Option<u32>> = raw_tours.iter().map(RawTour::usable_courier_id).collect();
    let file_courier_ids = raw_ids.iter().flatten().collect::<HashSet<_>>().len();
    let tours = normalize_tours(raw_tours, &raw_ids);
    let replaced_courier_ids = raw_ids
        .iter()
        .zip(tours.iter())
        .filter(|(raw, tour)| **raw != Some(tour.courier_id.get()))
        .count();
    if replaced_courier_ids > 0 {
        debug!(replaced = replaced_courier_ids, "courier ids normalized");
    }

    let extracted = match explicit_demands {
        Some(raw) => demands_from_entries(raw, options.default_service_duration_sec),
        None => demands_from_stops(&tours, options.default_service_duration_sec),
    };
    if extracted.is_empty() {
        return Err(RestoreError::NoDemands);
    }

    let known = map.node_ids();
    let total = extracted.len();
    let demands: Vec<Demand> = extracted
        .into_iter()
        .filter(|demand| {
            known.contains(&demand.pickup_node_id) && known.contains(&demand.delivery_node_id)
        })
        .collect();
    let dropped_unknown_nodes = total - demands.len();
    if demands.is_empty() {
        return Err(RestoreError::NoMatchingDemands {
            dropped: dropped_unknown_nodes,
        });
    }
    if dropped_unknown_nodes > 0 {
        warn!(
            dropped = dropped_unknown_nodes,
            "demands reference nodes missing from the loaded map"
        );
    }

    let departure_time = explicit_warehouse
        .as_ref()
        .and_then(|warehouse| warehouse.departure_time.clone())
        .filter(|time| !time.trim().is_empty())
        .unwrap_or_else(|| options.default_departure_time.clone());
    let warehouse = derive_warehouse_node(explicit_warehouse.and_then(|w| w.node_id), &tours, map)
        .map(|node| Warehouse::new(node, departure_time));

    Ok(PreparedRestore {
        shape,
        tours,
        demands,
        warehouse,
        dropped_unknown_nodes,
        replaced_courier_ids,
        file_courier_count: courier_count,
        file_courier_ids,
    })
}

fn normalize_tours(raw_tours: Vec<RawTour>, raw_ids: &[Option<u32>]) -> Vec<Tour> {
    let ids = normalize_courier_ids(raw_ids);
    raw_tours
        .into_iter()
        .zip(ids)
        .map(|(raw, courier_id)| Tour {
            courier_id,
            trajets: raw.trajets,
            stops: raw.stops,
            total_distance: raw.total_distance.unwrap_or_default(),
            total_duration_sec: raw.total_duration_sec.unwrap_or_default(),
            request_count: raw.request_count.unwrap_or_default(),
        })
        .collect()
}

fn demands_from_entries(entries: Vec<RawDemand>, default_duration: u32) -> Vec<Demand> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let pickup = raw.pickup_node_id.filter(|id| !id.is_blank())?;
            let delivery = raw.delivery_node_id.filter(|id| !id.is_blank())?;
            let id = raw
                .id
                .filter(|id| !id.is_blank())
                .unwrap_or_else(|| DemandId::new(format!("restored-{}", index + 1)));
            Some(Demand {
                id,
                pickup_node_id: pickup,
                delivery_node_id: delivery,
                pickup_duration_sec: raw.pickup_duration_sec.unwrap_or(default_duration),
                delivery_duration_sec: raw.delivery_duration_sec.unwrap_or(default_duration),
                color: None,
            })
        })
        .collect()
}

/// Rebuilds demands from `(idDemande, idNode, typeStop)` triples. Groups that
/// do not resolve both a pickup and a delivery node are dropped.
fn demands_from_stops(tours: &[Tour], default_duration: u32) -> Vec<Demand> {
    let mut order: Vec<DemandId> = Vec::new();
    let mut ends: HashMap<DemandId, (Option<NodeId>, Option<NodeId>)> = HashMap::new();

    for stop in tours.iter().flat_map(Tour::all_stops) {
        let Some(demand) = stop.demand() else { continue };
        let entry = ends.entry(demand.clone()).or_insert_with(|| {
            order.push(demand.clone());
            (None, None)
        });
        match (stop.type_stop, stop.node()) {
            (Some(StopType::Pickup), Some(node)) => entry.0 = Some(node.clone()),
            (Some(StopType::Delivery), Some(node)) => entry.1 = Some(node.clone()),
            _ => {}
        }
    }

    order
        .into_iter()
        .filter_map(|id| {
            let (pickup, delivery) = ends.remove(&id)?;
            let mut demand = Demand::new(id, pickup?, delivery?);
            demand.pickup_duration_sec = default_duration;
            demand.delivery_duration_sec = default_duration;
            Some(demand)
        })
        .collect()
}

/// Explicit node, else the first warehouse stop or first departure found in
/// the tours, else the map's first node. Never a node missing from the map.
fn derive_warehouse_node(
    explicit: Option<NodeId>,
    tours: &[Tour],
    map: &CityMap,
) -> Option<NodeId> {
    let candidate = explicit
        .filter(|id| !id.is_blank())
        .or_else(|| tours.iter().find_map(warehouse_hint));

    match candidate {
        Some(node) if map.contains(&node) => Some(node),
        Some(node) => {
            debug!(node = %node, "warehouse node not on the loaded map, using the first map node");
            map.first_node().cloned()
        }
        None => map.first_node().cloned(),
    }
}

fn warehouse_hint(tour: &Tour) -> Option<NodeId> {
    if let Some(node) = tour
        .stops
        .iter()
        .find(|stop| stop.type_stop == Some(StopType::Warehouse))
        .and_then(|stop| stop.node())
    {
        return Some(node.clone());
    }
    let first = tour.trajets.first()?;
    first
        .stop_depart
        .as_ref()
        .and_then(|stop| stop.node())
        .or_else(|| first.segments.first().and_then(|segment| segment.origin.as_ref()))
        .filter(|id| !id.is_blank())
        .cloned()
}

/// Stage 6: registers every validated demand, one request at a time, then
/// the warehouse.
pub fn register<B: SolverBackend + ?Sized>(
    prepared: &PreparedRestore,
    backend: &B,
) -> Result<Registration, RestoreError> {
    let mut translation = IdTranslation::new();
    let mut demands = Vec::with_capacity(prepared.demands.len());
    let mut failures = Vec::new();
    let mut warnings = Vec::new();

    for demand in &prepared.demands {
        let draft = DemandDraft::from_demand(demand);
        match backend.add_demand(&draft) {
            Ok(new_id) => {
                debug!(old = %demand.id, new = %new_id, "demand re-registered");
                translation.record(demand.id.clone(), new_id.clone());
                demands.push(draft.into_demand(new_id));
            }
            Err(err) => {
                warn!(demand = %demand.id, error = %err, "demand registration failed");
                failures.push(RegistrationFailure {
                    old_id: demand.id.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    if demands.is_empty() {
        return Err(RestoreError::RegistrationFailed { failed: failures.len() });
    }
    if !failures.is_empty() {
        warnings.push(format!("{} demand(s) could not be registered", failures.len()));
    }
    palette::recolor(&mut demands);

    let warehouse = match &prepared.warehouse {
        Some(warehouse) => match backend.set_warehouse(warehouse) {
            Ok(()) => Some(warehouse.clone()),
            Err(err) => {
                warn!(node = %warehouse.node_id, error = %err, "warehouse registration failed");
                warnings.push(format!("warehouse {} could not be set: {err}", warehouse.node_id));
                None
            }
        },
        None => None,
    };

    Ok(Registration {
        demands,
        translation,
        failures,
        warehouse,
        warnings,
    })
}

/// Stop-level `(demand, courier)` associations of the file, in visiting
/// order; later tours win.
pub fn file_associations(tours: &[Tour]) -> HashMap<DemandId, CourierId> {
    let mut associations = HashMap::new();
    for tour in tours {
        for stop in tour.all_stops() {
            if let Some(demand) = stop.demand() {
                associations.insert(demand.clone(), tour.courier_id);
            }
        }
    }
    associations
}

/// One request entry per registered demand, courier looked up through the
/// translation table. References that do not translate are dropped.
pub fn translated_assignments(
    tours: &[Tour],
    registered: &[Demand],
    translation: &IdTranslation,
) -> Vec<AssignmentRequest> {
    let by_new_id: HashMap<&DemandId, CourierId> = file_associations(tours)
        .into_iter()
        .filter_map(|(old, courier)| translation.translate(&old).map(|new| (new, courier)))
        .collect();

    registered
        .iter()
        .map(|demand| AssignmentRequest::new(demand.id.clone(), by_new_id.get(&demand.id).copied()))
        .collect()
}

/// Courier count for the plain calculation: the file's explicit count, the
/// distinct courier ids of the file, or the console setting.
pub fn fallback_courier_count(
    prepared: &PreparedRestore,
    configured: CourierCount,
) -> CourierCount {
    prepared
        .file_courier_count
        .or_else(|| {
            (prepared.file_courier_ids > 0)
                .then(|| i64::try_from(prepared.file_courier_ids).unwrap_or(i64::MAX))
        })
        .map(CourierCount::new)
        .unwrap_or(configured)
}

/// Stage 7. Never fails; the path taken is reported instead.
pub fn resynchronize<B: SolverBackend + ?Sized>(
    prepared: &PreparedRestore,
    registration: &Registration,
    backend: &B,
    configured: CourierCount,
) -> Resync {
    let mut warnings = Vec::new();
    let assignments = translated_assignments(
        &prepared.tours,
        &registration.demands,
        &registration.translation,
    );

    if assignments.iter().any(|entry| entry.courier_id.is_some()) {
        match backend.recalculate_assignments(&assignments) {
            Ok(calculation) => return resync_from(ResyncPath::Recalculated, calculation, warnings),
            Err(err) => {
                warn!(
                    error = %err,
                    "recalculation after restore failed, falling back to a plain calculation"
                );
                warnings.push(format!("recalculation failed: {err}"));
            }
        }
    }

    let couriers = fallback_courier_count(prepared, configured);
    match backend.calculate_tour(couriers) {
        Ok(calculation) => resync_from(ResyncPath::Calculated(couriers), calculation, warnings),
        Err(err) => {
            warn!(error = %err, "tour calculation after restore failed, showing the file's tours");
            warnings.push(format!("tour calculation failed: {err}"));
            let mut tours = prepared.tours.clone();
            registration.translation.apply_to_tours(&mut tours);
            Resync {
                path: ResyncPath::FileTours,
                tours: non_empty_tours(tours),
                solver_unassigned: Vec::new(),
                warnings,
            }
        }
    }
}

fn resync_from(
    path: ResyncPath,
    calculation: TourCalculation,
    mut warnings: Vec<String>,
) -> Resync {
    warnings.extend(calculation.warnings);
    Resync {
        path,
        tours: non_empty_tours(calculation.tours),
        solver_unassigned: calculation.unassigned_demands,
        warnings,
    }
}
