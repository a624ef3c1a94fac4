//! Test fixtures for courier-console.
//!
//! Provides:
//! - Named Lyon nodes to build maps from
//! - An in-memory `MockBackend` that records every call
//! - Builders for demands, tours and maps

#![allow(dead_code)]

pub mod lyon_nodes;

pub use lyon_nodes::*;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};

use courier_console::error::BackendError;
use courier_console::model::{
    CityMap, CourierCount, CourierId, Demand, DemandId, DemandRequestSet, Node, NodeId, Segment,
    Stop, StopType, Tour, Trajet, Warehouse,
};
use courier_console::traits::{
    AssignmentRequest, DemandDraft, RemovalOutcome, SolverBackend, TourCalculation,
};
use courier_console::{Console, ConsoleSettings};

// ============================================================================
// Mock backend
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AddDemand(DemandDraft),
    RemoveDemand(DemandId),
    SetWarehouse(Warehouse),
    Calculate(CourierCount),
    Recalculate(Vec<AssignmentRequest>),
}

/// Stands in for the routing backend.
///
/// Demands are stored in registration order. Tours are built so that each
/// courier visits the pickup then the delivery node of its demands, with
/// the warehouse (when set) as first stop.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub calls: RefCell<Vec<Call>>,
    pub demands: RefCell<Vec<Demand>>,
    pub warehouse: RefCell<Option<Warehouse>>,
    next_id: Cell<u32>,
    /// Id prefix, so two backends hand out distinguishable ids.
    pub id_prefix: &'static str,
    /// Drafts whose pickup node is listed here are rejected.
    pub reject_pickups: RefCell<HashSet<NodeId>>,
    pub fail_remove: RefCell<HashSet<DemandId>>,
    pub fail_warehouse: Cell<bool>,
    pub fail_calculate: Cell<bool>,
    pub fail_recalculate: Cell<bool>,
    /// Answer calculations with an empty tour list.
    pub empty_tours: Cell<bool>,
    pub calculation_warnings: RefCell<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_prefix("srv")
    }

    pub fn with_prefix(id_prefix: &'static str) -> Self {
        Self {
            id_prefix,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn recalculations(&self) -> Vec<Vec<AssignmentRequest>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Recalculate(assignments) => Some(assignments.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|call| matches(call)).count()
    }

    fn tours_for(&self, plan: BTreeMap<u32, Vec<Demand>>) -> Vec<Tour> {
        if self.empty_tours.get() {
            return Vec::new();
        }
        let warehouse = self.warehouse.borrow().as_ref().map(|w| w.node_id.clone());
        plan.into_iter()
            .map(|(courier, demands)| {
                let mut builder = TourBuilder::new(courier);
                if let Some(node) = &warehouse {
                    builder = builder.warehouse(node.as_str());
                }
                for demand in &demands {
                    builder = builder
                        .pickup(demand.pickup_node_id.as_str(), demand.id.as_str())
                        .delivery(demand.delivery_node_id.as_str(), demand.id.as_str());
                }
                let mut tour = builder.with_legs().build();
                tour.request_count = demands.len() as u32;
                tour
            })
            .collect()
    }

    fn calculation(&self, tours: Vec<Tour>, unassigned: Vec<Demand>) -> TourCalculation {
        TourCalculation {
            tours,
            unassigned_demands: unassigned,
            warnings: self.calculation_warnings.borrow().clone(),
        }
    }
}

impl SolverBackend for MockBackend {
    fn add_demand(&self, draft: &DemandDraft) -> Result<DemandId, BackendError> {
        self.calls.borrow_mut().push(Call::AddDemand(draft.clone()));
        if self.reject_pickups.borrow().contains(&draft.pickup_node_id) {
            let message = format!("unknown node {}", draft.pickup_node_id);
            return Err(BackendError::rejected("addDemand", message));
        }
        self.next_id.set(self.next_id.get() + 1);
        let id = DemandId::new(format!("{}-{}", self.id_prefix, self.next_id.get()));
        self.demands.borrow_mut().push(draft.clone().into_demand(id.clone()));
        Ok(id)
    }

    fn remove_demand(&self, id: &DemandId) -> Result<RemovalOutcome, BackendError> {
        self.calls.borrow_mut().push(Call::RemoveDemand(id.clone()));
        if self.fail_remove.borrow().contains(id) {
            return Err(BackendError::rejected("removeDemand", "locked"));
        }
        self.demands.borrow_mut().retain(|demand| &demand.id != id);
        Ok(RemovalOutcome {
            success: true,
            data: Some(DemandRequestSet {
                warehouse: self.warehouse.borrow().clone(),
                demands: self.demands.borrow().clone(),
            }),
        })
    }

    fn set_warehouse(&self, warehouse: &Warehouse) -> Result<(), BackendError> {
        self.calls.borrow_mut().push(Call::SetWarehouse(warehouse.clone()));
        if self.fail_warehouse.get() {
            return Err(BackendError::rejected("setWarehouse", "warehouse refused"));
        }
        *self.warehouse.borrow_mut() = Some(warehouse.clone());
        Ok(())
    }

    fn calculate_tour(&self, couriers: CourierCount) -> Result<TourCalculation, BackendError> {
        self.calls.borrow_mut().push(Call::Calculate(couriers));
        if self.fail_calculate.get() {
            return Err(BackendError::rejected("calculateTour", "solver unavailable"));
        }
        let mut plan: BTreeMap<u32, Vec<Demand>> = BTreeMap::new();
        for (index, demand) in self.demands.borrow().iter().enumerate() {
            let courier = index as u32 % couriers.get() + 1;
            plan.entry(courier).or_default().push(demand.clone());
        }
        Ok(self.calculation(self.tours_for(plan), Vec::new()))
    }

    fn recalculate_assignments(
        &self,
        assignments: &[AssignmentRequest],
    ) -> Result<TourCalculation, BackendError> {
        self.calls.borrow_mut().push(Call::Recalculate(assignments.to_vec()));
        if self.fail_recalculate.get() {
            return Err(BackendError::rejected("recalculateAssignments", "invalid assignment"));
        }
        let known = self.demands.borrow();
        let mut plan: BTreeMap<u32, Vec<Demand>> = BTreeMap::new();
        let mut unassigned = Vec::new();
        for entry in assignments {
            let Some(demand) = known.iter().find(|demand| demand.id == entry.demand_id) else {
                let message = format!("unknown demand {}", entry.demand_id);
                return Err(BackendError::rejected("recalculateAssignments", message));
            };
            match entry.courier_id {
                Some(courier) => plan.entry(courier.get()).or_default().push(demand.clone()),
                None => unassigned.push(demand.clone()),
            }
        }
        Ok(self.calculation(self.tours_for(plan), unassigned))
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn node(id: &str) -> Node {
    Node {
        id: NodeId::from(id),
        latitude: 45.76,
        longitude: 4.84,
    }
}

/// Map made of plain ids.
pub fn map_of(ids: &[&str]) -> CityMap {
    CityMap::new(ids.iter().map(|id| node(id)).collect(), Vec::new())
}

/// Map of every fixture location, depots first.
pub fn lyon_map() -> CityMap {
    let nodes = all_locations()
        .into_iter()
        .map(|location| Node {
            id: NodeId::from(location.id),
            latitude: location.lat,
            longitude: location.lng,
        })
        .collect();
    CityMap::new(nodes, Vec::new())
}

pub fn demand(id: &str, pickup: &str, delivery: &str) -> Demand {
    Demand::new(id, pickup, delivery)
}

/// Builder for test tours with sensible defaults.
#[derive(Debug, Clone)]
pub struct TourBuilder {
    courier: u32,
    stops: Vec<Stop>,
    legs: bool,
    distance: f64,
    duration_sec: f64,
}

impl TourBuilder {
    pub fn new(courier: u32) -> Self {
        Self {
            courier,
            stops: Vec::new(),
            legs: false,
            distance: 0.0,
            duration_sec: 0.0,
        }
    }

    pub fn warehouse(mut self, node: &str) -> Self {
        self.stops.push(Stop::warehouse(node));
        self
    }

    pub fn pickup(mut self, node: &str, demand: &str) -> Self {
        self.stops.push(Stop::new(node, Some(DemandId::from(demand)), StopType::Pickup));
        self
    }

    pub fn delivery(mut self, node: &str, demand: &str) -> Self {
        self.stops.push(Stop::new(node, Some(DemandId::from(demand)), StopType::Delivery));
        self
    }

    pub fn visit(mut self, node: &str) -> Self {
        self.stops.push(Stop {
            id_node: Some(NodeId::from(node)),
            id_demande: None,
            type_stop: None,
        });
        self
    }

    /// Also emit one trajet per pair of consecutive stops.
    pub fn with_legs(mut self) -> Self {
        self.legs = true;
        self
    }

    pub fn totals(mut self, distance: f64, duration_sec: f64) -> Self {
        self.distance = distance;
        self.duration_sec = duration_sec;
        self
    }

    pub fn build(self) -> Tour {
        let trajets = if self.legs {
            self.stops
                .windows(2)
                .map(|pair| {
                    let mut leg = Trajet::between(pair[0].clone(), pair[1].clone());
                    leg.segments.push(Segment {
                        origin: pair[0].id_node.clone(),
                        destination: pair[1].id_node.clone(),
                        name: "Rue de la Republique".to_string(),
                        length: 400.0,
                    });
                    leg.distance = 400.0;
                    leg
                })
                .collect()
        } else {
            Vec::new()
        };
        Tour {
            courier_id: CourierId::new(self.courier),
            trajets,
            stops: self.stops,
            total_distance: self.distance,
            total_duration_sec: self.duration_sec,
            request_count: 0,
        }
    }
}

// ============================================================================
// Console helpers
// ============================================================================

/// Console on the Lyon map with a warehouse at Bellecour.
pub fn lyon_console() -> Console<MockBackend> {
    let mut console = Console::new(MockBackend::new(), ConsoleSettings::default());
    console.load_map(lyon_map());
    console
        .set_warehouse(DEPOTS[0].id, None)
        .expect("mock backend accepts the warehouse");
    console
}

/// Adds `pairs` as demands and returns their ids in order.
pub fn add_demands(console: &mut Console<MockBackend>, pairs: &[(&str, &str)]) -> Vec<DemandId> {
    pairs
        .iter()
        .map(|(pickup, delivery)| {
            console
                .add_demand(*pickup, *delivery, None)
                .expect("demand registered")
        })
        .collect()
}

/// The first `n` pickup/delivery pairs drawn from the Presqu'ile and the
/// left bank.
pub fn sample_pairs(n: usize) -> Vec<(&'static str, &'static str)> {
    PRESQUILE
        .iter()
        .zip(LEFT_BANK.iter())
        .map(|(pickup, delivery)| (pickup.id, delivery.id))
        .take(n)
        .collect()
}
