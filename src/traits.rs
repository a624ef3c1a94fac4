//! Seam between the console and the external routing backend.
//!
//! The backend owns demand ids and does the actual tour optimisation; the
//! console only ever talks to it through [`SolverBackend`]. Tests implement
//! the trait with in-memory mocks.

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::model::{
    CourierCount, CourierId, Demand, DemandId, DemandRequestSet, NodeId, Tour, Warehouse,
};

/// A demand about to be registered; the backend answers with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemandDraft {
    pub pickup_node_id: NodeId,
    pub delivery_node_id: NodeId,
    pub pickup_duration_sec: u32,
    pub delivery_duration_sec: u32,
}

impl DemandDraft {
    pub fn new(
        pickup: impl Into<NodeId>,
        delivery: impl Into<NodeId>,
        pickup_duration_sec: u32,
        delivery_duration_sec: u32,
    ) -> Self {
        Self {
            pickup_node_id: pickup.into(),
            delivery_node_id: delivery.into(),
            pickup_duration_sec,
            delivery_duration_sec,
        }
    }

    pub fn from_demand(demand: &Demand) -> Self {
        Self {
            pickup_node_id: demand.pickup_node_id.clone(),
            delivery_node_id: demand.delivery_node_id.clone(),
            pickup_duration_sec: demand.pickup_duration_sec,
            delivery_duration_sec: demand.delivery_duration_sec,
        }
    }

    /// The registered demand once the backend has assigned `id`.
    pub fn into_demand(self, id: DemandId) -> Demand {
        Demand {
            id,
            pickup_node_id: self.pickup_node_id,
            delivery_node_id: self.delivery_node_id,
            pickup_duration_sec: self.pickup_duration_sec,
            delivery_duration_sec: self.delivery_duration_sec,
            color: None,
        }
    }
}

/// One entry of a full-set "declare all assignments" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    pub demand_id: DemandId,
    pub courier_id: Option<CourierId>,
}

impl AssignmentRequest {
    pub fn new(demand_id: DemandId, courier_id: Option<CourierId>) -> Self {
        Self { demand_id, courier_id }
    }
}

/// What the backend returns for both tour calculation endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourCalculation {
    #[serde(default)]
    pub tours: Vec<Tour>,
    #[serde(default)]
    pub unassigned_demands: Vec<Demand>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovalOutcome {
    pub success: bool,
    /// The backend's request set after the removal, when it sends one.
    pub data: Option<DemandRequestSet>,
}

/// Request/response contract of the routing backend.
pub trait SolverBackend {
    /// Registers a demand and returns the id the backend assigned to it.
    fn add_demand(&self, draft: &DemandDraft) -> Result<DemandId, BackendError>;

    fn remove_demand(&self, id: &DemandId) -> Result<RemovalOutcome, BackendError>;

    fn set_warehouse(&self, warehouse: &Warehouse) -> Result<(), BackendError>;

    /// Lets the backend distribute every demand over `couriers` couriers.
    fn calculate_tour(&self, couriers: CourierCount) -> Result<TourCalculation, BackendError>;

    /// Recomputes tours from an explicit assignment of every demand.
    fn recalculate_assignments(
        &self,
        assignments: &[AssignmentRequest],
    ) -> Result<TourCalculation, BackendError>;
}
