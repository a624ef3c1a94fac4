//! Which courier serves which demand, read off the solver's stop geometry.
//!
//! Both functions here are deliberately inclusive:
//! - a demand belongs to a courier as soon as *either* its pickup or its
//!   delivery node is visited by that courier's route;
//! - a demand is listed as unassigned when *either* the solver or the local
//!   derivation says so.
//!
//! When several tours reach the same demand, the tour that comes last in the
//! input list wins.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::debug;

use crate::model::{AssignmentMap, Demand, DemandId, NodeId, Tour};

/// Maps every demand id to the courier whose route touches it, or `None`.
pub fn derive_assignments(tours: &[Tour], demands: &[Demand]) -> AssignmentMap {
    let mut mapping: AssignmentMap = demands
        .iter()
        .map(|demand| (demand.id.clone(), None))
        .collect();
    if tours.is_empty() {
        return mapping;
    }

    // Node sets are independent per tour; merging stays in input order.
    let visited: Vec<HashSet<&NodeId>> = tours.par_iter().map(Tour::visited_nodes).collect();

    for (tour, nodes) in tours.iter().zip(visited.iter()) {
        for demand in demands {
            if nodes.contains(&demand.pickup_node_id) {
                mapping.insert(demand.id.clone(), Some(tour.courier_id));
            }
            if nodes.contains(&demand.delivery_node_id) {
                mapping.insert(demand.id.clone(), Some(tour.courier_id));
            }
        }
    }

    mapping
}

/// Union, by id, of the solver's unassigned list and every demand the
/// derivation left without a courier. Solver entries come first and win.
pub fn reconcile_unassigned(
    solver_unassigned: &[Demand],
    derived: &AssignmentMap,
    all_demands: &[Demand],
) -> Vec<Demand> {
    let mut seen: HashSet<&DemandId> = HashSet::new();
    let mut merged = Vec::new();

    for demand in solver_unassigned {
        if seen.insert(&demand.id) {
            merged.push(demand.clone());
        }
    }

    let mut local_only = 0usize;
    for demand in all_demands {
        let assigned = derived.get(&demand.id).copied().flatten().is_some();
        if !assigned && seen.insert(&demand.id) {
            merged.push(demand.clone());
            local_only += 1;
        }
    }

    if local_only > 0 {
        debug!(
            local_only,
            solver = solver_unassigned.len(),
            "unassigned demands not reported by the solver"
        );
    }
    merged
}
