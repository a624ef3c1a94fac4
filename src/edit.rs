//! Staged, reversible editing of the courier assignment.
//!
//! ```text
//! Committed --begin--> Editing --start_commit--> Committing --finish--> Committed
//!                         \------cancel-----------------------------------^
//! ```
//!
//! While editing, every change lands in an overlay. Nothing reaches the
//! backend until the commit, and the overlay is thrown away after the
//! commit whatever its outcome; it is never merged piecemeal.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::EditError;
use crate::model::{AssignmentMap, CourierId, Demand, DemandId, MAX_COURIERS, Tour};
use crate::traits::AssignmentRequest;

/// Pending changes over the committed assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedEdit {
    pub assignments: AssignmentMap,
    pub removals: Vec<DemandId>,
    /// Couriers added during this edit that have no tour yet.
    pub added_couriers: Vec<CourierId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    Committed,
    Editing,
    Committing,
}

/// The backend work a commit has to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitPlan {
    /// Demands to delete on the backend before recalculating.
    pub removals: Vec<DemandId>,
    /// One entry per remaining demand.
    pub assignments: Vec<AssignmentRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct EditSession {
    overlay: Option<StagedEdit>,
    committing: bool,
}

impl EditSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> EditPhase {
        match (&self.overlay, self.committing) {
            (_, true) => EditPhase::Committing,
            (Some(_), false) => EditPhase::Editing,
            (None, false) => EditPhase::Committed,
        }
    }

    pub fn is_editing(&self) -> bool {
        self.phase() == EditPhase::Editing
    }

    pub fn overlay(&self) -> Option<&StagedEdit> {
        self.overlay.as_ref()
    }

    /// Snapshots `committed` into a fresh overlay.
    ///
    /// Beginning again while already editing keeps the current overlay.
    pub fn begin(
        &mut self,
        committed: &AssignmentMap,
        tours: Option<&[Tour]>,
    ) -> Result<(), EditError> {
        match self.phase() {
            EditPhase::Committing => return Err(EditError::Committing),
            EditPhase::Editing => {
                debug!("edit already open, keeping staged changes");
                return Ok(());
            }
            EditPhase::Committed => {}
        }
        if tours.is_none() {
            return Err(EditError::NoTour);
        }
        self.overlay = Some(StagedEdit {
            assignments: committed.clone(),
            removals: Vec::new(),
            added_couriers: Vec::new(),
        });
        info!(demands = committed.len(), "edit started");
        Ok(())
    }

    /// Stages `demand` for `courier` (`None` unassigns). Restaging replaces.
    pub fn stage_reassign(
        &mut self,
        demand: &DemandId,
        courier: Option<CourierId>,
    ) -> Result<(), EditError> {
        let overlay = self.editing_overlay()?;
        if overlay.removals.contains(demand) {
            return Err(EditError::StagedForRemoval(demand.clone()));
        }
        overlay.assignments.insert(demand.clone(), courier);
        debug!(demand = %demand, ?courier, "reassignment staged");
        Ok(())
    }

    /// Stages `demand` for deletion and drops any staged assignment for it.
    pub fn stage_removal(&mut self, demand: &DemandId) -> Result<(), EditError> {
        let overlay = self.editing_overlay()?;
        overlay.assignments.remove(demand);
        if !overlay.removals.contains(demand) {
            overlay.removals.push(demand.clone());
        }
        debug!(demand = %demand, "removal staged");
        Ok(())
    }

    /// Adds an empty courier numbered one past the highest known id.
    pub fn add_courier(&mut self, existing: &[CourierId]) -> Result<CourierId, EditError> {
        let overlay = self.editing_overlay()?;
        let known: HashSet<CourierId> = existing
            .iter()
            .chain(overlay.added_couriers.iter())
            .copied()
            .collect();
        if known.len() >= MAX_COURIERS as usize {
            return Err(EditError::CourierLimit);
        }
        let next = known.iter().map(|id| id.get()).max().unwrap_or(0).saturating_add(1);
        let courier = CourierId::new(next);
        overlay.added_couriers.push(courier);
        info!(courier = %courier, "courier added to edit");
        Ok(courier)
    }

    /// What the operator sees: the overlay while editing, else `committed`.
    pub fn effective_assignments(&self, committed: &AssignmentMap) -> AssignmentMap {
        match &self.overlay {
            Some(overlay) => overlay.assignments.clone(),
            None => committed.clone(),
        }
    }

    /// Builds the full-set request and moves to `Committing`.
    ///
    /// Every demand not staged for removal gets an entry: the staged
    /// courier if there is one, otherwise the committed one.
    pub fn start_commit(
        &mut self,
        demands: &[Demand],
        committed: &AssignmentMap,
    ) -> Result<CommitPlan, EditError> {
        let overlay = match self.phase() {
            EditPhase::Editing => self.overlay.as_ref().ok_or(EditError::NotEditing)?,
            EditPhase::Committing => return Err(EditError::Committing),
            EditPhase::Committed => return Err(EditError::NotEditing),
        };

        let assignments = demands
            .iter()
            .filter(|demand| !overlay.removals.contains(&demand.id))
            .map(|demand| {
                let courier = match overlay.assignments.get(&demand.id) {
                    Some(staged) => *staged,
                    None => committed.get(&demand.id).copied().flatten(),
                };
                AssignmentRequest::new(demand.id.clone(), courier)
            })
            .collect();

        let plan = CommitPlan {
            removals: overlay
                .removals
                .iter()
                .filter(|id| demands.iter().any(|demand| &demand.id == *id))
                .cloned()
                .collect(),
            assignments,
        };
        self.committing = true;
        info!(
            assignments = plan.assignments.len(),
            removals = plan.removals.len(),
            "commit started"
        );
        Ok(plan)
    }

    /// Ends a commit, successful or not. The overlay is discarded.
    pub fn finish_commit(&mut self) {
        self.overlay = None;
        self.committing = false;
    }

    /// Discards the overlay without touching the backend.
    pub fn cancel(&mut self) -> Result<(), EditError> {
        if self.committing {
            return Err(EditError::Committing);
        }
        if self.overlay.take().is_some() {
            info!("edit cancelled");
        }
        Ok(())
    }

    /// Forgets everything, including an in-flight commit.
    pub fn reset(&mut self) {
        self.overlay = None;
        self.committing = false;
    }

    fn editing_overlay(&mut self) -> Result<&mut StagedEdit, EditError> {
        if self.committing {
            return Err(EditError::Committing);
        }
        self.overlay.as_mut().ok_or(EditError::NotEditing)
    }
}
