//! The operator console: committed state plus every user-triggered
//! operation.
//!
//! Backend round trips that span several requests (commit, restore) are
//! split in two halves. `start_*` validates locally, marks the console
//! busy and hands out a ticket; the ticket's `execute` talks to the
//! backend and may run anywhere; `finish_*` applies the result. Loading or
//! clearing the map bumps a generation counter, so a ticket that outlived
//! its map is refused with [`ConsoleError::Stale`] instead of being
//! applied.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::assignment::{derive_assignments, reconcile_unassigned};
use crate::edit::{CommitPlan, EditPhase, EditSession};
use crate::error::{BackendError, ConsoleError, EditError, RestoreError};
use crate::export::{self, ExportFile, TourStatistics};
use crate::model::{
    AssignmentMap, CityMap, CourierCount, CourierId, DEFAULT_DEPARTURE_TIME,
    DEFAULT_SERVICE_DURATION_SEC, Demand, DemandId, DemandRequestSet, NodeId, Tour, Warehouse,
    duplicate_courier_ids, non_empty_tours,
};
use crate::palette;
use crate::restore::{self, PreparedRestore, RestoreOptions, RestoreOutcome, RestoreReport};
use crate::traits::{DemandDraft, SolverBackend, TourCalculation};

#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    pub default_courier_count: CourierCount,
    pub default_departure_time: String,
    pub default_service_duration_sec: u32,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            default_courier_count: CourierCount::default(),
            default_departure_time: DEFAULT_DEPARTURE_TIME.to_string(),
            default_service_duration_sec: DEFAULT_SERVICE_DURATION_SEC,
        }
    }
}

/// An in-flight commit.
#[derive(Debug, Clone)]
pub struct CommitTicket {
    generation: u64,
    plan: CommitPlan,
}

/// What the backend did with a commit.
#[derive(Debug)]
pub struct CommitExecution {
    /// Staged removals the backend confirmed.
    pub removed: Vec<DemandId>,
    pub calculation: Result<TourCalculation, BackendError>,
}

impl CommitTicket {
    pub fn plan(&self) -> &CommitPlan {
        &self.plan
    }

    /// Removes staged demands one at a time, then sends the full
    /// assignment. A failed removal stops the sequence.
    pub fn execute<B: SolverBackend + ?Sized>(&self, backend: &B) -> CommitExecution {
        let mut removed = Vec::new();
        for id in &self.plan.removals {
            match backend.remove_demand(id) {
                Ok(outcome) if outcome.success => removed.push(id.clone()),
                Ok(_) => {
                    return CommitExecution {
                        removed,
                        calculation: Err(unconfirmed_removal(id)),
                    };
                }
                Err(err) => return CommitExecution { removed, calculation: Err(err) },
            }
        }
        CommitExecution {
            removed,
            calculation: backend.recalculate_assignments(&self.plan.assignments),
        }
    }
}

/// An in-flight restore whose local stages already passed.
#[derive(Debug, Clone)]
pub struct RestoreTicket {
    generation: u64,
    prepared: PreparedRestore,
    courier_count: CourierCount,
    /// Demands registered before the restore, removed before stage 6.
    replaced: Vec<DemandId>,
}

/// What the backend did with a restore.
#[derive(Debug)]
pub struct RestoreExecution {
    /// Previously registered demands the backend confirmed removed.
    pub cleared: Vec<DemandId>,
    pub outcome: Result<RestoreOutcome, RestoreError>,
}

impl RestoreTicket {
    pub fn prepared(&self) -> &PreparedRestore {
        &self.prepared
    }

    /// Removes the demands being replaced one at a time, then registers
    /// and resynchronizes the file. A failed removal stops the restore
    /// before anything from the file is sent.
    pub fn execute<B: SolverBackend + ?Sized>(&self, backend: &B) -> RestoreExecution {
        let mut cleared = Vec::new();
        for id in &self.replaced {
            let reason = match backend.remove_demand(id) {
                Ok(outcome) if outcome.success => {
                    cleared.push(id.clone());
                    continue;
                }
                Ok(_) => "removal not confirmed".to_string(),
                Err(err) => err.to_string(),
            };
            warn!(demand = %id, reason = %reason, "could not clear demand before restore");
            return RestoreExecution {
                cleared,
                outcome: Err(RestoreError::ClearFailed {
                    demand: id.clone(),
                    reason,
                }),
            };
        }
        RestoreExecution {
            cleared,
            outcome: restore::complete(self.prepared.clone(), backend, self.courier_count),
        }
    }
}

#[derive(Debug)]
pub struct Console<B> {
    backend: B,
    settings: ConsoleSettings,
    map: Option<CityMap>,
    requests: DemandRequestSet,
    tours: Option<Vec<Tour>>,
    solver_unassigned: Vec<Demand>,
    courier_count: CourierCount,
    edit: EditSession,
    busy: bool,
    generation: u64,
    duplicate_courier_ids: Vec<CourierId>,
    notices: Vec<String>,
}

impl<B: SolverBackend> Console<B> {
    pub fn new(backend: B, settings: ConsoleSettings) -> Self {
        Self {
            backend,
            courier_count: settings.default_courier_count,
            settings,
            map: None,
            requests: DemandRequestSet::default(),
            tours: None,
            solver_unassigned: Vec::new(),
            edit: EditSession::new(),
            busy: false,
            generation: 0,
            duplicate_courier_ids: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn map(&self) -> Option<&CityMap> {
        self.map.as_ref()
    }

    pub fn requests(&self) -> &DemandRequestSet {
        &self.requests
    }

    pub fn tours(&self) -> Option<&[Tour]> {
        self.tours.as_deref()
    }

    pub fn courier_count(&self) -> CourierCount {
        self.courier_count
    }

    pub fn edit_phase(&self) -> EditPhase {
        self.edit.phase()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Courier ids repeated in the last solver response.
    pub fn duplicate_courier_ids(&self) -> &[CourierId] {
        &self.duplicate_courier_ids
    }

    /// Non-fatal messages collected since the last call.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    /// Replaces the map and forgets everything tied to the old one.
    pub fn load_map(&mut self, map: CityMap) {
        info!(nodes = map.nodes.len(), segments = map.segments.len(), "map loaded");
        self.reset_state();
        self.map = Some(map);
    }

    pub fn clear_map(&mut self) {
        info!("map cleared");
        self.reset_state();
        self.map = None;
    }

    fn reset_state(&mut self) {
        self.generation += 1;
        self.requests = DemandRequestSet::default();
        self.tours = None;
        self.solver_unassigned.clear();
        self.edit.reset();
        self.busy = false;
        self.duplicate_courier_ids.clear();
    }

    pub fn set_courier_count(&mut self, requested: i64) -> CourierCount {
        self.courier_count = CourierCount::new(requested);
        if i64::from(self.courier_count.get()) != requested {
            debug!(requested, stored = %self.courier_count, "courier count clamped");
        }
        self.courier_count
    }

    pub fn set_warehouse(
        &mut self,
        node_id: impl Into<NodeId>,
        departure_time: Option<&str>,
    ) -> Result<(), ConsoleError> {
        self.ensure_idle()?;
        self.ensure_map()?;
        let departure = departure_time
            .filter(|time| !time.trim().is_empty())
            .unwrap_or(self.settings.default_departure_time.as_str());
        let warehouse = Warehouse::new(node_id, departure);
        self.backend.set_warehouse(&warehouse)?;
        info!(node = %warehouse.node_id, departure = %warehouse.departure_time, "warehouse set");
        self.requests.warehouse = Some(warehouse);
        Ok(())
    }

    /// Registers a demand. Tours are recomputed when some already exist
    /// and no edit is open.
    pub fn add_demand(
        &mut self,
        pickup: impl Into<NodeId>,
        delivery: impl Into<NodeId>,
        durations: Option<(u32, u32)>,
    ) -> Result<DemandId, ConsoleError> {
        self.ensure_idle()?;
        self.ensure_map()?;
        let default = self.settings.default_service_duration_sec;
        let (pickup_sec, delivery_sec) = durations.unwrap_or((default, default));
        let draft = DemandDraft::new(pickup, delivery, pickup_sec, delivery_sec);

        let id = self.backend.add_demand(&draft)?;
        info!(
            demand = %id,
            pickup = %draft.pickup_node_id,
            delivery = %draft.delivery_node_id,
            "demand added"
        );
        self.requests.demands.push(draft.into_demand(id.clone()));
        palette::recolor(&mut self.requests.demands);
        self.refresh_tours();
        Ok(id)
    }

    /// Removes a demand, or stages the removal while an edit is open.
    pub fn remove_demand(&mut self, id: &DemandId) -> Result<(), ConsoleError> {
        self.ensure_idle()?;
        self.ensure_known(id)?;
        if self.edit.is_editing() {
            self.edit.stage_removal(id)?;
            return Ok(());
        }

        let outcome = self.backend.remove_demand(id)?;
        if !outcome.success {
            return Err(unconfirmed_removal(id).into());
        }
        match outcome.data {
            Some(set) => {
                debug!(demands = set.demands.len(), "request set replaced by backend copy");
                self.requests = set;
            }
            None => self.requests.demands.retain(|demand| &demand.id != id),
        }
        palette::recolor(&mut self.requests.demands);
        self.solver_unassigned.retain(|demand| &demand.id != id);
        info!(demand = %id, remaining = self.requests.demands.len(), "demand removed");

        if self.requests.demands.is_empty() {
            self.tours = None;
            self.solver_unassigned.clear();
        } else {
            self.refresh_tours();
        }
        Ok(())
    }

    /// Asks the backend to distribute every demand over the configured
    /// courier count.
    pub fn calculate(&mut self) -> Result<&[Tour], ConsoleError> {
        self.ensure_idle()?;
        self.ensure_map()?;
        if self.requests.demands.is_empty() {
            return Err(ConsoleError::NoDemands);
        }
        if self.edit.is_editing() {
            return Err(EditError::Editing.into());
        }
        let calculation = self.backend.calculate_tour(self.courier_count)?;
        self.apply_calculation(calculation);
        Ok(self.tours.as_deref().unwrap_or_default())
    }

    fn refresh_tours(&mut self) {
        if self.tours.is_none() || self.edit.phase() != EditPhase::Committed {
            return;
        }
        match self.backend.calculate_tour(self.courier_count) {
            Ok(calculation) => self.apply_calculation(calculation),
            Err(err) => {
                warn!(error = %err, "tour refresh failed, keeping previous tours");
                self.notices.push(format!("tours could not be recalculated: {err}"));
            }
        }
    }

    fn apply_calculation(&mut self, calculation: TourCalculation) {
        let tours = self.accept_tours(calculation.tours);
        info!(
            tours = tours.len(),
            unassigned = calculation.unassigned_demands.len(),
            "tours updated"
        );
        self.tours = Some(tours);
        self.solver_unassigned = calculation.unassigned_demands;
        self.notices.extend(calculation.warnings);
    }

    /// Placeholder for an empty list; repeated courier ids are recorded and
    /// only their first tour is kept for display.
    fn accept_tours(&mut self, tours: Vec<Tour>) -> Vec<Tour> {
        let tours = non_empty_tours(tours);
        self.duplicate_courier_ids = duplicate_courier_ids(&tours);
        if self.duplicate_courier_ids.is_empty() {
            return tours;
        }
        warn!(duplicates = ?self.duplicate_courier_ids, "solver returned repeated courier ids");
        let repeated = self.duplicate_courier_ids.len();
        self.notices.push(format!("{repeated} courier id(s) appear on several tours"));
        let mut seen = Vec::new();
        tours
            .into_iter()
            .filter(|tour| {
                if seen.contains(&tour.courier_id) {
                    return false;
                }
                seen.push(tour.courier_id);
                true
            })
            .collect()
    }

    /// Assignment derived from the committed tours.
    pub fn committed_assignments(&self) -> AssignmentMap {
        derive_assignments(self.tours.as_deref().unwrap_or_default(), &self.requests.demands)
    }

    /// Assignment to render: the staged overlay while editing.
    pub fn assignments(&self) -> AssignmentMap {
        let committed = self.committed_assignments();
        let Some(overlay) = self.edit.overlay() else {
            return committed;
        };
        committed
            .into_iter()
            .filter(|(id, _)| !overlay.removals.contains(id))
            .map(|(id, courier)| {
                let staged = overlay.assignments.get(&id).copied().unwrap_or(courier);
                (id, staged)
            })
            .collect()
    }

    /// Demands to render: staged removals are hidden while editing.
    pub fn visible_demands(&self) -> Vec<&Demand> {
        let removals = self
            .edit
            .overlay()
            .map(|overlay| overlay.removals.as_slice())
            .unwrap_or_default();
        self.requests
            .demands
            .iter()
            .filter(|demand| !removals.contains(&demand.id))
            .collect()
    }

    /// Solver-reported and locally derived unassigned demands.
    pub fn unassigned(&self) -> Vec<Demand> {
        let visible: Vec<Demand> = self.visible_demands().into_iter().cloned().collect();
        let solver: Vec<Demand> = self
            .solver_unassigned
            .iter()
            .filter(|demand| visible.iter().any(|known| known.id == demand.id))
            .cloned()
            .collect();
        reconcile_unassigned(&solver, &self.assignments(), &visible)
    }

    pub fn begin_edit(&mut self) -> Result<(), ConsoleError> {
        self.ensure_idle()?;
        let committed = self.committed_assignments();
        self.edit.begin(&committed, self.tours.as_deref())?;
        Ok(())
    }

    pub fn stage_reassign(
        &mut self,
        id: &DemandId,
        courier: Option<CourierId>,
    ) -> Result<(), ConsoleError> {
        self.ensure_known(id)?;
        self.edit.stage_reassign(id, courier)?;
        Ok(())
    }

    pub fn stage_removal(&mut self, id: &DemandId) -> Result<(), ConsoleError> {
        self.ensure_known(id)?;
        self.edit.stage_removal(id)?;
        Ok(())
    }

    /// Adds an empty courier to the open edit.
    pub fn add_courier(&mut self) -> Result<CourierId, ConsoleError> {
        let existing: Vec<CourierId> = self
            .tours
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|tour| tour.courier_id)
            .collect();
        Ok(self.edit.add_courier(&existing)?)
    }

    /// Couriers to offer as reassignment targets.
    pub fn couriers(&self) -> Vec<CourierId> {
        let mut couriers: Vec<CourierId> = self
            .tours
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|tour| tour.courier_id)
            .collect();
        if let Some(overlay) = self.edit.overlay() {
            couriers.extend(overlay.added_couriers.iter().copied());
        }
        couriers.sort_unstable();
        couriers.dedup();
        couriers
    }

    pub fn cancel_edit(&mut self) -> Result<(), ConsoleError> {
        self.edit.cancel()?;
        Ok(())
    }

    pub fn start_commit(&mut self) -> Result<CommitTicket, ConsoleError> {
        self.ensure_idle()?;
        let committed = self.committed_assignments();
        let plan = self.edit.start_commit(&self.requests.demands, &committed)?;
        self.busy = true;
        Ok(CommitTicket {
            generation: self.generation,
            plan,
        })
    }

    /// Applies a commit result. The overlay is gone afterwards whatever
    /// happened; on failure the previous tours stay in place.
    pub fn finish_commit(
        &mut self,
        ticket: CommitTicket,
        execution: CommitExecution,
    ) -> Result<&[Tour], ConsoleError> {
        if ticket.generation != self.generation {
            warn!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale commit result"
            );
            return Err(ConsoleError::Stale);
        }
        self.busy = false;
        self.edit.finish_commit();

        if !execution.removed.is_empty() {
            self.requests.demands.retain(|demand| !execution.removed.contains(&demand.id));
            self.solver_unassigned.retain(|demand| !execution.removed.contains(&demand.id));
            palette::recolor(&mut self.requests.demands);
            info!(removed = execution.removed.len(), "staged removals applied");
        }

        match execution.calculation {
            Ok(calculation) => {
                self.apply_calculation(calculation);
                info!("edit committed");
                Ok(self.tours.as_deref().unwrap_or_default())
            }
            Err(err) => {
                warn!(error = %err, "commit failed, keeping previous tours");
                Err(err.into())
            }
        }
    }

    pub fn commit(&mut self) -> Result<&[Tour], ConsoleError> {
        let ticket = self.start_commit()?;
        let execution = ticket.execute(&self.backend);
        self.finish_commit(ticket, execution)
    }

    /// Runs the local restore stages. Nothing has been sent to the backend
    /// when this fails.
    pub fn start_restore(&mut self, contents: &Value) -> Result<RestoreTicket, ConsoleError> {
        self.ensure_idle()?;
        let map = self.map.as_ref().ok_or(ConsoleError::NoMap)?;
        if self.edit.phase() == EditPhase::Editing {
            return Err(EditError::Editing.into());
        }
        let options = RestoreOptions {
            courier_count: self.courier_count,
            default_departure_time: self.settings.default_departure_time.clone(),
            default_service_duration_sec: self.settings.default_service_duration_sec,
        };
        let prepared = restore::prepare(contents, map, &options)?;
        self.busy = true;
        info!(shape = ?prepared.shape, demands = prepared.demands.len(), "restore started");
        Ok(RestoreTicket {
            generation: self.generation,
            prepared,
            courier_count: self.courier_count,
            replaced: self.requests.demands.iter().map(|demand| demand.id.clone()).collect(),
        })
    }

    /// Same as [`Console::start_restore`] on raw file text.
    pub fn start_restore_text(&mut self, text: &str) -> Result<RestoreTicket, ConsoleError> {
        let contents = restore::parse_contents(text)?;
        self.start_restore(&contents)
    }

    /// Replaces demands, warehouse and tours with the restored ones. The
    /// warehouse is kept when the file brought none the backend accepted.
    pub fn finish_restore(
        &mut self,
        ticket: RestoreTicket,
        execution: RestoreExecution,
    ) -> Result<RestoreReport, ConsoleError> {
        if ticket.generation != self.generation {
            warn!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale restore result"
            );
            return Err(ConsoleError::Stale);
        }
        self.busy = false;

        if !execution.cleared.is_empty() {
            self.requests.demands.retain(|demand| !execution.cleared.contains(&demand.id));
            palette::recolor(&mut self.requests.demands);
            self.tours = None;
            self.solver_unassigned.clear();
            self.duplicate_courier_ids.clear();
            info!(cleared = execution.cleared.len(), "previous demands removed for restore");
        }
        let outcome = execution.outcome?;

        self.requests = DemandRequestSet {
            warehouse: outcome.warehouse.or_else(|| self.requests.warehouse.take()),
            demands: outcome.demands,
        };
        let tours = self.accept_tours(outcome.tours);
        self.courier_count = CourierCount::new(i64::try_from(tours.len()).unwrap_or(i64::MAX));
        self.tours = Some(tours);
        self.solver_unassigned = outcome.solver_unassigned;
        self.notices.extend(outcome.report.warnings.iter().cloned());
        Ok(outcome.report)
    }

    pub fn restore(&mut self, contents: &Value) -> Result<RestoreReport, ConsoleError> {
        let ticket = self.start_restore(contents)?;
        let execution = ticket.execute(&self.backend);
        self.finish_restore(ticket, execution)
    }

    pub fn export(&self, saved_at: DateTime<Utc>) -> Result<ExportFile, ConsoleError> {
        let tours = self.tours.as_deref().ok_or(ConsoleError::NoTour)?;
        Ok(export::serialize(
            tours,
            &self.requests.demands,
            self.requests.warehouse.as_ref(),
            saved_at,
        ))
    }

    pub fn itinerary(&self) -> Result<String, ConsoleError> {
        let tours = self.tours.as_deref().ok_or(ConsoleError::NoTour)?;
        Ok(export::itinerary_text(tours))
    }

    pub fn statistics(&self) -> TourStatistics {
        TourStatistics::from_tours(self.tours.as_deref().unwrap_or_default())
    }

    fn ensure_idle(&self) -> Result<(), ConsoleError> {
        if self.busy {
            return Err(ConsoleError::Busy);
        }
        Ok(())
    }

    fn ensure_map(&self) -> Result<(), ConsoleError> {
        self.map.as_ref().map(|_| ()).ok_or(ConsoleError::NoMap)
    }

    fn ensure_known(&self, id: &DemandId) -> Result<(), ConsoleError> {
        if self.requests.contains(id) {
            Ok(())
        } else {
            Err(EditError::UnknownDemand(id.clone()).into())
        }
    }
}

fn unconfirmed_removal(id: &DemandId) -> BackendError {
    BackendError::rejected("removeDemand", format!("removal of {id} not confirmed"))
}
