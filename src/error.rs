//! Error types raised by the console.
//!
//! Local validation problems and backend failures are separate enums so
//! callers can tell "nothing was sent" apart from "the backend said no".
//! Partial-data tolerance never ends up here; it is reported as warnings.

use thiserror::Error;

use crate::model::{DemandId, MAX_COURIERS};

/// Failures talking to the routing backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never got a usable HTTP response.
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend answered with an error status or `success: false`.
    #[error("backend rejected {operation}: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },
    /// The backend answered successfully but without the expected payload.
    #[error("backend response to {operation} is missing {field}")]
    MissingData {
        operation: &'static str,
        field: &'static str,
    },
}

impl BackendError {
    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
        }
    }
}

/// Misuse of the staged edit transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("no computed tour to edit")]
    NoTour,
    #[error("no edit in progress")]
    NotEditing,
    #[error("an edit is being committed")]
    Committing,
    #[error("an edit is open; commit or cancel it first")]
    Editing,
    #[error("demand {0} is not part of the current request set")]
    UnknownDemand(DemandId),
    #[error("demand {0} is staged for removal")]
    StagedForRemoval(DemandId),
    #[error("courier limit reached: at most {MAX_COURIERS} couriers")]
    CourierLimit,
}

/// Reasons a tour file could not be restored.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("tour file is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("tour file has no recognisable tour list")]
    UnrecognizedShape,
    #[error("no demand could be determined from the tour file")]
    NoDemands,
    #[error("no demand of the tour file matches the loaded map ({dropped} dropped)")]
    NoMatchingDemands { dropped: usize },
    #[error("existing demand {demand} could not be removed before restoring: {reason}")]
    ClearFailed { demand: DemandId, reason: String },
    #[error("no demand could be registered with the backend ({failed} failed)")]
    RegistrationFailed { failed: usize },
}

/// Errors surfaced to the operator at the console boundary.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("another operation is in progress")]
    Busy,
    #[error("no map is loaded")]
    NoMap,
    #[error("no demands are loaded")]
    NoDemands,
    #[error("no computed tour")]
    NoTour,
    #[error("result discarded: the console state changed while it was in flight")]
    Stale,
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
