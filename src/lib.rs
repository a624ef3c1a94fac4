//! courier-console core
//!
//! Tour/demand reconciliation for a cycle-courier dispatch console: which
//! courier serves which demand, staged edits of that assignment, and
//! import/export of tour files. Route optimisation itself is delegated to
//! an external backend behind [`traits::SolverBackend`].

pub mod model;
pub mod error;
pub mod traits;
pub mod client;
pub mod palette;
pub mod assignment;
pub mod edit;
pub mod restore;
pub mod export;
pub mod console;

pub use client::{HttpSolverClient, SolverConfig};
pub use console::{Console, ConsoleSettings};
pub use error::{BackendError, ConsoleError, EditError, RestoreError};
