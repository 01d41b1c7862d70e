//! Migration planning.
//!
//! A plan lists the data operations that populate the ghost tables of a
//! schema change, and the order in which they may run:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `ADD_NULL` | Insert placeholder rows into ghost tables so NOT NULL keys can point at them |
//! | `COPY` | Copy some or all columns of a table into its ghost |
//! | `DROP_NULL` | Remove the placeholder rows again |
//!
//! # Example
//!
//! ```ignore
//! use quantumdb_core::planner::{GreedyMigrationPlanner, MigrationPlanner};
//!
//! let plan = GreedyMigrationPlanner::new().create_plan(&mut state, "root", "v2")?;
//! println!("{}", plan);
//! ```

pub mod graph;
pub mod greedy;
pub mod operation;
pub mod plan;
pub mod progress;
pub mod step;
pub mod validator;

pub use graph::{ForeignKeyGraph, GraphResult};
pub use greedy::GreedyMigrationPlanner;
pub use operation::{Operation, OperationType};
pub use plan::Plan;
pub use progress::{MigrationProgress, Progress};
pub use step::{Step, StepId};
pub use validator::PlanValidator;

use crate::error::Result;
use crate::versioning::State;

/// Produces the data migration plan between two versions.
///
/// Versions on the path that have not been expanded yet are expanded into
/// `state` first, which is why the state is borrowed mutably.
pub trait MigrationPlanner {
    fn create_plan(&self, state: &mut State, from: &str, to: &str) -> Result<Plan>;
}
