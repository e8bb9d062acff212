//! Runtime plan-item execution engine.
//!
//! `Case` holds the state and applies events. `CaseContext` runs a command's
//! cascade on a copy of that state and collects the events it produced.

pub mod case;
pub mod case_file;
pub mod case_file_ops;
pub mod context;
pub mod lifecycle;
pub mod migration;
pub mod plan_item;
pub mod sentry;
pub mod stage;
pub mod state;
pub mod state_machine;
pub mod task;

pub use case::Case;
pub use context::CaseContext;
pub use plan_item::{PlanItem, PlanItemKind};
pub use state::{CaseFileItemState, CaseFileItemTransition, State, Transition};
