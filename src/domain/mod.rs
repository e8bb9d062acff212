//! Event-sourced hosting of the case engine.
//!
//! The engine itself (`crate::engine`) is a pure command-to-events
//! function over a `Case`. This module wires it into cqrs-es and ractor.
//!
//! # Architecture
//!
//! - **Commands** (`cqrs/commands.rs`): Intent to change a case
//! - **Events** (`cqrs/events.rs`): Facts that have happened
//! - **Aggregate** (`cqrs/mod.rs`): Command validation and event application
//! - **View** (`view.rs`): Read-only projection for the CLI and queries
//! - **Actor** (`actor.rs`): One mailbox per case, timers included
//!
//! # Usage
//!
//! ```ignore
//! use crate::domain::{create_actor_args, send_command, CaseActor, CaseCommand};
//!
//! let (args, _snapshots, _events) = create_actor_args(&case_id, &config)?;
//! let (actor, _handle) = CaseActor::spawn(None, CaseActor, args).await?;
//! let view = send_command(&actor, CaseCommand::StartCase { ... }).await?;
//! ```

pub mod actor;
pub mod cqrs;
pub mod errors;
pub mod services;
pub mod supervisor;
pub mod timer;
pub mod types;
pub mod view;

// Re-export CQRS types
pub use cqrs::*;

pub use actor::{
    bootstrap_view_from_events, create_actor_args, send_command, CaseActor, CaseActorArgs,
    CaseMessage,
};
pub use errors::CaseError;
pub use services::{CaseClock, CaseServices};
pub use supervisor::{CaseSupervisor, SupervisorMsg};
pub use timer::{TimerFired, TimerSubstrate, TokioTimerSubstrate};
pub use types::{CaseId, CriterionId, PlanItemId, TeamMember, TimestampUtc};
pub use view::{CaseEventEnvelope, CaseView, PlanItemSummary};
