//! Case actor for CQRS command handling.
//!
//! The CaseActor wraps the CQRS framework of one case and processes one
//! message at a time, so commands against a case never interleave. Timer
//! substrate callbacks come back through the same mailbox.

use crate::config::EngineConfig;
use crate::domain::cqrs::{CaseAggregate, CaseCommand, CaseQuery, DebugLogQuery, TimerQuery};
use crate::domain::errors::CaseError;
use crate::domain::services::CaseServices;
use crate::domain::timer::{TimerFired, TimerSubstrate, TokioTimerSubstrate};
use crate::domain::types::CaseId;
use crate::domain::view::{CaseEventEnvelope, CaseView};
use crate::engine::case::Case;
use crate::engine_paths;
use crate::event_store::{read_log, FileEventStore};
use crate::structured_logger::StructuredLogger;
use async_trait::async_trait;
use cqrs_es::{AggregateError, CqrsFramework, EventStore, Query};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch, RwLock};

/// Messages that can be sent to the case actor.
pub enum CaseMessage {
    /// Execute a command and return the updated view (or error).
    Command(Box<CaseCommand>, oneshot::Sender<Result<CaseView, CaseError>>),
    /// Get the current view.
    GetView(oneshot::Sender<CaseView>),
    /// Load the full case state from the store.
    GetCase(oneshot::Sender<Result<Option<Case>, CaseError>>),
    /// A timer came due.
    TimerFired(TimerFired),
}

/// Arguments for spawning a case actor.
#[derive(Clone)]
pub struct CaseActorArgs {
    pub case_id: CaseId,
    pub log_path: PathBuf,
    pub snapshot_path: PathBuf,
    /// Snapshot after every N events.
    pub snapshot_every: u64,
    /// Shared view for projection.
    pub view: Arc<RwLock<CaseView>>,
    pub snapshot_tx: watch::Sender<CaseView>,
    pub event_tx: broadcast::Sender<CaseEventEnvelope>,
    pub services: CaseServices,
    /// Substrate to use instead of the actor's own tokio timers.
    pub timers: Option<Arc<dyn TimerSubstrate>>,
    /// Structured debug log, when enabled.
    pub debug_log_path: Option<PathBuf>,
}

/// State maintained by the case actor.
pub struct CaseActorState {
    pub cqrs: CqrsFramework<CaseAggregate, FileEventStore>,
    pub store: FileEventStore,
    pub case_id: CaseId,
    pub view: Arc<RwLock<CaseView>>,
    pub timers: Arc<dyn TimerSubstrate>,
    pub logger: Option<Arc<StructuredLogger>>,
}

/// The case actor.
pub struct CaseActor;

impl CaseActor {
    pub fn build_store(args: &CaseActorArgs) -> FileEventStore {
        FileEventStore::new(
            args.log_path.clone(),
            args.snapshot_path.clone(),
            args.snapshot_every,
        )
    }

    /// Builds the CQRS framework from actor arguments.
    pub fn build_cqrs(
        args: &CaseActorArgs,
        timers: Arc<dyn TimerSubstrate>,
        logger: Option<Arc<StructuredLogger>>,
    ) -> CqrsFramework<CaseAggregate, FileEventStore> {
        let query = CaseQuery::new(
            args.view.clone(),
            args.snapshot_tx.clone(),
            args.event_tx.clone(),
        );
        let mut queries: Vec<Box<dyn Query<CaseAggregate>>> =
            vec![Box::new(query), Box::new(TimerQuery::new(timers))];
        if let Some(logger) = logger {
            queries.push(Box::new(DebugLogQuery::new(logger)));
        }

        CqrsFramework::new(Self::build_store(args), queries, args.services.clone())
    }
}

/// Maps framework errors to the domain error type.
pub fn map_aggregate_error(err: AggregateError<CaseError>) -> CaseError {
    match err {
        AggregateError::UserError(err) => err,
        AggregateError::AggregateConflict => CaseError::ConcurrencyConflict {
            message: "aggregate was modified concurrently".to_string(),
        },
        err => CaseError::StorageFailure {
            message: err.to_string(),
        },
    }
}

fn own_timers(myself: &ActorRef<CaseMessage>) -> Arc<dyn TimerSubstrate> {
    let actor = myself.clone();
    Arc::new(TokioTimerSubstrate::new(Arc::new(move |fired| {
        if actor.send_message(CaseMessage::TimerFired(fired)).is_err() {
            tracing::debug!("Case actor stopped before its timer fired");
        }
    })))
}

#[async_trait]
impl Actor for CaseActor {
    type Msg = CaseMessage;
    type State = CaseActorState;
    type Arguments = CaseActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let timers = match &args.timers {
            Some(timers) => Arc::clone(timers),
            None => own_timers(&myself),
        };
        let logger = match &args.debug_log_path {
            Some(path) => match StructuredLogger::new(args.case_id.as_str(), path) {
                Ok(logger) => Some(Arc::new(logger)),
                Err(e) => {
                    tracing::warn!("Debug log disabled for {}: {:#}", args.case_id, e);
                    None
                }
            },
            None => None,
        };

        // Timers set before a restart are still owed.
        for (plan_item, moment) in args.view.read().await.pending_timers() {
            timers.schedule(&args.case_id, &plan_item, moment);
        }

        let cqrs = CaseActor::build_cqrs(&args, Arc::clone(&timers), logger.clone());
        Ok(CaseActorState {
            cqrs,
            store: CaseActor::build_store(&args),
            case_id: args.case_id,
            view: args.view,
            timers,
            logger,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CaseMessage::Command(boxed_cmd, reply) => {
                let cmd = *boxed_cmd;
                let mapped = execute(state, cmd).await;
                if reply.send(mapped).is_err() {
                    tracing::debug!("Command reply channel closed");
                }
            }
            CaseMessage::GetView(reply) => {
                let view = state.view.read().await.clone();
                if reply.send(view).is_err() {
                    tracing::debug!("Command reply channel closed");
                }
            }
            CaseMessage::GetCase(reply) => {
                let loaded = state
                    .store
                    .load_aggregate(state.case_id.as_str())
                    .await
                    .map(|context| context.aggregate.case().cloned())
                    .map_err(map_aggregate_error);
                if reply.send(loaded).is_err() {
                    tracing::debug!("Command reply channel closed");
                }
            }
            CaseMessage::TimerFired(fired) => {
                if fired.case_id != state.case_id {
                    tracing::warn!(
                        "Timer for case {} delivered to case {}",
                        fired.case_id,
                        state.case_id
                    );
                    return Ok(());
                }
                if let Some(logger) = &state.logger {
                    logger.log_timer_fired(fired.plan_item.as_str(), &fired.moment.to_rfc3339());
                }
                let cmd = CaseCommand::FireTimer {
                    plan_item: fired.plan_item,
                    moment: fired.moment,
                };
                if let Err(err) = execute(state, cmd).await {
                    tracing::warn!("Timer of case {} was not applied: {}", state.case_id, err);
                }
            }
        }

        Ok(())
    }
}

async fn execute(state: &mut CaseActorState, cmd: CaseCommand) -> Result<CaseView, CaseError> {
    let name = cmd.name();
    if let Some(logger) = &state.logger {
        logger.log_command(&cmd);
    }
    let before = state.view.read().await.last_event_sequence();
    let result = state
        .cqrs
        .execute(state.case_id.as_str(), cmd)
        .await
        .map_err(map_aggregate_error);
    let view = state.view.read().await.clone();
    if let Some(logger) = &state.logger {
        let produced = view.last_event_sequence().saturating_sub(before) as usize;
        logger.log_command_result(name, &result.clone().map(|()| produced));
    }
    if let Err(err) = &result {
        tracing::debug!("{} on case {} rejected: {}", name, state.case_id, err);
    }
    result.map(|()| view)
}

/// Sends a command to a case actor and waits for the resulting view.
pub async fn send_command(actor: &ActorRef<CaseMessage>, command: CaseCommand) -> anyhow::Result<CaseView> {
    let (tx, rx) = oneshot::channel();
    actor
        .send_message(CaseMessage::Command(Box::new(command), tx))
        .map_err(|e| anyhow::anyhow!("Case actor unavailable: {}", e))?;
    let view = rx.await??;
    Ok(view)
}

/// Bootstraps a CaseView by replaying events from an event log file.
///
/// Returns `CaseView::default()` if the log file doesn't exist or cannot be read.
pub fn bootstrap_view_from_events(log_path: &Path, aggregate_id: &str) -> CaseView {
    let mut view = CaseView::default();
    match read_log(log_path, Some(aggregate_id)) {
        Ok(records) => {
            for stored in records {
                view.apply_event(&stored.aggregate_id, &stored.event, stored.sequence);
            }
        }
        Err(e) => tracing::warn!("Cannot bootstrap view of {}: {:#}", aggregate_id, e),
    }
    view
}

/// Creates actor arguments for a case from the engine configuration.
///
/// For existing cases the initial CaseView is bootstrapped from the event
/// log. For new cases the view starts empty and fills up with StartCase.
pub fn create_actor_args(
    case_id: &CaseId,
    config: &EngineConfig,
) -> anyhow::Result<(
    CaseActorArgs,
    watch::Receiver<CaseView>,
    broadcast::Receiver<CaseEventEnvelope>,
)> {
    let data_dir = engine_paths::data_dir(config.storage.data_dir.as_deref())?;
    let log_path = engine_paths::case_event_log_path(&data_dir, case_id.as_str())?;
    let snapshot_path = engine_paths::case_snapshot_path(&data_dir, case_id.as_str())?;
    let debug_log_path = if config.debug_log.enabled {
        Some(engine_paths::case_debug_log_path(&data_dir, case_id.as_str())?)
    } else {
        None
    };

    let initial_view = bootstrap_view_from_events(&log_path, case_id.as_str());
    let view = Arc::new(RwLock::new(initial_view.clone()));
    let (snapshot_tx, snapshot_rx) = watch::channel(initial_view);
    let (event_tx, event_rx) = broadcast::channel(256);

    let args = CaseActorArgs {
        case_id: case_id.clone(),
        log_path,
        snapshot_path,
        snapshot_every: config.storage.snapshot_every,
        view,
        snapshot_tx,
        event_tx,
        services: CaseServices::new(config.evaluators()?),
        timers: None,
        debug_log_path,
    };

    Ok((args, snapshot_rx, event_rx))
}

#[cfg(test)]
#[path = "tests/actor_tests.rs"]
mod tests;
