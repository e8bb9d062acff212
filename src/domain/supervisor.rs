//! Case supervisor for fault-tolerant actor management.
//!
//! The supervisor owns one linked actor per case and restarts it when it
//! fails or terminates without being asked to stop. A restarted actor
//! recovers from the event log and reschedules its pending timers.

use crate::domain::actor::{CaseActor, CaseActorArgs, CaseMessage};
use crate::domain::types::CaseId;
use async_trait::async_trait;
use ractor::{Actor, ActorCell, ActorProcessingErr, ActorRef, SupervisionEvent};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Messages for the case supervisor.
pub enum SupervisorMsg {
    /// Spawn (or replace) the actor of a case.
    Spawn(CaseActorArgs),
    /// Look up the running actor of a case.
    Get(CaseId, oneshot::Sender<Option<ActorRef<CaseMessage>>>),
    /// Stop a case actor without restarting it.
    Stop(CaseId),
}

/// A running case actor and the arguments to restart it with.
pub struct Supervised {
    pub args: CaseActorArgs,
    pub actor: ActorRef<CaseMessage>,
}

/// The case supervisor actor.
pub struct CaseSupervisor;

pub type SupervisorState = HashMap<CaseId, Supervised>;

impl CaseSupervisor {
    async fn spawn_case(
        myself: &ActorRef<SupervisorMsg>,
        args: CaseActorArgs,
    ) -> Result<Supervised, ActorProcessingErr> {
        let (actor, _handle) =
            CaseActor::spawn_linked(None, CaseActor, args.clone(), myself.get_cell()).await?;
        Ok(Supervised { args, actor })
    }

    fn owner_of(state: &SupervisorState, cell: &ActorCell) -> Option<CaseId> {
        state
            .iter()
            .find(|(_, supervised)| supervised.actor.get_id() == cell.get_id())
            .map(|(case_id, _)| case_id.clone())
    }
}

#[async_trait]
impl Actor for CaseSupervisor {
    type Msg = SupervisorMsg;
    type State = SupervisorState;
    type Arguments = ();

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        _args: (),
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(HashMap::new())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        msg: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match msg {
            SupervisorMsg::Spawn(args) => {
                let case_id = args.case_id.clone();
                if let Some(previous) = state.remove(&case_id) {
                    previous.actor.stop(Some("replaced".to_string()));
                }
                let supervised = CaseSupervisor::spawn_case(&myself, args).await?;
                state.insert(case_id, supervised);
            }
            SupervisorMsg::Get(case_id, reply) => {
                let actor = state.get(&case_id).map(|s| s.actor.clone());
                if reply.send(actor).is_err() {
                    tracing::debug!("Supervisor reply channel closed");
                }
            }
            SupervisorMsg::Stop(case_id) => {
                if let Some(supervised) = state.remove(&case_id) {
                    supervised.actor.stop(None);
                }
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        evt: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let cell = match &evt {
            SupervisionEvent::ActorFailed(cell, err) => {
                tracing::warn!("Case actor failed: {}", err);
                cell
            }
            SupervisionEvent::ActorTerminated(cell, _, _) => cell,
            _ => return Ok(()),
        };
        // Stopped and replaced actors are no longer in the map.
        let Some(case_id) = CaseSupervisor::owner_of(state, cell) else {
            return Ok(());
        };
        if let Some(previous) = state.remove(&case_id) {
            tracing::info!("Restarting actor of case {}", case_id);
            let supervised = CaseSupervisor::spawn_case(&myself, previous.args).await?;
            state.insert(case_id, supervised);
        }
        Ok(())
    }
}

/// Asks the supervisor for the actor of a case.
pub async fn lookup(
    supervisor: &ActorRef<SupervisorMsg>,
    case_id: &CaseId,
) -> anyhow::Result<Option<ActorRef<CaseMessage>>> {
    let (tx, rx) = oneshot::channel();
    supervisor
        .send_message(SupervisorMsg::Get(case_id.clone(), tx))
        .map_err(|e| anyhow::anyhow!("Supervisor unavailable: {}", e))?;
    Ok(rx.await?)
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
