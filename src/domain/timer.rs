//! Timer substrate: turns `TimerSet`/`TimerCanceled` intents into wake-ups.
//!
//! The engine only records when a timer should fire. Something outside the
//! aggregate has to wait and send `FireTimer` back; the substrate does that.
//! A fired timer that turns out stale is ignored by the engine, so the
//! substrate never needs to be exact about cancellation.

use crate::domain::types::{CaseId, PlanItemId, TimestampUtc};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// A timer that came due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub case_id: CaseId,
    pub plan_item: PlanItemId,
    pub moment: TimestampUtc,
}

pub trait TimerSubstrate: Send + Sync {
    /// Schedules (or reschedules) the timer of a plan item.
    fn schedule(&self, case_id: &CaseId, plan_item: &PlanItemId, moment: TimestampUtc);

    fn cancel(&self, case_id: &CaseId, plan_item: &PlanItemId);
}

pub type TimerCallback = Arc<dyn Fn(TimerFired) + Send + Sync>;

type TimerKey = (CaseId, PlanItemId);

/// Sleeps on the tokio runtime and hands due timers to a callback.
pub struct TokioTimerSubstrate {
    callback: TimerCallback,
    handles: Mutex<HashMap<TimerKey, JoinHandle<()>>>,
}

impl TokioTimerSubstrate {
    pub fn new(callback: TimerCallback) -> Self {
        Self {
            callback,
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<TimerKey, JoinHandle<()>>> {
        match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Timers still waiting to fire.
    pub fn pending(&self) -> usize {
        self.handles()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl TimerSubstrate for TokioTimerSubstrate {
    fn schedule(&self, case_id: &CaseId, plan_item: &PlanItemId, moment: TimestampUtc) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("Cannot schedule timer {} without a runtime: {}", plan_item, e);
                return;
            }
        };
        let delay = (moment.0 - Utc::now()).to_std().unwrap_or_default();
        let fired = TimerFired {
            case_id: case_id.clone(),
            plan_item: plan_item.clone(),
            moment,
        };
        let callback = Arc::clone(&self.callback);
        tracing::debug!("Timer {} of case {} due in {:?}", plan_item, case_id, delay);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback(fired);
        });
        let mut handles = self.handles();
        handles.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = handles.insert((case_id.clone(), plan_item.clone()), handle) {
            previous.abort();
        }
    }

    fn cancel(&self, case_id: &CaseId, plan_item: &PlanItemId) {
        if let Some(handle) = self.handles().remove(&(case_id.clone(), plan_item.clone())) {
            tracing::debug!("Timer {} of case {} canceled", plan_item, case_id);
            handle.abort();
        }
    }
}

impl Drop for TokioTimerSubstrate {
    fn drop(&mut self) {
        for (_, handle) in self.handles().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/timer_tests.rs"]
mod tests;
