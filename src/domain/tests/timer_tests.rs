use super::*;
use chrono::Duration;
use tokio::sync::mpsc;

fn substrate() -> (TokioTimerSubstrate, mpsc::UnboundedReceiver<TimerFired>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: TimerCallback = Arc::new(move |fired| {
        let _ = tx.send(fired);
    });
    (TokioTimerSubstrate::new(callback), rx)
}

fn in_millis(millis: i64) -> TimestampUtc {
    TimestampUtc(Utc::now() + Duration::milliseconds(millis))
}

#[tokio::test]
async fn test_due_timer_fires() {
    let (timers, mut rx) = substrate();
    let case_id = CaseId::from("case-1");
    let plan_item = PlanItemId::from("timer");
    let moment = in_millis(-1_000);

    timers.schedule(&case_id, &plan_item, moment);

    let fired = rx.recv().await.expect("timer fired");
    assert_eq!(
        fired,
        TimerFired {
            case_id,
            plan_item,
            moment,
        }
    );
}

#[tokio::test]
async fn test_canceled_timer_never_fires() {
    let (timers, mut rx) = substrate();
    let case_id = CaseId::from("case-1");
    let plan_item = PlanItemId::from("timer");

    timers.schedule(&case_id, &plan_item, in_millis(200));
    assert_eq!(timers.pending(), 1);
    timers.cancel(&case_id, &plan_item);
    assert_eq!(timers.pending(), 0);

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_rescheduling_replaces_previous_timer() {
    let (timers, mut rx) = substrate();
    let case_id = CaseId::from("case-1");
    let plan_item = PlanItemId::from("timer");
    let later = in_millis(50);

    timers.schedule(&case_id, &plan_item, in_millis(10_000));
    timers.schedule(&case_id, &plan_item, later);

    let fired = rx.recv().await.expect("timer fired");
    assert_eq!(fired.moment, later);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_fired_timers_are_released() {
    let (timers, mut rx) = substrate();
    let case_id = CaseId::from("case-1");
    for index in 0..5 {
        timers.schedule(&case_id, &PlanItemId::from(format!("timer-{}", index)), in_millis(-10));
    }
    for _ in 0..5 {
        rx.recv().await.expect("timer fired");
    }
    // The callback runs just before the task finishes.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(timers.pending(), 0);

    timers.schedule(&case_id, &PlanItemId::from("later"), in_millis(10_000));

    assert_eq!(timers.handles().len(), 1);
    timers.cancel(&case_id, &PlanItemId::from("later"));
    assert!(timers.handles().is_empty());
}

#[test]
fn test_schedule_without_runtime_is_ignored() {
    let (timers, _rx) = substrate();

    timers.schedule(&CaseId::from("case-1"), &PlanItemId::from("timer"), in_millis(0));

    assert_eq!(timers.pending(), 0);
}
