//! Poll-based trigger scheduler.
//!
//! A single long-lived task polls the store, marks due triggers in-flight,
//! and spawns one execution task per trigger. The in-flight set guarantees
//! at most one concurrent fire per trigger id; recurrence advancement
//! happens after the execution finishes, so a slow agent cannot be fired
//! twice for the same occurrence.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use alyn_core::types::ExecutionResult;

use crate::store::TriggerStore;
use crate::types::{to_storage_timestamp, TriggerRecord};

/// Extra look-ahead on top of the poll interval when fetching candidates,
/// absorbing scheduling delays between ticks.
const LOOK_AHEAD_BUFFER: Duration = Duration::from_secs(5);

/// Handle through which the scheduler runs execution agents. Implemented
/// by the agent dispatcher; mocked in tests.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn execute(&self, agent_name: &str, instructions: &str) -> ExecutionResult;
}

pub struct TriggerScheduler {
    store: Arc<TriggerStore>,
    runner: Arc<dyn AgentRunner>,
    poll_interval: Duration,
    in_flight: Mutex<HashSet<i64>>,
}

impl TriggerScheduler {
    pub fn new(
        store: Arc<TriggerStore>,
        runner: Arc<dyn AgentRunner>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            runner,
            poll_interval,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Main poll loop. Runs until `shutdown` broadcasts `true`; in-flight
    /// executions are left to finish on their own tasks.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.poll_interval.as_secs(), "trigger scheduler started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.clone().poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("trigger scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll cycle: fetch candidates inside the look-ahead window and
    /// dispatch the ones actually due this tick.
    pub(crate) async fn poll_once(self: Arc<Self>) {
        let now = Utc::now();
        let bound = now + chrono::Duration::from_std(self.poll_interval + LOOK_AHEAD_BUFFER)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));

        let candidates = match self.store.due_before(bound) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "trigger poll failed");
                return;
            }
        };
        if candidates.is_empty() {
            return;
        }
        debug!(count = candidates.len(), "due trigger candidates");

        for trigger in candidates {
            // check → insert must be atomic with respect to other polls.
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                if in_flight.contains(&trigger.id) {
                    debug!(trigger_id = trigger.id, "trigger already in flight");
                    continue;
                }
                // Candidates come from the look-ahead window; only fire the
                // ones within one poll interval of now.
                if let Some(next_fire) = trigger.next_fire_at() {
                    let lead = next_fire - now;
                    if lead
                        > chrono::Duration::from_std(self.poll_interval)
                            .unwrap_or_else(|_| chrono::Duration::zero())
                    {
                        debug!(
                            trigger_id = trigger.id,
                            seconds_until_due = lead.num_seconds(),
                            "trigger not yet due"
                        );
                        continue;
                    }
                }
                in_flight.insert(trigger.id);
            }

            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.execute_trigger(trigger).await;
            });
        }
    }

    async fn execute_trigger(self: Arc<Self>, trigger: TriggerRecord) {
        let fired_at = Utc::now();
        let instructions = format_instructions(&trigger, fired_at);

        info!(
            trigger_id = trigger.id,
            agent = %trigger.agent_name,
            scheduled_for = ?trigger.next_fire,
            fired_at = %to_storage_timestamp(fired_at),
            "dispatching trigger"
        );

        let result = self
            .runner
            .execute(&trigger.agent_name, &instructions)
            .await;

        // The dispatch window lets a trigger fire slightly ahead of its
        // scheduled instant; advancing from the later of the two keeps the
        // just-fired occurrence from re-arming itself.
        let advance_from = trigger
            .next_fire_at()
            .map_or(fired_at, |scheduled| fired_at.max(scheduled));

        if result.success {
            info!(
                trigger_id = trigger.id,
                agent = %trigger.agent_name,
                response_len = result.response.len(),
                "trigger completed"
            );
            if let Err(e) = self.store.schedule_next_occurrence(&trigger, advance_from) {
                error!(trigger_id = trigger.id, error = %e, "failed to advance trigger");
            }
        } else {
            let error_text = result
                .error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string());
            warn!(trigger_id = trigger.id, agent = %trigger.agent_name, error = %error_text, "trigger execution failed");
            if let Err(e) = self.store.record_failure(trigger.id, &error_text) {
                error!(trigger_id = trigger.id, error = %e, "failed to persist trigger error");
            }
            let outcome = if trigger.recurrence_rule.is_some() {
                // Recurring triggers keep their cadence even after a failure.
                self.store.schedule_next_occurrence(&trigger, advance_from)
            } else {
                // One-shot failures stay visible: next_fire cleared, status kept.
                self.store.clear_next_fire(trigger.id)
            };
            if let Err(e) = outcome {
                error!(trigger_id = trigger.id, error = %e, "failed to reschedule after failure");
            }
        }

        self.in_flight.lock().unwrap().remove(&trigger.id);
    }
}

/// Instruction text handed to the execution agent at fire time.
fn format_instructions(trigger: &TriggerRecord, fired_at: DateTime<Utc>) -> String {
    let fired_str = to_storage_timestamp(fired_at);
    let scheduled_for = trigger.next_fire.clone().unwrap_or_else(|| fired_str.clone());

    let mut metadata = vec![format!("- Trigger ID: {}", trigger.id)];
    if let Some(rule) = &trigger.recurrence_rule {
        metadata.push(format!("- Recurrence: {rule}"));
    }
    if !trigger.timezone.is_empty() {
        metadata.push(format!("- Timezone: {}", trigger.timezone));
    }
    metadata.push(format!("- Start Time (UTC): {}", trigger.start_time));

    format!(
        "Trigger fired at {fired_str} (UTC).\n\
         Scheduled occurrence time: {scheduled_for}.\n\n\
         Metadata:\n{}\n\nPayload:\n{}",
        metadata.join("\n"),
        trigger.payload
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewTrigger;
    use crate::types::parse_timestamp;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct CountingRunner {
        calls: AtomicUsize,
        /// When set, executions block until notified.
        gate: Option<Arc<Notify>>,
        succeed: bool,
    }

    #[async_trait]
    impl AgentRunner for CountingRunner {
        async fn execute(&self, agent_name: &str, _instructions: &str) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.succeed {
                ExecutionResult {
                    agent_name: agent_name.to_string(),
                    success: true,
                    response: "done".to_string(),
                    error: None,
                    tools_executed: vec![],
                }
            } else {
                ExecutionResult::failure(agent_name, "integration exploded")
            }
        }
    }

    fn due_now(rule: Option<&str>) -> NewTrigger {
        NewTrigger {
            agent_name: "Rappels personnels".to_string(),
            payload: "Réunion équipe à 14h".to_string(),
            recurrence_rule: rule.map(str::to_string),
            start_time: None,
            timezone: "UTC".to_string(),
            status: None,
        }
    }

    #[tokio::test]
    async fn at_most_one_dispatch_while_execution_runs() {
        let store = Arc::new(TriggerStore::open_in_memory().unwrap());
        store.create(due_now(None)).unwrap();

        let gate = Arc::new(Notify::new());
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            gate: Some(gate.clone()),
            succeed: true,
        });
        let scheduler = TriggerScheduler::new(store, runner.clone(), Duration::from_secs(10));

        // Three consecutive ticks while the first execution is still blocked.
        for _ in 0..3 {
            scheduler.clone().poll_once().await;
            tokio::task::yield_now().await;
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        gate.notify_waiters();
    }

    #[tokio::test]
    async fn one_shot_completes_after_successful_fire() {
        let store = Arc::new(TriggerStore::open_in_memory().unwrap());
        let record = store.create(due_now(None)).unwrap();

        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            gate: None,
            succeed: true,
        });
        let scheduler =
            TriggerScheduler::new(store.clone(), runner.clone(), Duration::from_secs(10));
        scheduler.clone().poll_once().await;

        // Wait for the spawned execution task to finish.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if scheduler.in_flight.lock().unwrap().is_empty()
                && runner.calls.load(Ordering::SeqCst) == 1
            {
                break;
            }
        }

        let after = store.get(record.id).unwrap().unwrap();
        assert_eq!(after.status, crate::types::TriggerStatus::Completed);
        assert!(after.next_fire.is_none());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recurring_failure_records_error_and_advances() {
        let store = Arc::new(TriggerStore::open_in_memory().unwrap());
        // Armed 2 s out: inside the dispatch window, so the first poll
        // fires it slightly early.
        let record = store
            .create(NewTrigger {
                start_time: Some(to_storage_timestamp(Utc::now() + chrono::Duration::seconds(2))),
                ..due_now(Some("FREQ=MINUTELY;INTERVAL=1"))
            })
            .unwrap();

        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            gate: None,
            succeed: false,
        });
        let scheduler =
            TriggerScheduler::new(store.clone(), runner.clone(), Duration::from_secs(10));
        let fired_around = Utc::now();
        scheduler.clone().poll_once().await;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if scheduler.in_flight.lock().unwrap().is_empty()
                && runner.calls.load(Ordering::SeqCst) == 1
            {
                break;
            }
        }

        let after = store.get(record.id).unwrap().unwrap();
        assert_eq!(after.status, crate::types::TriggerStatus::Active);
        assert!(after.last_error.as_deref().unwrap().contains("integration exploded"));
        let next = after.next_fire_at().unwrap();
        assert!(next >= fired_around + chrono::Duration::seconds(59));
    }

    #[tokio::test]
    async fn look_ahead_candidates_are_not_fired_early() {
        let store = Arc::new(TriggerStore::open_in_memory().unwrap());
        // Due in 12 s: inside the 10 s + 5 s fetch window, outside the
        // 10 s dispatch window.
        store
            .create(NewTrigger {
                start_time: Some(to_storage_timestamp(Utc::now() + chrono::Duration::seconds(12))),
                ..due_now(None)
            })
            .unwrap();

        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            gate: None,
            succeed: true,
        });
        let scheduler = TriggerScheduler::new(store, runner.clone(), Duration::from_secs(10));
        scheduler.clone().poll_once().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(scheduler.in_flight.lock().unwrap().is_empty());
    }

    #[test]
    fn instructions_carry_metadata_and_payload() {
        let trigger = TriggerRecord {
            id: 7,
            agent_name: "Rappels personnels".to_string(),
            payload: "Boire de l'eau".to_string(),
            recurrence_rule: Some("FREQ=DAILY".to_string()),
            start_time: "2026-08-01T09:00:00Z".to_string(),
            next_fire: Some("2026-08-02T09:00:00Z".to_string()),
            timezone: "Europe/Paris".to_string(),
            status: crate::types::TriggerStatus::Active,
            last_error: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let text = format_instructions(&trigger, parse_timestamp("2026-08-02T09:00:03Z").unwrap());
        assert!(text.starts_with("Trigger fired at 2026-08-02T09:00:03Z (UTC)."));
        assert!(text.contains("Scheduled occurrence time: 2026-08-02T09:00:00Z."));
        assert!(text.contains("- Trigger ID: 7"));
        assert!(text.contains("- Recurrence: FREQ=DAILY"));
        assert!(text.contains("- Timezone: Europe/Paris"));
        assert!(text.contains("Payload:\nBoire de l'eau"));
    }
}
