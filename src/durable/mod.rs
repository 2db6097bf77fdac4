//! Durable execution: augments the live [`crate::execution::Execution`]
//! with an event log, checkpointing and deterministic replay.

pub mod checkpoint;
pub mod events;

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use snafu::prelude::*;
use tokio::sync::Mutex;

use crate::context::Context;
use crate::execution::Execution;
use crate::result::Result as TaskResult;
use crate::signal;
use crate::store::{self, WorkflowStore};

use checkpoint::{Checkpoint, CheckpointStatus};
use events::{EventKind, LoggedEvent};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("step '{name}' already completed in this run"))]
    DuplicateStep { name: String },
    #[snafu(display("step '{name}' failed: {error}"))]
    StepFailed { name: String, error: String },
    #[snafu(display("store error: {source}"))]
    Store { source: store::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of walking the replay log for one `condition` call.
enum ConditionReplay {
    /// The log already recorded how this condition resolved.
    Resolved(bool),
    /// The log covered the `condition.scheduled` marker but ran out before
    /// a resolution; `deadline` (if any) is the one originally scheduled.
    Exhausted { deadline: Option<chrono::DateTime<Utc>> },
    /// This condition was never logged; run it live from scratch.
    NotScheduled,
}

struct State {
    sequence: u64,
    condition_counter: u64,
    sleep_counter: u64,
    completed_steps: HashSet<String>,
    replay_events: VecDeque<LoggedEvent>,
    replaying: bool,
}

/// One durably-executing workflow run: owns the live [`Execution`] plus
/// everything needed to log, checkpoint and replay it.
pub struct DurableExecution {
    pub execution: Arc<Execution>,
    store: Arc<dyn WorkflowStore>,
    state: Mutex<State>,
}

impl DurableExecution {
    /// Start a brand-new run: append `workflow.started` and begin live.
    pub async fn start_live(
        execution: Arc<Execution>,
        store: Arc<dyn WorkflowStore>,
        args: Value,
    ) -> Result<Self> {
        let durable = Self {
            execution,
            store,
            state: Mutex::new(State {
                sequence: 0,
                condition_counter: 0,
                sleep_counter: 0,
                completed_steps: HashSet::new(),
                replay_events: VecDeque::new(),
                replaying: false,
            }),
        };
        durable
            .append(EventKind::WorkflowStarted {
                workflow_type: durable.execution.workflow_type().to_string(),
                args,
            })
            .await?;
        Ok(durable)
    }

    /// Reconstruct a run from its durable log: restore the last checkpoint
    /// (if any) and queue the events past it for replay. Returns the
    /// original start args alongside the reconstructed run so the caller
    /// can re-invoke the workflow body.
    pub async fn start_recovery(execution: Arc<Execution>, store: Arc<dyn WorkflowStore>) -> Result<(Self, Value)> {
        let workflow_id = execution.workflow_id().to_string();
        let all_events = store.get_events(&workflow_id).await.context(StoreSnafu)?;
        let args = all_events
            .iter()
            .find_map(|e| match &e.kind {
                EventKind::WorkflowStarted { args, .. } => Some(args.clone()),
                _ => None,
            })
            .unwrap_or(Value::Null);

        let checkpoint = store.get_latest_checkpoint(&workflow_id).await.context(StoreSnafu)?;

        let (sequence, condition_counter, sleep_counter, completed_steps, after) = match &checkpoint {
            Some(cp) => (
                cp.sequence + 1,
                cp.condition_counter,
                cp.sleep_counter,
                cp.completed_steps_set(),
                cp.sequence,
            ),
            None => (1, 0, 0, HashSet::new(), 0),
        };

        if let Some(cp) = &checkpoint {
            execution.set_context(Context::from_value(cp.context.clone())).await;
        }

        let replay_events: VecDeque<LoggedEvent> = all_events.into_iter().filter(|e| e.sequence > after).collect();
        let replaying = !replay_events.is_empty();

        let durable = Self {
            execution,
            store,
            state: Mutex::new(State {
                sequence,
                condition_counter,
                sleep_counter,
                completed_steps,
                replay_events,
                replaying,
            }),
        };
        Ok((durable, args))
    }

    #[must_use]
    pub async fn is_replaying(&self) -> bool {
        self.state.lock().await.replaying
    }

    #[must_use]
    pub async fn completed_steps(&self) -> HashSet<String> {
        self.state.lock().await.completed_steps.clone()
    }

    #[must_use]
    pub async fn current_sequence(&self) -> u64 {
        self.state.lock().await.sequence
    }

    #[must_use]
    pub fn store_ref(&self) -> &dyn WorkflowStore {
        self.store.as_ref()
    }

    async fn append(&self, kind: EventKind) -> Result<LoggedEvent> {
        let mut state = self.state.lock().await;
        let event = LoggedEvent::new(state.sequence, kind);
        state.sequence += 1;
        drop(state);
        self.store
            .append_event(self.execution.workflow_id(), event.clone())
            .await
            .context(StoreSnafu)?;
        Ok(event)
    }

    async fn checkpoint(&self, status: CheckpointStatus) -> Result<()> {
        let state = self.state.lock().await;
        let checkpoint = Checkpoint {
            workflow_id: self.execution.workflow_id().to_string(),
            workflow_type: self.execution.workflow_type().to_string(),
            sequence: state.sequence.saturating_sub(1),
            context: self.execution.context().await.to_value(),
            status,
            completed_steps: state.completed_steps.iter().cloned().collect(),
            condition_counter: state.condition_counter,
            sleep_counter: state.sleep_counter,
            created_at: Utc::now(),
        };
        drop(state);
        self.store.save_checkpoint(checkpoint).await.context(StoreSnafu)
    }

    /// Deliver a signal: logs `signal.received` unless we're still
    /// draining replay (in which case the event log itself is the source
    /// of truth and must not be double-written).
    pub async fn signal(&self, name: &str, args: Value) -> std::result::Result<(), signal::Error> {
        let replaying = self.state.lock().await.replaying;
        if !replaying {
            let _ = self
                .append(EventKind::SignalReceived {
                    signal: name.to_string(),
                    payload: args.clone(),
                })
                .await;
        }
        self.execution.signal(name, args).await
    }

    /// Drain any leading `signal.received` events through the live signal
    /// path before inspecting the next step/condition/sleep marker.
    async fn drain_leading_signals(&self) {
        loop {
            let next = {
                let state = self.state.lock().await;
                match state.replay_events.front() {
                    Some(LoggedEvent { kind: EventKind::SignalReceived { .. }, .. }) => state.replay_events[0].clone(),
                    _ => return,
                }
            };
            let EventKind::SignalReceived { signal, payload } = next.kind else {
                return;
            };
            self.state.lock().await.replay_events.pop_front();
            let _ = self.execution.signal(&signal, payload).await;
        }
    }

    /// A durable step: replays its recorded result if the log already
    /// covers it, otherwise runs `f` live and logs the outcome.
    pub async fn step<F, Fut>(&self, name: &str, f: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, String>>,
    {
        self.drain_leading_signals().await;

        let replay_outcome = {
            let mut state = self.state.lock().await;
            if !state.replaying {
                None
            } else {
                match state.replay_events.front().cloned() {
                    Some(LoggedEvent { kind: EventKind::StepScheduled { step }, .. }) if step == name => {
                        state.replay_events.pop_front();
                        match state.replay_events.pop_front() {
                            Some(LoggedEvent { kind: EventKind::StepCompleted { result, .. }, .. }) => {
                                state.completed_steps.insert(name.to_string());
                                Some(Ok(result))
                            }
                            Some(LoggedEvent { kind: EventKind::StepFailed { error, .. }, .. }) => Some(Err(error)),
                            _ => None,
                        }
                    }
                    _ => {
                        state.replaying = false;
                        None
                    }
                }
            }
        };

        if let Some(outcome) = replay_outcome {
            return outcome.map_err(|error| Error::StepFailed { name: name.to_string(), error });
        }

        if self.state.lock().await.completed_steps.contains(name) {
            return DuplicateStepSnafu { name }.fail();
        }

        self.append(EventKind::StepScheduled { step: name.to_string() }).await?;

        match f().await {
            Ok(result) => {
                self.append(EventKind::StepCompleted {
                    step: name.to_string(),
                    result: result.clone(),
                })
                .await?;
                self.state.lock().await.completed_steps.insert(name.to_string());
                self.checkpoint(CheckpointStatus::Running).await?;
                Ok(result)
            }
            Err(error) => {
                self.append(EventKind::StepFailed {
                    step: name.to_string(),
                    error: error.clone(),
                })
                .await?;
                StepFailedSnafu { name, error }.fail()
            }
        }
    }

    /// A durable condition: deterministic across replay via a
    /// `condition_<n>` key keyed off the pre-increment counter.
    pub async fn condition(&self, predicate: Arc<dyn Fn(&Context) -> bool + Send + Sync>, timeout: Option<Duration>) -> Result<bool> {
        self.drain_leading_signals().await;

        let n = {
            let mut state = self.state.lock().await;
            let n = state.condition_counter;
            state.condition_counter += 1;
            n
        };
        let key = format!("condition_{n}");

        let replaying = self.state.lock().await.replaying;
        if replaying {
            match self.replay_condition(&key).await {
                ConditionReplay::Resolved(resolved) => return Ok(resolved),
                ConditionReplay::Exhausted { deadline } => {
                    let remaining = deadline.map(|d| (d - Utc::now()).to_std().unwrap_or(Duration::ZERO));
                    let resolved = self.execution.condition(predicate, remaining).await;
                    self.append(if resolved {
                        EventKind::ConditionSatisfied { key: key.clone() }
                    } else {
                        EventKind::ConditionTimeout { key: key.clone() }
                    })
                    .await?;
                    self.checkpoint(CheckpointStatus::Running).await?;
                    return Ok(resolved);
                }
                ConditionReplay::NotScheduled => {}
            }
        }

        let timeout_ms = timeout.map(|d| d.as_millis() as u64);
        let deadline = timeout.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());
        self.append(EventKind::ConditionScheduled {
            key: key.clone(),
            timeout_ms,
            deadline,
        })
        .await?;

        let resolved = self.execution.condition(predicate, timeout).await;
        self.append(if resolved {
            EventKind::ConditionSatisfied { key: key.clone() }
        } else {
            EventKind::ConditionTimeout { key: key.clone() }
        })
        .await?;
        self.checkpoint(CheckpointStatus::Running).await?;
        Ok(resolved)
    }

    /// Walk the replay log for `key`: drain intervening signals, consuming
    /// events until `condition.satisfied`/`condition.timeout`. Returns
    /// [`ConditionReplay::Exhausted`] with the originally scheduled deadline
    /// if the log ends first, so the caller can recompute the remaining
    /// wait instead of restarting the full timeout.
    async fn replay_condition(&self, key: &str) -> ConditionReplay {
        let deadline = {
            let mut state = self.state.lock().await;
            match state.replay_events.front() {
                Some(LoggedEvent { kind: EventKind::ConditionScheduled { key: k, deadline, .. }, .. }) if k == key => {
                    let deadline = *deadline;
                    state.replay_events.pop_front();
                    deadline
                }
                _ => {
                    state.replaying = false;
                    return ConditionReplay::NotScheduled;
                }
            }
        };

        loop {
            self.drain_leading_signals().await;
            let mut state = self.state.lock().await;
            match state.replay_events.front().cloned() {
                Some(LoggedEvent { kind: EventKind::ConditionSatisfied { key: k }, .. }) if k == key => {
                    state.replay_events.pop_front();
                    return ConditionReplay::Resolved(true);
                }
                Some(LoggedEvent { kind: EventKind::ConditionTimeout { key: k }, .. }) if k == key => {
                    state.replay_events.pop_front();
                    return ConditionReplay::Resolved(false);
                }
                _ => {
                    state.replaying = false;
                    return ConditionReplay::Exhausted { deadline };
                }
            }
        }
    }

    /// A durable sleep: replays its completion if logged, otherwise waits
    /// out the remainder live.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let n = {
            let mut state = self.state.lock().await;
            let n = state.sleep_counter;
            state.sleep_counter += 1;
            n
        };
        let key = format!("sleep_{n}");

        let replaying = self.state.lock().await.replaying;
        if replaying {
            let scheduled = {
                let mut state = self.state.lock().await;
                match state.replay_events.front().cloned() {
                    Some(LoggedEvent { kind: EventKind::SleepScheduled { key: k, deadline, .. }, .. }) if k == key => {
                        state.replay_events.pop_front();
                        Some(deadline)
                    }
                    _ => {
                        state.replaying = false;
                        None
                    }
                }
            };
            if let Some(deadline) = scheduled {
                let mut state = self.state.lock().await;
                match state.replay_events.front().cloned() {
                    Some(LoggedEvent { kind: EventKind::SleepCompleted { key: k }, .. }) if k == key => {
                        state.replay_events.pop_front();
                        return Ok(());
                    }
                    _ => {
                        state.replaying = false;
                        drop(state);
                        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        if !remaining.is_zero() {
                            tokio::time::sleep(remaining).await;
                        }
                        self.append(EventKind::SleepCompleted { key: key.clone() }).await?;
                        self.checkpoint(CheckpointStatus::Running).await?;
                        return Ok(());
                    }
                }
            }
        }

        let deadline = Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default();
        self.append(EventKind::SleepScheduled {
            key: key.clone(),
            duration_ms: duration.as_millis() as u64,
            deadline,
        })
        .await?;
        tokio::time::sleep(duration).await;
        self.append(EventKind::SleepCompleted { key }).await?;
        self.checkpoint(CheckpointStatus::Running).await?;
        Ok(())
    }

    /// Append the terminal event, save the final checkpoint and mark the
    /// workflow complete in the store.
    pub async fn finalize(&self, result: &TaskResult) -> Result<()> {
        self.execution.finalize().await;
        if result.good() {
            self.append(EventKind::WorkflowCompleted { result: result.to_json() }).await?;
            self.checkpoint(CheckpointStatus::Completed).await?;
        } else {
            self.append(EventKind::WorkflowFailed {
                error: result.reason().unwrap_or("unknown error").to_string(),
            })
            .await?;
            self.checkpoint(CheckpointStatus::Failed).await?;
        }
        self.store
            .mark_completed(self.execution.workflow_id())
            .await
            .context(StoreSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn live_step_runs_once_and_is_replayed_on_recovery() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        let execution = Arc::new(Execution::new("wf-1", "Demo", Context::new()));
        let durable = DurableExecution::start_live(execution.clone(), store.clone(), json!({"n": 1}))
            .await
            .unwrap();

        let result = durable.step("fetch", || async { Ok(json!(42)) }).await.unwrap();
        assert_eq!(result, json!(42));
        assert!(durable.completed_steps().await.contains("fetch"));

        let recovered_execution = Arc::new(Execution::new("wf-1", "Demo", Context::new()));
        let (recovered, args) = DurableExecution::start_recovery(recovered_execution, store.clone())
            .await
            .unwrap();
        assert_eq!(args, json!({"n": 1}));
        assert!(recovered.is_replaying().await);

        let never_runs = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = never_runs.clone();
        let replayed = recovered
            .step("fetch", move || {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(json!(999)) }
            })
            .await
            .unwrap();
        assert_eq!(replayed, json!(42));
        assert!(!never_runs.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn condition_recovery_waits_out_only_the_remaining_timeout() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        let workflow_id = "wf-cond-1";
        store
            .append_event(workflow_id, LoggedEvent::new(0, EventKind::WorkflowStarted { workflow_type: "Demo".into(), args: json!({}) }))
            .await
            .unwrap();
        let deadline = Utc::now() + chrono::Duration::milliseconds(60);
        store
            .append_event(
                workflow_id,
                LoggedEvent::new(
                    1,
                    EventKind::ConditionScheduled {
                        key: "condition_0".into(),
                        timeout_ms: Some(5_000),
                        deadline: Some(deadline),
                    },
                ),
            )
            .await
            .unwrap();

        let execution = Arc::new(Execution::new(workflow_id, "Demo", Context::new()));
        let (recovered, _args) = DurableExecution::start_recovery(execution, store).await.unwrap();
        assert!(recovered.is_replaying().await);

        let started = std::time::Instant::now();
        let resolved = recovered
            .condition(Arc::new(|_: &Context| false), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!resolved);
        assert!(started.elapsed() < Duration::from_secs(1), "should wait out the recovered deadline, not the fresh timeout");
    }

    #[tokio::test]
    async fn finalize_marks_the_workflow_completed_in_the_store() {
        let store: Arc<dyn WorkflowStore> = Arc::new(InMemoryStore::new());
        let execution = Arc::new(Execution::new("wf-2", "Demo", Context::new()));
        let durable = DurableExecution::start_live(execution, store.clone(), json!({})).await.unwrap();

        let result = crate::result::Result::new(crate::result::ResultBuilder {
            task_name: "Demo".into(),
            chain_id: uuid::Uuid::nil(),
            index: 0,
            state: Some(crate::result::State::Complete),
            status: Some(crate::result::Status::Success),
            reason: None,
            cause: None,
            metadata: json!({}),
            retries: 0,
            rolled_back: false,
        });
        durable.finalize(&result).await.unwrap();

        assert!(store.list_active_workflows().await.unwrap().is_empty());
    }
}
