//! The immutable outcome of a single task or workflow execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle phase a [`Result`] was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Initialized,
    Executing,
    Complete,
    Interrupted,
}

/// Business outcome of a task or workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Skipped,
    Failed,
}

/// Outcome category a caller might dispatch on via [`Result::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Skipped,
    Failed,
    Complete,
    Interrupted,
    Executed,
    Good,
    Bad,
}

/// Fields collected while a halt (`skip`/`fail`) or an unexpected error
/// propagates out of a task body. Built by the engine, never by user code.
#[derive(Debug, Clone, Default)]
pub struct ResultBuilder {
    pub task_name: String,
    pub chain_id: Uuid,
    pub index: usize,
    pub state: Option<State>,
    pub status: Option<Status>,
    pub reason: Option<String>,
    pub cause: Option<String>,
    pub metadata: Value,
    pub retries: u32,
    pub rolled_back: bool,
}

/// The immutable outcome of one task or workflow execution.
///
/// Constructed exclusively by the engine (see [`crate::task`]); user code
/// only ever reads a `Result` through its accessors or [`Result::on`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Result {
    task_name: String,
    chain_id: Uuid,
    index: usize,
    state: State,
    status: Status,
    reason: Option<String>,
    cause: Option<String>,
    metadata: Value,
    retries: u32,
    rolled_back: bool,
    /// The child `Result` whose breakpoint status this workflow propagated,
    /// if any. Set once by the engine immediately after construction.
    caused_failure: Option<Box<Result>>,
    /// The child `Result` a `throw()` call re-raised, if any.
    threw_failure: Option<Box<Result>>,
}

impl Result {
    pub(crate) fn new(builder: ResultBuilder) -> Self {
        Self {
            task_name: builder.task_name,
            chain_id: builder.chain_id,
            index: builder.index,
            state: builder.state.unwrap_or(State::Initialized),
            status: builder.status.unwrap_or(Status::Success),
            reason: builder.reason,
            cause: builder.cause,
            metadata: builder.metadata,
            retries: builder.retries,
            rolled_back: builder.rolled_back,
            caused_failure: None,
            threw_failure: None,
        }
    }

    pub(crate) fn set_caused_failure(&mut self, child: Result) {
        self.caused_failure = Some(Box::new(child));
    }

    pub(crate) fn set_threw_failure(&mut self, child: Result) {
        self.threw_failure = Some(Box::new(child));
    }

    #[must_use]
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    #[must_use]
    pub fn chain_id(&self) -> Uuid {
        self.chain_id
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    #[must_use]
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[must_use]
    pub fn rolled_back(&self) -> bool {
        self.rolled_back
    }

    #[must_use]
    pub fn caused_failure(&self) -> Option<&Result> {
        self.caused_failure.as_deref()
    }

    #[must_use]
    pub fn threw_failure(&self) -> Option<&Result> {
        self.threw_failure.as_deref()
    }

    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self.status, Status::Success)
    }

    #[must_use]
    pub fn skipped(&self) -> bool {
        matches!(self.status, Status::Skipped)
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        matches!(self.status, Status::Failed)
    }

    #[must_use]
    pub fn complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    #[must_use]
    pub fn interrupted(&self) -> bool {
        matches!(self.state, State::Interrupted)
    }

    #[must_use]
    pub fn executed(&self) -> bool {
        self.complete() || self.interrupted()
    }

    /// Success or skip: the task did not raise an unexpected condition.
    #[must_use]
    pub fn good(&self) -> bool {
        self.success() || self.skipped()
    }

    /// Skip or failure: the task did not run to a clean success.
    #[must_use]
    pub fn bad(&self) -> bool {
        self.skipped() || self.failed()
    }

    fn matches(&self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Success => self.success(),
            Outcome::Skipped => self.skipped(),
            Outcome::Failed => self.failed(),
            Outcome::Complete => self.complete(),
            Outcome::Interrupted => self.interrupted(),
            Outcome::Executed => self.executed(),
            Outcome::Good => self.good(),
            Outcome::Bad => self.bad(),
        }
    }

    /// Invoke `handler(self)` iff `self` matches `outcome`. Returns `self`
    /// either way so calls can be chained.
    pub fn on(self, outcome: Outcome, handler: impl FnOnce(&Result)) -> Self {
        if self.matches(outcome) {
            handler(&self);
        }
        self
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "index": self.index,
            "chainId": self.chain_id.to_string(),
            "taskName": self.task_name,
            "state": self.state,
            "status": self.status,
            "reason": self.reason,
            "cause": self.cause,
            "metadata": self.metadata,
            "retries": self.retries,
            "rolledBack": self.rolled_back,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make(state: State, status: Status) -> Result {
        Result::new(ResultBuilder {
            task_name: "T".into(),
            chain_id: Uuid::nil(),
            index: 0,
            state: Some(state),
            status: Some(status),
            reason: None,
            cause: None,
            metadata: json!({}),
            retries: 0,
            rolled_back: false,
        })
    }

    #[test]
    fn predicates_follow_state_and_status() {
        let r = make(State::Complete, Status::Success);
        assert!(r.success());
        assert!(r.good());
        assert!(!r.bad());
        assert!(r.executed());

        let r = make(State::Interrupted, Status::Skipped);
        assert!(r.skipped());
        assert!(r.good());
        assert!(r.bad());
        assert!(r.interrupted());

        let r = make(State::Interrupted, Status::Failed);
        assert!(r.failed());
        assert!(!r.good());
        assert!(r.bad());
    }

    #[test]
    fn on_only_fires_for_matching_outcome() {
        let r = make(State::Complete, Status::Success);
        let mut fired = false;
        let r = r.on(Outcome::Failed, |_| fired = true);
        assert!(!fired);
        let _ = r.on(Outcome::Success, |_| fired = true);
        assert!(fired);
    }

    #[test]
    fn caused_failure_is_set_once_by_the_engine() {
        let child = make(State::Interrupted, Status::Failed);
        let mut parent = make(State::Interrupted, Status::Failed);
        parent.set_caused_failure(child.clone());
        assert_eq!(parent.caused_failure().unwrap().task_name(), child.task_name());
    }
}
