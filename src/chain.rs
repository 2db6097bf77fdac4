//! Execution-correlation object shared by every task in one run.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::result::Result;

#[derive(Debug, Default)]
struct Inner {
    next_index: usize,
    results: Vec<Result>,
}

/// Tracks the monotonically assigned index of each task in a run and
/// collects every [`Result`] produced along the way.
///
/// Cheap to clone: clones share the same underlying log (it is an `Arc`
/// handle), which is what lets a parallel group's branches all append to
/// one chain while still getting their own isolated [`crate::context::Context`].
#[derive(Debug, Clone)]
pub struct Chain {
    id: Uuid,
    parent: Option<Box<Chain>>,
    inner: Arc<Mutex<Inner>>,
}

impl Chain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            parent: None,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the current index and increments the counter for the next
    /// caller.
    pub async fn next_index(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let index = inner.next_index;
        inner.next_index += 1;
        index
    }

    pub async fn add_result(&self, result: Result) {
        self.inner.lock().await.results.push(result);
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.results.len()
    }

    pub async fn results(&self) -> Vec<Result> {
        self.inner.lock().await.results.clone()
    }

    pub async fn get_result(&self, index: usize) -> Option<Result> {
        self.inner.lock().await.results.get(index).cloned()
    }

    pub async fn last_result(&self) -> Option<Result> {
        self.inner.lock().await.results.last().cloned()
    }

    pub async fn first_failure(&self) -> Option<Result> {
        self.inner
            .lock()
            .await
            .results
            .iter()
            .find(|r| r.bad())
            .cloned()
    }

    pub async fn has_failed(&self) -> bool {
        self.first_failure().await.is_some()
    }

    pub async fn all_succeeded(&self) -> bool {
        self.inner.lock().await.results.iter().all(Result::success)
    }

    /// A new chain rooted at a fresh counter, linked back to `self` for
    /// [`Chain::root`] and [`Chain::depth`].
    #[must_use]
    pub fn create_child(&self) -> Chain {
        Chain {
            id: Uuid::now_v7(),
            parent: Some(Box::new(self.clone())),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Chain> {
        self.parent.as_deref()
    }

    #[must_use]
    pub fn root(&self) -> Chain {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.clone()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Some(parent) = current.parent() {
            depth += 1;
            current = parent;
        }
        depth
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ResultBuilder, State, Status};
    use serde_json::json;

    fn ok(chain: &Chain, index: usize) -> Result {
        Result::new(ResultBuilder {
            task_name: "T".into(),
            chain_id: chain.id(),
            index,
            state: Some(State::Complete),
            status: Some(Status::Success),
            reason: None,
            cause: None,
            metadata: json!({}),
            retries: 0,
            rolled_back: false,
        })
    }

    #[tokio::test]
    async fn indices_are_monotonic_and_ordered() {
        let chain = Chain::new();
        for expected in 0..5 {
            let index = chain.next_index().await;
            assert_eq!(index, expected);
            chain.add_result(ok(&chain, index)).await;
        }
        assert_eq!(chain.size().await, 5);
        let results = chain.results().await;
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.index(), i);
        }
    }

    #[tokio::test]
    async fn child_chain_links_to_root() {
        let root = Chain::new();
        let mid = root.create_child();
        let leaf = mid.create_child();
        assert_eq!(leaf.depth(), 2);
        assert_eq!(leaf.root().id(), root.id());
    }

    #[tokio::test]
    async fn all_succeeded_is_false_after_a_failure() {
        let chain = Chain::new();
        let i0 = chain.next_index().await;
        chain.add_result(ok(&chain, i0)).await;
        assert!(chain.all_succeeded().await);

        let failed = Result::new(ResultBuilder {
            task_name: "Bad".into(),
            chain_id: chain.id(),
            index: chain.next_index().await,
            state: Some(State::Interrupted),
            status: Some(Status::Failed),
            reason: Some("boom".into()),
            cause: None,
            metadata: json!({}),
            retries: 0,
            rolled_back: false,
        });
        chain.add_result(failed).await;
        assert!(!chain.all_succeeded().await);
        assert!(chain.has_failed().await);
        assert_eq!(chain.first_failure().await.unwrap().reason(), Some("boom"));
    }
}
