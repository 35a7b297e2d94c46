//! Background research generation
//!
//! A bounded-concurrency, deduplicating, fire-and-forget dispatcher around
//! an external [`ResearchAgent`]. Results are cached per item id; failures
//! are logged here and surfaced only to `wait_for_prp` awaiters.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::error::{EngineError, Result};
use crate::models::{Backlog, ResearchArtifact, Subtask};

/// Default cap on concurrent agent invocations
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// External collaborator that writes the research artifact for one subtask.
/// May fail with any error; the queue logs and does not retry on its own.
#[async_trait]
pub trait ResearchAgent: Send + Sync {
    async fn generate(&self, subtask: &Subtask, backlog: &Backlog) -> Result<ResearchArtifact>;
}

/// Live counters over the queue's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub researching: usize,
    pub cached: usize,
}

struct QueueState {
    /// FIFO of items waiting for a research slot
    queue: VecDeque<(Subtask, Backlog)>,
    /// Item ids with an agent invocation in flight
    researching: HashSet<String>,
    /// Completed artifacts, never overwritten for the same id
    results: HashMap<String, ResearchArtifact>,
    /// Last failure per id, cleared when the item is enqueued again
    failures: HashMap<String, String>,
}

struct QueueInner {
    agent: Arc<dyn ResearchAgent>,
    max_concurrent: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl QueueInner {
    // Recover from poisoning like the rest of the engine: a panicked agent
    // task must not wedge every later enqueue.
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Research queue state mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Bounded-concurrency research dispatcher with a per-item result cache.
///
/// Clones share the same queue. Must be used from within a tokio runtime;
/// `enqueue` never blocks and the queue grows unboundedly.
#[derive(Clone)]
pub struct ResearchQueue {
    inner: Arc<QueueInner>,
}

impl ResearchQueue {
    pub fn new(agent: Arc<dyn ResearchAgent>) -> Self {
        Self::with_max_concurrent(agent, DEFAULT_MAX_CONCURRENT)
    }

    /// A cap of 0 disables processing entirely: items queue up but no agent
    /// invocation ever starts.
    pub fn with_max_concurrent(agent: Arc<dyn ResearchAgent>, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                agent,
                max_concurrent,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    researching: HashSet::new(),
                    results: HashMap::new(),
                    failures: HashMap::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// The agent this queue dispatches to
    pub fn agent(&self) -> Arc<dyn ResearchAgent> {
        self.inner.agent.clone()
    }

    /// Queue a subtask for research generation.
    ///
    /// Returns immediately when a result is already cached or the item is
    /// already queued or in flight. A previously recorded failure for the
    /// item is cleared, so this is also the retry path.
    pub fn enqueue(&self, subtask: &Subtask, backlog: &Backlog) {
        {
            let mut state = self.inner.lock_state();
            if state.results.contains_key(&subtask.id) {
                return;
            }
            if state.researching.contains(&subtask.id) {
                return;
            }
            if state.queue.iter().any(|(queued, _)| queued.id == subtask.id) {
                return;
            }
            state.failures.remove(&subtask.id);
            state.queue.push_back((subtask.clone(), backlog.clone()));
        }
        drain(&self.inner);
    }

    /// Non-blocking lookup in the result cache
    pub fn get_prp(&self, item_id: &str) -> Option<ResearchArtifact> {
        self.inner.lock_state().results.get(item_id).cloned()
    }

    /// Block until a research artifact exists for the item.
    ///
    /// If the item's background task failed, the failure is propagated here;
    /// a later `enqueue` clears it and this call waits for the retry.
    pub async fn wait_for_prp(&self, item_id: &str) -> Result<ResearchArtifact> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a completion between the check and
            // the await cannot be missed.
            notified.as_mut().enable();

            {
                let state = self.inner.lock_state();
                if let Some(artifact) = state.results.get(item_id) {
                    return Ok(artifact.clone());
                }
                if let Some(message) = state.failures.get(item_id) {
                    return Err(EngineError::Research {
                        item_id: item_id.to_string(),
                        message: message.clone(),
                    });
                }
            }

            notified.await;
        }
    }

    /// Live queue counters
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock_state();
        QueueStats {
            queued: state.queue.len(),
            researching: state.researching.len(),
            cached: state.results.len(),
        }
    }
}

/// Admit queued items while slots are free, spawning one background task per
/// admission. FIFO with respect to queue arrival.
fn drain(inner: &Arc<QueueInner>) {
    loop {
        let (subtask, backlog) = {
            let mut state = inner.lock_state();
            if state.researching.len() >= inner.max_concurrent {
                return;
            }
            match state.queue.pop_front() {
                Some(job) => {
                    state.researching.insert(job.0.id.clone());
                    job
                }
                None => return,
            }
        };

        let inner = inner.clone();
        tokio::spawn(async move {
            let outcome = inner.agent.generate(&subtask, &backlog).await;
            {
                let mut state = inner.lock_state();
                state.researching.remove(&subtask.id);
                match outcome {
                    Ok(artifact) => {
                        // First writer wins; a stale duplicate never replaces
                        // a cached artifact.
                        state.results.entry(subtask.id.clone()).or_insert(artifact);
                    }
                    Err(error) => {
                        log::warn!("Research generation failed for {}: {}", subtask.id, error);
                        state.failures.insert(subtask.id.clone(), error.to_string());
                    }
                }
            }
            inner.notify.notify_waiters();
            drain(&inner);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn subtask(id: &str) -> Subtask {
        Subtask {
            id: id.to_string(),
            title: format!("Subtask {}", id),
            status: crate::models::ItemStatus::Planned,
            description: String::new(),
            story_points: 1,
            dependencies: vec![],
            context_scope: String::new(),
        }
    }

    fn artifact_for(id: &str) -> ResearchArtifact {
        ResearchArtifact {
            task_id: id.to_string(),
            objective: format!("Research {}", id),
            context: String::new(),
            implementation_steps: vec![],
            validation_gates: vec![],
            success_criteria: vec![],
            references: vec![],
        }
    }

    /// Agent that records invocation order and concurrency, sleeping to keep
    /// work in flight
    struct RecordingAgent {
        delay: Duration,
        invocations: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        started: Mutex<Vec<String>>,
        /// Item ids that fail on their first invocation
        fail_once: Mutex<HashSet<String>>,
    }

    impl RecordingAgent {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                invocations: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
                fail_once: Mutex::new(HashSet::new()),
            }
        }

        fn failing_first(self, id: &str) -> Self {
            self.fail_once.lock().unwrap().insert(id.to_string());
            self
        }
    }

    #[async_trait]
    impl ResearchAgent for RecordingAgent {
        async fn generate(
            &self,
            subtask: &Subtask,
            _backlog: &Backlog,
        ) -> Result<ResearchArtifact> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.started.lock().unwrap().push(subtask.id.clone());

            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let should_fail = self.fail_once.lock().unwrap().remove(&subtask.id);
            if should_fail {
                return Err(EngineError::Research {
                    item_id: subtask.id.clone(),
                    message: "agent backend unavailable".to_string(),
                });
            }
            Ok(artifact_for(&subtask.id))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_cap_and_fifo_admission() {
        let agent = Arc::new(RecordingAgent::new(Duration::from_millis(100)));
        let queue = ResearchQueue::with_max_concurrent(agent.clone(), 3);
        let backlog = Backlog::default();

        let ids = ["S1", "S2", "S3", "S4", "S5"];
        for id in ids {
            queue.enqueue(&subtask(id), &backlog);
        }

        for id in ids {
            queue.wait_for_prp(id).await.unwrap();
        }

        assert!(agent.max_active.load(Ordering::SeqCst) <= 3);
        assert_eq!(agent.invocations.load(Ordering::SeqCst), 5);

        // Items 1-3 are admitted before 4 and 5 ever start
        let started = agent.started.lock().unwrap().clone();
        let first_three: HashSet<&str> = started[..3].iter().map(String::as_str).collect();
        assert_eq!(first_three, HashSet::from(["S1", "S2", "S3"]));
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_in_flight_and_cached() {
        let agent = Arc::new(RecordingAgent::new(Duration::from_millis(10)));
        let queue = ResearchQueue::new(agent.clone());
        let backlog = Backlog::default();
        let item = subtask("S1");

        queue.enqueue(&item, &backlog);
        queue.enqueue(&item, &backlog); // in flight, deduplicated
        queue.wait_for_prp("S1").await.unwrap();
        queue.enqueue(&item, &backlog); // cached, agent not invoked

        assert_eq!(agent.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(queue.get_prp("S1").unwrap().task_id, "S1");
    }

    #[tokio::test]
    async fn test_failure_propagates_and_reenqueue_retries() {
        let agent =
            Arc::new(RecordingAgent::new(Duration::from_millis(5)).failing_first("S1"));
        let queue = ResearchQueue::new(agent.clone());
        let backlog = Backlog::default();
        let item = subtask("S1");

        queue.enqueue(&item, &backlog);
        let err = queue.wait_for_prp("S1").await.unwrap_err();
        assert!(matches!(err, EngineError::Research { .. }));
        assert!(queue.get_prp("S1").is_none());

        // Retry clears the stale failure; the awaiter sees the fresh result
        queue.enqueue(&item, &backlog);
        let artifact = queue.wait_for_prp("S1").await.unwrap();
        assert_eq!(artifact.task_id, "S1");
        assert_eq!(agent.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_concurrency_disables_processing() {
        let agent = Arc::new(RecordingAgent::new(Duration::from_millis(1)));
        let queue = ResearchQueue::with_max_concurrent(agent.clone(), 0);
        let backlog = Backlog::default();

        queue.enqueue(&subtask("S1"), &backlog);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stats = queue.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.researching, 0);
        assert_eq!(stats.cached, 0);
        assert_eq!(agent.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stats_reflect_live_state() {
        let agent = Arc::new(RecordingAgent::new(Duration::from_millis(50)));
        let queue = ResearchQueue::with_max_concurrent(agent, 1);
        let backlog = Backlog::default();

        queue.enqueue(&subtask("S1"), &backlog);
        queue.enqueue(&subtask("S2"), &backlog);

        let stats = queue.stats();
        assert_eq!(stats.researching, 1);
        assert_eq!(stats.queued, 1);

        queue.wait_for_prp("S1").await.unwrap();
        queue.wait_for_prp("S2").await.unwrap();
        let done = queue.stats();
        assert_eq!(done.cached, 2);
        assert_eq!(done.queued, 0);
        assert_eq!(done.researching, 0);
    }
}
