//! Queue-driven task execution
//!
//! The orchestrator walks the hierarchy's leaf subtasks in DFS pre-order,
//! gates each one on its dependencies, obtains a research artifact through
//! the research queue, hands artifact and item to the implementation
//! runtime, and records terminal status through the session manager.
//!
//! One orchestrator instance is strictly sequential: callers drive
//! [`process_next_item`](TaskOrchestrator::process_next_item) in a loop. The
//! research queue is the only place where agent invocations run in parallel.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::hierarchy::{self, Scope};
use crate::models::{Backlog, GateLevel, ItemStatus, ResearchArtifact, Subtask, Task};
use crate::research::ResearchQueue;
use crate::session::SessionManager;

/// Upper bound on fix-retry cycles a runtime may spend on failing gates
pub const MAX_FIX_ATTEMPTS: u32 = 2;

/// How long `process_next_item` waits for unmet dependencies by default
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default polling interval while waiting for dependencies
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of one validation gate run by the implementation runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub level: GateLevel,
    pub passed: bool,
    /// True for manual gates, which the runtime never executes
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result returned by the implementation runtime for one subtask.
///
/// Errors from the PRP body or its parsing surface here as `success: false`;
/// the runtime does not throw them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub validation_results: Vec<ValidationOutcome>,
    /// Paths of produced implementation outputs
    pub artifacts: Vec<String>,
    /// Fix cycles spent on failing non-manual gates, bounded by
    /// [`MAX_FIX_ATTEMPTS`]
    pub fix_attempts: u32,
}

/// External collaborator that executes a PRP: runs validation gates 1-4 in
/// order, stops on the first failing non-manual gate, skips manual gates.
#[async_trait]
pub trait ImplementationRuntime: Send + Sync {
    async fn execute(&self, prp: &ResearchArtifact, prp_path: &Path) -> Result<ExecutionResult>;
}

/// External commit helper invoked after a successful subtask. Its failure
/// never fails the subtask.
#[async_trait]
pub trait CommitCapability: Send + Sync {
    async fn commit(&self, session_path: &Path, task_id: &str) -> Result<String>;
}

/// Counters accumulated over one orchestrator run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    /// Subtasks popped from the queue
    pub processed: usize,
    /// Subtasks that reached Complete
    pub completed: usize,
    /// Subtasks that reached Failed
    pub failed: usize,
}

/// Drives leaf subtasks through research, implementation, and status
/// progression. Owns the session manager for the duration of the run.
pub struct TaskOrchestrator {
    manager: SessionManager,
    research_queue: ResearchQueue,
    runtime: Arc<dyn ImplementationRuntime>,
    committer: Option<Arc<dyn CommitCapability>>,
    scope: Scope,
    bypass_cache: bool,
    dependency_timeout: Duration,
    poll_interval: Duration,
    execution_queue: VecDeque<Subtask>,
    metrics: RunMetrics,
}

impl TaskOrchestrator {
    /// Build an orchestrator over an initialized session.
    ///
    /// The execution queue is constructed immediately: leaf subtasks in DFS
    /// pre-order, filtered by scope (initially `Scope::All`).
    pub fn new(
        manager: SessionManager,
        research_queue: ResearchQueue,
        runtime: Arc<dyn ImplementationRuntime>,
    ) -> Result<Self> {
        if manager.session().is_none() {
            return Err(EngineError::NotFound(
                "orchestrator requires an initialized session".to_string(),
            ));
        }
        let mut orchestrator = Self {
            manager,
            research_queue,
            runtime,
            committer: None,
            scope: Scope::All,
            bypass_cache: false,
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            execution_queue: VecDeque::new(),
            metrics: RunMetrics::default(),
        };
        orchestrator.rebuild_queue();
        Ok(orchestrator)
    }

    /// Restrict execution to a subtree
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.set_scope(scope);
        self
    }

    /// Skip the research cache: every subtask triggers a fresh generation
    pub fn with_cache_bypass(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// Attach a commit capability invoked after each successful subtask
    pub fn with_committer(mut self, committer: Arc<dyn CommitCapability>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Override the dependency wait bounds
    pub fn with_dependency_wait(mut self, timeout: Duration, interval: Duration) -> Self {
        self.dependency_timeout = timeout;
        self.poll_interval = interval;
        self
    }

    /// Replace the scope and rebuild the queue from the current hierarchy.
    /// Nothing from the prior queue is preserved.
    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
        self.rebuild_queue();
    }

    fn rebuild_queue(&mut self) {
        self.execution_queue = match self.manager.session() {
            Some(session) => hierarchy::leaf_subtasks(&session.task_registry, &self.scope)
                .into_iter()
                .cloned()
                .collect(),
            None => VecDeque::new(),
        };
        log::debug!(
            "Execution queue rebuilt: {} subtasks under {:?}",
            self.execution_queue.len(),
            self.scope
        );
    }

    /// The pending execution queue, head first
    pub fn execution_queue(&self) -> Vec<&Subtask> {
        self.execution_queue.iter().collect()
    }

    /// Number of subtasks still queued
    pub fn remaining(&self) -> usize {
        self.execution_queue.len()
    }

    /// Counters for the run so far
    pub fn metrics(&self) -> RunMetrics {
        self.metrics
    }

    /// The session manager this orchestrator mutates state through
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut SessionManager {
        &mut self.manager
    }

    /// Hand the session manager back once the run is over
    pub fn into_manager(self) -> SessionManager {
        self.manager
    }

    fn registry(&self) -> Result<&Backlog> {
        self.manager
            .session()
            .map(|session| &session.task_registry)
            .ok_or_else(|| EngineError::NotFound("no session loaded".to_string()))
    }

    /// True when every dependency of the subtask resolves to a Complete item
    pub fn can_execute(&self, subtask: &Subtask) -> bool {
        match self.registry() {
            Ok(registry) => subtask.dependencies.iter().all(|dep| {
                hierarchy::find_item(registry, dep)
                    .map(|item| item.status() == ItemStatus::Complete)
                    .unwrap_or(false)
            }),
            Err(_) => false,
        }
    }

    /// Dependency ids that are not yet Complete (including ids that do not
    /// resolve at all)
    pub fn get_blocking_dependencies(&self, subtask: &Subtask) -> Vec<String> {
        let registry = match self.registry() {
            Ok(registry) => registry,
            Err(_) => return subtask.dependencies.clone(),
        };
        subtask
            .dependencies
            .iter()
            .filter(|dep| {
                hierarchy::find_item(registry, dep)
                    .map(|item| item.status() != ItemStatus::Complete)
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Poll until the subtask's dependencies are all Complete, or time out.
    pub async fn wait_for_dependencies(
        &self,
        subtask: &Subtask,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.can_execute(subtask) {
            if tokio::time::Instant::now() >= deadline {
                log::warn!(
                    "Dependencies still blocking {}: {:?}",
                    subtask.id,
                    self.get_blocking_dependencies(subtask)
                );
                return Err(EngineError::Timeout {
                    item_id: subtask.id.clone(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(interval).await;
        }
        Ok(())
    }

    /// Enqueue all of a task's subtasks for research without touching
    /// hierarchy state. Used to prefetch research concurrently.
    pub fn execute_task(&self, task: &Task) -> Result<()> {
        let registry = self.registry()?.clone();
        for subtask in task.subtasks.iter().filter_map(|item| item.as_subtask()) {
            self.research_queue.enqueue(subtask, &registry);
        }
        Ok(())
    }

    /// Run one step of the execution loop.
    ///
    /// Returns `Ok(false)` once the queue is empty. A runtime failure
    /// records `Failed`, flushes, and then surfaces as
    /// [`EngineError::Execution`]; the queue keeps its remaining items.
    pub async fn process_next_item(&mut self) -> Result<bool> {
        let subtask = match self.execution_queue.pop_front() {
            Some(subtask) => subtask,
            None => {
                log::info!(
                    "Execution queue drained: {} processed, {} complete, {} failed",
                    self.metrics.processed,
                    self.metrics.completed,
                    self.metrics.failed
                );
                return Ok(false);
            }
        };
        self.metrics.processed += 1;
        self.manager.set_current_item(Some(subtask.id.clone()))?;

        if !self.can_execute(&subtask) {
            log::debug!(
                "Waiting on dependencies of {}: {:?}",
                subtask.id,
                self.get_blocking_dependencies(&subtask)
            );
            self.wait_for_dependencies(&subtask, self.dependency_timeout, self.poll_interval)
                .await?;
        }

        self.manager
            .update_item_status(&subtask.id, ItemStatus::Researching)?;
        let artifact = self.obtain_prp(&subtask).await?;

        self.manager
            .update_item_status(&subtask.id, ItemStatus::Implementing)?;
        let prp_path = self.manager.save_prp(&artifact)?;
        let result = self.runtime.execute(&artifact, &prp_path).await?;
        let report_path = self.manager.save_execution_report(&subtask.id, &result)?;
        log::debug!("Execution report for {} at {}", subtask.id, report_path.display());

        if result.success {
            self.manager
                .update_item_status(&subtask.id, ItemStatus::Complete)?;
            self.manager.flush_updates()?;
            self.metrics.completed += 1;
            self.run_commit(&subtask.id).await;
            Ok(true)
        } else {
            self.manager
                .update_item_status(&subtask.id, ItemStatus::Failed)?;
            self.manager.flush_updates()?;
            self.metrics.failed += 1;
            Err(EngineError::Execution {
                item_id: subtask.id.clone(),
                message: result
                    .error
                    .unwrap_or_else(|| "implementation runtime reported failure".to_string()),
            })
        }
    }

    async fn obtain_prp(&self, subtask: &Subtask) -> Result<ResearchArtifact> {
        let registry = self.registry()?.clone();
        if self.bypass_cache {
            return self
                .research_queue
                .agent()
                .generate(subtask, &registry)
                .await;
        }
        self.research_queue.enqueue(subtask, &registry);
        self.research_queue.wait_for_prp(&subtask.id).await
    }

    async fn run_commit(&self, task_id: &str) {
        let Some(committer) = &self.committer else {
            return;
        };
        let Some(session) = self.manager.session() else {
            return;
        };
        match committer.commit(&session.metadata.path, task_id).await {
            Ok(commit_id) => log::info!("Committed {} as {}", task_id, commit_id),
            Err(error) => log::warn!("Commit failed for {}: {}", task_id, error),
        }
    }
}
