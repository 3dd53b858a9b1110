//! Per-job task graph: stage instances, their dependencies, and marking.
//!
//! Invariants:
//! - the dependency edges are acyclic; every insertion checks first and
//!   leaves the graph untouched on failure
//! - a task is Ready only while every dependency is Succeeded or Skipped
//! - a terminal task never changes again; a Succeeded result is immutable
//! - revision rounds never edit finished tasks, they retire them and add
//!   fresh instances

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dependency::DependencyGraph;
use crate::domain::{GraphError, StagePayload, StageType, Task, TaskError, TaskId, TaskStatus};

/// A status change requested through `TaskGraph::mark`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMark {
    Ready,
    Running { at: DateTime<Utc> },
    Succeeded(StagePayload),
    /// Back to Waiting after a retryable failure.
    Retry {
        error: TaskError,
        not_before: DateTime<Utc>,
    },
    Failed(TaskError),
    Skipped(Option<TaskError>),
}

impl TaskMark {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskMark::Ready => TaskStatus::Ready,
            TaskMark::Running { .. } => TaskStatus::Running,
            TaskMark::Succeeded(_) => TaskStatus::Succeeded,
            TaskMark::Retry { .. } => TaskStatus::Waiting,
            TaskMark::Failed(_) => TaskStatus::Failed,
            TaskMark::Skipped(_) => TaskStatus::Skipped,
        }
    }
}

/// What `TaskGraph::mark` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkEffect {
    Applied,
    /// The task was already in the requested state; nothing changed.
    NoOp,
}

/// Directed acyclic graph of one job's tasks.
///
/// Owned by its job record. Tasks superseded by a revision round move to
/// `retired` and keep their final state there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphSnapshot", into = "GraphSnapshot")]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,

    /// Insertion order. Always dependency-respecting.
    order: Vec<TaskId>,

    deps: DependencyGraph,
    retired: Vec<Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    /// Active tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn retired(&self) -> &[Task] {
        &self.retired
    }

    pub fn find_retired(&self, task_id: TaskId) -> Option<&Task> {
        self.retired.iter().find(|t| t.id == task_id)
    }

    /// The active task for `stage`.
    pub fn find_stage(&self, stage: StageType) -> Option<&Task> {
        self.tasks().find(|t| t.stage == stage)
    }

    /// Adds a task with the dependencies listed on it. Never mutates on error.
    ///
    /// Dependencies must already be in the graph, which keeps `order`
    /// dependency-respecting and makes a cycle impossible here except for a
    /// self-edge.
    pub fn add_task(&mut self, mut task: Task) -> Result<(), GraphError> {
        if self.tasks.contains_key(&task.id) || self.find_retired(task.id).is_some() {
            return Err(GraphError::DuplicateTask(task.id));
        }

        let mut deps: Vec<TaskId> = Vec::with_capacity(task.dependencies.len());
        for &dep in &task.dependencies {
            if dep == task.id {
                return Err(GraphError::Cycle {
                    task: task.id,
                    depends_on: dep,
                });
            }
            if !self.tasks.contains_key(&dep) {
                return Err(GraphError::UnknownTask(dep));
            }
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        for &dep in &deps {
            self.deps.add_dependency(task.id, dep);
        }
        task.dependencies = deps;
        self.order.push(task.id);
        self.tasks.insert(task.id, task);
        Ok(())
    }

    /// `task` waits for `depends_on`.
    ///
    /// Fails with `GraphError::Cycle` (graph untouched) if the edge would close
    /// a cycle.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) -> Result<(), GraphError> {
        let dep_satisfied = self
            .tasks
            .get(&depends_on)
            .ok_or(GraphError::UnknownTask(depends_on))?
            .status
            .satisfies_dependents();
        let status = self
            .tasks
            .get(&task)
            .ok_or(GraphError::UnknownTask(task))?
            .status;
        if status.is_terminal() {
            return Err(GraphError::TerminalTask { task, status });
        }
        if self.deps.would_create_cycle(task, depends_on) {
            return Err(GraphError::Cycle { task, depends_on });
        }

        let Some(entry) = self.tasks.get_mut(&task) else {
            return Err(GraphError::UnknownTask(task));
        };
        if entry.dependencies.contains(&depends_on) {
            return Ok(());
        }
        entry.dependencies.push(depends_on);
        if entry.status == TaskStatus::Ready && !dep_satisfied {
            entry.status = TaskStatus::Waiting;
        }
        self.deps.add_dependency(task, depends_on);
        Ok(())
    }

    fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|d| d.status.satisfies_dependents())
        })
    }

    /// Waiting tasks whose dependencies are all Succeeded/Skipped and whose
    /// backoff has elapsed.
    pub fn ready_set(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| t.status == TaskStatus::Waiting)
            .filter(|t| t.is_eligible(now))
            .filter(|t| self.dependencies_satisfied(t))
            .map(|t| t.id)
            .collect()
    }

    /// Moves the ready set to Ready. Returns the promoted ids.
    pub fn promote_ready(&mut self, now: DateTime<Utc>) -> Result<Vec<TaskId>, GraphError> {
        let ready = self.ready_set(now);
        for &id in &ready {
            self.mark(id, TaskMark::Ready)?;
        }
        Ok(ready)
    }

    /// Ready tasks, in insertion order.
    pub fn dispatchable(&self) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| t.status == TaskStatus::Ready)
            .map(|t| t.id)
            .collect()
    }

    /// Applies a status change.
    ///
    /// Re-marking a terminal task with its current status is a no-op (a
    /// Succeeded task keeps its first result). Any other change to a terminal
    /// task is an error.
    pub fn mark(&mut self, task_id: TaskId, mark: TaskMark) -> Result<MarkEffect, GraphError> {
        let target = mark.status();
        let task = self
            .tasks
            .get(&task_id)
            .ok_or(GraphError::UnknownTask(task_id))?;
        let current = task.status;

        if current.is_terminal() {
            if current == target {
                return Ok(MarkEffect::NoOp);
            }
            return Err(GraphError::TerminalTask {
                task: task_id,
                status: current,
            });
        }
        if current == target && matches!(mark, TaskMark::Ready) {
            return Ok(MarkEffect::NoOp);
        }
        let deps_ok = target != TaskStatus::Ready || self.dependencies_satisfied(task);
        if !current.can_transition_to(target) || !deps_ok {
            return Err(GraphError::InvalidTransition {
                task: task_id,
                from: current,
                to: target,
            });
        }

        let Some(task) = self.tasks.get_mut(&task_id) else {
            return Err(GraphError::UnknownTask(task_id));
        };
        task.status = target;
        match mark {
            TaskMark::Ready => {}
            TaskMark::Running { at } => {
                task.attempts += 1;
                task.dispatched_at = Some(at);
                task.not_before = None;
            }
            TaskMark::Succeeded(payload) => {
                task.result = Some(payload);
                task.error = None;
                task.dispatched_at = None;
            }
            TaskMark::Retry { error, not_before } => {
                task.error = Some(error);
                task.not_before = Some(not_before);
                task.dispatched_at = None;
            }
            TaskMark::Failed(error) => {
                task.error = Some(error);
                task.dispatched_at = None;
            }
            TaskMark::Skipped(error) => {
                if error.is_some() {
                    task.error = error;
                }
                task.dispatched_at = None;
            }
        }
        Ok(MarkEffect::Applied)
    }

    /// Every task `task_id` transitively depends on. Retired tasks are not
    /// part of the edge set.
    pub fn ancestors(&self, task_id: TaskId) -> BTreeSet<TaskId> {
        self.deps.ancestors(task_id)
    }

    /// `roots` plus everything transitively waiting for them.
    pub fn dependents_closure(&self, roots: &[TaskId]) -> BTreeSet<TaskId> {
        let mut closure: BTreeSet<TaskId> = roots.iter().copied().collect();
        for &root in roots {
            closure.extend(self.deps.descendants(root));
        }
        closure
    }

    /// Payloads of the succeeded ancestors of `task_id`, keyed by stage.
    pub fn upstream_payloads(&self, task_id: TaskId) -> BTreeMap<StageType, StagePayload> {
        self.ancestors(task_id)
            .into_iter()
            .filter_map(|id| self.tasks.get(&id))
            .filter(|t| t.status == TaskStatus::Succeeded)
            .filter_map(|t| t.result.clone().map(|r| (t.stage, r)))
            .collect()
    }

    /// Any task still Waiting, Ready or Running.
    pub fn has_outstanding(&self) -> bool {
        self.tasks().any(|t| !t.status.is_terminal())
    }

    /// Every content-producing task is Succeeded or Skipped.
    pub fn content_complete(&self) -> bool {
        self.tasks()
            .filter(|t| t.stage.is_content())
            .all(|t| t.status.satisfies_dependents())
    }

    /// Replaces `roots` and everything downstream of them with fresh Waiting
    /// instances. Dependencies inside the replaced set are remapped to the new
    /// ids; the old instances move to `retired` untouched.
    ///
    /// Returns `(old, new)` pairs in dependency order.
    pub fn requeue(
        &mut self,
        roots: &[TaskId],
        mut next_id: impl FnMut() -> TaskId,
    ) -> Result<Vec<(TaskId, TaskId)>, GraphError> {
        if let Some(&missing) = roots.iter().find(|id| !self.tasks.contains_key(id)) {
            return Err(GraphError::UnknownTask(missing));
        }
        let closure = self.dependents_closure(roots);
        let members: Vec<TaskId> = self
            .order
            .iter()
            .copied()
            .filter(|id| closure.contains(id))
            .collect();
        let ordered = match (self.deps.topological_order(&members), members.first()) {
            (Some(ordered), _) => ordered,
            (None, Some(&first)) => {
                return Err(GraphError::Cycle {
                    task: first,
                    depends_on: first,
                });
            }
            (None, None) => Vec::new(),
        };

        let mapping: BTreeMap<TaskId, TaskId> =
            ordered.iter().map(|&old| (old, next_id())).collect();

        let mut fresh = Vec::with_capacity(ordered.len());
        for &old in &ordered {
            let Some(prev) = self.tasks.get(&old) else {
                return Err(GraphError::UnknownTask(old));
            };
            let mut task = Task::new(mapping[&old], prev.job_id, prev.stage);
            task.dependencies = prev
                .dependencies
                .iter()
                .map(|d| mapping.get(d).copied().unwrap_or(*d))
                .collect();
            fresh.push(task);
        }

        for &old in &ordered {
            self.deps.remove_task(old);
            self.order.retain(|id| *id != old);
            if let Some(task) = self.tasks.remove(&old) {
                self.retired.push(task);
            }
        }
        for task in fresh {
            self.add_task(task)?;
        }

        Ok(ordered.into_iter().map(|old| (old, mapping[&old])).collect())
    }
}

/// Serialized form of a task graph: tasks in insertion order plus the
/// retired instances. Edges are rebuilt from each task's dependency list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphSnapshot {
    tasks: Vec<Task>,
    #[serde(default)]
    retired: Vec<Task>,
}

impl From<TaskGraph> for GraphSnapshot {
    fn from(graph: TaskGraph) -> Self {
        let TaskGraph {
            mut tasks,
            order,
            retired,
            ..
        } = graph;
        GraphSnapshot {
            tasks: order.iter().filter_map(|id| tasks.remove(id)).collect(),
            retired,
        }
    }
}

impl TryFrom<GraphSnapshot> for TaskGraph {
    type Error = GraphError;

    fn try_from(snapshot: GraphSnapshot) -> Result<Self, Self::Error> {
        let mut graph = TaskGraph::new();
        for task in snapshot.tasks {
            graph.add_task(task)?;
        }
        graph.retired = snapshot.retired;
        Ok(graph)
    }
}
