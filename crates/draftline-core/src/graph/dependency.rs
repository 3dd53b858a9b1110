//! Dependency edges between tasks of one job.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges are kept in sync
//! - Invariant: the graph is acyclic; `would_create_cycle` is checked before
//!   every insertion

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::TaskId;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on.
    edges: BTreeMap<TaskId, BTreeSet<TaskId>>,

    /// Reverse edges: task -> tasks waiting for it.
    reverse_edges: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `task` depends on `depends_on` ("task waits for depends_on").
    ///
    /// Callers check `would_create_cycle` first.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges.entry(depends_on).or_default().insert(task);
    }

    pub fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Drops every edge touching `task`.
    pub fn remove_task(&mut self, task: TaskId) {
        for dep in self.dependencies(task) {
            self.remove_dependency(task, dep);
        }
        for waiting in self.dependents(task) {
            self.remove_dependency(waiting, task);
        }
    }

    pub fn dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Tasks directly waiting for `task`.
    pub fn dependents(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether adding `task -> depends_on` would close a cycle, i.e. whether
    /// `task` is already reachable from `depends_on` along forward edges.
    pub fn would_create_cycle(&self, task: TaskId, depends_on: TaskId) -> bool {
        task == depends_on || self.ancestors(depends_on).contains(&task)
    }

    /// Everything `task` transitively depends on (excluding `task`).
    pub fn ancestors(&self, task: TaskId) -> BTreeSet<TaskId> {
        walk(task, &self.edges)
    }

    /// Everything transitively waiting for `task` (excluding `task`).
    pub fn descendants(&self, task: TaskId) -> BTreeSet<TaskId> {
        walk(task, &self.reverse_edges)
    }

    /// Kahn's algorithm over `nodes`: dependencies before dependents.
    ///
    /// Edges to tasks outside `nodes` are ignored. Returns `None` if the
    /// restricted graph has a cycle.
    pub fn topological_order(&self, nodes: &[TaskId]) -> Option<Vec<TaskId>> {
        let members: BTreeSet<TaskId> = nodes.iter().copied().collect();
        let mut in_degree: BTreeMap<TaskId, usize> = members
            .iter()
            .map(|&n| {
                let deg = self
                    .dependencies(n)
                    .into_iter()
                    .filter(|d| members.contains(d))
                    .count();
                (n, deg)
            })
            .collect();

        // Seed in caller order so ties keep it.
        let mut queue: VecDeque<TaskId> = nodes
            .iter()
            .copied()
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();
        let mut order = Vec::with_capacity(members.len());

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for waiting in self.dependents(node) {
                if let Some(deg) = in_degree.get_mut(&waiting) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(waiting);
                    }
                }
            }
        }

        (order.len() == members.len()).then_some(order)
    }
}

fn walk(start: TaskId, adjacency: &BTreeMap<TaskId, BTreeSet<TaskId>>) -> BTreeSet<TaskId> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        for &next in adjacency.get(&node).into_iter().flatten() {
            if seen.insert(next) {
                stack.push(next);
            }
        }
    }
    seen
}
