// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task hierarchy arena and cloning plans.
//!
//! Tasks form a forest at most [`MAX_TASK_DEPTH`] levels deep: root tasks,
//! their subtasks, and grandchild subtasks. The forest is held as a flat
//! arena keyed by task id with a parent index, and every traversal is
//! depth-bounded.
//!
//! Cloning is split in two steps. [`TaskTree::clone_plan`] builds a
//! [`TaskPlan`]: the shape of the tree in parent-before-child order, with
//! parents referenced by plan index. A persistence backend then inserts the
//! plan in one transaction, remapping ids as it goes.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::model::TaskNode;
use crate::persistence::Persistence;

/// Root tasks, subtasks and grandchild subtasks.
pub const MAX_TASK_DEPTH: usize = 3;

#[derive(Debug, Clone)]
struct ArenaNode {
    task: TaskNode,
    parent: Option<usize>,
    children: Vec<usize>,
    depth: usize,
}

/// Arena view over one definition's tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskTree {
    nodes: Vec<ArenaNode>,
    roots: Vec<usize>,
    index: HashMap<i64, usize>,
}

impl TaskTree {
    /// Build the arena from flat task rows.
    ///
    /// Rows are ordered by id so siblings come out in ascending id order.
    /// Rows whose parent is missing from the set are unreachable and left out
    /// of every traversal.
    pub fn from_tasks(mut tasks: Vec<TaskNode>) -> Self {
        tasks.sort_by_key(|t| t.id);

        let index: HashMap<i64, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id, i))
            .collect();

        let mut nodes: Vec<ArenaNode> = tasks
            .into_iter()
            .map(|task| ArenaNode {
                task,
                parent: None,
                children: Vec::new(),
                depth: 0,
            })
            .collect();

        let mut roots = Vec::new();
        for i in 0..nodes.len() {
            match nodes[i].task.parent_task_id {
                None => roots.push(i),
                Some(parent_id) => match index.get(&parent_id) {
                    Some(&p) if p != i => {
                        nodes[i].parent = Some(p);
                        nodes[p].children.push(i);
                    }
                    _ => {
                        warn!(
                            task_id = nodes[i].task.id,
                            parent_task_id = parent_id,
                            "Task references a parent outside its definition, ignoring"
                        );
                    }
                },
            }
        }

        let mut tree = Self {
            nodes,
            roots,
            index,
        };
        tree.assign_depths();
        tree
    }

    fn assign_depths(&mut self) {
        let mut stack: Vec<(usize, usize)> = self.roots.iter().map(|&r| (r, 1)).collect();
        while let Some((i, depth)) = stack.pop() {
            self.nodes[i].depth = depth;
            for &c in &self.nodes[i].children {
                stack.push((c, depth + 1));
            }
        }
    }

    /// Number of rows held, reachable or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no rows.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a task by id.
    pub fn get(&self, task_id: i64) -> Option<&TaskNode> {
        self.index.get(&task_id).map(|&i| &self.nodes[i].task)
    }

    /// Depth of a task (roots are 1), or `None` if unknown or unreachable.
    pub fn depth(&self, task_id: i64) -> Option<usize> {
        let &i = self.index.get(&task_id)?;
        match self.nodes[i].depth {
            0 => None,
            d => Some(d),
        }
    }

    /// Root tasks in ascending id order.
    pub fn roots(&self) -> impl Iterator<Item = &TaskNode> + '_ {
        self.roots.iter().map(|&i| &self.nodes[i].task)
    }

    /// Direct children of a task in ascending id order.
    pub fn children(&self, task_id: i64) -> Vec<&TaskNode> {
        match self.index.get(&task_id) {
            Some(&i) => self.nodes[i]
                .children
                .iter()
                .map(|&c| &self.nodes[c].task)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ids of a task and everything below it, bounded by [`MAX_TASK_DEPTH`].
    pub fn subtree_ids(&self, task_id: i64) -> Vec<i64> {
        let Some(&start) = self.index.get(&task_id) else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        let mut stack = vec![(start, 1usize)];
        while let Some((i, level)) = stack.pop() {
            ids.push(self.nodes[i].task.id);
            if level < MAX_TASK_DEPTH {
                for &c in self.nodes[i].children.iter().rev() {
                    stack.push((c, level + 1));
                }
            }
        }
        ids
    }

    /// Build a cloning plan for the supported three levels.
    ///
    /// Order: each root, then its subtasks, each followed by its grandchildren.
    /// Completion state is not carried over.
    pub fn clone_plan(&self) -> TaskPlan {
        let mut plan = TaskPlan::default();
        for &root in &self.roots {
            let root_idx = plan.push(&self.nodes[root].task.name, None);
            for &child in &self.nodes[root].children {
                let child_idx = plan.push(&self.nodes[child].task.name, Some(root_idx));
                for &grandchild in &self.nodes[child].children {
                    plan.push(&self.nodes[grandchild].task.name, Some(child_idx));
                    if !self.nodes[grandchild].children.is_empty() {
                        warn!(
                            task_id = self.nodes[grandchild].task.id,
                            skipped = self.nodes[grandchild].children.len(),
                            "Tasks nested below depth {} are not cloned",
                            MAX_TASK_DEPTH
                        );
                    }
                }
            }
        }
        plan
    }
}

/// One task to create, referencing its parent by plan index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    /// Task name.
    pub name: String,
    /// Index of the parent within the plan; always lower than this task's index.
    pub parent: Option<usize>,
}

/// Shape of a task tree ready for insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPlan {
    /// Tasks in parent-before-child order.
    pub tasks: Vec<PlannedTask>,
}

impl TaskPlan {
    fn push(&mut self, name: &str, parent: Option<usize>) -> usize {
        self.tasks.push(PlannedTask {
            name: name.to_string(),
            parent,
        });
        self.tasks.len() - 1
    }

    /// Number of tasks in the plan.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the plan creates nothing.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Parent id for `task` given the ids created so far, in plan order.
    ///
    /// Backends insert tasks sequentially and call this before each insert.
    pub fn created_parent_id(task: &PlannedTask, created: &[i64]) -> Option<i64> {
        task.parent.and_then(|p| created.get(p).copied())
    }
}

/// Cloning plan for a definition's current task tree.
pub async fn task_plan(persistence: &dyn Persistence, definition_id: i64) -> Result<TaskPlan> {
    let tasks = persistence.list_tasks(definition_id).await?;
    Ok(TaskTree::from_tasks(tasks).clone_plan())
}

/// Clone the source definition's tasks onto the target, all or nothing.
///
/// Existing target tasks are kept. Returns the created task ids.
pub async fn clone_tasks(
    persistence: &dyn Persistence,
    source_definition_id: i64,
    target_definition_id: i64,
) -> Result<Vec<i64>> {
    if persistence.get_definition(target_definition_id).await?.is_none() {
        return Err(CoreError::DefinitionNotFound {
            id: target_definition_id,
        });
    }
    let plan = task_plan(persistence, source_definition_id).await?;
    let created = persistence.insert_tasks(target_definition_id, &plan).await?;
    debug!(
        source_definition_id,
        target_definition_id,
        tasks = created.len(),
        "Cloned task tree"
    );
    Ok(created)
}

/// Delete the target's tasks and re-clone the source's, in one transaction.
pub async fn replace_tasks(
    persistence: &dyn Persistence,
    source_definition_id: i64,
    target_definition_id: i64,
) -> Result<()> {
    let plan = task_plan(persistence, source_definition_id).await?;
    persistence
        .update_definition(target_definition_id, None, Some(&plan))
        .await
}
