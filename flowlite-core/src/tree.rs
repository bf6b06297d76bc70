//! Token / execution tree.
//!
//! An arena of executions keyed by id, parent links stored as ids. The root
//! shares its id with the process instance and acts as the instance scope: it
//! never holds a cursor, and the main path and every event-spawned branch hang
//! directly below it.
//!
//! Parallel forks register a join counter keyed by the fork parent. Branches
//! leave the counter either by arriving at the join or by ending; the join is
//! released once nothing is pending and at least one branch arrived.

use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::types::{Execution, ExecutionId, ExecutionState, InstanceId, NodeId};

#[derive(Clone, Debug)]
pub struct JoinCounter {
    /// Gateway that forked.
    pub fork_site: NodeId,
    pub expected: usize,
    /// Branches that have neither arrived nor ended.
    pub pending: Vec<ExecutionId>,
    /// Arrival order.
    pub arrived: Vec<ExecutionId>,
    /// Bound by the first arrival.
    pub join_node: Option<NodeId>,
}

/// A join whose branches are all accounted for.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinRelease {
    pub parent: ExecutionId,
    pub arrived: Vec<ExecutionId>,
    pub join: NodeId,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JoinArrival {
    Waiting,
    Released(JoinRelease),
}

/// Outcome of ending an execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    /// Ended executions, the ending one first, then cascaded parents.
    pub removed: Vec<ExecutionId>,
    pub released_join: Option<JoinRelease>,
    pub instance_completed: bool,
}

#[derive(Clone, Debug)]
pub struct ExecutionTree {
    root: ExecutionId,
    executions: HashMap<ExecutionId, Execution>,
    /// Creation order, for deterministic listing.
    order: Vec<ExecutionId>,
    joins: HashMap<ExecutionId, JoinCounter>,
}

impl ExecutionTree {
    pub fn new(instance_id: InstanceId) -> Self {
        let root = Execution {
            execution_id: instance_id,
            instance_id,
            parent_id: None,
            current_node: None,
            is_concurrent: false,
            state: ExecutionState::Inactive,
        };
        Self {
            root: instance_id,
            executions: HashMap::from([(instance_id, root)]),
            order: vec![instance_id],
            joins: HashMap::new(),
        }
    }

    pub fn root(&self) -> ExecutionId {
        self.root
    }

    pub fn get(&self, id: ExecutionId) -> Option<&Execution> {
        self.executions.get(&id)
    }

    pub fn contains(&self, id: ExecutionId) -> bool {
        self.executions.contains_key(&id)
    }

    pub fn require(&self, id: ExecutionId) -> Result<&Execution> {
        self.executions
            .get(&id)
            .ok_or(EngineError::ExecutionNotFound { execution: id })
    }

    /// Live executions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Execution> {
        self.order.iter().filter_map(|id| self.executions.get(id))
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn children(&self, id: ExecutionId) -> Vec<ExecutionId> {
        self.iter()
            .filter(|e| e.parent_id == Some(id))
            .map(|e| e.execution_id)
            .collect()
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut out = Vec::new();
        let mut cursor = self.executions.get(&id).and_then(|e| e.parent_id);
        while let Some(parent) = cursor {
            out.push(parent);
            cursor = self.executions.get(&parent).and_then(|e| e.parent_id);
        }
        out
    }

    /// The execution followed by its ancestors. Scope lookups walk this.
    pub fn lineage(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut out = vec![id];
        out.extend(self.ancestors(id));
        out
    }

    /// True if `id` is `top` or sits below it.
    pub fn is_in_subtree(&self, id: ExecutionId, top: ExecutionId) -> bool {
        id == top || self.ancestors(id).contains(&top)
    }

    pub fn join_counter(&self, parent: ExecutionId) -> Option<&JoinCounter> {
        self.joins.get(&parent)
    }

    /// New non-concurrent child positioned on `node`.
    pub fn spawn(&mut self, parent: ExecutionId, node: &str) -> Result<ExecutionId> {
        self.require(parent)?;
        Ok(self.insert_child(parent, node, false))
    }

    /// Split `parent` into one concurrent child per target. The parent loses
    /// its cursor and becomes a synchronization scope.
    pub fn fork(
        &mut self,
        parent: ExecutionId,
        targets: &[NodeId],
        fork_site: &str,
    ) -> Result<Vec<ExecutionId>> {
        let exec = self
            .executions
            .get_mut(&parent)
            .ok_or(EngineError::ExecutionNotFound { execution: parent })?;
        exec.current_node = None;
        exec.state = ExecutionState::Inactive;

        let children: Vec<_> = targets
            .iter()
            .map(|target| self.insert_child(parent, target, true))
            .collect();
        self.joins.insert(
            parent,
            JoinCounter {
                fork_site: fork_site.to_string(),
                expected: children.len(),
                pending: children.clone(),
                arrived: Vec::new(),
                join_node: None,
            },
        );
        Ok(children)
    }

    /// Move a cursor onto `node`.
    pub fn advance(&mut self, id: ExecutionId, node: &str) -> Result<()> {
        let exec = self
            .executions
            .get_mut(&id)
            .ok_or(EngineError::ExecutionNotFound { execution: id })?;
        exec.current_node = Some(node.to_string());
        exec.state = ExecutionState::Advancing;
        Ok(())
    }

    pub fn set_state(&mut self, id: ExecutionId, state: ExecutionState) -> Result<()> {
        let exec = self
            .executions
            .get_mut(&id)
            .ok_or(EngineError::ExecutionNotFound { execution: id })?;
        exec.state = state;
        Ok(())
    }

    /// Record `id` reaching `join`. Fails with `DanglingJoin` when the
    /// execution was not produced by a fork, or when its siblings are
    /// converging on a different join.
    pub fn arrive_at_join(&mut self, id: ExecutionId, join: &str) -> Result<JoinArrival> {
        let exec = self.require(id)?;
        let dangling = || EngineError::DanglingJoin {
            join: join.to_string(),
            execution: id,
        };
        let parent = match (exec.is_concurrent, exec.parent_id) {
            (true, Some(parent)) => parent,
            _ => return Err(dangling()),
        };
        let counter = self.joins.get_mut(&parent).ok_or_else(dangling)?;
        match &counter.join_node {
            Some(bound) if bound != join => return Err(dangling()),
            Some(_) => {}
            None => counter.join_node = Some(join.to_string()),
        }
        if !counter.pending.contains(&id) {
            return Err(dangling());
        }
        counter.pending.retain(|p| *p != id);
        counter.arrived.push(id);
        let release = counter.pending.is_empty().then(|| JoinRelease {
            parent,
            arrived: counter.arrived.clone(),
            join: join.to_string(),
        });

        if let Some(exec) = self.executions.get_mut(&id) {
            exec.state = ExecutionState::AwaitingJoin;
        }
        Ok(match release {
            Some(release) => JoinArrival::Released(release),
            None => JoinArrival::Waiting,
        })
    }

    /// Drop the arrived branches and put the parent back on the join node.
    pub fn finish_join(&mut self, release: &JoinRelease) -> Result<()> {
        self.joins.remove(&release.parent);
        for child in &release.arrived {
            self.remove(*child);
        }
        self.advance(release.parent, &release.join)
    }

    /// End a leaf execution and cascade upward: a fork parent whose branches
    /// all ended completes too, and the root completing completes the instance.
    pub fn complete(&mut self, id: ExecutionId) -> Result<Completion> {
        self.require(id)?;
        let mut completion = Completion::default();
        let mut ending = id;
        loop {
            if ending == self.root {
                completion.instance_completed = true;
                if let Some(root) = self.executions.get_mut(&ending) {
                    root.state = ExecutionState::Inactive;
                }
                return Ok(completion);
            }

            let parent = self.executions.get(&ending).and_then(|e| e.parent_id);
            self.remove(ending);
            completion.removed.push(ending);
            let Some(parent) = parent else {
                return Ok(completion);
            };

            if let Some(counter) = self.joins.get_mut(&parent) {
                counter.pending.retain(|p| *p != ending);
                if !counter.pending.is_empty() {
                    return Ok(completion);
                }
                if !counter.arrived.is_empty() {
                    completion.released_join = Some(JoinRelease {
                        parent,
                        arrived: counter.arrived.clone(),
                        join: counter.join_node.clone().unwrap_or_default(),
                    });
                    return Ok(completion);
                }
                self.joins.remove(&parent);
            }

            let parent_idle = self
                .executions
                .get(&parent)
                .is_some_and(|p| p.current_node.is_none());
            if !parent_idle || !self.children(parent).is_empty() {
                return Ok(completion);
            }
            ending = parent;
        }
    }

    /// Remove every execution below the root and every join counter.
    pub fn terminate_all(&mut self) -> Vec<ExecutionId> {
        let removed: Vec<_> = self
            .order
            .iter()
            .copied()
            .filter(|id| *id != self.root)
            .collect();
        for id in &removed {
            self.executions.remove(id);
        }
        self.order.retain(|id| *id == self.root);
        self.joins.clear();
        if let Some(root) = self.executions.get_mut(&self.root) {
            root.state = ExecutionState::Inactive;
        }
        removed
    }

    fn insert_child(&mut self, parent: ExecutionId, node: &str, is_concurrent: bool) -> ExecutionId {
        let id = Uuid::now_v7();
        self.executions.insert(
            id,
            Execution {
                execution_id: id,
                instance_id: self.root,
                parent_id: Some(parent),
                current_node: Some(node.to_string()),
                is_concurrent,
                state: ExecutionState::Advancing,
            },
        );
        self.order.push(id);
        id
    }

    fn remove(&mut self, id: ExecutionId) {
        self.executions.remove(&id);
        self.order.retain(|e| *e != id);
    }
}
