use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::model::Guard;

// ─── Scalar aliases ───────────────────────────────────────────

/// Process instance identifier. Equal to the id of the instance's root execution.
pub type InstanceId = Uuid;

pub type ExecutionId = Uuid;

pub type TaskId = Uuid;

pub type SubscriptionId = Uuid;

/// Node identifier inside a process definition.
pub type NodeId = String;

/// Variable values are plain JSON; ordering of names is deterministic.
pub type Variables = BTreeMap<String, serde_json::Value>;

// ─── Process instance ─────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ProcessState {
    Running,
    Completed { at: DateTime<Utc> },
    Terminated { reason: String, at: DateTime<Utc> },
}

impl ProcessState {
    /// Returns true if no further progress is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }
}

/// Read-only snapshot of a process instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub instance_id: InstanceId,
    pub definition_key: String,
    pub definition_version: u32,
    pub state: ProcessState,
    pub created_at: DateTime<Utc>,
}

// ─── Executions ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionState {
    /// Parked on a task.
    Active,
    /// Mid-route inside a single engine operation.
    Advancing,
    /// Parked on a catch event.
    WaitingOnEvent,
    /// Arrived at a parallel join, waiting for its siblings.
    AwaitingJoin,
    /// Scope or fork parent without a cursor of its own.
    Inactive,
}

/// A token: one thread of control through the process graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: ExecutionId,
    pub instance_id: InstanceId,
    /// Navigation only. Never drives lifecycle on its own.
    pub parent_id: Option<ExecutionId>,
    pub current_node: Option<NodeId>,
    /// Spawned by a parallel fork.
    pub is_concurrent: bool,
    pub state: ExecutionState,
}

// ─── Event subscriptions ──────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Signal,
    Message,
    ConditionalGuard,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Message => "message",
            Self::ConditionalGuard => "conditional",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Visible to dispatches from outside the owning instance.
    Global,
    /// Only satisfiable from inside the owning instance, or by exact execution id.
    ExecutionLocal,
}

/// What firing a subscription does to its owner.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum SubscriptionTrigger {
    /// Intermediate catch: the owner leaves the catching node.
    Catch,
    /// Boundary attached to the task the owner is parked on.
    Boundary { host: NodeId, cancel_activity: bool },
    /// Event start owned by the root: spawns a new branch and re-arms.
    EventStart,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventSubscription {
    pub subscription_id: SubscriptionId,
    pub instance_id: InstanceId,
    pub execution_id: ExecutionId,
    pub kind: SubscriptionKind,
    /// Signal or message name; the node id for conditional guards.
    pub event_name: String,
    pub scope: SubscriptionScope,
    /// Catching node, boundary node or event start node.
    pub node_id: NodeId,
    pub trigger: SubscriptionTrigger,
    pub condition: Option<Guard>,
}

// ─── Tasks ────────────────────────────────────────────────────

/// Human work item bound to the execution parked on a task node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: TaskId,
    pub instance_id: InstanceId,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
