use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExecutionId, InstanceId, NodeId, SubscriptionKind, TaskId};

/// Runtime events: the in-memory audit trail of a process instance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum RuntimeEvent {
    InstanceStarted {
        instance_id: InstanceId,
        definition_key: String,
        definition_version: u32,
        content_hash: [u8; 32],
    },
    ExecutionSpawned {
        execution_id: ExecutionId,
        parent: ExecutionId,
        node_id: NodeId,
    },
    Forked {
        fork_site: NodeId,
        parent: ExecutionId,
        children: Vec<ExecutionId>,
    },
    JoinArrived {
        join_id: NodeId,
        execution_id: ExecutionId,
    },
    /// Child scopes merged into `parent` in `arrival_order`.
    JoinReleased {
        join_id: NodeId,
        parent: ExecutionId,
        arrival_order: Vec<ExecutionId>,
    },
    GatewayTaken {
        gateway_id: NodeId,
        flow_id: String,
        execution_id: ExecutionId,
    },
    TaskCreated {
        task_id: TaskId,
        name: String,
        execution_id: ExecutionId,
    },
    TaskCompleted {
        task_id: TaskId,
        execution_id: ExecutionId,
    },
    Subscribed {
        kind: SubscriptionKind,
        event_name: String,
        execution_id: ExecutionId,
        node_id: NodeId,
    },
    EventReceived {
        kind: SubscriptionKind,
        event_name: String,
        execution_id: ExecutionId,
        node_id: NodeId,
    },
    SignalThrown {
        signal: String,
        execution_id: ExecutionId,
        global: bool,
    },
    VariablesSet {
        execution_id: ExecutionId,
        names: Vec<String>,
    },
    ExecutionEnded {
        execution_id: ExecutionId,
        node_id: Option<NodeId>,
    },
    Completed {
        at: DateTime<Utc>,
    },
    Terminated {
        reason: String,
        at: DateTime<Utc>,
    },
}
