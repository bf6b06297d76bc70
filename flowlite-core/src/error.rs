//! Typed engine errors.
//!
//! Every public engine operation returns `Result<T, EngineError>`. Errors are
//! surfaced synchronously and never retried internally; an operation that fails
//! leaves the instance exactly as it was before the call.

use crate::authoring::validate::ValidationError;
use crate::types::{ExecutionId, InstanceId, NodeId, SubscriptionKind, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Process definition not found: {key}")]
    DefinitionNotFound { key: String },

    #[error("Invalid process definition {key}: {}", join_errors(errors))]
    InvalidDefinition {
        key: String,
        errors: Vec<ValidationError>,
    },

    /// Exclusive gateway with no true guard and no default flow.
    #[error("Exclusive gateway {gateway}: no guard satisfied and no default flow")]
    NoSatisfiedGuard { gateway: NodeId },

    /// Join reached by an execution that was not spawned by a registered fork.
    #[error("Join {join} reached by execution {execution} without a registered fork site")]
    DanglingJoin { join: NodeId, execution: ExecutionId },

    #[error("No {kind} subscription named '{name}' reachable from execution {execution}")]
    NoSuchSubscription {
        kind: SubscriptionKind,
        name: String,
        execution: ExecutionId,
    },

    #[error("Process instance not found: {instance}")]
    InstanceNotFound { instance: InstanceId },

    #[error("Execution not found: {execution}")]
    ExecutionNotFound { execution: ExecutionId },

    #[error("Task not found: {task}")]
    TaskNotFound { task: TaskId },

    #[error("Task already completed: {task}")]
    TaskAlreadyCompleted { task: TaskId },

    /// Advancement did not reach a wait state within the configured step budget.
    #[error("Instance {instance} exceeded {limit} advancement steps in one operation")]
    StepLimitExceeded { instance: InstanceId, limit: usize },

    /// Global signals thrown by delivered signals were still pending after the
    /// configured number of propagation rounds.
    #[error("Global signal '{signal}' still propagating after {limit} rounds")]
    SignalRoundsExceeded { signal: String, limit: usize },

    #[error("Failed to parse process definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Collaborator failure: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
