use serde::{Deserialize, Serialize};

use crate::model::{Guard, SignalScope};

// ── Helper defaults for serde ──

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !v
}

// ── Top-level DTO ──

/// Authoring shape of a process definition, as written in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinitionDto {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<NodeDto>,
    pub flows: Vec<FlowDto>,
}

// ── Flow ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDto {
    /// Defaults to `from->to`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Guard>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
}

// ── Node (tagged enum) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeDto {
    /// At most one of `signal`, `message`, `condition` may be set. None set
    /// marks the main start.
    Start {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<String>,
        #[serde(default)]
        scope: SignalScope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<Guard>,
    },
    End {
        id: String,
        #[serde(default, skip_serializing_if = "is_false")]
        terminate: bool,
    },
    Task {
        id: String,
        name: String,
    },
    ExclusiveGateway {
        id: String,
    },
    ParallelGateway {
        id: String,
    },
    SignalCatch {
        id: String,
        signal: String,
        #[serde(default)]
        scope: SignalScope,
    },
    SignalThrow {
        id: String,
        signal: String,
        #[serde(default)]
        scope: SignalScope,
    },
    MessageCatch {
        id: String,
        message: String,
    },
    ConditionalCatch {
        id: String,
        condition: Guard,
    },
    ConditionalBoundary {
        id: String,
        attached_to: String,
        condition: Guard,
        #[serde(default = "default_true")]
        cancel_activity: bool,
    },
}

impl NodeDto {
    /// Returns the id regardless of variant.
    pub fn id(&self) -> &str {
        match self {
            NodeDto::Start { id, .. }
            | NodeDto::End { id, .. }
            | NodeDto::Task { id, .. }
            | NodeDto::ExclusiveGateway { id }
            | NodeDto::ParallelGateway { id }
            | NodeDto::SignalCatch { id, .. }
            | NodeDto::SignalThrow { id, .. }
            | NodeDto::MessageCatch { id, .. }
            | NodeDto::ConditionalCatch { id, .. }
            | NodeDto::ConditionalBoundary { id, .. } => id,
        }
    }
}
