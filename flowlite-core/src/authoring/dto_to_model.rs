use super::dto::{FlowDto, NodeDto, ProcessDefinitionDto};
use super::validate::ValidationError;
use crate::error::{EngineError, Result};
use crate::model::{EventTrigger, Flow, Node, NodeKind, ProcessDefinition};

/// Convert an authored DTO into a validated, indexed process definition.
pub fn dto_to_definition(dto: &ProcessDefinitionDto) -> Result<ProcessDefinition> {
    let mut errors = Vec::new();
    let nodes: Vec<Node> = dto
        .nodes
        .iter()
        .filter_map(|n| match convert_node(n) {
            Ok(node) => Some(node),
            Err(e) => {
                errors.push(e);
                None
            }
        })
        .collect();

    if !errors.is_empty() {
        return Err(EngineError::InvalidDefinition {
            key: dto.key.clone(),
            errors,
        });
    }

    let flows = dto.flows.iter().map(convert_flow).collect();
    ProcessDefinition::new(&dto.key, dto.name.clone(), nodes, flows)
}

fn convert_node(dto: &NodeDto) -> std::result::Result<Node, ValidationError> {
    let kind = match dto {
        NodeDto::Start {
            id,
            signal,
            scope,
            message,
            condition,
        } => {
            let trigger = match (signal, message, condition) {
                (None, None, None) => None,
                (Some(name), None, None) => Some(EventTrigger::Signal {
                    name: name.clone(),
                    scope: *scope,
                }),
                (None, Some(name), None) => Some(EventTrigger::Message { name: name.clone() }),
                (None, None, Some(condition)) => Some(EventTrigger::Conditional {
                    condition: condition.clone(),
                }),
                _ => {
                    return Err(ValidationError {
                        rule: "V11".to_string(),
                        message: format!("Start event {id}: at most one trigger may be set"),
                    })
                }
            };
            NodeKind::StartEvent { trigger }
        }
        NodeDto::End { terminate, .. } => NodeKind::EndEvent {
            terminate: *terminate,
        },
        NodeDto::Task { name, .. } => NodeKind::Task { name: name.clone() },
        NodeDto::ExclusiveGateway { .. } => NodeKind::ExclusiveGateway,
        NodeDto::ParallelGateway { .. } => NodeKind::ParallelGateway,
        NodeDto::SignalCatch { signal, scope, .. } => NodeKind::SignalCatch {
            signal: signal.clone(),
            scope: *scope,
        },
        NodeDto::SignalThrow { signal, scope, .. } => NodeKind::SignalThrow {
            signal: signal.clone(),
            scope: *scope,
        },
        NodeDto::MessageCatch { message, .. } => NodeKind::MessageCatch {
            message: message.clone(),
        },
        NodeDto::ConditionalCatch { condition, .. } => NodeKind::ConditionalCatch {
            condition: condition.clone(),
        },
        NodeDto::ConditionalBoundary {
            attached_to,
            condition,
            cancel_activity,
            ..
        } => NodeKind::ConditionalBoundary {
            attached_to: attached_to.clone(),
            condition: condition.clone(),
            cancel_activity: *cancel_activity,
        },
    };
    Ok(Node::new(dto.id(), kind))
}

fn convert_flow(dto: &FlowDto) -> Flow {
    Flow {
        id: dto
            .id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", dto.from, dto.to)),
        source: dto.from.clone(),
        target: dto.to.clone(),
        guard: dto.condition.clone(),
        is_default: dto.is_default,
    }
}
