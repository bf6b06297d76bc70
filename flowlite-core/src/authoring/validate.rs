use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::model::{Flow, Node, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    fn new(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            message,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Validate a process graph before indexing. Returns all errors found.
pub fn validate_graph(nodes: &[Node], flows: &[Flow]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // V1: Node ids must be unique
    let mut node_map: HashMap<&str, &Node> = HashMap::new();
    for node in nodes {
        if node_map.insert(node.id.as_str(), node).is_some() {
            errors.push(ValidationError::new(
                "V1",
                format!("Duplicate node id: {}", node.id),
            ));
        }
    }

    // V2: Flow ids must be unique
    let mut flow_ids = HashSet::new();
    for flow in flows {
        if !flow_ids.insert(flow.id.as_str()) {
            errors.push(ValidationError::new(
                "V2",
                format!("Duplicate flow id: {}", flow.id),
            ));
        }
    }

    // V3: Flow endpoints reference known nodes
    let mut outgoing: HashMap<&str, Vec<&Flow>> = HashMap::new();
    let mut incoming: HashMap<&str, usize> = HashMap::new();
    for flow in flows {
        for (end, id) in [("source", &flow.source), ("target", &flow.target)] {
            if !node_map.contains_key(id.as_str()) {
                errors.push(ValidationError::new(
                    "V3",
                    format!("Flow {}: {} '{}' is not a node", flow.id, end, id),
                ));
            }
        }
        outgoing.entry(flow.source.as_str()).or_default().push(flow);
        *incoming.entry(flow.target.as_str()).or_default() += 1;
    }

    // V4: Exactly one main start, at least one end
    let main_starts = nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::StartEvent { trigger: None }))
        .count();
    if main_starts != 1 {
        errors.push(ValidationError::new(
            "V4",
            format!("Expected exactly one untriggered start event, found {main_starts}"),
        ));
    }
    if !nodes
        .iter()
        .any(|n| matches!(n.kind, NodeKind::EndEvent { .. }))
    {
        errors.push(ValidationError::new("V4", "No end event found".to_string()));
    }

    for node in nodes {
        let out = outgoing.get(node.id.as_str()).map_or(0, Vec::len);
        let inc = incoming.get(node.id.as_str()).copied().unwrap_or(0);
        match &node.kind {
            // V5: Start events have no incoming and exactly one outgoing flow
            NodeKind::StartEvent { .. } => {
                if inc != 0 || out != 1 {
                    errors.push(ValidationError::new(
                        "V5",
                        format!(
                            "Start event {}: expected 0 incoming / 1 outgoing, found {inc} / {out}",
                            node.id
                        ),
                    ));
                }
            }
            // V6: End events have no outgoing flows
            NodeKind::EndEvent { .. } => {
                if out != 0 {
                    errors.push(ValidationError::new(
                        "V6",
                        format!("End event {} has {out} outgoing flows", node.id),
                    ));
                }
            }
            NodeKind::ExclusiveGateway | NodeKind::ParallelGateway => {
                if out == 0 {
                    errors.push(ValidationError::new(
                        "V7",
                        format!("Gateway {} has no outgoing flows", node.id),
                    ));
                }
            }
            // V9: Boundaries sit on a task, are never targeted, lead somewhere
            NodeKind::ConditionalBoundary { attached_to, .. } => {
                let host_is_task = node_map
                    .get(attached_to.as_str())
                    .is_some_and(|h| matches!(h.kind, NodeKind::Task { .. }));
                if !host_is_task {
                    errors.push(ValidationError::new(
                        "V9",
                        format!(
                            "Boundary {}: host '{}' not found or not a task",
                            node.id, attached_to
                        ),
                    ));
                }
                if inc != 0 || out != 1 {
                    errors.push(ValidationError::new(
                        "V9",
                        format!(
                            "Boundary {}: expected 0 incoming / 1 outgoing, found {inc} / {out}",
                            node.id
                        ),
                    ));
                }
            }
            // V7: Only gateways split
            _ => {
                if out > 1 {
                    errors.push(ValidationError::new(
                        "V7",
                        format!(
                            "Node {} has {out} outgoing flows; only gateways may split",
                            node.id
                        ),
                    ));
                }
            }
        }
    }

    // V8: Guards and default markers only on exclusive gateway flows
    for (source, out_flows) in &outgoing {
        let is_exclusive = node_map
            .get(source)
            .is_some_and(|n| matches!(n.kind, NodeKind::ExclusiveGateway));
        let defaults = out_flows.iter().filter(|f| f.is_default).count();
        if is_exclusive {
            if defaults > 1 {
                errors.push(ValidationError::new(
                    "V8",
                    format!("Exclusive gateway {source}: {defaults} default flows (max 1)"),
                ));
            }
        } else {
            for flow in out_flows {
                if flow.guard.is_some() || flow.is_default {
                    errors.push(ValidationError::new(
                        "V8",
                        format!(
                            "Flow {}: guards and default markers only allowed after an exclusive gateway",
                            flow.id
                        ),
                    ));
                }
            }
        }
    }

    // V10: Every node reachable from a start event
    if errors.is_empty() {
        errors.extend(check_reachability(nodes, flows));
    }

    errors
}

fn check_reachability(nodes: &[Node], flows: &[Flow]) -> Vec<ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let index: HashMap<&str, NodeIndex> = nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();

    for flow in flows {
        graph.add_edge(index[flow.source.as_str()], index[flow.target.as_str()], ());
    }
    for node in nodes {
        if let NodeKind::ConditionalBoundary { attached_to, .. } = &node.kind {
            graph.add_edge(index[attached_to.as_str()], index[node.id.as_str()], ());
        }
    }

    let mut reached = HashSet::new();
    for start in nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::StartEvent { .. }))
    {
        let mut dfs = Dfs::new(&graph, index[start.id.as_str()]);
        while let Some(ix) = dfs.next(&graph) {
            reached.insert(ix);
        }
    }

    nodes
        .iter()
        .filter(|n| !reached.contains(&index[n.id.as_str()]))
        .map(|n| {
            ValidationError::new(
                "V10",
                format!("Node {} is not reachable from any start event", n.id),
            )
        })
        .collect()
}
