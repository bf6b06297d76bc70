//! Process graph model.
//!
//! Immutable once built. Shared by every instance of a definition through an
//! `Arc`. Routing decisions that depend only on the graph and the variables in
//! scope (guards, exclusive gateway selection) live here.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::authoring::validate::validate_graph;
use crate::error::{EngineError, Result};
use crate::types::{NodeId, Variables};

// ─── Guards ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">=")]
    Gte,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Comparison {
    pub variable: String,
    pub op: CompareOp,
    pub value: serde_json::Value,
}

/// Structured guard expression over the variable scope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Guard {
    Compare(Comparison),
    All { all: Vec<Guard> },
    Any { any: Vec<Guard> },
    Not { not: Box<Guard> },
}

/// Read access to the variables a guard is evaluated against.
pub trait VariableLookup {
    fn lookup(&self, name: &str) -> Option<serde_json::Value>;
}

impl VariableLookup for Variables {
    fn lookup(&self, name: &str) -> Option<serde_json::Value> {
        self.get(name).cloned()
    }
}

impl Guard {
    pub fn compare(variable: &str, op: CompareOp, value: serde_json::Value) -> Self {
        Guard::Compare(Comparison {
            variable: variable.to_string(),
            op,
            value,
        })
    }

    pub fn evaluate(&self, vars: &dyn VariableLookup) -> bool {
        match self {
            Guard::Compare(c) => c.evaluate(vars),
            Guard::All { all } => all.iter().all(|g| g.evaluate(vars)),
            Guard::Any { any } => any.iter().any(|g| g.evaluate(vars)),
            Guard::Not { not } => !not.evaluate(vars),
        }
    }
}

impl Comparison {
    fn evaluate(&self, vars: &dyn VariableLookup) -> bool {
        // Missing variables compare as null.
        let actual = vars
            .lookup(&self.variable)
            .unwrap_or(serde_json::Value::Null);
        match self.op {
            CompareOp::Eq => values_equal(&actual, &self.value),
            CompareOp::Neq => !values_equal(&actual, &self.value),
            CompareOp::Lt => order(&actual, &self.value) == Some(Ordering::Less),
            CompareOp::Gt => order(&actual, &self.value) == Some(Ordering::Greater),
            CompareOp::Lte => matches!(
                order(&actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gte => matches!(
                order(&actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    if a.is_number() && b.is_number() {
        return a.as_f64() == b.as_f64();
    }
    a == b
}

fn order(a: &serde_json::Value, b: &serde_json::Value) -> Option<Ordering> {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ─── Nodes and flows ──────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalScope {
    /// Throws reach every live instance.
    #[default]
    Global,
    /// Throws stay inside the throwing instance. Catches cannot be reached
    /// from outside the instance.
    Process,
}

/// Trigger carried by an event start node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum EventTrigger {
    Signal { name: String, scope: SignalScope },
    Message { name: String },
    Conditional { condition: Guard },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum NodeKind {
    /// `trigger: None` is the instance's main start.
    StartEvent { trigger: Option<EventTrigger> },
    EndEvent { terminate: bool },
    Task { name: String },
    ExclusiveGateway,
    /// Forks when it has several outgoing flows, joins when it has several incoming.
    ParallelGateway,
    SignalCatch { signal: String, scope: SignalScope },
    SignalThrow { signal: String, scope: SignalScope },
    MessageCatch { message: String },
    ConditionalCatch { condition: Guard },
    ConditionalBoundary {
        attached_to: NodeId,
        condition: Guard,
        cancel_activity: bool,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: &str, kind: NodeKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    pub guard: Option<Guard>,
    pub is_default: bool,
}

impl Flow {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            id: format!("{source}->{target}"),
            source: source.to_string(),
            target: target.to_string(),
            guard: None,
            is_default: false,
        }
    }

    pub fn guarded(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn default_flow(mut self) -> Self {
        self.is_default = true;
        self
    }
}

// ─── Definition ───────────────────────────────────────────────

/// Immutable process graph. `version` is assigned by the definition store.
#[derive(Clone, Debug)]
pub struct ProcessDefinition {
    pub key: String,
    pub version: u32,
    pub name: Option<String>,
    /// SHA-256 over key, name, nodes and flows.
    pub content_hash: [u8; 32],
    nodes: Vec<Node>,
    flows: Vec<Flow>,
    node_index: HashMap<NodeId, usize>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    incoming: HashMap<NodeId, Vec<usize>>,
    boundaries: HashMap<NodeId, Vec<usize>>,
}

impl ProcessDefinition {
    /// Validate and index a graph. Returns every rule violation at once.
    pub fn new(
        key: &str,
        name: Option<String>,
        nodes: Vec<Node>,
        flows: Vec<Flow>,
    ) -> Result<Self> {
        let errors = validate_graph(&nodes, &flows);
        if !errors.is_empty() {
            return Err(EngineError::InvalidDefinition {
                key: key.to_string(),
                errors,
            });
        }

        let content_hash = compute_hash(key, &name, &nodes, &flows);

        let mut node_index = HashMap::new();
        let mut boundaries: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            node_index.insert(node.id.clone(), i);
            if let NodeKind::ConditionalBoundary { attached_to, .. } = &node.kind {
                boundaries.entry(attached_to.clone()).or_default().push(i);
            }
        }

        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (i, flow) in flows.iter().enumerate() {
            outgoing.entry(flow.source.clone()).or_default().push(i);
            incoming.entry(flow.target.clone()).or_default().push(i);
        }

        Ok(Self {
            key: key.to_string(),
            version: 0,
            name,
            content_hash,
            nodes,
            flows,
            node_index,
            outgoing,
            incoming,
            boundaries,
        })
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// The start node without an event trigger.
    pub fn main_start(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| matches!(n.kind, NodeKind::StartEvent { trigger: None }))
    }

    /// Start nodes armed per instance by an event trigger.
    pub fn event_starts(&self) -> impl Iterator<Item = (&Node, &EventTrigger)> {
        self.nodes.iter().filter_map(|n| match &n.kind {
            NodeKind::StartEvent {
                trigger: Some(trigger),
            } => Some((n, trigger)),
            _ => None,
        })
    }

    /// Outgoing flows in authoring order.
    pub fn resolve_outgoing(&self, node_id: &str) -> Vec<&Flow> {
        self.outgoing
            .get(node_id)
            .map(|idx| idx.iter().map(|&i| &self.flows[i]).collect())
            .unwrap_or_default()
    }

    pub fn incoming_count(&self, node_id: &str) -> usize {
        self.incoming.get(node_id).map_or(0, Vec::len)
    }

    /// Boundary nodes attached to a task, in authoring order.
    pub fn boundaries_of(&self, host: &str) -> Vec<&Node> {
        self.boundaries
            .get(host)
            .map(|idx| idx.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    /// Absent guard is true.
    pub fn evaluate_guard(&self, flow: &Flow, vars: &dyn VariableLookup) -> bool {
        flow.guard.as_ref().is_none_or(|g| g.evaluate(vars))
    }

    /// First non-default flow in source order whose guard holds, else the
    /// default flow, else `NoSatisfiedGuard`.
    pub fn select_exclusive(&self, gateway: &str, vars: &dyn VariableLookup) -> Result<&Flow> {
        let flows = self.resolve_outgoing(gateway);
        if let Some(flow) = flows
            .iter()
            .find(|f| !f.is_default && self.evaluate_guard(f, vars))
        {
            return Ok(flow);
        }
        flows
            .into_iter()
            .find(|f| f.is_default)
            .ok_or_else(|| EngineError::NoSatisfiedGuard {
                gateway: gateway.to_string(),
            })
    }
}

fn compute_hash(key: &str, name: &Option<String>, nodes: &[Node], flows: &[Flow]) -> [u8; 32] {
    let bytes = serde_json::to_vec(&(key, name, nodes, flows)).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approval_graph() -> ProcessDefinition {
        let nodes = vec![
            Node::new("start", NodeKind::StartEvent { trigger: None }),
            Node::new("gw", NodeKind::ExclusiveGateway),
            Node::new(
                "big",
                NodeKind::Task {
                    name: "Big".to_string(),
                },
            ),
            Node::new(
                "medium",
                NodeKind::Task {
                    name: "Medium".to_string(),
                },
            ),
            Node::new(
                "fallback",
                NodeKind::Task {
                    name: "Fallback".to_string(),
                },
            ),
            Node::new("end", NodeKind::EndEvent { terminate: false }),
        ];
        let flows = vec![
            Flow::new("start", "gw"),
            Flow::new("gw", "fallback").default_flow(),
            Flow::new("gw", "big").guarded(Guard::compare("amount", CompareOp::Gt, json!(1000))),
            Flow::new("gw", "medium").guarded(Guard::compare("amount", CompareOp::Gt, json!(100))),
            Flow::new("big", "end"),
            Flow::new("medium", "end"),
            Flow::new("fallback", "end"),
        ];
        ProcessDefinition::new("approval", None, nodes, flows).unwrap()
    }

    #[test]
    fn test_exclusive_picks_first_true_in_source_order() {
        let def = approval_graph();
        // Both guards hold; the first one in authoring order wins.
        let vars = Variables::from([("amount".to_string(), json!(5000))]);
        assert_eq!(def.select_exclusive("gw", &vars).unwrap().target, "big");

        let vars = Variables::from([("amount".to_string(), json!(500))]);
        assert_eq!(def.select_exclusive("gw", &vars).unwrap().target, "medium");
    }

    #[test]
    fn test_exclusive_falls_back_to_default() {
        let def = approval_graph();
        let vars = Variables::from([("amount".to_string(), json!(5))]);
        assert_eq!(
            def.select_exclusive("gw", &vars).unwrap().target,
            "fallback"
        );
        // Missing variable compares as null, guards fail, default wins.
        assert_eq!(
            def.select_exclusive("gw", &Variables::new()).unwrap().target,
            "fallback"
        );
    }

    #[test]
    fn test_exclusive_without_default_fails() {
        let nodes = vec![
            Node::new("start", NodeKind::StartEvent { trigger: None }),
            Node::new("gw", NodeKind::ExclusiveGateway),
            Node::new("end_a", NodeKind::EndEvent { terminate: false }),
            Node::new("end_b", NodeKind::EndEvent { terminate: false }),
        ];
        let flows = vec![
            Flow::new("start", "gw"),
            Flow::new("gw", "end_a").guarded(Guard::compare("x", CompareOp::Eq, json!("a"))),
            Flow::new("gw", "end_b").guarded(Guard::compare("x", CompareOp::Eq, json!("b"))),
        ];
        let def = ProcessDefinition::new("xor", None, nodes, flows).unwrap();
        let vars = Variables::from([("x".to_string(), json!("c"))]);
        let err = def.select_exclusive("gw", &vars).unwrap_err();
        assert!(matches!(err, EngineError::NoSatisfiedGuard { gateway } if gateway == "gw"));
    }

    #[test]
    fn test_resolve_outgoing_keeps_authoring_order() {
        let def = approval_graph();
        let targets: Vec<_> = def
            .resolve_outgoing("gw")
            .iter()
            .map(|f| f.target.as_str())
            .collect();
        assert_eq!(targets, vec!["fallback", "big", "medium"]);
        assert!(def.resolve_outgoing("end").is_empty());
        assert_eq!(def.incoming_count("end"), 3);
    }

    #[test]
    fn test_guard_composites() {
        let vars = Variables::from([
            ("name".to_string(), json!("pizza")),
            ("slices".to_string(), json!(8.0)),
            ("hot".to_string(), json!(true)),
        ]);
        let g = Guard::All {
            all: vec![
                Guard::compare("slices", CompareOp::Eq, json!(8)),
                Guard::compare("name", CompareOp::Gte, json!("pasta")),
                Guard::Not {
                    not: Box::new(Guard::compare("hot", CompareOp::Eq, json!(false))),
                },
            ],
        };
        assert!(g.evaluate(&vars));

        let g = Guard::Any {
            any: vec![
                Guard::compare("slices", CompareOp::Lt, json!(2)),
                Guard::compare("missing", CompareOp::Neq, serde_json::Value::Null),
            ],
        };
        assert!(!g.evaluate(&vars));
        // Ordering against mismatched types is never true.
        assert!(!Guard::compare("name", CompareOp::Lt, json!(3)).evaluate(&vars));
    }

    #[test]
    fn test_content_hash_tracks_content() {
        let a = approval_graph();
        let b = approval_graph();
        assert_eq!(a.content_hash, b.content_hash);

        let nodes = vec![
            Node::new("start", NodeKind::StartEvent { trigger: None }),
            Node::new("end", NodeKind::EndEvent { terminate: false }),
        ];
        let c = ProcessDefinition::new("approval", None, nodes, vec![Flow::new("start", "end")])
            .unwrap();
        assert_ne!(a.content_hash, c.content_hash);
    }
}
