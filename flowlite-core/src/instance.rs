//! Per-instance runtime state and the advance routine.
//!
//! Everything here is synchronous and in-memory. The engine clones an
//! `InstanceState` under the instance lock, runs one operation on the clone
//! and swaps it in only if the operation succeeded, so a failed call leaves
//! no trace.
//!
//! Routing runs over a queue of `Enter`/`Leave` steps dispatched on
//! `NodeKind`. `Enter` is what a node does when a token lands on it (create a
//! task, subscribe, join, end); `Leave` picks the outgoing flow(s).

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::authoring::validate::ValidationError;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::RuntimeEvent;
use crate::inbox::TaskEvent;
use crate::model::{EventTrigger, Flow, Guard, NodeKind, ProcessDefinition, SignalScope};
use crate::scope::{Overlay, VariableScopeStore};
use crate::subscriptions::{Reach, SubscriptionRegistry};
use crate::tree::{ExecutionTree, JoinArrival, JoinRelease};
use crate::types::*;

/// Side effects of a committed operation, applied by the engine outside the
/// instance arena.
#[derive(Debug, Default)]
pub struct Effects {
    pub task_events: Vec<TaskEvent>,
    /// Global signals thrown inside the instance, still owed to other instances.
    pub global_signals: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Enter(ExecutionId),
    Leave(ExecutionId),
}

/// Work queue and step budget of a single operation.
#[derive(Default)]
struct Run {
    queue: VecDeque<Step>,
    steps: usize,
    fx: Effects,
}

#[derive(Clone, Debug)]
pub struct InstanceState {
    info: ProcessInstance,
    definition: Arc<ProcessDefinition>,
    tree: ExecutionTree,
    scopes: VariableScopeStore,
    subscriptions: SubscriptionRegistry,
    /// Every task ever created, in creation order. Finished ones stay inactive.
    tasks: Vec<Task>,
    history: Vec<RuntimeEvent>,
    config: EngineConfig,
}

fn subscription_scope(scope: SignalScope) -> SubscriptionScope {
    match scope {
        SignalScope::Global => SubscriptionScope::Global,
        SignalScope::Process => SubscriptionScope::ExecutionLocal,
    }
}

impl InstanceState {
    /// Create an instance, arm its event starts and run the main path to its
    /// first wait states.
    pub fn start(
        definition: Arc<ProcessDefinition>,
        variables: Variables,
        config: &EngineConfig,
    ) -> Result<(Self, Effects)> {
        let main_start = definition
            .main_start()
            .map(|n| n.id.clone())
            .ok_or_else(|| EngineError::InvalidDefinition {
                key: definition.key.clone(),
                errors: vec![ValidationError {
                    rule: "V4".to_string(),
                    message: "No untriggered start event".to_string(),
                }],
            })?;

        let instance_id = Uuid::now_v7();
        let mut state = Self {
            info: ProcessInstance {
                instance_id,
                definition_key: definition.key.clone(),
                definition_version: definition.version,
                state: ProcessState::Running,
                created_at: Utc::now(),
            },
            definition: definition.clone(),
            tree: ExecutionTree::new(instance_id),
            scopes: VariableScopeStore::new(),
            subscriptions: SubscriptionRegistry::new(),
            tasks: Vec::new(),
            history: Vec::new(),
            config: config.clone(),
        };
        state.record(RuntimeEvent::InstanceStarted {
            instance_id,
            definition_key: definition.key.clone(),
            definition_version: definition.version,
            content_hash: definition.content_hash,
        });

        let root = state.tree.root();
        state.write_variables(root, variables);
        state.arm_event_starts();

        let mut run = Run::default();
        let main = state.spawn(root, &main_start)?;
        run.queue.push_back(Step::Enter(main));
        state.drive(&mut run)?;
        Ok((state, run.fx))
    }

    // ── Accessors ──

    pub fn info(&self) -> &ProcessInstance {
        &self.info
    }

    pub fn definition(&self) -> &Arc<ProcessDefinition> {
        &self.definition
    }

    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn history(&self) -> &[RuntimeEvent] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.info.state.is_terminal()
    }

    // ── Operations ──

    pub fn complete_task(&mut self, task_id: TaskId) -> Result<Effects> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.task_id == task_id)
            .ok_or(EngineError::TaskNotFound { task: task_id })?;
        if !task.active {
            return Err(EngineError::TaskAlreadyCompleted { task: task_id });
        }
        task.active = false;
        let done = task.clone();

        let mut run = Run::default();
        run.fx.task_events.push(TaskEvent::Completed(done.clone()));
        self.record(RuntimeEvent::TaskCompleted {
            task_id,
            execution_id: done.execution_id,
        });
        // Boundaries live only as long as their host task.
        self.subscriptions.release_owned_by(done.execution_id);
        self.tree
            .set_state(done.execution_id, ExecutionState::Advancing)?;
        run.queue.push_back(Step::Leave(done.execution_id));
        self.drive(&mut run)?;
        Ok(run.fx)
    }

    /// Deliver a signal. Returns how many subscriptions fired.
    pub fn signal(&mut self, name: &str, reach: Reach) -> Result<(usize, Effects)> {
        let mut run = Run::default();
        let matched = self.subscriptions.dispatch_signal(name, reach);
        let fired = self.fire_each(matched, &mut run)?;
        Ok((fired, run.fx))
    }

    pub fn message(&mut self, name: &str, execution: ExecutionId) -> Result<Effects> {
        self.tree.require(execution)?;
        let matched = self.subscriptions.dispatch_message(name, execution);
        if matched.is_empty() {
            return Err(EngineError::NoSuchSubscription {
                kind: SubscriptionKind::Message,
                name: name.to_string(),
                execution,
            });
        }
        let mut run = Run::default();
        self.fire_each(matched, &mut run)?;
        Ok(run.fx)
    }

    /// Write `variables` into `execution`'s scope, then fire every reachable
    /// conditional subscription whose guard now holds: boundaries on
    /// `execution` or below it, plus every conditional catch and conditional
    /// start of the instance. Guards see `variables` on top of the owner's
    /// own view.
    pub fn evaluate_conditions(
        &mut self,
        execution: ExecutionId,
        variables: Variables,
    ) -> Result<(usize, Effects)> {
        self.tree.require(execution)?;
        self.write_variables(execution, variables.clone());

        let satisfied: Vec<SubscriptionId> = self
            .subscriptions
            .conditionals()
            .filter(|s| match s.trigger {
                SubscriptionTrigger::Boundary { .. } => {
                    self.tree.is_in_subtree(s.execution_id, execution)
                }
                SubscriptionTrigger::Catch | SubscriptionTrigger::EventStart => true,
            })
            .filter(|s| self.guard_holds(s.execution_id, s.condition.as_ref(), &variables))
            .map(|s| s.subscription_id)
            .collect();

        let mut run = Run::default();
        let mut fired = 0;
        for id in satisfied {
            if self.is_terminal() {
                break;
            }
            // An earlier firing may have released it.
            let Some(sub) = self.subscriptions.consume(id) else {
                continue;
            };
            if !self.tree.contains(sub.execution_id) {
                continue;
            }
            self.fire(sub, &mut run)?;
            fired += 1;
            self.drive(&mut run)?;
        }
        Ok((fired, run.fx))
    }

    pub fn set_variable(
        &mut self,
        execution: ExecutionId,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.tree.require(execution)?;
        self.scopes.set(execution, name, value);
        self.record(RuntimeEvent::VariablesSet {
            execution_id: execution,
            names: vec![name.to_string()],
        });
        Ok(())
    }

    /// Everything visible from `execution`, nearer scopes shadowing.
    pub fn variables(&self, execution: ExecutionId) -> Result<Variables> {
        self.tree.require(execution)?;
        Ok(self.scopes.visible(&self.tree.lineage(execution)))
    }

    /// Delete the instance: every live execution, task and subscription goes.
    pub fn terminate(&mut self, reason: &str) -> Effects {
        let mut fx = Effects::default();
        self.shut_down(reason, &mut fx);
        let at = Utc::now();
        self.info.state = ProcessState::Terminated {
            reason: reason.to_string(),
            at,
        };
        self.record(RuntimeEvent::Terminated {
            reason: reason.to_string(),
            at,
        });
        fx
    }

    // ── Advance routine ──

    fn drive(&mut self, run: &mut Run) -> Result<()> {
        while let Some(step) = run.queue.pop_front() {
            if self.is_terminal() {
                run.queue.clear();
                break;
            }
            run.steps += 1;
            if run.steps > self.config.max_steps {
                return Err(EngineError::StepLimitExceeded {
                    instance: self.info.instance_id,
                    limit: self.config.max_steps,
                });
            }
            match step {
                Step::Enter(id) => self.enter(id, run)?,
                Step::Leave(id) => self.leave(id, run)?,
            }
        }
        Ok(())
    }

    fn enter(&mut self, id: ExecutionId, run: &mut Run) -> Result<()> {
        let def = Arc::clone(&self.definition);
        let Some(node) = self.cursor(&def, id) else {
            return Ok(());
        };
        debug!(
            instance_id = %self.info.instance_id,
            execution_id = %id,
            node = %node,
            "Token entered node"
        );
        let Some(node) = def.node(node) else {
            return Ok(());
        };

        match &node.kind {
            NodeKind::StartEvent { .. }
            | NodeKind::ConditionalBoundary { .. }
            | NodeKind::ExclusiveGateway => run.queue.push_back(Step::Leave(id)),
            NodeKind::ParallelGateway => {
                if def.incoming_count(&node.id) > 1 {
                    self.arrive_at_join(id, &node.id, run)?;
                } else {
                    run.queue.push_back(Step::Leave(id));
                }
            }
            NodeKind::Task { name } => self.create_task(id, &node.id, name, run)?,
            NodeKind::SignalCatch { signal, scope } => {
                let sub = EventSubscription {
                    scope: subscription_scope(*scope),
                    ..self.subscription(id, &node.id, SubscriptionKind::Signal, signal)
                };
                self.park(sub)?;
            }
            NodeKind::MessageCatch { message } => {
                let sub = self.subscription(id, &node.id, SubscriptionKind::Message, message);
                self.park(sub)?;
            }
            NodeKind::ConditionalCatch { condition } => {
                let sub = EventSubscription {
                    condition: Some(condition.clone()),
                    ..self.subscription(
                        id,
                        &node.id,
                        SubscriptionKind::ConditionalGuard,
                        &node.id,
                    )
                };
                self.park(sub)?;
            }
            NodeKind::SignalThrow { signal, scope } => {
                run.queue.push_back(Step::Leave(id));
                let global = *scope == SignalScope::Global;
                self.record(RuntimeEvent::SignalThrown {
                    signal: signal.clone(),
                    execution_id: id,
                    global,
                });
                for sub in self.subscriptions.dispatch_signal(signal, Reach::Local) {
                    if self.tree.contains(sub.execution_id) {
                        self.fire(sub, run)?;
                    }
                }
                if global {
                    run.fx.global_signals.push(signal.clone());
                }
            }
            NodeKind::EndEvent { terminate: true } => {
                let reason = format!("Terminate end event {}", node.id);
                self.shut_down(&reason, &mut run.fx);
                let at = Utc::now();
                self.info.state = ProcessState::Completed { at };
                self.record(RuntimeEvent::Completed { at });
            }
            NodeKind::EndEvent { terminate: false } => self.end_execution(id, run)?,
        }
        Ok(())
    }

    fn leave(&mut self, id: ExecutionId, run: &mut Run) -> Result<()> {
        let def = Arc::clone(&self.definition);
        let Some(node_id) = self.cursor(&def, id) else {
            return Ok(());
        };
        let is_exclusive = def
            .node(node_id)
            .is_some_and(|n| matches!(n.kind, NodeKind::ExclusiveGateway));

        if is_exclusive {
            let lineage = self.tree.lineage(id);
            let flow = def.select_exclusive(node_id, &self.scopes.view(&lineage))?;
            self.record(RuntimeEvent::GatewayTaken {
                gateway_id: node_id.to_string(),
                flow_id: flow.id.clone(),
                execution_id: id,
            });
            return self.move_to(id, &flow.target, run);
        }

        let outgoing = def.resolve_outgoing(node_id);
        match outgoing.as_slice() {
            [] => self.end_execution(id, run),
            [flow] => self.move_to(id, &flow.target, run),
            flows => self.fork(id, node_id, flows, run),
        }
    }

    /// Current node id of `id`, borrowed from the definition.
    fn cursor<'d>(&self, def: &'d ProcessDefinition, id: ExecutionId) -> Option<&'d str> {
        let node = self.tree.get(id)?.current_node.as_deref()?;
        def.node(node).map(|n| n.id.as_str())
    }

    fn move_to(&mut self, id: ExecutionId, target: &str, run: &mut Run) -> Result<()> {
        self.tree.advance(id, target)?;
        run.queue.push_back(Step::Enter(id));
        Ok(())
    }

    fn fork(
        &mut self,
        id: ExecutionId,
        site: &str,
        flows: &[&Flow],
        run: &mut Run,
    ) -> Result<()> {
        let targets: Vec<NodeId> = flows.iter().map(|f| f.target.clone()).collect();
        let children = self.tree.fork(id, &targets, site)?;
        debug!(
            instance_id = %self.info.instance_id,
            fork_site = site,
            branches = children.len(),
            "Forked"
        );
        self.record(RuntimeEvent::Forked {
            fork_site: site.to_string(),
            parent: id,
            children: children.clone(),
        });
        run.queue.extend(children.into_iter().map(Step::Enter));
        Ok(())
    }

    fn arrive_at_join(&mut self, id: ExecutionId, join: &str, run: &mut Run) -> Result<()> {
        let arrival = self.tree.arrive_at_join(id, join)?;
        self.record(RuntimeEvent::JoinArrived {
            join_id: join.to_string(),
            execution_id: id,
        });
        if let JoinArrival::Released(release) = arrival {
            self.release_join(release, run)?;
        }
        Ok(())
    }

    fn release_join(&mut self, release: JoinRelease, run: &mut Run) -> Result<()> {
        self.scopes.merge(&release.arrived, release.parent);
        self.tree.finish_join(&release)?;
        debug!(
            instance_id = %self.info.instance_id,
            join = %release.join,
            arrived = release.arrived.len(),
            "Join released"
        );
        self.record(RuntimeEvent::JoinReleased {
            join_id: release.join.clone(),
            parent: release.parent,
            arrival_order: release.arrived,
        });
        run.queue.push_back(Step::Leave(release.parent));
        Ok(())
    }

    fn end_execution(&mut self, id: ExecutionId, run: &mut Run) -> Result<()> {
        let node_id = self.tree.get(id).and_then(|e| e.current_node.clone());
        self.subscriptions.release_owned_by(id);
        let completion = self.tree.complete(id)?;
        for removed in &completion.removed {
            self.scopes.discard(*removed);
            self.record(RuntimeEvent::ExecutionEnded {
                execution_id: *removed,
                node_id: if *removed == id { node_id.clone() } else { None },
            });
        }
        if let Some(release) = completion.released_join {
            self.release_join(release, run)?;
        }
        if completion.instance_completed {
            // Armed event starts do not keep an instance alive.
            self.subscriptions.clear();
            let at = Utc::now();
            self.info.state = ProcessState::Completed { at };
            self.record(RuntimeEvent::Completed { at });
        }
        Ok(())
    }

    fn create_task(
        &mut self,
        id: ExecutionId,
        node_id: &str,
        name: &str,
        run: &mut Run,
    ) -> Result<()> {
        let task = Task {
            task_id: Uuid::now_v7(),
            instance_id: self.info.instance_id,
            execution_id: id,
            node_id: node_id.to_string(),
            name: name.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        self.record(RuntimeEvent::TaskCreated {
            task_id: task.task_id,
            name: task.name.clone(),
            execution_id: id,
        });
        self.tasks.push(task.clone());
        run.fx.task_events.push(TaskEvent::Created(task));

        let def = Arc::clone(&self.definition);
        for boundary in def.boundaries_of(node_id) {
            if let NodeKind::ConditionalBoundary {
                condition,
                cancel_activity,
                ..
            } = &boundary.kind
            {
                let sub = EventSubscription {
                    trigger: SubscriptionTrigger::Boundary {
                        host: node_id.to_string(),
                        cancel_activity: *cancel_activity,
                    },
                    condition: Some(condition.clone()),
                    ..self.subscription(
                        id,
                        &boundary.id,
                        SubscriptionKind::ConditionalGuard,
                        &boundary.id,
                    )
                };
                self.subscribe(sub);
            }
        }
        self.tree.set_state(id, ExecutionState::Active)
    }

    // ── Subscriptions ──

    fn subscription(
        &self,
        execution: ExecutionId,
        node_id: &str,
        kind: SubscriptionKind,
        event_name: &str,
    ) -> EventSubscription {
        EventSubscription {
            subscription_id: Uuid::now_v7(),
            instance_id: self.info.instance_id,
            execution_id: execution,
            kind,
            event_name: event_name.to_string(),
            scope: SubscriptionScope::ExecutionLocal,
            node_id: node_id.to_string(),
            trigger: SubscriptionTrigger::Catch,
            condition: None,
        }
    }

    fn subscribe(&mut self, sub: EventSubscription) {
        self.record(RuntimeEvent::Subscribed {
            kind: sub.kind,
            event_name: sub.event_name.clone(),
            execution_id: sub.execution_id,
            node_id: sub.node_id.clone(),
        });
        self.subscriptions.subscribe(sub);
    }

    /// Subscribe and put the owner to sleep on its catch node.
    fn park(&mut self, sub: EventSubscription) -> Result<()> {
        let owner = sub.execution_id;
        self.subscribe(sub);
        self.tree.set_state(owner, ExecutionState::WaitingOnEvent)
    }

    fn arm_event_starts(&mut self) {
        let def = Arc::clone(&self.definition);
        let root = self.tree.root();
        for (node, trigger) in def.event_starts() {
            let sub = match trigger {
                EventTrigger::Signal { name, scope } => EventSubscription {
                    scope: subscription_scope(*scope),
                    ..self.subscription(root, &node.id, SubscriptionKind::Signal, name)
                },
                EventTrigger::Message { name } => {
                    self.subscription(root, &node.id, SubscriptionKind::Message, name)
                }
                EventTrigger::Conditional { condition } => EventSubscription {
                    condition: Some(condition.clone()),
                    ..self.subscription(
                        root,
                        &node.id,
                        SubscriptionKind::ConditionalGuard,
                        &node.id,
                    )
                },
            };
            self.subscribe(EventSubscription {
                trigger: SubscriptionTrigger::EventStart,
                ..sub
            });
        }
    }

    fn guard_holds(&self, owner: ExecutionId, guard: Option<&Guard>, top: &Variables) -> bool {
        let Some(guard) = guard else {
            return false;
        };
        let lineage = self.tree.lineage(owner);
        let view = self.scopes.view(&lineage);
        guard.evaluate(&Overlay { top, below: &view })
    }

    fn fire_each(&mut self, matched: Vec<EventSubscription>, run: &mut Run) -> Result<usize> {
        let mut fired = 0;
        for sub in matched {
            if self.is_terminal() {
                break;
            }
            if !self.tree.contains(sub.execution_id) {
                continue;
            }
            self.fire(sub, run)?;
            fired += 1;
            self.drive(run)?;
        }
        Ok(fired)
    }

    /// Apply a consumed subscription to its owner. Queues work, does not drive.
    fn fire(&mut self, sub: EventSubscription, run: &mut Run) -> Result<()> {
        let owner = sub.execution_id;
        debug!(
            instance_id = %self.info.instance_id,
            kind = %sub.kind,
            event = %sub.event_name,
            execution_id = %owner,
            "Subscription fired"
        );
        self.record(RuntimeEvent::EventReceived {
            kind: sub.kind,
            event_name: sub.event_name.clone(),
            execution_id: owner,
            node_id: sub.node_id.clone(),
        });

        match &sub.trigger {
            SubscriptionTrigger::Catch => {
                self.tree.set_state(owner, ExecutionState::Advancing)?;
                run.queue.push_back(Step::Leave(owner));
            }
            SubscriptionTrigger::Boundary {
                host,
                cancel_activity: true,
            } => {
                let reason = format!("Interrupted by boundary {}", sub.node_id);
                for task in self
                    .tasks
                    .iter_mut()
                    .filter(|t| t.active && t.execution_id == owner && &t.node_id == host)
                {
                    task.active = false;
                    run.fx.task_events.push(TaskEvent::Deleted {
                        task: task.clone(),
                        reason: reason.clone(),
                    });
                }
                self.subscriptions.release_owned_by(owner);
                self.tree.advance(owner, &sub.node_id)?;
                run.queue.push_back(Step::Leave(owner));
            }
            SubscriptionTrigger::Boundary {
                cancel_activity: false,
                ..
            } => {
                let branch = self.spawn(self.tree.root(), &sub.node_id)?;
                run.queue.push_back(Step::Leave(branch));
            }
            SubscriptionTrigger::EventStart => {
                let branch = self.spawn(self.tree.root(), &sub.node_id)?;
                self.subscribe(EventSubscription {
                    subscription_id: Uuid::now_v7(),
                    ..sub.clone()
                });
                run.queue.push_back(Step::Leave(branch));
            }
        }
        Ok(())
    }

    // ── Helpers ──

    fn spawn(&mut self, parent: ExecutionId, node_id: &str) -> Result<ExecutionId> {
        let id = self.tree.spawn(parent, node_id)?;
        self.record(RuntimeEvent::ExecutionSpawned {
            execution_id: id,
            parent,
            node_id: node_id.to_string(),
        });
        Ok(id)
    }

    fn write_variables(&mut self, execution: ExecutionId, variables: Variables) {
        if variables.is_empty() {
            return;
        }
        self.record(RuntimeEvent::VariablesSet {
            execution_id: execution,
            names: variables.keys().cloned().collect(),
        });
        self.scopes.set_all(execution, variables);
    }

    fn shut_down(&mut self, reason: &str, fx: &mut Effects) {
        for task in self.tasks.iter_mut().filter(|t| t.active) {
            task.active = false;
            fx.task_events.push(TaskEvent::Deleted {
                task: task.clone(),
                reason: reason.to_string(),
            });
        }
        self.subscriptions.clear();
        for id in self.tree.terminate_all() {
            self.scopes.discard(id);
        }
    }

    fn record(&mut self, event: RuntimeEvent) {
        debug!(instance_id = %self.info.instance_id, event = ?event, "Runtime event");
        if self.config.record_history {
            self.history.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::definition_from_yaml;
    use serde_json::json;

    fn start(yaml: &str, vars: Variables) -> (InstanceState, Effects) {
        let def = Arc::new(definition_from_yaml(yaml).unwrap());
        InstanceState::start(def, vars, &EngineConfig::default()).unwrap()
    }

    fn active(state: &InstanceState) -> Vec<&str> {
        state
            .tasks()
            .iter()
            .filter(|t| t.active)
            .map(|t| t.name.as_str())
            .collect()
    }

    fn task_named(state: &InstanceState, name: &str) -> Task {
        state
            .tasks()
            .iter()
            .find(|t| t.active && t.name == name)
            .cloned()
            .unwrap()
    }

    const XOR: &str = r#"
key: xor
nodes:
  - kind: Start
    id: start
  - kind: Task
    id: review
    name: Review
  - kind: ExclusiveGateway
    id: decide
  - kind: Task
    id: approve
    name: Approve
  - kind: Task
    id: reject
    name: Reject
  - kind: End
    id: end
flows:
  - from: start
    to: review
  - from: review
    to: decide
  - from: decide
    to: approve
    condition:
      variable: approved
      op: "=="
      value: true
  - from: decide
    to: reject
    condition:
      variable: approved
      op: "=="
      value: false
  - from: approve
    to: end
  - from: reject
    to: end
"#;

    #[test]
    fn test_start_parks_on_first_task() {
        let (state, fx) = start(XOR, Variables::new());
        assert_eq!(active(&state), vec!["Review"]);
        assert_eq!(fx.task_events.len(), 1);
        assert!(matches!(fx.task_events[0], TaskEvent::Created(_)));
        // Root plus the main path.
        assert_eq!(state.tree().len(), 2);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_exclusive_routes_on_scope() {
        let (mut state, _) = start(XOR, Variables::new());
        let review = task_named(&state, "Review");
        state
            .set_variable(review.execution_id, "approved", json!(false))
            .unwrap();
        state.complete_task(review.task_id).unwrap();
        assert_eq!(active(&state), vec!["Reject"]);
    }

    #[test]
    fn test_failed_guard_surfaces_error() {
        let (mut state, _) = start(XOR, Variables::new());
        let review = task_named(&state, "Review");
        let err = state.complete_task(review.task_id).unwrap_err();
        assert!(matches!(err, EngineError::NoSatisfiedGuard { gateway } if gateway == "decide"));
    }

    #[test]
    fn test_completing_twice_rejected() {
        let (mut state, _) = start(XOR, Variables::from([("approved".into(), json!(true))]));
        let review = task_named(&state, "Review");
        state.complete_task(review.task_id).unwrap();
        let err = state.complete_task(review.task_id).unwrap_err();
        assert!(matches!(err, EngineError::TaskAlreadyCompleted { .. }));
    }

    #[test]
    fn test_last_task_completes_instance() {
        let (mut state, _) = start(XOR, Variables::from([("approved".into(), json!(true))]));
        let review = task_named(&state, "Review");
        state.complete_task(review.task_id).unwrap();
        let approve = task_named(&state, "Approve");
        let fx = state.complete_task(approve.task_id).unwrap();
        assert!(matches!(state.info().state, ProcessState::Completed { .. }));
        assert_eq!(fx.task_events.len(), 1);
        assert!(matches!(
            state.history().last(),
            Some(RuntimeEvent::Completed { .. })
        ));
    }

    #[test]
    fn test_terminate_end_deletes_open_tasks() {
        let yaml = r#"
key: kill
nodes:
  - kind: Start
    id: start
  - kind: ParallelGateway
    id: split
  - kind: Task
    id: slow
    name: Slow
  - kind: Task
    id: fast
    name: Fast
  - kind: End
    id: done
  - kind: End
    id: kill
    terminate: true
flows:
  - from: start
    to: split
  - from: split
    to: slow
  - from: split
    to: fast
  - from: slow
    to: done
  - from: fast
    to: kill
"#;
        let (mut state, _) = start(yaml, Variables::new());
        let fast = task_named(&state, "Fast");
        let fx = state.complete_task(fast.task_id).unwrap();
        assert!(matches!(state.info().state, ProcessState::Completed { .. }));
        assert!(active(&state).is_empty());
        assert!(fx
            .task_events
            .iter()
            .any(|e| matches!(e, TaskEvent::Deleted { task, .. } if task.name == "Slow")));
        assert_eq!(state.tree().len(), 1);
    }

    #[test]
    fn test_cycle_hits_step_limit() {
        let yaml = r#"
key: loop
nodes:
  - kind: Start
    id: start
  - kind: ExclusiveGateway
    id: a
  - kind: ExclusiveGateway
    id: b
  - kind: End
    id: end
flows:
  - from: start
    to: a
  - from: a
    to: b
  - from: b
    to: a
    is_default: true
  - from: b
    to: end
    condition:
      variable: stop
      op: "=="
      value: true
"#;
        let def = Arc::new(definition_from_yaml(yaml).unwrap());
        let config = EngineConfig {
            max_steps: 50,
            ..EngineConfig::default()
        };
        let err = InstanceState::start(def, Variables::new(), &config).unwrap_err();
        assert!(matches!(err, EngineError::StepLimitExceeded { limit: 50, .. }));
    }

    #[test]
    fn test_history_can_be_disabled() {
        let def = Arc::new(definition_from_yaml(XOR).unwrap());
        let config = EngineConfig {
            record_history: false,
            ..EngineConfig::default()
        };
        let (state, _) = InstanceState::start(def, Variables::new(), &config).unwrap();
        assert!(state.history().is_empty());
    }
}
