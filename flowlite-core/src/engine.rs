//! Execution engine: public API over the live-instance catalog.
//!
//! Lock domains:
//! - one `tokio::sync::Mutex` per instance; every mutation of an instance runs
//!   on a clone under that lock and is swapped in only on success.
//! - a catalog `RwLock` mapping instance, execution, task and global signal
//!   names to instances. It is never held while waiting for an instance lock.
//!
//! Global signals thrown inside an instance reach other instances only after
//! the throwing instance has committed, one instance lock at a time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::authoring::definition_from_yaml;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::RuntimeEvent;
use crate::inbox::{MemoryTaskInbox, TaskEvent, TaskInbox, TaskQuery};
use crate::instance::{Effects, InstanceState};
use crate::model::ProcessDefinition;
use crate::store::{DefinitionStore, MemoryDefinitionStore};
use crate::subscriptions::Reach;
use crate::types::*;

type InstanceHandle = Arc<Mutex<InstanceState>>;

// ── Execution query ──

/// Execution filter. Unset fields match everything.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionQuery {
    pub instance_id: Option<InstanceId>,
    pub definition_key: Option<String>,
    pub signal_subscription: Option<String>,
    pub message_subscription: Option<String>,
}

impl ExecutionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn definition_key(mut self, key: &str) -> Self {
        self.definition_key = Some(key.to_string());
        self
    }

    /// Executions owning a signal subscription with this name.
    pub fn signal_subscription_name(mut self, name: &str) -> Self {
        self.signal_subscription = Some(name.to_string());
        self
    }

    /// Executions owning a message subscription with this name.
    pub fn message_subscription_name(mut self, name: &str) -> Self {
        self.message_subscription = Some(name.to_string());
        self
    }
}

/// Read-only projection of a live execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub execution_id: ExecutionId,
    pub instance_id: InstanceId,
    pub parent_id: Option<ExecutionId>,
    pub current_node: Option<NodeId>,
    pub is_concurrent: bool,
    pub state: ExecutionState,
    pub definition_key: String,
    pub signal_subscriptions: Vec<String>,
    pub message_subscriptions: Vec<String>,
}

// ── Catalog ──

/// What an instance contributed to the catalog indexes.
#[derive(Default)]
struct Footprint {
    executions: Vec<ExecutionId>,
    tasks: Vec<TaskId>,
    signals: BTreeSet<String>,
}

#[derive(Default)]
struct Catalog {
    instances: HashMap<InstanceId, InstanceHandle>,
    executions: HashMap<ExecutionId, InstanceId>,
    tasks: HashMap<TaskId, InstanceId>,
    /// Global signal name to instances holding such a subscription.
    signals: HashMap<String, BTreeSet<InstanceId>>,
    footprints: HashMap<InstanceId, Footprint>,
    /// Tasks cancelled by `delete_process_instance`.
    deleted_tasks: HashSet<TaskId>,
}

impl Catalog {
    fn index(&mut self, state: &InstanceState) {
        let id = state.info().instance_id;
        self.unindex(id);
        let footprint = Footprint {
            executions: state.tree().iter().map(|e| e.execution_id).collect(),
            tasks: state.tasks().iter().map(|t| t.task_id).collect(),
            signals: state.subscriptions().global_signal_names(),
        };
        for execution in &footprint.executions {
            self.executions.insert(*execution, id);
        }
        for task in &footprint.tasks {
            self.tasks.insert(*task, id);
        }
        for signal in &footprint.signals {
            self.signals.entry(signal.clone()).or_default().insert(id);
        }
        self.footprints.insert(id, footprint);
    }

    fn unindex(&mut self, id: InstanceId) {
        let Some(footprint) = self.footprints.remove(&id) else {
            return;
        };
        for execution in footprint.executions {
            self.executions.remove(&execution);
        }
        for task in footprint.tasks {
            self.tasks.remove(&task);
        }
        for signal in footprint.signals {
            if let Some(set) = self.signals.get_mut(&signal) {
                set.remove(&id);
                if set.is_empty() {
                    self.signals.remove(&signal);
                }
            }
        }
    }

    fn remove(&mut self, id: InstanceId) {
        self.unindex(id);
        self.instances.remove(&id);
    }
}

// ── Engine ──

pub struct Engine {
    config: EngineConfig,
    definitions: Arc<dyn DefinitionStore>,
    inbox: Arc<dyn TaskInbox>,
    catalog: RwLock<Catalog>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        definitions: Arc<dyn DefinitionStore>,
        inbox: Arc<dyn TaskInbox>,
    ) -> Self {
        Self {
            config,
            definitions,
            inbox,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    /// Engine over the in-memory store and inbox.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryDefinitionStore::new()),
            Arc::new(MemoryTaskInbox::new()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Deployment ──

    pub async fn deploy(&self, definition: ProcessDefinition) -> Result<Arc<ProcessDefinition>> {
        let stored = self.definitions.deploy(definition).await?;
        info!(
            key = %stored.key,
            version = stored.version,
            "Process definition deployed"
        );
        Ok(stored)
    }

    pub async fn deploy_yaml(&self, yaml: &str) -> Result<Arc<ProcessDefinition>> {
        self.deploy(definition_from_yaml(yaml)?).await
    }

    // ── Commands ──

    /// Start an instance of the latest version of `key` and run it to its
    /// first wait states.
    pub async fn start(&self, key: &str, variables: Variables) -> Result<ProcessInstance> {
        let definition = self
            .definitions
            .load(key)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound {
                key: key.to_string(),
            })?;

        let (state, fx) = InstanceState::start(definition, variables, &self.config)?;
        let snapshot = state.info().clone();
        info!(
            instance_id = %snapshot.instance_id,
            key = %snapshot.definition_key,
            version = snapshot.definition_version,
            "Process instance started"
        );

        self.inbox.apply(&fx.task_events).await?;
        if state.is_terminal() {
            info!(
                instance_id = %snapshot.instance_id,
                state = ?snapshot.state,
                "Process instance finished"
            );
        } else {
            let mut catalog = self.catalog.write().await;
            catalog.index(&state);
            catalog
                .instances
                .insert(snapshot.instance_id, Arc::new(Mutex::new(state)));
        }

        self.propagate(snapshot.instance_id, fx.global_signals).await?;
        Ok(snapshot)
    }

    /// Complete a task and route its execution onward.
    ///
    /// Completing a task that `delete_process_instance` cancelled is a no-op,
    /// so a completion that loses a race with the delete succeeds. Any other
    /// task of a finished instance is `TaskAlreadyCompleted`.
    pub async fn complete_task(&self, task_id: TaskId) -> Result<()> {
        let instance = self.catalog.read().await.tasks.get(&task_id).copied();
        let live = match instance {
            Some(instance) => self.handle(instance).await.map(|h| (instance, h)),
            None => None,
        };
        let Some((instance, handle)) = live else {
            if self.inbox.get(task_id).await?.is_none() {
                return Err(EngineError::TaskNotFound { task: task_id });
            }
            if self.catalog.read().await.deleted_tasks.contains(&task_id) {
                debug!(task_id = %task_id, "Task was cancelled by instance deletion");
                return Ok(());
            }
            return Err(EngineError::TaskAlreadyCompleted { task: task_id });
        };

        if let Some(((), thrown)) = self
            .transact(handle, |s| s.complete_task(task_id).map(|fx| ((), fx)))
            .await?
        {
            debug!(task_id = %task_id, instance_id = %instance, "Task completed");
            self.propagate(instance, thrown).await?;
        }
        Ok(())
    }

    /// Deliver a signal from outside the engine.
    ///
    /// Without `execution` it is a broadcast to the global subscriptions of
    /// every live instance. With `execution` it is narrowed to the global
    /// subscriptions of that execution's instance and fails with
    /// `NoSuchSubscription` if none match. Process-scoped subscriptions are
    /// never reachable from here.
    pub async fn signal_event_received(
        &self,
        name: &str,
        execution: Option<ExecutionId>,
    ) -> Result<usize> {
        if let Some(execution) = execution {
            let instance = self.instance_of(execution).await?;
            let handle = self
                .handle(instance)
                .await
                .ok_or(EngineError::ExecutionNotFound { execution })?;
            let outcome = self
                .transact(handle, |s| {
                    let (fired, fx) = s.signal(name, Reach::Remote)?;
                    if fired == 0 {
                        return Err(EngineError::NoSuchSubscription {
                            kind: SubscriptionKind::Signal,
                            name: name.to_string(),
                            execution,
                        });
                    }
                    Ok((fired, fx))
                })
                .await?;
            let Some((fired, thrown)) = outcome else {
                return Ok(0);
            };
            info!(signal = name, instance_id = %instance, fired, "Signal delivered");
            self.propagate(instance, thrown).await?;
            return Ok(fired);
        }

        let mut total = 0;
        for target in self.signal_targets(name).await {
            let Some(handle) = self.handle(target).await else {
                continue;
            };
            if let Some((fired, thrown)) = self
                .transact(handle, |s| s.signal(name, Reach::Remote))
                .await?
            {
                total += fired;
                self.propagate(target, thrown).await?;
            }
        }
        info!(signal = name, fired = total, "Signal broadcast");
        Ok(total)
    }

    /// Point-to-point message to a subscription owned by `execution`.
    pub async fn message_event_received(
        &self,
        name: &str,
        execution: ExecutionId,
    ) -> Result<()> {
        let instance = self.instance_of(execution).await?;
        let handle = self
            .handle(instance)
            .await
            .ok_or(EngineError::ExecutionNotFound { execution })?;
        if let Some(((), thrown)) = self
            .transact(handle, |s| s.message(name, execution).map(|fx| ((), fx)))
            .await?
        {
            info!(message = name, execution_id = %execution, "Message delivered");
            self.propagate(instance, thrown).await?;
        }
        Ok(())
    }

    /// Merge `variables` into `execution`'s scope and fire every conditional
    /// subscription reachable from it whose guard now holds. The only way a
    /// conditional guard is ever evaluated.
    pub async fn evaluate_conditional_events(
        &self,
        execution: ExecutionId,
        variables: Variables,
    ) -> Result<usize> {
        let instance = self.instance_of(execution).await?;
        let handle = self
            .handle(instance)
            .await
            .ok_or(EngineError::ExecutionNotFound { execution })?;
        let Some((fired, thrown)) = self
            .transact(handle, |s| s.evaluate_conditions(execution, variables))
            .await?
        else {
            return Ok(0);
        };
        debug!(execution_id = %execution, fired, "Conditional events evaluated");
        self.propagate(instance, thrown).await?;
        Ok(fired)
    }

    /// Terminate an instance. Unknown or already finished ids are a no-op.
    pub async fn delete_process_instance(
        &self,
        instance_id: InstanceId,
        reason: &str,
    ) -> Result<()> {
        let Some(handle) = self.handle(instance_id).await else {
            debug!(instance_id = %instance_id, "Delete of unknown instance ignored");
            return Ok(());
        };
        self.transact(handle, |s| Ok(((), s.terminate(reason))))
            .await?;
        info!(instance_id = %instance_id, reason, "Process instance deleted");
        Ok(())
    }

    /// Write a variable into `execution`'s own scope.
    pub async fn set_variable(
        &self,
        execution: ExecutionId,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let instance = self.instance_of(execution).await?;
        let handle = self
            .handle(instance)
            .await
            .ok_or(EngineError::ExecutionNotFound { execution })?;
        self.transact(handle, |s| {
            s.set_variable(execution, name, value)?;
            Ok(((), Effects::default()))
        })
        .await?;
        Ok(())
    }

    // ── Queries ──

    /// Variables visible from `execution`.
    pub async fn variables(&self, execution: ExecutionId) -> Result<Variables> {
        let instance = self.instance_of(execution).await?;
        let handle = self
            .handle(instance)
            .await
            .ok_or(EngineError::ExecutionNotFound { execution })?;
        let state = handle.lock().await;
        state.variables(execution)
    }

    /// Live instances, oldest first, optionally for one definition key.
    pub async fn process_instances(&self, key: Option<&str>) -> Vec<ProcessInstance> {
        let mut out = Vec::new();
        for handle in self.handles().await {
            let state = handle.lock().await;
            let info = state.info();
            if !state.is_terminal() && key.is_none_or(|k| info.definition_key == k) {
                out.push(info.clone());
            }
        }
        out.sort_by_key(|i| (i.created_at, i.instance_id));
        out
    }

    pub async fn process_instance(&self, instance_id: InstanceId) -> Result<ProcessInstance> {
        let handle = self
            .handle(instance_id)
            .await
            .ok_or(EngineError::InstanceNotFound {
                instance: instance_id,
            })?;
        let state = handle.lock().await;
        Ok(state.info().clone())
    }

    pub async fn executions(&self, query: &ExecutionQuery) -> Vec<ExecutionInfo> {
        let handles = match query.instance_id {
            Some(id) => self.handle(id).await.into_iter().collect(),
            None => self.handles().await,
        };

        let mut found: Vec<(ProcessInstance, Vec<ExecutionInfo>)> = Vec::new();
        for handle in handles {
            let state = handle.lock().await;
            let info = state.info();
            if state.is_terminal()
                || query
                    .definition_key
                    .as_ref()
                    .is_some_and(|k| &info.definition_key != k)
            {
                continue;
            }
            let executions = state
                .tree()
                .iter()
                .map(|e| execution_info(&state, e))
                .filter(|e| {
                    query
                        .signal_subscription
                        .as_ref()
                        .is_none_or(|n| e.signal_subscriptions.contains(n))
                        && query
                            .message_subscription
                            .as_ref()
                            .is_none_or(|n| e.message_subscriptions.contains(n))
                })
                .collect();
            found.push((info.clone(), executions));
        }
        found.sort_by_key(|(i, _)| (i.created_at, i.instance_id));
        found.into_iter().flat_map(|(_, e)| e).collect()
    }

    pub async fn tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        Ok(self.inbox.list(query).await?)
    }

    /// Audit trail of a live instance.
    pub async fn history(&self, instance_id: InstanceId) -> Result<Vec<RuntimeEvent>> {
        let handle = self
            .handle(instance_id)
            .await
            .ok_or(EngineError::InstanceNotFound {
                instance: instance_id,
            })?;
        let state = handle.lock().await;
        Ok(state.history().to_vec())
    }

    // ── Internals ──

    async fn handle(&self, instance_id: InstanceId) -> Option<InstanceHandle> {
        self.catalog
            .read()
            .await
            .instances
            .get(&instance_id)
            .cloned()
    }

    async fn handles(&self) -> Vec<InstanceHandle> {
        self.catalog
            .read()
            .await
            .instances
            .values()
            .cloned()
            .collect()
    }

    async fn instance_of(&self, execution: ExecutionId) -> Result<InstanceId> {
        self.catalog
            .read()
            .await
            .executions
            .get(&execution)
            .copied()
            .ok_or(EngineError::ExecutionNotFound { execution })
    }

    async fn signal_targets(&self, name: &str) -> Vec<InstanceId> {
        self.catalog
            .read()
            .await
            .signals
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Run `op` on a clone of the instance and commit it on success.
    ///
    /// Returns `None` when the instance already finished (a racing delete or
    /// completion won). Task events are published and catalog indexes updated
    /// before the instance lock is released; finished instances leave the
    /// catalog. The global signals the operation threw are handed back for
    /// propagation.
    async fn transact<T, F>(
        &self,
        handle: InstanceHandle,
        op: F,
    ) -> Result<Option<(T, Vec<String>)>>
    where
        F: FnOnce(&mut InstanceState) -> Result<(T, Effects)>,
    {
        let mut guard = handle.lock().await;
        if guard.is_terminal() {
            return Ok(None);
        }

        let mut draft = guard.clone();
        let (value, fx) = op(&mut draft)?;
        *guard = draft;

        self.inbox.apply(&fx.task_events).await?;
        let instance_id = guard.info().instance_id;
        {
            let mut catalog = self.catalog.write().await;
            if guard.is_terminal() {
                catalog.remove(instance_id);
                if matches!(guard.info().state, ProcessState::Terminated { .. }) {
                    catalog
                        .deleted_tasks
                        .extend(fx.task_events.iter().filter_map(|e| match e {
                            TaskEvent::Deleted { task, .. } => Some(task.task_id),
                            _ => None,
                        }));
                }
            } else {
                catalog.index(&guard);
            }
        }
        if guard.is_terminal() {
            info!(
                instance_id = %instance_id,
                state = ?guard.info().state,
                "Process instance finished"
            );
        }
        Ok(Some((value, fx.global_signals)))
    }

    /// Deliver global signals thrown in `origin` to every other live instance
    /// holding a global subscription of that name. Each delivery may throw
    /// again; waves are bounded by `max_signal_rounds`.
    ///
    /// A failed delivery rolls back only its target instance. Remaining
    /// deliveries still run, and the first failure is returned once the waves
    /// settle. Running out of rounds fails with `SignalRoundsExceeded`.
    async fn propagate(&self, origin: InstanceId, signals: Vec<String>) -> Result<()> {
        let mut wave: Vec<(InstanceId, String)> =
            signals.into_iter().map(|s| (origin, s)).collect();
        let mut rounds = 0;
        let mut first_error: Option<EngineError> = None;

        while !wave.is_empty() {
            if rounds == self.config.max_signal_rounds {
                let signal = wave[0].1.clone();
                warn!(
                    signal = %signal,
                    pending = wave.len(),
                    limit = self.config.max_signal_rounds,
                    "Global signal deliveries left after round limit"
                );
                return Err(first_error.unwrap_or(EngineError::SignalRoundsExceeded {
                    signal,
                    limit: self.config.max_signal_rounds,
                }));
            }
            rounds += 1;

            let mut next = Vec::new();
            for (from, signal) in wave {
                for target in self.signal_targets(&signal).await {
                    if target == from {
                        continue;
                    }
                    let Some(handle) = self.handle(target).await else {
                        continue;
                    };
                    match self
                        .transact(handle, |s| s.signal(&signal, Reach::Remote))
                        .await
                    {
                        Ok(Some((fired, thrown))) => {
                            debug!(
                                signal = %signal,
                                from = %from,
                                instance_id = %target,
                                fired,
                                "Global signal propagated"
                            );
                            next.extend(thrown.into_iter().map(|s| (target, s)));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                signal = %signal,
                                instance_id = %target,
                                error = %e,
                                "Global signal delivery failed"
                            );
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            wave = next;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn execution_info(state: &InstanceState, execution: &Execution) -> ExecutionInfo {
    let names = |kind: SubscriptionKind| -> Vec<String> {
        state
            .subscriptions()
            .owned_by(execution.execution_id)
            .filter(|s| s.kind == kind)
            .map(|s| s.event_name.clone())
            .collect()
    };
    ExecutionInfo {
        execution_id: execution.execution_id,
        instance_id: execution.instance_id,
        parent_id: execution.parent_id,
        current_node: execution.current_node.clone(),
        is_concurrent: execution.is_concurrent,
        state: execution.state,
        definition_key: state.info().definition_key.clone(),
        signal_subscriptions: names(SubscriptionKind::Signal),
        message_subscriptions: names(SubscriptionKind::Message),
    }
}
