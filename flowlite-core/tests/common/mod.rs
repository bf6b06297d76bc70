//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use flowlite_core::{Engine, EngineConfig, InstanceId, Task, TaskQuery, Variables};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory engine with the given definitions deployed.
pub async fn engine_with(definitions: &[&str]) -> Engine {
    init_tracing();
    let engine = Engine::in_memory(EngineConfig::default());
    for yaml in definitions {
        engine.deploy_yaml(yaml).await.unwrap();
    }
    engine
}

pub async fn start(engine: &Engine, key: &str) -> InstanceId {
    engine
        .start(key, Variables::new())
        .await
        .unwrap()
        .instance_id
}

pub async fn active_tasks(engine: &Engine) -> Vec<Task> {
    engine.tasks(&TaskQuery::new().active()).await.unwrap()
}

pub async fn active_in(engine: &Engine, instance_id: InstanceId) -> Vec<Task> {
    engine
        .tasks(&TaskQuery::new().instance(instance_id).active())
        .await
        .unwrap()
}

/// Active task counts by name.
pub async fn task_counts(engine: &Engine) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for task in active_tasks(engine).await {
        *counts.entry(task.name).or_insert(0) += 1;
    }
    counts
}

/// The single active task called `name` in `instance_id`.
pub async fn task_named(engine: &Engine, instance_id: InstanceId, name: &str) -> Task {
    let mut found = engine
        .tasks(&TaskQuery::new().instance(instance_id).name(name).active())
        .await
        .unwrap();
    assert_eq!(found.len(), 1, "expected one active '{name}' task");
    found.remove(0)
}

pub async fn complete_named(engine: &Engine, instance_id: InstanceId, name: &str) {
    let task = task_named(engine, instance_id, name).await;
    engine.complete_task(task.task_id).await.unwrap();
}
