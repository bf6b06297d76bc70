//! Conditional guards fire only when explicitly evaluated.

mod common;

use common::*;
use flowlite_core::{TaskQuery, Variables};
use serde_json::json;

const CONDITIONAL: &str = include_str!("fixtures/conditional.yaml");
const CONDITIONAL_INTERRUPTING: &str = include_str!("fixtures/conditional_interrupting.yaml");
const CONDITIONAL_CATCH: &str = include_str!("fixtures/conditional_catch.yaml");

fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_non_interrupting_boundary_needs_evaluation() {
    let engine = engine_with(&[CONDITIONAL]).await;
    let instance = engine
        .start("conditional", vars(&[("condition", json!(true))]))
        .await
        .unwrap()
        .instance_id;

    // The guard already holds, but nothing evaluates it on entry.
    let open = active_tasks(&engine).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].name, "Step 1");

    let current = engine.variables(instance).await.unwrap();
    let fired = engine
        .evaluate_conditional_events(instance, current)
        .await
        .unwrap();
    assert_eq!(fired, 1);

    let mut names: Vec<String> = active_tasks(&engine)
        .await
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Step 1", "Step 2"]);

    // Fired boundaries are consumed.
    let fired = engine
        .evaluate_conditional_events(instance, Variables::new())
        .await
        .unwrap();
    assert_eq!(fired, 0);

    complete_named(&engine, instance, "Step 2").await;
    complete_named(&engine, instance, "Step 1").await;
    assert!(engine.process_instances(None).await.is_empty());
}

#[tokio::test]
async fn test_false_guard_fires_nothing() {
    let engine = engine_with(&[CONDITIONAL]).await;
    let instance = start(&engine, "conditional").await;

    let fired = engine
        .evaluate_conditional_events(instance, vars(&[("condition", json!(false))]))
        .await
        .unwrap();
    assert_eq!(fired, 0);
    assert_eq!(active_tasks(&engine).await.len(), 1);

    // Evaluated variables are written into the scope.
    let seen = engine.variables(instance).await.unwrap();
    assert_eq!(seen["condition"], json!(false));
}

#[tokio::test]
async fn test_interrupting_boundary_cancels_host() {
    let engine = engine_with(&[CONDITIONAL_INTERRUPTING]).await;
    let instance = start(&engine, "conditionalInterrupting").await;
    let step_1 = task_named(&engine, instance, "Step 1").await;

    let fired = engine
        .evaluate_conditional_events(
            instance,
            vars(&[("overdue", json!(true)), ("days", json!(2))]),
        )
        .await
        .unwrap();
    assert_eq!(fired, 0);

    let fired = engine
        .evaluate_conditional_events(step_1.execution_id, vars(&[("days", json!(5))]))
        .await
        .unwrap();
    assert_eq!(fired, 1);

    let open = active_tasks(&engine).await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].name, "Escalation");
    // The token moved on; it did not fork.
    assert_eq!(open[0].execution_id, step_1.execution_id);

    let cancelled = engine
        .tasks(&TaskQuery::new().name("Step 1"))
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert!(!cancelled[0].active);

    complete_named(&engine, instance, "Escalation").await;
    assert!(engine.process_instances(None).await.is_empty());
}

#[tokio::test]
async fn test_conditional_catch_and_start() {
    let engine = engine_with(&[CONDITIONAL_CATCH]).await;
    let instance = start(&engine, "conditionalCatch").await;

    let prepare = task_named(&engine, instance, "Prepare").await;
    engine.complete_task(prepare.task_id).await.unwrap();
    assert!(active_tasks(&engine).await.is_empty());

    let main = prepare.execution_id;
    let fired = engine
        .evaluate_conditional_events(main, vars(&[("ready", json!(false))]))
        .await
        .unwrap();
    assert_eq!(fired, 0);

    let fired = engine
        .evaluate_conditional_events(main, vars(&[("ready", json!(true))]))
        .await
        .unwrap();
    assert_eq!(fired, 1);
    task_named(&engine, instance, "Go").await;

    let fired = engine
        .evaluate_conditional_events(instance, vars(&[("alarm", json!(true))]))
        .await
        .unwrap();
    assert_eq!(fired, 1);
    assert_eq!(task_counts(&engine).await["Alarm"], 1);

    // Conditional starts re-arm and fire on every evaluation that holds.
    engine
        .evaluate_conditional_events(instance, Variables::new())
        .await
        .unwrap();
    assert_eq!(task_counts(&engine).await["Alarm"], 2);
}
