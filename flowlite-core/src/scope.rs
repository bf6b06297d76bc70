//! Hierarchical variable scopes, one per execution.
//!
//! Reads walk a lineage (the execution first, then its ancestors up to the
//! instance root) so a child shadows its parent. Writes are always local. At a
//! join the children's local writes are folded into the parent in arrival
//! order and the child scopes are dropped.

use std::collections::HashMap;

use crate::model::VariableLookup;
use crate::types::{ExecutionId, Variables};

#[derive(Clone, Debug, Default)]
pub struct VariableScopeStore {
    scopes: HashMap<ExecutionId, Variables>,
}

impl VariableScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// First hit along `lineage` (nearest scope first).
    pub fn get(&self, lineage: &[ExecutionId], name: &str) -> Option<&serde_json::Value> {
        lineage
            .iter()
            .find_map(|id| self.scopes.get(id).and_then(|vars| vars.get(name)))
    }

    /// Create-or-overwrite in the execution's own scope.
    pub fn set(&mut self, execution: ExecutionId, name: &str, value: serde_json::Value) {
        self.scopes
            .entry(execution)
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn set_all(&mut self, execution: ExecutionId, vars: Variables) {
        if vars.is_empty() {
            return;
        }
        self.scopes.entry(execution).or_default().extend(vars);
    }

    pub fn local(&self, execution: ExecutionId) -> Option<&Variables> {
        self.scopes.get(&execution)
    }

    /// Flattened view along `lineage`, nearer scopes winning.
    pub fn visible(&self, lineage: &[ExecutionId]) -> Variables {
        let mut out = Variables::new();
        for id in lineage.iter().rev() {
            if let Some(vars) = self.scopes.get(id) {
                out.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        out
    }

    /// Apply each child's local writes to `into` in the given order, then
    /// discard the child scopes. Last writer wins.
    pub fn merge(&mut self, children: &[ExecutionId], into: ExecutionId) {
        for child in children {
            if let Some(vars) = self.scopes.remove(child) {
                self.set_all(into, vars);
            }
        }
    }

    pub fn discard(&mut self, execution: ExecutionId) {
        self.scopes.remove(&execution);
    }

    /// Borrowing view for guard evaluation.
    pub fn view<'a>(&'a self, lineage: &'a [ExecutionId]) -> ScopedView<'a> {
        ScopedView {
            store: self,
            lineage,
        }
    }
}

/// Lineage-bound read view over a scope store.
pub struct ScopedView<'a> {
    store: &'a VariableScopeStore,
    lineage: &'a [ExecutionId],
}

impl VariableLookup for ScopedView<'_> {
    fn lookup(&self, name: &str) -> Option<serde_json::Value> {
        self.store.get(self.lineage, name).cloned()
    }
}

/// Caller-supplied variables layered over another lookup.
pub struct Overlay<'a> {
    pub top: &'a Variables,
    pub below: &'a dyn VariableLookup,
}

impl VariableLookup for Overlay<'_> {
    fn lookup(&self, name: &str) -> Option<serde_json::Value> {
        self.top
            .get(name)
            .cloned()
            .or_else(|| self.below.lookup(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_child_shadows_parent() {
        let (root, child) = (Uuid::now_v7(), Uuid::now_v7());
        let mut store = VariableScopeStore::new();
        store.set(root, "x", json!(1));
        store.set(root, "y", json!("root"));
        store.set(child, "x", json!(2));

        let lineage = [child, root];
        assert_eq!(store.get(&lineage, "x"), Some(&json!(2)));
        assert_eq!(store.get(&lineage, "y"), Some(&json!("root")));
        assert_eq!(store.get(&[root], "x"), Some(&json!(1)));
        assert_eq!(store.get(&lineage, "missing"), None);

        let visible = store.visible(&lineage);
        assert_eq!(visible["x"], json!(2));
        assert_eq!(visible["y"], json!("root"));
    }

    #[test]
    fn test_merge_last_writer_by_arrival_order() {
        let parent = Uuid::now_v7();
        let (a, b, c) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let mut store = VariableScopeStore::new();
        store.set(parent, "kept", json!("pre-fork"));
        store.set(parent, "shared", json!("pre-fork"));
        store.set(a, "shared", json!("a"));
        store.set(b, "shared", json!("b"));
        store.set(c, "only_c", json!(true));

        store.merge(&[c, a, b], parent);

        let vars = store.local(parent).unwrap();
        assert_eq!(vars["shared"], json!("b"));
        assert_eq!(vars["kept"], json!("pre-fork"));
        assert_eq!(vars["only_c"], json!(true));
        assert!(store.local(a).is_none());
        assert!(store.local(c).is_none());
    }

    #[test]
    fn test_overlay_wins_over_scope() {
        let root = Uuid::now_v7();
        let mut store = VariableScopeStore::new();
        store.set(root, "condition", json!(false));
        store.set(root, "other", json!(7));

        let lineage = [root];
        let view = store.view(&lineage);
        let top = Variables::from([("condition".to_string(), json!(true))]);
        let overlay = Overlay {
            top: &top,
            below: &view,
        };
        assert_eq!(overlay.lookup("condition"), Some(json!(true)));
        assert_eq!(overlay.lookup("other"), Some(json!(7)));
    }
}
