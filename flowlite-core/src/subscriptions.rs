//! Per-instance event subscription registry.
//!
//! Subscriptions are kept in registration order so dispatch is deterministic.
//! Dispatch consumes what it matches; re-arming is the caller's business.

use std::collections::BTreeSet;

use crate::types::{
    EventSubscription, ExecutionId, SubscriptionId, SubscriptionKind, SubscriptionScope,
};

/// Where a signal dispatch comes from, relative to the instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reach {
    /// API call or a throw in another instance: global subscriptions only.
    Remote,
    /// Throw inside this instance: every subscription of that name.
    Local,
}

#[derive(Clone, Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<EventSubscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscription: EventSubscription) {
        self.subscriptions.push(subscription);
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventSubscription> {
        self.subscriptions.iter()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn owned_by(&self, execution: ExecutionId) -> impl Iterator<Item = &EventSubscription> {
        self.subscriptions
            .iter()
            .filter(move |s| s.execution_id == execution)
    }

    /// Consume every signal subscription named `name` visible to `reach`.
    pub fn dispatch_signal(&mut self, name: &str, reach: Reach) -> Vec<EventSubscription> {
        self.take_where(|s| {
            s.kind == SubscriptionKind::Signal
                && s.event_name == name
                && (reach == Reach::Local || s.scope == SubscriptionScope::Global)
        })
    }

    /// Point-to-point: only subscriptions owned by `execution`.
    pub fn dispatch_message(&mut self, name: &str, execution: ExecutionId) -> Vec<EventSubscription> {
        self.take_where(|s| {
            s.kind == SubscriptionKind::Message
                && s.event_name == name
                && s.execution_id == execution
        })
    }

    /// Conditional guard subscriptions, registration order. Not consumed.
    pub fn conditionals(&self) -> impl Iterator<Item = &EventSubscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.kind == SubscriptionKind::ConditionalGuard)
    }

    pub fn consume(&mut self, id: SubscriptionId) -> Option<EventSubscription> {
        let pos = self
            .subscriptions
            .iter()
            .position(|s| s.subscription_id == id)?;
        Some(self.subscriptions.remove(pos))
    }

    /// Drop everything owned by `execution`.
    pub fn release_owned_by(&mut self, execution: ExecutionId) -> Vec<EventSubscription> {
        self.take_where(|s| s.execution_id == execution)
    }

    pub fn clear(&mut self) -> Vec<EventSubscription> {
        std::mem::take(&mut self.subscriptions)
    }

    /// Names of global signal subscriptions, for cross-instance routing.
    pub fn global_signal_names(&self) -> BTreeSet<String> {
        self.subscriptions
            .iter()
            .filter(|s| {
                s.kind == SubscriptionKind::Signal && s.scope == SubscriptionScope::Global
            })
            .map(|s| s.event_name.clone())
            .collect()
    }

    fn take_where(&mut self, pred: impl Fn(&EventSubscription) -> bool) -> Vec<EventSubscription> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subscriptions)
            .into_iter()
            .partition(|s| pred(s));
        self.subscriptions = kept;
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompareOp, Guard};
    use crate::types::SubscriptionTrigger;
    use serde_json::json;
    use uuid::Uuid;

    fn sub(
        owner: ExecutionId,
        kind: SubscriptionKind,
        name: &str,
        scope: SubscriptionScope,
    ) -> EventSubscription {
        EventSubscription {
            subscription_id: Uuid::now_v7(),
            instance_id: owner,
            execution_id: owner,
            kind,
            event_name: name.to_string(),
            scope,
            node_id: format!("catch_{name}"),
            trigger: SubscriptionTrigger::Catch,
            condition: None,
        }
    }

    #[test]
    fn test_remote_signal_skips_local_scope() {
        let owner = Uuid::now_v7();
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(sub(owner, SubscriptionKind::Signal, "go", SubscriptionScope::Global));
        reg.subscribe(sub(
            owner,
            SubscriptionKind::Signal,
            "go",
            SubscriptionScope::ExecutionLocal,
        ));

        let matched = reg.dispatch_signal("go", Reach::Remote);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].scope, SubscriptionScope::Global);

        // Consumed: a second remote dispatch finds nothing.
        assert!(reg.dispatch_signal("go", Reach::Remote).is_empty());

        let matched = reg.dispatch_signal("go", Reach::Local);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].scope, SubscriptionScope::ExecutionLocal);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_message_requires_owner() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(sub(a, SubscriptionKind::Message, "order", SubscriptionScope::ExecutionLocal));

        assert!(reg.dispatch_message("order", b).is_empty());
        assert!(reg.dispatch_message("other", a).is_empty());
        assert_eq!(reg.dispatch_message("order", a).len(), 1);
    }

    #[test]
    fn test_dispatch_keeps_registration_order() {
        let owners: Vec<_> = (0..3).map(|_| Uuid::now_v7()).collect();
        let mut reg = SubscriptionRegistry::new();
        for owner in &owners {
            reg.subscribe(sub(*owner, SubscriptionKind::Signal, "go", SubscriptionScope::Global));
        }
        let matched: Vec<_> = reg
            .dispatch_signal("go", Reach::Local)
            .into_iter()
            .map(|s| s.execution_id)
            .collect();
        assert_eq!(matched, owners);
    }

    #[test]
    fn test_conditionals_are_not_dispatched_by_signal() {
        let owner = Uuid::now_v7();
        let mut reg = SubscriptionRegistry::new();
        let mut cond = sub(
            owner,
            SubscriptionKind::ConditionalGuard,
            "boundary",
            SubscriptionScope::ExecutionLocal,
        );
        cond.condition = Some(Guard::compare("condition", CompareOp::Eq, json!(true)));
        let id = cond.subscription_id;
        reg.subscribe(cond);

        assert!(reg.dispatch_signal("boundary", Reach::Local).is_empty());
        assert_eq!(reg.conditionals().count(), 1);
        assert!(reg.consume(id).is_some());
        assert!(reg.consume(id).is_none());
    }

    #[test]
    fn test_release_and_global_names() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let mut reg = SubscriptionRegistry::new();
        reg.subscribe(sub(a, SubscriptionKind::Signal, "x", SubscriptionScope::Global));
        reg.subscribe(sub(a, SubscriptionKind::Signal, "y", SubscriptionScope::ExecutionLocal));
        reg.subscribe(sub(b, SubscriptionKind::Signal, "z", SubscriptionScope::Global));

        assert_eq!(
            reg.global_signal_names().into_iter().collect::<Vec<_>>(),
            vec!["x".to_string(), "z".to_string()]
        );
        assert_eq!(reg.release_owned_by(a).len(), 2);
        assert_eq!(reg.owned_by(b).count(), 1);
        assert_eq!(reg.clear().len(), 1);
    }
}
