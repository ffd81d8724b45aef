// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Auto-invalidate plugin
//!
//! Maps mutation names to the query key prefixes they affect. When a mapped
//! mutation succeeds, each prefix is invalidated before the mutation call
//! returns to its caller.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Plugin;
use crate::client::{InvalidateOptions, QueryClient};
use crate::hooks::{HookEvent, HookOutcome, HookPoint, HookRegistrar};
use crate::key::Key;

pub type KeyDeriver = Arc<dyn Fn(&Value, &Value) -> Vec<Key> + Send + Sync>;

/// Keys affected by one mutation
#[derive(Clone)]
pub enum InvalidationRule {
    Static(Vec<Key>),
    /// Computed from `(variables, result)`
    Derived(KeyDeriver),
}

impl InvalidationRule {
    pub fn keys(&self, variables: &Value, data: &Value) -> Vec<Key> {
        match self {
            InvalidationRule::Static(keys) => keys.clone(),
            InvalidationRule::Derived(derive) => derive(variables, data),
        }
    }
}

impl fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationRule::Static(keys) => f.debug_tuple("Static").field(keys).finish(),
            InvalidationRule::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AutoInvalidatePlugin {
    rules: HashMap<String, Vec<InvalidationRule>>,
    options: InvalidateOptions,
}

impl AutoInvalidatePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate fixed prefixes when `mutation` succeeds
    pub fn on_mutation<I>(mut self, mutation: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = Key>,
    {
        self.rules
            .entry(mutation.to_string())
            .or_default()
            .push(InvalidationRule::Static(keys.into_iter().collect()));
        self
    }

    /// Invalidate prefixes computed from the mutation's variables and result
    pub fn on_mutation_with<F>(mut self, mutation: &str, derive: F) -> Self
    where
        F: Fn(&Value, &Value) -> Vec<Key> + Send + Sync + 'static,
    {
        self.rules
            .entry(mutation.to_string())
            .or_default()
            .push(InvalidationRule::Derived(Arc::new(derive)));
        self
    }

    pub fn with_options(mut self, options: InvalidateOptions) -> Self {
        self.options = options;
        self
    }

    /// Prefixes to invalidate for one successful run
    pub fn keys_for(&self, mutation: &str, variables: &Value, data: &Value) -> Vec<Key> {
        self.rules
            .get(mutation)
            .map(|rules| {
                rules
                    .iter()
                    .flat_map(|rule| rule.keys(variables, data))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn handle(&self, client: &QueryClient, event: &HookEvent) -> HookOutcome {
        let HookEvent::MutationSuccess {
            mutation,
            variables,
            data,
        } = event
        else {
            return Ok(());
        };

        let mut failures = Vec::new();
        for key in self.keys_for(&mutation.name, variables, data) {
            match client.invalidate(&key, self.options) {
                Ok(result) => log::debug!(
                    "Mutation '{}' invalidated {} ({} matched, {} refetched)",
                    mutation.name,
                    key,
                    result.matched,
                    result.refetched
                ),
                Err(err) => failures.push(err.to_string()),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; ").into())
        }
    }
}

impl Plugin for AutoInvalidatePlugin {
    fn name(&self) -> &str {
        "auto-invalidate"
    }

    fn register(&self, hooks: &mut HookRegistrar<'_>) {
        let plugin = self.clone();
        hooks.on(HookPoint::OnMutationSuccess, move |client, event| {
            plugin.handle(client, event)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;
    use serde_json::json;

    #[test]
    fn test_keys_for_combines_rules() {
        let plugin = AutoInvalidatePlugin::new()
            .on_mutation("add-comment", [key!["comments"]])
            .on_mutation_with("add-comment", |variables, _data| {
                vec![key!["documents", variables["document"].as_i64().unwrap_or(0)]]
            });

        let keys = plugin.keys_for("add-comment", &json!({"document": 4}), &json!(null));
        assert_eq!(keys, vec![key!["comments"], key!["documents", 4]]);
        assert!(plugin.keys_for("unknown", &json!(null), &json!(null)).is_empty());
    }

    #[test]
    fn test_empty_prefix_reports_failure() {
        let plugin = AutoInvalidatePlugin::new().on_mutation("bad", [Key::new()]);
        let client = QueryClient::new();
        let event = HookEvent::MutationSuccess {
            mutation: crate::mutation::MutationInfo {
                id: uuid::Uuid::new_v4(),
                name: "bad".to_string(),
            },
            variables: json!(null),
            data: json!(null),
        };
        assert!(plugin.handle(&client, &event).is_err());
    }
}
