//! Worker-side claim ordering hint.
//!
//! Each rule gets a counter of dependencies this worker does not hold yet.
//! The counter drops as artifacts become local, and rules with the lowest
//! counter are tried first. The snapshot goes stale as other workers make
//! progress; it only orders the non-blocking takes, never correctness.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::RuleSpec;

/// How many preferred candidates are tried before falling back to FIFO.
pub const CANDIDATE_LIMIT: usize = 8;

#[derive(Debug, Default)]
pub struct PriorityIndex {
    pending: HashMap<String, usize>,
    /// dependency -> rules that need it
    dependents: HashMap<String, Vec<String>>,
    /// (pending count, rule name), kept in step with `pending`
    order: BTreeSet<(usize, String)>,
    local: HashSet<String>,
}

impl PriorityIndex {
    /// Build from the published rule table. Phony rules are never dispatched
    /// and are left out; as dependencies they count as the artifacts they
    /// group.
    pub fn new<'a>(rules: impl IntoIterator<Item = (&'a str, &'a RuleSpec)>) -> Self {
        let rules: Vec<(&str, &RuleSpec)> = rules.into_iter().collect();
        let phony: HashMap<&str, &RuleSpec> = rules
            .iter()
            .filter(|(_, spec)| spec.commands.is_empty())
            .map(|(name, spec)| (*name, *spec))
            .collect();

        let mut index = Self::default();
        for (name, spec) in rules {
            if phony.contains_key(name) {
                continue;
            }
            let deps = artifacts(&spec.dependencies, &phony);
            for dep in &deps {
                index
                    .dependents
                    .entry(dep.to_string())
                    .or_default()
                    .push(name.to_string());
            }
            index.pending.insert(name.to_string(), deps.len());
            index.order.insert((deps.len(), name.to_string()));
        }
        index
    }

    /// Record that `artifact` is now held locally.
    pub fn artifact_local(&mut self, artifact: &str) {
        if !self.local.insert(artifact.to_string()) {
            return;
        }
        let Some(dependents) = self.dependents.get(artifact) else {
            return;
        };
        for rule in dependents {
            if let Some(count) = self.pending.get_mut(rule) {
                self.order.remove(&(*count, rule.clone()));
                *count = count.saturating_sub(1);
                self.order.insert((*count, rule.clone()));
            }
        }
    }

    /// Stop considering `rule` once this worker has run it.
    pub fn finished(&mut self, rule: &str) {
        if let Some(count) = self.pending.remove(rule) {
            self.order.remove(&(count, rule.to_string()));
        }
        self.artifact_local(rule);
    }

    /// Up to `limit` rule names, fewest missing dependencies first.
    pub fn candidates(&self, limit: usize) -> Vec<&str> {
        self.order
            .iter()
            .take(limit)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    pub fn pending(&self, rule: &str) -> Option<usize> {
        self.pending.get(rule).copied()
    }
}

/// Expand phony names in `dependencies` into the artifacts behind them.
fn artifacts<'a>(dependencies: &'a [String], phony: &HashMap<&str, &'a RuleSpec>) -> BTreeSet<&'a str> {
    let mut stack: Vec<&str> = dependencies.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut found = BTreeSet::new();

    while let Some(name) = stack.pop() {
        if !seen.insert(name) {
            continue;
        }
        match phony.get(name) {
            Some(&spec) => stack.extend(spec.dependencies.iter().map(String::as_str)),
            None => {
                found.insert(name);
            }
        }
    }
    found
}
