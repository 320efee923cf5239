//! Entries held by the Space and the templates used to match them.
//!
//! An entry is a tagged tuple `(kind, key, value)`. Templates have the same
//! shape with every field optional; `None` is a wildcard.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rule::RuleSpec;
use super::state::TaskState;

/// Entry class; the first field of every tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// `(task, rule_name, state)`
    Task,
    /// `(file, artifact_name, location)`
    File,
    /// `(config, key, value)`
    Config,
    /// `(rule, rule_name, {dependencies, commands})`
    Rule,
    /// `(worker, worker_id, name)`
    Worker,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Task => "task",
            Kind::File => "file",
            Kind::Config => "config",
            Kind::Rule => "rule",
            Kind::Worker => "worker",
        };
        f.write_str(s)
    }
}

pub const CONFIG_PERIOD: &str = "period";
pub const CONFIG_JOB: &str = "job";

/// An immutable tuple held in the Space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: Kind,
    pub key: String,
    pub value: Value,
}

impl Entry {
    pub fn new(kind: Kind, key: impl Into<String>, value: Value) -> Self {
        Self {
            kind,
            key: key.into(),
            value,
        }
    }

    pub fn task(rule: impl Into<String>, state: TaskState) -> Self {
        Self::new(Kind::Task, rule, Value::from(state.as_str()))
    }

    pub fn file(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self::new(Kind::File, name, Value::from(location.into()))
    }

    pub fn config(key: &str, value: Value) -> Self {
        Self::new(Kind::Config, key, value)
    }

    pub fn rule(name: impl Into<String>, spec: &RuleSpec) -> Self {
        // RuleSpec is two string lists; serializing it cannot fail.
        let value = serde_json::to_value(spec).unwrap_or(Value::Null);
        Self::new(Kind::Rule, name, value)
    }

    pub fn worker(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Kind::Worker, id, Value::from(name.into()))
    }

    /// The task state, if this is a well-formed `task` entry.
    pub fn task_state(&self) -> Option<TaskState> {
        if self.kind != Kind::Task {
            return None;
        }
        self.value.as_str()?.parse().ok()
    }

    pub fn rule_spec(&self) -> Option<RuleSpec> {
        if self.kind != Kind::Rule {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }

    pub fn text(&self) -> Option<&str> {
        self.value.as_str()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.kind, self.key, self.value)
    }
}

/// Pattern matched against entries; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub kind: Option<Kind>,
    pub key: Option<String>,
    pub value: Option<Value>,
}

impl Template {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kind(kind: Kind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// `(task, rule?, state?)`
    pub fn task(rule: Option<&str>, state: Option<TaskState>) -> Self {
        Self {
            kind: Some(Kind::Task),
            key: rule.map(str::to_string),
            value: state.map(|s| Value::from(s.as_str())),
        }
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        self.kind.is_none_or(|kind| kind == entry.kind)
            && self.key.as_ref().is_none_or(|key| *key == entry.key)
            && self.value.as_ref().is_none_or(|value| *value == entry.value)
    }
}

impl From<&Entry> for Template {
    fn from(entry: &Entry) -> Self {
        Self {
            kind: Some(entry.kind),
            key: Some(entry.key.clone()),
            value: Some(entry.value.clone()),
        }
    }
}
