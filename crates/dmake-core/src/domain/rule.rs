//! Rules as produced by the parser, and the placeholder used for targets
//! that are referenced before (or without) being defined.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named build target with its dependencies and commands.
///
/// A rule with no commands is phony: it is satisfied as soon as its
/// dependencies are, and is never handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub dependencies: Vec<String>,
    pub commands: Vec<String>,

    /// 1-based line of the rule header in its source.
    pub defined_at: usize,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        dependencies: Vec<String>,
        commands: Vec<String>,
        defined_at: usize,
    ) -> Self {
        Self {
            name: name.into(),
            dependencies,
            commands,
            defined_at,
        }
    }

    pub fn is_phony(&self) -> bool {
        self.commands.is_empty()
    }

    /// The part of the rule workers need, as published into the Space.
    pub fn spec(&self) -> RuleSpec {
        RuleSpec {
            dependencies: self.dependencies.clone(),
            commands: self.commands.clone(),
        }
    }
}

/// Read-only view of a rule published once per job as a `rule` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub dependencies: Vec<String>,
    pub commands: Vec<String>,
}

/// Placeholder for a dependency whose defining rule has not been seen.
///
/// A stub that is never promoted is a leaf source: it must already exist
/// as an artifact when the job starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStub {
    pub name: String,
}

impl RuleStub {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for RuleStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(stub) {}", self.name)
    }
}

/// What a graph node holds. A stub is promoted in place to a rule at most
/// once; the node itself never changes identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeContent {
    Stub(RuleStub),
    Rule(Rule),
}

impl NodeContent {
    pub fn name(&self) -> &str {
        match self {
            NodeContent::Stub(stub) => &stub.name,
            NodeContent::Rule(rule) => &rule.name,
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, NodeContent::Stub(_))
    }

    pub fn rule(&self) -> Option<&Rule> {
        match self {
            NodeContent::Rule(rule) => Some(rule),
            NodeContent::Stub(_) => None,
        }
    }

    /// Stubs are phony too: there is nothing to run for them.
    pub fn is_phony(&self) -> bool {
        self.rule().is_none_or(Rule::is_phony)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_without_commands_is_phony() {
        let all = Rule::new("all", vec!["a".into()], vec![], 1);
        let a = Rule::new("a", vec![], vec!["touch a".into()], 3);

        assert!(all.is_phony());
        assert!(!a.is_phony());
    }

    #[test]
    fn stub_displays_marker() {
        assert_eq!(RuleStub::new("main.c").to_string(), "(stub) main.c");
    }

    #[test]
    fn content_exposes_name_for_both_variants() {
        let stub = NodeContent::Stub(RuleStub::new("x.c"));
        let rule = NodeContent::Rule(Rule::new("x.o", vec!["x.c".into()], vec!["cc".into()], 1));

        assert_eq!(stub.name(), "x.c");
        assert!(stub.is_stub());
        assert_eq!(rule.name(), "x.o");
        assert!(!rule.is_phony());
    }
}
