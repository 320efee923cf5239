//! Builds the dependency graph from a flat rule list.

use thiserror::Error;

use super::node::{Graph, NodeId};
use crate::domain::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    Duplicate,
    Cycle,
    UnknownTarget,
}

/// Error raised while building the graph, reported as `file:line: message`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{line}: {message}")]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub message: String,
    pub line: usize,
    pub file: String,
}

impl GraphError {
    fn new(kind: GraphErrorKind, message: String, line: usize, file: Option<&str>) -> Self {
        Self {
            kind,
            message,
            line,
            file: file.unwrap_or("(no source)").to_string(),
        }
    }
}

/// Build the graph for `rules`.
///
/// Rules are processed in input order. A dependency seen before its rule
/// becomes a stub that the rule later promotes in place. Every edge is
/// checked against the rule node's ancestors before insertion, so a cycle
/// is reported at the line of the rule that closes it.
///
/// The entry point is `target` if given, otherwise the first rule. An empty
/// rule list yields an empty graph with no root.
pub fn build(rules: &[Rule], target: Option<&str>, file: Option<&str>) -> Result<Graph, GraphError> {
    let mut graph = Graph::new();
    let mut first: Option<NodeId> = None;

    for rule in rules {
        let node = graph.fetch_or_stub(&rule.name);
        if let Err(previous) = graph.promote(node, rule.clone()) {
            return Err(GraphError::new(
                GraphErrorKind::Duplicate,
                format!("Rule {} already defined at line {}", rule.name, previous),
                rule.defined_at,
                file,
            ));
        }
        first.get_or_insert(node);

        for dependency in &rule.dependencies {
            let dep = graph.fetch_or_stub(dependency);

            // `node` is about to become a parent of `dep`; if `dep` already
            // sits above `node`, the new edge closes a loop.
            if let Some(path) = graph.ancestor_path(node, dep) {
                return Err(GraphError::new(
                    GraphErrorKind::Cycle,
                    format!("Circular dependency found: {}", render_cycle(&graph, &path)),
                    rule.defined_at,
                    file,
                ));
            }

            graph.add_edge(node, dep);
        }
    }

    let root = match target {
        Some(name) => match graph.lookup(name) {
            Some(id) if !graph.node(id).content().is_stub() => Some(id),
            _ => {
                return Err(GraphError::new(
                    GraphErrorKind::UnknownTarget,
                    format!("No rule to make target `{name}`"),
                    0,
                    file,
                ));
            }
        },
        None => first,
    };
    if let Some(root) = root {
        graph.set_root(root);
    }

    Ok(graph)
}

/// `path` runs from the rule node up to the dependency that closes the loop;
/// print it in dependency order and repeat the first member at the end.
fn render_cycle(graph: &Graph, path: &[NodeId]) -> String {
    let mut names: Vec<&str> = path.iter().rev().map(|&id| graph.name(id)).collect();
    if let Some(&start) = names.first() {
        names.push(start);
    }
    names.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn rule(name: &str, deps: &[&str], commands: &[&str], line: usize) -> Rule {
        Rule::new(
            name,
            deps.iter().map(|d| d.to_string()).collect(),
            commands.iter().map(|c| c.to_string()).collect(),
            line,
        )
    }

    #[test]
    fn empty_rule_list_has_no_root() {
        let graph = build(&[], None, None).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.root(), None);
    }

    #[test]
    fn single_rule_without_dependencies() {
        let graph = build(&[rule("output.o", &[], &[], 1)], None, None).unwrap();

        assert_eq!(graph.len(), 1);
        let root = graph.root().unwrap();
        let content = graph.node(root).rule().unwrap();
        assert_eq!(content.name, "output.o");
        assert_eq!(content.defined_at, 1);
    }

    #[test]
    fn dependency_becomes_stub() {
        let graph = build(&[rule("output.o", &["source.c"], &[], 1)], None, None).unwrap();

        let root = graph.root().unwrap();
        let source = graph.lookup("source.c").unwrap();
        assert_eq!(graph.node(root).children(), &[source]);
        assert!(graph.node(source).content().is_stub());
        assert_eq!(graph.leaf_stubs(), vec![source]);
    }

    #[test]
    fn stub_is_promoted_in_place() {
        let rules = [
            rule("app", &["main.o"], &["ld"], 1),
            rule("main.o", &["main.c"], &["cc"], 3),
        ];
        let graph = build(&rules, None, None).unwrap();

        let main_o = graph.lookup("main.o").unwrap();
        assert!(!graph.node(main_o).content().is_stub());
        assert_eq!(graph.node(main_o).parents(), &[graph.lookup("app").unwrap()]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn node_count_is_distinct_names() {
        let rules = [
            rule("all", &["a", "b"], &[], 1),
            rule("a", &["common.h", "a.c"], &["cc a.c"], 2),
            rule("b", &["common.h", "b.c"], &["cc b.c"], 4),
        ];
        let graph = build(&rules, None, None).unwrap();

        let names: HashSet<&str> = rules
            .iter()
            .flat_map(|r| std::iter::once(r.name.as_str()).chain(r.dependencies.iter().map(String::as_str)))
            .collect();
        assert_eq!(graph.len(), names.len());
    }

    #[test]
    fn duplicate_definition_names_both_lines() {
        let rules = [rule("a", &[], &["x"], 1), rule("a", &[], &["y"], 7)];
        let err = build(&rules, None, Some("Makefile")).unwrap_err();

        assert_eq!(err.kind, GraphErrorKind::Duplicate);
        assert_eq!(err.line, 7);
        assert_eq!(err.to_string(), "Makefile:7: Rule a already defined at line 1");
    }

    #[test]
    fn cycle_reports_members_in_order() {
        let rules = [
            rule("a", &["b"], &["x"], 1),
            rule("b", &["c"], &["x"], 2),
            rule("c", &["a"], &["x"], 3),
        ];
        let err = build(&rules, None, None).unwrap_err();

        assert_eq!(err.kind, GraphErrorKind::Cycle);
        assert_eq!(err.line, 3);
        assert_eq!(err.message, "Circular dependency found: a -> b -> c -> a");
    }

    #[test]
    fn cycle_path_excludes_unrelated_parents() {
        let rules = [
            rule("top", &["a"], &[], 1),
            rule("other", &["b"], &[], 2),
            rule("a", &["b"], &["x"], 3),
            rule("b", &["a"], &["x"], 4),
        ];
        let err = build(&rules, None, None).unwrap_err();

        assert_eq!(err.message, "Circular dependency found: a -> b -> a");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = build(&[rule("a", &["a"], &["x"], 5)], None, None).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::Cycle);
        assert_eq!(err.message, "Circular dependency found: a -> a");
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let rules = [
            rule("d", &["b", "c"], &[], 1),
            rule("b", &["a"], &["x"], 2),
            rule("c", &["a"], &["x"], 3),
            rule("a", &[], &["x"], 4),
        ];
        assert!(build(&rules, None, None).is_ok());
    }

    #[test]
    fn explicit_target_selects_root() {
        let rules = [rule("a", &[], &["x"], 1), rule("b", &[], &["y"], 2)];
        let graph = build(&rules, Some("b"), None).unwrap();
        assert_eq!(graph.name(graph.root().unwrap()), "b");
    }

    #[test]
    fn unknown_target_is_rejected() {
        let rules = [rule("a", &["src.c"], &["x"], 1)];

        let err = build(&rules, Some("nope"), None).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::UnknownTarget);

        // A source file is not a target either.
        let err = build(&rules, Some("src.c"), None).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::UnknownTarget);
    }
}
