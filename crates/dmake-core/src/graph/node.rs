//! Arena-allocated dependency graph.
//!
//! Design:
//! - Nodes live in a `Vec` and are referenced by `NodeId`.
//! - Forward edges: node -> nodes it depends on (`children`, owned).
//! - Reverse edges: node -> nodes that depend on it (`parents`, back-references).
//! - Invariant: `children` and `parents` are kept in sync by `add_edge`, the
//!   only edge mutator, and topology is frozen once `build` returns.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use crate::domain::{NodeContent, Rule, RuleStub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    content: NodeContent,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    done: bool,
    processing: bool,
}

impl Node {
    fn new(content: NodeContent) -> Self {
        Self {
            content,
            parents: Vec::new(),
            children: Vec::new(),
            done: false,
            processing: false,
        }
    }

    pub fn name(&self) -> &str {
        self.content.name()
    }

    pub fn content(&self) -> &NodeContent {
        &self.content
    }

    pub fn rule(&self) -> Option<&Rule> {
        self.content.rule()
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// Children in first-seen dependency order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }
}

/// Dependency graph of rules and stubs with a single entry point.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
    root: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entry point: the requested target, or the first rule defined.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: NodeId) -> &str {
        self.nodes[id.0].name()
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Nodes nothing depends on, in creation order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.ids().filter(|&id| self.node(id).is_root()).collect()
    }

    /// Dependencies that no rule defines: they must exist as sources.
    pub fn leaf_stubs(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|&id| self.node(id).content.is_stub())
            .collect()
    }

    /// Fetch the node for `name`, creating a stub if it does not exist yet.
    pub(crate) fn fetch_or_stub(&mut self, name: &str) -> NodeId {
        if let Some(id) = self.lookup(name) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(Node::new(NodeContent::Stub(RuleStub::new(name))));
        self.index.insert(name.to_string(), id);
        id
    }

    /// Replace a stub with its rule. If the node already holds a rule it is
    /// left untouched and the line of the existing definition is returned.
    pub(crate) fn promote(&mut self, id: NodeId, rule: Rule) -> Result<(), usize> {
        let node = &mut self.nodes[id.0];
        match &node.content {
            NodeContent::Rule(existing) => Err(existing.defined_at),
            NodeContent::Stub(_) => {
                node.content = NodeContent::Rule(rule);
                Ok(())
            }
        }
    }

    /// Add `parent -> child` unless present. Cycle checks are the caller's job.
    pub(crate) fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        if self.nodes[parent.0].children.contains(&child) {
            return;
        }
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parents.push(parent);
    }

    /// All transitive ancestors of `id`, nearest first, without duplicates.
    pub fn parentage(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<NodeId> = self.node(id).parents.iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            order.push(next);
            queue.extend(self.node(next).parents.iter().copied());
        }
        order
    }

    /// A chain `from, parent, grandparent, ..., to` following parent edges,
    /// or `None` if `to` is not an ancestor of `from` (nor `from` itself).
    pub fn ancestor_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for &parent in &self.node(current).parents {
                if parent == from || prev.contains_key(&parent) {
                    continue;
                }
                prev.insert(parent, current);
                if parent == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&p) = prev.get(&cursor) {
                        path.push(p);
                        cursor = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(parent);
            }
        }
        None
    }

    /// Every node reachable from `from` through dependency edges, itself included.
    pub fn reachable(&self, from: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::from([from]);
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            for &child in &self.node(current).children {
                if seen.insert(child) {
                    stack.push(child);
                }
            }
        }
        seen
    }

    /// A node is ready when every dependency is done.
    pub fn is_ready(&self, id: NodeId) -> bool {
        self.node(id)
            .children
            .iter()
            .all(|&child| self.node(child).done)
    }

    pub fn mark_done(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        node.done = true;
        node.processing = false;
    }

    pub fn set_processing(&mut self, id: NodeId, processing: bool) {
        self.nodes[id.0].processing = processing;
    }

    /// Pretty-print the tree below `from`: `*` marks the root, `|-+` an inner
    /// node and `|->` a leaf. Shared dependencies appear under every parent.
    pub fn render_tree(&self, from: NodeId) -> String {
        let mut out = String::new();
        self.render_level(from, 0, &mut out);
        out
    }

    fn render_level(&self, id: NodeId, level: usize, out: &mut String) {
        let node = self.node(id);
        let mut prefix = String::new();
        if level == 0 {
            prefix.push('*');
        } else {
            prefix.push('|');
            prefix.push_str(&" ".repeat((level - 1) * 2));
            prefix.push_str("|-");
            prefix.push(if node.is_leaf() { '>' } else { '+' });
        }
        let label = match &node.content {
            NodeContent::Stub(stub) => stub.to_string(),
            NodeContent::Rule(rule) => rule.name.clone(),
        };
        let _ = writeln!(out, "{prefix} {label}");
        for &child in &node.children {
            self.render_level(child, level + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(names: &[&str], edges: &[(&str, &str)]) -> Graph {
        let mut graph = Graph::new();
        for name in names {
            graph.fetch_or_stub(name);
        }
        for (parent, child) in edges {
            let p = graph.fetch_or_stub(parent);
            let c = graph.fetch_or_stub(child);
            graph.add_edge(p, c);
        }
        graph
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = Graph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.root(), None);
    }

    #[test]
    fn add_edge_creates_both_directions() {
        let graph = graph_with(&["b", "a"], &[("b", "a")]);
        let a = graph.lookup("a").unwrap();
        let b = graph.lookup("b").unwrap();

        assert_eq!(graph.node(b).children(), &[a]);
        assert_eq!(graph.node(a).parents(), &[b]);
        assert!(graph.node(b).is_root());
        assert!(graph.node(a).is_leaf());
    }

    #[test]
    fn duplicate_edge_is_added_once() {
        let graph = graph_with(&[], &[("b", "a"), ("b", "a")]);
        let b = graph.lookup("b").unwrap();
        assert_eq!(graph.node(b).children().len(), 1);
    }

    #[test]
    fn parentage_of_diamond_has_no_duplicates() {
        //     d
        //    / \
        //   b   c
        //    \ /
        //     a
        let graph = graph_with(&[], &[("d", "b"), ("d", "c"), ("b", "a"), ("c", "a")]);
        let a = graph.lookup("a").unwrap();

        let names: Vec<&str> = graph.parentage(a).into_iter().map(|id| graph.name(id)).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn ancestor_path_follows_parents() {
        let graph = graph_with(&[], &[("a", "b"), ("b", "c"), ("x", "c")]);
        let a = graph.lookup("a").unwrap();
        let c = graph.lookup("c").unwrap();

        let path: Vec<&str> = graph
            .ancestor_path(c, a)
            .unwrap()
            .into_iter()
            .map(|id| graph.name(id))
            .collect();
        assert_eq!(path, vec!["c", "b", "a"]);
        assert!(graph.ancestor_path(a, c).is_none());
    }

    #[test]
    fn readiness_tracks_children() {
        let mut graph = graph_with(&[], &[("c", "a"), ("c", "b")]);
        let a = graph.lookup("a").unwrap();
        let b = graph.lookup("b").unwrap();
        let c = graph.lookup("c").unwrap();

        assert!(graph.is_ready(a));
        assert!(!graph.is_ready(c));

        graph.mark_done(a);
        assert!(!graph.is_ready(c));

        graph.mark_done(b);
        assert!(graph.is_ready(c));
    }

    #[test]
    fn reachable_excludes_unrelated_targets() {
        let graph = graph_with(&[], &[("all", "a"), ("a", "src"), ("other", "src")]);
        let all = graph.lookup("all").unwrap();

        let reach = graph.reachable(all);
        assert_eq!(reach.len(), 3);
        assert!(!reach.contains(&graph.lookup("other").unwrap()));
    }

    #[test]
    fn render_marks_root_inner_and_leaves() {
        let mut graph = graph_with(&[], &[("app", "main.o"), ("main.o", "main.c")]);
        let app = graph.lookup("app").unwrap();
        let main_o = graph.lookup("main.o").unwrap();
        graph
            .promote(app, Rule::new("app", vec!["main.o".into()], vec!["ld".into()], 1))
            .unwrap();
        graph
            .promote(main_o, Rule::new("main.o", vec!["main.c".into()], vec!["cc".into()], 4))
            .unwrap();

        let rendered = graph.render_tree(app);
        assert_eq!(rendered, "* app\n||-+ main.o\n|  |-> (stub) main.c\n");
    }
}
