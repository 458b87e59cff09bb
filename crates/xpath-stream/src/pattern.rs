//! The merged pattern tree and the diagnostics collected while compiling it.
//!
//! A compiled pattern set is a single rooted tree: interior steps become
//! branch nodes, final steps become leaf nodes carrying the original pattern
//! strings that terminate there. Within one parent a given name maps to
//! exactly one node, and a node's kind is fixed once created.

use std::fmt;

/// Index into the tree's name list.
pub(crate) type NameId = usize;

/// Index into the tree's node list; the root is always node 0.
pub(crate) type NodeId = usize;

#[derive(Debug, Clone)]
pub(crate) struct PatternNode {
    pub(crate) name: NameId,
    pub(crate) kind: PatternKind,
}

#[derive(Debug, Clone)]
pub(crate) enum PatternKind {
    Branch { children: Vec<NodeId> },
    Leaf { requested: Vec<String> },
}

/// The merged, validated representation of a compiled pattern set.
#[derive(Debug, Default, Clone)]
pub struct PatternTree {
    pub(crate) names: Vec<Box<str>>,
    pub(crate) nodes: Vec<PatternNode>,
}

impl PatternTree {
    pub(crate) fn root(&self) -> NodeId {
        0
    }

    pub(crate) fn node(&self, id: NodeId) -> &PatternNode {
        &self.nodes[id]
    }

    pub(crate) fn name_text(&self, id: NameId) -> &str {
        &self.names[id]
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of merged steps across the whole pattern set.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Requested pattern strings terminating at `id`; empty for branches.
    pub(crate) fn requested(&self, id: NodeId) -> &[String] {
        match &self.nodes[id].kind {
            PatternKind::Leaf { requested } => requested,
            PatternKind::Branch { .. } => &[],
        }
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].kind {
            PatternKind::Branch { children } => children,
            PatternKind::Leaf { .. } => &[],
        }
    }

    /// First pattern string reachable beneath `id`, for conflict messages.
    pub(crate) fn first_requested(&self, id: NodeId) -> String {
        let mut cur = id;
        loop {
            match &self.nodes[cur].kind {
                PatternKind::Leaf { requested } => return requested[0].clone(),
                PatternKind::Branch { children } => cur = children[0],
            }
        }
    }

    /// Id for `name`, adding it to the name list if it is new.
    pub(crate) fn name_id(&mut self, name: &str) -> NameId {
        if let Some(id) = self.names.iter().position(|n| n.as_ref() == name) {
            return id;
        }
        self.names.push(name.into());
        self.names.len() - 1
    }

    /// Distinct element local names used anywhere in the tree, in first-use
    /// order. Read sessions intern each of these once at start-up.
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.as_ref())
    }
}

/// One non-fatal note collected during a compile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileDiagnostic {
    /// A bracketed predicate was recognized and discarded; carries the exact
    /// predicate text including the brackets.
    PredicateIgnored { predicate: String },

    /// The same pattern string appeared more than once in the set. The
    /// duplicate is still recorded on its leaf, so it stays observable.
    DuplicatePattern { pattern: String },
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileDiagnostic::PredicateIgnored { predicate } => {
                write!(f, "the predicate `{predicate}` is ignored for matching")
            }
            CompileDiagnostic::DuplicatePattern { pattern } => {
                write!(f, "the pattern `{pattern}` appears more than once")
            }
        }
    }
}

/// Non-fatal diagnostics from one compile call.
#[derive(Debug, Default, Clone)]
pub struct CompileDiagnostics {
    notes: Vec<CompileDiagnostic>,
}

impl CompileDiagnostics {
    pub(crate) fn push(&mut self, note: CompileDiagnostic) {
        self.notes.push(note);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompileDiagnostic> {
        self.notes.iter()
    }

    pub fn as_slice(&self) -> &[CompileDiagnostic] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

impl<'a> IntoIterator for &'a CompileDiagnostics {
    type Item = &'a CompileDiagnostic;
    type IntoIter = std::slice::Iter<'a, CompileDiagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_names_in_first_use_order() {
        let mut tree = PatternTree::default();
        let a = tree.name_id("alpha");
        let b = tree.name_id("beta");
        assert_eq!(tree.name_id("alpha"), a);
        assert_eq!(tree.name_id("beta"), b);

        let names: Vec<&str> = tree.local_names().collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_requested_is_empty_for_branches() {
        let mut tree = PatternTree::default();
        let name = tree.name_id("a");
        tree.nodes.push(PatternNode {
            name,
            kind: PatternKind::Branch { children: vec![] },
        });
        assert!(tree.requested(0).is_empty());
    }
}
