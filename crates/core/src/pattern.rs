//! Source patterns supplying matches to an accumulate.
//!
//! The rule compiler owns pattern semantics; this layer only needs structural
//! equality, cloning, and the bindings declared inside the pattern.

use crate::binding::Binding;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Logical combinator of a group element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKind {
    And,
    Or,
    Not,
    Exists,
}

/// The sub-pattern whose matches feed an accumulate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourcePattern {
    /// A single object pattern with the bindings it declares.
    Pattern {
        object_type: String,
        declarations: Vec<Binding>,
    },
    /// A group of nested patterns.
    Group {
        kind: GroupKind,
        children: Vec<Arc<SourcePattern>>,
    },
}

impl SourcePattern {
    /// Creates an object pattern.
    pub fn pattern(object_type: impl Into<String>, declarations: Vec<Binding>) -> Self {
        SourcePattern::Pattern {
            object_type: object_type.into(),
            declarations,
        }
    }

    /// Creates a group pattern.
    pub fn group(kind: GroupKind, children: Vec<SourcePattern>) -> Self {
        SourcePattern::Group {
            kind,
            children: children.into_iter().map(Arc::new).collect(),
        }
    }

    /// Copies a group shell while sharing its children; patterns are copied whole.
    pub fn clone_only_group(&self) -> Self {
        match self {
            SourcePattern::Group { kind, children } => SourcePattern::Group {
                kind: *kind,
                children: children.iter().map(Arc::clone).collect(),
            },
            pattern => pattern.clone(),
        }
    }

    /// Returns every binding declared inside this pattern, depth first.
    pub fn inner_declarations(&self) -> Vec<&Binding> {
        let mut out = Vec::new();
        self.collect_declarations(&mut out);
        out
    }

    fn collect_declarations<'a>(&'a self, out: &mut Vec<&'a Binding>) {
        match self {
            SourcePattern::Pattern { declarations, .. } => out.extend(declarations.iter()),
            SourcePattern::Group { children, .. } => {
                for child in children {
                    child.collect_declarations(out);
                }
            }
        }
    }
}
