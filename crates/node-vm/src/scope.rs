//! Bindings between the VM and the graph that owns the attributes
//!
//! The VM never holds references into the graph. At compile time it asks a
//! [`Scope`] to resolve names into [`AttrRef`]s; at run time it asks a
//! [`ValueSource`] for the current value behind each reference.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Stable identifier of a node inside the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolved reference to one attribute of one node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrRef {
    pub node: NodeId,
    pub attr: String,
}

impl AttrRef {
    pub fn new(node: NodeId, attr: impl Into<String>) -> Self {
        Self {
            node,
            attr: attr.into(),
        }
    }
}

/// Output attributes start with `_` and are written by node bodies
pub fn is_output_attr(name: &str) -> bool {
    name.starts_with('_')
}

/// Name resolution used while compiling an expression
pub trait Scope {
    /// Node that owns the attribute being compiled
    fn current_node(&self) -> NodeId;

    /// Target of `.attr` access
    fn parent_node(&self) -> Option<NodeId>;

    /// Target of `node.attr` access, following the scope chain
    fn resolve_node(&self, name: &str) -> Option<NodeId>;

    fn has_attr(&self, node: NodeId, attr: &str) -> bool;
}

/// Run-time lookup of attribute values
pub trait ValueSource {
    fn read(&mut self, attr: &AttrRef) -> Value;
}

impl ValueSource for HashMap<AttrRef, Value> {
    fn read(&mut self, attr: &AttrRef) -> Value {
        self.get(attr).cloned().unwrap_or_default()
    }
}
