//! Graph nodes and their persisted form

use serde::{Deserialize, Serialize};

use node_vm::NodeId;

use crate::attribute::{sanitize_attr_name, AttrSave, Attribute};
use crate::types::{ColRow, NodeState, Position};

/// One node of the graph arena
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// Node type name
    pub exe: String,
    pub parent: Option<NodeId>,
    pub subs: Vec<NodeId>,

    pub pos: Position,
    pub bypass: bool,
    pub selected: bool,
    pub attrs: Vec<Attribute>,
    pub cols: Vec<ColRow>,
    pub rows: Vec<ColRow>,

    pub state: NodeState,
    pub exe_error: Option<String>,
    pub progress: f64,
    pub progress_desc: String,
    /// Seconds the last body run took
    pub exe_time: f64,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, exe: String, parent: Option<NodeId>) -> Self {
        Self {
            id,
            name,
            exe,
            parent,
            subs: Vec::new(),
            pos: Position::default(),
            bypass: false,
            selected: false,
            attrs: Vec::new(),
            cols: Vec::new(),
            rows: Vec::new(),
            state: NodeState::Waiting,
            exe_error: None,
            progress: 0.0,
            progress_desc: String::new(),
            exe_time: 0.0,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn attr_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attrs.iter_mut().find(|a| a.name == name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Add an attribute, making its name unique; returns the final name
    pub fn add_attr(&mut self, name: &str, source: impl Into<String>) -> String {
        let mut name = sanitize_attr_name(name);
        while self.has_attr(&name) {
            name.push('1');
        }
        self.attrs.push(Attribute::new(name.clone(), source));
        name
    }

    /// Existing attribute, or a new one with `default` as its source
    pub(crate) fn ensure_attr(&mut self, name: &str, default: &str) -> &mut Attribute {
        let index = match self.attrs.iter().position(|a| a.name == name) {
            Some(index) => index,
            None => {
                self.attrs.push(Attribute::new(name, default));
                self.attrs.len() - 1
            }
        };
        &mut self.attrs[index]
    }

    pub fn has_compile_error(&self) -> bool {
        self.attrs.iter().any(|a| a.compile_error.is_some())
    }

    pub fn is_done(&self) -> bool {
        self.state == NodeState::Done
    }

    /// Start a new attempt
    pub(crate) fn reset(&mut self) {
        self.state = NodeState::Waiting;
        self.exe_error = None;
        for attr in self.attrs.iter_mut() {
            attr.exe_error = None;
            attr.value = None;
            attr.used = false;
        }
    }
}

/// Persisted form of a node and its subtree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSave {
    pub name: String,
    pub exe: String,
    #[serde(default)]
    pub pos: Position,
    #[serde(default)]
    pub bypass: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<AttrSave>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cols: Vec<ColRow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<ColRow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subs: Vec<NodeSave>,
}

impl NodeSave {
    pub fn new(name: &str, exe: &str) -> Self {
        Self {
            name: name.to_string(),
            exe: exe.to_string(),
            pos: Position::default(),
            bypass: false,
            selected: false,
            attrs: Vec::new(),
            cols: Vec::new(),
            rows: Vec::new(),
            subs: Vec::new(),
        }
    }
}

/// Strip characters a node name can't contain
///
/// `.` separates node and attribute in expressions, `/` separates path parts.
pub fn sanitize_node_name(name: &str) -> String {
    let name: String = name.chars().filter(|c| !matches!(c, '.' | '/')).collect();
    if name.is_empty() {
        "node".to_string()
    } else {
        name
    }
}
