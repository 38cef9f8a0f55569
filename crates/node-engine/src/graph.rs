//! Node graph arena
//!
//! Nodes live in a `HashMap<NodeId, Node>` and own their children through id
//! lists. Expressions never hold ids directly: they name nodes and are
//! resolved again on every compile, so a dangling name is a compile error on
//! the referencing attribute instead of a broken link.
//!
//! - paths are node names joined with `/`, without the root
//! - names are unique among siblings
//! - expression names resolve through [`Graph::find_node_in_scope`]

use std::collections::{HashMap, HashSet};
use std::path::Path;

use node_vm::{
    rename_attr_refs, rename_node_refs, replace_spans, AccessTarget, AttrRef, EditTarget, NodeId,
    Program, Scope, Value, ValueSource,
};

use crate::attribute::{sanitize_attr_name, Attribute};
use crate::error::{NodeEngineError, Result};
use crate::node::{sanitize_node_name, Node, NodeSave};
use crate::registry::TaskRegistry;
use crate::types::NodeState;

pub const ROOT_NAME: &str = "root";
pub const ROOT_TYPE: &str = "layout";

/// How many forwarding accesses a deferred set follows
const MAX_SET_DEPTH: usize = 16;

/// Tree of nodes with name-based expression links
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Empty graph with only the root layout
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node::new(root, ROOT_NAME.to_string(), ROOT_TYPE.to_string(), None),
        );
        Self {
            nodes,
            root,
            next_id: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| NodeEngineError::NodeNotFound(id.to_string()))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| NodeEngineError::NodeNotFound(id.to_string()))
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the root is left
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn attr(&self, r: &AttrRef) -> Option<&Attribute> {
        self.nodes.get(&r.node)?.attr(&r.attr)
    }

    fn attr_mut(&mut self, r: &AttrRef) -> Option<&mut Attribute> {
        self.nodes.get_mut(&r.node)?.attr_mut(&r.attr)
    }

    fn alloc_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append a child under `parent`; the name is made unique
    pub fn add_node(&mut self, parent: NodeId, name: &str, exe: &str) -> Result<NodeId> {
        self.get(parent)?;
        let name = self.unique_child_name(parent, &sanitize_node_name(name), None);
        let id = self.alloc_id();
        self.nodes
            .insert(id, Node::new(id, name, exe.to_string(), Some(parent)));
        self.get_mut(parent)?.subs.push(id);
        Ok(id)
    }

    fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .get(&parent)?
            .subs
            .iter()
            .copied()
            .find(|id| self.nodes.get(id).is_some_and(|n| n.name == name))
    }

    fn unique_child_name(&self, parent: NodeId, base: &str, except: Option<NodeId>) -> String {
        let mut name = base.to_string();
        while self
            .child_named(parent, &name)
            .is_some_and(|id| Some(id) != except)
        {
            name.push('1');
        }
        name
    }

    /// `a/b/c` path of a node; the root has an empty path
    pub fn path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c == self.root {
                break;
            }
            let Some(node) = self.nodes.get(&c) else {
                break;
            };
            parts.push(node.name.as_str());
            cur = node.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        let mut cur = self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            cur = self.child_named(cur, part)?;
        }
        Some(cur)
    }

    /// Depth-first search below `from`, `from` itself excluded
    pub fn find_node(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let node = self.nodes.get(&from)?;
        for &sub in &node.subs {
            if self.nodes.get(&sub).is_some_and(|n| n.name == name) {
                return Some(sub);
            }
            if let Some(found) = self.find_node(sub, name) {
                return Some(found);
            }
        }
        None
    }

    /// Resolve a name the way expressions of `from` see it
    ///
    /// Looks at the siblings of `from` (itself included), then at the
    /// children of each ancestor going up. Never descends into other
    /// subtrees.
    pub fn find_node_in_scope(&self, from: NodeId, name: &str) -> Option<NodeId> {
        let mut scope = match self.nodes.get(&from)?.parent {
            Some(parent) => Some(parent),
            None => Some(from),
        };
        while let Some(s) = scope {
            if let Some(found) = self.child_named(s, name) {
                return Some(found);
            }
            scope = self.nodes.get(&s).and_then(|n| n.parent);
        }
        None
    }

    /// Every node, parents before children, in child order
    pub fn flatten(&self) -> Vec<NodeId> {
        self.subtree(self.root)
    }

    /// `id` and its descendants in preorder
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(node) = self.nodes.get(&cur) else {
                continue;
            };
            out.push(cur);
            stack.extend(node.subs.iter().rev());
        }
        out
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.nodes.get(&c).and_then(|n| n.parent);
        }
        false
    }

    // --- compilation ---

    fn compile_source(&self, node: NodeId, source: &str) -> Option<Program> {
        if source.trim().is_empty() {
            return None;
        }
        Some(Program::compile(source, &GraphScope { graph: self, node }))
    }

    /// Recompile every attribute of every node
    pub fn compile_all(&mut self) {
        let mut compiled = Vec::new();
        for id in self.flatten() {
            if let Some(node) = self.nodes.get(&id) {
                for (i, attr) in node.attrs.iter().enumerate() {
                    compiled.push((id, i, self.compile_source(id, &attr.source)));
                }
            }
        }
        for (id, i, program) in compiled {
            if let Some(attr) = self.nodes.get_mut(&id).and_then(|n| n.attrs.get_mut(i)) {
                attr.set_program(program);
            }
        }
    }

    fn compile_attr(&mut self, r: &AttrRef) {
        let Some(source) = self.attr(r).map(|a| a.source.clone()) else {
            return;
        };
        let program = self.compile_source(r.node, &source);
        if let Some(attr) = self.attr_mut(r) {
            attr.set_program(program);
        }
    }

    fn deps_of(&self, r: &AttrRef) -> &[AttrRef] {
        self.attr(r)
            .and_then(|a| a.program.as_ref())
            .map(|p| p.deps())
            .unwrap_or(&[])
    }

    fn reaches_itself(&self, start: &AttrRef) -> bool {
        let mut visited: HashSet<&AttrRef> = HashSet::new();
        let mut stack: Vec<&AttrRef> = self.deps_of(start).iter().collect();
        while let Some(r) = stack.pop() {
            if r == start {
                return true;
            }
            if visited.insert(r) {
                stack.extend(self.deps_of(r));
            }
        }
        false
    }

    /// Flag every attribute that depends on itself with `Loop`
    ///
    /// Returns the number of flagged attributes.
    pub fn check_loops(&mut self) -> usize {
        let mut looped = Vec::new();
        for id in self.flatten() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for attr in &node.attrs {
                let r = AttrRef::new(id, attr.name.clone());
                if self.reaches_itself(&r) {
                    looped.push(r);
                }
            }
        }
        for r in &looped {
            if let Some(attr) = self.attr_mut(r) {
                log::debug!("Attribute {}.{} is part of a loop", r.node, r.attr);
                attr.compile_error = Some("Loop".to_string());
                attr.value = None;
            }
        }
        looped.len()
    }

    /// Nodes that attributes of `id` read from, `id` excluded
    pub fn dependency_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(node) = self.nodes.get(&id) {
            for attr in &node.attrs {
                let Some(program) = attr.program.as_ref() else {
                    continue;
                };
                for dep in program.deps() {
                    if dep.node != id && !out.contains(&dep.node) {
                        out.push(dep.node);
                    }
                }
            }
        }
        out
    }

    // --- evaluation ---

    /// Value of an attribute, computed once per pass
    pub fn attr_value(&mut self, r: &AttrRef) -> Value {
        let Some(attr) = self.attr_mut(r) else {
            return Value::default();
        };
        if let Some(value) = attr.cached_value() {
            return value.clone();
        }
        if attr.compile_error.is_some() {
            attr.value = Some(Value::default());
            return Value::default();
        }
        // taken while running, so re-entry reads the empty value
        let Some(program) = attr.program.take() else {
            return Value::default();
        };
        let value = program.exec(&mut Eval { graph: self });
        if let Some(attr) = self.attr_mut(r) {
            attr.program = Some(program);
            attr.value = Some(value.clone());
        }
        value
    }

    /// Values of all attributes of a node
    pub fn evaluate_node(&mut self, id: NodeId) -> HashMap<String, Value> {
        let names: Vec<String> = match self.nodes.get(&id) {
            Some(node) => node.attrs.iter().map(|a| a.name.clone()).collect(),
            None => return HashMap::new(),
        };
        names
            .into_iter()
            .map(|name| {
                let value = self.attr_value(&AttrRef::new(id, name.clone()));
                (name, value)
            })
            .collect()
    }

    /// Forget memoized values so the next read recomputes them
    pub fn invalidate_values(&mut self) {
        for node in self.nodes.values_mut() {
            for attr in node.attrs.iter_mut() {
                attr.value = None;
            }
        }
    }

    // --- attribute edits ---

    /// Replace the source of an attribute and recompile it
    ///
    /// Returns true when the source changed.
    pub fn set_source(&mut self, r: &AttrRef, source: impl Into<String>) -> Result<bool> {
        let attr = self
            .attr_mut(r)
            .ok_or_else(|| NodeEngineError::AttrNotFound(r.attr.clone()))?;
        let changed = attr.set_source(source.into());
        self.compile_attr(r);
        Ok(changed)
    }

    /// Write a body result into an attribute, creating it if needed
    ///
    /// Returns true when the value changed.
    pub fn set_output(&mut self, node: NodeId, name: &str, value: Value) -> Result<bool> {
        let attr = self.get_mut(node)?.ensure_attr(name, "");
        attr.used = true;
        Ok(attr.set_output(value))
    }

    /// Give a node an attribute a body asked for, compiling it when new
    pub fn declare_attr(&mut self, node: NodeId, name: &str, default: &str) -> Result<()> {
        let node_ref = self.get_mut(node)?;
        let is_new = !node_ref.has_attr(name);
        node_ref.ensure_attr(name, default).used = true;
        if is_new {
            self.compile_attr(&AttrRef::new(node, name.to_string()));
        }
        Ok(())
    }

    /// Attach an execution error to one attribute
    pub fn set_attr_error(&mut self, node: NodeId, name: &str, error: String) -> Result<()> {
        let attr = self.get_mut(node)?.ensure_attr(name, "");
        attr.used = true;
        attr.exe_error = Some(error);
        Ok(())
    }

    /// Write `value` through the editable part of an attribute's expression
    ///
    /// A constant is replaced in place and an access forwards the write to
    /// the attribute it reads. Anything else replaces the whole source.
    /// Returns true when a source changed.
    pub fn set_attr_value(&mut self, r: &AttrRef, value: &Value) -> Result<bool> {
        let mut target = r.clone();
        for _ in 0..MAX_SET_DEPTH {
            let attr = self
                .attr(&target)
                .ok_or_else(|| NodeEngineError::AttrNotFound(target.attr.clone()))?;
            let edit = match attr.program.as_ref() {
                Some(program) if program.is_ok() => program.edit_target(),
                _ => EditTarget::Whole,
            };
            let source = match edit {
                EditTarget::Span(span) => replace_spans(&attr.source, vec![(span, value.to_literal())]),
                EditTarget::Attr(next) => {
                    target = next;
                    continue;
                }
                EditTarget::Whole => value.to_literal(),
            };
            return self.set_source(&target, source);
        }
        Err(NodeEngineError::InvalidEdit(format!(
            "too many forwarding accesses from {}",
            r.attr
        )))
    }

    /// Node a deferred set addresses: `name` in scope of `origin`, or a path
    pub fn resolve_target(&self, origin: NodeId, name: Option<&str>) -> Option<NodeId> {
        match name {
            None => self.nodes.contains_key(&origin).then_some(origin),
            Some(name) if name.is_empty() => self.nodes.contains_key(&origin).then_some(origin),
            Some(name) if name.contains('/') => self.find_by_path(name),
            Some(name) => self
                .find_node_in_scope(origin, name)
                .or_else(|| self.find_by_path(name)),
        }
    }

    fn lenient<T>(
        &mut self,
        node: NodeId,
        name: &str,
        default: T,
        literal: String,
        coerce: impl Fn(&Value) -> Option<T>,
    ) -> T {
        let r = AttrRef::new(node, name);
        let coerced = match self.attr(&r) {
            Some(_) => coerce(&self.attr_value(&r)),
            None => {
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.ensure_attr(name, "");
                }
                None
            }
        };
        match coerced {
            Some(v) => v,
            None => {
                if let Err(e) = self.set_source(&r, literal) {
                    log::warn!("Can't write default of {}: {}", name, e);
                }
                default
            }
        }
    }

    /// Attribute as a number; a missing or non-numeric value is reset to `default`
    pub fn attr_float(&mut self, node: NodeId, name: &str, default: f64) -> f64 {
        let literal = Value::Number(default).to_literal();
        self.lenient(node, name, default, literal, |v| match v {
            Value::Number(n) => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }

    pub fn attr_int(&mut self, node: NodeId, name: &str, default: i64) -> i64 {
        self.attr_float(node, name, default as f64) as i64
    }

    pub fn attr_bool(&mut self, node: NodeId, name: &str, default: bool) -> bool {
        let literal = if default { "1" } else { "0" }.to_string();
        self.lenient(node, name, default, literal, |v| match v {
            Value::Number(n) => Some(*n != 0.0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                other => other.parse::<f64>().ok().map(|n| n != 0.0),
            },
            _ => None,
        })
    }

    pub fn attr_string(&mut self, node: NodeId, name: &str, default: &str) -> String {
        let literal = Value::Text(default.to_string()).to_literal();
        self.lenient(node, name, default.to_string(), literal, |v| match v {
            Value::Text(_) | Value::Number(_) | Value::Blob(_) => Some(v.as_text()),
            _ => None,
        })
    }

    // --- structural edits ---

    /// Rename a node and rewrite every expression that named it
    ///
    /// Returns the final, unique name.
    pub fn rename_node(&mut self, id: NodeId, new_name: &str) -> Result<String> {
        if id == self.root {
            return Err(NodeEngineError::InvalidEdit("root can't be renamed".into()));
        }
        let node = self.get(id)?;
        let old = node.name.clone();
        let parent = node.parent.unwrap_or(self.root);
        let new = self.unique_child_name(parent, &sanitize_node_name(new_name), Some(id));
        if new == old {
            return Ok(new);
        }

        let mut edits = Vec::new();
        for nid in self.flatten() {
            if self.find_node_in_scope(nid, &old) != Some(id) {
                continue;
            }
            let Some(node) = self.nodes.get(&nid) else {
                continue;
            };
            for (i, attr) in node.attrs.iter().enumerate() {
                if !attr.source.contains(old.as_str()) {
                    continue;
                }
                let rewritten = rename_node_refs(&attr.source, &old, &new);
                if rewritten != attr.source {
                    edits.push((nid, i, rewritten));
                }
            }
        }

        self.get_mut(id)?.name = new.clone();
        self.apply_source_edits(edits);
        self.compile_all();
        log::debug!("Renamed node '{}' to '{}'", old, new);
        Ok(new)
    }

    /// Rename an attribute and rewrite every access to it
    pub fn rename_attr(&mut self, id: NodeId, old: &str, new_name: &str) -> Result<String> {
        let node = self.get(id)?;
        if !node.has_attr(old) {
            return Err(NodeEngineError::AttrNotFound(old.to_string()));
        }
        let mut new = sanitize_attr_name(new_name);
        while new != old && node.has_attr(&new) {
            new.push('1');
        }
        if new == old {
            return Ok(new);
        }

        let mut edits = Vec::new();
        for nid in self.flatten() {
            let Some(node) = self.nodes.get(&nid) else {
                continue;
            };
            let owned = |target: &AccessTarget| match target {
                AccessTarget::SameNode => nid == id,
                AccessTarget::Parent => node.parent.unwrap_or(nid) == id,
                AccessTarget::Named(name) => self.find_node_in_scope(nid, name) == Some(id),
            };
            for (i, attr) in node.attrs.iter().enumerate() {
                if !attr.source.contains(old) {
                    continue;
                }
                let rewritten = rename_attr_refs(&attr.source, old, &new, &owned);
                if rewritten != attr.source {
                    edits.push((nid, i, rewritten));
                }
            }
        }

        if let Some(attr) = self.get_mut(id)?.attr_mut(old) {
            attr.name = new.clone();
        }
        self.apply_source_edits(edits);
        self.compile_all();
        Ok(new)
    }

    fn apply_source_edits(&mut self, edits: Vec<(NodeId, usize, String)>) {
        for (nid, i, source) in edits {
            if let Some(attr) = self.nodes.get_mut(&nid).and_then(|n| n.attrs.get_mut(i)) {
                attr.source = source;
            }
        }
    }

    /// Copy a subtree under `target` and recompile
    ///
    /// The copy goes through the persisted form, so it carries sources and
    /// layout but no runtime state.
    pub fn copy_subtree(&mut self, id: NodeId, target: NodeId) -> Result<NodeId> {
        if id == self.root {
            return Err(NodeEngineError::InvalidEdit("root can't be copied".into()));
        }
        self.get(target)?;
        let save = self.save_node(id)?;
        let copy = self.insert_save(target, save)?;
        self.compile_all();
        Ok(copy)
    }

    /// Remove a node and its subtree; returns the removed paths
    pub fn remove_node(&mut self, id: NodeId) -> Result<Vec<String>> {
        if id == self.root {
            return Err(NodeEngineError::InvalidEdit("root can't be removed".into()));
        }
        let parent = self.get(id)?.parent;
        let removed = self.subtree(id);
        let paths: Vec<String> = removed.iter().map(|&n| self.path(n)).collect();

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.subs.retain(|&s| s != id);
        }
        for n in removed {
            self.nodes.remove(&n);
        }
        self.compile_all();
        Ok(paths)
    }

    // --- passes ---

    /// Reset node states and add the attributes each node type declares
    pub fn prepare_pass(&mut self, registry: &TaskRegistry) {
        for node in self.nodes.values_mut() {
            node.reset();
            let Some(node_type) = registry.get(&node.exe) else {
                continue;
            };
            for decl in &node_type.attrs {
                let attr = node.ensure_attr(&decl.name, &decl.default);
                if attr.ui.is_empty() {
                    attr.ui = decl.ui.clone();
                }
                attr.used = true;
            }
        }
    }

    /// Send nodes back to waiting for another run in the same pass
    pub fn rerun(&mut self, ids: &[NodeId]) {
        for id in ids {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.state = NodeState::Waiting;
            node.exe_error = None;
            for attr in node.attrs.iter_mut() {
                attr.exe_error = None;
            }
        }
    }

    /// Mark every attribute some expression reads
    pub fn mark_used(&mut self) {
        let mut read: Vec<AttrRef> = Vec::new();
        for node in self.nodes.values() {
            for attr in &node.attrs {
                if let Some(program) = attr.program.as_ref() {
                    read.extend(program.deps().iter().cloned());
                }
            }
        }
        for r in &read {
            if let Some(attr) = self.attr_mut(r) {
                attr.used = true;
            }
        }
    }

    /// Drop attributes nothing declared, read or wrote this pass
    ///
    /// Node types with user-defined attributes keep all of theirs.
    pub fn prune_unused_attrs(&mut self, registry: &TaskRegistry) -> usize {
        let mut pruned = 0;
        for node in self.nodes.values_mut() {
            match registry.get(&node.exe) {
                Some(node_type) if !node_type.user_attrs => {}
                _ => continue,
            }
            let before = node.attrs.len();
            node.attrs.retain(|a| a.used);
            pruned += before - node.attrs.len();
        }
        pruned
    }

    // --- persistence ---

    fn save_node(&self, id: NodeId) -> Result<NodeSave> {
        let node = self.get(id)?;
        let mut save = NodeSave::new(&node.name, &node.exe);
        save.pos = node.pos;
        save.bypass = node.bypass;
        save.selected = node.selected;
        save.attrs = node.attrs.iter().map(Attribute::to_save).collect();
        save.cols = node.cols.clone();
        save.rows = node.rows.clone();
        save.subs = node
            .subs
            .iter()
            .map(|&sub| self.save_node(sub))
            .collect::<Result<_>>()?;
        Ok(save)
    }

    fn load_fields(node: &mut Node, save: &mut NodeSave) {
        node.pos = save.pos;
        node.bypass = save.bypass;
        node.selected = save.selected;
        node.attrs = save.attrs.drain(..).map(Attribute::from_save).collect();
        node.cols = std::mem::take(&mut save.cols);
        node.rows = std::mem::take(&mut save.rows);
    }

    fn insert_save(&mut self, parent: NodeId, mut save: NodeSave) -> Result<NodeId> {
        let id = self.add_node(parent, &save.name, &save.exe)?;
        Self::load_fields(self.get_mut(id)?, &mut save);
        for sub in save.subs {
            self.insert_save(id, sub)?;
        }
        Ok(id)
    }

    /// Persisted form of the whole tree
    pub fn to_save(&self) -> Result<NodeSave> {
        self.save_node(self.root)
    }

    /// Rebuild a graph from its persisted form and compile it
    pub fn from_save(mut save: NodeSave) -> Result<Self> {
        let mut graph = Self::new();
        let root = graph.root;
        Self::load_fields(graph.get_mut(root)?, &mut save);
        for sub in save.subs {
            graph.insert_save(root, sub)?;
        }
        graph.compile_all();
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_save()?)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_save(serde_json::from_str(json)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }
}

/// Compile-time view of the graph from one node
struct GraphScope<'a> {
    graph: &'a Graph,
    node: NodeId,
}

impl Scope for GraphScope<'_> {
    fn current_node(&self) -> NodeId {
        self.node
    }

    fn parent_node(&self) -> Option<NodeId> {
        self.graph.node(self.node).and_then(|n| n.parent)
    }

    fn resolve_node(&self, name: &str) -> Option<NodeId> {
        self.graph.find_node_in_scope(self.node, name)
    }

    fn has_attr(&self, node: NodeId, attr: &str) -> bool {
        self.graph.node(node).is_some_and(|n| n.has_attr(attr))
    }
}

/// Run-time reads through the memoized graph values
struct Eval<'a> {
    graph: &'a mut Graph,
}

impl ValueSource for Eval<'_> {
    fn read(&mut self, attr: &AttrRef) -> Value {
        self.graph.attr_value(attr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with(graph: &mut Graph, parent: NodeId, name: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = graph.add_node(parent, name, "vars").unwrap();
        let node = graph.node_mut(id).unwrap();
        for (attr, source) in attrs {
            node.add_attr(attr, *source);
        }
        id
    }

    fn source(graph: &Graph, id: NodeId, attr: &str) -> String {
        graph.node(id).unwrap().attr(attr).unwrap().source.clone()
    }

    fn value(graph: &mut Graph, id: NodeId, attr: &str) -> Value {
        graph.attr_value(&AttrRef::new(id, attr))
    }

    #[test]
    fn test_names_paths_and_lookup() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = graph.add_node(root, "a", "layout").unwrap();
        let a2 = graph.add_node(root, "a", "layout").unwrap();
        let b = graph.add_node(a, "b.x", "vars").unwrap();

        assert_eq!(graph.node(a2).unwrap().name, "a1");
        assert_eq!(graph.node(b).unwrap().name, "bx");
        assert_eq!(graph.path(b), "a/bx");
        assert_eq!(graph.path(root), "");
        assert_eq!(graph.find_by_path("a/bx"), Some(b));
        assert_eq!(graph.find_by_path("a/missing"), None);
        assert_eq!(graph.find_node(root, "bx"), Some(b));
        assert_eq!(graph.find_node(a2, "bx"), None);
        assert_eq!(graph.flatten(), vec![root, a, b, a2]);
    }

    #[test]
    fn test_scope_prefers_siblings_and_climbs() {
        let mut graph = Graph::new();
        let root = graph.root();
        let top_x = graph.add_node(root, "x", "vars").unwrap();
        let group = graph.add_node(root, "group", "layout").unwrap();
        let inner_x = graph.add_node(group, "x", "vars").unwrap();
        let user = graph.add_node(group, "user", "vars").unwrap();
        let other = graph.add_node(root, "other", "layout").unwrap();
        let deep = graph.add_node(other, "deep", "vars").unwrap();

        assert_eq!(graph.find_node_in_scope(user, "x"), Some(inner_x));
        assert_eq!(graph.find_node_in_scope(deep, "x"), Some(top_x));
        assert_eq!(graph.find_node_in_scope(deep, "group"), Some(group));
        // never descends into another subtree
        assert_eq!(graph.find_node_in_scope(top_x, "user"), None);
    }

    #[test]
    fn test_cross_node_evaluation() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = node_with(&mut graph, root, "a", &[("x", "5")]);
        let b = node_with(&mut graph, root, "b", &[("y", "a.x * 2"), ("z", "y + 1")]);
        graph.compile_all();

        assert_eq!(value(&mut graph, b, "z"), Value::Number(11.0));
        assert_eq!(graph.dependency_nodes(b), vec![a]);
        assert!(graph.dependency_nodes(a).is_empty());
    }

    #[test]
    fn test_parent_access() {
        let mut graph = Graph::new();
        let root = graph.root();
        let group = node_with(&mut graph, root, "group", &[("scale", "3")]);
        let child = node_with(&mut graph, group, "child", &[("v", ".scale * 2")]);
        graph.compile_all();
        assert_eq!(value(&mut graph, child, "v"), Value::Number(6.0));
    }

    #[test]
    fn test_loop_is_flagged_and_evaluation_terminates() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = node_with(&mut graph, root, "a", &[("x", "b.y + 1")]);
        let b = node_with(&mut graph, root, "b", &[("y", "a.x + 1")]);
        let c = node_with(&mut graph, root, "c", &[("z", "a.x")]);
        graph.compile_all();

        assert_eq!(graph.check_loops(), 2);
        let err = |g: &Graph, id: NodeId, attr: &str| g.node(id).unwrap().attr(attr).unwrap().compile_error.clone();
        assert_eq!(err(&graph, a, "x").as_deref(), Some("Loop"));
        assert_eq!(err(&graph, b, "y").as_deref(), Some("Loop"));
        assert_eq!(err(&graph, c, "z"), None);

        assert_eq!(value(&mut graph, c, "z"), Value::default());
        assert!(graph.node(a).unwrap().has_compile_error());
    }

    #[test]
    fn test_dangling_reference_after_remove() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = node_with(&mut graph, root, "a", &[("x", "1")]);
        let _a_child = node_with(&mut graph, a, "inner", &[]);
        let b = node_with(&mut graph, root, "b", &[("y", "a.x")]);
        graph.compile_all();

        let removed = graph.remove_node(a).unwrap();
        assert_eq!(removed, vec!["a".to_string(), "a/inner".to_string()]);
        assert_eq!(graph.len(), 2);
        let attr = graph.node(b).unwrap().attr("y").unwrap();
        assert_eq!(attr.compile_error.as_deref(), Some("Node(a) not found"));
    }

    #[test]
    fn test_rename_node_propagates() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = node_with(&mut graph, root, "a", &[("x", "1")]);
        let b = node_with(&mut graph, root, "b", &[("y", "a.x + aa.x"), ("t", "\"a.x\"")]);
        let _aa = node_with(&mut graph, root, "aa", &[("x", "2")]);
        let group = graph.add_node(root, "group", "layout").unwrap();
        // shadows the top-level `a`
        let _inner_a = node_with(&mut graph, group, "a", &[("x", "7")]);
        let inner = node_with(&mut graph, group, "user", &[("v", "a.x")]);
        graph.compile_all();

        assert_eq!(graph.rename_node(a, "first").unwrap(), "first");
        assert_eq!(source(&graph, b, "y"), "first.x + aa.x");
        assert_eq!(source(&graph, b, "t"), "\"a.x\"");
        assert_eq!(source(&graph, inner, "v"), "a.x");
        assert_eq!(value(&mut graph, b, "y"), Value::Number(3.0));
    }

    #[test]
    fn test_rename_attr_propagates() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = node_with(&mut graph, root, "a", &[("x", "1"), ("y", "x + 1")]);
        let child = node_with(&mut graph, a, "child", &[("z", ".x"), ("x", "5"), ("w", "x")]);
        let b = node_with(&mut graph, root, "b", &[("v", "a.x * 10")]);
        graph.compile_all();

        assert_eq!(graph.rename_attr(a, "x", "count").unwrap(), "count");
        assert_eq!(source(&graph, a, "y"), "count + 1");
        assert_eq!(source(&graph, child, "z"), ".count");
        // the child's own `x` is a different attribute
        assert_eq!(source(&graph, child, "w"), "x");
        assert_eq!(source(&graph, b, "v"), "a.count * 10");
        assert_eq!(value(&mut graph, b, "v"), Value::Number(10.0));
    }

    #[test]
    fn test_copy_binds_to_copied_siblings() {
        let mut graph = Graph::new();
        let root = graph.root();
        let group = graph.add_node(root, "group", "layout").unwrap();
        let _src = node_with(&mut graph, group, "src", &[("x", "4")]);
        let _dst = node_with(&mut graph, group, "dst", &[("y", "src.x * 2")]);
        graph.compile_all();

        let copy = graph.copy_subtree(group, root).unwrap();
        assert_eq!(graph.node(copy).unwrap().name, "group1");

        let copied_src = graph.find_by_path("group1/src").unwrap();
        let copied_dst = graph.find_by_path("group1/dst").unwrap();
        graph
            .set_source(&AttrRef::new(copied_src, "x"), "100")
            .unwrap();
        graph.invalidate_values();
        assert_eq!(value(&mut graph, copied_dst, "y"), Value::Number(200.0));

        let original_dst = graph.find_by_path("group/dst").unwrap();
        assert_eq!(value(&mut graph, original_dst, "y"), Value::Number(8.0));
    }

    #[test]
    fn test_set_attr_value_edits_constants() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = node_with(&mut graph, root, "a", &[("on", "uiSwitch(0)"), ("sum", "1 + 2"), ("s", "\"x\"")]);
        let b = node_with(&mut graph, root, "b", &[("fwd", "a.on")]);
        graph.compile_all();
        assert_eq!(graph.node(a).unwrap().attr("on").unwrap().ui.fn_name, "switch");

        let changed = graph
            .set_attr_value(&AttrRef::new(b, "fwd"), &Value::Number(1.0))
            .unwrap();
        assert!(changed);
        assert_eq!(source(&graph, a, "on"), "uiSwitch(1)");
        assert_eq!(source(&graph, b, "fwd"), "a.on");

        graph
            .set_attr_value(&AttrRef::new(a, "sum"), &Value::Number(9.0))
            .unwrap();
        assert_eq!(source(&graph, a, "sum"), "9");

        graph
            .set_attr_value(&AttrRef::new(a, "s"), &Value::Text("y\"z".into()))
            .unwrap();
        assert_eq!(source(&graph, a, "s"), "\"y\\\"z\"");

        let unchanged = graph
            .set_attr_value(&AttrRef::new(a, "sum"), &Value::Number(9.0))
            .unwrap();
        assert!(!unchanged);
    }

    #[test]
    fn test_lenient_getters_write_defaults_back() {
        let mut graph = Graph::new();
        let root = graph.root();
        let a = node_with(&mut graph, root, "a", &[("n", "\"12\""), ("bad", "[1, 2]")]);
        graph.compile_all();

        assert_eq!(graph.attr_int(a, "n", 0), 12);
        assert_eq!(graph.attr_float(a, "bad", 2.5), 2.5);
        assert_eq!(source(&graph, a, "bad"), "2.5");
        assert!(graph.attr_bool(a, "missing", true));
        assert_eq!(source(&graph, a, "missing"), "1");
        assert_eq!(graph.attr_string(a, "label", "hi"), "hi");
        assert_eq!(source(&graph, a, "label"), "\"hi\"");
    }

    #[test]
    fn test_json_round_trip() {
        let mut graph = Graph::new();
        let root = graph.root();
        let group = graph.add_node(root, "group", "layout").unwrap();
        {
            let node = graph.node_mut(group).unwrap();
            node.cols.push(crate::types::ColRow::new(2.0, 5.0));
            node.bypass = true;
        }
        node_with(&mut graph, group, "a", &[("x", "1 + 2"), ("t", "\"hi\"")]);
        graph.compile_all();

        let json = graph.to_json().unwrap();
        let mut back = Graph::from_json(&json).unwrap();
        assert_eq!(back.to_save().unwrap(), graph.to_save().unwrap());

        let a = back.find_by_path("group/a").unwrap();
        assert_eq!(value(&mut back, a, "x"), Value::Number(3.0));
        let group = back.find_by_path("group").unwrap();
        assert!(back.node(group).unwrap().bypass);
        assert_eq!(back.node(group).unwrap().cols[0].max, 5.0);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphs/main.json");

        let mut graph = Graph::new();
        let root = graph.root();
        node_with(&mut graph, root, "a", &[("x", "42")]);
        graph.save(&path).await.unwrap();

        let mut loaded = Graph::load(&path).await.unwrap();
        let a = loaded.find_by_path("a").unwrap();
        assert_eq!(value(&mut loaded, a, "x"), Value::Number(42.0));
    }
}
