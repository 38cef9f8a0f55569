//! Undo/redo using compressed graph snapshots
//!
//! Each checkpoint stores the persisted form of the whole graph as
//! zstd-compressed JSON. Restoring a snapshot rebuilds and recompiles the
//! graph, so no edit needs an inverse operation.

use std::collections::VecDeque;

use crate::error::{NodeEngineError, Result};
use crate::graph::Graph;
use crate::node::NodeSave;

/// Undo/redo stack of compressed snapshots
pub struct UndoStack {
    snapshots: VecDeque<Vec<u8>>,
    /// Position of the state the graph is in
    current: usize,
    max_snapshots: usize,
}

impl UndoStack {
    /// Create a stack that keeps at most `max_snapshots` states
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            current: 0,
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Record the graph state
    ///
    /// Drops any redo history. Returns false when the state equals the
    /// current snapshot and nothing was recorded.
    pub fn push(&mut self, graph: &Graph) -> Result<bool> {
        let json = serde_json::to_vec(&graph.to_save()?)?;
        let compressed = zstd::encode_all(&json[..], 3)
            .map_err(|e| NodeEngineError::Compression(e.to_string()))?;

        if self.snapshots.get(self.current) == Some(&compressed) {
            return Ok(false);
        }

        while self.snapshots.len() > self.current + 1 {
            self.snapshots.pop_back();
        }

        self.snapshots.push_back(compressed);
        self.current = self.snapshots.len() - 1;

        while self.snapshots.len() > self.max_snapshots {
            self.snapshots.pop_front();
            if self.current > 0 {
                self.current -= 1;
            }
        }

        Ok(true)
    }

    /// Previous graph state, or None if at the beginning
    pub fn undo(&mut self) -> Option<Result<Graph>> {
        if self.current > 0 {
            self.current -= 1;
            Some(self.decompress(self.current))
        } else {
            None
        }
    }

    /// Next graph state, or None if at the end
    pub fn redo(&mut self) -> Option<Result<Graph>> {
        if self.current + 1 < self.snapshots.len() {
            self.current += 1;
            Some(self.decompress(self.current))
        } else {
            None
        }
    }

    /// Current graph state without moving in the stack
    pub fn current(&self) -> Option<Result<Graph>> {
        if self.snapshots.is_empty() {
            None
        } else {
            Some(self.decompress(self.current))
        }
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.snapshots.len()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check if the stack is empty
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Drop all snapshots
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.current = 0;
    }

    /// Total compressed size of all snapshots
    pub fn compressed_size(&self) -> usize {
        self.snapshots.iter().map(|s| s.len()).sum()
    }

    fn decompress(&self, index: usize) -> Result<Graph> {
        let compressed = &self.snapshots[index];
        let json = zstd::decode_all(&compressed[..])
            .map_err(|e| NodeEngineError::Compression(e.to_string()))?;
        let save: NodeSave = serde_json::from_slice(&json)?;
        Graph::from_save(save)
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_graph(name: &str) -> Graph {
        let mut graph = Graph::new();
        let root = graph.root();
        graph.add_node(root, name, "vars").unwrap();
        graph
    }

    fn first_name(graph: &Graph) -> String {
        let root = graph.node(graph.root()).unwrap();
        graph.node(root.subs[0]).unwrap().name.clone()
    }

    #[test]
    fn test_push_and_undo() {
        let mut stack = UndoStack::new(10);

        stack.push(&make_graph("first")).unwrap();
        stack.push(&make_graph("second")).unwrap();
        stack.push(&make_graph("third")).unwrap();

        let current = stack.current().unwrap().unwrap();
        assert_eq!(first_name(&current), "third");

        let undone = stack.undo().unwrap().unwrap();
        assert_eq!(first_name(&undone), "second");

        let undone = stack.undo().unwrap().unwrap();
        assert_eq!(first_name(&undone), "first");

        assert!(stack.undo().is_none());
    }

    #[test]
    fn test_redo() {
        let mut stack = UndoStack::new(10);

        stack.push(&make_graph("first")).unwrap();
        stack.push(&make_graph("second")).unwrap();

        stack.undo();

        let redone = stack.redo().unwrap().unwrap();
        assert_eq!(first_name(&redone), "second");
        assert!(stack.redo().is_none());
    }

    #[test]
    fn test_push_truncates_redo() {
        let mut stack = UndoStack::new(10);

        stack.push(&make_graph("first")).unwrap();
        stack.push(&make_graph("second")).unwrap();
        stack.undo();

        stack.push(&make_graph("third")).unwrap();
        assert!(!stack.can_redo());

        let current = stack.current().unwrap().unwrap();
        assert_eq!(first_name(&current), "third");
    }

    #[test]
    fn test_identical_state_is_not_recorded() {
        let mut stack = UndoStack::new(10);
        assert!(stack.push(&make_graph("same")).unwrap());
        assert!(!stack.push(&make_graph("same")).unwrap());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_max_snapshots() {
        let mut stack = UndoStack::new(3);

        for i in 0..5 {
            stack.push(&make_graph(&format!("graph_{}", i))).unwrap();
        }

        assert_eq!(stack.len(), 3);
        let current = stack.current().unwrap().unwrap();
        assert_eq!(first_name(&current), "graph_4");

        stack.undo();
        stack.undo();
        assert!(!stack.can_undo());
        assert!(stack.compressed_size() > 0);
    }

    #[test]
    fn test_clear() {
        let mut stack = UndoStack::new(10);
        assert!(stack.is_empty());
        assert!(stack.current().is_none());

        stack.push(&make_graph("first")).unwrap();
        stack.push(&make_graph("second")).unwrap();
        assert!(stack.can_undo());

        stack.clear();
        assert!(stack.is_empty());
        assert_eq!(stack.len(), 0);
        assert!(!stack.can_undo());
        assert!(!stack.can_redo());
        assert_eq!(stack.compressed_size(), 0);
    }
}
