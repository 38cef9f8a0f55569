//! Plain data types shared by the graph, scheduler and persistence
//!
//! These carry no behavior beyond defaults and are serialized as part of the
//! graph file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-pass execution state of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Waiting,
    Running,
    Done,
}

/// Column or row sizing of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColRow {
    pub min: f64,
    pub max: f64,
    pub resize: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resize_name: String,
}

impl Default for ColRow {
    fn default() -> Self {
        Self {
            min: 1.0,
            max: 1.0,
            resize: 1.0,
            resize_name: String::new(),
        }
    }
}

impl ColRow {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            ..Default::default()
        }
    }
}

/// Editor position of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// UI metadata of an attribute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttrUi {
    /// Widget hint, empty for a plain editbox
    #[serde(rename = "fn", skip_serializing_if = "String::is_empty")]
    pub fn_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    pub visible: bool,
    pub read_only: bool,
}

impl AttrUi {
    pub fn widget(fn_name: &str) -> Self {
        Self {
            fn_name: fn_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colrow_defaults_fill_missing_fields() {
        let cr: ColRow = serde_json::from_str(r#"{"max": 5}"#).unwrap();
        assert_eq!(cr.min, 1.0);
        assert_eq!(cr.max, 5.0);
        assert_eq!(cr.resize, 1.0);
        assert!(cr.resize_name.is_empty());
    }

    #[test]
    fn test_attr_ui_uses_fn_key() {
        let ui = AttrUi::widget("combo").with_param("labels", "a;b");
        let json = serde_json::to_value(&ui).unwrap();
        assert_eq!(json["fn"], "combo");
        assert_eq!(json["params"]["labels"], "a;b");

        let empty = serde_json::to_value(AttrUi::default()).unwrap();
        assert!(empty.get("fn").is_none());
    }
}
