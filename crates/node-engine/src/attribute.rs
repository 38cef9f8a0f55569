//! Node attributes
//!
//! Every attribute source is an expression: numbers are written as-is and
//! text is quoted. The graph compiles sources into [`Program`]s and keeps the
//! evaluated value memoized for the rest of the pass.

use serde::{Deserialize, Serialize};

use node_vm::{is_output_attr, Program, Value};

use crate::types::AttrUi;

/// One named attribute owned by a node
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    /// Expression text
    pub source: String,
    pub show_exp: bool,
    pub ui: AttrUi,
    pub(crate) program: Option<Program>,
    /// Memoized value for the current pass
    pub(crate) value: Option<Value>,
    /// Value written by the node body, overrides the source
    pub(crate) output: Option<Value>,
    /// Set by compilation or the loop check; blocks evaluation
    pub compile_error: Option<String>,
    pub exe_error: Option<String>,
    pub(crate) used: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            show_exp: false,
            ui: AttrUi::default(),
            program: None,
            value: None,
            output: None,
            compile_error: None,
            exe_error: None,
            used: false,
        }
    }

    pub fn with_ui(mut self, ui: AttrUi) -> Self {
        self.ui = ui;
        self
    }

    pub fn is_output(&self) -> bool {
        is_output_attr(&self.name)
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    /// Value computed in the current pass, if it was evaluated
    pub fn cached_value(&self) -> Option<&Value> {
        self.output.as_ref().or(self.value.as_ref())
    }

    /// Error shown on the attribute, compile errors first
    pub fn error(&self) -> Option<&str> {
        self.compile_error.as_deref().or(self.exe_error.as_deref())
    }

    /// Install the result of compiling `source`
    pub(crate) fn set_program(&mut self, program: Option<Program>) {
        self.compile_error = program
            .as_ref()
            .and_then(|p| p.error())
            .map(str::to_string);
        if let Some(hint) = program.as_ref().and_then(Program::ui_hint) {
            self.ui.fn_name = widget_name(hint);
        }
        self.program = program;
        self.value = None;
    }

    /// Replace the source; returns true when it changed
    pub(crate) fn set_source(&mut self, source: String) -> bool {
        self.output = None;
        if self.source == source {
            return false;
        }
        self.source = source;
        self.value = None;
        true
    }

    /// Store a value produced by the node body
    ///
    /// Text and numbers are also written into the source so they persist.
    /// Returns true when the value differs from the previous output.
    pub(crate) fn set_output(&mut self, value: Value) -> bool {
        let changed = self.output.as_ref() != Some(&value);
        if matches!(value, Value::Number(_) | Value::Text(_)) {
            self.source = value.to_literal();
        }
        self.output = Some(value);
        self.value = None;
        changed
    }

    pub(crate) fn to_save(&self) -> AttrSave {
        AttrSave {
            name: self.name.clone(),
            value: self.source.clone(),
            show_exp: self.show_exp,
            ui: self.ui.clone(),
        }
    }

    pub(crate) fn from_save(save: AttrSave) -> Self {
        let mut attr = Self::new(save.name, save.value);
        attr.show_exp = save.show_exp;
        attr.ui = save.ui;
        attr
    }
}

/// `uiCombo` -> `combo`
fn widget_name(hint: &str) -> String {
    let name = hint
        .get(..2)
        .filter(|prefix| prefix.eq_ignore_ascii_case("ui"))
        .map(|_| &hint[2..])
        .unwrap_or(hint);
    name.to_ascii_lowercase()
}

/// Persisted form of an attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrSave {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default)]
    pub show_exp: bool,
    #[serde(default, skip_serializing_if = "AttrUi::is_empty")]
    pub ui: AttrUi,
}

/// Strip characters an attribute name can't contain
pub fn sanitize_attr_name(name: &str) -> String {
    let name: String = name
        .chars()
        .filter(|c| !matches!(c, '.' | ' ' | '\t' | '\n' | '\r'))
        .collect();
    if name.is_empty() {
        "attr".to_string()
    } else {
        name
    }
}
