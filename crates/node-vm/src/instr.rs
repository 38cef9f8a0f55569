//! Instruction tree and compiled programs
//!
//! A [`Program`] is the result of compiling one attribute's source: an
//! optional instruction tree, the attributes it reads, and every error the
//! parser reported. Evaluation walks the tree bottom-up with no step limit,
//! so cyclic references have to be rejected before a program runs.

use crate::apis::Api;
use crate::lexer::Span;
use crate::ops::BinaryOp;
use crate::parser;
use crate::scope::{AttrRef, Scope, ValueSource};
use crate::value::{Table, Value};

/// One node of the instruction tree
#[derive(Debug, Clone)]
pub enum Instr {
    Constant {
        value: Value,
        span: Span,
    },
    Bracket {
        inner: Box<Instr>,
        span: Span,
    },
    Access {
        target: AttrRef,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Instr>,
        right: Box<Instr>,
        span: Span,
    },
    Call {
        api: &'static Api,
        params: Vec<Instr>,
        span: Span,
    },
    Array {
        items: Vec<Instr>,
        span: Span,
    },
    Table {
        entries: Vec<(String, Instr)>,
        span: Span,
    },
}

/// Lazily evaluated call parameters
pub struct Args<'a> {
    params: &'a [Instr],
    source: &'a mut dyn ValueSource,
}

impl<'a> Args<'a> {
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Evaluate parameter `i`; a missing parameter is the empty value
    pub fn value(&mut self, i: usize) -> Value {
        let params = self.params;
        match params.get(i) {
            Some(param) => param.exec(&mut *self.source),
            None => Value::default(),
        }
    }

    pub fn number(&mut self, i: usize) -> f64 {
        self.value(i).as_number()
    }
}

impl Instr {
    pub fn span(&self) -> Span {
        match self {
            Instr::Constant { span, .. }
            | Instr::Bracket { span, .. }
            | Instr::Access { span, .. }
            | Instr::Binary { span, .. }
            | Instr::Call { span, .. }
            | Instr::Array { span, .. }
            | Instr::Table { span, .. } => *span,
        }
    }

    /// Evaluate this instruction
    pub fn exec(&self, source: &mut dyn ValueSource) -> Value {
        match self {
            Instr::Constant { value, .. } => value.clone(),
            Instr::Bracket { inner, .. } => inner.exec(source),
            Instr::Access { target, .. } => source.read(target),
            Instr::Binary {
                op, left, right, ..
            } => match op {
                BinaryOp::And => {
                    let is = left.exec(source).is_truthy() && right.exec(source).is_truthy();
                    Value::from_bool(is)
                }
                BinaryOp::Or => {
                    let is = left.exec(source).is_truthy() || right.exec(source).is_truthy();
                    Value::from_bool(is)
                }
                _ => {
                    let l = left.exec(source);
                    let r = right.exec(source);
                    op.apply(&l, &r)
                }
            },
            Instr::Call { api, params, .. } => {
                let mut args = Args {
                    params: params.as_slice(),
                    source,
                };
                (api.func)(&mut args)
            }
            Instr::Array { items, .. } => {
                Value::Array(items.iter().map(|item| item.exec(source)).collect())
            }
            Instr::Table { entries, .. } => {
                let mut table = Table::new(entries.iter().map(|(k, _)| k.clone()).collect());
                let row: Vec<Value> = entries.iter().map(|(_, v)| v.exec(source)).collect();
                table.push_row(row);
                Value::Table(table)
            }
        }
    }
}

/// Where a value written into an attribute should land in its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    /// Replace this constant inside the expression
    Span(Span),
    /// The expression only forwards another attribute; write there instead
    Attr(AttrRef),
    /// Replace the whole source
    Whole,
}

/// Compiled expression of one attribute
#[derive(Debug, Clone, Default)]
pub struct Program {
    root: Option<Instr>,
    deps: Vec<AttrRef>,
    errors: Vec<String>,
}

impl Program {
    pub(crate) fn new(root: Option<Instr>, deps: Vec<AttrRef>, errors: Vec<String>) -> Self {
        Self { root, deps, errors }
    }

    pub(crate) fn failed(error: String) -> Self {
        Self {
            root: None,
            deps: Vec::new(),
            errors: vec![error],
        }
    }

    /// Compile `source` resolving names through `scope`
    pub fn compile(source: &str, scope: &dyn Scope) -> Self {
        parser::parse(source, scope)
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.root.is_some()
    }

    /// First reported error, the one shown on the attribute
    pub fn error(&self) -> Option<&str> {
        match self.errors.first() {
            Some(err) => Some(err.as_str()),
            None if self.root.is_none() => Some("Empty expression"),
            None => None,
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Attributes read by this program, without duplicates
    pub fn deps(&self) -> &[AttrRef] {
        &self.deps
    }

    pub fn root(&self) -> Option<&Instr> {
        self.root.as_ref()
    }

    /// Evaluate; a program that failed to compile yields the empty value
    pub fn exec(&self, source: &mut dyn ValueSource) -> Value {
        match &self.root {
            Some(root) if self.errors.is_empty() => root.exec(source),
            _ => Value::default(),
        }
    }

    /// Widget hint from an outermost `ui*` helper call
    pub fn ui_hint(&self) -> Option<&'static str> {
        let mut instr = self.root.as_ref()?;
        loop {
            match instr {
                Instr::Call { api, .. } if api.ui => return Some(api.name),
                Instr::Bracket { inner, .. } => instr = inner.as_ref(),
                _ => return None,
            }
        }
    }

    /// Constant the value of this attribute can be edited through
    pub fn edit_target(&self) -> EditTarget {
        let Some(mut instr) = self.root.as_ref() else {
            return EditTarget::Whole;
        };
        loop {
            match instr {
                Instr::Constant { span, .. } => return EditTarget::Span(*span),
                Instr::Access { target, .. } => return EditTarget::Attr(target.clone()),
                Instr::Bracket { inner, .. } => instr = inner.as_ref(),
                Instr::Call { api, params, .. } if api.ui => match params.first() {
                    Some(first) => instr = first,
                    None => return EditTarget::Whole,
                },
                _ => return EditTarget::Whole,
            }
        }
    }
}

/// Replace byte ranges of `line`; spans must not overlap
pub fn replace_spans(line: &str, mut edits: Vec<(Span, String)>) -> String {
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = line.to_string();
    for (span, text) in edits {
        if span.start <= span.end && span.end <= out.len() {
            out.replace_range(span.start..span.end, &text);
        }
    }
    out
}
