//! Source-level view of attribute accesses
//!
//! Renames rewrite expression text instead of compiled programs, so the
//! graph can rename a node or attribute and then recompile everything. Sites
//! are found on the token tree, which keeps quotes and function names out of
//! the rewrite.

use crate::instr::replace_spans;
use crate::lexer::{self, Span, Token, TokenKind};

/// Which node an access site names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessTarget {
    /// `attr`
    SameNode,
    /// `.attr`
    Parent,
    /// `node.attr`
    Named(String),
}

/// One `attr`, `.attr` or `node.attr` occurrence in an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessSite {
    pub target: AccessTarget,
    pub node_span: Option<Span>,
    pub attr: String,
    pub attr_span: Span,
}

/// Every access site in `line`; a line that fails to lex has none
pub fn access_sites(line: &str) -> Vec<AccessSite> {
    let mut out = Vec::new();
    if let Ok(root) = lexer::tokenize(line) {
        collect(line, &root.subs, &mut out);
    }
    out
}

fn collect(line: &str, tokens: &[Token], out: &mut Vec<AccessSite>) {
    let kind_at = |i: usize| tokens.get(i).map(|t| t.kind);
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        match token.kind {
            TokenKind::Round | TokenKind::Square | TokenKind::Curly => {
                collect(line, &token.subs, out);
                i += 1;
            }
            TokenKind::Word if kind_at(i + 1) == Some(TokenKind::Round) => {
                // function name
                i += 1;
            }
            TokenKind::Word
                if kind_at(i + 1) == Some(TokenKind::Dot) && kind_at(i + 2) == Some(TokenKind::Word) =>
            {
                let attr = &tokens[i + 2];
                out.push(AccessSite {
                    target: AccessTarget::Named(token.text(line).to_string()),
                    node_span: Some(token.span()),
                    attr: attr.text(line).to_string(),
                    attr_span: attr.span(),
                });
                i += 3;
            }
            TokenKind::Word => {
                out.push(AccessSite {
                    target: AccessTarget::SameNode,
                    node_span: None,
                    attr: token.text(line).to_string(),
                    attr_span: token.span(),
                });
                i += 1;
            }
            TokenKind::Dot if kind_at(i + 1) == Some(TokenKind::Word) => {
                let attr = &tokens[i + 1];
                out.push(AccessSite {
                    target: AccessTarget::Parent,
                    node_span: None,
                    attr: attr.text(line).to_string(),
                    attr_span: attr.span(),
                });
                i += 2;
            }
            _ => i += 1,
        }
    }
}

/// Rewrite every `old.attr` into `new.attr`
pub fn rename_node_refs(line: &str, old: &str, new: &str) -> String {
    let edits: Vec<(Span, String)> = access_sites(line)
        .into_iter()
        .filter_map(|site| match (&site.target, site.node_span) {
            (AccessTarget::Named(name), Some(span)) if name == old => Some((span, new.to_string())),
            _ => None,
        })
        .collect();
    if edits.is_empty() {
        return line.to_string();
    }
    replace_spans(line, edits)
}

/// Rewrite accesses of attribute `old` whose target passes `owned`
pub fn rename_attr_refs(
    line: &str,
    old: &str,
    new: &str,
    owned: impl Fn(&AccessTarget) -> bool,
) -> String {
    let edits: Vec<(Span, String)> = access_sites(line)
        .into_iter()
        .filter(|site| site.attr == old && owned(&site.target))
        .map(|site| (site.attr_span, new.to_string()))
        .collect();
    if edits.is_empty() {
        return line.to_string();
    }
    replace_spans(line, edits)
}
