//! Recursive-descent parser over the lexer's token tree
//!
//! Each token run is tried as, in order:
//! - a binary split at the loosest top-level operator
//! - a bracket `( ... )`
//! - a call `name(args...)`
//! - a constant: number, quote, `[array]` or `{"key": value}` table
//! - an access: `attr`, `node.attr` or `.attr`
//!
//! Errors do not stop the parse; every one is collected on the [`Program`].

use crate::apis;
use crate::instr::{Instr, Program};
use crate::lexer::{self, span_of, split_params, Token, TokenKind};
use crate::ops::{self, Operator};
use crate::scope::{is_output_attr, AttrRef, NodeId, Scope};
use crate::value::Value;

pub(crate) fn parse(line: &str, scope: &dyn Scope) -> Program {
    let root = match lexer::tokenize(line) {
        Ok(root) => root,
        Err(err) => return Program::failed(err.to_string()),
    };

    let mut parser = Parser {
        line,
        scope,
        errors: Vec::new(),
        deps: Vec::new(),
    };
    let instr = parser.expr(&root.subs);
    Program::new(instr, parser.deps, parser.errors)
}

struct Parser<'a> {
    line: &'a str,
    scope: &'a dyn Scope,
    errors: Vec<String>,
    deps: Vec<AttrRef>,
}

impl<'a> Parser<'a> {
    fn error<T>(&mut self, msg: impl Into<String>) -> Option<T> {
        self.errors.push(msg.into());
        None
    }

    fn text(&self, token: &Token) -> &'a str {
        token.text(self.line)
    }

    /// Top-level operator to split at: loosest binding, rightmost on ties
    /// unless the later operator has a shorter name
    fn find_op(&self, tokens: &[Token]) -> Option<(usize, &'static Operator)> {
        let mut best: Option<(usize, &'static Operator)> = None;
        for (i, token) in tokens.iter().enumerate() {
            if token.kind != TokenKind::Op {
                continue;
            }
            let Some(op) = ops::find(self.text(token)) else {
                continue;
            };
            match best {
                Some((_, current)) if !op.splits_over(current) => {}
                _ => best = Some((i, op)),
            }
        }
        best
    }

    fn expr(&mut self, tokens: &[Token]) -> Option<Instr> {
        if tokens.is_empty() {
            return self.error("Empty expression");
        }

        if let Some((i, op)) = self.find_op(tokens) {
            if i == 0 {
                return self.error("Missing left side");
            }
            if i + 1 == tokens.len() {
                return self.error("Right side is missing");
            }
            let left = self.expr(&tokens[..i]);
            let right = self.expr(&tokens[i + 1..]);
            return Some(Instr::Binary {
                op: op.op,
                left: Box::new(left?),
                right: Box::new(right?),
                span: span_of(tokens),
            });
        }

        if tokens.len() == 1 && tokens[0].kind == TokenKind::Round {
            let inner = self.expr(&tokens[0].subs)?;
            return Some(Instr::Bracket {
                inner: Box::new(inner),
                span: tokens[0].span(),
            });
        }

        if tokens.len() >= 2 && tokens[0].kind == TokenKind::Word && tokens[1].kind == TokenKind::Round {
            return self.call(tokens);
        }

        if tokens.len() == 1 {
            if let Some(constant) = self.constant(&tokens[0]) {
                return constant;
            }
        }

        self.access(tokens)
    }

    fn call(&mut self, tokens: &[Token]) -> Option<Instr> {
        let name = self.text(&tokens[0]);
        let Some(api) = apis::find(name) else {
            return self.error(format!("Function({}) not found", name));
        };
        if tokens.len() > 2 {
            return self.error("Unexpected tokens after function call");
        }

        let params = self.params(&tokens[1].subs)?;
        if params.len() != api.params {
            return self.error(format!("Need exactly {} parameter(s)", api.params));
        }
        Some(Instr::Call {
            api,
            params,
            span: span_of(tokens),
        })
    }

    fn params(&mut self, tokens: &[Token]) -> Option<Vec<Instr>> {
        let mut out = Vec::new();
        for param in split_params(tokens) {
            if param.is_empty() {
                self.errors.push("Empty parameter".to_string());
                return None;
            }
            out.push(self.expr(param)?);
        }
        Some(out)
    }

    /// `Some(..)` when the token is a constant form, even if it failed to parse
    fn constant(&mut self, token: &Token) -> Option<Option<Instr>> {
        let span = token.span();
        let parsed = match token.kind {
            TokenKind::Number => match self.text(token).parse::<f64>() {
                Ok(n) => Some(Instr::Constant {
                    value: Value::Number(n),
                    span,
                }),
                Err(_) => self.error("Converting string to number failed"),
            },
            TokenKind::Quote => Some(Instr::Constant {
                value: Value::Text(lexer::unescape(self.text(token))),
                span,
            }),
            TokenKind::Square => self
                .params(&token.subs)
                .map(|items| Instr::Array { items, span }),
            TokenKind::Curly => self.table(token),
            _ => return None,
        };
        Some(parsed)
    }

    fn table(&mut self, token: &Token) -> Option<Instr> {
        let mut entries = Vec::new();
        for param in split_params(&token.subs) {
            if param.is_empty() {
                return self.error("Empty parameter");
            }
            if param.len() < 3 {
                return self.error("Invalid \"key\" : value");
            }
            if param[0].kind != TokenKind::Quote {
                return self.error("\"Key\" must be in quotes");
            }
            if param[1].kind != TokenKind::Colon {
                return self.error("Missing ':'");
            }
            let key = lexer::unescape(self.text(&param[0]));
            let value = self.expr(&param[2..])?;
            entries.push((key, value));
        }
        Some(Instr::Table {
            entries,
            span: token.span(),
        })
    }

    fn access(&mut self, tokens: &[Token]) -> Option<Instr> {
        let span = span_of(tokens);
        let (node, attr) = match tokens[0].kind {
            TokenKind::Word if tokens.len() == 1 => (self.scope.current_node(), self.text(&tokens[0])),
            TokenKind::Word => {
                if tokens[1].kind != TokenKind::Dot {
                    return self.error("Missing '.'");
                }
                if tokens.len() < 3 || tokens[2].kind != TokenKind::Word {
                    return self.error("Missing attribute");
                }
                if tokens.len() > 3 {
                    return self.error("Access must be in form of <node>.<attribute> or .<attribute>");
                }
                let name = self.text(&tokens[0]);
                match self.scope.resolve_node(name) {
                    Some(node) => (node, self.text(&tokens[2])),
                    None => return self.error(format!("Node({}) not found", name)),
                }
            }
            TokenKind::Dot => {
                if tokens.len() < 2 || tokens[1].kind != TokenKind::Word {
                    return self.error("Missing attribute");
                }
                if tokens.len() > 2 {
                    return self.error("Access must be in form of <node>.<attribute> or .<attribute>");
                }
                let node = self
                    .scope
                    .parent_node()
                    .unwrap_or_else(|| self.scope.current_node());
                (node, self.text(&tokens[1]))
            }
            _ => return self.error("Unrecognized syntax"),
        };

        let target = self.access_attr(node, attr)?;
        Some(Instr::Access { target, span })
    }

    fn access_attr(&mut self, node: NodeId, attr: &str) -> Option<AttrRef> {
        if !self.scope.has_attr(node, attr) {
            return self.error(format!("Attribute({}) not found", attr));
        }
        if node == self.scope.current_node() && is_output_attr(attr) {
            return self.error(format!("Can not read output attribute({}) from same node", attr));
        }
        let target = AttrRef::new(node, attr);
        if !self.deps.contains(&target) {
            self.deps.push(target.clone());
        }
        Some(target)
    }
}
