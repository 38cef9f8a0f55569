//! Expression lexer
//!
//! A single left-to-right scan that produces a token tree: every bracket
//! pair becomes a token whose `subs` hold the tokens between the brackets.
//! Offsets are byte positions into the source line.
//!
//! A `+`/`-` written directly in front of a digit is folded into the number
//! when it cannot be a binary operator, so `a - -2` and `min(1, -2)` lex as
//! expected while `a -2` stays a subtraction.

use crate::error::{Result, VmError};
use crate::ops;

/// Byte range inside an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `( ... )`, also used for the root group
    Round,
    /// `[ ... ]`
    Square,
    /// `{ ... }`
    Curly,
    Word,
    Op,
    Number,
    Quote,
    Dot,
    Comma,
    /// `:`
    Colon,
}

impl TokenKind {
    fn close_char(self) -> char {
        match self {
            TokenKind::Square => ']',
            TokenKind::Curly => '}',
            _ => ')',
        }
    }

    fn open_char(self) -> char {
        match self {
            TokenKind::Square => '[',
            TokenKind::Curly => '{',
            _ => '(',
        }
    }
}

/// Token, or token group for brackets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub subs: Vec<Token>,
}

impl Token {
    fn new(kind: TokenKind, start: usize, end: usize) -> Self {
        Self {
            kind,
            start,
            end,
            subs: Vec::new(),
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    /// Raw source text; quotes are returned without the surrounding `"`
    pub fn text<'a>(&self, line: &'a str) -> &'a str {
        let (mut st, mut en) = (self.start, self.end);
        if self.kind == TokenKind::Quote {
            st += 1;
            en = en.saturating_sub(1).max(st);
        }
        line.get(st..en).unwrap_or("")
    }

    pub fn is_keyword(&self, line: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(line).eq_ignore_ascii_case(keyword)
    }
}

/// Span covered by a run of sibling tokens
pub fn span_of(tokens: &[Token]) -> Span {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => Span::new(first.start, last.end),
        _ => Span::new(0, 0),
    }
}

/// Split a token run at top-level commas
///
/// An empty run has no parameters; `a,` has two, the second one empty.
pub fn split_params(tokens: &[Token]) -> Vec<&[Token]> {
    if tokens.is_empty() {
        return Vec::new();
    }
    tokens.split(|t| t.kind == TokenKind::Comma).collect()
}

fn is_word_letter(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

/// Tokenize one expression line into a root `Round` group
pub fn tokenize(line: &str) -> Result<Token> {
    let bytes = line.as_bytes();
    let mut stack: Vec<Token> = vec![Token::new(TokenKind::Round, 0, line.len())];
    let mut i = 0;

    while i < bytes.len() {
        let ch = bytes[i];
        match ch {
            b'"' => {
                let end = scan_quote(bytes, i)?;
                push(&mut stack, Token::new(TokenKind::Quote, i, end));
                i = end;
            }
            b'(' | b'[' | b'{' => {
                let kind = match ch {
                    b'(' => TokenKind::Round,
                    b'[' => TokenKind::Square,
                    _ => TokenKind::Curly,
                };
                stack.push(Token::new(kind, i, i));
                i += 1;
            }
            b')' | b']' | b'}' => {
                if stack.len() < 2 {
                    return Err(VmError::UnexpectedClose(ch as char));
                }
                let mut group = match stack.pop() {
                    Some(group) => group,
                    None => return Err(VmError::UnexpectedClose(ch as char)),
                };
                if group.kind.close_char() != ch as char {
                    return Err(VmError::UnexpectedClose(ch as char));
                }
                group.end = i + 1;
                push(&mut stack, group);
                i += 1;
            }
            b'.' => {
                push(&mut stack, Token::new(TokenKind::Dot, i, i + 1));
                i += 1;
            }
            b',' => {
                push(&mut stack, Token::new(TokenKind::Comma, i, i + 1));
                i += 1;
            }
            b':' => {
                push(&mut stack, Token::new(TokenKind::Colon, i, i + 1));
                i += 1;
            }
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            _ if is_word_letter(ch)
                || ch == b'$'
                || (ch == b'#' && bytes.get(i + 1) != Some(&b'=')) =>
            {
                let mut end = i + 1;
                while end < bytes.len() && (is_word_letter(bytes[end]) || bytes[end].is_ascii_digit()) {
                    end += 1;
                }
                push(&mut stack, Token::new(TokenKind::Word, i, end));
                i = end;
            }
            _ if ch.is_ascii_digit() => {
                let mut end = i + 1;
                let mut dot_used = false;
                while end < bytes.len() {
                    let c = bytes[end];
                    if c == b'.' && !dot_used {
                        dot_used = true;
                    } else if !c.is_ascii_digit() {
                        break;
                    }
                    end += 1;
                }
                let mut number = Token::new(TokenKind::Number, i, end);
                if let Some(group) = stack.last_mut() {
                    fold_unary(line, group, &mut number);
                }
                push(&mut stack, number);
                i = end;
            }
            _ => {
                let rest = line.get(i..).unwrap_or("");
                match ops::match_prefix(rest) {
                    Some(op) => {
                        let end = i + op.name.len();
                        push(&mut stack, Token::new(TokenKind::Op, i, end));
                        i = end;
                    }
                    None => return Err(VmError::UnknownSyntax),
                }
            }
        }
    }

    if stack.len() > 1 {
        let open = stack.last().map(|t| t.kind.open_char()).unwrap_or('(');
        return Err(VmError::BracketNotClosed(open));
    }
    stack.pop().ok_or(VmError::UnknownSyntax)
}

fn push(stack: &mut [Token], token: Token) {
    if let Some(group) = stack.last_mut() {
        group.subs.push(token);
    }
}

/// End offset (exclusive) of the quote starting at `start`
fn scan_quote(bytes: &[u8], start: usize) -> Result<usize> {
    let mut escaped = false;
    let mut j = start + 1;
    while j < bytes.len() {
        let c = bytes[j];
        if escaped {
            escaped = false;
        } else if c == b'\\' {
            escaped = true;
        } else if c == b'"' {
            return Ok(j + 1);
        }
        j += 1;
    }
    Err(VmError::QuoteNotClosed('"'))
}

/// Fold a directly preceding `+`/`-` into `number`
///
/// The sign is folded when the token before it is another operator or the
/// `return` keyword, or when fewer than two tokens sit between the last
/// comma (or the group start) and the number.
fn fold_unary(line: &str, group: &mut Token, number: &mut Token) {
    let n = group.subs.len();
    let Some(prev) = group.subs.last() else {
        return;
    };
    let sign = prev.kind == TokenKind::Op
        && matches!(prev.text(line), "+" | "-")
        && prev.start + 1 == number.start;
    if !sign {
        return;
    }

    let pre_pre_op = n > 1 && {
        let pp = &group.subs[n - 2];
        pp.kind == TokenKind::Op || pp.is_keyword(line, "return")
    };
    let since_comma = group
        .subs
        .iter()
        .rev()
        .take_while(|t| t.kind != TokenKind::Comma)
        .count();

    if pre_pre_op || since_comma < 2 {
        group.subs.pop();
        number.start -= 1;
    }
}

/// Decode a quote token's body: `\"`, `\\`, `\n`, `\t`, `\r`, `\/`
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
