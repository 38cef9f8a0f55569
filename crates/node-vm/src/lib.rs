//! Node VM - value model and expression language for node attributes
//!
//! Every attribute of a node holds source text that is either a literal or
//! an expression over other attributes. This crate turns that text into a
//! [`Program`] and evaluates it:
//!
//! - `lexer`: token tree with the unary sign folding rule
//! - `ops` / `apis`: operator and built-in function tables
//! - `parser`: recursive descent into an [`Instr`] tree
//! - `instr`: tree-walking interpreter
//! - `access`: source-level access sites, used for renames
//!
//! # Example
//!
//! ```ignore
//! use node_vm::{Program, Value};
//!
//! let program = Program::compile("1 + 2 * 3", &scope);
//! assert_eq!(program.exec(&mut values), Value::Number(7.0));
//! ```

pub mod access;
pub mod apis;
pub mod error;
pub mod instr;
pub mod lexer;
pub mod ops;
mod parser;
pub mod scope;
pub mod value;

// Re-export key types
pub use access::{access_sites, rename_attr_refs, rename_node_refs, AccessSite, AccessTarget};
pub use error::{Result, VmError};
pub use instr::{replace_spans, EditTarget, Instr, Program};
pub use lexer::Span;
pub use scope::{is_output_attr, AttrRef, NodeId, Scope, ValueSource};
pub use value::{quote_text, Blob, Table, Value};
