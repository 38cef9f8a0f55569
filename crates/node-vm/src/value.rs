//! Runtime value model
//!
//! Every attribute resolves to a [`Value`]. The variant is explicit, and
//! conversions between variants are lenient: a mismatch degrades to a zero or
//! empty value and logs a warning instead of failing.
//!
//! Only `Number`, `Text` and `Blob` can be written back into an attribute's
//! literal source. `Array` and `Table` are produced by the VM during a pass.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Binary data with a content hash
///
/// The hash is computed once on construction and is what collaborators use
/// as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    data: Vec<u8>,
    hash: String,
}

impl Blob {
    /// Wrap bytes and compute their blake3 hash
    pub fn new(data: Vec<u8>) -> Self {
        let hash = blake3::hash(&data).to_hex().to_string();
        Self { data, hash }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Hex-encoded blake3 hash of the content
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for Blob {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Named columns by rows of values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, padding or truncating it to the column count
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::default());
        self.rows.push(row);
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Cell by row index and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    fn row_json(&self, row: &[Value]) -> serde_json::Value {
        let map = self
            .columns
            .iter()
            .zip(row.iter())
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Rows as a JSON array of objects
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.rows.iter().map(|r| self.row_json(r)).collect())
    }
}

/// Tagged runtime value of an attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Number(f64),
    Text(String),
    Blob(Blob),
    Array(Vec<Value>),
    Table(Table),
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl Value {
    /// Booleans are numbers: 1 or 0
    pub fn from_bool(value: bool) -> Self {
        Value::Number(if value { 1.0 } else { 0.0 })
    }

    pub fn blob(data: Vec<u8>) -> Self {
        Value::Blob(Blob::new(data))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Value::Blob(_))
    }

    /// Whether the value can live in an attribute's literal source
    pub fn is_persistable(&self) -> bool {
        matches!(self, Value::Number(_) | Value::Text(_) | Value::Blob(_))
    }

    /// Truthiness used by `if`, `not`, `&&` and `||`
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Blob(b) => !b.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Table(t) => !t.rows.is_empty(),
        }
    }

    /// Numeric view; unparsable text is 0
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Text(s) => s.parse::<f64>().unwrap_or(0.0),
            other => {
                log::warn!("Unknown conversion of {} into Number", other.kind_name());
                0.0
            }
        }
    }

    pub fn as_int(&self) -> i64 {
        self.as_number() as i64
    }

    pub fn as_bool(&self) -> bool {
        self.as_int() != 0
    }

    /// Text view; numbers use the shortest round-trip decimal form
    pub fn as_text(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Blob(b) => String::from_utf8_lossy(b.data()).into_owned(),
            Value::Array(_) | Value::Table(_) => self.to_json().to_string(),
        }
    }

    /// Binary view; arrays and tables become their JSON text
    pub fn to_blob(&self) -> Blob {
        match self {
            Value::Blob(b) => b.clone(),
            Value::Text(s) => Blob::new(s.as_bytes().to_vec()),
            Value::Array(_) | Value::Table(_) => Blob::new(self.to_json().to_string().into_bytes()),
            Value::Number(_) => Blob::new(Vec::new()),
        }
    }

    /// Three-way comparison
    ///
    /// Same variants compare directly. Mixed variants compare as numbers when
    /// either side is a number, otherwise as text. Two empty values are equal.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => cmp_f64(*a, *b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.data().cmp(b.data()),
            (Value::Array(_), Value::Array(_)) | (Value::Table(_), Value::Table(_)) => {
                self.as_text().cmp(&other.as_text())
            }
            _ if self.is_number() || other.is_number() => {
                cmp_f64(self.as_number(), other.as_number())
            }
            _ if self.is_text() || other.is_text() => self.as_text().cmp(&other.as_text()),
            _ => {
                if !self.is_truthy() && !other.is_truthy() {
                    Ordering::Equal
                } else {
                    Ordering::Greater
                }
            }
        }
    }

    /// JSON form, used for persistence of outputs and worker transfer
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Number(n) => number_json(*n),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Blob(b) => serde_json::Value::String(String::from_utf8_lossy(b.data()).into_owned()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Table(t) => t.to_json(),
        }
    }

    /// Inverse of [`Value::to_json`]; an object becomes a one-row table
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::default(),
            serde_json::Value::Bool(b) => Value::from_bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                let mut table = Table::new(map.keys().cloned().collect());
                table.push_row(map.values().map(Value::from_json).collect());
                Value::Table(table)
            }
        }
    }

    /// Expression text that evaluates back to this value
    pub fn to_literal(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => quote_text(s),
            Value::Blob(b) => {
                let text = String::from_utf8_lossy(b.data());
                if text.starts_with('{') || text.starts_with('[') {
                    text.into_owned()
                } else {
                    quote_text(&text)
                }
            }
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_literal).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Table(t) => {
                let rows: Vec<String> = t
                    .rows
                    .iter()
                    .map(|row| {
                        let cells: Vec<String> = t
                            .columns
                            .iter()
                            .zip(row.iter())
                            .map(|(k, v)| format!("{}: {}", quote_text(k), v.to_literal()))
                            .collect();
                        format!("{{{}}}", cells.join(", "))
                    })
                    .collect();
                if rows.len() == 1 {
                    rows.into_iter().next().unwrap_or_default()
                } else {
                    format!("[{}]", rows.join(", "))
                }
            }
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "Number",
            Value::Text(_) => "Text",
            Value::Blob(_) => "Blob",
            Value::Array(_) => "Array",
            Value::Table(_) => "Table",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::from_bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Quote and escape text so the lexer reads it back unchanged
pub fn quote_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_number(n: f64) -> String {
    format!("{}", n)
}

fn number_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::Number(2.0).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Text(String::new()).is_truthy());
        assert!(Value::Text("0".into()).is_truthy());
        assert!(!Value::blob(Vec::new()).is_truthy());
        assert!(Value::blob(vec![1]).is_truthy());
    }

    #[test]
    fn test_lenient_number_conversion() {
        assert_eq!(Value::from("12.5").as_number(), 12.5);
        assert_eq!(Value::from("abc").as_number(), 0.0);
        assert_eq!(Value::blob(b"3".to_vec()).as_number(), 0.0);
        assert_eq!(Value::Number(7.9).as_int(), 7);
    }

    #[test]
    fn test_number_text_form() {
        assert_eq!(Value::Number(7.0).as_text(), "7");
        assert_eq!(Value::Number(0.5).as_text(), "0.5");
        assert_eq!(Value::Number(-3.0).as_text(), "-3");
    }

    #[test]
    fn test_compare_mixed_variants() {
        let five = Value::Number(5.0);
        assert_eq!(five.compare(&Value::from("5")), Ordering::Equal);
        assert_eq!(five.compare(&Value::from("10")), Ordering::Less);
        assert_eq!(Value::from("b").compare(&Value::from("a")), Ordering::Greater);
        assert_eq!(
            Value::blob(Vec::new()).compare(&Value::Array(Vec::new())),
            Ordering::Equal
        );
    }

    #[test]
    fn test_blob_hash_is_content_based() {
        let a = Blob::new(b"hello".to_vec());
        let b = Blob::new(b"hello".to_vec());
        let c = Blob::new(b"world".to_vec());
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_literal_forms() {
        assert_eq!(Value::from("say \"hi\"").to_literal(), "\"say \\\"hi\\\"\"");
        assert_eq!(Value::Number(3.0).to_literal(), "3");
        let arr = Value::Array(vec![Value::Number(1.0), Value::from("x")]);
        assert_eq!(arr.to_literal(), "[1, \"x\"]");
        assert_eq!(arr.as_text(), "[1,\"x\"]");
    }

    #[test]
    fn test_json_object_becomes_table() {
        let json = serde_json::json!({"a": 1, "b": "two"});
        match Value::from_json(&json) {
            Value::Table(t) => {
                assert_eq!(t.num_rows(), 1);
                assert_eq!(t.get(0, "a"), Some(&Value::Number(1.0)));
                assert_eq!(t.get(0, "b"), Some(&Value::from("two")));
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_persistable_variants() {
        assert!(Value::Number(1.0).is_persistable());
        assert!(Value::blob(vec![]).is_persistable());
        assert!(!Value::Array(vec![]).is_persistable());
        assert!(!Value::Table(Table::default()).is_persistable());
    }
}
