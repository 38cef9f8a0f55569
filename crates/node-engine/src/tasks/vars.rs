//! Variables, loops and attribute writes

use node_vm::Value;

use crate::registry::{ExecOutput, NodeType, TaskRegistry};
use crate::types::AttrUi;

use super::{switch, GROUP_VARIABLES};

pub fn register(registry: &mut TaskRegistry) {
    registry.register(NodeType::new("vars", GROUP_VARIABLES).user_attrs());

    // The scheduler runs the children once per item and exposes it as
    // `_key`/`_value`.
    registry.register(
        NodeType::new("for", GROUP_VARIABLES)
            .container()
            .attr("input", "[]")
            .attr_ui("_key", "", AttrUi::default().read_only())
            .attr_ui("_value", "", AttrUi::default().read_only())
            .with_callback(|ctx| async move {
                Ok(match loop_items(&ctx.input("input")) {
                    Ok(items) => ExecOutput::new().iterate(items),
                    Err(e) => ExecOutput::new().attr_error("input", e),
                })
            }),
    );

    // The target is resolved when the write is applied after the pass; a
    // missing node or attribute becomes this node's error then.
    registry.register(
        NodeType::new("set_attribute", GROUP_VARIABLES)
            .attr_ui("trigger", "0", switch())
            .attr("node", "")
            .attr("attr", "")
            .attr("value", "")
            .with_callback(|ctx| async move {
                let mut out = ExecOutput::new();
                if !ctx.bool("trigger") {
                    return Ok(out);
                }

                let node = ctx.text("node");
                let attr = ctx.text("attr");
                if node.is_empty() {
                    return Ok(out.attr_error("node", "empty"));
                }
                if attr.is_empty() {
                    return Ok(out.attr_error("attr", "empty"));
                }

                out = out
                    .set(ctx.node, Some(&node), &attr, ctx.input("value"))
                    .set(ctx.node, None, "trigger", Value::Number(0.0));
                Ok(out)
            }),
    );
}

/// Items a `for` node walks
///
/// A number `n` counts `0..n`, an array yields index and item, an object
/// yields its keys and values and a table yields index and row. Text is
/// read as JSON.
pub fn loop_items(input: &Value) -> Result<Vec<(Value, Value)>, String> {
    let index = |i: usize| Value::Number(i as f64);
    match input {
        Value::Number(n) => Ok((0..n.max(0.0) as usize).map(|i| (index(i), index(i))).collect()),
        Value::Array(items) => Ok(items.iter().enumerate().map(|(i, v)| (index(i), v.clone())).collect()),
        Value::Table(table) if table.num_rows() == 1 => Ok(table
            .columns
            .iter()
            .zip(table.rows[0].iter())
            .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
            .collect()),
        Value::Table(table) => Ok(table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut one = node_vm::Table::new(table.columns.clone());
                one.push_row(row.clone());
                (index(i), Value::Table(one))
            })
            .collect()),
        Value::Text(_) | Value::Blob(_) => {
            let text = input.as_text();
            if text.trim().is_empty() {
                return Ok(Vec::new());
            }
            let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
            loop_items(&Value::from_json(&json))
        }
    }
}
