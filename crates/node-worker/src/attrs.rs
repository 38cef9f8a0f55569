//! Attribute records exchanged with a worker
//!
//! An attribute set is sent as `("attrs", N)` followed by N records. Each
//! record is `(name, 5)` followed by its five fields in a fixed order.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::wire::{recv_pair, recv_pair_number, send_pair, send_pair_number};

/// Number of field pairs following each record header
pub const ATTR_FIELDS: usize = 5;

/// One attribute as the worker sees it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerAttr {
    pub name: String,
    pub value: String,
    pub gui_type: String,
    pub gui_options: String,
    pub error: String,
    /// Written by the worker rather than the graph
    pub gui_read_only: bool,
}

impl WorkerAttr {
    /// Attribute the graph provides
    pub fn input(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Attribute the worker produces
    pub fn output(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            gui_read_only: true,
            ..Self::input(name, value)
        }
    }
}

/// Find `name` in `attrs`, appending an empty record if it is missing
pub fn upsert<'a>(attrs: &'a mut Vec<WorkerAttr>, name: &str) -> &'a mut WorkerAttr {
    let idx = match attrs.iter().position(|a| a.name == name) {
        Some(idx) => idx,
        None => {
            attrs.push(WorkerAttr {
                name: name.to_string(),
                ..Default::default()
            });
            attrs.len() - 1
        }
    };
    &mut attrs[idx]
}

pub async fn send_attrs<W>(writer: &mut W, attrs: &[WorkerAttr]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_pair_number(writer, "attrs", attrs.len()).await?;
    for attr in attrs {
        send_pair_number(writer, &attr.name, ATTR_FIELDS).await?;
        send_pair(writer, "value", &attr.value).await?;
        send_pair(writer, "gui_type", &attr.gui_type).await?;
        send_pair(writer, "gui_options", &attr.gui_options).await?;
        send_pair(writer, "error", &attr.error).await?;
        send_pair(writer, "gui_read_only", if attr.gui_read_only { "1" } else { "0" }).await?;
    }
    Ok(())
}

/// Read `count` records into `attrs`, updating existing entries by name
///
/// With `add_missing` unset, records for unknown names are read and dropped.
pub async fn recv_attrs<R>(
    reader: &mut R,
    count: usize,
    attrs: &mut Vec<WorkerAttr>,
    add_missing: bool,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    for _ in 0..count {
        let (name, fields) = recv_pair_number(reader).await?;
        let known = attrs.iter().any(|a| a.name == name);
        if !known && !add_missing {
            log::warn!("Attribute({}) not found", name);
        }
        for _ in 0..fields {
            let (field, value) = recv_pair(reader).await?;
            if !known && !add_missing {
                continue;
            }
            let attr = upsert(attrs, &name);
            match field.as_str() {
                "value" => attr.value = value,
                "gui_type" => attr.gui_type = value,
                "gui_options" => attr.gui_options = value,
                "error" => attr.error = value,
                "gui_read_only" => attr.gui_read_only = value.trim().parse::<i64>().unwrap_or(0) != 0,
                other => log::warn!("Unknown attribute field({})", other),
            }
        }
    }
    Ok(())
}
