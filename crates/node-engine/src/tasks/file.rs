//! File system nodes

use std::path::Path;

use node_vm::Value;

use crate::registry::{ExecContext, ExecOutput, NodeType, TaskRegistry};
use crate::types::AttrUi;
use crate::Result;

use super::{switch, GROUP_FILE};

pub fn register(registry: &mut TaskRegistry) {
    registry.register(
        NodeType::new("read_dir", GROUP_FILE)
            .attr_ui("path", "", AttrUi::widget("dir"))
            .attr_ui("_files", "", AttrUi::widget("dir").read_only())
            .attr_ui("_dirs", "", AttrUi::default().read_only())
            .with_callback(read_dir),
    );
    registry.register(
        NodeType::new("read_file", GROUP_FILE)
            .attr_ui("path", "", AttrUi::widget("file"))
            .attr_ui("_out", "", AttrUi::widget("blob").read_only())
            .with_callback(read_file),
    );
    registry.register(
        NodeType::new("write_file", GROUP_FILE)
            .attr_ui("trigger", "0", switch())
            .attr_ui("path", "", AttrUi::widget("file"))
            .attr("data", "")
            .with_callback(write_file),
    );
}

fn json_blob(names: &[String]) -> Result<Value> {
    Ok(Value::blob(serde_json::to_vec(names)?))
}

async fn read_dir(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    let path = ctx.text("path");
    if path.is_empty() {
        return Ok(out.attr_error("path", "empty"));
    }

    let mut entries = match tokio::fs::read_dir(&path).await {
        Ok(entries) => entries,
        Err(e) => return Ok(out.attr_error("path", e.to_string())),
    };
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    files.sort();
    dirs.sort();
    log::debug!("read_dir {}: {} files, {} dirs", path, files.len(), dirs.len());

    Ok(out
        .output("_files", json_blob(&files)?)
        .output("_dirs", json_blob(&dirs)?))
}

async fn read_file(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    let path = ctx.text("path");
    if path.is_empty() {
        return Ok(out.attr_error("path", "value is empty"));
    }
    match tokio::fs::read(&path).await {
        Ok(data) => Ok(out.output("_out", Value::blob(data))),
        Err(e) => Ok(out.attr_error("path", e.to_string())),
    }
}

async fn write_file(ctx: ExecContext) -> Result<ExecOutput> {
    let out = ExecOutput::new();
    if !ctx.bool("trigger") {
        return Ok(out);
    }
    let path = ctx.text("path");
    if path.is_empty() {
        return Ok(out.attr_error("path", "empty"));
    }

    if let Some(dir) = Path::new(&path).parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let data = ctx.input("data").to_blob();
    if let Err(e) = tokio::fs::write(&path, data.data()).await {
        return Ok(out.attr_error("path", e.to_string()));
    }
    log::info!("Wrote {} bytes into {}", data.len(), path);
    Ok(out.set(ctx.node, None, "trigger", Value::Number(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::ExecutorExtensions;
    use crate::tasks::test_util::{context, output, run};

    fn text(path: &Path) -> Value {
        Value::Text(path.to_string_lossy().into_owned())
    }

    #[tokio::test]
    async fn test_read_dir_lists_sorted_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let ctx = context("read_dir", &[("path", text(dir.path()))], ExecutorExtensions::new());
        let out = run(ctx).await.unwrap();

        assert_eq!(output(&out, "_files").unwrap().as_text(), r#"["a.txt","b.txt"]"#);
        assert_eq!(output(&out, "_dirs").unwrap().as_text(), r#"["sub"]"#);
    }

    #[tokio::test]
    async fn test_read_file_errors_stay_on_path() {
        let ctx = context("read_file", &[], ExecutorExtensions::new());
        let out = run(ctx).await.unwrap();
        assert_eq!(out.attr_errors, vec![("path".to_string(), "value is empty".to_string())]);

        let dir = tempfile::tempdir().unwrap();
        let ctx = context("read_file", &[("path", text(&dir.path().join("nope")))], ExecutorExtensions::new());
        let out = run(ctx).await.unwrap();
        assert_eq!(out.attr_errors.len(), 1);
        assert!(out.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/data.bin");

        let ctx = context(
            "write_file",
            &[
                ("trigger", Value::Number(1.0)),
                ("path", text(&path)),
                ("data", Value::Text("hello".into())),
            ],
            ExecutorExtensions::new(),
        );
        let out = run(ctx).await.unwrap();
        assert_eq!(out.sets.len(), 1);
        assert_eq!(out.sets[0].attr, "trigger");

        let ctx = context("read_file", &[("path", text(&path))], ExecutorExtensions::new());
        let out = run(ctx).await.unwrap();
        assert_eq!(output(&out, "_out"), Some(&Value::blob(b"hello".to_vec())));
    }

    #[tokio::test]
    async fn test_write_without_trigger_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let ctx = context("write_file", &[("path", text(&path))], ExecutorExtensions::new());
        let out = run(ctx).await.unwrap();
        assert!(out.sets.is_empty());
        assert!(!path.exists());
    }
}
