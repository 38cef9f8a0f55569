//! Built-in node types
//!
//! Each submodule registers one group of types into a [`TaskRegistry`]:
//!
//! - `ui`: containers and widgets, no body
//! - `vars`: `vars`, `for` and `set_attribute`
//! - `file`: `read_dir`, `read_file`, `write_file`
//! - `net`: `net_download`
//! - `sqlite`: `sqlite_select`, `sqlite_insert`
//! - `nn`: `llm_complete`, `whisper`
//! - `code`: `code`, run by an external worker, and `code_python`
//!
//! Bodies never see the graph. They read their input snapshot from the
//! [`ExecContext`](crate::registry::ExecContext) and answer with an
//! [`ExecOutput`](crate::registry::ExecOutput).

pub mod code;
pub mod file;
pub mod net;
pub mod nn;
pub mod sqlite;
pub mod ui;
pub mod vars;

use crate::registry::TaskRegistry;
use crate::types::AttrUi;

pub const GROUP_UI: &str = "UI";
pub const GROUP_VARIABLES: &str = "Variables";
pub const GROUP_FILE: &str = "File";
pub const GROUP_NET: &str = "Network";
pub const GROUP_SQLITE: &str = "SQLite";
pub const GROUP_NN: &str = "Neural networks";
pub const GROUP_CODE: &str = "Coding";

pub fn register_builtins(registry: &mut TaskRegistry) {
    ui::register(registry);
    vars::register(registry);
    file::register(registry);
    net::register(registry);
    sqlite::register(registry);
    nn::register(registry);
    code::register(registry);
}

/// `trigger` attribute shown as a switch
pub(crate) fn switch() -> AttrUi {
    AttrUi::widget("switch")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        let registry = TaskRegistry::builtin();
        for name in [
            "layout",
            "dialog",
            "list",
            "button",
            "microphone",
            "vars",
            "for",
            "set_attribute",
            "read_dir",
            "read_file",
            "write_file",
            "net_download",
            "sqlite_select",
            "sqlite_insert",
            "llm_complete",
            "whisper",
            "code",
            "code_python",
        ] {
            assert!(registry.has_node_type(name), "missing {}", name);
        }

        assert!(registry.get("layout").unwrap().container);
        assert!(registry.get("for").unwrap().container);
        assert!(registry.get("for").unwrap().has_body());
        assert!(!registry.get("button").unwrap().has_body());
        assert!(registry.get("read_file").unwrap().has_body());
        assert!(registry.get("vars").unwrap().user_attrs);
        assert!(registry.groups()[GROUP_FILE].contains(&"write_file"));
    }
}
