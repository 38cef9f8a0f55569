//! Containers and widgets
//!
//! None of these have a body. Their attributes are evaluated like any other
//! node and a front-end draws them from the values.

use crate::registry::{NodeType, TaskRegistry};
use crate::types::AttrUi;

use super::{switch, GROUP_UI};

fn combo(names: &str) -> AttrUi {
    AttrUi::widget("combo").with_param("names", names)
}

fn widget(name: &str) -> NodeType {
    NodeType::new(name, GROUP_UI).widget()
}

fn enabled(node_type: NodeType) -> NodeType {
    node_type.attr_ui("enable", "1", switch())
}

pub fn register(registry: &mut TaskRegistry) {
    registry.register(NodeType::new("layout", GROUP_UI).container().widget());
    registry.register(
        NodeType::new("dialog", GROUP_UI)
            .container()
            .widget()
            .attr_ui("type", "0", combo("Center;Relative"))
            .attr_ui("trigger", "0", switch()),
    );
    registry.register(
        NodeType::new("list", GROUP_UI)
            .container()
            .widget()
            .attr_ui("direction", "0", combo("Vertical;Horizontal"))
            .attr("items", "[0, 1, 2, 3, 4, 5]")
            .attr("max_item_size", "[100, 1]")
            .attr_ui("multi_select", "1", switch())
            .attr("single_selected", "-1")
            .attr("multi_selected", "[2, 3]"),
    );

    registry.register(enabled(
        widget("button")
            .attr("label", "")
            .attr_ui("type", "0", combo("Classic;Light;Menu"))
            .attr_ui("clicked", "0", switch()),
    ));
    registry.register(widget("text").attr("label", "").attr_ui("align", "0", combo("Left;Center;Right")));
    registry.register(enabled(widget("checkbox").attr("label", "").attr("value", "")));
    registry.register(enabled(widget("switch").attr("label", "").attr("value", "")));
    registry.register(enabled(
        widget("editbox")
            .attr("value", "")
            .attr("precision", "2")
            .attr("ghost", "")
            .attr_ui("tempToValue", "0", switch()),
    ));
    registry.register(enabled(
        widget("combo")
            .attr("value", "")
            .attr("options_names", "\"a;b;c\"")
            .attr("options_values", "\"a;b;c\"")
            .attr_ui("search", "0", switch()),
    ));
    registry.register(widget("divider").attr_ui("type", "0", combo("Horizontal;Vertical")));
    registry.register(enabled(
        widget("date")
            .attr_ui("value", "0", AttrUi::widget("date"))
            .attr_ui("show_time", "0", switch()),
    ));
    registry.register(enabled(widget("color").attr_ui("cd", "[0, 0, 0, 255]", AttrUi::widget("color"))));
    registry.register(widget("color_palette").attr_ui("cd", "[0, 0, 0, 255]", AttrUi::widget("color")));
    registry.register(
        widget("image")
            .attr_ui("blob", "", AttrUi::widget("blob"))
            .attr("margin", "0")
            .attr_ui("alignH", "1", combo("Left;Center;Right"))
            .attr_ui("alignV", "1", combo("Top;Center;Bottom"))
            .attr_ui("fill", "0", switch())
            .attr_ui("background", "0", combo("No;Yes;Transparent"))
            .attr_ui("cd", "[255, 255, 255, 255]", AttrUi::widget("color")),
    );
    registry.register(widget("table"));
    registry.register(
        widget("map")
            .attr("file", "\"maps/osm\"")
            .attr("url", "\"https://tile.openstreetmap.org/{z}/{x}/{y}.png\"")
            .attr("copyright", "\"(c)OpenStreetMap contributors\"")
            .attr("lon", "14.4071117049")
            .attr("lat", "50.0852013259")
            .attr("zoom", "5"),
    );
    registry.register(enabled(widget("microphone").attr_ui("active", "0", switch()).attr("_audio", "")));
    registry.register(widget("file_picker").attr_ui("path", "", AttrUi::widget("file")));
    registry.register(widget("folder_picker").attr_ui("path", "", AttrUi::widget("dir")));
    registry.register(widget("file_drop").attr("path", "").attr("_out", ""));
    registry.register(widget("calendar").attr_ui("value", "0", AttrUi::widget("date")).attr("page", "0"));
}
