//! Text and JSON rendering of query results, devices and tool locations.

use serde_json::{json, Value};
use tapwright_core::device::{BootedDevice, DeviceInfo, ScreenSize};
use tapwright_core::hierarchy::Element;
use tapwright_core::resolver::IndexedElement;
use tapwright_core::toolchain::ToolLocation;

/// One-line summary of an element:
/// `Button "Sign in" #com.example:id/submit [40,2100][1040,2300] clickable`.
pub fn element_line(element: &Element) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(class) = element.class_name() {
        parts.push(short_class(class).to_string());
    }
    if let Some(text) = element.accessible_text() {
        parts.push(format!("{:?}", text));
    }
    if let Some(id) = element.resource_id() {
        parts.push(format!("#{}", id));
    }
    parts.push(element.bounds.to_string());

    let attrs = &element.attributes;
    let flags = [
        (attrs.clickable, "clickable"),
        (attrs.scrollable, "scrollable"),
        (attrs.focused, "focused"),
        (attrs.checked, "checked"),
        (!attrs.enabled, "disabled"),
    ];
    parts.extend(flags.iter().filter(|(on, _)| *on).map(|(_, name)| name.to_string()));
    parts.join(" ")
}

/// `android.widget.Button` → `Button`.
fn short_class(class: &str) -> &str {
    class.rsplit('.').next().unwrap_or(class)
}

/// JSON summary of an element without its subtree.
pub fn element_json(element: &Element) -> Value {
    let attrs = &element.attributes;
    json!({
        "text": element.text(),
        "content_desc": element.content_desc(),
        "resource_id": element.resource_id(),
        "class": element.class_name(),
        "bounds": element.bounds,
        "center": element.bounds.center(),
        "clickable": attrs.clickable,
        "scrollable": attrs.scrollable,
        "focused": attrs.focused,
        "enabled": attrs.enabled,
        "children": element.children.len(),
    })
}

/// JSON for a flattened entry.
pub fn indexed_json(entry: &IndexedElement<'_>) -> Value {
    let mut value = element_json(entry.element);
    if let Value::Object(map) = &mut value {
        map.insert("index".to_string(), json!(entry.index));
    }
    value
}

pub fn indexed_line(entry: &IndexedElement<'_>) -> String {
    format!("{:>4}  {}", entry.index, element_line(entry.element))
}

pub fn device_line(device: &DeviceInfo) -> String {
    let state = if device.is_running { " (Running)" } else { "" };
    let runtime = device
        .runtime
        .as_deref()
        .map(|r| format!(" [{}]", r))
        .unwrap_or_default();
    format!("{} -- {}{}{}", device.device_id, device.name, runtime, state)
}

pub fn booted_line(device: &BootedDevice) -> String {
    format!("{} -- {} ({})", device.device_id, device.name, device.backend)
}

pub fn screen_size_line(size: &ScreenSize) -> String {
    let (w, h) = size.pixels();
    format!("{}x{} pt @{}x ({}x{} px)", size.width, size.height, size.scale, w, h)
}

pub fn location_line(location: &ToolLocation) -> String {
    let tools: Vec<&str> = location.available_tools.iter().map(|t| t.name()).collect();
    let version = location
        .version
        .as_deref()
        .map(|v| format!(" platform-tools {}", v))
        .unwrap_or_default();
    format!(
        "{:<16} {} [{}]{}",
        location.source.to_string(),
        location.path.display(),
        tools.join(", "),
        version
    )
}
