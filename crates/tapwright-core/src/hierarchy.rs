//! Normalization of raw platform hierarchies into a uniform element tree.
//!
//! Android hierarchy producers emit a nested `node` structure whose
//! attributes are strings. The exact shape varies by producer:
//!
//! - the document is wrapped in a `hierarchy` envelope (`{"hierarchy": {"node": ...}}`),
//!   carries a bare `node` field, or is itself the root node;
//! - attributes live directly on the node or under a carrier object
//!   (`$`, `attributes` or `attrs`);
//! - `node` holds a single object when there is one child and a list otherwise.
//!
//! [`Hierarchy::normalize`] reconciles all of these into one shape:
//! [`Element`]s with typed attributes, parsed [`Bounds`] and a `children`
//! vector. Nodes without parseable bounds are dropped and their children are
//! spliced into the parent in their place, so one bad node never loses a
//! subtree. iOS accessibility trees are converted through
//! [`Hierarchy::from_ios_elements`].
//!
//! # Example
//!
//! ```
//! use tapwright_core::hierarchy::Hierarchy;
//!
//! let hierarchy = Hierarchy::from_json_str(r#"{
//!     "hierarchy": {
//!         "node": {
//!             "bounds": "[0,0][1080,2400]",
//!             "node": {"text": "OK", "clickable": "true", "bounds": "[0,0][100,50]"}
//!         }
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(hierarchy.iter().count(), 2);
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::bounds::Bounds;
use crate::element::{AccessibilityElement, AccessibilityFrame};

/// Keys under which producers nest a node's attributes.
const ATTRIBUTE_CARRIERS: [&str; 3] = ["$", "attributes", "attrs"];

/// Keys holding child nodes.
const CHILD_KEYS: [&str; 2] = ["node", "children"];

/// Errors produced while reading a hierarchy document.
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// The document is not valid JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl HierarchyError {
    /// Returns true if the user can fix this error directly.
    pub fn is_actionable(&self) -> bool {
        false
    }
}

/// Typed view of a node's attribute bag.
///
/// Well-known attributes get their own fields; everything else is kept in
/// [`extra`](Self::extra).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeAttributes {
    /// Visible text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Accessibility description (`content-desc`).
    #[serde(rename = "content-desc", skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,
    /// Resource identifier (`resource-id`).
    #[serde(rename = "resource-id", skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Widget class name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Owning application package.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Raw bounds string as reported by the producer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<String>,
    /// Sibling index reported by the producer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Accepts taps.
    pub clickable: bool,
    /// Accepts long presses.
    #[serde(rename = "long-clickable")]
    pub long_clickable: bool,
    /// Scroll container.
    pub scrollable: bool,
    /// Currently focused.
    pub focused: bool,
    /// Can take focus.
    pub focusable: bool,
    /// Accepts interaction. Absent in the raw data means `true`.
    pub enabled: bool,
    /// Can be checked.
    pub checkable: bool,
    /// Currently checked.
    pub checked: bool,
    /// Currently selected.
    pub selected: bool,
    /// Password field.
    pub password: bool,
    /// Attributes without a dedicated field.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Default for NodeAttributes {
    fn default() -> Self {
        Self {
            text: None,
            content_desc: None,
            resource_id: None,
            class: None,
            package: None,
            bounds: None,
            index: None,
            clickable: false,
            long_clickable: false,
            scrollable: false,
            focused: false,
            focusable: false,
            enabled: true,
            checkable: false,
            checked: false,
            selected: false,
            password: false,
            extra: BTreeMap::new(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value == "true"
}

impl NodeAttributes {
    /// Builds typed attributes from a raw name → value map.
    pub fn from_map(raw: BTreeMap<String, String>) -> Self {
        let mut attrs = Self::default();
        for (key, value) in raw {
            match key.as_str() {
                "text" => attrs.text = Some(value),
                "content-desc" => attrs.content_desc = Some(value),
                "resource-id" => attrs.resource_id = Some(value),
                "class" => attrs.class = Some(value),
                "package" => attrs.package = Some(value),
                "bounds" => attrs.bounds = Some(value),
                "index" => match value.parse() {
                    Ok(index) => attrs.index = Some(index),
                    Err(_) => {
                        attrs.extra.insert(key, value);
                    }
                },
                "clickable" => attrs.clickable = parse_flag(&value),
                "long-clickable" => attrs.long_clickable = parse_flag(&value),
                "scrollable" => attrs.scrollable = parse_flag(&value),
                "focused" => attrs.focused = parse_flag(&value),
                "focusable" => attrs.focusable = parse_flag(&value),
                "enabled" => attrs.enabled = parse_flag(&value),
                "checkable" => attrs.checkable = parse_flag(&value),
                "checked" => attrs.checked = parse_flag(&value),
                "selected" => attrs.selected = parse_flag(&value),
                "password" => attrs.password = parse_flag(&value),
                _ => {
                    attrs.extra.insert(key, value);
                }
            }
        }
        attrs
    }

    /// Looks up an attribute by its raw name, including extension attributes.
    pub fn get(&self, name: &str) -> Option<String> {
        let flag = |b: bool| Some(b.to_string());
        match name {
            "text" => self.text.clone(),
            "content-desc" => self.content_desc.clone(),
            "resource-id" => self.resource_id.clone(),
            "class" => self.class.clone(),
            "package" => self.package.clone(),
            "bounds" => self.bounds.clone(),
            "index" => self.index.map(|i| i.to_string()),
            "clickable" => flag(self.clickable),
            "long-clickable" => flag(self.long_clickable),
            "scrollable" => flag(self.scrollable),
            "focused" => flag(self.focused),
            "focusable" => flag(self.focusable),
            "enabled" => flag(self.enabled),
            "checkable" => flag(self.checkable),
            "checked" => flag(self.checked),
            "selected" => flag(self.selected),
            "password" => flag(self.password),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// A normalized UI element.
///
/// Every element has valid bounds; nodes without them never become elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Element {
    /// Typed attributes.
    pub attributes: NodeAttributes,
    /// Parsed pixel bounds.
    pub bounds: Bounds,
    /// Normalized children in document order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

impl Element {
    /// Creates a leaf element.
    pub fn new(attributes: NodeAttributes, bounds: Bounds) -> Self {
        Self {
            attributes,
            bounds,
            children: Vec::new(),
        }
    }

    /// Visible text, if non-empty.
    pub fn text(&self) -> Option<&str> {
        non_empty(self.attributes.text.as_ref())
    }

    /// Content description, if non-empty.
    pub fn content_desc(&self) -> Option<&str> {
        non_empty(self.attributes.content_desc.as_ref())
    }

    /// Resource identifier, if non-empty.
    pub fn resource_id(&self) -> Option<&str> {
        non_empty(self.attributes.resource_id.as_ref())
    }

    /// Class name, if non-empty.
    pub fn class_name(&self) -> Option<&str> {
        non_empty(self.attributes.class.as_ref())
    }

    /// Best available accessible text: `text`, falling back to `content-desc`.
    pub fn accessible_text(&self) -> Option<&str> {
        self.text().or_else(|| self.content_desc())
    }

    /// Pre-order iterator over this element and its descendants.
    pub fn iter(&self) -> Preorder<'_> {
        Preorder { stack: vec![self] }
    }
}

/// Depth-first, pre-order traversal over elements.
pub struct Preorder<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        self.stack.extend(element.children.iter().rev());
        Some(element)
    }
}

/// A normalized hierarchy snapshot.
///
/// Index-based lookups are only stable within a single snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hierarchy {
    /// Top-level elements.
    pub roots: Vec<Element>,
}

impl Hierarchy {
    /// Wraps already-normalized roots.
    pub fn new(roots: Vec<Element>) -> Self {
        Self { roots }
    }

    /// Parses a JSON document in either the Android or iOS shape.
    ///
    /// A top-level array whose objects carry a `frame` or `AX*` keys is read
    /// as an iOS accessibility dump; everything else goes through
    /// [`normalize`](Self::normalize).
    pub fn from_json_str(json: &str) -> Result<Self, HierarchyError> {
        let doc: Value = serde_json::from_str(json)?;
        if looks_like_ios(&doc) {
            let elements: Vec<AccessibilityElement> = serde_json::from_value(doc)?;
            return Ok(Self::from_ios_elements(&elements));
        }
        Ok(Self::normalize(&doc))
    }

    /// Normalizes a raw Android-style hierarchy document.
    pub fn normalize(doc: &Value) -> Self {
        let mut roots = Vec::new();
        for node in node_list(resolve_root(doc)) {
            normalize_into(node, &mut roots);
        }
        debug!(roots = roots.len(), "normalized hierarchy");
        Self { roots }
    }

    /// Converts an iOS accessibility tree into the uniform model.
    ///
    /// The label becomes `text`, the identifier `resource-id`, the element
    /// type `class`, and the value is kept as the `value` extension
    /// attribute. Frames are converted to integer bounds by flooring both
    /// corners; elements without a usable frame are dropped and their
    /// children spliced into the parent.
    pub fn from_ios_elements(elements: &[AccessibilityElement]) -> Self {
        let mut roots = Vec::new();
        for element in elements {
            convert_ios_into(element, &mut roots);
        }
        Self { roots }
    }

    /// Pre-order iterator over every element.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.roots.iter().flat_map(Element::iter)
    }

    /// True if the snapshot holds no elements.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

fn looks_like_ios(doc: &Value) -> bool {
    let Some(first) = doc.as_array().and_then(|items| items.first()) else {
        return false;
    };
    first
        .as_object()
        .is_some_and(|obj| obj.contains_key("frame") || obj.contains_key("AXLabel") || obj.contains_key("AXUniqueId"))
}

fn has_own_bounds(obj: &Map<String, Value>) -> bool {
    obj.contains_key("bounds")
        || ATTRIBUTE_CARRIERS
            .iter()
            .filter_map(|key| obj.get(*key).and_then(Value::as_object))
            .any(|carrier| carrier.contains_key("bounds"))
}

/// Finds the root node(s) of the document.
fn resolve_root(doc: &Value) -> &Value {
    if let Some(envelope) = doc.get("hierarchy") {
        return match envelope.as_object() {
            Some(obj) if !has_own_bounds(obj) => obj.get("node").unwrap_or(envelope),
            _ => envelope,
        };
    }
    match doc.as_object() {
        Some(obj) if !has_own_bounds(obj) => obj.get("node").unwrap_or(doc),
        _ => doc,
    }
}

/// Treats a single object and a list of objects the same way.
fn node_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_attributes(obj: &Map<String, Value>) -> NodeAttributes {
    let mut raw = BTreeMap::new();
    for (key, value) in obj {
        if CHILD_KEYS.contains(&key.as_str()) || ATTRIBUTE_CARRIERS.contains(&key.as_str()) {
            continue;
        }
        if let Some(s) = scalar_to_string(value) {
            raw.insert(key.clone(), s);
        }
    }
    for carrier in ATTRIBUTE_CARRIERS {
        if let Some(nested) = obj.get(carrier).and_then(Value::as_object) {
            for (key, value) in nested {
                if let Some(s) = scalar_to_string(value) {
                    raw.insert(key.clone(), s);
                }
            }
        }
    }
    NodeAttributes::from_map(raw)
}

fn normalize_into(node: &Value, out: &mut Vec<Element>) {
    let Some(obj) = node.as_object() else {
        debug!(node = %node, "skipping non-object hierarchy node");
        return;
    };

    let attributes = extract_attributes(obj);
    let mut children = Vec::new();
    for key in CHILD_KEYS {
        if let Some(child_value) = obj.get(key) {
            for child in node_list(child_value) {
                normalize_into(child, &mut children);
            }
        }
    }

    match attributes.bounds.as_deref().map(Bounds::parse) {
        Some(Ok(bounds)) => out.push(Element {
            attributes,
            bounds,
            children,
        }),
        Some(Err(e)) => {
            debug!(error = %e, class = ?attributes.class, "dropping node with unparseable bounds");
            out.extend(children);
        }
        None => out.extend(children),
    }
}

fn frame_to_bounds(frame: &AccessibilityFrame) -> Option<Bounds> {
    let values = [frame.x, frame.y, frame.x + frame.width, frame.y + frame.height];
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let [left, top, right, bottom] = values.map(|v| v.floor());
    let to_i32 = |v: f64| -> Option<i32> {
        if v < f64::from(i32::MIN) || v > f64::from(i32::MAX) {
            None
        } else {
            // Range checked above, so the cast cannot truncate.
            Some(v as i32)
        }
    };
    Bounds::new(to_i32(left)?, to_i32(top)?, to_i32(right)?, to_i32(bottom)?).ok()
}

fn convert_ios_into(element: &AccessibilityElement, out: &mut Vec<Element>) {
    let mut children = Vec::new();
    for child in &element.children {
        convert_ios_into(child, &mut children);
    }

    let Some(bounds) = element.frame.as_ref().and_then(frame_to_bounds) else {
        debug!(identifier = ?element.identifier, "dropping iOS element without usable frame");
        out.extend(children);
        return;
    };

    let mut extra = BTreeMap::new();
    if let Some(value) = &element.value {
        extra.insert("value".to_string(), value.clone());
    }
    if let Some(role) = &element.role {
        extra.insert("role".to_string(), role.clone());
    }

    let class = element.element_type.clone();
    let attributes = NodeAttributes {
        text: element.label.clone(),
        resource_id: element.identifier.clone(),
        clickable: matches!(
            class.as_deref(),
            Some("Button" | "Link" | "Cell" | "Switch" | "TextField" | "SecureTextField")
        ),
        scrollable: matches!(
            class.as_deref(),
            Some("ScrollView" | "Table" | "CollectionView")
        ),
        password: class.as_deref() == Some("SecureTextField"),
        enabled: element.enabled.unwrap_or(true),
        bounds: Some(bounds.to_string()),
        class,
        extra,
        ..NodeAttributes::default()
    };

    out.push(Element {
        attributes,
        bounds,
        children,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn texts(h: &Hierarchy) -> Vec<String> {
        h.iter()
            .map(|e| e.accessible_text().unwrap_or("-").to_string())
            .collect()
    }

    #[test]
    fn resolves_hierarchy_envelope() {
        let doc = json!({
            "hierarchy": {
                "rotation": "0",
                "node": {"text": "root", "bounds": "[0,0][100,100]"}
            }
        });
        let h = Hierarchy::normalize(&doc);
        assert_eq!(texts(&h), vec!["root"]);
    }

    #[test]
    fn resolves_bare_node_field() {
        let doc = json!({"node": [
            {"text": "a", "bounds": "[0,0][10,10]"},
            {"text": "b", "bounds": "[0,10][10,20]"}
        ]});
        let h = Hierarchy::normalize(&doc);
        assert_eq!(h.roots.len(), 2);
        assert_eq!(texts(&h), vec!["a", "b"]);
    }

    #[test]
    fn document_itself_is_root() {
        let doc = json!({
            "text": "root",
            "bounds": "[0,0][100,100]",
            "node": {"text": "child", "bounds": "[0,0][50,50]"}
        });
        let h = Hierarchy::normalize(&doc);
        assert_eq!(h.roots.len(), 1);
        assert_eq!(h.roots[0].children.len(), 1);
        assert_eq!(texts(&h), vec!["root", "child"]);
    }

    #[test]
    fn single_child_and_list_children_normalize_the_same() {
        let single = json!({"bounds": "[0,0][100,100]", "node": {"text": "x", "bounds": "[0,0][1,1]"}});
        let list = json!({"bounds": "[0,0][100,100]", "node": [{"text": "x", "bounds": "[0,0][1,1]"}]});
        assert_eq!(Hierarchy::normalize(&single), Hierarchy::normalize(&list));
    }

    #[test]
    fn reads_attributes_from_carrier() {
        let doc = json!({"hierarchy": {"node": {
            "$": {"text": "Submit", "resource-id": "com.app:id/submit", "clickable": "true", "bounds": "[0,0][200,80]"}
        }}});
        let h = Hierarchy::normalize(&doc);
        let el = &h.roots[0];
        assert_eq!(el.text(), Some("Submit"));
        assert_eq!(el.resource_id(), Some("com.app:id/submit"));
        assert!(el.attributes.clickable);
        assert_eq!(el.bounds, Bounds::new(0, 0, 200, 80).unwrap());
    }

    #[test]
    fn drops_node_without_bounds_but_keeps_children() {
        let doc = json!({"hierarchy": {"node": {
            "bounds": "[0,0][100,100]",
            "node": [
                {"class": "Wrapper", "node": [
                    {"text": "inner-1", "bounds": "[0,0][10,10]"},
                    {"text": "inner-2", "bounds": "[0,10][10,20]"}
                ]},
                {"text": "broken", "bounds": "[0,0]x[10,10]", "node": {"text": "rescued", "bounds": "[1,1][2,2]"}},
                {"text": "sibling", "bounds": "[0,20][10,30]"}
            ]
        }}});
        let h = Hierarchy::normalize(&doc);
        let root = &h.roots[0];
        let child_texts: Vec<_> = root.children.iter().map(|c| c.text().unwrap_or("-")).collect();
        assert_eq!(child_texts, vec!["inner-1", "inner-2", "rescued", "sibling"]);
    }

    #[test]
    fn enabled_defaults_to_true() {
        let doc = json!({"node": [
            {"bounds": "[0,0][1,1]"},
            {"bounds": "[0,0][1,1]", "enabled": "false"}
        ]});
        let h = Hierarchy::normalize(&doc);
        assert!(h.roots[0].attributes.enabled);
        assert!(!h.roots[1].attributes.enabled);
    }

    #[test]
    fn unknown_attributes_kept_in_extra() {
        let doc = json!({"bounds": "[0,0][1,1]", "hint": "Email", "drawing-order": 3, "clickable": true});
        let h = Hierarchy::normalize(&doc);
        let attrs = &h.roots[0].attributes;
        assert_eq!(attrs.extra.get("hint").map(String::as_str), Some("Email"));
        assert_eq!(attrs.get("drawing-order").as_deref(), Some("3"));
        assert!(attrs.clickable);
        assert_eq!(attrs.get("clickable").as_deref(), Some("true"));
    }

    #[test]
    fn non_object_nodes_are_ignored() {
        let doc = json!({"node": [42, "junk", {"bounds": "[0,0][1,1]", "text": "ok"}]});
        let h = Hierarchy::normalize(&doc);
        assert_eq!(texts(&h), vec!["ok"]);
        assert!(Hierarchy::normalize(&json!(7)).is_empty());
    }

    #[test]
    fn preorder_traversal() {
        let doc = json!({"bounds": "[0,0][100,100]", "text": "1", "node": [
            {"bounds": "[0,0][50,50]", "text": "2", "node": {"bounds": "[0,0][10,10]", "text": "3"}},
            {"bounds": "[50,0][100,50]", "text": "4"}
        ]});
        let h = Hierarchy::normalize(&doc);
        assert_eq!(texts(&h), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn accessible_text_falls_back_to_content_desc() {
        let doc = json!({"node": [
            {"bounds": "[0,0][1,1]", "text": "", "content-desc": "Back"},
            {"bounds": "[0,0][1,1]", "text": "Title", "content-desc": "ignored"}
        ]});
        let h = Hierarchy::normalize(&doc);
        assert_eq!(texts(&h), vec!["Back", "Title"]);
    }

    #[test]
    fn from_json_str_detects_ios_shape() {
        let json = r#"[{
            "AXLabel": "Window", "type": "Window",
            "frame": {"x": 0, "y": 0, "width": 393, "height": 852},
            "children": [
                {"AXUniqueId": "login", "AXLabel": "Log In", "type": "Button",
                 "frame": {"x": 20.7, "y": 100.2, "width": 100.6, "height": 44.0}},
                {"AXLabel": "No frame", "type": "StaticText", "children": [
                    {"AXLabel": "Grandchild", "type": "StaticText",
                     "frame": {"x": 0, "y": 0, "width": 10, "height": 10}}
                ]}
            ]
        }]"#;
        let h = Hierarchy::from_json_str(json).unwrap();
        assert_eq!(texts(&h), vec!["Window", "Log In", "Grandchild"]);
        let button = &h.roots[0].children[0];
        assert_eq!(button.resource_id(), Some("login"));
        assert_eq!(button.class_name(), Some("Button"));
        assert!(button.attributes.clickable);
        assert_eq!(button.bounds, Bounds::new(20, 100, 121, 144).unwrap());
    }

    #[test]
    fn from_json_str_rejects_invalid_json() {
        assert!(matches!(
            Hierarchy::from_json_str("{not json"),
            Err(HierarchyError::JsonParse(_))
        ));
    }

    #[test]
    fn serializes_with_wire_attribute_names() {
        let doc = json!({"bounds": "[0,0][1,1]", "resource-id": "id/x", "content-desc": "d"});
        let h = Hierarchy::normalize(&doc);
        let value = serde_json::to_value(&h.roots[0]).unwrap();
        assert_eq!(value["attributes"]["resource-id"], "id/x");
        assert_eq!(value["attributes"]["content-desc"], "d");
        assert_eq!(value["bounds"], "[0,0][1,1]");
    }
}
