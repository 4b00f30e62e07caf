//! Raw iOS accessibility element types.
//!
//! This module defines the tree shape reported by iOS accessibility tooling
//! (`idb ui describe-all`, `axe describe-ui`, XCUITest agents). These
//! elements are never queried directly: [`crate::hierarchy::Hierarchy::from_ios_elements`]
//! converts them into the platform-neutral [`crate::hierarchy::Element`] model.

use serde::{Deserialize, Serialize};

/// A UI element from an iOS accessibility hierarchy dump.
///
/// Elements form a tree via the `children` field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessibilityElement {
    /// The unique accessibility identifier for this element (AXUniqueId).
    #[serde(rename = "AXUniqueId", default)]
    pub identifier: Option<String>,

    /// The accessibility label (AXLabel), typically the user-visible text.
    #[serde(rename = "AXLabel", default)]
    pub label: Option<String>,

    /// The current value of the element (AXValue), e.g., text field contents.
    #[serde(rename = "AXValue", default)]
    pub value: Option<String>,

    /// The type of UI element (e.g., "Button", "TextField", "View").
    #[serde(rename = "type", default)]
    pub element_type: Option<String>,

    /// The element's frame (position and size) in screen points.
    #[serde(default)]
    pub frame: Option<AccessibilityFrame>,

    /// Child elements nested within this element.
    #[serde(default)]
    pub children: Vec<AccessibilityElement>,

    /// The accessibility role of this element.
    #[serde(default)]
    pub role: Option<String>,

    /// Whether the element accepts interaction. Absent means enabled.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// The frame (position and dimensions) of an iOS element.
///
/// Coordinates are in screen points, with the origin at the top-left
/// corner of the screen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AccessibilityFrame {
    /// The x-coordinate of the element's top-left corner.
    pub x: f64,
    /// The y-coordinate of the element's top-left corner.
    pub y: f64,
    /// The width of the element in points.
    pub width: f64,
    /// The height of the element in points.
    pub height: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_describe_ui_output() {
        let json = r#"[{
            "AXUniqueId": "login-button",
            "AXLabel": "Log In",
            "type": "Button",
            "frame": {"x": 20.5, "y": 100.0, "width": 335.0, "height": 44.0},
            "children": []
        }]"#;
        let elements: Vec<AccessibilityElement> = serde_json::from_str(json).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].identifier.as_deref(), Some("login-button"));
        assert_eq!(elements[0].element_type.as_deref(), Some("Button"));
        assert_eq!(elements[0].frame.unwrap().width, 335.0);
        assert!(elements[0].enabled.is_none());
    }

    #[test]
    fn missing_fields_default() {
        let element: AccessibilityElement = serde_json::from_str("{}").unwrap();
        assert!(element.identifier.is_none());
        assert!(element.frame.is_none());
        assert!(element.children.is_empty());
    }
}
