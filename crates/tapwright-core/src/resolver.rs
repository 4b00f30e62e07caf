//! Element lookup over a normalized [`Hierarchy`].
//!
//! Every query is a pure function of one snapshot. Text lookups prefer the
//! tightest match: when a label appears both on a button and on the
//! containers around it, the element with the smallest bounding box wins.
//!
//! # Example
//!
//! ```
//! use tapwright_core::hierarchy::Hierarchy;
//! use tapwright_core::resolver::{ElementResolver, TextQuery};
//!
//! let hierarchy = Hierarchy::from_json_str(r#"{"node": [
//!     {"text": "Submit order", "bounds": "[0,0][1080,400]"},
//!     {"text": "Submit", "clickable": "true", "bounds": "[40,300][400,380]"}
//! ]}"#).unwrap();
//!
//! let resolver = ElementResolver::new(&hierarchy);
//! let button = resolver.find_by_text("submit", TextQuery::default()).unwrap();
//! assert_eq!(button.text(), Some("Submit"));
//! ```

use serde::Serialize;
use thiserror::Error;

use crate::bounds::{Bounds, Point};
use crate::hierarchy::{Element, Hierarchy};

/// Errors produced by scoped lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The container element used to scope a search does not exist.
    #[error("Container '{container_id}' not found in the current screen")]
    ContainerNotFound {
        /// The resource id that was looked up.
        container_id: String,
    },
}

impl ResolveError {
    /// All resolve errors can be fixed by the caller.
    pub fn is_actionable(&self) -> bool {
        true
    }

    /// Suggested remediation.
    pub fn hint(&self) -> String {
        match self {
            ResolveError::ContainerNotFound { container_id } => format!(
                "Check that '{}' is on screen, or list resource ids with `tapwright query --file <snapshot> flatten`",
                container_id
            ),
        }
    }
}

/// Options for text matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextQuery {
    /// Bidirectional substring match instead of equality.
    pub fuzzy: bool,
    /// Compare case-sensitively.
    pub case_sensitive: bool,
}

impl Default for TextQuery {
    fn default() -> Self {
        Self {
            fuzzy: true,
            case_sensitive: false,
        }
    }
}

impl TextQuery {
    /// Exact, case-sensitive matching.
    pub fn exact() -> Self {
        Self {
            fuzzy: false,
            case_sensitive: true,
        }
    }
}

/// Bidirectional containment: `a` contains `b` or `b` contains `a`.
pub fn fuzzy_match(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a.contains(b) || b.contains(a)
    } else {
        let (a, b) = (a.to_lowercase(), b.to_lowercase());
        a.contains(&b) || b.contains(&a)
    }
}

/// Matches a candidate attribute against a query. Missing or empty
/// candidates, and empty queries, never match.
pub fn text_matches(candidate: Option<&str>, query: &str, options: TextQuery) -> bool {
    let Some(candidate) = candidate.filter(|c| !c.is_empty()) else {
        return false;
    };
    if query.is_empty() {
        return false;
    }
    match (options.fuzzy, options.case_sensitive) {
        (true, case_sensitive) => fuzzy_match(candidate, query, case_sensitive),
        (false, true) => candidate == query,
        (false, false) => candidate.to_lowercase() == query.to_lowercase(),
    }
}

fn id_or_class_matches(candidate: Option<&str>, query: &str, partial: bool) -> bool {
    match candidate {
        Some(candidate) if partial => candidate.to_lowercase().contains(&query.to_lowercase()),
        Some(candidate) => candidate == query,
        None => false,
    }
}

/// An element paired with its position in the flattened snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedElement<'a> {
    /// Position in traversal order.
    pub index: usize,
    /// Best available accessible text.
    pub text: Option<&'a str>,
    /// The element itself.
    pub element: &'a Element,
}

/// The device screen in the same pixel space as element bounds.
pub type ScreenRect = Bounds;

/// Margins excluded from the visible screen area (status bar, navigation bar).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Insets {
    /// Top margin in pixels.
    pub top: i32,
    /// Bottom margin in pixels.
    pub bottom: i32,
    /// Left margin in pixels.
    pub left: i32,
    /// Right margin in pixels.
    pub right: i32,
}

/// The screen rectangle with `insets` removed; `None` if nothing remains.
pub fn visible_area(screen: &ScreenRect, insets: &Insets) -> Option<Bounds> {
    Bounds::new(
        screen.left().saturating_add(insets.left),
        screen.top().saturating_add(insets.top),
        screen.right().saturating_sub(insets.right),
        screen.bottom().saturating_sub(insets.bottom),
    )
    .ok()
}

/// True if the bounds are not entirely outside the inset-adjusted screen.
pub fn is_partially_visible(bounds: &Bounds, screen: &ScreenRect, insets: &Insets) -> bool {
    visible_area(screen, insets).is_some_and(|area| area.intersects(bounds))
}

/// True if all four edges lie inside the inset-adjusted screen.
pub fn is_fully_visible(bounds: &Bounds, screen: &ScreenRect, insets: &Insets) -> bool {
    visible_area(screen, insets).is_some_and(|area| area.contains(bounds))
}

/// True if the bounds have a non-zero area and overlap the screen.
pub fn is_visible(bounds: &Bounds, screen: &ScreenRect) -> bool {
    bounds.area() > 0 && is_partially_visible(bounds, screen, &Insets::default())
}

/// The part of `bounds` inside the inset-adjusted screen.
pub fn visible_region(bounds: &Bounds, screen: &ScreenRect, insets: &Insets) -> Option<Bounds> {
    visible_area(screen, insets)?.intersection(bounds)
}

/// Centre of an element, floored to the pixel grid.
pub fn element_center(element: &Element) -> Point {
    element.bounds.center()
}

/// Centre of the visible part of an element; a safe tap target for
/// elements that are partly scrolled off screen.
pub fn visible_center(element: &Element, screen: &ScreenRect, insets: &Insets) -> Option<Point> {
    visible_region(&element.bounds, screen, insets).map(|region| region.center())
}

/// True if the point lies inside the element, edges included.
pub fn contains_point(element: &Element, x: i32, y: i32) -> bool {
    element.bounds.contains_point(x, y)
}

/// Query interface over one hierarchy snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ElementResolver<'a> {
    hierarchy: &'a Hierarchy,
}

impl<'a> ElementResolver<'a> {
    /// Creates a resolver for `hierarchy`.
    pub fn new(hierarchy: &'a Hierarchy) -> Self {
        Self { hierarchy }
    }

    fn all(&self) -> impl Iterator<Item = &'a Element> {
        self.hierarchy.iter()
    }

    /// Smallest-area element whose `text` or `content-desc` matches.
    ///
    /// Ties keep traversal order.
    pub fn find_by_text(&self, text: &str, options: TextQuery) -> Option<&'a Element> {
        smallest_text_match(self.all(), text, options)
    }

    /// Like [`find_by_text`](Self::find_by_text), restricted to the
    /// descendants of the element with resource id `container_id`.
    ///
    /// Fails with [`ResolveError::ContainerNotFound`] rather than falling
    /// back to an unscoped search.
    pub fn find_by_text_in(
        &self,
        container_id: &str,
        text: &str,
        options: TextQuery,
    ) -> Result<Option<&'a Element>, ResolveError> {
        let container = self.container(container_id)?;
        Ok(smallest_text_match(descendants(container), text, options))
    }

    /// All elements whose resource id matches, in traversal order.
    ///
    /// `partial` switches from equality to case-insensitive substring.
    pub fn find_by_resource_id(&self, id: &str, partial: bool) -> Vec<&'a Element> {
        self.all()
            .filter(|e| id_or_class_matches(e.resource_id(), id, partial))
            .collect()
    }

    /// First element whose resource id matches.
    pub fn find_first_by_resource_id(&self, id: &str, partial: bool) -> Option<&'a Element> {
        self.all()
            .find(|e| id_or_class_matches(e.resource_id(), id, partial))
    }

    /// Resource id search restricted to the descendants of `container_id`.
    pub fn find_by_resource_id_in(
        &self,
        container_id: &str,
        id: &str,
        partial: bool,
    ) -> Result<Vec<&'a Element>, ResolveError> {
        let container = self.container(container_id)?;
        Ok(descendants(container)
            .filter(|e| id_or_class_matches(e.resource_id(), id, partial))
            .collect())
    }

    /// All elements whose class matches, in traversal order.
    pub fn find_by_class(&self, class_name: &str, partial: bool) -> Vec<&'a Element> {
        self.all()
            .filter(|e| id_or_class_matches(e.class_name(), class_name, partial))
            .collect()
    }

    /// First element whose class matches.
    pub fn find_first_by_class(&self, class_name: &str, partial: bool) -> Option<&'a Element> {
        self.all()
            .find(|e| id_or_class_matches(e.class_name(), class_name, partial))
    }

    /// All scrollable elements.
    pub fn find_scrollable(&self) -> Vec<&'a Element> {
        self.all().filter(|e| e.attributes.scrollable).collect()
    }

    /// All clickable elements.
    pub fn find_clickable(&self) -> Vec<&'a Element> {
        self.all().filter(|e| e.attributes.clickable).collect()
    }

    /// The focused element, if any.
    pub fn find_focused(&self) -> Option<&'a Element> {
        self.all().find(|e| e.attributes.focused)
    }

    /// Elements geometrically inside `parent`, excluding ones with identical
    /// bounds, sorted by top edge.
    pub fn find_children(&self, parent: &Element) -> Vec<&'a Element> {
        let mut children: Vec<&'a Element> = self
            .all()
            .filter(|e| e.bounds != parent.bounds && parent.bounds.contains(&e.bounds))
            .collect();
        children.sort_by_key(|e| e.bounds.top());
        children
    }

    /// Every element in traversal order with its index and accessible text.
    pub fn flatten(&self) -> Vec<IndexedElement<'a>> {
        self.all()
            .enumerate()
            .map(|(index, element)| IndexedElement {
                index,
                text: element.accessible_text(),
                element,
            })
            .collect()
    }

    /// The `index`-th element of [`flatten`](Self::flatten).
    pub fn find_by_index(&self, index: i64) -> Option<&'a Element> {
        let index = usize::try_from(index).ok()?;
        self.all().nth(index)
    }

    fn container(&self, container_id: &str) -> Result<&'a Element, ResolveError> {
        self.find_first_by_resource_id(container_id, false)
            .ok_or_else(|| ResolveError::ContainerNotFound {
                container_id: container_id.to_string(),
            })
    }
}

fn descendants(container: &Element) -> impl Iterator<Item = &Element> {
    container.children.iter().flat_map(Element::iter)
}

fn smallest_text_match<'a>(
    elements: impl Iterator<Item = &'a Element>,
    text: &str,
    options: TextQuery,
) -> Option<&'a Element> {
    elements
        .filter(|e| {
            text_matches(e.attributes.text.as_deref(), text, options)
                || text_matches(e.attributes.content_desc.as_deref(), text, options)
        })
        .min_by_key(|e| e.bounds.area())
}
