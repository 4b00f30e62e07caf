//! Pixel rectangles in the `[left,top][right,bottom]` wire format.
//!
//! The bounds string is shared with the on-device hierarchy producer and must
//! round-trip exactly: parsing then formatting yields the original string.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced when parsing or constructing [`Bounds`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundsError {
    /// The string does not match `[l,t][r,b]`.
    #[error("malformed bounds string: {0:?}")]
    Malformed(String),

    /// The corners are inverted (`left > right` or `top > bottom`).
    #[error("inverted bounds: [{left},{top}][{right},{bottom}]")]
    Inverted {
        /// Left edge.
        left: i32,
        /// Top edge.
        top: i32,
        /// Right edge.
        right: i32,
        /// Bottom edge.
        bottom: i32,
    },
}

impl BoundsError {
    /// Bounds come from tool output, so nothing here is user-fixable.
    pub fn is_actionable(&self) -> bool {
        false
    }
}

fn bounds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[(0|[1-9][0-9]*),(0|[1-9][0-9]*)\]\[(0|[1-9][0-9]*),(0|[1-9][0-9]*)\]$")
            .expect("Invalid bounds regex")
    })
}

/// A screen point in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

impl Point {
    /// Creates a point.
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned pixel rectangle.
///
/// Derived values (`width`, `height`, centre) are computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bounds {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

impl Bounds {
    /// Creates bounds, rejecting inverted corners.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Result<Self, BoundsError> {
        if left > right || top > bottom {
            return Err(BoundsError::Inverted { left, top, right, bottom });
        }
        Ok(Self { left, top, right, bottom })
    }

    /// Parses the canonical `[l,t][r,b]` encoding.
    ///
    /// Only unsigned decimal digits without leading zeros are accepted, so
    /// every string that parses formats back to itself.
    pub fn parse(s: &str) -> Result<Self, BoundsError> {
        let caps = bounds_regex()
            .captures(s)
            .ok_or_else(|| BoundsError::Malformed(s.to_string()))?;
        let mut values = [0i32; 4];
        for (slot, group) in values.iter_mut().zip(1..=4) {
            *slot = caps
                .get(group)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(|| BoundsError::Malformed(s.to_string()))?;
        }
        let [left, top, right, bottom] = values;
        Self::new(left, top, right, bottom)
    }

    /// Left edge.
    pub fn left(&self) -> i32 {
        self.left
    }

    /// Top edge.
    pub fn top(&self) -> i32 {
        self.top
    }

    /// Right edge.
    pub fn right(&self) -> i32 {
        self.right
    }

    /// Bottom edge.
    pub fn bottom(&self) -> i32 {
        self.bottom
    }

    /// Width in pixels, widened so extreme edges cannot overflow.
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    /// Height in pixels.
    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    /// Area in square pixels, saturating at `i64::MAX`.
    pub fn area(&self) -> i64 {
        self.width().saturating_mul(self.height())
    }

    /// Horizontal centre, floored to the pixel grid.
    pub fn center_x(&self) -> i32 {
        floor_mid(self.left, self.right)
    }

    /// Vertical centre, floored to the pixel grid.
    pub fn center_y(&self) -> i32 {
        floor_mid(self.top, self.bottom)
    }

    /// Centre point.
    pub fn center(&self) -> Point {
        Point::new(self.center_x(), self.center_y())
    }

    /// True if the point lies inside or on an edge.
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }

    /// True if `other` lies entirely within these bounds (edges inclusive).
    pub fn contains(&self, other: &Bounds) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// True if the rectangles share any area or edge.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.top <= other.bottom
            && other.top <= self.bottom
    }

    /// The overlapping rectangle, if any.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        if !self.intersects(other) {
            return None;
        }
        Some(Bounds {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        })
    }
}

fn floor_mid(a: i32, b: i32) -> i32 {
    let sum = i64::from(a) + i64::from(b);
    // div_euclid floors for negative sums too; the result always fits in i32.
    i32::try_from(sum.div_euclid(2)).unwrap_or(a)
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}][{},{}]", self.left, self.top, self.right, self.bottom)
    }
}

impl FromStr for Bounds {
    type Err = BoundsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Bounds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
