//! Timed waypoint paths for swipe and drag gestures.
//!
//! [`generate`] interpolates between two screen points, shaping velocity
//! with an [`Easing`] curve. The resulting [`MotionPoint`]s are handed to
//! whatever issues the actual input events; when a total duration is
//! requested each point carries the pause to take before the next one.
//!
//! # Example
//!
//! ```
//! use tapwright_core::bounds::Point;
//! use tapwright_core::motion::{generate, Easing, MotionOptions};
//!
//! let path = generate(
//!     Point::new(540, 1800),
//!     Point::new(540, 600),
//!     MotionOptions { steps: 10, easing: Easing::EaseOutQuad, duration_ms: Some(300) },
//! ).unwrap();
//!
//! assert_eq!(path.len(), 11);
//! assert_eq!(path.iter().filter_map(|p| p.delay).sum::<u64>(), 300);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bounds::Point;

/// Default number of interpolation steps.
pub const DEFAULT_STEPS: u32 = 20;

/// Errors produced by path generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MotionError {
    /// A path needs at least one step.
    #[error("steps must be at least 1")]
    ZeroSteps,

    /// The easing name is not recognized.
    #[error("unknown easing '{0}' (expected one of: linear, ease-in, ease-out, ease-in-out, ease-in-out-cubic, ease-out-back)")]
    UnknownEasing(String),
}

impl MotionError {
    /// Always true: both variants come from caller input.
    pub fn is_actionable(&self) -> bool {
        true
    }
}

/// Maps linear progress in `0..=1` to eased progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    /// Constant velocity.
    Linear,
    /// Accelerate from rest.
    #[serde(rename = "ease-in")]
    EaseInQuad,
    /// Decelerate to rest.
    #[serde(rename = "ease-out")]
    EaseOutQuad,
    /// Accelerate then decelerate.
    #[default]
    #[serde(rename = "ease-in-out")]
    EaseInOutQuad,
    /// Stronger accelerate/decelerate.
    EaseInOutCubic,
    /// Overshoots slightly before settling, like a flick.
    EaseOutBack,
}

impl Easing {
    /// All variants, in declaration order.
    pub const ALL: [Easing; 6] = [
        Easing::Linear,
        Easing::EaseInQuad,
        Easing::EaseOutQuad,
        Easing::EaseInOutQuad,
        Easing::EaseInOutCubic,
        Easing::EaseOutBack,
    ];

    /// Applies the curve. Input is clamped to `0..=1`; the output is exactly
    /// 0 at 0 and 1 at 1.
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::EaseInQuad => t * t,
            Easing::EaseOutQuad => t * (2.0 - t),
            Easing::EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Easing::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    let f = 2.0 * t - 2.0;
                    0.5 * f * f * f + 1.0
                }
            }
            Easing::EaseOutBack => {
                const C1: f64 = 1.701_58;
                const C3: f64 = C1 + 1.0;
                let u = t - 1.0;
                1.0 + C3 * u * u * u + C1 * u * u
            }
        }
    }

    /// Kebab-case name.
    pub fn name(self) -> &'static str {
        match self {
            Easing::Linear => "linear",
            Easing::EaseInQuad => "ease-in",
            Easing::EaseOutQuad => "ease-out",
            Easing::EaseInOutQuad => "ease-in-out",
            Easing::EaseInOutCubic => "ease-in-out-cubic",
            Easing::EaseOutBack => "ease-out-back",
        }
    }
}

impl fmt::Display for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Easing {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Easing::ALL
            .into_iter()
            .find(|e| e.name() == s)
            .ok_or_else(|| MotionError::UnknownEasing(s.to_string()))
    }
}

/// A waypoint in a gesture path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionPoint {
    /// Horizontal coordinate in pixels.
    pub x: i32,
    /// Vertical coordinate in pixels.
    pub y: i32,
    /// Milliseconds to wait before moving to the next point. Present only
    /// when a total duration was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

/// Parameters for [`generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionOptions {
    /// Number of segments; the path has `steps + 1` points.
    pub steps: u32,
    /// Velocity profile.
    pub easing: Easing,
    /// Total gesture duration, spread across the points as delays.
    pub duration_ms: Option<u64>,
}

impl Default for MotionOptions {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            easing: Easing::default(),
            duration_ms: None,
        }
    }
}

fn lerp(from: i32, to: i32, progress: f64) -> i32 {
    let value = f64::from(from) + (f64::from(to) - f64::from(from)) * progress;
    // Eased progress may overshoot slightly (ease-out-back); clamp into i32.
    value.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

/// Splits `total` into `parts` integer delays whose sum is exactly `total`,
/// giving the remainder to the earliest parts.
fn split_duration(total: u64, parts: u32) -> Vec<u64> {
    let parts_u64 = u64::from(parts);
    let base = total / parts_u64;
    let remainder = total % parts_u64;
    (0..parts_u64)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Generates `steps + 1` waypoints from `start` to `end`.
///
/// The first point is `start` and the last point is `end`, exactly.
pub fn generate(start: Point, end: Point, options: MotionOptions) -> Result<Vec<MotionPoint>, MotionError> {
    if options.steps == 0 {
        return Err(MotionError::ZeroSteps);
    }

    let delays = options
        .duration_ms
        .map(|total| split_duration(total, options.steps));

    let steps = f64::from(options.steps);
    let points = (0..=options.steps)
        .map(|i| {
            let (x, y) = if i == 0 {
                (start.x, start.y)
            } else if i == options.steps {
                (end.x, end.y)
            } else {
                let progress = options.easing.apply(f64::from(i) / steps);
                (lerp(start.x, end.x, progress), lerp(start.y, end.y, progress))
            };
            let delay = delays.as_ref().map(|d| {
                usize::try_from(i)
                    .ok()
                    .and_then(|idx| d.get(idx).copied())
                    .unwrap_or(0)
            });
            MotionPoint { x, y, delay }
        })
        .collect();

    Ok(points)
}
