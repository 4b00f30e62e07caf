//! # tapwright-core
//!
//! Core library for cross-platform mobile UI automation.
//!
//! Given a hierarchy snapshot from an Android (UIAutomator-style) or iOS
//! (accessibility-style) app, this crate normalizes it into one element model,
//! resolves elements by text, id, class, index or geometry, and generates
//! timed gesture paths. A second layer finds, installs and drives the
//! platform toolchains that produce those snapshots and execute gestures.
//!
//! ## Modules
//!
//! - [`hierarchy`] - Normalization of raw hierarchy JSON into [`hierarchy::Element`] trees
//! - [`bounds`] - Pixel rectangles in the `[l,t][r,b]` wire format
//! - [`element`] - Raw iOS accessibility element types
//! - [`resolver`] - Element queries, visibility and geometry helpers
//! - [`motion`] - Eased waypoint paths for swipes and drags
//! - [`process`] - External command execution with hard timeouts
//! - [`toolchain`] - Android SDK discovery, ranking and installation
//! - [`device`] - Emulator and simulator lifecycle across `adb`, `simctl` and `idb`
//! - [`cache`] - TTL cache with an injectable clock
//! - [`config`] - Persistent settings in `~/.tapwright/config.json`
//!
//! ## External Dependencies
//!
//! Device operations shell out to tools that must be installed separately:
//!
//! - **Android SDK** (`adb`, `emulator`, `avdmanager`, `sdkmanager`), which
//!   [`toolchain::ToolInstaller`] can install
//! - **Xcode** (for `xcrun simctl`)
//! - **idb** (`brew install facebook/fb/idb-companion`, `pip3 install fb-idb`)
//!
//! ## Example
//!
//! ```
//! use tapwright_core::hierarchy::Hierarchy;
//! use tapwright_core::resolver::{ElementResolver, TextQuery};
//!
//! let json = r#"{"hierarchy": {"node": {
//!     "bounds": "[0,0][1080,2400]",
//!     "node": [
//!         {"text": "Sign in", "clickable": "true", "bounds": "[40,1000][1040,1120]"},
//!         {"text": "Forgot password?", "bounds": "[40,1200][1040,1260]"}
//!     ]
//! }}}"#;
//!
//! let hierarchy = Hierarchy::from_json_str(json).unwrap();
//! let resolver = ElementResolver::new(&hierarchy);
//!
//! let button = resolver.find_by_text("sign in", TextQuery::default()).unwrap();
//! assert_eq!(button.bounds.center().x, 540);
//! assert_eq!(resolver.find_clickable().len(), 1);
//! ```

pub mod bounds;
pub mod cache;
pub mod config;
pub mod device;
pub mod element;
pub mod hierarchy;
pub mod motion;
pub mod process;
pub mod resolver;
pub mod toolchain;
