//! Action detection for guided pages
//!
//! This crate watches the raw DOM events of a page, classifies the ones a
//! person produced into guide-level actions (button press, highlight click,
//! form fill, navigation, hover), and matches them against the actions the
//! current steps declare so those steps can complete on their own.

pub mod auto_complete;
pub mod detector;
pub mod error;
pub mod events;
pub mod matcher;

pub use auto_complete::AutoCompleter;
pub use detector::{classify, ActionDetector, DetectorConfig};
pub use error::*;
pub use events::DetectedAction;
pub use matcher::{element_matches, inside_container, matches, type_compatible, value_matches};
