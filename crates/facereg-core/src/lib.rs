//! facereg-core: Face detection and recognition engine.
//!
//! Haar cascade detection over an image pyramid and LBPH recognition,
//! both running on plain grayscale images.

pub mod cascade;
pub mod detector;
pub mod recognizer;
pub mod types;

pub use cascade::{Cascade, CascadeError};
pub use detector::{CascadeDetector, Detect};
pub use recognizer::{LbphParams, LbphRecognizer, Recognize, RecognizerError};
pub use types::{BoundingBox, ConfidenceThreshold, DetectParams, Identity, LabelMap, Prediction};
