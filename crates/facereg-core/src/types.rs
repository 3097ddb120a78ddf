use serde::{Deserialize, Serialize};

/// Axis-aligned face region in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of raw cascade hits merged into this box (0 when grouping is off).
    pub neighbors: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, neighbors: 0 }
    }

    /// Clip the box to an image of the given size.
    ///
    /// Returns `None` if nothing of the box lies inside the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<BoundingBox> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(BoundingBox { width, height, ..*self })
    }
}

/// Sensitivity knobs for multi-scale cascade detection.
///
/// Fields missing from serialized input take their `Default` values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectParams {
    /// Pyramid step between scales; must be > 1.0.
    pub scale_factor: f64,
    /// A face needs more than this many overlapping raw hits to be kept.
    pub min_neighbors: u32,
    /// Smallest face (width, height) searched for; (0, 0) means no limit.
    pub min_size: (u32, u32),
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (0, 0),
        }
    }
}

/// Raw output of a recognizer: nearest label and its distance (lower = closer).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i32,
    pub distance: f64,
}

/// Outcome of classifying one detected face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Recognized { name: String, age: String },
    Unknown,
}

impl Identity {
    /// Text drawn above a face box.
    pub fn caption(&self) -> String {
        match self {
            Identity::Recognized { name, age } if age.is_empty() => name.clone(),
            Identity::Recognized { name, age } => format!("{name}, {age} years"),
            Identity::Unknown => "Unknown".to_string(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Identity::Recognized { .. })
    }
}

/// Maximum distance at which a prediction is still trusted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceThreshold(pub f64);

impl ConfidenceThreshold {
    /// Inclusive: a distance equal to the threshold is accepted.
    pub fn accepts(&self, distance: f64) -> bool {
        distance <= self.0
    }
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self(70.0)
    }
}

/// Integer label <-> person name mapping built for one training pass.
///
/// Labels are assigned in ascending name order so the mapping does not
/// depend on how the registry happens to iterate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: Vec<String>,
}

impl LabelMap {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn label_of(&self, name: &str) -> Option<i32> {
        self.names
            .binary_search_by(|n| n.as_str().cmp(name))
            .ok()
            .map(|i| i as i32)
    }

    pub fn name_of(&self, label: i32) -> Option<&str> {
        usize::try_from(label)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    /// (label, name) pairs in label order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i as i32, n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        let t = ConfidenceThreshold::default();
        assert!(t.accepts(0.0));
        assert!(t.accepts(70.0));
        assert!(!t.accepts(70.0001));
        assert!(!t.accepts(250.0));
    }

    #[test]
    fn test_label_map_sorted_and_reversible() {
        let map = LabelMap::from_names(["carol", "alice", "bob"]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.label_of("alice"), Some(0));
        assert_eq!(map.label_of("bob"), Some(1));
        assert_eq!(map.label_of("carol"), Some(2));
        assert_eq!(map.name_of(2), Some("carol"));
        assert_eq!(map.name_of(3), None);
        assert_eq!(map.name_of(-1), None);
        assert_eq!(map.label_of("dave"), None);
    }

    #[test]
    fn test_label_map_independent_of_input_order() {
        let a = LabelMap::from_names(["x", "y", "z"]);
        let b = LabelMap::from_names(["z", "x", "y"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_caption() {
        let full = Identity::Recognized { name: "alice".into(), age: "30".into() };
        assert_eq!(full.caption(), "alice, 30 years");
        let no_age = Identity::Recognized { name: "bob".into(), age: String::new() };
        assert_eq!(no_age.caption(), "bob");
        assert_eq!(Identity::Unknown.caption(), "Unknown");
    }

    #[test]
    fn test_clamp_to() {
        let b = BoundingBox::new(90, 10, 20, 20);
        let c = b.clamp_to(100, 100).unwrap();
        assert_eq!((c.x, c.y, c.width, c.height), (90, 10, 10, 20));
        assert!(BoundingBox::new(100, 0, 5, 5).clamp_to(100, 100).is_none());
        let inside = BoundingBox::new(0, 0, 10, 10);
        assert_eq!(inside.clamp_to(100, 100), Some(inside));
    }
}
