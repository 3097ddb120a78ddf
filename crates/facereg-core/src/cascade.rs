//! Boosted Haar cascade model loaded from OpenCV's XML cascade format.
//!
//! Only the "new" layout (`<cascade>` root with `<stages>` and `<features>`)
//! with upright HAAR features is supported. That covers the stock
//! `haarcascade_frontalface_*.xml` files shipped with OpenCV.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed cascade XML: {0}")]
    Xml(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("invalid cascade: {0}")]
    Invalid(String),
}

/// One weighted rectangle of a Haar feature, in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

/// Split node of a weak classifier tree.
///
/// A child index `<= 0` refers to leaf `-child`; a positive index refers to
/// another node of the same tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Node {
    pub left: i32,
    pub right: i32,
    pub feature: usize,
    pub threshold: f32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct WeakClassifier {
    pub nodes: Vec<Node>,
    pub leaves: Vec<f32>,
}

impl WeakClassifier {
    /// Walk the tree, asking `feature_value` for each visited node's feature.
    pub fn evaluate(&self, mut feature_value: impl FnMut(usize) -> f64) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            let next = if feature_value(node.feature) < node.threshold as f64 {
                node.left
            } else {
                node.right
            };
            if next <= 0 {
                return self.leaves[next.unsigned_abs() as usize] as f64;
            }
            idx = next as usize;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

/// A parsed and validated cascade.
#[derive(Debug, Clone)]
pub struct Cascade {
    window_width: u32,
    window_height: u32,
    pub(crate) stages: Vec<Stage>,
    pub(crate) features: Vec<HaarFeature>,
}

impl Cascade {
    /// Load a cascade from an OpenCV XML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        let cascade = Self::from_xml(&xml)?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window_size(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse a cascade from XML text.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut builder = Builder::default();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    text.clear();
                    builder.open(&path);
                }
                Ok(Event::Text(t)) => {
                    let s = t.unescape().map_err(|e| CascadeError::Xml(e.to_string()))?;
                    text.push_str(&s);
                }
                Ok(Event::End(_)) => {
                    builder.close(&path, text.trim())?;
                    text.clear();
                    path.pop();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(CascadeError::Xml(format!(
                        "at byte {}: {e}",
                        reader.buffer_position()
                    )))
                }
            }
            buf.clear();
        }

        builder.finish()
    }

    /// Detection window (width, height) the cascade was trained on.
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Check internal consistency so evaluation can index without bounds errors.
    fn validate(&self) -> Result<(), CascadeError> {
        if self.window_width < 3 || self.window_height < 3 {
            return Err(CascadeError::Invalid(format!(
                "window {}x{} is too small",
                self.window_width, self.window_height
            )));
        }
        if self.stages.is_empty() {
            return Err(CascadeError::Invalid("no stages".into()));
        }

        for (fi, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(CascadeError::Invalid(format!("feature {fi} has no rects")));
            }
            for r in &feature.rects {
                if r.x + r.width > self.window_width || r.y + r.height > self.window_height {
                    return Err(CascadeError::Invalid(format!(
                        "feature {fi} rect ({}, {}, {}, {}) exceeds window",
                        r.x, r.y, r.width, r.height
                    )));
                }
            }
        }

        for (si, stage) in self.stages.iter().enumerate() {
            if stage.classifiers.is_empty() {
                return Err(CascadeError::Invalid(format!("stage {si} has no classifiers")));
            }
            for (ci, wc) in stage.classifiers.iter().enumerate() {
                let ctx = || format!("stage {si} classifier {ci}");
                if wc.nodes.is_empty() {
                    return Err(CascadeError::Invalid(format!("{}: no nodes", ctx())));
                }
                if wc.leaves.len() != wc.nodes.len() + 1 {
                    return Err(CascadeError::Invalid(format!(
                        "{}: {} nodes need {} leaves, got {}",
                        ctx(),
                        wc.nodes.len(),
                        wc.nodes.len() + 1,
                        wc.leaves.len()
                    )));
                }
                for (ni, node) in wc.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(CascadeError::Invalid(format!(
                            "{}: feature index {} out of range",
                            ctx(),
                            node.feature
                        )));
                    }
                    for child in [node.left, node.right] {
                        let ok = if child <= 0 {
                            (child.unsigned_abs() as usize) < wc.leaves.len()
                        } else {
                            // children always follow their parent, which rules out cycles
                            (child as usize) > ni && (child as usize) < wc.nodes.len()
                        };
                        if !ok {
                            return Err(CascadeError::Invalid(format!(
                                "{}: node {ni} has bad child {child}",
                                ctx()
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Accumulates cascade pieces while walking the XML tree.
#[derive(Default)]
struct Builder {
    seen_cascade: bool,
    width: Option<u32>,
    height: Option<u32>,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl Builder {
    /// Element paths relative to the document root element.
    fn rel(path: &[String]) -> Vec<&str> {
        path.iter().skip(1).map(String::as_str).collect()
    }

    fn open(&mut self, path: &[String]) {
        match Self::rel(path).as_slice() {
            ["cascade"] => self.seen_cascade = true,
            ["cascade", "stages", "_"] => self.stages.push(Stage::default()),
            ["cascade", "stages", "_", "weakClassifiers", "_"] => {
                if let Some(stage) = self.stages.last_mut() {
                    stage.classifiers.push(WeakClassifier::default());
                }
            }
            ["cascade", "features", "_"] => self.features.push(HaarFeature::default()),
            _ => {}
        }
    }

    fn close(&mut self, path: &[String], text: &str) -> Result<(), CascadeError> {
        match Self::rel(path).as_slice() {
            ["cascade", "stageType"] if text != "BOOST" => {
                return Err(CascadeError::Unsupported(format!("stage type {text}")));
            }
            ["cascade", "featureType"] if text != "HAAR" => {
                return Err(CascadeError::Unsupported(format!("feature type {text}")));
            }
            ["cascade", "width"] => self.width = Some(parse_scalar(text, "width")?),
            ["cascade", "height"] => self.height = Some(parse_scalar(text, "height")?),
            ["cascade", "stages", "_", "stageThreshold"] => {
                if let Some(stage) = self.stages.last_mut() {
                    stage.threshold = parse_scalar(text, "stageThreshold")?;
                }
            }
            ["cascade", "stages", "_", "weakClassifiers", "_", "internalNodes"] => {
                let values = parse_list(text, "internalNodes")?;
                if values.len() % 4 != 0 {
                    return Err(CascadeError::Unsupported(format!(
                        "internalNodes with {} values (categorical splits?)",
                        values.len()
                    )));
                }
                let nodes = values
                    .chunks_exact(4)
                    .map(|c| Node {
                        left: c[0] as i32,
                        right: c[1] as i32,
                        feature: c[2].max(0.0) as usize,
                        threshold: c[3] as f32,
                    })
                    .collect();
                if let Some(wc) = self.current_classifier() {
                    wc.nodes = nodes;
                }
            }
            ["cascade", "stages", "_", "weakClassifiers", "_", "leafValues"] => {
                let leaves = parse_list(text, "leafValues")?
                    .into_iter()
                    .map(|v| v as f32)
                    .collect();
                if let Some(wc) = self.current_classifier() {
                    wc.leaves = leaves;
                }
            }
            ["cascade", "features", "_", "rects", "_"] => {
                let v = parse_list(text, "rect")?;
                let &[x, y, w, h, weight] = v.as_slice() else {
                    return Err(CascadeError::Xml(format!("rect needs 5 values, got {text:?}")));
                };
                if x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0 {
                    return Err(CascadeError::Invalid(format!("rect {text:?}")));
                }
                if let Some(feature) = self.features.last_mut() {
                    feature.rects.push(WeightedRect {
                        x: x as u32,
                        y: y as u32,
                        width: w as u32,
                        height: h as u32,
                        weight: weight as f32,
                    });
                }
            }
            ["cascade", "features", "_", "tilted"] if text.trim() != "0" => {
                return Err(CascadeError::Unsupported("tilted Haar features".into()));
            }
            _ => {}
        }
        Ok(())
    }

    fn current_classifier(&mut self) -> Option<&mut WeakClassifier> {
        self.stages.last_mut().and_then(|s| s.classifiers.last_mut())
    }

    fn finish(self) -> Result<Cascade, CascadeError> {
        if !self.seen_cascade {
            return Err(CascadeError::Unsupported(
                "no <cascade> element (old-format cascades are not supported)".into(),
            ));
        }
        let cascade = Cascade {
            window_width: self.width.ok_or_else(|| CascadeError::Invalid("missing width".into()))?,
            window_height: self
                .height
                .ok_or_else(|| CascadeError::Invalid("missing height".into()))?,
            stages: self.stages,
            features: self.features,
        };
        cascade.validate()?;
        Ok(cascade)
    }
}

fn parse_list(text: &str, what: &str) -> Result<Vec<f64>, CascadeError> {
    text.split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|e| CascadeError::Xml(format!("{what}: bad number {t:?}: {e}")))
        })
        .collect()
}

fn parse_scalar<T: std::str::FromStr>(text: &str, what: &str) -> Result<T, CascadeError>
where
    T::Err: std::fmt::Display,
{
    text.trim()
        .parse::<T>()
        .map_err(|e| CascadeError::Xml(format!("{what}: bad value {text:?}: {e}")))
}

/// Single-stage, single-stump 8x8 cascade that fires on a window whose lower
/// half is brighter than its upper half.
#[cfg(test)]
pub(crate) const TEST_CASCADE_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>8</height>
  <width>8</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 5.0000000000000000e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 8 8 -1.</_>
        <_>
          0 4 8 4 2.</_></rects></_></features></cascade>
</opencv_storage>
"#;
