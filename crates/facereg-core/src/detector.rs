//! Multi-scale Haar cascade face detector.
//!
//! Scans an image pyramid with the cascade's fixed-size window, normalizes
//! each window by its standard deviation, and merges overlapping hits with
//! the usual min-neighbors grouping rule.

use crate::cascade::{Cascade, CascadeError, HaarFeature};
use crate::types::{BoundingBox, DetectParams};
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::path::Path;

/// Relative tolerance used when deciding that two raw hits are the same face.
const GROUP_EPS: f64 = 0.2;

/// Scale beyond which every row/column is scanned instead of every other one.
const DENSE_SCAN_FACTOR: f64 = 2.0;

/// Capability: find face regions in a grayscale image.
pub trait Detect {
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Vec<BoundingBox>;
}

/// Summed-area tables for pixel values and squared pixel values.
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = raw[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                let i = (y + 1) * stride + (x + 1);
                sum[i] = sum[i - stride] + row;
                sq_sum[i] = sq_sum[i - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    #[inline]
    fn area(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> i64 {
        let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
        let tl = table[y * stride + x] as i64;
        let tr = table[y * stride + x + w] as i64;
        let bl = table[(y + h) * stride + x] as i64;
        let br = table[(y + h) * stride + x + w] as i64;
        br - tr - bl + tl
    }

    fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> i64 {
        Self::area(&self.sum, self.stride, x, y, w, h)
    }

    fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> i64 {
        Self::area(&self.sq_sum, self.stride, x, y, w, h)
    }
}

/// Haar cascade detector.
pub struct CascadeDetector {
    cascade: Cascade,
}

impl CascadeDetector {
    pub fn new(cascade: Cascade) -> Self {
        Self { cascade }
    }

    /// Load the cascade XML at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        Ok(Self::new(Cascade::load(path)?))
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    /// Run every window position and scale, returning raw (ungrouped) hits in
    /// source-image coordinates.
    fn scan(&self, image: &GrayImage, params: &DetectParams) -> Vec<BoundingBox> {
        let (win_w, win_h) = self.cascade.window_size();
        let (img_w, img_h) = image.dimensions();
        let (min_w, min_h) = params.min_size;
        let mut hits = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let window_w = (win_w as f64 * factor).round() as u32;
            let window_h = (win_h as f64 * factor).round() as u32;
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;

            if scaled_w <= win_w || scaled_h <= win_h {
                break;
            }

            if window_w >= min_w && window_h >= min_h {
                let resized;
                let scaled: &GrayImage = if scaled_w == img_w && scaled_h == img_h {
                    image
                } else {
                    resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
                    &resized
                };

                let integral = IntegralImage::new(scaled);
                let step = if factor > DENSE_SCAN_FACTOR { 1 } else { 2 };
                let before = hits.len();

                for y in (0..scaled_h - win_h).step_by(step) {
                    for x in (0..scaled_w - win_w).step_by(step) {
                        if self.classify_window(&integral, x, y) {
                            hits.push(BoundingBox::new(
                                (x as f64 * factor).round() as u32,
                                (y as f64 * factor).round() as u32,
                                window_w,
                                window_h,
                            ));
                        }
                    }
                }

                tracing::trace!(
                    factor,
                    scaled_w,
                    scaled_h,
                    hits = hits.len() - before,
                    "scanned pyramid level"
                );
            }

            factor *= params.scale_factor;
        }

        hits
    }

    /// True if the window at (x, y) passes every stage.
    fn classify_window(&self, ii: &IntegralImage, x: u32, y: u32) -> bool {
        let (win_w, win_h) = self.cascade.window_size();

        // Normalize by the std-dev of the window interior (1px inset).
        let (nw, nh) = (win_w - 2, win_h - 2);
        let area = (nw * nh) as f64;
        let s = ii.rect_sum(x + 1, y + 1, nw, nh) as f64;
        let sq = ii.rect_sq_sum(x + 1, y + 1, nw, nh) as f64;
        let nf = area * sq - s * s;
        let inv_norm = if nf > 0.0 { 1.0 / nf.sqrt() } else { 1.0 };

        let features = &self.cascade.features;
        for stage in &self.cascade.stages {
            let mut stage_sum = 0.0f64;
            for wc in &stage.classifiers {
                stage_sum +=
                    wc.evaluate(|fi| feature_value(&features[fi], ii, x, y) * inv_norm);
            }
            if stage_sum < stage.threshold as f64 {
                return false;
            }
        }
        true
    }
}

fn feature_value(feature: &HaarFeature, ii: &IntegralImage, x: u32, y: u32) -> f64 {
    feature
        .rects
        .iter()
        .map(|r| r.weight as f64 * ii.rect_sum(x + r.x, y + r.y, r.width, r.height) as f64)
        .sum()
}

impl Detect for CascadeDetector {
    fn detect(&self, image: &GrayImage, params: &DetectParams) -> Vec<BoundingBox> {
        if !(params.scale_factor > 1.0) {
            tracing::warn!(scale_factor = params.scale_factor, "scale factor must be > 1.0");
            return Vec::new();
        }
        if image.width() == 0 || image.height() == 0 {
            return Vec::new();
        }

        let raw = self.scan(image, params);
        let grouped = group_rectangles(&raw, params.min_neighbors, GROUP_EPS);

        tracing::debug!(raw = raw.len(), faces = grouped.len(), "cascade detection");
        grouped
    }
}

/// Whether two hits are close enough to be the same face.
fn similar(a: &BoundingBox, b: &BoundingBox, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar hits, average each cluster, and drop clusters with
/// `min_neighbors` or fewer members. Small clusters sitting inside a
/// stronger one are removed as well.
///
/// With `min_neighbors == 0` the raw hits are returned unchanged.
pub fn group_rectangles(rects: &[BoundingBox], min_neighbors: u32, eps: f64) -> Vec<BoundingBox> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.iter().map(|r| BoundingBox { neighbors: 1, ..*r }).collect();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // root -> (sum x, sum y, sum w, sum h, count)
    let mut clusters: Vec<(usize, [u64; 4], u32)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        let slot = match clusters.iter().position(|(c, _, _)| *c == root) {
            Some(pos) => pos,
            None => {
                clusters.push((root, [0; 4], 0));
                clusters.len() - 1
            }
        };
        let (_, acc, count) = &mut clusters[slot];
        acc[0] += r.x as u64;
        acc[1] += r.y as u64;
        acc[2] += r.width as u64;
        acc[3] += r.height as u64;
        *count += 1;
    }

    let averaged: Vec<BoundingBox> = clusters
        .iter()
        .map(|(_, acc, count)| {
            let avg = |v: u64| (v as f64 / *count as f64).round() as u32;
            BoundingBox {
                x: avg(acc[0]),
                y: avg(acc[1]),
                width: avg(acc[2]),
                height: avg(acc[3]),
                neighbors: *count,
            }
        })
        .filter(|b| b.neighbors > min_neighbors)
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|(i, r1)| {
            !averaged.iter().enumerate().any(|(j, r2)| {
                if *i == j {
                    return false;
                }
                let dx = (r2.width as f64 * eps).round() as i64;
                let dy = (r2.height as f64 * eps).round() as i64;
                let (x1, y1) = (r1.x as i64, r1.y as i64);
                let (w1, h1) = (r1.width as i64, r1.height as i64);
                let (x2, y2) = (r2.x as i64, r2.y as i64);
                let (w2, h2) = (r2.width as i64, r2.height as i64);
                x1 >= x2 - dx
                    && y1 >= y2 - dy
                    && x1 + w1 <= x2 + w2 + dx
                    && y1 + h1 <= y2 + h2 + dy
                    && (r2.neighbors > r1.neighbors.max(3) || r1.neighbors < 3)
            })
        })
        .map(|(_, r)| *r)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::TEST_CASCADE_XML;
    use image::Luma;

    fn detector() -> CascadeDetector {
        CascadeDetector::new(Cascade::from_xml(TEST_CASCADE_XML).unwrap())
    }

    /// Dark upper half, bright lower half.
    fn edge_image(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |_, y| if y < h / 2 { Luma([0]) } else { Luma([255]) })
    }

    #[test]
    fn test_integral_rect_sum() {
        let img = GrayImage::from_fn(4, 3, |x, y| Luma([(x + y * 4) as u8]));
        let ii = IntegralImage::new(&img);
        // whole image: 0 + 1 + ... + 11 = 66
        assert_eq!(ii.rect_sum(0, 0, 4, 3), 66);
        // 2x2 at (1, 1): 5 + 6 + 9 + 10
        assert_eq!(ii.rect_sum(1, 1, 2, 2), 30);
        assert_eq!(ii.rect_sq_sum(1, 1, 2, 2), 25 + 36 + 81 + 100);
    }

    #[test]
    fn test_window_classification() {
        let d = detector();
        let hit = edge_image(8, 8);
        assert!(d.classify_window(&IntegralImage::new(&hit), 0, 0));

        let flat = GrayImage::from_pixel(8, 8, Luma([128]));
        assert!(!d.classify_window(&IntegralImage::new(&flat), 0, 0));

        // bright on top is the wrong polarity
        let inverted = GrayImage::from_fn(8, 8, |_, y| if y < 4 { Luma([255]) } else { Luma([0]) });
        assert!(!d.classify_window(&IntegralImage::new(&inverted), 0, 0));
    }

    #[test]
    fn test_detects_pattern_and_ignores_flat() {
        let d = detector();
        let params = DetectParams { scale_factor: 1.2, min_neighbors: 0, min_size: (0, 0) };

        let faces = d.detect(&edge_image(40, 40), &params);
        assert!(!faces.is_empty());
        for f in &faces {
            assert!(f.x + f.width <= 40 && f.y + f.height <= 40, "{f:?} out of bounds");
        }

        let flat = GrayImage::from_pixel(40, 40, Luma([90]));
        assert!(d.detect(&flat, &params).is_empty());
    }

    #[test]
    fn test_min_size_limits_scales() {
        let d = detector();
        let params = DetectParams { scale_factor: 1.1, min_neighbors: 0, min_size: (100, 100) };
        assert!(d.detect(&edge_image(40, 40), &params).is_empty());

        let params = DetectParams { min_size: (16, 16), ..params };
        let faces = d.detect(&edge_image(40, 40), &params);
        assert!(!faces.is_empty());
        assert!(faces.iter().all(|f| f.width >= 16 && f.height >= 16));
    }

    #[test]
    fn test_invalid_scale_factor_detects_nothing() {
        let d = detector();
        let params = DetectParams { scale_factor: 1.0, min_neighbors: 0, min_size: (0, 0) };
        assert!(d.detect(&edge_image(40, 40), &params).is_empty());
    }

    #[test]
    fn test_image_smaller_than_window() {
        let d = detector();
        assert!(d.detect(&edge_image(6, 6), &DetectParams::default()).is_empty());
    }

    #[test]
    fn test_group_rectangles_merges_and_thresholds() {
        let rects = vec![
            BoundingBox::new(10, 10, 50, 50),
            BoundingBox::new(12, 11, 50, 50),
            BoundingBox::new(11, 12, 52, 52),
            BoundingBox::new(200, 200, 40, 40),
        ];
        let grouped = group_rectangles(&rects, 1, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        let g = grouped[0];
        assert_eq!(g.neighbors, 3);
        assert_eq!((g.x, g.y, g.width, g.height), (11, 11, 51, 51));
    }

    #[test]
    fn test_group_rectangles_zero_neighbors_passthrough() {
        let rects = vec![BoundingBox::new(0, 0, 10, 10), BoundingBox::new(1, 1, 10, 10)];
        let grouped = group_rectangles(&rects, 0, GROUP_EPS);
        assert_eq!(grouped.len(), 2);
        assert!(grouped.iter().all(|r| r.neighbors == 1));
    }

    #[test]
    fn test_group_rectangles_drops_nested_weak_cluster() {
        let mut rects = Vec::new();
        // strong cluster of 6 around a 100x100 face
        for i in 0..6 {
            rects.push(BoundingBox::new(50 + i, 50, 100, 100));
        }
        // weak cluster of 2 well inside it
        rects.push(BoundingBox::new(80, 80, 30, 30));
        rects.push(BoundingBox::new(81, 80, 30, 30));

        let grouped = group_rectangles(&rects, 1, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].neighbors, 6);
    }

    #[test]
    fn test_similar() {
        let a = BoundingBox::new(0, 0, 100, 100);
        assert!(similar(&a, &BoundingBox::new(10, 10, 100, 100), 0.2));
        assert!(!similar(&a, &BoundingBox::new(30, 0, 100, 100), 0.2));
    }
}
