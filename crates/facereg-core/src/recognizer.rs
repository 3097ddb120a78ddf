//! LBPH (Local Binary Pattern Histogram) face recognizer.
//!
//! Each face is reduced to a concatenation of per-cell histograms of
//! circular local binary patterns. Prediction is nearest neighbour over all
//! training histograms with a chi-square distance, so the returned
//! confidence is a distance: lower means a closer match.

use crate::types::Prediction;
use image::GrayImage;
use thiserror::Error;

const LBPH_RADIUS: u32 = 1;
const LBPH_NEIGHBORS: u32 = 8;
const LBPH_GRID_X: u32 = 8;
const LBPH_GRID_Y: u32 = 8;
/// Interpolated neighbours within this of the centre count as equal.
const LBP_EQ_EPS: f64 = 1e-9;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("no training samples")]
    Empty,
    #[error("image {width}x{height} is too small for radius {radius} and a {grid_x}x{grid_y} grid")]
    ImageTooSmall {
        width: u32,
        height: u32,
        radius: u32,
        grid_x: u32,
        grid_y: u32,
    },
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
}

/// Capability: classify a grayscale face crop.
pub trait Recognize {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognizerError>;
}

/// LBPH operator and grid parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: LBPH_RADIUS,
            neighbors: LBPH_NEIGHBORS,
            grid_x: LBPH_GRID_X,
            grid_y: LBPH_GRID_Y,
        }
    }
}

impl LbphParams {
    fn validate(&self) -> Result<(), RecognizerError> {
        if self.radius == 0 {
            return Err(RecognizerError::InvalidParams("radius must be >= 1".into()));
        }
        // Histogram has 2^neighbors bins; keep it sane.
        if self.neighbors == 0 || self.neighbors > 16 {
            return Err(RecognizerError::InvalidParams(format!(
                "neighbors must be in 1..=16, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(RecognizerError::InvalidParams("grid must be at least 1x1".into()));
        }
        Ok(())
    }

    /// Whether an image of this size yields at least one code per grid cell.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        let margin = 2 * self.radius;
        width > margin
            && height > margin
            && (width - margin) / self.grid_x.max(1) > 0
            && (height - margin) / self.grid_y.max(1) > 0
    }

    fn bins(&self) -> usize {
        1usize << self.neighbors
    }
}

/// Trained LBPH model.
pub struct LbphRecognizer {
    params: LbphParams,
    histograms: Vec<Vec<f32>>,
    labels: Vec<i32>,
}

impl LbphRecognizer {
    /// Train with default parameters (radius 1, 8 neighbours, 8x8 grid).
    pub fn train(samples: &[(GrayImage, i32)]) -> Result<Self, RecognizerError> {
        Self::train_with(LbphParams::default(), samples)
    }

    pub fn train_with(
        params: LbphParams,
        samples: &[(GrayImage, i32)],
    ) -> Result<Self, RecognizerError> {
        params.validate()?;
        if samples.is_empty() {
            return Err(RecognizerError::Empty);
        }

        let mut histograms = Vec::with_capacity(samples.len());
        let mut labels = Vec::with_capacity(samples.len());
        for (image, label) in samples {
            histograms.push(spatial_histogram(image, &params)?);
            labels.push(*label);
        }

        tracing::info!(
            samples = histograms.len(),
            classes = {
                let mut l = labels.clone();
                l.sort_unstable();
                l.dedup();
                l.len()
            },
            "trained LBPH recognizer"
        );

        Ok(Self { params, histograms, labels })
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    pub fn sample_count(&self) -> usize {
        self.histograms.len()
    }
}

impl Recognize for LbphRecognizer {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognizerError> {
        let query = spatial_histogram(face, &self.params)?;

        let mut best = Prediction { label: -1, distance: f64::MAX };
        for (hist, &label) in self.histograms.iter().zip(&self.labels) {
            let d = chi_square(hist, &query);
            if d < best.distance {
                best = Prediction { label, distance: d };
            }
        }

        tracing::trace!(label = best.label, distance = best.distance, "LBPH prediction");
        Ok(best)
    }
}

/// Circular LBP codes for every pixel at least `radius` from the border.
///
/// Returns the code image as (width, height, codes).
fn lbp_codes(image: &GrayImage, params: &LbphParams) -> (u32, u32, Vec<u32>) {
    let r = params.radius as i64;
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (out_w, out_h) = ((w - 2 * r) as usize, (h - 2 * r) as usize);
    let mut codes = vec![0u32; out_w * out_h];
    let src = |x: i64, y: i64| image.as_raw()[(y * w + x) as usize] as f64;

    for n in 0..params.neighbors {
        let angle = 2.0 * std::f64::consts::PI * n as f64 / params.neighbors as f64;
        let sx = params.radius as f64 * angle.cos();
        let sy = -(params.radius as f64) * angle.sin();

        let (fx, fy) = (sx.floor(), sy.floor());
        let (cx, cy) = (sx.ceil() as i64, sy.ceil() as i64);
        let (tx, ty) = (sx - fx, sy - fy);
        let (fx, fy) = (fx as i64, fy as i64);

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for y in r..h - r {
            for x in r..w - r {
                let t = w1 * src(x + fx, y + fy)
                    + w2 * src(x + cx, y + fy)
                    + w3 * src(x + fx, y + cy)
                    + w4 * src(x + cx, y + cy);
                let center = src(x, y);
                if t > center || (t - center).abs() < LBP_EQ_EPS {
                    codes[((y - r) as usize) * out_w + (x - r) as usize] |= 1 << n;
                }
            }
        }
    }

    (out_w as u32, out_h as u32, codes)
}

/// Concatenated, per-cell normalized histograms over the LBP code image.
fn spatial_histogram(
    image: &GrayImage,
    params: &LbphParams,
) -> Result<Vec<f32>, RecognizerError> {
    if !params.fits(image.width(), image.height()) {
        return Err(RecognizerError::ImageTooSmall {
            width: image.width(),
            height: image.height(),
            radius: params.radius,
            grid_x: params.grid_x,
            grid_y: params.grid_y,
        });
    }

    let (cw, ch, codes) = lbp_codes(image, params);
    let cell_w = cw / params.grid_x;
    let cell_h = ch / params.grid_y;

    let bins = params.bins();
    let cell_area = (cell_w * cell_h) as f32;
    let mut hist = vec![0f32; bins * (params.grid_x * params.grid_y) as usize];

    for gy in 0..params.grid_y {
        for gx in 0..params.grid_x {
            let cell = (gy * params.grid_x + gx) as usize;
            let out = &mut hist[cell * bins..(cell + 1) * bins];
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    out[codes[(y * cw + x) as usize] as usize] += 1.0;
                }
            }
            for v in out.iter_mut() {
                *v /= cell_area;
            }
        }
    }

    Ok(hist)
}

/// Symmetric chi-square distance: sum of 2 (a - b)^2 / (a + b).
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&p, &q)| {
            let s = (p + q) as f64;
            if s > 0.0 {
                let d = (p - q) as f64;
                2.0 * d * d / s
            } else {
                0.0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Deterministic textured "face": a mix of stripes and a blob, varied by seed.
    fn synthetic_face(seed: u32, w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let v = match seed % 3 {
                0 => ((x / 3 + y / 5) % 2) * 200 + 20,
                1 => (((x * x + y * y) / 40) % 2) * 180 + 40,
                _ => ((x * 7 + y * 13 + (x * y) % 11) % 256) as u32,
            };
            Luma([v as u8])
        })
    }

    #[test]
    fn test_lbp_flat_image_all_ones() {
        // every neighbour equals the centre → every bit set
        let img = GrayImage::from_pixel(5, 5, Luma([77]));
        let (w, h, codes) = lbp_codes(&img, &LbphParams::default());
        assert_eq!((w, h), (3, 3));
        assert!(codes.iter().all(|&c| c == 0xFF), "{codes:?}");
    }

    #[test]
    fn test_lbp_isolated_bright_center() {
        let mut img = GrayImage::from_pixel(3, 3, Luma([10]));
        img.put_pixel(1, 1, Luma([200]));
        let (_, _, codes) = lbp_codes(&img, &LbphParams::default());
        assert_eq!(codes, vec![0]);
    }

    #[test]
    fn test_histogram_cells_sum_to_one() {
        let img = synthetic_face(2, 40, 48);
        let p = LbphParams::default();
        let hist = spatial_histogram(&img, &p).unwrap();
        assert_eq!(hist.len(), p.bins() * 64);
        for cell in hist.chunks(p.bins()) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-4, "cell total {total}");
        }
    }

    #[test]
    fn test_chi_square() {
        assert_eq!(chi_square(&[0.5, 0.5], &[0.5, 0.5]), 0.0);
        // 2 * 1 / 1 + 2 * 1 / 1
        assert!((chi_square(&[1.0, 0.0], &[0.0, 1.0]) - 4.0).abs() < 1e-9);
        assert_eq!(chi_square(&[0.0], &[0.0]), 0.0);
    }

    #[test]
    fn test_params_fit_boundary() {
        let p = LbphParams::default();
        // 8 cells need 8 codes per axis plus the 1px ring on each side
        assert!(p.fits(10, 10));
        assert!(!p.fits(9, 10));
        assert!(!p.fits(10, 2));
        assert!(!p.fits(8, 8));
    }

    #[test]
    fn test_train_empty() {
        assert!(matches!(LbphRecognizer::train(&[]), Err(RecognizerError::Empty)));
    }

    #[test]
    fn test_too_small_image() {
        let tiny = GrayImage::from_pixel(6, 6, Luma([1]));
        assert!(matches!(
            LbphRecognizer::train(&[(tiny, 0)]),
            Err(RecognizerError::ImageTooSmall { .. })
        ));
    }

    #[test]
    fn test_invalid_params() {
        let p = LbphParams { neighbors: 0, ..Default::default() };
        let img = synthetic_face(0, 40, 40);
        assert!(matches!(
            LbphRecognizer::train_with(p, &[(img, 0)]),
            Err(RecognizerError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_predict_training_image_is_self_consistent() {
        let samples: Vec<(GrayImage, i32)> = (0..3)
            .flat_map(|label| {
                [
                    (synthetic_face(label as u32, 60, 60), label),
                    (synthetic_face(label as u32, 64, 70), label),
                ]
            })
            .collect();

        let model = LbphRecognizer::train(&samples).unwrap();
        assert_eq!(model.sample_count(), 6);

        for (image, label) in &samples {
            let p = model.predict(image).unwrap();
            assert_eq!(p.label, *label);
            assert!(p.distance < 1e-9, "distance {}", p.distance);
        }
    }

    #[test]
    fn test_predict_invariant_to_brightness_shift() {
        let samples = vec![
            (synthetic_face(0, 80, 80), 0),
            (synthetic_face(1, 80, 80), 1),
        ];
        let model = LbphRecognizer::train(&samples).unwrap();

        let mut brighter = synthetic_face(1, 80, 80);
        for p in brighter.pixels_mut() {
            p.0[0] = p.0[0].saturating_add(5);
        }
        let p = model.predict(&brighter).unwrap();
        assert_eq!(p.label, 1);
        assert!(p.distance < 1e-9);
    }

    #[test]
    fn test_predict_rejects_tiny_crop() {
        let model = LbphRecognizer::train(&[(synthetic_face(0, 40, 40), 0)]).unwrap();
        let tiny = GrayImage::from_pixel(4, 4, Luma([0]));
        assert!(model.predict(&tiny).is_err());
    }
}
