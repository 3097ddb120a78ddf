//! Registration, training and live recognition.
//!
//! Each workflow takes its hardware through the `VideoSource` / `FrameSink`
//! capabilities and its detector / recognizer through the core traits, so the
//! loops run the same against a webcam or a test double.

use crate::config::Config;
use crate::dataset::{DatasetError, FaceStore};
use crate::registry::{Registry, RegistryError};
use facereg_core::{
    ConfidenceThreshold, Detect, Identity, LabelMap, LbphParams, LbphRecognizer, Recognize,
    RecognizerError,
};
use facereg_hw::{FrameSink, Overlay, VideoSource};
use image::GrayImage;
use thiserror::Error;

/// Where the progress counter is drawn during registration.
const PROGRESS_POS: (i32, i32) = (10, 30);

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("invalid person name {0:?}: must be a non-empty single path component")]
    InvalidName(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("training failed: {0}")]
    Recognizer(#[from] RecognizerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSummary {
    pub name: String,
    pub new_photos: usize,
    pub total_photos: usize,
}

/// Capture face crops for `name` until `photos_per_session` new images exist,
/// the user quits, or the source stops delivering frames.
///
/// The registry record is replaced with the cumulative on-disk count and saved
/// before returning.
#[allow(clippy::too_many_arguments)]
pub fn register<S, K, D>(
    source: &mut S,
    sink: &mut K,
    detector: &D,
    store: &FaceStore,
    registry: &mut Registry,
    config: &Config,
    name: &str,
    age: &str,
) -> Result<RegistrationSummary, WorkflowError>
where
    S: VideoSource,
    K: FrameSink,
    D: Detect,
{
    FaceStore::validate_name(name).map_err(|_| WorkflowError::InvalidName(name.to_string()))?;
    store.ensure_person_dir(name)?;

    let existing = store.count_images(name)?;
    if let Some(record) = registry.get(name) {
        if record.photo_count as usize != existing {
            tracing::warn!(
                name,
                recorded = record.photo_count,
                on_disk = existing,
                "registry count differs from stored images; continuing from disk"
            );
        }
    }

    let target = config.photos_per_session;
    let mut index = store.next_index(name)?;
    let mut new_photos = 0usize;

    tracing::info!(name, existing, index, target, "starting registration");

    while new_photos < target {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed, ending capture");
                break;
            }
        };

        let faces = detector.detect(&frame.image, &config.capture);
        let mut overlays = Vec::with_capacity(faces.len() + 1);
        for face in &faces {
            overlays.push(Overlay::Face(*face));
            let Some(crop) = frame.crop(face) else {
                continue;
            };
            store.save_pair(name, index, &crop)?;
            index += 2;
            new_photos += 2;
        }
        tracing::debug!(
            sequence = frame.sequence,
            faces = faces.len(),
            new_photos,
            "captured"
        );

        overlays.push(Overlay::text(
            PROGRESS_POS.0,
            PROGRESS_POS.1,
            format!("Photos: {new_photos}/{target}"),
        ));
        if let Err(e) = sink.show(&frame, &overlays) {
            tracing::warn!(error = %e, "display failed, ending capture");
            break;
        }
        if sink.quit_requested() {
            tracing::info!("capture stopped by user");
            break;
        }
    }

    let total_photos = existing + new_photos;
    registry.upsert(name, age, u32::try_from(total_photos).unwrap_or(u32::MAX));
    registry.save()?;

    tracing::info!(name, new_photos, total_photos, "registration saved");

    Ok(RegistrationSummary {
        name: name.to_string(),
        new_photos,
        total_photos,
    })
}

/// A recognizer plus the label mapping it was trained with.
pub struct TrainedModel<R = LbphRecognizer> {
    pub recognizer: R,
    pub labels: LabelMap,
}

/// Train a fresh LBPH model on every stored image of every registered person.
///
/// Returns `Ok(None)` when there is nothing to train on.
/// Images too small for the LBPH grid are skipped like unreadable ones.
pub fn train(
    store: &FaceStore,
    registry: &Registry,
) -> Result<Option<TrainedModel>, WorkflowError> {
    let labels = LabelMap::from_names(registry.names());
    let params = LbphParams::default();

    let mut samples: Vec<(GrayImage, i32)> = Vec::new();
    for (label, name) in labels.iter() {
        let images = match store.load_images(name) {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(name, error = %e, "skipping person with unreadable folder");
                continue;
            }
        };
        for img in images {
            if params.fits(img.width(), img.height()) {
                samples.push((img, label));
            } else {
                tracing::warn!(
                    name,
                    width = img.width(),
                    height = img.height(),
                    "skipping image too small to train on"
                );
            }
        }
    }

    if samples.is_empty() {
        tracing::info!(people = labels.len(), "no stored images to train on");
        return Ok(None);
    }

    let recognizer = LbphRecognizer::train_with(params, &samples)?;
    Ok(Some(TrainedModel { recognizer, labels }))
}

/// Turn a raw prediction into an identity.
///
/// Prediction errors, distances above `threshold`, and labels that no longer
/// map to a registered person all come out as `Unknown`.
pub fn classify<R: Recognize>(
    recognizer: &R,
    labels: &LabelMap,
    registry: &Registry,
    threshold: ConfidenceThreshold,
    face: &GrayImage,
) -> Identity {
    let prediction = match recognizer.predict(face) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "prediction failed");
            return Identity::Unknown;
        }
    };

    if !threshold.accepts(prediction.distance) {
        return Identity::Unknown;
    }

    let Some(name) = labels.name_of(prediction.label) else {
        return Identity::Unknown;
    };
    match registry.get(name) {
        Some(record) => Identity::Recognized {
            name: name.to_string(),
            age: record.age.clone(),
        },
        None => Identity::Unknown,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecognitionSummary {
    pub frames: usize,
    pub faces: usize,
    pub recognized: usize,
}

/// Label faces in live frames until the user quits or frames stop.
pub fn recognize<S, K, D, R>(
    source: &mut S,
    sink: &mut K,
    detector: &D,
    model: &TrainedModel<R>,
    registry: &Registry,
    config: &Config,
) -> RecognitionSummary
where
    S: VideoSource,
    K: FrameSink,
    D: Detect,
    R: Recognize,
{
    let threshold = config.threshold();
    let mut summary = RecognitionSummary::default();

    loop {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed, ending recognition");
                break;
            }
        };
        summary.frames += 1;

        let faces = detector.detect(&frame.image, &config.recognition);
        let mut overlays = Vec::with_capacity(faces.len() * 2);
        for face in &faces {
            let identity = match frame.crop(face) {
                Some(crop) => {
                    classify(&model.recognizer, &model.labels, registry, threshold, &crop)
                }
                None => Identity::Unknown,
            };
            summary.faces += 1;
            if identity.is_recognized() {
                summary.recognized += 1;
            }
            overlays.push(Overlay::Face(*face));
            overlays.push(Overlay::caption(face, identity.caption()));
        }

        if let Err(e) = sink.show(&frame, &overlays) {
            tracing::warn!(error = %e, "display failed, ending recognition");
            break;
        }
        if sink.quit_requested() {
            break;
        }
    }

    tracing::info!(
        frames = summary.frames,
        faces = summary.faces,
        recognized = summary.recognized,
        "recognition finished"
    );
    summary
}
