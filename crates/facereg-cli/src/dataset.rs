//! Per-person folders of grayscale face crops.
//!
//! Layout: `<base_dir>/<name>/{index}.jpg` plus its mirror `{index}_flip.jpg`.

use image::{imageops, GrayImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("invalid person name {0:?}")]
    InvalidName(String),
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write image {path}: {source}")]
    Image {
        path: String,
        source: image::ImageError,
    },
}

/// Face image storage rooted at `base_dir`.
#[derive(Debug, Clone)]
pub struct FaceStore {
    base_dir: PathBuf,
}

impl FaceStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Names become directory names, so they must be a single path component.
    pub fn validate_name(name: &str) -> Result<(), DatasetError> {
        let bad = name.trim().is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0');
        if bad {
            return Err(DatasetError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    pub fn person_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn ensure_person_dir(&self, name: &str) -> Result<PathBuf, DatasetError> {
        Self::validate_name(name)?;
        let dir = self.person_dir(name);
        std::fs::create_dir_all(&dir).map_err(|source| DatasetError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(dir)
    }

    /// Number of `.jpg` files stored for `name`; a missing folder counts as zero.
    pub fn count_images(&self, name: &str) -> Result<usize, DatasetError> {
        Ok(self.image_paths(name)?.len())
    }

    /// First free pair index: one past the highest `{n}.jpg` / `{n}_flip.jpg`
    /// on disk, rounded up to even. Gaps left by deleted files are not reused.
    pub fn next_index(&self, name: &str) -> Result<usize, DatasetError> {
        let highest = self
            .image_paths(name)?
            .iter()
            .filter_map(|p| pair_index(p))
            .max();
        Ok(highest.map_or(0, |n| n / 2 * 2 + 2))
    }

    /// Write `face` as `{index}.jpg` and its horizontal mirror as `{index}_flip.jpg`.
    pub fn save_pair(
        &self,
        name: &str,
        index: usize,
        face: &GrayImage,
    ) -> Result<(), DatasetError> {
        let dir = self.person_dir(name);
        let original = dir.join(format!("{index}.jpg"));
        let mirrored = dir.join(format!("{index}_flip.jpg"));

        write_jpeg(&original, face)?;
        write_jpeg(&mirrored, &imageops::flip_horizontal(face))?;
        Ok(())
    }

    /// Load every stored image for `name` as grayscale, in file name order.
    ///
    /// Unreadable files are skipped with a warning.
    pub fn load_images(&self, name: &str) -> Result<Vec<GrayImage>, DatasetError> {
        let paths = self.image_paths(name)?;
        if paths.is_empty() {
            tracing::warn!(name, dir = %self.person_dir(name).display(), "no stored images");
        }

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            match image::open(&path) {
                Ok(img) => images.push(img.to_luma8()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image")
                }
            }
        }
        Ok(images)
    }

    fn image_paths(&self, name: &str) -> Result<Vec<PathBuf>, DatasetError> {
        let dir = self.person_dir(name);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(DatasetError::Io {
                    path: dir.display().to_string(),
                    source,
                })
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_jpeg(p))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg"))
}

/// Index encoded in a `{n}.jpg` or `{n}_flip.jpg` file name.
fn pair_index(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_suffix("_flip").unwrap_or(stem).parse().ok()
}

fn write_jpeg(path: &Path, image: &GrayImage) -> Result<(), DatasetError> {
    image.save(path).map_err(|source| DatasetError::Image {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| Luma([(x * 255 / w.max(1)) as u8]))
    }

    #[test]
    fn test_validate_name() {
        assert!(FaceStore::validate_name("alice").is_ok());
        assert!(FaceStore::validate_name("Ana Maria").is_ok());
        for bad in ["", "  ", ".", "..", "a/b", "a\\b"] {
            assert!(FaceStore::validate_name(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_missing_folder_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path());
        assert_eq!(store.count_images("nobody").unwrap(), 0);
        assert!(store.load_images("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_save_pair_writes_original_and_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path());
        store.ensure_person_dir("alice").unwrap();

        store.save_pair("alice", 0, &gradient(32, 32)).unwrap();
        store.save_pair("alice", 2, &gradient(32, 32)).unwrap();

        let person = dir.path().join("alice");
        for f in ["0.jpg", "0_flip.jpg", "2.jpg", "2_flip.jpg"] {
            assert!(person.join(f).is_file(), "{f} missing");
        }
        assert_eq!(store.count_images("alice").unwrap(), 4);

        // mirror puts the bright column on the left
        let flipped = image::open(person.join("0_flip.jpg")).unwrap().to_luma8();
        assert!(flipped.get_pixel(0, 16).0[0] > flipped.get_pixel(31, 16).0[0]);
    }

    #[test]
    fn test_load_skips_unreadable_and_non_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path());
        let person = store.ensure_person_dir("bob").unwrap();

        store.save_pair("bob", 0, &gradient(20, 20)).unwrap();
        std::fs::write(person.join("9.jpg"), b"not an image").unwrap();
        std::fs::write(person.join("notes.txt"), b"hello").unwrap();

        assert_eq!(store.count_images("bob").unwrap(), 3);
        let images = store.load_images("bob").unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].dimensions(), (20, 20));
    }

    #[test]
    fn test_next_index_skips_past_highest_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path());
        assert_eq!(store.next_index("erin").unwrap(), 0);

        let person = store.ensure_person_dir("erin").unwrap();
        store.save_pair("erin", 0, &gradient(20, 20)).unwrap();
        store.save_pair("erin", 2, &gradient(20, 20)).unwrap();
        assert_eq!(store.next_index("erin").unwrap(), 4);

        std::fs::remove_file(person.join("0.jpg")).unwrap();
        std::fs::remove_file(person.join("0_flip.jpg")).unwrap();
        assert_eq!(store.count_images("erin").unwrap(), 2);
        assert_eq!(store.next_index("erin").unwrap(), 4);

        // stray names do not move the index; an odd one rounds up
        std::fs::write(person.join("face.jpg"), b"x").unwrap();
        std::fs::write(person.join("7.jpg"), b"x").unwrap();
        assert_eq!(store.next_index("erin").unwrap(), 8);
    }

    #[test]
    fn test_pair_index() {
        assert_eq!(pair_index(Path::new("12.jpg")), Some(12));
        assert_eq!(pair_index(Path::new("12_flip.jpg")), Some(12));
        assert_eq!(pair_index(Path::new("face.jpg")), None);
    }

    #[test]
    fn test_ensure_person_dir_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path());
        assert!(matches!(
            store.ensure_person_dir(".."),
            Err(DatasetError::InvalidName(_))
        ));
    }
}
