//! # COCO Corpus Access
//!
//! Narrow read-only views over the COCO annotation files. The dataset and
//! vocabulary code only ever talk to [`CaptionCorpus`] and
//! [`EvaluationCorpus`], so any source of records (JSON files, a database,
//! an in-memory fixture) can stand in.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CocoError, Result};

/// A caption annotation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub caption: String,
}

impl Annotation {
    pub fn new(id: u64, image_id: u64, caption: impl Into<String>) -> Self {
        Self {
            id,
            image_id,
            caption: caption.into(),
        }
    }
}

/// An image record. Only the file name is needed to locate the pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: u64,
    pub file_name: String,
}

impl ImageRecord {
    pub fn new(id: u64, file_name: impl Into<String>) -> Self {
        Self {
            id,
            file_name: file_name.into(),
        }
    }
}

/// Lookup-by-id access to training captions and the images they describe.
pub trait CaptionCorpus: Send + Sync {
    /// Annotation ids in corpus order.
    fn annotation_ids(&self) -> &[u64];

    fn annotation_by_id(&self, id: u64) -> Option<&Annotation>;

    fn image_by_id(&self, id: u64) -> Option<&ImageRecord>;
}

/// A flat list of images without ground-truth captions.
pub trait EvaluationCorpus: Send + Sync {
    fn image_list(&self) -> &[ImageRecord];
}

#[derive(Deserialize)]
struct CaptionsFile {
    images: Vec<ImageRecord>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Deserialize)]
struct ImageInfoFile {
    images: Vec<ImageRecord>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| CocoError::Annotations {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| CocoError::Annotations {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Training captions indexed by annotation id and image id.
#[derive(Debug, Clone, Default)]
pub struct CocoCaptions {
    ids: Vec<u64>,
    annotations: HashMap<u64, Annotation>,
    images: HashMap<u64, ImageRecord>,
}

impl CocoCaptions {
    /// Index in-memory records. Annotation order is preserved; a repeated
    /// annotation id keeps its first position and its last record.
    pub fn from_records(images: Vec<ImageRecord>, annotations: Vec<Annotation>) -> Self {
        let mut ids = Vec::with_capacity(annotations.len());
        let mut by_id = HashMap::with_capacity(annotations.len());
        for ann in annotations {
            if by_id.insert(ann.id, ann.clone()).is_none() {
                ids.push(ann.id);
            }
        }
        let images = images.into_iter().map(|img| (img.id, img)).collect();

        Self {
            ids,
            annotations: by_id,
            images,
        }
    }

    /// Load a COCO `captions_*.json` file.
    ///
    /// # Errors
    ///
    /// Returns `CocoError::Annotations` if the file is missing or malformed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let parsed: CaptionsFile = read_json(path)?;
        let corpus = Self::from_records(parsed.images, parsed.annotations);
        info!(
            path = %path.display(),
            annotations = corpus.ids.len(),
            images = corpus.images.len(),
            "loaded caption annotations"
        );
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl CaptionCorpus for CocoCaptions {
    fn annotation_ids(&self) -> &[u64] {
        &self.ids
    }

    fn annotation_by_id(&self, id: u64) -> Option<&Annotation> {
        self.annotations.get(&id)
    }

    fn image_by_id(&self, id: u64) -> Option<&ImageRecord> {
        self.images.get(&id)
    }
}

/// Evaluation image list (`image_info_*.json`).
#[derive(Debug, Clone, Default)]
pub struct CocoImageInfo {
    images: Vec<ImageRecord>,
}

impl CocoImageInfo {
    pub fn from_records(images: Vec<ImageRecord>) -> Self {
        Self { images }
    }

    /// Load a COCO `image_info_*.json` file. Any `annotations` key is ignored.
    ///
    /// # Errors
    ///
    /// Returns `CocoError::Annotations` if the file is missing or malformed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let parsed: ImageInfoFile = read_json(path)?;
        info!(path = %path.display(), images = parsed.images.len(), "loaded image info");
        Ok(Self::from_records(parsed.images))
    }
}

impl EvaluationCorpus for CocoImageInfo {
    fn image_list(&self) -> &[ImageRecord] {
        &self.images
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_json() -> &'static str {
        r#"{
            "info": {"year": 2017},
            "images": [
                {"id": 9, "file_name": "000000000009.jpg", "width": 640, "height": 480},
                {"id": 25, "file_name": "000000000025.jpg", "width": 640, "height": 426}
            ],
            "annotations": [
                {"id": 48, "image_id": 9, "caption": "A plate of food."},
                {"id": 7, "image_id": 25, "caption": "A giraffe eating leaves."},
                {"id": 12, "image_id": 9, "caption": "Broccoli and rice in a bowl."}
            ]
        }"#
    }

    #[test]
    fn test_captions_from_file_preserves_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_json().as_bytes()).unwrap();

        let corpus = CocoCaptions::from_file(file.path()).unwrap();
        assert_eq!(corpus.annotation_ids(), &[48, 7, 12]);
        assert_eq!(corpus.len(), 3);

        let ann = corpus.annotation_by_id(7).unwrap();
        assert_eq!(ann.image_id, 25);
        assert_eq!(
            corpus.image_by_id(ann.image_id).unwrap().file_name,
            "000000000025.jpg"
        );
        assert!(corpus.annotation_by_id(999).is_none());
    }

    #[test]
    fn test_image_info_ignores_annotations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_json().as_bytes()).unwrap();

        let info = CocoImageInfo::from_file(file.path()).unwrap();
        let names: Vec<_> = info.image_list().iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(names, ["000000000009.jpg", "000000000025.jpg"]);
    }

    #[test]
    fn test_missing_file_is_annotations_error() {
        let err = CocoCaptions::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, CocoError::Annotations { .. }));
    }

    #[test]
    fn test_malformed_file_is_annotations_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"images\": 3}").unwrap();

        let err = CocoImageInfo::from_file(file.path()).unwrap_err();
        assert!(matches!(err, CocoError::Annotations { .. }));
    }

    #[test]
    fn test_duplicate_annotation_ids_keep_first_position() {
        let corpus = CocoCaptions::from_records(
            vec![],
            vec![
                Annotation::new(1, 1, "first"),
                Annotation::new(2, 1, "second"),
                Annotation::new(1, 1, "replaced"),
            ],
        );
        assert_eq!(corpus.annotation_ids(), &[1, 2]);
        assert_eq!(corpus.annotation_by_id(1).unwrap().caption, "replaced");
    }
}
