//! # COCO Dataset Adapter
//!
//! Index-addressable view over the corpus. In train mode every annotation is
//! one entry yielding `(transformed image, caption ids)`; in evaluate mode
//! every image is one entry yielding `(raw pixels, transformed image)`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::Tensor;
use image::RgbImage;
use tracing::info;

use crate::config::{LoaderConfig, Mode};
use crate::corpus::{CaptionCorpus, CocoCaptions, CocoImageInfo, EvaluationCorpus};
use crate::error::{CocoError, Result};
use crate::tokenizer::CaptionTokenizer;
use crate::transform::ImageTransform;
use crate::vocab::Vocabulary;

/// One fetched dataset entry.
#[derive(Debug, Clone)]
pub enum CocoItem {
    Train {
        /// Transformed image, `[C, H, W]`.
        image: Tensor,
        /// Caption ids bracketed by the start and end ids.
        caption: Vec<u32>,
    },
    Evaluate {
        /// Untransformed decoded pixels.
        original: RgbImage,
        /// Transformed image, `[C, H, W]`.
        image: Tensor,
    },
}

impl CocoItem {
    pub fn image(&self) -> &Tensor {
        match self {
            Self::Train { image, .. } | Self::Evaluate { image, .. } => image,
        }
    }

    pub fn caption(&self) -> Option<&[u32]> {
        match self {
            Self::Train { caption, .. } => Some(caption),
            Self::Evaluate { .. } => None,
        }
    }
}

enum Entries {
    Train {
        corpus: Arc<dyn CaptionCorpus>,
        ids: Vec<u64>,
        // Index-aligned with `ids`; start and end ids included.
        caption_lengths: Vec<usize>,
    },
    Evaluate {
        file_names: Vec<String>,
    },
}

/// The COCO captions dataset in either mode.
pub struct CocoDataset {
    entries: Entries,
    images_dir: PathBuf,
    vocab: Arc<Vocabulary>,
    tokenizer: CaptionTokenizer,
    transform: Arc<dyn ImageTransform>,
    batch_size: usize,
}

impl CocoDataset {
    /// Training dataset over every annotation in the corpus.
    ///
    /// Caption lengths are computed here, once, for the length-bucketed sampler.
    ///
    /// # Errors
    ///
    /// Returns `CocoError::InvalidConfiguration` for a zero batch size and
    /// `CocoError::UnknownRecord` if an annotation id has no record.
    pub fn train(
        corpus: Arc<dyn CaptionCorpus>,
        vocab: Arc<Vocabulary>,
        transform: Arc<dyn ImageTransform>,
        images_dir: impl Into<PathBuf>,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(CocoError::InvalidConfiguration(
                "batch size must be at least 1".into(),
            ));
        }
        let tokenizer = CaptionTokenizer::new()?;

        info!("Identifying caption lengths...");
        let ids = corpus.annotation_ids().to_vec();
        let caption_lengths = ids
            .iter()
            .map(|&id| {
                corpus
                    .annotation_by_id(id)
                    .map(|ann| tokenizer.count(&ann.caption) + 2)
                    .ok_or(CocoError::UnknownRecord {
                        kind: "annotation",
                        id,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        info!(entries = ids.len(), "training dataset ready");

        Ok(Self {
            entries: Entries::Train {
                corpus,
                ids,
                caption_lengths,
            },
            images_dir: images_dir.into(),
            vocab,
            tokenizer,
            transform,
            batch_size,
        })
    }

    /// Evaluation dataset over an image list. Captions are not available, so
    /// batches cannot be stacked and the batch size must be 1.
    ///
    /// # Errors
    ///
    /// Returns `CocoError::InvalidConfiguration` if `batch_size != 1`.
    pub fn evaluate<C: EvaluationCorpus + ?Sized>(
        corpus: &C,
        vocab: Arc<Vocabulary>,
        transform: Arc<dyn ImageTransform>,
        images_dir: impl Into<PathBuf>,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size != 1 {
            return Err(CocoError::InvalidConfiguration(format!(
                "batch size must be 1 in evaluate mode, got {batch_size}"
            )));
        }
        let file_names: Vec<String> = corpus
            .image_list()
            .iter()
            .map(|img| img.file_name.clone())
            .collect();
        info!(entries = file_names.len(), "evaluation dataset ready");

        Ok(Self {
            entries: Entries::Evaluate { file_names },
            images_dir: images_dir.into(),
            vocab,
            tokenizer: CaptionTokenizer::new()?,
            transform,
            batch_size,
        })
    }

    /// Validate the configuration, load the corpus for its mode, run the
    /// vocabulary cache life cycle and build the dataset.
    pub fn from_config(config: &LoaderConfig, transform: Arc<dyn ImageTransform>) -> Result<Self> {
        config.validate()?;

        match config.mode {
            Mode::Train => {
                let corpus = Arc::new(CocoCaptions::from_file(&config.annotations_file)?);
                let tokenizer = CaptionTokenizer::new()?;
                let vocab = Vocabulary::load_or_build(&config.vocab, corpus.as_ref(), &tokenizer)?;
                Self::train(
                    corpus,
                    Arc::new(vocab),
                    transform,
                    &config.images_dir,
                    config.batch_size,
                )
            }
            Mode::Evaluate => {
                let vocab = Vocabulary::load(&config.vocab.vocab_file)?;
                let corpus = CocoImageInfo::from_file(&config.annotations_file)?;
                Self::evaluate(
                    &corpus,
                    Arc::new(vocab),
                    transform,
                    &config.images_dir,
                    config.batch_size,
                )
            }
        }
    }

    pub fn mode(&self) -> Mode {
        match self.entries {
            Entries::Train { .. } => Mode::Train,
            Entries::Evaluate { .. } => Mode::Evaluate,
        }
    }

    /// Annotation count in train mode, image count in evaluate mode.
    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Train { ids, .. } => ids.len(),
            Entries::Evaluate { file_names } => file_names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Tokenized caption length (start and end included) of a train entry.
    /// `None` in evaluate mode or when out of range.
    pub fn caption_length(&self, index: usize) -> Option<usize> {
        self.caption_lengths()
            .and_then(|lengths| lengths.get(index).copied())
    }

    /// All caption lengths, index-aligned with the dataset. `None` in evaluate mode.
    pub fn caption_lengths(&self) -> Option<&[usize]> {
        match &self.entries {
            Entries::Train {
                caption_lengths, ..
            } => Some(caption_lengths),
            Entries::Evaluate { .. } => None,
        }
    }

    /// Location of the image behind an entry.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn image_path(&self, index: usize) -> Result<PathBuf> {
        let file_name = match &self.entries {
            Entries::Train { corpus, ids, .. } => {
                let ann = Self::annotation(corpus.as_ref(), ids[index])?;
                let image = corpus
                    .image_by_id(ann.image_id)
                    .ok_or(CocoError::UnknownRecord {
                        kind: "image",
                        id: ann.image_id,
                    })?;
                image.file_name.as_str()
            }
            Entries::Evaluate { file_names } => file_names[index].as_str(),
        };
        Ok(self.images_dir.join(file_name))
    }

    fn annotation(corpus: &dyn CaptionCorpus, id: u64) -> Result<&crate::corpus::Annotation> {
        corpus.annotation_by_id(id).ok_or(CocoError::UnknownRecord {
            kind: "annotation",
            id,
        })
    }

    fn load_image(path: &Path) -> Result<RgbImage> {
        if !path.is_file() {
            return Err(CocoError::MissingImage(path.to_path_buf()));
        }
        let decoded = image::open(path).map_err(|e| CocoError::ImageDecode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(decoded.to_rgb8())
    }

    /// Fetch one entry.
    ///
    /// # Errors
    ///
    /// Returns `CocoError::MissingImage` if the image file is absent and
    /// `CocoError::ImageDecode` if it cannot be decoded.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn get(&self, index: usize) -> Result<CocoItem> {
        let path = self.image_path(index)?;
        let pixels = Self::load_image(&path)?;

        match &self.entries {
            Entries::Train { corpus, ids, .. } => {
                let ann = Self::annotation(corpus.as_ref(), ids[index])?;
                let tokens = self.tokenizer.tokenize(&ann.caption);
                Ok(CocoItem::Train {
                    image: self.transform.apply(&pixels)?,
                    caption: self.vocab.encode(&tokens),
                })
            }
            Entries::Evaluate { .. } => {
                let image = self.transform.apply(&pixels)?;
                Ok(CocoItem::Evaluate {
                    original: pixels,
                    image,
                })
            }
        }
    }
}
