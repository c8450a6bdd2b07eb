//! # cococap Core
//!
//! The data side of a COCO image-captioning pipeline: a caption vocabulary
//! with a cached snapshot, a dataset adapter pairing images with encoded
//! captions, and a loader that batches captions of equal length so they
//! stack without padding.
//!
//! ## Quick Start
//!
//! ```rust
//! use cococap_core::corpus::{Annotation, CocoCaptions};
//! use cococap_core::sampler::LengthBucketSampler;
//! use cococap_core::tokenizer::CaptionTokenizer;
//! use cococap_core::vocab::{SpecialWords, Vocabulary};
//!
//! let corpus = CocoCaptions::from_records(vec![], vec![
//!     Annotation { id: 1, image_id: 1, caption: "A cat on a mat.".into() },
//!     Annotation { id: 2, image_id: 2, caption: "A dog.".into() },
//! ]);
//! let tokenizer = CaptionTokenizer::new().unwrap();
//! let vocab = Vocabulary::build(&corpus, 1, &tokenizer, SpecialWords::default());
//! assert_eq!(vocab.lookup("zebra"), vocab.unk_id());
//!
//! let mut sampler = LengthBucketSampler::new(&[7, 5, 7], 2, Some(0)).unwrap();
//! let batch = sampler.next_batch();
//! assert_eq!(batch.len(), 2);
//! ```
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod encoder;
pub mod error;
pub mod loader;
pub mod sampler;
pub mod tokenizer;
pub mod transform;
pub mod vocab;

// Re-export primary API
pub use config::{LoaderConfig, Mode, VocabSettings};
pub use corpus::{
    Annotation, CaptionCorpus, CocoCaptions, CocoImageInfo, EvaluationCorpus, ImageRecord,
};
pub use dataset::{CocoDataset, CocoItem};
pub use encoder::{EncoderCnn, FeatureBackbone};
pub use error::{CocoError, Result};
pub use loader::{
    CaptionBatch, EvalSample, EvalSamples, Loader, LoaderOptions, TrainBatches, make_loader,
};
pub use sampler::LengthBucketSampler;
pub use tokenizer::CaptionTokenizer;
pub use transform::{Crop, ImageTransform, Preprocess, image_to_tensor};
pub use vocab::{SpecialWords, Vocabulary};
