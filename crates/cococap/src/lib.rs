//! # cococap
//!
//! COCO captioning data pipeline: caption vocabulary, dataset adapter and
//! length-bucketed batch loader. Everything lives in [`cococap_core`]; this
//! crate re-exports it under a shorter name.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cococap::{Loader, LoaderConfig, Preprocess};
//!
//! let config = LoaderConfig::default().with_batch_size(16);
//! let loader = Loader::from_config(&config, Arc::new(Preprocess::coco_train())).unwrap();
//! let batches = loader.into_train().unwrap();
//! for batch in batches.take(10) {
//!     let batch = batch.unwrap();
//!     println!("{:?} {:?}", batch.images.dims(), batch.captions.dims());
//! }
//! ```

pub use cococap_core::*;
