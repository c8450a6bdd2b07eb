//! # Caption Loader
//!
//! Turns a [`CocoDataset`] into a stream of batches. Training batches come
//! from the [`LengthBucketSampler`] and are stacked into `[B, C, H, W]`
//! images and `[B, L]` caption ids; the stream never ends. Evaluation walks
//! the images once, one per step, in fixed or shuffled order.

use std::sync::Arc;

use candle_core::{Device, Tensor};
use image::RgbImage;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use tracing::info;

use crate::config::{LoaderConfig, Mode};
use crate::dataset::{CocoDataset, CocoItem};
use crate::error::{CocoError, Result};
use crate::sampler::{LengthBucketSampler, rng_from_seed};
use crate::transform::ImageTransform;

/// Loader options that do not affect the dataset itself.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Number of parallel workers for item fetching (0 = sequential).
    pub num_workers: usize,
    /// Shuffle evaluation order.
    pub shuffle: bool,
    /// Optional random seed for reproducible sampling and shuffling.
    pub seed: Option<u64>,
    /// Device the stacked tensors are moved to.
    pub device: Device,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            num_workers: 0,
            shuffle: true,
            seed: None,
            device: Device::Cpu,
        }
    }
}

impl From<&LoaderConfig> for LoaderOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            num_workers: config.num_workers,
            seed: config.seed,
            ..Self::default()
        }
    }
}

impl LoaderOptions {
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn shuffle(mut self, s: bool) -> Self {
        self.shuffle = s;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = Some(s);
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

/// A stacked training batch. Row `k` of both tensors comes from `indices[k]`.
#[derive(Debug, Clone)]
pub struct CaptionBatch {
    pub indices: Vec<usize>,
    /// `[B, C, H, W]`
    pub images: Tensor,
    /// `[B, L]`, u32 ids
    pub captions: Tensor,
}

/// A single evaluation image.
#[derive(Debug, Clone)]
pub struct EvalSample {
    pub index: usize,
    pub original: RgbImage,
    /// `[1, C, H, W]`
    pub image: Tensor,
}

/// Fetches dataset items in index order, optionally on a worker pool.
struct Fetcher {
    dataset: Arc<CocoDataset>,
    pool: Option<rayon::ThreadPool>,
}

impl Fetcher {
    fn new(dataset: Arc<CocoDataset>, num_workers: usize) -> Result<Self> {
        let pool = if num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .thread_name(|i| format!("cococap-fetch-{i}"))
                .build()
                .map_err(|e| {
                    CocoError::InvalidConfiguration(format!(
                        "failed to start {num_workers} fetch workers: {e}"
                    ))
                })?;
            Some(pool)
        } else {
            None
        };
        Ok(Self { dataset, pool })
    }

    fn fetch(&self, indices: &[usize]) -> Result<Vec<CocoItem>> {
        match &self.pool {
            // Parallel collect keeps index order.
            Some(pool) if indices.len() > 1 => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| self.dataset.get(i))
                    .collect()
            }),
            _ => indices.iter().map(|&i| self.dataset.get(i)).collect(),
        }
    }
}

/// Endless stream of equal-caption-length training batches.
pub struct TrainBatches {
    fetcher: Fetcher,
    sampler: LengthBucketSampler,
    device: Device,
}

impl TrainBatches {
    pub fn sampler(&self) -> &LengthBucketSampler {
        &self.sampler
    }

    /// Sample, fetch and stack one batch. Any fetch error aborts the batch.
    pub fn next_batch(&mut self) -> Result<CaptionBatch> {
        let indices = self.sampler.next_batch();
        let items = self.fetcher.fetch(&indices)?;

        let mut images = Vec::with_capacity(items.len());
        let mut ids = Vec::new();
        let mut caption_len = 0;
        for item in items {
            match item {
                CocoItem::Train { image, caption } => {
                    caption_len = caption.len();
                    ids.extend(caption);
                    images.push(image);
                }
                CocoItem::Evaluate { .. } => {
                    return Err(CocoError::InvalidConfiguration(
                        "training batches need a train-mode dataset".into(),
                    ));
                }
            }
        }

        let batch = indices.len();
        let images = Tensor::stack(&images, 0)?.to_device(&self.device)?;
        let captions = Tensor::from_vec(ids, (batch, caption_len), &Device::Cpu)?
            .to_device(&self.device)?;

        Ok(CaptionBatch {
            indices,
            images,
            captions,
        })
    }
}

impl Iterator for TrainBatches {
    type Item = Result<CaptionBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

/// One pass over the evaluation images.
pub struct EvalSamples {
    fetcher: Fetcher,
    order: Vec<usize>,
    position: usize,
    device: Device,
}

impl EvalSamples {
    /// Indices in the order they will be visited.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl Iterator for EvalSamples {
    type Item = Result<EvalSample>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = *self.order.get(self.position)?;
        self.position += 1;

        let sample = self.fetcher.fetch(&[index]).and_then(|mut items| {
            match items.pop() {
                Some(CocoItem::Evaluate { original, image }) => Ok(EvalSample {
                    index,
                    original,
                    image: image.unsqueeze(0)?.to_device(&self.device)?,
                }),
                _ => Err(CocoError::InvalidConfiguration(
                    "evaluation samples need an evaluate-mode dataset".into(),
                )),
            }
        });
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.order.len() - self.position;
        (left, Some(left))
    }
}

impl ExactSizeIterator for EvalSamples {}

/// Mode-appropriate loader for a dataset.
pub enum Loader {
    Train(TrainBatches),
    Evaluate(EvalSamples),
}

impl Loader {
    /// Build the dataset described by `config` and a loader over it.
    pub fn from_config(config: &LoaderConfig, transform: Arc<dyn ImageTransform>) -> Result<Self> {
        let dataset = CocoDataset::from_config(config, transform)?;
        make_loader(Arc::new(dataset), LoaderOptions::from(config))
    }

    pub fn into_train(self) -> Option<TrainBatches> {
        match self {
            Self::Train(batches) => Some(batches),
            Self::Evaluate(_) => None,
        }
    }

    pub fn into_evaluate(self) -> Option<EvalSamples> {
        match self {
            Self::Evaluate(samples) => Some(samples),
            Self::Train(_) => None,
        }
    }
}

/// Wire a dataset to its sampler (train) or index order (evaluate).
///
/// # Errors
///
/// Returns `CocoError::InvalidConfiguration` for an empty training set or
/// when the worker pool cannot be started.
pub fn make_loader(dataset: Arc<CocoDataset>, options: LoaderOptions) -> Result<Loader> {
    match dataset.mode() {
        Mode::Train => {
            let lengths = dataset.caption_lengths().unwrap_or_default();
            let sampler = LengthBucketSampler::new(lengths, dataset.batch_size(), options.seed)?;
            info!(
                entries = dataset.len(),
                buckets = sampler.histogram().count(),
                batch_size = dataset.batch_size(),
                workers = options.num_workers,
                "training loader ready"
            );
            Ok(Loader::Train(TrainBatches {
                fetcher: Fetcher::new(dataset, options.num_workers)?,
                sampler,
                device: options.device,
            }))
        }
        Mode::Evaluate => {
            let mut order: Vec<usize> = (0..dataset.len()).collect();
            if options.shuffle {
                order.shuffle(&mut rng_from_seed(options.seed));
            }
            info!(entries = order.len(), shuffle = options.shuffle, "evaluation loader ready");
            // Evaluation fetches a single index per step: no worker pool.
            Ok(Loader::Evaluate(EvalSamples {
                fetcher: Fetcher::new(dataset, 0)?,
                order,
                position: 0,
                device: options.device,
            }))
        }
    }
}
