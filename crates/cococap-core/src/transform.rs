//! # Image Pre-processing
//!
//! The dataset turns decoded RGB images into tensors through an injected
//! [`ImageTransform`]. [`Preprocess`] covers the usual pipeline for a
//! pretrained ImageNet backbone: resize the shorter edge, crop, optionally
//! mirror, scale to `[0, 1]` and normalize per channel.

use std::sync::atomic::{AtomicU64, Ordering};

use candle_core::{Device, Tensor};
use image::RgbImage;
use image::imageops::{self, FilterType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Image → tensor conversion applied to every fetched image.
///
/// Implementations must be `Send + Sync` so the loader can call them from
/// several worker threads.
pub trait ImageTransform: Send + Sync {
    /// Produce a `[C, H, W]` tensor from an RGB image.
    fn apply(&self, image: &RgbImage) -> Result<Tensor>;
}

impl<F> ImageTransform for F
where
    F: Fn(&RgbImage) -> Result<Tensor> + Send + Sync,
{
    fn apply(&self, image: &RgbImage) -> Result<Tensor> {
        self(image)
    }
}

/// Convert an RGB image to a `[3, H, W]` f32 tensor with values in `[0, 1]`.
pub fn image_to_tensor(image: &RgbImage) -> Result<Tensor> {
    planar(image, [0.0; 3], [1.0; 3])
}

fn planar(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Result<Tensor> {
    let (w, h) = image.dimensions();
    let npix = (w * h) as usize;
    let raw = image.as_raw();

    // [H, W, C] interleaved to [C, H, W] planar
    let mut data = vec![0.0f32; 3 * npix];
    for i in 0..npix {
        for c in 0..3 {
            let v = raw[i * 3 + c] as f32 / 255.0;
            data[c * npix + i] = (v - mean[c]) / std[c];
        }
    }
    Ok(Tensor::from_vec(data, (3, h as usize, w as usize), &Device::Cpu)?)
}

/// How to cut a square patch out of the (resized) image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crop {
    /// Uniformly random position.
    Random(u32),
    /// Centered.
    Center(u32),
}

impl Crop {
    fn size(self) -> u32 {
        match self {
            Self::Random(s) | Self::Center(s) => s,
        }
    }
}

/// Configurable pre-processing pipeline.
#[derive(Debug)]
pub struct Preprocess {
    resize_shorter: Option<u32>,
    crop: Option<Crop>,
    flip_probability: f32,
    mean: [f32; 3],
    std: [f32; 3],
    seed: Option<u64>,
    calls: AtomicU64,
}

impl Default for Preprocess {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocess {
    /// A pipeline that only converts to a `[0, 1]` tensor.
    pub fn new() -> Self {
        Self {
            resize_shorter: None,
            crop: None,
            flip_probability: 0.0,
            mean: [0.0; 3],
            std: [1.0; 3],
            seed: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Training augmentation: resize to 256, random 224 crop, random mirror,
    /// ImageNet normalization.
    pub fn coco_train() -> Self {
        Self::new()
            .resize_shorter(256)
            .crop(Crop::Random(224))
            .horizontal_flip(0.5)
            .normalize(IMAGENET_MEAN, IMAGENET_STD)
    }

    /// Deterministic evaluation pipeline: resize to 256, center 224 crop,
    /// ImageNet normalization.
    pub fn coco_eval() -> Self {
        Self::new()
            .resize_shorter(256)
            .crop(Crop::Center(224))
            .normalize(IMAGENET_MEAN, IMAGENET_STD)
    }

    /// Resize so the shorter edge equals `size`, keeping the aspect ratio.
    pub fn resize_shorter(mut self, size: u32) -> Self {
        self.resize_shorter = Some(size.max(1));
        self
    }

    pub fn crop(mut self, crop: Crop) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Mirror left-right with probability `p`.
    pub fn horizontal_flip(mut self, p: f32) -> Self {
        self.flip_probability = p.clamp(0.0, 1.0);
        self
    }

    pub fn normalize(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    /// Seed for the random crop / flip decisions. Unseeded pipelines draw
    /// from OS entropy.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    // One generator per call so concurrent workers never share state.
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => {
                let call = self.calls.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed ^ call.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            None => StdRng::from_entropy(),
        }
    }

    fn resized(image: &RgbImage, shorter: u32) -> RgbImage {
        let (w, h) = image.dimensions();
        if w.min(h) == shorter {
            return image.clone();
        }
        let (nw, nh) = if w <= h {
            let nh = (h as u64 * shorter as u64 + w as u64 / 2) / w as u64;
            (shorter, nh.max(1) as u32)
        } else {
            let nw = (w as u64 * shorter as u64 + h as u64 / 2) / h as u64;
            (nw.max(1) as u32, shorter)
        };
        imageops::resize(image, nw, nh, FilterType::Triangle)
    }
}

impl ImageTransform for Preprocess {
    fn apply(&self, image: &RgbImage) -> Result<Tensor> {
        let mut rng = self.rng();

        let mut img = match self.resize_shorter {
            Some(size) => Self::resized(image, size),
            None => image.clone(),
        };

        if let Some(crop) = self.crop {
            let size = crop.size();
            if img.width() < size || img.height() < size {
                img = Self::resized(&img, size);
            }
            let (w, h) = img.dimensions();
            let (x, y) = match crop {
                Crop::Random(_) => (rng.gen_range(0..=w - size), rng.gen_range(0..=h - size)),
                Crop::Center(_) => ((w - size) / 2, (h - size) / 2),
            };
            img = imageops::crop_imm(&img, x, y, size, size).to_image();
        }

        if self.flip_probability > 0.0 && rng.gen_bool(f64::from(self.flip_probability)) {
            img = imageops::flip_horizontal(&img);
        }

        planar(&img, self.mean, self.std)
    }
}
