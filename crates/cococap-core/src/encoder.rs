use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};

use crate::error::Result;

/// A pretrained image classifier with its classification layer removed.
///
/// The backbone's weights are not created through the encoder's
/// `VarBuilder`, so an optimizer over that var map leaves them frozen.
pub trait FeatureBackbone: Send + Sync {
    /// Number of features per image after flattening.
    fn feature_dim(&self) -> usize;

    /// `images`: [batch_size, channels, height, width]
    fn forward(&self, images: &Tensor) -> candle_core::Result<Tensor>;
}

/// Image encoder: frozen backbone features projected to the embedding size.
pub struct EncoderCnn {
    backbone: Box<dyn FeatureBackbone>,
    embed: Linear,
    embed_size: usize,
}

impl EncoderCnn {
    /// Create the trainable projection under `vb.pp("embed")`.
    pub fn new(
        backbone: Box<dyn FeatureBackbone>,
        embed_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embed = candle_nn::linear(backbone.feature_dim(), embed_size, vb.pp("embed"))?;
        Ok(Self {
            backbone,
            embed,
            embed_size,
        })
    }

    pub fn embed_size(&self) -> usize {
        self.embed_size
    }

    /// Forward pass producing image embeddings
    /// `images`: [batch_size, channels, height, width]
    /// returns: [batch_size, embed_size]
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        let features = self.backbone.forward(images)?;
        let features = features.flatten_from(1)?;
        Ok(self.embed.forward(&features)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    /// Per-channel global average pool, standing in for a real CNN.
    struct ChannelMean;

    impl FeatureBackbone for ChannelMean {
        fn feature_dim(&self) -> usize {
            3
        }

        fn forward(&self, images: &Tensor) -> candle_core::Result<Tensor> {
            images.mean_keepdim(3)?.mean_keepdim(2)
        }
    }

    #[test]
    fn test_forward_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = EncoderCnn::new(Box::new(ChannelMean), 16, vb).unwrap();
        assert_eq!(encoder.embed_size(), 16);

        let images = Tensor::rand(0f32, 1f32, (2, 3, 8, 8), &Device::Cpu).unwrap();
        let out = encoder.forward(&images).unwrap();
        assert_eq!(out.dims(), &[2, 16]);
    }

    #[test]
    fn test_only_projection_is_trainable() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _encoder = EncoderCnn::new(Box::new(ChannelMean), 4, vb).unwrap();

        let data = varmap.data().lock().unwrap();
        let mut names: Vec<_> = data.keys().cloned().collect();
        names.sort();
        assert_eq!(names, ["embed.bias", "embed.weight"]);
    }
}
