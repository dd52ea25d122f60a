//! # `ConvNorm2d` - Conv2d, Norm
//!
//! A [`ConvNorm2d`] is a [`CNA2d`](super::cna::CNA2d) without the activation,
//! for callers which must act on the normed features before activating
//! them; the `HRNet` output head pools at that point.

use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use bimm_contracts::assert_shape_contract_periodically;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ConvNorm2dConfig`] / [`ConvNorm2d`] meta API.
pub trait ConvNorm2dMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Output channels.
    fn out_channels(&self) -> usize;
}

/// [`ConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// Convolution.
    pub conv: Conv2dConfig,

    /// Norm; resized to the conv output at init.
    pub norm: NormalizationConfig,
}

impl ConvNorm2dMeta for ConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }
}

impl ConvNorm2dConfig {
    /// A bias-free ``1x1`` projection, ``channels[0] -> channels[1]``.
    pub fn pointwise(
        channels: [usize; 2],
        norm: &NormalizationConfig,
    ) -> Self {
        Self::new(
            Conv2dConfig::new(channels, [1, 1]).with_bias(false),
            norm.clone(),
        )
    }

    /// Initialize a [`ConvNorm2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        let features = self.out_channels();
        ConvNorm2d {
            conv: self.conv.init(device),
            norm: self.norm.with_num_features(features).init(device),
        }
    }
}

/// Conv2d, then norm.
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Convolution.
    pub conv: Conv2d<B>,

    /// Norm.
    pub norm: Normalization<B>,
}

impl<B: Backend> ConvNorm2dMeta for ConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.dims()[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }
}

impl<B: Backend> ConvNorm2d<B> {
    /// Forward pass.
    ///
    /// ``[batch, in_channels, height, width] -> [batch, out_channels, height', width']``,
    /// where the output resolution follows the conv's stride and padding.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        assert_shape_contract_periodically!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &[("in_channels", self.in_channels())]
        );
        self.norm.forward(self.conv.forward(input))
    }
}
