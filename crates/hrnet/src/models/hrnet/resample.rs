//! # Cross-Resolution Resampling Paths
//!
//! A [`ResamplePath`] carries a feature map from source branch ``i``
//! to destination branch ``j``:
//!
//! * ``i == j`` - [`ResamplePath::Identity`], a pass-through.
//! * ``i < j`` - ``j - i`` [`DownsampleStep`]s; each doubles the channels
//!   and halves the resolution.
//! * ``i > j`` - ``i - j`` [`UpsampleStep`]s; each halves the channels
//!   and doubles the resolution.

use crate::layers::blocks::cna::{AbstractCNA2dConfig, CNA2d, CNA2dConfig, CNA2dMeta};
use crate::layers::sampling::{Upsample2d, Upsample2dConfig};
use crate::models::hrnet::util::stride_div_output_resolution;
use burn::prelude::{Backend, Config, Module, Tensor};
use std::cmp::Ordering;

/// [`DownsampleStep`] Config.
#[derive(Config, Debug)]
pub struct DownsampleStepConfig {
    /// ``1x1`` conv/norm/act, ``channels -> 2 * channels``.
    pub expand: CNA2dConfig,

    /// ``3x3`` stride-2 conv/norm/act, ``2 * channels -> 2 * channels``.
    pub reduce: CNA2dConfig,
}

impl DownsampleStepConfig {
    /// Build a step from ``in_channels`` to ``2 * in_channels``.
    pub fn build(
        in_channels: usize,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        let out_channels = in_channels * 2;
        Self {
            expand: cna.square([in_channels, out_channels], 1, 1),
            reduce: cna.square([out_channels, out_channels], 3, 2),
        }
    }

    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.expand.in_channels()
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.reduce.out_channels()
    }

    /// Initialize a [`DownsampleStep`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DownsampleStep<B> {
        DownsampleStep {
            expand: self.expand.init(device),
            reduce: self.reduce.init(device),
        }
    }
}

/// Channel-doubling, resolution-halving step.
#[derive(Module, Debug)]
pub struct DownsampleStep<B: Backend> {
    /// ``1x1`` channel expansion.
    pub expand: CNA2d<B>,

    /// ``3x3`` stride-2 reduction.
    pub reduce: CNA2d<B>,
}

impl<B: Backend> DownsampleStep<B> {
    /// Forward pass.
    ///
    /// ``[batch, channels, 2*h, 2*w] -> [batch, 2*channels, h, w]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.expand.forward(input);
        self.reduce.forward(x)
    }
}

/// [`UpsampleStep`] Config.
#[derive(Config, Debug)]
pub struct UpsampleStepConfig {
    /// ``1x1`` conv/norm/act, ``channels -> channels / 2``.
    pub project: CNA2dConfig,

    /// ``x2`` nearest-neighbor upsample.
    #[config(default = "Upsample2dConfig::new()")]
    pub upsample: Upsample2dConfig,
}

impl UpsampleStepConfig {
    /// Build a step from ``in_channels`` to ``in_channels / 2``.
    pub fn build(
        in_channels: usize,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        Self::new(cna.square([in_channels, in_channels / 2], 1, 1))
    }

    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.project.in_channels()
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.project.out_channels()
    }

    /// Initialize a [`UpsampleStep`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> UpsampleStep<B> {
        UpsampleStep {
            project: self.project.init(device),
            upsample: self.upsample.init(),
        }
    }
}

/// Channel-halving, resolution-doubling step.
///
/// Channels are projected before upsampling, so the ``1x1`` conv
/// runs at the smaller resolution.
#[derive(Module, Debug)]
pub struct UpsampleStep<B: Backend> {
    /// ``1x1`` channel projection.
    pub project: CNA2d<B>,

    /// Nearest-neighbor upsample.
    pub upsample: Upsample2d,
}

impl<B: Backend> UpsampleStep<B> {
    /// Forward pass.
    ///
    /// ``[batch, channels, h, w] -> [batch, channels/2, 2*h, 2*w]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.project.forward(input);
        self.upsample.forward(x)
    }
}

/// [`ResamplePathConfig`] / [`ResamplePath`] meta API.
pub trait ResamplePathMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Output channels.
    fn out_channels(&self) -> usize;

    /// Signed branch offset ``destination - source``.
    fn branch_offset(&self) -> isize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// For downsampling paths, if the input is not a multiple of ``2^steps``.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let offset = self.branch_offset();
        let scale = 1 << offset.unsigned_abs();
        if offset >= 0 {
            stride_div_output_resolution(input_resolution, scale)
        } else {
            [input_resolution[0] * scale, input_resolution[1] * scale]
        }
    }
}

/// [`ResamplePath`] Config.
#[derive(Config, Debug)]
pub enum ResamplePathConfig {
    /// Pass-through for ``source == destination``; holds the branch channels.
    Identity(usize),

    /// Downsampling steps for ``source < destination``.
    Down(Vec<DownsampleStepConfig>),

    /// Upsampling steps for ``source > destination``.
    Up(Vec<UpsampleStepConfig>),
}

impl ResamplePathConfig {
    /// Build the path from branch ``source`` to branch ``destination``.
    ///
    /// # Arguments
    ///
    /// - `source`: source branch index.
    /// - `destination`: destination branch index.
    /// - `in_channels`: the source branch width.
    /// - `cna`: the conv/norm/act policy.
    pub fn build(
        source: usize,
        destination: usize,
        in_channels: usize,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        match source.cmp(&destination) {
            Ordering::Equal => Self::Identity(in_channels),
            Ordering::Less => {
                let mut channels = in_channels;
                let steps = (source..destination)
                    .map(|_| {
                        let step = DownsampleStepConfig::build(channels, cna);
                        channels = step.out_channels();
                        step
                    })
                    .collect();
                Self::Down(steps)
            }
            Ordering::Greater => {
                let mut channels = in_channels;
                let steps = (destination..source)
                    .map(|_| {
                        let step = UpsampleStepConfig::build(channels, cna);
                        channels = step.out_channels();
                        step
                    })
                    .collect();
                Self::Up(steps)
            }
        }
    }

    /// Initialize a [`ResamplePath`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResamplePath<B> {
        match self {
            Self::Identity(channels) => ResamplePath::Identity(Passthrough { channels }),
            Self::Down(steps) => {
                ResamplePath::Down(steps.into_iter().map(|s| s.init(device)).collect())
            }
            Self::Up(steps) => {
                ResamplePath::Up(steps.into_iter().map(|s| s.init(device)).collect())
            }
        }
    }
}

impl ResamplePathMeta for ResamplePathConfig {
    fn in_channels(&self) -> usize {
        match self {
            Self::Identity(channels) => *channels,
            Self::Down(steps) => steps[0].in_channels(),
            Self::Up(steps) => steps[0].in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::Identity(channels) => *channels,
            Self::Down(steps) => steps[steps.len() - 1].out_channels(),
            Self::Up(steps) => steps[steps.len() - 1].out_channels(),
        }
    }

    fn branch_offset(&self) -> isize {
        match self {
            Self::Identity(_) => 0,
            Self::Down(steps) => steps.len() as isize,
            Self::Up(steps) => -(steps.len() as isize),
        }
    }
}

/// Pass-through layer; records the width it passes.
#[derive(Module, Clone, Debug)]
pub struct Passthrough {
    /// Branch channels.
    pub channels: usize,
}

/// A source-to-destination branch resampling path.
#[derive(Module, Debug)]
pub enum ResamplePath<B: Backend> {
    /// Pass-through.
    Identity(Passthrough),

    /// Downsampling steps.
    Down(Vec<DownsampleStep<B>>),

    /// Upsampling steps.
    Up(Vec<UpsampleStep<B>>),
}

impl<B: Backend> ResamplePathMeta for ResamplePath<B> {
    fn in_channels(&self) -> usize {
        match self {
            Self::Identity(layer) => layer.channels,
            Self::Down(steps) => steps[0].expand.in_channels(),
            Self::Up(steps) => steps[0].project.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::Identity(layer) => layer.channels,
            Self::Down(steps) => steps[steps.len() - 1].reduce.out_channels(),
            Self::Up(steps) => steps[steps.len() - 1].project.out_channels(),
        }
    }

    fn branch_offset(&self) -> isize {
        match self {
            Self::Identity(_) => 0,
            Self::Down(steps) => steps.len() as isize,
            Self::Up(steps) => -(steps.len() as isize),
        }
    }
}

impl<B: Backend> ResamplePath<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``, per
    /// [`ResamplePathMeta::output_resolution`].
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Identity(_) => input,
            Self::Down(steps) => steps.iter().fold(input, |x, step| step.forward(x)),
            Self::Up(steps) => steps.iter().fold(input, |x, step| step.forward(x)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::NormalizationConfig;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    fn cna() -> AbstractCNA2dConfig {
        AbstractCNA2dConfig::new(NormalizationConfig::batch(0.2))
    }

    #[test]
    fn test_identity_path() {
        let device = Default::default();
        let config = ResamplePathConfig::build(1, 1, 16, &cna());
        assert!(matches!(config, ResamplePathConfig::Identity(16)));
        assert_eq!(config.branch_offset(), 0);
        assert_eq!(config.output_resolution([8, 8]), [8, 8]);

        let path: ResamplePath<B> = config.init(&device);
        let input: Tensor<B, 4> = Tensor::random([1, 16, 8, 8], Distribution::Default, &device);
        path.forward(input.clone())
            .to_data()
            .assert_eq(&input.to_data(), true);
    }

    #[test]
    fn test_downsample_path() {
        let device = Default::default();
        let config = ResamplePathConfig::build(0, 3, 8, &cna());
        assert_eq!(config.in_channels(), 8);
        assert_eq!(config.out_channels(), 64);
        assert_eq!(config.branch_offset(), 3);
        assert_eq!(config.output_resolution([32, 16]), [4, 2]);

        if let ResamplePathConfig::Down(steps) = &config {
            assert_eq!(steps.len(), 3);
            assert_eq!(steps[1].in_channels(), 16);
            assert_eq!(steps[1].expand.conv.kernel_size, [1, 1]);
            assert_eq!(steps[1].reduce.stride(), [2, 2]);
        } else {
            panic!("Unexpected config type");
        }

        let path: ResamplePath<B> = config.init(&device);
        assert_eq!(path.in_channels(), 8);
        assert_eq!(path.out_channels(), 64);

        let output = path.forward(Tensor::ones([2, 8, 32, 16], &device));
        assert_eq!(output.dims(), [2, 64, 4, 2]);
    }

    #[test]
    fn test_upsample_path() {
        let device = Default::default();
        let config = ResamplePathConfig::build(2, 0, 32, &cna());
        assert_eq!(config.in_channels(), 32);
        assert_eq!(config.out_channels(), 8);
        assert_eq!(config.branch_offset(), -2);
        assert_eq!(config.output_resolution([2, 3]), [8, 12]);

        let path: ResamplePath<B> = config.init(&device);
        assert_eq!(path.out_channels(), 8);

        let output = path.forward(Tensor::ones([1, 32, 2, 3], &device));
        assert_eq!(output.dims(), [1, 8, 8, 12]);
    }

    #[test]
    fn test_upsample_step_order() {
        let device = Default::default();
        let step: UpsampleStep<B> = UpsampleStepConfig::build(8, &cna()).init(&device);

        let input: Tensor<B, 4> = Tensor::random([1, 8, 3, 3], Distribution::Default, &device);
        let output = step.forward(input.clone());

        let expected = step.upsample.forward(step.project.forward(input));
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
