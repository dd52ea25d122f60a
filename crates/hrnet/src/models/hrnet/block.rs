//! # Branch Blocks
//!
//! A branch block is a two-layer ``3x3`` convolutional unit operating
//! within one branch at fixed resolution. There are two variants:
//!
//! * [`NormalBlock`] - ``cna1 -> cna2``.
//! * [`ResidualBlock`] - ``cna1 -> conv/norm -> (+ input) -> act``.
//!
//! [`BranchBlock`] wraps either variant; and [`BlockKind`] is the
//! factory a stage uses to build its blocks.

use crate::layers::blocks::cna::{AbstractCNA2dConfig, CNA2d, CNA2dConfig, CNA2dMeta};
use crate::models::hrnet::errors::{HRNetConfigError, HRNetConfigResult};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Common meta API for branch blocks and their configs.
pub trait BranchBlockMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Output channels.
    fn out_channels(&self) -> usize;
}

/// Selects which block a stage is built from.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// [`NormalBlock`].
    Normal,

    /// [`ResidualBlock`].
    Residual,
}

impl BlockKind {
    /// Build a block config of this kind.
    pub fn build_config(
        &self,
        in_channels: usize,
        out_channels: usize,
        cna: &AbstractCNA2dConfig,
    ) -> BranchBlockConfig {
        match self {
            BlockKind::Normal => NormalBlockConfig::build(in_channels, out_channels, cna).into(),
            BlockKind::Residual => {
                ResidualBlockConfig::build(in_channels, out_channels, cna).into()
            }
        }
    }
}

/// [`NormalBlock`] Config.
#[derive(Config, Debug)]
pub struct NormalBlockConfig {
    /// ``in_channels -> out_channels``.
    pub cna1: CNA2dConfig,

    /// ``out_channels -> out_channels``.
    pub cna2: CNA2dConfig,
}

impl BranchBlockMeta for NormalBlockConfig {
    fn in_channels(&self) -> usize {
        self.cna1.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna2.out_channels()
    }
}

impl NormalBlockConfig {
    /// Build a [`NormalBlockConfig`].
    pub fn build(
        in_channels: usize,
        out_channels: usize,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        Self {
            cna1: cna.square([in_channels, out_channels], 3, 1),
            cna2: cna.square([out_channels, out_channels], 3, 1),
        }
    }

    /// Initialize a [`NormalBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> NormalBlock<B> {
        NormalBlock {
            cna1: self.cna1.init(device),
            cna2: self.cna2.init(device),
        }
    }
}

/// Two stacked ``3x3`` conv/norm/act layers.
#[derive(Module, Debug)]
pub struct NormalBlock<B: Backend> {
    /// First conv/norm/act.
    pub cna1: CNA2d<B>,

    /// Second conv/norm/act.
    pub cna2: CNA2d<B>,
}

impl<B: Backend> BranchBlockMeta for NormalBlock<B> {
    fn in_channels(&self) -> usize {
        self.cna1.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna2.out_channels()
    }
}

impl<B: Backend> NormalBlock<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.cna1.forward(input);
        self.cna2.forward(x)
    }
}

/// [`ResidualBlock`] Config.
///
/// # Preconditions
///
/// The skip connection is an identity; so ``in_channels == out_channels``.
/// This is checked by [`ResidualBlockConfig::try_validate`] and at init.
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    /// ``in_channels -> out_channels``.
    pub cna1: CNA2dConfig,

    /// ``out_channels -> out_channels``; the skip is added before its activation.
    pub cna2: CNA2dConfig,
}

impl BranchBlockMeta for ResidualBlockConfig {
    fn in_channels(&self) -> usize {
        self.cna1.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna2.out_channels()
    }
}

impl ResidualBlockConfig {
    /// Build a [`ResidualBlockConfig`].
    ///
    /// The second convolution carries a bias; the first does not.
    pub fn build(
        in_channels: usize,
        out_channels: usize,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        let mut cna2 = cna.square([out_channels, out_channels], 3, 1);
        cna2.conv = cna2.conv.with_bias(true);

        Self {
            cna1: cna.square([in_channels, out_channels], 3, 1),
            cna2,
        }
    }

    /// Check that the identity skip can be added.
    pub fn try_validate(&self) -> HRNetConfigResult<()> {
        if self.in_channels() != self.out_channels() {
            return Err(HRNetConfigError::ResidualChannelMismatch {
                in_channels: self.in_channels(),
                out_channels: self.out_channels(),
            });
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        self.expect_valid();
        ResidualBlock {
            cna1: self.cna1.init(device),
            cna2: self.cna2.init(device),
        }
    }
}

/// Two ``3x3`` conv layers with an identity skip.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    /// First conv/norm/act.
    pub cna1: CNA2d<B>,

    /// Second conv/norm/act; the skip is added between norm and act.
    pub cna2: CNA2d<B>,
}

impl<B: Backend> BranchBlockMeta for ResidualBlock<B> {
    fn in_channels(&self) -> usize {
        self.cna1.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna2.out_channels()
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Forward pass.
    ///
    /// ```rust,ignore
    /// let x = self.cna1.forward(input);
    /// let x = norm(conv(x)) + input;
    /// act(x)
    /// ```
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("channels", self.in_channels())]
        );

        let identity = input.clone();

        let x = self.cna1.forward(input);
        let x = self.cna2.hook_forward(x, |x| x + identity);

        assert_shape_contract_periodically!(
            ["batch", "channels", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("channels", self.out_channels()),
                ("height", height),
                ("width", width)
            ]
        );

        x
    }
}

/// [`BranchBlock`] Config.
#[derive(Config, Debug)]
pub enum BranchBlockConfig {
    /// A [`NormalBlock`].
    Normal(NormalBlockConfig),

    /// A [`ResidualBlock`].
    Residual(ResidualBlockConfig),
}

impl From<NormalBlockConfig> for BranchBlockConfig {
    fn from(config: NormalBlockConfig) -> Self {
        Self::Normal(config)
    }
}

impl From<ResidualBlockConfig> for BranchBlockConfig {
    fn from(config: ResidualBlockConfig) -> Self {
        Self::Residual(config)
    }
}

impl BranchBlockMeta for BranchBlockConfig {
    fn in_channels(&self) -> usize {
        match self {
            Self::Normal(config) => config.in_channels(),
            Self::Residual(config) => config.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::Normal(config) => config.out_channels(),
            Self::Residual(config) => config.out_channels(),
        }
    }
}

impl BranchBlockConfig {
    /// The [`BlockKind`] of this config.
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Normal(_) => BlockKind::Normal,
            Self::Residual(_) => BlockKind::Residual,
        }
    }

    /// Check the block's channel preconditions.
    pub fn try_validate(&self) -> HRNetConfigResult<()> {
        match self {
            Self::Normal(_) => Ok(()),
            Self::Residual(config) => config.try_validate(),
        }
    }

    /// Initialize a [`BranchBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BranchBlock<B> {
        match self {
            Self::Normal(config) => BranchBlock::Normal(config.clone().init(device)),
            Self::Residual(config) => BranchBlock::Residual(config.clone().init(device)),
        }
    }
}

/// A [`NormalBlock`] or [`ResidualBlock`] wrapper.
#[derive(Module, Debug)]
pub enum BranchBlock<B: Backend> {
    /// A [`NormalBlock`].
    Normal(NormalBlock<B>),

    /// A [`ResidualBlock`].
    Residual(ResidualBlock<B>),
}

impl<B: Backend> BranchBlockMeta for BranchBlock<B> {
    fn in_channels(&self) -> usize {
        match self {
            Self::Normal(block) => block.in_channels(),
            Self::Residual(block) => block.in_channels(),
        }
    }

    fn out_channels(&self) -> usize {
        match self {
            Self::Normal(block) => block.out_channels(),
            Self::Residual(block) => block.out_channels(),
        }
    }
}

impl<B: Backend> BranchBlock<B> {
    /// The [`BlockKind`] of this block.
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Normal(_) => BlockKind::Normal,
            Self::Residual(_) => BlockKind::Residual,
        }
    }

    /// Apply the wrapped block.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Normal(block) => block.forward(input),
            Self::Residual(block) => block.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::NormalizationConfig;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    fn cna() -> AbstractCNA2dConfig {
        AbstractCNA2dConfig::new(NormalizationConfig::batch(0.2))
    }

    #[test]
    fn test_block_kind_factory() {
        let normal = BlockKind::Normal.build_config(8, 16, &cna());
        assert_eq!(normal.kind(), BlockKind::Normal);
        assert_eq!(normal.in_channels(), 8);
        assert_eq!(normal.out_channels(), 16);
        normal.try_validate().unwrap();

        let residual = BlockKind::Residual.build_config(16, 16, &cna());
        assert_eq!(residual.kind(), BlockKind::Residual);
        residual.try_validate().unwrap();
        match &residual {
            BranchBlockConfig::Residual(config) => {
                assert!(!config.cna1.conv.bias);
                assert!(config.cna2.conv.bias);
            }
            _ => panic!("Unexpected config type"),
        }
    }

    #[test]
    fn test_residual_channel_mismatch() {
        let config = BlockKind::Residual.build_config(8, 16, &cna());
        assert_eq!(
            config.try_validate(),
            Err(HRNetConfigError::ResidualChannelMismatch {
                in_channels: 8,
                out_channels: 16,
            })
        );
    }

    #[test]
    #[should_panic(expected = "residual block requires in_channels == out_channels, got 8 -> 16")]
    fn test_residual_channel_mismatch_init_panics() {
        type B = NdArray<f32>;
        let device = Default::default();
        let _block: ResidualBlock<B> = ResidualBlockConfig::build(8, 16, &cna()).init(&device);
    }

    #[test]
    fn test_normal_block_forward() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: BranchBlock<B> = BlockKind::Normal.build_config(4, 8, &cna()).init(&device);
        assert_eq!(block.kind(), BlockKind::Normal);
        assert_eq!(block.in_channels(), 4);
        assert_eq!(block.out_channels(), 8);

        let input = Tensor::random([2, 4, 6, 6], Distribution::Default, &device);
        let output = block.forward(input.clone());

        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[
                ("batch", 2),
                ("channels", 8),
                ("height", 6),
                ("width", 6)
            ],
        );

        if let BranchBlock::Normal(inner) = &block {
            let expected = inner.cna2.forward(inner.cna1.forward(input));
            output.to_data().assert_eq(&expected.to_data(), true);
        }
    }

    #[test]
    fn test_residual_block_shape_and_skip() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: ResidualBlock<B> = ResidualBlockConfig::build(4, 4, &cna()).init(&device);

        let input: Tensor<B, 4> = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let output = block.forward(input.clone());
        assert_eq!(output.dims(), [2, 4, 8, 8]);

        // Same block with the skip addition removed.
        let no_skip = block.cna2.forward(block.cna1.forward(input.clone()));
        let diff: f32 = (output.clone() - no_skip).abs().sum().into_scalar();
        assert!(diff > 0.0, "skip addition had no effect");

        // Skip added between norm and activation.
        let expected = block
            .cna2
            .hook_forward(block.cna1.forward(input.clone()), |x| x + input.clone());
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_residual_block_zero_weights_is_identity() {
        type B = NdArray<f32>;
        let device = Default::default();

        let mut block: ResidualBlock<B> = ResidualBlockConfig::build(3, 3, &cna()).init(&device);
        block.cna2.conv.weight = block.cna2.conv.weight.clone().map(|w| w.zeros_like());
        block.cna2.conv.bias = block
            .cna2
            .conv
            .bias
            .clone()
            .map(|b| b.map(|b| b.zeros_like()));

        // Non-negative input is unchanged by the final relu.
        let input: Tensor<B, 4> =
            Tensor::random([1, 3, 4, 4], Distribution::Uniform(0.0, 1.0), &device);
        let output = block.forward(input.clone());

        output
            .to_data()
            .assert_approx_eq::<f32>(&input.to_data(), Default::default());
    }
}
