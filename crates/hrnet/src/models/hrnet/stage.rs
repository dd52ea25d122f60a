//! # Stages
//!
//! A [`Stage`] applies one [`BranchChain`] to each of its branches.
//! Branches never interact within a stage; each keeps its own
//! channel width and resolution.
//!
//! [`StageMeta`] defines a common meta API for [`Stage`]
//! and [`StageConfig`].

use crate::layers::blocks::cna::AbstractCNA2dConfig;
use crate::models::hrnet::block::{BlockKind, BranchBlock, BranchBlockConfig, BranchBlockMeta};
use crate::models::hrnet::errors::{HRNetConfigError, HRNetConfigResult};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Default number of blocks in each branch chain.
pub const DEFAULT_BLOCKS_PER_STAGE: usize = 4;

/// [`BranchChainConfig`] / [`BranchChain`] meta API.
pub trait BranchChainMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the chain is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Branch channels.
    fn channels(&self) -> usize;
}

/// [`BranchChain`] Config.
#[derive(Config, Debug)]
pub struct BranchChainConfig {
    /// The component blocks.
    pub blocks: Vec<BranchBlockConfig>,
}

impl From<Vec<BranchBlockConfig>> for BranchChainConfig {
    fn from(blocks: Vec<BranchBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl BranchChainMeta for BranchChainConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn channels(&self) -> usize {
        self.blocks[0].in_channels()
    }
}

impl BranchChainConfig {
    /// Build a chain of ``num_blocks`` blocks at constant width.
    pub fn build(
        num_blocks: usize,
        channels: usize,
        kind: &BlockKind,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        (0..num_blocks)
            .map(|_| kind.build_config(channels, channels, cna))
            .collect::<Vec<_>>()
            .into()
    }

    /// Check that the chain is non-empty, holds its width, and each block is valid.
    pub fn try_validate(&self) -> HRNetConfigResult<()> {
        if self.is_empty() {
            return Err(HRNetConfigError::InvalidBlockCount(0));
        }
        let channels = self.channels();
        for block in &self.blocks {
            block.try_validate()?;
            if block.in_channels() != channels || block.out_channels() != channels {
                return Err(HRNetConfigError::ChainWidthMismatch {
                    channels,
                    in_channels: block.in_channels(),
                    out_channels: block.out_channels(),
                });
            }
        }
        Ok(())
    }

    /// Initialize a [`BranchChain`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BranchChain<B> {
        BranchChain {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }
}

/// A sequence of [`BranchBlock`]s at constant width and resolution.
#[derive(Module, Debug)]
pub struct BranchChain<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<BranchBlock<B>>,
}

impl<B: Backend> BranchChainMeta for BranchChain<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn channels(&self) -> usize {
        self.blocks[0].in_channels()
    }
}

impl<B: Backend> BranchChain<B> {
    /// Apply the chain.
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
        self.blocks.iter().fold(input, |x, block| block.forward(x))
    }
}

/// [`StageConfig`] / [`Stage`] meta API.
pub trait StageMeta {
    /// The number of branches.
    fn num_branches(&self) -> usize;

    /// Per-branch channel widths.
    fn branch_channels(&self) -> Vec<usize>;
}

/// [`Stage`] Config.
#[derive(Config, Debug)]
pub struct StageConfig {
    /// One chain per branch, highest resolution first.
    pub branches: Vec<BranchChainConfig>,
}

impl StageMeta for StageConfig {
    fn num_branches(&self) -> usize {
        self.branches.len()
    }

    fn branch_channels(&self) -> Vec<usize> {
        self.branches.iter().map(|b| b.channels()).collect()
    }
}

impl StageConfig {
    /// Build a stage from its branch widths.
    ///
    /// # Arguments
    ///
    /// - `stage_channels`: the width of each branch.
    /// - `num_blocks`: blocks per branch chain.
    /// - `kind`: the block factory.
    /// - `cna`: the conv/norm/act policy.
    pub fn build(
        stage_channels: &[usize],
        num_blocks: usize,
        kind: &BlockKind,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        Self {
            branches: stage_channels
                .iter()
                .map(|&channels| BranchChainConfig::build(num_blocks, channels, kind, cna))
                .collect(),
        }
    }

    /// Check every branch chain.
    pub fn try_validate(&self) -> HRNetConfigResult<()> {
        self.branches
            .iter()
            .try_for_each(|branch| branch.try_validate())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// Initialize a [`Stage`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Stage<B> {
        self.expect_valid();
        Stage {
            branches: self
                .branches
                .into_iter()
                .map(|branch| branch.init(device))
                .collect(),
        }
    }
}

/// Parallel per-branch refinement.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    /// One chain per branch, highest resolution first.
    pub branches: Vec<BranchChain<B>>,
}

impl<B: Backend> StageMeta for Stage<B> {
    fn num_branches(&self) -> usize {
        self.branches.len()
    }

    fn branch_channels(&self) -> Vec<usize> {
        self.branches.iter().map(|b| b.channels()).collect()
    }
}

impl<B: Backend> Stage<B> {
    /// Apply each branch chain to its branch.
    ///
    /// # Arguments
    ///
    /// - `inputs`: ``num_branches`` tensors; ``inputs[i]`` is
    ///   ``[batch, channels[i], height_i, width_i]``.
    ///
    /// # Returns
    ///
    /// ``num_branches`` tensors of the same shapes.
    ///
    /// # Panics
    ///
    /// If the number of inputs does not match the number of branches.
    pub fn forward(
        &self,
        inputs: Vec<Tensor<B, 4>>,
    ) -> Vec<Tensor<B, 4>> {
        assert_eq!(
            inputs.len(),
            self.num_branches(),
            "stage expects {} branches, got {}",
            self.num_branches(),
            inputs.len()
        );

        inputs
            .into_iter()
            .zip(self.branches.iter())
            .map(|(x, chain)| {
                let [batch, height, width] = unpack_shape_contract!(
                    ["batch", "channels", "height", "width"],
                    &x,
                    &["batch", "height", "width"],
                    &[("channels", chain.channels())]
                );

                let x = chain.forward(x);

                assert_shape_contract_periodically!(
                    ["batch", "channels", "height", "width"],
                    &x,
                    &[
                        ("batch", batch),
                        ("channels", chain.channels()),
                        ("height", height),
                        ("width", width)
                    ]
                );
                x
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::NormalizationConfig;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    fn cna() -> AbstractCNA2dConfig {
        AbstractCNA2dConfig::new(NormalizationConfig::batch(0.2))
    }

    #[test]
    fn test_stage_config() {
        let config = StageConfig::build(&[8, 16, 32], 4, &BlockKind::Residual, &cna());
        assert_eq!(config.num_branches(), 3);
        assert_eq!(config.branch_channels(), vec![8, 16, 32]);
        for branch in &config.branches {
            assert_eq!(branch.len(), 4);
            for block in &branch.blocks {
                assert_eq!(block.kind(), BlockKind::Residual);
            }
        }
        config.try_validate().unwrap();
    }

    #[test]
    fn test_empty_chain_invalid() {
        let config = StageConfig::build(&[8], 0, &BlockKind::Normal, &cna());
        assert_eq!(
            config.try_validate(),
            Err(HRNetConfigError::InvalidBlockCount(0))
        );
    }

    #[test]
    fn test_stage_forward_independent_branches() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stage: Stage<B> =
            StageConfig::build(&[4, 8], 2, &BlockKind::Normal, &cna()).init(&device);
        assert_eq!(stage.num_branches(), 2);
        assert_eq!(stage.branch_channels(), vec![4, 8]);

        let x0: Tensor<B, 4> = Tensor::random([2, 4, 8, 8], Distribution::Default, &device);
        let x1: Tensor<B, 4> = Tensor::random([2, 8, 4, 4], Distribution::Default, &device);

        let outputs = stage.forward(vec![x0.clone(), x1.clone()]);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].dims(), [2, 4, 8, 8]);
        assert_eq!(outputs[1].dims(), [2, 8, 4, 4]);

        // Each branch depends only on its own input.
        outputs[0]
            .to_data()
            .assert_eq(&stage.branches[0].forward(x0).to_data(), true);
        outputs[1]
            .to_data()
            .assert_eq(&stage.branches[1].forward(x1).to_data(), true);
    }

    #[test]
    #[should_panic(expected = "stage expects 2 branches, got 1")]
    fn test_stage_branch_count_panics() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stage: Stage<B> =
            StageConfig::build(&[4, 8], 1, &BlockKind::Normal, &cna()).init(&device);
        stage.forward(vec![Tensor::zeros([1, 4, 8, 8], &device)]);
    }
}
