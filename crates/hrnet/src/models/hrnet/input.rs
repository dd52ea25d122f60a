//! # Input Adapter
//!
//! [`HRNetInput`] runs the [`HRNetStem`] and then projects the stem
//! features to the first stage's branch width with a ``1x1`` conv/norm/act;
//! decoupling stem capacity from the stage-1 channel budget.

use crate::layers::blocks::cna::{AbstractCNA2dConfig, CNA2d, CNA2dConfig, CNA2dMeta};
use crate::models::hrnet::stem::{HRNetStem, HRNetStemConfig, HRNetStemMeta};
use bimm_contracts::assert_shape_contract_periodically;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`HRNetInput`] Config.
#[derive(Config, Debug)]
pub struct HRNetInputConfig {
    /// The stem.
    pub stem: HRNetStemConfig,

    /// ``1x1`` projection ``stem_channels -> out_channels``.
    pub adapter: CNA2dConfig,
}

impl HRNetInputConfig {
    /// Build an input stem + adapter.
    pub fn build(
        in_channels: usize,
        stem_channels: usize,
        out_channels: usize,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        Self {
            stem: HRNetStemConfig::build(in_channels, stem_channels, cna),
            adapter: cna.square([stem_channels, out_channels], 1, 1),
        }
    }

    /// Image channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// Stage-1 branch width.
    pub fn out_channels(&self) -> usize {
        self.adapter.out_channels()
    }

    /// Initialize a [`HRNetInput`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HRNetInput<B> {
        assert_eq!(
            self.stem.out_channels(),
            self.adapter.in_channels(),
            "stem out_channels must match adapter in_channels"
        );
        HRNetInput {
            stem: self.stem.init(device),
            adapter: self.adapter.init(device),
        }
    }
}

/// Stem and stage-1 channel adapter.
#[derive(Module, Debug)]
pub struct HRNetInput<B: Backend> {
    /// The stem.
    pub stem: HRNetStem<B>,

    /// ``1x1`` channel projection.
    pub adapter: CNA2d<B>,
}

impl<B: Backend> HRNetInput<B> {
    /// Image channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// Stage-1 branch width.
    pub fn out_channels(&self) -> usize {
        self.adapter.out_channels()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height/4, width/4]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.stem.forward(input);
        let x = self.adapter.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "height", "width"],
            &x,
            &[("out_channels", self.out_channels())]
        );

        x
    }
}
