//! # Input Stem
//!
//! Two strided ``3x3`` conv/norm/act blocks, reducing the input image
//! to ``1/4`` resolution:
//!
//! ```text
//! [batch, in_channels, H, W]
//!   -> cna1 (stride 2) -> [batch, out_channels, H/2, W/2]
//!   -> cna2 (stride 2) -> [batch, out_channels, H/4, W/4]
//! ```

use crate::layers::blocks::cna::{AbstractCNA2dConfig, CNA2d, CNA2dConfig, CNA2dMeta};
use crate::models::hrnet::util::stride_div_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Spatial reduction of the stem.
pub const STEM_REDUCTION: usize = 4;

/// [`HRNetStem`] Meta API.
pub trait HRNetStemMeta {
    /// Image channels.
    fn in_channels(&self) -> usize;

    /// Stem feature channels.
    fn out_channels(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of [`STEM_REDUCTION`].
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, STEM_REDUCTION)
    }
}

/// [`HRNetStem`] Config.
#[derive(Config, Debug)]
pub struct HRNetStemConfig {
    /// ``in_channels -> out_channels``, stride 2.
    pub cna1: CNA2dConfig,

    /// ``out_channels -> out_channels``, stride 2.
    pub cna2: CNA2dConfig,
}

impl HRNetStemMeta for HRNetStemConfig {
    fn in_channels(&self) -> usize {
        self.cna1.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna2.out_channels()
    }
}

impl HRNetStemConfig {
    /// Build the standard stem.
    pub fn build(
        in_channels: usize,
        out_channels: usize,
        cna: &AbstractCNA2dConfig,
    ) -> Self {
        Self {
            cna1: cna.square([in_channels, out_channels], 3, 2),
            cna2: cna.square([out_channels, out_channels], 3, 2),
        }
    }

    /// Initialize a [`HRNetStem`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HRNetStem<B> {
        HRNetStem {
            cna1: self.cna1.init(device),
            cna2: self.cna2.init(device),
        }
    }
}

/// Input stem.
#[derive(Module, Debug)]
pub struct HRNetStem<B: Backend> {
    /// First strided conv/norm/act.
    pub cna1: CNA2d<B>,

    /// Second strided conv/norm/act.
    pub cna2: CNA2d<B>,
}

impl<B: Backend> HRNetStemMeta for HRNetStem<B> {
    fn in_channels(&self) -> usize {
        self.cna1.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna2.out_channels()
    }
}

impl<B: Backend> HRNetStem<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*4, in_width=out_width*4]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "reduction",
                "in_width" = "out_width" * "reduction"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("reduction", STEM_REDUCTION),
            ]
        );

        let x = self.cna1.forward(input);
        let x = self.cna2.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::NormalizationConfig;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    #[test]
    fn test_stem_config() {
        let cna = AbstractCNA2dConfig::new(NormalizationConfig::batch(0.2));
        let config = HRNetStemConfig::build(3, 64, &cna);

        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.out_channels(), 64);
        assert_eq!(config.cna1.stride(), [2, 2]);
        assert_eq!(config.cna2.stride(), [2, 2]);
        assert_eq!(config.cna2.in_channels(), 64);
        assert_eq!(config.output_resolution([256, 128]), [64, 32]);
    }

    #[test]
    #[should_panic(expected = "30 !~ height_in=(height_out*stride)")]
    fn test_stem_resolution_panic() {
        let cna = AbstractCNA2dConfig::new(NormalizationConfig::batch(0.2));
        HRNetStemConfig::build(3, 64, &cna).output_resolution([30, 32]);
    }

    #[test]
    fn test_stem_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let cna = AbstractCNA2dConfig::new(NormalizationConfig::batch(0.2));
        let stem: HRNetStem<B> = HRNetStemConfig::build(3, 16, &cna).init(&device);

        let input = Tensor::ones([2, 3, 32, 24], &device);
        let output = stem.forward(input);

        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[
                ("batch", 2),
                ("channels", 16),
                ("height", 8),
                ("width", 6)
            ]
        );
    }
}
