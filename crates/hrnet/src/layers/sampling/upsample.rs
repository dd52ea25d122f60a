//! # Nearest-Neighbor Upsampling
//!
//! [`Upsample2d`] repeats every pixel ``scale_factor`` times
//! along both spatial axes, via burn's nearest [`Interpolate2d`].
//!
//! Repeated nearest-neighbor ``x2`` upsampling composes exactly:
//! ``k`` successive ``x2`` steps equal one ``x2^k`` step.

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::interpolate::{Interpolate2d, Interpolate2dConfig, InterpolateMode};
use burn::prelude::{Backend, Tensor};

/// [`Upsample2d`] Config.
#[derive(Config, Debug)]
pub struct Upsample2dConfig {
    /// Integer spatial scale factor.
    #[config(default = "2")]
    pub scale_factor: usize,
}

impl Upsample2dConfig {
    /// Config for ``steps`` successive ``x2`` upsamples.
    pub fn doublings(steps: usize) -> Self {
        Self::new().with_scale_factor(1 << steps)
    }

    /// Initialize a [`Upsample2d`].
    pub fn init(&self) -> Upsample2d {
        assert!(
            self.scale_factor > 0,
            "Upsample2d scale_factor must be positive"
        );
        let scale = self.scale_factor as f32;
        Upsample2d {
            scale_factor: self.scale_factor,
            interpolate: Interpolate2dConfig::new()
                .with_scale_factor(Some([scale, scale]))
                .with_mode(InterpolateMode::Nearest)
                .init(),
        }
    }
}

/// Nearest-neighbor upsampling layer.
#[derive(Module, Clone, Debug)]
pub struct Upsample2d {
    /// Integer spatial scale factor.
    pub scale_factor: usize,

    /// Nearest interpolation at ``scale_factor``.
    pub interpolate: Interpolate2d,
}

impl Upsample2d {
    /// Get the output resolution for a given input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        [
            input_resolution[0] * self.scale_factor,
            input_resolution[1] * self.scale_factor,
        ]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels, height*scale_factor, width*scale_factor]``
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        if self.scale_factor == 1 {
            return input;
        }
        let [height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["height", "width"]
        );

        let output = self.interpolate.forward(input);

        assert_shape_contract_periodically!(
            [
                "batch",
                "channels",
                "out_height" = "height" * "scale",
                "out_width" = "width" * "scale"
            ],
            &output,
            &[
                ("height", height),
                ("width", width),
                ("scale", self.scale_factor)
            ]
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type B = NdArray<f32>;

    #[test]
    fn test_config() {
        assert_eq!(Upsample2dConfig::new().scale_factor, 2);
        assert_eq!(Upsample2dConfig::doublings(0).scale_factor, 1);
        assert_eq!(Upsample2dConfig::doublings(3).scale_factor, 8);

        let layer = Upsample2dConfig::doublings(2).init();
        assert_eq!(layer.output_resolution([3, 5]), [12, 20]);
        assert_eq!(layer.interpolate.scale_factor, Some([4.0, 4.0]));
        assert!(matches!(layer.interpolate.mode.0, InterpolateMode::Nearest));
    }

    #[test]
    fn test_nearest_values() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::from_data([[[[1.0, 2.0], [3.0, 4.0]]]], &device);

        let output = Upsample2dConfig::new().init().forward(input);

        output.to_data().assert_eq(
            &TensorData::from([[[
                [1.0f32, 1.0, 2.0, 2.0],
                [1.0, 1.0, 2.0, 2.0],
                [3.0, 3.0, 4.0, 4.0],
                [3.0, 3.0, 4.0, 4.0],
            ]]]),
            true,
        );
    }

    #[test]
    fn test_doublings_compose() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::random([2, 3, 4, 5], Distribution::Default, &device);

        let twice = Upsample2dConfig::new().init();
        let stepped = twice.forward(twice.forward(input.clone()));
        let direct = Upsample2dConfig::doublings(2).init().forward(input);

        assert_eq!(direct.dims(), [2, 3, 16, 20]);
        direct.to_data().assert_eq(&stepped.to_data(), true);
    }
}
