//! # `CNA2d` - Conv2d, Norm, Activation
//!
//! Almost every layer of `HRNet` is a [`CNA2d`]: a bias-free square
//! convolution, a norm, and an activation. [`AbstractCNA2dConfig`] holds
//! the network-wide norm and activation choices, and stamps out sized
//! [`CNA2dConfig`]s with [`AbstractCNA2dConfig::square`].
//!
//! [`CNA2d::hook_forward`] exposes the point between the norm and the
//! activation, where residual blocks add their skip connection.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Network-wide conv/norm/act policy.
///
/// The norm config is unsized; [`AbstractCNA2dConfig::square`]
/// sizes it to each convolution's output.
#[derive(Config, Debug)]
pub struct AbstractCNA2dConfig {
    /// Unsized norm config.
    pub norm: NormalizationConfig,

    /// Activation config.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

impl AbstractCNA2dConfig {
    /// A bias-free ``kernel x kernel`` layer config.
    ///
    /// Padding is ``kernel / 2``: stride 1 keeps the resolution,
    /// stride 2 halves it.
    ///
    /// # Arguments
    ///
    /// - `channels`: ``[in_channels, out_channels]``.
    /// - `kernel`: an odd kernel size.
    /// - `stride`: the stride along both axes.
    pub fn square(
        &self,
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
    ) -> CNA2dConfig {
        let padding = kernel / 2;
        CNA2dConfig {
            conv: Conv2dConfig::new(channels, [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_bias(false),
            norm: self.norm.clone().with_num_features(channels[1]),
            act: self.act.clone(),
        }
    }
}

/// [`CNA2dConfig`] / [`CNA2d`] meta API.
pub trait CNA2dMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Output channels.
    fn out_channels(&self) -> usize;

    /// ``[height_stride, width_stride]``.
    fn stride(&self) -> [usize; 2];
}

/// [`CNA2d`] Config.
#[derive(Config, Debug)]
pub struct CNA2dConfig {
    /// Convolution.
    pub conv: Conv2dConfig,

    /// Norm; resized to the conv output at init.
    pub norm: NormalizationConfig,

    /// Activation.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

impl CNA2dMeta for CNA2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl CNA2dConfig {
    /// Initialize a [`CNA2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> CNA2d<B> {
        let features = self.out_channels();
        CNA2d {
            conv: self.conv.init(device),
            norm: self.norm.with_num_features(features).init(device),
            act: self.act.init(device),
        }
    }
}

/// Conv2d, then norm, then activation.
#[derive(Module, Debug)]
pub struct CNA2d<B: Backend> {
    /// Convolution.
    pub conv: Conv2d<B>,

    /// Norm.
    pub norm: Normalization<B>,

    /// Activation.
    pub act: Activation<B>,
}

impl<B: Backend> CNA2dMeta for CNA2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.dims()[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl<B: Backend> CNA2d<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, out_height*stride, out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.hook_forward(input, |x| x)
    }

    /// Forward pass, with ``hook`` applied to the normed features
    /// before the activation.
    ///
    /// ```rust,ignore
    /// act(hook(norm(conv(input))))
    /// ```
    ///
    /// The hook must preserve its input's shape.
    pub fn hook_forward<F>(
        &self,
        input: Tensor<B, 4>,
        hook: F,
    ) -> Tensor<B, 4>
    where
        F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        let [height_stride, width_stride] = self.stride();
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "height_stride",
                "in_width" = "out_width" * "width_stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("height_stride", height_stride),
                ("width_stride", width_stride),
            ]
        );

        let x = self.norm.forward(self.conv.forward(input));
        let x = self.act.forward(hook(x));

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
