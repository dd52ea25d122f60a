//! # Output Head and Classifier
//!
//! [`OutputHead`] projects each fused feature map to ``head_channels``
//! with a shared ``1x1`` conv/norm, pools to ``1x1``, then activates.
//! The pool runs between the norm and the activation.
//!
//! [`Classifier`] flattens each pooled map and applies a shared
//! [`Linear`] projection and a [`Sigmoid`].

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, Sigmoid};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`OutputHead`] Config.
#[derive(Config, Debug)]
pub struct OutputHeadConfig {
    /// The ``1x1`` projection.
    pub conv_norm: ConvNorm2dConfig,

    /// The activation, applied after pooling.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

impl OutputHeadConfig {
    /// Build a bias-free ``1x1`` projection head.
    pub fn build(
        in_channels: usize,
        head_channels: usize,
        norm: &NormalizationConfig,
        act: &ActivationConfig,
    ) -> Self {
        Self {
            conv_norm: ConvNorm2dConfig::pointwise([in_channels, head_channels], norm),
            act: act.clone(),
        }
    }

    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    /// Output features.
    pub fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    /// Initialize an [`OutputHead`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> OutputHead<B> {
        OutputHead {
            conv_norm: self.conv_norm.init(device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            act: self.act.init(device),
        }
    }
}

/// Shared projection/pool/activation head.
#[derive(Module, Debug)]
pub struct OutputHead<B: Backend> {
    /// ``1x1`` conv and norm.
    pub conv_norm: ConvNorm2d<B>,

    /// Global average pool.
    pub pool: AdaptiveAvgPool2d,

    /// Activation.
    pub act: Activation<B>,
}

impl<B: Backend> OutputHead<B> {
    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    /// Output features.
    pub fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, 1, 1]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.conv_norm.forward(input);
        let x = self.pool.forward(x);
        let x = self.act.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "one", "one"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("one", 1)
            ]
        );
        x
    }
}

/// [`Classifier`] Config.
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// The class projection.
    pub linear: LinearConfig,
}

impl ClassifierConfig {
    /// Build a classifier from ``in_features`` to ``num_classes``.
    pub fn build(
        in_features: usize,
        num_classes: usize,
    ) -> Self {
        Self::new(LinearConfig::new(in_features, num_classes))
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.linear.d_output
    }

    /// Initialize a [`Classifier`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Classifier<B> {
        Classifier {
            linear: self.linear.init(device),
            sigmoid: Sigmoid,
        }
    }
}

/// Flatten, project and squash to per-class probabilities.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    /// Class projection.
    pub linear: Linear<B>,

    /// Output squashing.
    pub sigmoid: Sigmoid,
}

impl<B: Backend> Classifier<B> {
    /// Input features.
    pub fn in_features(&self) -> usize {
        self.linear.weight.dims()[0]
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.linear.weight.dims()[1]
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_features, 1, 1]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]``, every entry in ``[0, 1]``.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        // [B, C, 1, 1] -> [B, C]
        let x = input.flatten(1, 3);
        let x = self.linear.forward(x);
        self.sigmoid.forward(x)
    }

    /// Re-initialize the projection with the specified number of output classes.
    pub fn with_classes(
        mut self,
        num_classes: usize,
    ) -> Self {
        let d_input = self.in_features();
        self.linear = LinearConfig::new(d_input, num_classes).init(&self.linear.weight.device());
        self
    }
}
