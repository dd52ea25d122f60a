//! # Normalization Wrapper
//!
//! [`NormalizationConfig`] selects one of the channel-wise ``burn::nn``
//! norm layers for ``[batch, channels, height, width]`` feature maps.
//!
//! `HRNet` builds every norm layer from one shared, feature-unmatched
//! config (see [`NormalizationConfig::batch`]); each call site then sizes
//! it to its producing conv with [`NormalizationConfig::with_num_features`].

use burn::nn::{
    BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig, InstanceNorm, InstanceNormConfig,
};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Normalization`] Config.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum NormalizationConfig {
    /// Batch norm over ``(batch, height, width)``.
    Batch(BatchNormConfig),

    /// Group norm over channel groups.
    Group(GroupNormConfig),

    /// Per-sample, per-channel norm.
    Instance(InstanceNormConfig),
}

impl From<BatchNormConfig> for NormalizationConfig {
    fn from(config: BatchNormConfig) -> Self {
        Self::Batch(config)
    }
}

impl From<GroupNormConfig> for NormalizationConfig {
    fn from(config: GroupNormConfig) -> Self {
        Self::Group(config)
    }
}

impl From<InstanceNormConfig> for NormalizationConfig {
    fn from(config: InstanceNormConfig) -> Self {
        Self::Instance(config)
    }
}

impl NormalizationConfig {
    /// Batch norm with the given running-statistics momentum.
    ///
    /// The feature count is 0 until matched.
    pub fn batch(momentum: f64) -> Self {
        Self::Batch(BatchNormConfig::new(0).with_momentum(momentum))
    }

    /// Group norm with ``num_groups`` groups.
    ///
    /// The channel count is 0 until matched; it must then divide evenly.
    pub fn group(num_groups: usize) -> Self {
        Self::Group(GroupNormConfig::new(num_groups, 0))
    }

    /// Size the config to ``num_features`` channels.
    pub fn with_num_features(
        self,
        num_features: usize,
    ) -> Self {
        match self {
            Self::Batch(mut config) => {
                config.num_features = num_features;
                Self::Batch(config)
            }
            Self::Group(mut config) => {
                config.num_channels = num_features;
                Self::Group(config)
            }
            Self::Instance(mut config) => {
                config.num_channels = num_features;
                Self::Instance(config)
            }
        }
    }

    /// The configured channel count.
    pub fn num_features(&self) -> usize {
        match self {
            Self::Batch(config) => config.num_features,
            Self::Group(config) => config.num_channels,
            Self::Instance(config) => config.num_channels,
        }
    }

    /// The running-statistics momentum; only batch norm tracks one.
    pub fn momentum(&self) -> Option<f64> {
        match self {
            Self::Batch(config) => Some(config.momentum),
            Self::Group(_) | Self::Instance(_) => None,
        }
    }

    /// Initialize a [`Normalization`] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Normalization<B> {
        match self {
            Self::Batch(config) => Normalization::Batch(config.init(device)),
            Self::Group(config) => Normalization::Group(config.init(device)),
            Self::Instance(config) => Normalization::Instance(config.init(device)),
        }
    }
}

/// Channel-wise norm layer.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Normalization<B: Backend> {
    /// 2d [`BatchNorm`].
    Batch(BatchNorm<B, 2>),

    /// [`GroupNorm`].
    Group(GroupNorm<B>),

    /// [`InstanceNorm`].
    Instance(InstanceNorm<B>),
}

impl<B: Backend> Normalization<B> {
    /// Forward pass.
    ///
    /// ``[batch, channels, height, width] -> [batch, channels, height, width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Batch(norm) => norm.forward(input),
            Self::Group(norm) => norm.forward(input),
            Self::Instance(norm) => norm.forward(input),
        }
    }

    /// The channel count.
    pub fn num_features(&self) -> usize {
        match self {
            Self::Batch(norm) => norm.gamma.dims()[0],
            Self::Group(norm) => norm.num_channels,
            Self::Instance(norm) => norm.num_channels,
        }
    }
}
