//! # Activation Wrapper
//!
//! [`ActivationConfig`] picks the elementwise nonlinearity used after
//! every conv/norm pair and in the output head. [`Relu`] is the default.

use burn::nn::{Gelu, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig, Relu, Sigmoid, Tanh};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Activation`] Config.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum ActivationConfig {
    /// [`Relu`].
    Relu,

    /// [`LeakyRelu`].
    LeakyRelu(LeakyReluConfig),

    /// [`PRelu`]; learned slope.
    PRelu(PReluConfig),

    /// [`Gelu`].
    Gelu,

    /// [`Sigmoid`].
    Sigmoid,

    /// [`Tanh`].
    Tanh,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Relu
    }
}

impl From<LeakyReluConfig> for ActivationConfig {
    fn from(config: LeakyReluConfig) -> Self {
        Self::LeakyRelu(config)
    }
}

impl From<PReluConfig> for ActivationConfig {
    fn from(config: PReluConfig) -> Self {
        Self::PRelu(config)
    }
}

impl ActivationConfig {
    /// Initialize an [`Activation`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            Self::Relu => Activation::Relu(Relu),
            Self::LeakyRelu(config) => Activation::LeakyRelu(config.init()),
            Self::PRelu(config) => Activation::PRelu(config.init(device)),
            Self::Gelu => Activation::Gelu(Gelu),
            Self::Sigmoid => Activation::Sigmoid(Sigmoid),
            Self::Tanh => Activation::Tanh(Tanh),
        }
    }
}

/// Elementwise activation layer.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Activation<B: Backend> {
    /// [`Relu`].
    Relu(Relu),

    /// [`LeakyRelu`].
    LeakyRelu(LeakyRelu),

    /// [`PRelu`].
    PRelu(PRelu<B>),

    /// [`Gelu`].
    Gelu(Gelu),

    /// [`Sigmoid`].
    Sigmoid(Sigmoid),

    /// [`Tanh`].
    Tanh(Tanh),
}

impl<B: Backend> Activation<B> {
    /// Forward pass; shape preserving.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Self::Relu(layer) => layer.forward(input),
            Self::LeakyRelu(layer) => layer.forward(input),
            Self::PRelu(layer) => layer.forward(input),
            Self::Gelu(layer) => layer.forward(input),
            Self::Sigmoid(layer) => layer.forward(input),
            Self::Tanh(layer) => layer.forward(input),
        }
    }
}
