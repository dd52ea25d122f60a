//! # Resolution Sampling Layers
pub mod upsample;

pub use upsample::{Upsample2d, Upsample2dConfig};
