//! # `HRNet`
//!
//! High-Resolution Network: parallel resolution branches, repeatedly
//! exchanged through [`transition::Transition`]s, then fused for
//! classification.
//!
//! The entry point is [`hrnet_model::HRNetAbstractConfig`]:
//!
//! ```rust,no_run
//! use burn::backend::NdArray;
//! use hrnet::models::hrnet::hrnet_model::{HRNet, HRNetAbstractConfig};
//!
//! let device = Default::default();
//! let model: HRNet<NdArray<f32>> = HRNetAbstractConfig::new(10, 32)
//!     .to_structure()
//!     .init(&device);
//! ```

pub mod block;
pub mod errors;
pub mod fusion;
pub mod head;
pub mod hrnet_model;
pub mod input;
pub mod resample;
pub mod schedule;
pub mod stage;
pub mod stem;
pub mod transition;
pub mod util;
