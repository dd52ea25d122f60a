#![warn(missing_docs)]
//!# hrnet - Burn High-Resolution Networks
//!
//! ## Notable Components
//!
//! * [`compat`] - compat code, ported or planned for an upcoming release of ``burn``.
//!   * [`compat::activation_wrapper::Activation`] - activation layer abstraction wrapper.
//!   * [`compat::normalization_wrapper::Normalization`] - norm layer abstraction wrapper.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks`] - miscellaneous blocks.
//!     * [`layers::blocks::cna`] - ``Conv2d + Norm + Activation`` block.
//!     * [`layers::blocks::conv_norm`] - ``Conv2d + Norm`` block.
//!   * [`layers::sampling`] - resolution changing layers.
//!     * [`layers::sampling::Upsample2d`] - nearest-neighbor upsampling.
//! * [`models`] - complete model families.
//!   * [`models::hrnet`] - `HRNet`

pub mod compat;
pub mod layers;
pub mod models;
