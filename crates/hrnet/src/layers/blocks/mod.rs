//! # Blocks
//!
//! * [`cna`] - ``Conv2d + Norm + Activation`` block.
//! * [`conv_norm`] - ``Conv2d + Norm`` block.
pub mod cna;
pub mod conv_norm;
