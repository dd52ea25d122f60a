//! # Model Families
pub mod hrnet;
