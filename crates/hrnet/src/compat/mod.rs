//! # Compat
//!
//! Wrappers which select between ``burn::nn`` layers at config time.
pub mod activation_wrapper;
pub mod normalization_wrapper;
