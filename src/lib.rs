//! wheelsmith - cached, verified Python wheel builds
//!
//! Stores built wheels content-addressed on local disk, validates every
//! archive before it is stored or served, and shares artifacts through a
//! remote registry that is never trusted blindly.

pub mod audit;
pub mod build;
pub mod cache;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod hash;
pub mod registry;
pub mod ui;
pub mod validate;

#[cfg(test)]
mod test_support;

pub use error::{WheelsmithError, WheelsmithResult};
