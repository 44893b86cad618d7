//! Viewer for match trials: point correspondences found between two rendered tiles.

pub mod cell;
pub mod client;
pub mod config;
pub mod draw;
pub mod error;
pub mod form;
pub mod handoff;
pub mod model;
pub mod navigation;
pub mod render;
pub mod session;
pub mod summary;
pub mod urls;
pub mod util;

#[cfg(test)]
mod testing;

pub use error::{Result, TrialError};
