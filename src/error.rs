//! Error taxonomy for the compositor core
//!
//! None of these are fatal: each one is contained to "skip this visual
//! element, keep the rest of the frame valid".

use thiserror::Error;

/// Errors raised while building a perspective warp
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WarpError {
    /// Three collinear corners, or a singular system during elimination
    #[error("degenerate quad: {0}")]
    DegenerateQuad(&'static str),
}

/// Failure to fetch or decode a raster image
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageLoadError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("unsupported image URL: {0}")]
    Unsupported(String),

    #[error("failed to read {url}: {reason}")]
    Io { url: String, reason: String },

    #[error("failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// The external generation call was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("generation failed: {0}")]
pub struct GenerationFailure(pub String);

impl GenerationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
