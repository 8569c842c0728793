//! Orthographic globe: boundary data, projection, and frame rendering

pub mod geometry;
pub mod projector;
pub mod renderer;
