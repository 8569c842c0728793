//! traceglobe - follow a network path across a spinning terminal globe
//!
//! ```text
//! target → PathProbe (system traceroute) → hop addresses
//!        → GeoResolver (LRU cache + one batched lookup) → coordinates
//!        → GlobeRenderer (orthographic projection) → draw commands
//!        → BrailleCanvas → terminal
//! ```
//!
//! A trace runs on a worker thread under `TraceOrchestrator`; the foreground
//! keeps drawing and polls for progress.

pub mod app;
pub mod canvas;
pub mod config;
pub mod error;
pub mod geo;
pub mod globe;
pub mod probe;
pub mod terminal;
pub mod trace;
