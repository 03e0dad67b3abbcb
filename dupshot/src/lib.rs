//! # dupshot — one-shot screen capture
//!
//! Captures a single frame of one display output through DXGI Desktop
//! Duplication, draws the cursor onto it, and writes a PPM (or BMP) file.
//!
//! - **config**: `ShotConfig`, the TOML file layer
//! - **shot**: capture-and-save runner

pub mod config;
pub mod shot;
