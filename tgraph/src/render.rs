//! Chart rendering
//!
//! Two renderers share the [`crate::downsample`] module and the
//! [`crate::stats`] computation. The [`terminal`] renderer rasterizes a
//! character grid. The [`web`] renderer builds the JSON document a browser
//! draws from.

pub mod fixed;
pub mod glyph;
pub mod terminal;
pub mod web;

pub use glyph::GlyphStyle;
pub use terminal::{DisplaySpec, Renderer};
pub use web::{ChartStyle, Payload, PayloadSpec, Resolution};
