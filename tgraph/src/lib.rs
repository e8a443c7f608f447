//! The tgraph live metric charting tool.
//!
//! A producer appends one JSON object per line to a log file. Viewers follow
//! that file and chart one metric at a time, either as a character grid in
//! the terminal or as a browser dashboard. This library supports the tgraph
//! binary found elsewhere in this project.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod buffer;
pub mod config;
pub mod downsample;
pub mod follow;
pub mod history;
pub mod httpd;
pub mod monitor;
pub mod render;
pub mod session;
pub mod signals;
pub mod simulate;
pub mod stats;
pub mod viewer;
