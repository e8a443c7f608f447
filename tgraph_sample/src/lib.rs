//! Crate regarding tgraph's log lines and the samples extracted from them
//!
//! Producers append one JSON object per line to a log file. This crate knows
//! the shape of those lines, which metrics they may carry and how a single
//! line becomes a [`sample::Sample`] for one selected metric. It does no I/O.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::perf)]
#![deny(clippy::suspicious)]
#![deny(clippy::complexity)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

pub mod metric;
pub mod record;
pub mod sample;

pub use metric::{Family, MetricSelector};
pub use record::{Field, Record};
pub use sample::{MissingField, Sample, extract, extract_with};
