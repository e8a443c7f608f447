//! Fixed-point decimal formatting
//!
//! Log lines, value labels and the legend all print numbers with a fixed
//! count of decimals. Rust's float formatting rounds exact ties to even,
//! `3.25` becomes `3.2`. Producers and viewers of this log format round exact
//! ties away from zero, `3.25` becomes `3.3`, and [`Fixed`] does the same.

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq)]
/// A number displayed with `places` decimals, exact ties rounded away from
/// zero. Honors width and alignment flags.
pub struct Fixed {
    value: f64,
    places: usize,
}

impl Fixed {
    /// Display `value` with `places` decimals.
    #[must_use]
    pub fn new(value: f64, places: usize) -> Self {
        Self { value, places }
    }

    fn rounded(self) -> f64 {
        let Ok(exponent) = i32::try_from(self.places) else {
            return self.value;
        };
        let scale = 10_f64.powi(exponent);
        let magnitude = self.value.abs();
        let scaled = magnitude * scale;
        let floor = scaled.floor();
        // A tie only if the product was exact: `magnitude * 2 * scale` must be
        // the odd integer `2 * floor + 1` with no rounding in between.
        let tie = scaled - floor == 0.5
            && magnitude.mul_add(2.0 * scale, -(2.0 * floor + 1.0)) == 0.0;
        if tie {
            (floor + 1.0) / scale * self.value.signum()
        } else {
            self.value
        }
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = format!("{value:.places$}", value = self.rounded(), places = self.places);
        f.pad(&text)
    }
}

impl Serialize for Fixed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
