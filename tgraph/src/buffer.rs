//! The Sample Buffer
//!
//! An ordered, append-only collection of [`Sample`] values governed by a
//! [`RetentionPolicy`]. Under [`RetentionPolicy::Rolling`] the oldest sample
//! is evicted whenever the buffer grows past its bound. Under
//! [`RetentionPolicy::Accumulate`] nothing is ever evicted; the Downsampler is
//! what keeps large buffers displayable.
//!
//! ## Metrics
//!
//! `samples_appended`: Total samples appended
//! `samples_evicted`: Total samples evicted by a rolling window
//!

use std::{fmt, num::NonZeroUsize};

use metrics::counter;
use serde::Deserialize;
use tgraph_sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Retention mode, independent of the rolling bound.
///
/// A viewer keeps its rolling window size while accumulating, so switching
/// back restores the same bound. The mode and the window together determine
/// the [`RetentionPolicy`] its buffers apply.
pub enum Retention {
    /// Keep a rolling window.
    #[default]
    Rolling,
    /// Keep every sample.
    Accumulate,
}

impl Retention {
    /// The policy this mode applies with a rolling bound of `window`.
    #[must_use]
    pub fn policy(self, window: NonZeroUsize) -> RetentionPolicy {
        match self {
            Retention::Rolling => RetentionPolicy::rolling(window),
            Retention::Accumulate => RetentionPolicy::Accumulate,
        }
    }

    /// The other mode.
    #[must_use]
    pub fn toggle(self) -> Self {
        match self {
            Retention::Rolling => Retention::Accumulate,
            Retention::Accumulate => Retention::Rolling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How many samples a [`Buffer`] keeps.
pub enum RetentionPolicy {
    /// Keep only the most recent `max_size` samples.
    Rolling {
        /// The bound on buffer size.
        max_size: NonZeroUsize,
    },
    /// Keep every sample.
    Accumulate,
}

impl RetentionPolicy {
    /// A rolling window of `max_size` samples.
    #[must_use]
    pub fn rolling(max_size: NonZeroUsize) -> Self {
        RetentionPolicy::Rolling { max_size }
    }

    /// The mode of this policy.
    #[must_use]
    pub fn mode(self) -> Retention {
        match self {
            RetentionPolicy::Rolling { .. } => Retention::Rolling,
            RetentionPolicy::Accumulate => Retention::Accumulate,
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Rolling { .. } => f.write_str("Rolling"),
            RetentionPolicy::Accumulate => f.write_str("Accumulate"),
        }
    }
}

#[derive(Debug, Clone)]
/// Ordered samples under a [`RetentionPolicy`].
///
/// Rolling eviction advances a head offset instead of shifting the backing
/// vector. The dead prefix is dropped once it outgrows the live region, which
/// keeps append O(1) amortized while [`Buffer::snapshot`] stays a plain slice.
pub struct Buffer {
    samples: Vec<Sample>,
    head: usize,
    policy: RetentionPolicy,
}

impl Buffer {
    /// Create an empty [`Buffer`].
    #[must_use]
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            samples: Vec::new(),
            head: 0,
            policy,
        }
    }

    /// The policy this buffer applies on append.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Append a sample, evicting the oldest if a rolling bound is exceeded.
    pub fn append(&mut self, sample: Sample) {
        self.samples.push(sample);
        counter!("samples_appended").increment(1);

        if let RetentionPolicy::Rolling { max_size } = self.policy {
            if self.len() > max_size.get() {
                self.head += 1;
                counter!("samples_evicted").increment(1);
                if self.head > self.len() {
                    self.samples.drain(..self.head);
                    self.head = 0;
                }
            }
        }
    }

    /// Read-only, ordered view of the retained samples.
    #[must_use]
    pub fn snapshot(&self) -> &[Sample] {
        &self.samples[self.head..]
    }

    /// The number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len() - self.head
    }

    /// `true` if no samples are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recently appended sample, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Sample> {
        self.snapshot().last()
    }

    /// Drop every sample, keeping the policy.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.head = 0;
    }
}
