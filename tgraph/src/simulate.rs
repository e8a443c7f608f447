//! Synthetic load for demonstrations
//!
//! A monitor watching an idle process draws a flat line. These tasks give the
//! monitor's own process something to chart: [`memory`] grows a ballast of
//! float blocks to a ceiling and releases it again, in a sawtooth, and [`cpu`]
//! burns the cpu in short bursts at random intervals. Both run until the stop
//! signal.
//!
//! ## Metrics
//!
//! `simulated_blocks`: Ballast blocks currently held
//! `simulated_bursts`: Cpu bursts run
//!

use std::{hint::black_box, time::Duration};

use metrics::{counter, gauge};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use tokio::{
    pin,
    task,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::signals::Watcher;

/// Period between ballast steps.
const MEMORY_STEP: Duration = Duration::from_millis(50);
/// Floats per ballast block.
const BLOCK_LEN: usize = 10_000;
/// Blocks held at the top of the sawtooth.
const MAX_BLOCKS: usize = 100;

#[derive(Debug)]
/// Memory that grows one block per step past [`MAX_BLOCKS`], then shrinks one
/// block per step to empty, and repeats.
pub struct Ballast {
    blocks: Vec<Vec<f64>>,
    growing: bool,
}

impl Ballast {
    /// An empty ballast about to grow.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            growing: true,
        }
    }

    /// Take one step, filling a new block with `fill` if growing.
    pub fn step(&mut self, fill: f64) {
        if self.growing {
            self.blocks.push(vec![fill; BLOCK_LEN]);
            if self.blocks.len() > MAX_BLOCKS {
                self.growing = false;
            }
        } else {
            self.blocks.pop();
            if self.blocks.is_empty() {
                self.growing = true;
            }
        }
        gauge!("simulated_blocks").set(self.blocks.len() as f64);
    }

    /// Blocks currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// `true` if no block is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for Ballast {
    fn default() -> Self {
        Self::new()
    }
}

/// Step a [`Ballast`] every 50 ms until the stop signal.
pub async fn memory(mut shutdown: Watcher) {
    let mut rng = SmallRng::from_rng(&mut rand::rng());
    let mut ballast = Ballast::new();
    let mut step = time::interval(MEMORY_STEP);
    step.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown_fut = shutdown.recv();
    pin!(shutdown_fut);
    loop {
        tokio::select! {
            () = &mut shutdown_fut => {
                debug!("memory simulation stopping with {blocks} blocks", blocks = ballast.len());
                break;
            }
            _ = step.tick() => ballast.step(rng.random()),
        }
    }
}

/// Burn 10 to 30 ms of cpu every 100 to 200 ms until the stop signal.
pub async fn cpu(mut shutdown: Watcher) {
    let mut rng = SmallRng::from_rng(&mut rand::rng());

    let shutdown_fut = shutdown.recv();
    pin!(shutdown_fut);
    loop {
        let pause = Duration::from_millis(rng.random_range(100..200));
        tokio::select! {
            () = &mut shutdown_fut => {
                debug!("cpu simulation stopping");
                break;
            }
            () = time::sleep(pause) => {
                let work = Duration::from_millis(rng.random_range(10..30));
                if let Err(err) = task::spawn_blocking(move || burn(work)).await {
                    warn!("cpu burst failed: {err}");
                }
                counter!("simulated_bursts").increment(1);
            }
        }
    }
}

fn burn(work: Duration) {
    let start = Instant::now();
    let mut x = 1.0_f64;
    while start.elapsed() < work {
        x = black_box((x * 1_000_003.0).sqrt());
    }
    black_box(x);
}
