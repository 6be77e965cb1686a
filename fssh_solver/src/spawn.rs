use rand::Rng;
use rand_distr::{Distribution, Uniform};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{FsshError, Result};

/// A single scheduled threshold.
///
/// `dw` is the share of probability this threshold stands for, and
/// `children` the schedule handed to trajectories spawned here.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpawnNode {
    pub zeta: f64,
    pub dw: f64,
    pub children: Option<Vec<SpawnNode>>,
}

/// Schedule of deterministic hopping thresholds for even sampling.
///
/// Thresholds on a level are consumed in order. A stack without any samples
/// only tracks weight, and falls back to uniform random thresholds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpawnStack {
    samples: Option<Vec<SpawnNode>>,
    weight: f64,
    consumed: usize,
}

impl SpawnStack {
    #[must_use]
    pub fn new(samples: Option<Vec<SpawnNode>>, weight: f64) -> Self {
        Self {
            samples,
            weight,
            consumed: 0,
        }
    }

    /// Build a self-similar schedule `sample_depth` levels deep, where every
    /// level holds `nsamples` evenly spaced thresholds.
    ///
    /// The thresholds are `k / nsamples` for `k = 1..=nsamples`, or, with
    /// `include_first`, `k / (nsamples - 1)` for `k = 0..nsamples`.
    /// Every threshold carries `dw = 1 / nsamples`.
    ///
    /// # Errors
    /// Returns an error if the grid would be empty or degenerate.
    #[allow(clippy::cast_precision_loss)]
    pub fn build_simple(nsamples: usize, sample_depth: usize, include_first: bool) -> Result<Self> {
        let min_samples = if include_first { 2 } else { 1 };
        if nsamples < min_samples || sample_depth == 0 {
            return Err(FsshError::InvalidConfig(format!(
                "cannot build a spawn stack with {nsamples} samples and depth {sample_depth}"
            )));
        }

        let thresholds: Vec<f64> = if include_first {
            (0..nsamples)
                .map(|k| k as f64 / (nsamples - 1) as f64)
                .collect()
        } else {
            (1..=nsamples).map(|k| k as f64 / nsamples as f64).collect()
        };
        let dw = 1.0 / nsamples as f64;

        let level = |children: Option<Vec<SpawnNode>>| {
            thresholds
                .iter()
                .map(|&zeta| SpawnNode {
                    zeta,
                    dw,
                    children: children.clone(),
                })
                .collect::<Vec<_>>()
        };

        let mut forest = level(None);
        for _ in 1..sample_depth {
            forest = level(Some(forest));
        }

        Ok(Self::new(Some(forest), 1.0))
    }

    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// The same schedule, carrying `factor` times the weight.
    #[must_use]
    pub fn scaled(mut self, factor: f64) -> Self {
        self.weight *= factor;
        self
    }

    /// The thresholds on the current level, if this stack has any.
    #[must_use]
    pub fn samples(&self) -> Option<&[SpawnNode]> {
        self.samples.as_deref()
    }

    /// The node of the threshold most recently returned by [`SpawnStack::next_threshold`].
    #[must_use]
    pub fn current(&self) -> Option<&SpawnNode> {
        self.samples
            .as_ref()
            .and_then(|samples| samples.get(self.consumed.checked_sub(1)?))
    }

    /// Advance to the next threshold.
    ///
    /// # Errors
    /// Returns an error once every threshold on this level has been used.
    pub fn next_threshold<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<f64> {
        let zeta = match &self.samples {
            Some(samples) => {
                samples
                    .get(self.consumed)
                    .ok_or(FsshError::SpawnStackExhausted {
                        consumed: self.consumed,
                    })?
                    .zeta
            }
            None => Uniform::new(0.0, 1.0).sample(rng),
        };
        self.consumed += 1;
        Ok(zeta)
    }

    /// The schedule handed to a trajectory spawned at the current threshold.
    ///
    /// # Errors
    /// Returns an error if no threshold has been consumed yet.
    pub fn spawn(&self) -> Result<SpawnStack> {
        if self.samples.is_none() {
            return Ok(Self::new(None, self.weight));
        }
        let node = self.current().ok_or(FsshError::SpawnStackUnstarted)?;
        Ok(Self::new(node.children.clone(), self.weight * node.dw))
    }
}
