use ndarray::{Array1, Array2};
use num_complex::Complex;
use rand::Rng;
use rand_distr::{Distribution, Uniform, WeightedIndex};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    config::HoppingMethod,
    error::{FsshError, Result},
    spawn::SpawnStack,
};

/// Fewest switches hopping probabilities out of the `active` state over one step.
///
/// ```latex
/// P_{a \to t} = 2 Re(\rho_{at}) D_{at} dt / Re(\rho_{aa})
/// ```
///
/// Negative probabilities are clipped to zero and the self hop is always zero.
/// An active state without population has no flux to divide, every
/// probability is then zero rather than infinite.
#[must_use]
pub fn hopping_probabilities(
    rho: &Array2<Complex<f64>>,
    active: usize,
    nac: &Array2<f64>,
    dt: f64,
) -> Array1<f64> {
    let population = rho[[active, active]].re;
    if !(population > 0.0) {
        return Array1::zeros(rho.ncols());
    }
    let mut probs = Array1::from_shape_fn(rho.ncols(), |target| {
        2.0 * rho[[active, target]].re * nac[[active, target]] * dt / population
    });
    probs[active] = 0.0;
    probs.mapv_inplace(|p| p.max(0.0));
    probs
}

/// A hop chosen by a [`HoppingStrategy`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HopTarget {
    pub target: usize,
    /// Share of the trajectory weight carried by this hop
    pub weight: f64,
    /// Threshold the hop was measured against
    pub zeta: f64,
    /// Probability that exceeded `zeta`
    pub accumulated: f64,
    /// Schedule for a spawned copy. A hop without one is carried out in place
    pub stack: Option<SpawnStack>,
}

#[inline]
fn uniform<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    Uniform::new(0.0, 1.0).sample(rng)
}

/// The probability of having hopped at least once, given `accumulated`
/// before this step and a total rate `total * dt` over this step.
#[inline]
fn accumulate(accumulated: f64, total: f64) -> f64 {
    1.0 - (1.0 - accumulated) * (-total).exp()
}

/// Pick one target with probability `probs[target] / sum(probs)`.
fn single_hop<R: Rng + ?Sized>(
    probs: &Array1<f64>,
    zeta: f64,
    accumulated: f64,
    rng: &mut R,
) -> Result<HopTarget> {
    let target = WeightedIndex::<f64>::new(probs.iter())?.sample(rng);
    Ok(HopTarget {
        target,
        weight: 1.0,
        zeta,
        accumulated,
        stack: None,
    })
}

/// Decides if and where a trajectory hops.
///
/// Hops without a spawn stack are carried out in place. Even sampling
/// instead spawns a weighted copy of the trajectory for every target, until
/// its schedule runs out.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HoppingStrategy {
    Stochastic,
    Cumulative {
        accumulated: f64,
        zeta: f64,
    },
    EvenSampling {
        accumulated: f64,
        zeta: f64,
        stack: SpawnStack,
    },
}

impl HoppingStrategy {
    /// Set up the strategy, pulling the first threshold.
    ///
    /// # Errors
    /// Returns an error if even sampling is requested without a spawn stack,
    /// or if the stack has no thresholds.
    pub fn new<R: Rng + ?Sized>(
        method: HoppingMethod,
        stack: Option<SpawnStack>,
        rng: &mut R,
    ) -> Result<Self> {
        match method {
            HoppingMethod::Stochastic => Ok(Self::Stochastic),
            HoppingMethod::Cumulative => Ok(Self::Cumulative {
                accumulated: 0.0,
                zeta: uniform(rng),
            }),
            HoppingMethod::EvenSampling => {
                let mut stack = stack.ok_or_else(|| {
                    FsshError::InvalidConfig("even sampling requires a spawn stack".to_owned())
                })?;
                let zeta = stack.next_threshold(rng)?;
                Ok(Self::EvenSampling {
                    accumulated: 0.0,
                    zeta,
                    stack,
                })
            }
        }
    }

    /// The spawn stack, for even sampling.
    #[must_use]
    pub fn stack(&self) -> Option<&SpawnStack> {
        match self {
            HoppingStrategy::EvenSampling { stack, .. } => Some(stack),
            _ => None,
        }
    }

    /// The current threshold, if it persists between steps.
    #[must_use]
    pub fn zeta(&self) -> Option<f64> {
        match self {
            HoppingStrategy::Stochastic => None,
            HoppingStrategy::Cumulative { zeta, .. } | HoppingStrategy::EvenSampling { zeta, .. } => {
                Some(*zeta)
            }
        }
    }

    /// Hand a spawned trajectory its own schedule: a fresh accumulator and
    /// the first threshold of `stack`.
    ///
    /// # Errors
    /// Returns an error if `stack` has no thresholds.
    pub fn for_spawn<R: Rng + ?Sized>(mut stack: SpawnStack, rng: &mut R) -> Result<Self> {
        let zeta = stack.next_threshold(rng)?;
        Ok(Self::EvenSampling {
            accumulated: 0.0,
            zeta,
            stack,
        })
    }

    /// Decide which hops happen this step, given the probabilities from
    /// [`hopping_probabilities`].
    ///
    /// Never changes the trajectory itself, only the strategy's own
    /// accumulator and threshold.
    ///
    /// # Errors
    /// Returns an error if a threshold schedule runs out.
    pub fn decide_hops<R: Rng + ?Sized>(
        &mut self,
        probs: &Array1<f64>,
        active: usize,
        rng: &mut R,
    ) -> Result<Vec<HopTarget>> {
        match self {
            HoppingStrategy::Stochastic => {
                let zeta = uniform(rng);
                let mut cumulative = 0.0;
                for (target, p) in probs.iter().enumerate() {
                    cumulative += p;
                    if zeta < cumulative {
                        return Ok(vec![HopTarget {
                            target,
                            weight: 1.0,
                            zeta,
                            accumulated: cumulative,
                            stack: None,
                        }]);
                    }
                }
                Ok(vec![])
            }
            HoppingStrategy::Cumulative { accumulated, zeta } => {
                let total = probs.sum();
                let next = accumulate(*accumulated, total);
                if next > *zeta {
                    let hop = single_hop(probs, *zeta, next, rng)?;
                    *accumulated = 0.0;
                    *zeta = uniform(rng);
                    return Ok(vec![hop]);
                }
                *accumulated = next;
                Ok(vec![])
            }
            HoppingStrategy::EvenSampling {
                accumulated,
                zeta,
                stack,
            } => {
                let total = probs.sum();
                let next = accumulate(*accumulated, total);
                if next > *zeta {
                    if stack.samples().is_none() {
                        // Nothing left on the schedule, hop in place with the whole weight
                        let hop = single_hop(probs, *zeta, next, rng)?;
                        *accumulated = 0.0;
                        *zeta = stack.next_threshold(rng)?;
                        return Ok(vec![hop]);
                    }
                    let spawned = stack.spawn()?;
                    let hops = probs
                        .iter()
                        .enumerate()
                        .filter(|&(target, &p)| target != active && p > 0.0)
                        .map(|(target, &p)| HopTarget {
                            target,
                            weight: p / total,
                            zeta: *zeta,
                            accumulated: next,
                            stack: Some(spawned.clone()),
                        })
                        .collect();
                    // The step's increment is not kept, only the threshold moves on
                    *zeta = stack.next_threshold(rng)?;
                    return Ok(hops);
                }
                *accumulated = next;
                Ok(vec![])
            }
        }
    }
}
