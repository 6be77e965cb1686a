use ndarray::{Array1, ArrayView1, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::DurationConfig;

/// Where a trajectory is relative to the interaction region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RegionPhase {
    NotYetEntered,
    Interacting,
    Exited,
}

/// Decides when a trajectory has finished.
///
/// Without bounds only the step and time budgets apply. With bounds a
/// trajectory additionally stops as soon as it leaves the box, but only
/// after it has been inside at least once.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DurationCriteria {
    bounds: Option<(Array1<f64>, Array1<f64>)>,
    max_steps: usize,
    max_time: f64,
    phase: RegionPhase,
}

impl From<&DurationConfig> for DurationCriteria {
    fn from(config: &DurationConfig) -> Self {
        Self {
            bounds: config.bounds.clone(),
            max_steps: config.max_steps,
            max_time: config.max_time,
            phase: RegionPhase::NotYetEntered,
        }
    }
}

impl DurationCriteria {
    #[must_use]
    pub fn phase(&self) -> RegionPhase {
        self.phase
    }

    /// Is `position` strictly inside the interaction region?
    #[must_use]
    pub fn currently_interacting(&self, position: &ArrayView1<f64>) -> bool {
        match &self.bounds {
            None => false,
            Some((lower, upper)) => Zip::from(lower)
                .and(position)
                .and(upper)
                .all(|&l, &x, &u| l < x && x < u),
        }
    }

    /// Returns `false` once the trajectory ought to stop.
    pub fn continue_simulating(&mut self, position: &ArrayView1<f64>, nsteps: usize, time: f64) -> bool {
        if nsteps > self.max_steps || time > self.max_time {
            return false;
        }
        match self.phase {
            RegionPhase::NotYetEntered => {
                if self.currently_interacting(position) {
                    self.phase = RegionPhase::Interacting;
                }
                true
            }
            RegionPhase::Interacting => {
                if self.currently_interacting(position) {
                    true
                } else {
                    self.phase = RegionPhase::Exited;
                    false
                }
            }
            RegionPhase::Exited => false,
        }
    }
}
