use std::str::FromStr;

use ndarray::{Array1, Array2};
use num_complex::Complex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    electronics::ElectronicStructure,
    error::{FsshError, Result},
    spawn::SpawnStack,
};

/// How hops are decided and carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HoppingMethod {
    /// Fewest switches, compared against a fresh uniform draw every step.
    #[default]
    Stochastic,
    /// Accumulate the hopping probability across steps against a single draw.
    Cumulative,
    /// Spawn weighted copies at scheduled thresholds instead of hopping.
    EvenSampling,
}

impl FromStr for HoppingMethod {
    type Err = FsshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stochastic" | "fssh" => Ok(Self::Stochastic),
            "cumulative" => Ok(Self::Cumulative),
            "even_sampling" | "even" => Ok(Self::EvenSampling),
            _ => Err(FsshError::UnrecognizedHoppingMethod(s.to_owned())),
        }
    }
}

/// How the end of a trajectory is summarised, see [`crate::trajectory::Trajectory::outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OutcomeType {
    /// Only the active state is counted
    #[default]
    State,
    /// The diagonal of the density matrix is counted
    Populations,
}

impl FromStr for OutcomeType {
    type Err = FsshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "state" => Ok(Self::State),
            "populations" => Ok(Self::Populations),
            _ => Err(FsshError::UnrecognizedOutcomeType(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InitialState {
    /// All population on state 0, which is also active.
    Ground,
    /// An explicit density matrix together with the active state.
    Density {
        rho: Array2<Complex<f64>>,
        active: usize,
    },
}

impl FromStr for InitialState {
    type Err = FsshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ground" => Ok(Self::Ground),
            _ => Err(FsshError::UnrecognizedInitialState(s.to_owned())),
        }
    }
}

impl InitialState {
    /// The density matrix and active state for a model with `nstates` states.
    ///
    /// # Errors
    /// Returns an error if the density matrix or active state do not fit the model.
    pub fn resolve(&self, nstates: usize) -> Result<(Array2<Complex<f64>>, usize)> {
        match self {
            InitialState::Ground => {
                let mut rho = Array2::zeros((nstates, nstates));
                rho[[0, 0]] = Complex { re: 1.0, im: 0.0 };
                Ok((rho, 0))
            }
            InitialState::Density { rho, active } => {
                crate::error::check_shape("initial density matrix", &[nstates, nstates], rho.shape())?;
                if *active >= nstates {
                    return Err(FsshError::UnrecognizedInitialState(format!(
                        "active state {active} out of range for {nstates} states"
                    )));
                }
                Ok((rho.clone(), *active))
            }
        }
    }
}

/// Limits on how long a trajectory runs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DurationConfig {
    /// Lower and upper corner of the interaction region
    pub bounds: Option<(Array1<f64>, Array1<f64>)>,
    pub max_steps: usize,
    pub max_time: f64,
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            bounds: None,
            max_steps: 100_000,
            // Large enough never to be hit
            max_time: 1e25,
        }
    }
}

/// Everything needed to start (or restart) a single trajectory.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrajectoryConfig {
    pub position: Array1<f64>,
    pub momentum: Array1<f64>,
    pub initial_state: InitialState,
    pub dt: f64,
    pub duration: DurationConfig,
    /// Record a snapshot every `trace_every` steps
    pub trace_every: usize,
    pub outcome_type: OutcomeType,
    /// Seed for the private random state, drawn from entropy if `None`
    pub seed: Option<u64>,
    pub weight: f64,
    pub t0: f64,
    pub previous_steps: usize,
    pub hopping: HoppingMethod,
    /// Threshold schedule, required for [`HoppingMethod::EvenSampling`]
    pub spawn_stack: Option<SpawnStack>,
    /// Skip the initial half step, continuing from the state below
    pub restart: bool,
    pub last_velocity: Option<Array1<f64>>,
    pub electronics: Option<ElectronicStructure>,
}

impl TrajectoryConfig {
    #[must_use]
    pub fn new(position: Array1<f64>, momentum: Array1<f64>, dt: f64) -> Self {
        Self {
            position,
            momentum,
            initial_state: InitialState::Ground,
            dt,
            duration: DurationConfig::default(),
            trace_every: 1,
            outcome_type: OutcomeType::default(),
            seed: None,
            weight: 1.0,
            t0: 0.0,
            previous_steps: 0,
            hopping: HoppingMethod::default(),
            spawn_stack: None,
            restart: false,
            last_velocity: None,
            electronics: None,
        }
    }

    /// Check the configuration against a model with `nstates` states and `ndim` dimensions.
    ///
    /// # Errors
    /// Returns the first inconsistency found.
    pub fn validate(&self, nstates: usize, ndim: usize) -> Result<()> {
        use crate::error::check_shape;

        check_shape("position", &[ndim], self.position.shape())?;
        check_shape("momentum", &[ndim], self.momentum.shape())?;
        if let Some((lower, upper)) = &self.duration.bounds {
            check_shape("lower bound", &[ndim], lower.shape())?;
            check_shape("upper bound", &[ndim], upper.shape())?;
        }
        if let Some(last_velocity) = &self.last_velocity {
            check_shape("last velocity", &[ndim], last_velocity.shape())?;
        }
        if let Some(electronics) = &self.electronics {
            check_shape(
                "hamiltonian",
                &[nstates, nstates],
                electronics.hamiltonian.shape(),
            )?;
            check_shape("force", &[nstates, ndim], electronics.force.shape())?;
            check_shape(
                "derivative coupling",
                &[nstates, nstates, ndim],
                electronics.derivative_coupling.shape(),
            )?;
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(FsshError::InvalidConfig(format!(
                "time step must be positive, got {}",
                self.dt
            )));
        }
        if self.trace_every == 0 {
            return Err(FsshError::InvalidConfig(
                "trace_every must be at least 1".to_owned(),
            ));
        }
        if !(self.weight > 0.0 && self.weight <= 1.0) {
            return Err(FsshError::InvalidConfig(format!(
                "weight must lie in (0, 1], got {}",
                self.weight
            )));
        }
        if self.hopping == HoppingMethod::EvenSampling && self.spawn_stack.is_none() {
            return Err(FsshError::InvalidConfig(
                "even sampling requires a spawn stack".to_owned(),
            ));
        }
        Ok(())
    }
}
