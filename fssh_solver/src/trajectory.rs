use std::sync::Arc;

use ndarray::{Array1, Array2};
use num_complex::Complex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, instrument, trace};

use crate::{
    config::{HoppingMethod, OutcomeType, TrajectoryConfig},
    duration::DurationCriteria,
    electronics::{ElectronicModel, ElectronicStructure},
    error::{FsshError, Result},
    hopping::{hopping_probabilities, HopTarget, HoppingStrategy},
    propagator::{effective_hamiltonian, propagate_density},
    queue::{TrajectoryQueue, TrajectoryResult},
    rescale::{kinetic_energy, rescale_velocity, RescaleOutcome},
    trace::{Snapshot, Tracer},
};

/// Queue shared by a trajectory and everything it spawns.
pub type SharedQueue<M, T> = Arc<TrajectoryQueue<Trajectory<M, T>>>;

/// A single surface hopping trajectory.
///
/// Nuclei move classically on the active adiabatic surface while the
/// electronic density matrix is carried along with them. Velocities are
/// kept half a step ahead of positions (leapfrog).
pub struct Trajectory<M, T> {
    model: Arc<M>,
    tracer: T,
    queue: Option<SharedQueue<M, T>>,
    position: Array1<f64>,
    velocity: Array1<f64>,
    last_velocity: Array1<f64>,
    rho: Array2<Complex<f64>>,
    state: usize,
    electronics: ElectronicStructure,
    hopping: Array1<f64>,
    strategy: HoppingStrategy,
    duration: DurationCriteria,
    time: f64,
    nsteps: usize,
    dt: f64,
    trace_every: usize,
    outcome_type: OutcomeType,
    weight: f64,
    restart: bool,
    /// Set once the termination criteria have been met
    finished: bool,
    rng: StdRng,
}

impl<M: ElectronicModel, T: Tracer> Trajectory<M, T> {
    /// Set up a trajectory of `model` from `config`.
    ///
    /// Even sampling trajectories need a `queue` to place their spawns on.
    ///
    /// # Errors
    /// Returns an error if the configuration does not fit the model, or if
    /// the electronic structure at the initial position cannot be computed.
    pub fn new(
        model: Arc<M>,
        config: TrajectoryConfig,
        mut tracer: T,
        queue: Option<SharedQueue<M, T>>,
    ) -> Result<Self> {
        let nstates = model.nstates();
        let ndim = model.ndim();
        config.validate(nstates, ndim)?;
        if config.hopping == HoppingMethod::EvenSampling && queue.is_none() {
            return Err(FsshError::InvalidConfig(
                "even sampling requires a trajectory queue".to_owned(),
            ));
        }

        let (rho, state) = config.initial_state.resolve(nstates)?;
        let velocity = &config.momentum / &model.mass();
        let last_velocity = config
            .last_velocity
            .unwrap_or_else(|| Array1::zeros(ndim));
        let electronics = match (config.restart, config.electronics) {
            (true, Some(electronics)) => electronics,
            (true, None) => {
                return Err(FsshError::InvalidConfig(
                    "restarting requires the electronic structure".to_owned(),
                ))
            }
            (false, _) => model.update(&config.position.view())?,
        };

        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        // A spawn stack carries weights relative to the trajectory it starts on
        let stack = config.spawn_stack.map(|s| s.scaled(config.weight));
        let weight = stack.as_ref().map_or(config.weight, |s| s.weight());
        let strategy = HoppingStrategy::new(config.hopping, stack, &mut rng)?;
        tracer.set_weight(weight);

        Ok(Self {
            model,
            tracer,
            queue,
            position: config.position,
            velocity,
            last_velocity,
            rho,
            state,
            electronics,
            hopping: Array1::zeros(nstates),
            strategy,
            duration: DurationCriteria::from(&config.duration),
            time: config.t0,
            nsteps: config.previous_steps,
            dt: config.dt,
            trace_every: config.trace_every,
            outcome_type: config.outcome_type,
            weight,
            restart: config.restart,
            finished: false,
            rng,
        })
    }

    #[must_use]
    pub fn position(&self) -> &Array1<f64> {
        &self.position
    }

    #[must_use]
    pub fn velocity(&self) -> &Array1<f64> {
        &self.velocity
    }

    /// Velocity half a step behind [`Trajectory::velocity`]
    #[must_use]
    pub fn last_velocity(&self) -> &Array1<f64> {
        &self.last_velocity
    }

    #[must_use]
    pub fn momentum(&self) -> Array1<f64> {
        &self.model.mass() * &self.velocity
    }

    #[must_use]
    pub fn density_matrix(&self) -> &Array2<Complex<f64>> {
        &self.rho
    }

    #[must_use]
    pub fn active_state(&self) -> usize {
        self.state
    }

    #[must_use]
    pub fn electronics(&self) -> &ElectronicStructure {
        &self.electronics
    }

    #[must_use]
    pub fn strategy(&self) -> &HoppingStrategy {
        &self.strategy
    }

    #[must_use]
    pub fn duration(&self) -> &DurationCriteria {
        &self.duration
    }

    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    #[must_use]
    pub fn nsteps(&self) -> usize {
        self.nsteps
    }

    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[must_use]
    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    #[must_use]
    pub fn kinetic_energy(&self) -> f64 {
        kinetic_energy(&self.model.mass(), &self.velocity.view())
    }

    #[must_use]
    pub fn potential_energy(&self) -> f64 {
        self.electronics.potential(self.state)
    }

    #[must_use]
    pub fn total_energy(&self) -> f64 {
        self.kinetic_energy() + self.potential_energy()
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let kinetic = self.kinetic_energy();
        let potential = self.potential_energy();
        Snapshot {
            time: self.time,
            position: self.position.clone(),
            momentum: self.momentum(),
            potential,
            kinetic,
            energy: kinetic + potential,
            density_matrix: self.rho.clone(),
            active: self.state,
            hopping: self.hopping.clone(),
        }
    }

    /// Summary of where the trajectory ended, `[nstates, 2]`.
    ///
    /// The column is 0 if the first coordinate ended negative (reflected to
    /// the left) and 1 otherwise.
    #[must_use]
    pub fn outcome(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.model.nstates(), 2));
        let side = usize::from(self.position[0] >= 0.0);
        match self.outcome_type {
            OutcomeType::State => out[[self.state, side]] = 1.0,
            OutcomeType::Populations => out
                .column_mut(side)
                .assign(&self.rho.diag().mapv(|c| c.re)),
        }
        out
    }

    /// Should the trajectory keep going? Latches the interaction region.
    pub fn continue_simulating(&mut self) -> bool {
        self.duration
            .continue_simulating(&self.position.view(), self.nsteps, self.time)
    }

    #[must_use]
    pub fn into_result(self) -> TrajectoryResult<T> {
        TrajectoryResult {
            weight: self.weight,
            outcome: self.outcome(),
            tracer: self.tracer,
        }
    }

    fn record(&mut self, force: bool) {
        if force || self.nsteps % self.trace_every == 0 {
            let snapshot = self.snapshot();
            self.tracer.collect(snapshot);
        }
    }

    /// Offset the velocity by half a step and the density matrix by half a
    /// step, so that the leapfrog can start.
    fn initialize(&mut self) -> Result<()> {
        let acceleration = &self.electronics.force_on(self.state) / &self.model.mass();
        let half_kick = acceleration * (0.5 * self.dt);
        self.last_velocity = &self.velocity - &half_kick;
        let nac = self.electronics.nac_matrix(&self.velocity.view());
        self.velocity += &half_kick;

        let w = effective_hamiltonian(&self.electronics.hamiltonian, &nac);
        self.rho = propagate_density(&self.rho, &w, 0.5 * self.dt)?;
        Ok(())
    }

    /// Advance the trajectory by a single time step, including any hops.
    ///
    /// # Errors
    /// Returns an error if the model or the electronic propagation fails,
    /// or if the hopping schedule runs out.
    pub fn step(&mut self) -> Result<()> {
        self.position.scaled_add(self.dt, &self.velocity);
        self.electronics = self
            .model
            .update_from(&self.position.view(), &self.electronics)?;

        let acceleration = &self.electronics.force_on(self.state) / &self.model.mass();
        let velocity = &self.velocity + &(acceleration * self.dt);
        self.last_velocity = std::mem::replace(&mut self.velocity, velocity);

        let midpoint = (&self.last_velocity + &self.velocity) * 0.5;
        let nac = self.electronics.nac_matrix(&midpoint.view());
        let w = effective_hamiltonian(&self.electronics.hamiltonian, &nac);
        self.rho = propagate_density(&self.rho, &w, self.dt)?;

        self.surface_hopping(&nac)?;

        self.time += self.dt;
        self.nsteps += 1;
        trace!(time = self.time, state = self.state, "step");
        Ok(())
    }

    fn surface_hopping(&mut self, nac: &Array2<f64>) -> Result<()> {
        self.hopping = hopping_probabilities(&self.rho, self.state, nac, self.dt);
        let hops = self
            .strategy
            .decide_hops(&self.hopping, self.state, &mut self.rng)?;

        let mut handed_off = 0.0;
        for hop in hops {
            match hop.stack {
                None => {
                    self.hop_to(hop.target, hop.zeta, hop.accumulated)?;
                }
                Some(_) => handed_off += self.spawn(hop)?,
            }
        }
        if handed_off > 0.0 {
            self.weight -= handed_off;
            self.tracer.set_weight(self.weight);
        }
        Ok(())
    }

    /// Try to hop to `target`, rescaling the velocity to conserve energy.
    ///
    /// Returns `false` for a frustrated hop, leaving the trajectory untouched.
    fn hop_to(&mut self, target: usize, zeta: f64, accumulated: f64) -> Result<bool> {
        let delta_v = self.electronics.potential(target) - self.electronics.potential(self.state);
        let direction = self.electronics.rescale_direction(self.state, target);
        let outcome = rescale_velocity(
            &mut self.velocity,
            &self.model.mass(),
            &direction.view(),
            delta_v,
        )?;
        match outcome {
            RescaleOutcome::Accepted { .. } => {
                debug!(time = self.time, from = self.state, to = target, "hop");
                self.tracer
                    .hop(self.time, self.state, target, zeta, accumulated);
                self.state = target;
                Ok(true)
            }
            RescaleOutcome::Forbidden => {
                debug!(time = self.time, from = self.state, to = target, "frustrated hop");
                Ok(false)
            }
        }
    }

    /// Deep copy of the trajectory for a spawn.
    ///
    /// The copy seeds its own random state from this trajectory, so a whole
    /// ensemble is reproducible from the seeds of its roots.
    fn clone_for_spawn(&mut self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            tracer: self.tracer.clone(),
            queue: self.queue.clone(),
            position: self.position.clone(),
            velocity: self.velocity.clone(),
            last_velocity: self.last_velocity.clone(),
            rho: self.rho.clone(),
            state: self.state,
            electronics: self.electronics.clone(),
            hopping: self.hopping.clone(),
            strategy: self.strategy.clone(),
            duration: self.duration.clone(),
            time: self.time,
            nsteps: self.nsteps,
            dt: self.dt,
            trace_every: self.trace_every,
            outcome_type: self.outcome_type,
            weight: self.weight,
            restart: true,
            finished: false,
            rng: StdRng::seed_from_u64(self.rng.gen()),
        }
    }

    /// Place a copy of this trajectory, hopped to the target, on the queue.
    ///
    /// Returns the weight handed to the copy.
    fn spawn(&mut self, hop: HopTarget) -> Result<f64> {
        let queue = self.queue.clone().ok_or_else(|| {
            FsshError::InvalidConfig("even sampling requires a trajectory queue".to_owned())
        })?;
        let Some(stack) = hop.stack else {
            return Ok(0.0);
        };
        let stack = stack.scaled(hop.weight);

        let mut spawned = self.clone_for_spawn();
        spawned.weight = stack.weight();
        spawned.tracer.set_weight(spawned.weight);
        spawned.strategy = HoppingStrategy::for_spawn(stack, &mut spawned.rng)?;
        spawned.hop_to(hop.target, hop.zeta, hop.accumulated)?;
        // The copy picks up after the step this trajectory is part way through
        spawned.time += spawned.dt;
        spawned.nsteps += 1;
        spawned.finished = !spawned.continue_simulating();

        debug!(
            time = self.time,
            from = self.state,
            to = hop.target,
            weight = spawned.weight,
            "spawn"
        );
        let weight = spawned.weight;
        queue.enqueue(spawned);
        Ok(weight)
    }

    /// Run the trajectory until [`Trajectory::continue_simulating`] says stop.
    ///
    /// A trajectory that has already finished, including a spawn created on
    /// its parent's last step, only records its final snapshot.
    ///
    /// # Errors
    /// Returns the first error raised by a step, leaving the trajectory where it failed.
    #[instrument(skip_all, fields(time = self.time, weight = self.weight))]
    pub fn simulate(&mut self) -> Result<()> {
        if !self.restart {
            self.initialize()?;
            self.restart = true;
        }
        if !self.finished {
            self.record(false);
            loop {
                self.step()?;
                if !self.continue_simulating() {
                    break;
                }
                self.record(false);
            }
            self.finished = true;
        }
        self.record(true);
        info!(
            time = self.time,
            nsteps = self.nsteps,
            state = self.state,
            "trajectory finished"
        );
        Ok(())
    }
}
