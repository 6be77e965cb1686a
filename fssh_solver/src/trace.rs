use ndarray::{Array1, Array2};
use num_complex::Complex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Everything recorded about a trajectory at a single time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snapshot {
    pub time: f64,
    pub position: Array1<f64>,
    pub momentum: Array1<f64>,
    pub potential: f64,
    pub kinetic: f64,
    pub energy: f64,
    pub density_matrix: Array2<Complex<f64>>,
    pub active: usize,
    /// Hopping probabilities computed on the most recent step
    pub hopping: Array1<f64>,
}

/// A single accepted change of active state.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HopEvent {
    pub time: f64,
    pub from: usize,
    pub to: usize,
    pub zeta: f64,
    pub accumulated: f64,
}

/// Sink for the history of a single trajectory.
///
/// Every trajectory owns its tracer. Spawned trajectories receive a copy of
/// their parent's tracer, so the history before the spawn is shared by value.
pub trait Tracer: Clone + Send {
    fn collect(&mut self, snapshot: Snapshot);

    fn hop(&mut self, time: f64, from: usize, to: usize, zeta: f64, accumulated: f64);

    /// Record the statistical weight of the trajectory.
    #[inline]
    fn set_weight(&mut self, _weight: f64) {}
}

/// In memory [`Tracer`] keeping every snapshot and hop.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trace {
    snapshots: Vec<Snapshot>,
    hops: Vec<HopEvent>,
    weight: f64,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            snapshots: Vec::new(),
            hops: Vec::new(),
            weight: 1.0,
        }
    }
}

impl Trace {
    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    #[must_use]
    pub fn hops(&self) -> &[HopEvent] {
        &self.hops
    }

    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[must_use]
    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Total energy at every recorded snapshot.
    #[must_use]
    pub fn energies(&self) -> Array1<f64> {
        self.snapshots.iter().map(|s| s.energy).collect()
    }
}

impl Tracer for Trace {
    fn collect(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    fn hop(&mut self, time: f64, from: usize, to: usize, zeta: f64, accumulated: f64) {
        self.hops.push(HopEvent {
            time,
            from,
            to,
            zeta,
            accumulated,
        });
    }

    fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}
