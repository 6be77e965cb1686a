#![warn(clippy::pedantic)]

pub mod config;
pub mod duration;
pub mod electronics;
pub mod error;
pub mod hopping;
pub mod models;
pub mod propagator;
pub mod queue;
pub mod rescale;
pub mod spawn;
pub mod trace;
pub mod trajectory;

pub use config::{DurationConfig, HoppingMethod, InitialState, OutcomeType, TrajectoryConfig};
pub use electronics::{ElectronicModel, ElectronicStructure};
pub use error::{FsshError, Result};
pub use models::{AdiabaticModel, DiabaticModel, TullyDualAvoidedCrossing, TullySimpleAvoidedCrossing};
pub use queue::{ensemble_outcome, run_queue, TrajectoryQueue, TrajectoryResult};
pub use spawn::SpawnStack;
pub use trace::{Trace, Tracer};
pub use trajectory::Trajectory;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::array;

    use crate::{
        ensemble_outcome, run_queue, AdiabaticModel, DurationConfig, HoppingMethod,
        OutcomeType, SpawnStack, Trace, Trajectory, TrajectoryConfig, TrajectoryQueue,
        TullyDualAvoidedCrossing, TullySimpleAvoidedCrossing,
    };

    fn config(momentum: f64, seed: u64) -> TrajectoryConfig {
        TrajectoryConfig {
            duration: DurationConfig {
                bounds: Some((array![-6.0], array![6.0])),
                ..DurationConfig::default()
            },
            seed: Some(seed),
            trace_every: 50,
            ..TrajectoryConfig::new(array![-5.0], array![momentum], 1.0)
        }
    }

    #[test]
    fn test_stochastic_ensemble_on_several_workers() {
        let model = Arc::new(AdiabaticModel(TullySimpleAvoidedCrossing::default()));
        let queue = Arc::new(TrajectoryQueue::new());
        let ntraj = 8;
        for seed in 0..ntraj {
            let config = TrajectoryConfig {
                weight: 1.0 / 8.0,
                ..config(15.0, seed)
            };
            queue.enqueue(
                Trajectory::new(Arc::clone(&model), config, Trace::default(), None).unwrap(),
            );
        }
        let results = run_queue(&queue, 3)
            .into_iter()
            .collect::<crate::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(results.len(), 8);

        let outcome = ensemble_outcome(&results).unwrap();
        assert!((outcome.sum() - 1.0).abs() < 1e-12);
        // Fast enough that nothing is reflected
        assert_eq!(outcome.column(0).sum(), 0.0);
    }

    #[test]
    fn test_even_sampling_populations_on_dual_crossing() {
        let model = Arc::new(AdiabaticModel(TullyDualAvoidedCrossing::default()));
        let queue = Arc::new(TrajectoryQueue::new());
        let config = TrajectoryConfig {
            hopping: HoppingMethod::EvenSampling,
            spawn_stack: Some(SpawnStack::build_simple(3, 2, false).unwrap()),
            outcome_type: OutcomeType::Populations,
            ..config(30.0, 21)
        };
        queue.enqueue(
            Trajectory::new(model, config, Trace::default(), Some(Arc::clone(&queue))).unwrap(),
        );
        let results = run_queue(&queue, 2)
            .into_iter()
            .collect::<crate::Result<Vec<_>>>()
            .unwrap();

        let total: f64 = results.iter().map(|r| r.weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
        // Populations of every branch sum to one, so the weighted sum does too
        let outcome = ensemble_outcome(&results).unwrap();
        assert!((outcome.sum() - 1.0).abs() < 1e-8);
        assert!(results.iter().all(|r| r.tracer.weight() == r.weight));
    }
}
