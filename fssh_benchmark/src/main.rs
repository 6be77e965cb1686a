use std::{hint::black_box, sync::Arc, time::Instant};

use fssh_solver::{
    ensemble_outcome, run_queue, AdiabaticModel, DurationConfig, HoppingMethod, SpawnStack,
    Trace, Trajectory, TrajectoryConfig, TrajectoryQueue, TullySimpleAvoidedCrossing,
};
use ndarray::array;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const NTRAJ: u64 = 200;
const WORKERS: usize = 4;

fn config(seed: u64) -> TrajectoryConfig {
    TrajectoryConfig {
        duration: DurationConfig {
            bounds: Some((array![-10.0], array![10.0])),
            ..DurationConfig::default()
        },
        seed: Some(seed),
        trace_every: 100,
        ..TrajectoryConfig::new(array![-9.0], array![10.0], 1.0)
    }
}

fn tully_ensemble_benchmark(hopping: HoppingMethod) {
    let model = Arc::new(AdiabaticModel(TullySimpleAvoidedCrossing::default()));
    let queue = Arc::new(TrajectoryQueue::new());

    let (ntraj, spawn_stack) = match hopping {
        // A single root spreads over the schedule
        HoppingMethod::EvenSampling => (1, SpawnStack::build_simple(8, 2, false).ok()),
        HoppingMethod::Stochastic | HoppingMethod::Cumulative => (NTRAJ, None),
    };
    #[allow(clippy::cast_precision_loss)]
    let weight = 1.0 / ntraj as f64;
    for seed in 0..ntraj {
        let config = TrajectoryConfig {
            hopping,
            weight,
            spawn_stack: spawn_stack.clone(),
            ..config(seed)
        };
        match Trajectory::new(
            Arc::clone(&model),
            config,
            Trace::default(),
            Some(Arc::clone(&queue)),
        ) {
            Ok(trajectory) => queue.enqueue(trajectory),
            Err(error) => warn!(%error, seed, "could not set up trajectory"),
        }
    }

    let start = Instant::now();
    let results: Vec<_> = run_queue(&queue, WORKERS)
        .into_iter()
        .filter_map(Result::ok)
        .collect();
    let elapsed = start.elapsed();

    let outcome = black_box(ensemble_outcome(&results));
    info!(?hopping, trajectories = results.len(), ?elapsed, "ensemble finished");
    if let Some(outcome) = outcome {
        println!("{hopping:?}: {} trajectories in {elapsed:?}", results.len());
        println!("{outcome}");
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    for hopping in [
        HoppingMethod::Stochastic,
        HoppingMethod::Cumulative,
        HoppingMethod::EvenSampling,
    ] {
        tully_ensemble_benchmark(hopping);
    }
}
