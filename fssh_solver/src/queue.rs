use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread,
};

use ndarray::Array2;
use tracing::{info, warn};

use crate::{
    electronics::ElectronicModel,
    error::Result,
    trace::Tracer,
    trajectory::Trajectory,
};

struct QueueState<J> {
    pending: VecDeque<J>,
    /// Jobs taken off the queue which may still add new ones
    running: usize,
}

/// First in first out queue of trajectories waiting to be run.
///
/// Running trajectories push their spawns back onto the same queue, so a
/// worker only gives up once the queue is empty and nothing is running.
pub struct TrajectoryQueue<J> {
    state: Mutex<QueueState<J>>,
    changed: Condvar,
}

impl<J> Default for TrajectoryQueue<J> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: 0,
            }),
            changed: Condvar::new(),
        }
    }
}

impl<J> TrajectoryQueue<J> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<J>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, job: J) {
        self.lock().pending.push_back(job);
        self.changed.notify_one();
    }

    /// Take the next job without waiting.
    pub fn dequeue(&self) -> Option<J> {
        self.lock().pending.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Wait for the next job, or `None` once no more can arrive.
    ///
    /// Every job handed out must be returned with [`TrajectoryQueue::finish_job`].
    fn next_job(&self) -> Option<J> {
        let mut state = self.lock();
        loop {
            if let Some(job) = state.pending.pop_front() {
                state.running += 1;
                return Some(job);
            }
            if state.running == 0 {
                return None;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish_job(&self) {
        self.lock().running -= 1;
        self.changed.notify_all();
    }
}

/// What is left of a trajectory once it has finished.
#[derive(Debug, Clone)]
pub struct TrajectoryResult<T> {
    pub weight: f64,
    /// See [`Trajectory::outcome`]
    pub outcome: Array2<f64>,
    pub tracer: T,
}

/// Returns a job to its queue when dropped, even while unwinding.
struct RunningJob<'a, J>(&'a TrajectoryQueue<J>);

impl<J> Drop for RunningJob<'_, J> {
    fn drop(&mut self) {
        self.0.finish_job();
    }
}

fn work<M: ElectronicModel, T: Tracer>(
    queue: &TrajectoryQueue<Trajectory<M, T>>,
) -> Vec<Result<TrajectoryResult<T>>> {
    let mut results = Vec::new();
    while let Some(mut trajectory) = queue.next_job() {
        let _running = RunningJob(queue);
        let result = trajectory.simulate().map(|()| trajectory.into_result());
        if let Err(error) = &result {
            warn!(%error, "trajectory aborted");
        }
        results.push(result);
    }
    results
}

/// Run every trajectory on `queue`, including those spawned along the way,
/// on `workers` threads.
///
/// A failing trajectory does not stop the others, its error is returned in
/// its place. With a single worker the results come back in the order the
/// trajectories were queued.
pub fn run_queue<M: ElectronicModel, T: Tracer>(
    queue: &TrajectoryQueue<Trajectory<M, T>>,
    workers: usize,
) -> Vec<Result<TrajectoryResult<T>>> {
    let workers = workers.max(1);
    info!(workers, queued = queue.len(), "running trajectories");
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers).map(|_| scope.spawn(|| work(queue))).collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    });
    info!(finished = results.len(), "all trajectories finished");
    results
}

/// Weighted sum of the outcomes of an ensemble, `None` if it is empty.
#[must_use]
pub fn ensemble_outcome<T>(results: &[TrajectoryResult<T>]) -> Option<Array2<f64>> {
    let (first, rest) = results.split_first()?;
    let mut total = &first.outcome * first.weight;
    for result in rest {
        total.scaled_add(result.weight, &result.outcome);
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::Arc,
        thread,
    };

    use ndarray::{array, Array1, Array2, Array3, ArrayView1};

    use super::{ensemble_outcome, run_queue, TrajectoryQueue, TrajectoryResult};
    use crate::{
        config::TrajectoryConfig,
        electronics::{ElectronicModel, ElectronicStructure},
        error::Result,
        trace::Trace,
        trajectory::Trajectory,
    };

    /// Free motion until the model breaks at `x > 0.5`
    struct Breaking {
        mass: Array1<f64>,
    }

    impl ElectronicModel for Breaking {
        fn nstates(&self) -> usize {
            2
        }

        fn ndim(&self) -> usize {
            1
        }

        fn mass(&self) -> ArrayView1<'_, f64> {
            self.mass.view()
        }

        fn update(&self, position: &ArrayView1<f64>) -> Result<ElectronicStructure> {
            assert!(position[0] <= 0.5, "model evaluated outside its range");
            Ok(ElectronicStructure {
                hamiltonian: Array2::zeros((2, 2)),
                force: Array2::zeros((2, 1)),
                derivative_coupling: Array3::zeros((2, 2, 1)),
                basis: None,
            })
        }
    }

    #[test]
    fn test_queue_is_first_in_first_out() {
        let queue = TrajectoryQueue::new();
        assert!(queue.is_empty());
        queue.enqueue(1);
        queue.enqueue(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_workers_wait_for_running_jobs() {
        // Each job below 8 adds two more, so 15 jobs run in total
        let queue = Arc::new(TrajectoryQueue::new());
        queue.enqueue(1_u32);
        let done: usize = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    scope.spawn(move || {
                        let mut count = 0;
                        while let Some(job) = queue.next_job() {
                            if job < 8 {
                                queue.enqueue(2 * job);
                                queue.enqueue(2 * job + 1);
                            }
                            count += 1;
                            queue.finish_job();
                        }
                        count
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(done, 15);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_panicking_trajectory_does_not_hang_workers() {
        let model = Arc::new(Breaking { mass: array![1.0] });
        let queue = Arc::new(TrajectoryQueue::new());
        for momentum in [1.0, -1.0, -1.0] {
            let mut config = TrajectoryConfig::new(array![0.0], array![momentum], 0.1);
            config.duration.max_steps = 20;
            let trajectory =
                Trajectory::new(Arc::clone(&model), config, Trace::default(), None).unwrap();
            queue.enqueue(trajectory);
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| run_queue(&queue, 2)));
        assert!(outcome.is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ensemble_outcome_is_weighted() {
        let results = vec![
            TrajectoryResult {
                weight: 0.75,
                outcome: array![[1.0, 0.0], [0.0, 0.0]],
                tracer: (),
            },
            TrajectoryResult {
                weight: 0.25,
                outcome: array![[0.0, 0.0], [0.0, 1.0]],
                tracer: (),
            },
        ];
        assert_eq!(
            ensemble_outcome(&results),
            Some(array![[0.75, 0.0], [0.0, 0.25]])
        );
        assert_eq!(ensemble_outcome::<()>(&[]), None);
    }
}
