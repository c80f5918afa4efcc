//! Bounded execution of independent chunk jobs.
//!
//! A concurrent batch builds a rayon pool sized for the batch, spawns every
//! job into one scope and collects outcomes through a channel, so results
//! arrive in completion order. The sequential mode runs the same jobs inline
//! in submission order and reports them the same way.
//!
//! Jobs run at most once. A failing or panicking job never stops its
//! siblings; failures are reported after every job has been accounted for.

use crate::error::{BatchFailure, BulkError, ChunkFailure, WriteResult};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Task<'a, T> = Box<dyn FnOnce() -> WriteResult<T> + Send + 'a>;

/// One chunk-level operation bound to its arguments.
pub struct Job<'a, T> {
    chunk: usize,
    task: Task<'a, T>,
}

impl<'a, T> Job<'a, T> {
    pub fn new(chunk: usize, task: impl FnOnce() -> WriteResult<T> + Send + 'a) -> Self {
        Self {
            chunk,
            task: Box::new(task),
        }
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }
}

#[derive(Debug)]
pub struct JobOutput<T> {
    pub chunk: usize,
    pub value: T,
}

/// Everything that happened to a batch, in completion order.
#[derive(Debug)]
pub struct RunReport<T> {
    pub completed: Vec<JobOutput<T>>,
    pub failures: Vec<ChunkFailure>,
    pub cancelled: Vec<usize>,
}

impl<T> Default for RunReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failures: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

impl<T> RunReport<T> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    fn record(&mut self, chunk: usize, outcome: Outcome<T>) {
        match outcome {
            Outcome::Finished(Ok(value)) => self.completed.push(JobOutput { chunk, value }),
            Outcome::Finished(Err(error)) => self.failures.push(ChunkFailure { chunk, error }),
            Outcome::Cancelled => self.cancelled.push(chunk),
        }
    }

    /// Successful outputs, or a `BatchFailure` carrying the partial results.
    /// `rows` reports how many rows a successful job wrote.
    pub fn into_outputs(self, rows: impl Fn(&T) -> u64) -> WriteResult<Vec<JobOutput<T>>> {
        if self.is_success() {
            return Ok(self.completed);
        }

        let mut completed_chunks: Vec<usize> =
            self.completed.iter().map(|output| output.chunk).collect();
        completed_chunks.sort_unstable();
        let mut cancelled_chunks = self.cancelled;
        cancelled_chunks.sort_unstable();
        let mut failures = self.failures;
        failures.sort_by_key(|failure| failure.chunk);

        Err(BulkError::BatchFailure(BatchFailure {
            rows_affected: self.completed.iter().map(|output| rows(&output.value)).sum(),
            failures,
            completed_chunks,
            cancelled_chunks,
            identifiers: Vec::new(),
        }))
    }
}

enum Outcome<T> {
    Finished(WriteResult<T>),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Concurrent { workers: usize },
}

#[derive(Debug, Clone)]
pub struct JobRunner {
    mode: ExecutionMode,
    cancel: Option<CancellationToken>,
}

impl JobRunner {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode, cancel: None }
    }

    pub fn sequential() -> Self {
        Self::new(ExecutionMode::Sequential)
    }

    pub fn concurrent(workers: usize) -> Self {
        Self::new(ExecutionMode::Concurrent {
            workers: workers.max(1),
        })
    }

    /// Jobs that have not started when `token` is cancelled are skipped and
    /// reported as cancelled; jobs already running finish normally.
    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn run<'a, T: Send>(&self, jobs: Vec<Job<'a, T>>) -> WriteResult<RunReport<T>> {
        let mut report = RunReport::default();
        if jobs.is_empty() {
            return Ok(report);
        }

        match self.mode {
            ExecutionMode::Sequential => {
                for job in jobs {
                    let chunk = job.chunk;
                    report.record(chunk, run_job(job, self.cancel.as_ref()));
                }
            }
            ExecutionMode::Concurrent { workers } => {
                log::debug!("running {} jobs on {} workers", jobs.len(), workers);

                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|index| format!("bulk-writer-{index}"))
                    .build()
                    .map_err(|e| BulkError::WorkerPool(e.to_string()))?;

                let (sender, receiver) = mpsc::channel();
                let cancel = self.cancel.as_ref();

                pool.scope(|scope| {
                    for job in jobs {
                        let sender = sender.clone();
                        scope.spawn(move |_| {
                            let chunk = job.chunk;
                            let outcome = run_job(job, cancel);
                            // the receiver outlives the scope
                            let _ = sender.send((chunk, outcome));
                        });
                    }
                });
                drop(sender);

                for (chunk, outcome) in receiver {
                    report.record(chunk, outcome);
                }
            }
        }

        if !report.is_success() {
            log::warn!(
                "batch finished with {} failed and {} cancelled of {} jobs",
                report.failures.len(),
                report.cancelled.len(),
                report.failures.len() + report.cancelled.len() + report.completed.len()
            );
        }

        Ok(report)
    }
}

fn run_job<T>(job: Job<'_, T>, cancel: Option<&CancellationToken>) -> Outcome<T> {
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        log::debug!("chunk {} skipped: batch cancelled", job.chunk);
        return Outcome::Cancelled;
    }

    let chunk = job.chunk;
    match panic::catch_unwind(AssertUnwindSafe(job.task)) {
        Ok(result) => {
            if let Err(e) = &result {
                log::warn!("chunk {} failed: {}", chunk, e);
            }
            Outcome::Finished(result)
        }
        Err(payload) => Outcome::Finished(Err(BulkError::JobPanicked {
            chunk,
            message: panic_message(payload.as_ref()),
        })),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_zero_jobs_returns_empty_report() {
        let report = JobRunner::concurrent(8).run::<u64>(Vec::new()).unwrap();
        assert!(report.completed.is_empty());
        assert!(report.is_success());
    }

    #[test]
    fn test_concurrent_runs_every_job_once() {
        let executed = AtomicUsize::new(0);
        let jobs: Vec<Job<'_, u64>> = (0..20)
            .map(|chunk| {
                let executed = &executed;
                Job::new(chunk, move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(chunk as u64 * 2)
                })
            })
            .collect();

        let report = JobRunner::concurrent(4).run(jobs).unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 20);

        let chunks: BTreeSet<usize> = report.completed.iter().map(|o| o.chunk).collect();
        assert_eq!(chunks, (0..20).collect());
        let total: u64 = report.completed.iter().map(|o| o.value).sum();
        assert_eq!(total, (0..20u64).map(|c| c * 2).sum::<u64>());
    }

    #[test]
    fn test_sequential_runs_in_submission_order() {
        let order = Mutex::new(Vec::new());
        let jobs: Vec<Job<'_, ()>> = (0..5)
            .map(|chunk| {
                let order = &order;
                Job::new(chunk, move || {
                    order.lock().unwrap().push(chunk);
                    Ok(())
                })
            })
            .collect();

        let report = JobRunner::sequential().run(jobs).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        let chunks: Vec<usize> = report.completed.iter().map(|o| o.chunk).collect();
        assert_eq!(chunks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_failures_do_not_stop_siblings() {
        for runner in [JobRunner::sequential(), JobRunner::concurrent(3)] {
            let jobs: Vec<Job<'_, u64>> = (0..6)
                .map(|chunk| {
                    Job::new(chunk, move || match chunk {
                        2 => Err(BulkError::Storage("disk full".into())),
                        4 => panic!("worker exploded"),
                        _ => Ok(10),
                    })
                })
                .collect();

            let report = runner.run(jobs).unwrap();
            assert_eq!(report.completed.len(), 4);
            assert_eq!(report.failures.len(), 2);

            match report.into_outputs(|rows| *rows) {
                Err(BulkError::BatchFailure(failure)) => {
                    assert_eq!(failure.rows_affected, 40);
                    assert_eq!(failure.completed_chunks, vec![0, 1, 3, 5]);
                    assert_eq!(failure.failures[0].chunk, 2);
                    assert!(matches!(
                        &failure.failures[1].error,
                        BulkError::JobPanicked { chunk: 4, message } if message == "worker exploded"
                    ));
                }
                other => panic!("expected batch failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_cancelled_batch_skips_unstarted_jobs() {
        let token = CancellationToken::new();
        token.cancel();
        let executed = AtomicUsize::new(0);

        let jobs: Vec<Job<'_, u64>> = (0..4)
            .map(|chunk| {
                let executed = &executed;
                Job::new(chunk, move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
            })
            .collect();

        let report = JobRunner::concurrent(2)
            .with_cancellation(Some(token))
            .run(jobs)
            .unwrap();

        assert_eq!(executed.load(Ordering::SeqCst), 0);
        let mut cancelled = report.cancelled.clone();
        cancelled.sort_unstable();
        assert_eq!(cancelled, vec![0, 1, 2, 3]);
        assert!(matches!(
            report.into_outputs(|rows| *rows),
            Err(BulkError::BatchFailure(failure)) if failure.cancelled_chunks.len() == 4
        ));
    }

    #[test]
    fn test_cancellation_mid_batch_lets_running_job_finish() {
        let token = CancellationToken::new();
        let jobs: Vec<Job<'_, u64>> = (0..3)
            .map(|chunk| {
                let token = token.clone();
                Job::new(chunk, move || {
                    if chunk == 0 {
                        token.cancel();
                    }
                    Ok(5)
                })
            })
            .collect();

        let report = JobRunner::sequential()
            .with_cancellation(Some(token))
            .run(jobs)
            .unwrap();

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.completed[0].chunk, 0);
        assert_eq!(report.cancelled, vec![1, 2]);
    }
}
