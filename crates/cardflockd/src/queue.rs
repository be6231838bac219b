use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use cardflock_detect::CancelFlag;
use chrono::NaiveDate;
use tracing::warn;

const WATCHDOG_TICK: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowJob {
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug)]
pub struct WindowResult {
    pub job: WindowJob,
    pub outcome: Result<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    pub workers: usize,
    pub window_timeout: Duration,
}

/// Run window jobs on a local worker pool, transport-free. Results come back
/// in submission order. A job that outlives the window timeout has its
/// cancel flag set by the watchdog and reports the resulting error without
/// disturbing sibling windows.
pub fn run_windows<F>(jobs: Vec<WindowJob>, options: &QueueOptions, work: F) -> Vec<WindowResult>
where
    F: Fn(&WindowJob, &CancelFlag) -> Result<u64> + Send + Sync,
{
    let total = jobs.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = options.workers.clamp(1, total);

    let pending: Mutex<VecDeque<(usize, WindowJob)>> =
        Mutex::new(jobs.into_iter().enumerate().collect());
    let results: Mutex<Vec<Option<WindowResult>>> = Mutex::new((0..total).map(|_| None).collect());
    let active: Mutex<Vec<(usize, Instant, CancelFlag)>> = Mutex::new(Vec::new());
    let finished = AtomicBool::new(false);

    thread::scope(|scope| {
        let watchdog = scope.spawn(|| {
            while !finished.load(Ordering::Relaxed) {
                thread::sleep(WATCHDOG_TICK);
                if let Ok(registry) = active.lock() {
                    for (index, started, cancel) in registry.iter() {
                        if started.elapsed() >= options.window_timeout && !cancel.is_cancelled() {
                            warn!(job = index, "window exceeded its timeout, cancelling");
                            cancel.cancel();
                        }
                    }
                }
            }
        });

        thread::scope(|inner| {
            for _ in 0..workers {
                inner.spawn(|| {
                    loop {
                        let next = pending.lock().ok().and_then(|mut queue| queue.pop_front());
                        let Some((index, job)) = next else {
                            break;
                        };

                        let cancel = CancelFlag::new();
                        if let Ok(mut registry) = active.lock() {
                            registry.push((index, Instant::now(), cancel.clone()));
                        }
                        let outcome = work(&job, &cancel);
                        if let Ok(mut registry) = active.lock() {
                            registry.retain(|(entry, _, _)| *entry != index);
                        }
                        if let Ok(mut slots) = results.lock() {
                            slots[index] = Some(WindowResult { job, outcome });
                        }
                    }
                });
            }
        });

        finished.store(true, Ordering::Relaxed);
        let _ = watchdog.join();
    });

    results
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .into_iter()
        .zip(0..)
        .map(|(slot, index)| {
            slot.unwrap_or_else(|| WindowResult {
                job: WindowJob {
                    begin: NaiveDate::MIN,
                    end: NaiveDate::MIN,
                },
                outcome: Err(anyhow::anyhow!("window job {index} produced no result")),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use anyhow::bail;
    use chrono::Datelike;

    use super::*;

    fn job(day: u32) -> WindowJob {
        let begin = NaiveDate::from_ymd_opt(2023, 1, day).expect("begin date");
        WindowJob {
            begin,
            end: begin + chrono::Days::new(6),
        }
    }

    fn options(workers: usize, timeout: Duration) -> QueueOptions {
        QueueOptions {
            workers,
            window_timeout: timeout,
        }
    }

    #[test]
    fn results_come_back_in_submission_order() {
        let jobs = vec![job(1), job(8), job(15), job(22)];
        let expected: Vec<NaiveDate> = jobs.iter().map(|job| job.begin).collect();

        let results = run_windows(
            jobs,
            &options(3, Duration::from_secs(60)),
            |job, _cancel| {
                // Earlier windows sleep longer, so completion order reverses.
                let lag = 30u64.saturating_sub(u64::from(job.begin.day0()));
                thread::sleep(Duration::from_millis(lag));
                Ok(u64::from(job.begin.day0()))
            },
        );

        let begins: Vec<NaiveDate> = results.iter().map(|result| result.job.begin).collect();
        assert_eq!(begins, expected);
        assert!(results.iter().all(|result| result.outcome.is_ok()));
    }

    #[test]
    fn single_worker_processes_every_job() {
        let counter = AtomicUsize::new(0);
        let results = run_windows(
            vec![job(1), job(8), job(15)],
            &options(1, Duration::from_secs(60)),
            |_job, _cancel| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(1)
            },
        );

        assert_eq!(counter.load(Ordering::Relaxed), 3);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn one_failed_window_does_not_disturb_the_others() {
        let results = run_windows(
            vec![job(1), job(8), job(15)],
            &options(2, Duration::from_secs(60)),
            |job, _cancel| {
                if job.begin.day0() == 7 {
                    bail!("window blew up");
                }
                Ok(5)
            },
        );

        assert!(results[0].outcome.is_ok());
        assert!(results[1].outcome.is_err());
        assert!(results[2].outcome.is_ok());
    }

    #[test]
    fn watchdog_cancels_overdue_windows() {
        let results = run_windows(
            vec![job(1)],
            &options(1, Duration::from_millis(300)),
            |_job, cancel| {
                let started = Instant::now();
                while !cancel.is_cancelled() {
                    if started.elapsed() > Duration::from_secs(10) {
                        bail!("cancellation never arrived");
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                bail!("window run cancelled");
            },
        );

        assert_eq!(results.len(), 1);
        let error = results[0].outcome.as_ref().expect_err("must be cancelled");
        assert!(error.to_string().contains("cancelled"));
    }

    #[test]
    fn empty_job_list_is_a_no_op() {
        let results = run_windows(
            Vec::new(),
            &options(4, Duration::from_secs(60)),
            |_job, _cancel| Ok(0),
        );
        assert!(results.is_empty());
    }
}
