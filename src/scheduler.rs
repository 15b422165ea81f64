//! Cron-driven job timers.
//!
//! Two flavours share one timer loop: a guarded job runs its body directly
//! and drops ticks that fire while a previous run is still going; a queued
//! job hands each tick to the per-chain [`JobQueue`] under `<name>-<chain>`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use cron::Schedule;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::queue::{AbortOnDrop, JobQueue};
use crate::types::ChainId;

pub type JobBody = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

enum Mode {
    Guarded { timeout: Duration },
    Queued { chain: ChainId, queue: JobQueue },
}

pub struct ScheduledJob {
    name: String,
    schedule: Schedule,
    running: Arc<AtomicBool>,
    mode: Mode,
    body: JobBody,
}

/// Releases the running flag however the guarded body ends.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ScheduledJob {
    pub fn guarded(
        name: impl Into<String>,
        schedule: Schedule,
        timeout: Duration,
        body: JobBody,
    ) -> Self {
        Self {
            name: name.into(),
            schedule,
            running: Arc::new(AtomicBool::new(false)),
            mode: Mode::Guarded { timeout },
            body,
        }
    }

    pub fn queued(
        name: impl Into<String>,
        chain: ChainId,
        schedule: Schedule,
        queue: JobQueue,
        body: JobBody,
    ) -> Self {
        Self {
            name: name.into(),
            schedule,
            running: Arc::new(AtomicBool::new(false)),
            mode: Mode::Queued { chain, queue },
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chain a queued job is partitioned on; `None` for guarded jobs.
    pub fn chain(&self) -> Option<ChainId> {
        match &self.mode {
            Mode::Guarded { .. } => None,
            Mode::Queued { chain, .. } => Some(*chain),
        }
    }

    /// Queue id for queued jobs, plain name otherwise.
    pub fn id(&self) -> String {
        match self.chain() {
            Some(chain) => format!("{}-{}", self.name, chain),
            None => self.name.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Time left until the next fire after `now`.
    pub fn delay_after(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.schedule.after(&now).next()?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Handle one firing of the timer.
    pub async fn tick(&self) {
        match &self.mode {
            Mode::Guarded { timeout } => self.run_guarded(*timeout).await,
            Mode::Queued { chain, queue } => {
                let accepted = queue.enqueue(self.id(), *chain, (self.body)()).await;
                if !accepted {
                    info!(job = %self.name, %chain, "previous run still pending, tick dropped");
                }
            }
        }
    }

    async fn run_guarded(&self, timeout: Duration) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(job = %self.name, "previous run still in progress, tick dropped");
            return;
        }
        let _guard = RunGuard(self.running.clone());

        info!(job = %self.name, "started");
        let mut handle = tokio::spawn((self.body)());
        let _abort = AbortOnDrop(handle.abort_handle());
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => info!(job = %self.name, "finished"),
            Ok(Ok(Err(e))) => error!(job = %self.name, "failed: {e:#}"),
            Ok(Err(join_err)) => error!(job = %self.name, "task died: {join_err}"),
            Err(_) => {
                handle.abort();
                warn!(job = %self.name, timeout_secs = timeout.as_secs(), "timed out");
            }
        }
    }
}

/// Owns the job set and the shutdown signal.
pub struct Scheduler {
    jobs: Vec<Arc<ScheduledJob>>,
    shutdown: watch::Sender<bool>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            shutdown,
        }
    }

    pub fn add(&mut self, job: ScheduledJob) {
        debug!(id = %job.id(), "job registered");
        self.jobs.push(Arc::new(job));
    }

    pub fn jobs(&self) -> &[Arc<ScheduledJob>] {
        &self.jobs
    }

    /// Fire every job once, concurrently, and wait for all of them.
    pub async fn run_once(&self) {
        let mut set = JoinSet::new();
        for job in &self.jobs {
            let job = job.clone();
            set.spawn(async move { job.tick().await });
        }
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                error!("job tick task died: {e}");
            }
        }
    }

    /// Spawn one timer per job.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|job| tokio::spawn(run_timer(job.clone(), self.shutdown.subscribe())))
            .collect()
    }

    /// Stop all timers. In-flight runs finish before the timers return.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn run_timer(job: Arc<ScheduledJob>, mut shutdown: watch::Receiver<bool>) {
    let mut inflight = JoinSet::new();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(delay) = job.delay_after(Utc::now()) else {
            warn!(job = %job.name(), "schedule has no upcoming fire time, timer stopped");
            break;
        };
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {
                while let Some(res) = inflight.try_join_next() {
                    if let Err(e) = res {
                        error!(job = %job.name(), "tick task died: {e}");
                    }
                }
                let job = job.clone();
                inflight.spawn(async move { job.tick().await });
            }
        }
    }
    if !inflight.is_empty() {
        info!(job = %job.name(), running = inflight.len(), "waiting for in-flight run");
    }
    while let Some(res) = inflight.join_next().await {
        if let Err(e) = res {
            error!(job = %job.name(), "tick task died: {e}");
        }
    }
    debug!(job = %job.name(), "timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures_util::FutureExt;
    use std::str::FromStr;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn every_second() -> Schedule {
        Schedule::from_str("* * * * * *").unwrap()
    }

    fn counting_body(count: Arc<AtomicUsize>) -> JobBody {
        Arc::new(move || {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[test]
    fn delay_points_at_next_fire() {
        let job = ScheduledJob::guarded(
            "subscribers",
            Schedule::from_str("0 */2 * * * *").unwrap(),
            Duration::from_secs(60),
            counting_body(Arc::default()),
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 30).unwrap();
        assert_eq!(job.delay_after(now), Some(Duration::from_secs(30)));
    }

    #[test]
    fn queued_id_includes_chain() {
        let job = ScheduledJob::queued(
            "balance-check",
            ChainId::Bsc,
            every_second(),
            JobQueue::new(Duration::from_secs(1)),
            counting_body(Arc::default()),
        );
        assert_eq!(job.id(), "balance-check-56");
        assert_eq!(job.chain(), Some(ChainId::Bsc));
    }

    #[tokio::test]
    async fn guarded_tick_dropped_while_running() {
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let body: JobBody = {
            let (release, started, runs) = (release.clone(), started.clone(), runs.clone());
            Arc::new(move || {
                let (release, started, runs) = (release.clone(), started.clone(), runs.clone());
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    started.notify_one();
                    release.notified().await;
                    Ok(())
                }
                .boxed()
            })
        };
        let job = Arc::new(ScheduledJob::guarded(
            "token-prices",
            every_second(),
            Duration::from_secs(60),
            body,
        ));

        let first = {
            let job = job.clone();
            tokio::spawn(async move { job.tick().await })
        };
        started.notified().await;
        assert!(job.is_running());

        job.tick().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        release.notify_one();
        first.await.unwrap();
        assert!(!job.is_running());
    }

    #[tokio::test]
    async fn aborted_guarded_tick_cancels_its_body() {
        struct Finished(Arc<AtomicBool>);
        impl Drop for Finished {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let started = Arc::new(Notify::new());
        let dropped = Arc::new(AtomicBool::new(false));
        let body: JobBody = {
            let (started, dropped) = (started.clone(), dropped.clone());
            Arc::new(move || {
                let (started, dropped) = (started.clone(), dropped.clone());
                async move {
                    let _finished = Finished(dropped);
                    started.notify_one();
                    std::future::pending::<()>().await;
                    Ok(())
                }
                .boxed()
            })
        };
        let job = Arc::new(ScheduledJob::guarded(
            "whitelist-farms",
            every_second(),
            Duration::from_secs(60),
            body,
        ));

        let tick = {
            let job = job.clone();
            tokio::spawn(async move { job.tick().await })
        };
        started.notified().await;
        tick.abort();
        assert!(tick.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!job.is_running());
    }

    #[tokio::test]
    async fn guarded_flag_released_after_failure_and_panic() {
        let failing: JobBody =
            Arc::new(|| async { Err::<(), _>(anyhow::anyhow!("boom")) }.boxed());
        let job = ScheduledJob::guarded("a", every_second(), Duration::from_secs(5), failing);
        job.tick().await;
        assert!(!job.is_running());

        let panicking: JobBody = Arc::new(|| {
            async {
                let broken = true;
                if broken {
                    panic!("bug");
                }
                Ok(())
            }
            .boxed()
        });
        let job = ScheduledJob::guarded("b", every_second(), Duration::from_secs(5), panicking);
        job.tick().await;
        assert!(!job.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_run_times_out() {
        let stuck: JobBody = Arc::new(|| {
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            .boxed()
        });
        let job = ScheduledJob::guarded("stuck", every_second(), Duration::from_secs(1), stuck);
        job.tick().await;
        assert!(!job.is_running());
    }

    #[tokio::test]
    async fn run_once_fires_every_job() {
        let count = Arc::new(AtomicUsize::new(0));
        let queue = JobQueue::new(Duration::from_secs(5));
        let mut scheduler = Scheduler::new();
        scheduler.add(ScheduledJob::guarded(
            "subscribers",
            every_second(),
            Duration::from_secs(5),
            counting_body(count.clone()),
        ));
        for chain in [ChainId::Ethereum, ChainId::Bsc] {
            scheduler.add(ScheduledJob::queued(
                "balance-check",
                chain,
                every_second(),
                queue.clone(),
                counting_body(count.clone()),
            ));
        }
        scheduler.run_once().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_stops_timers() {
        let mut scheduler = Scheduler::new();
        scheduler.add(ScheduledJob::guarded(
            "hourly",
            Schedule::from_str("0 0 * * * *").unwrap(),
            Duration::from_secs(5),
            counting_body(Arc::default()),
        ));
        let handles = scheduler.start();
        scheduler.shutdown();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("timer must stop on shutdown")
                .unwrap();
        }
    }
}
