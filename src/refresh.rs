//! Periodic refresh of the remote range list.

use crate::sources::{FetchError, RangeFetcher};
use crate::store::RangeStore;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters describing refresh activity.
#[derive(Debug, Default)]
pub struct RefreshStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    refreshing: AtomicBool,
}

impl RefreshStats {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Refreshes that have finished, successfully or not.
    pub fn completed(&self) -> u64 {
        self.successes() + self.failures()
    }

    /// Whether a fetch is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }
}

/// Clears the in-flight flag even if the refresh future is dropped.
struct InFlight<'a>(&'a RefreshStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a RefreshStats) -> Self {
        stats.attempts.fetch_add(1, Ordering::Relaxed);
        stats.refreshing.store(true, Ordering::Release);
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.refreshing.store(false, Ordering::Release);
    }
}

/// Drives fetch + update on a fixed interval.
pub struct RefreshScheduler {
    store: Arc<RangeStore>,
    fetcher: Arc<dyn RangeFetcher>,
    interval: Duration,
    timeout: Duration,
    stats: Arc<RefreshStats>,
}

impl RefreshScheduler {
    /// Create a new scheduler.
    pub fn new(
        store: Arc<RangeStore>,
        fetcher: Arc<dyn RangeFetcher>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            interval,
            timeout,
            stats: Arc::new(RefreshStats::default()),
        }
    }

    pub fn stats(&self) -> &RefreshStats {
        &self.stats
    }

    /// Fetch once and publish the result.
    ///
    /// On failure the store is left untouched, so the previous set stays
    /// authoritative.
    pub async fn refresh_once(&self) -> Result<usize, FetchError> {
        let _in_flight = InFlight::enter(&self.stats);

        let result = match tokio::time::timeout(self.timeout, self.fetcher.fetch(self.timeout)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        match result {
            Ok(ranges) => {
                let count = ranges.len();
                self.store.update(ranges);
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                info!(
                    source = self.fetcher.name(),
                    remote_ranges = count,
                    "Trusted ranges refreshed"
                );
                Ok(count)
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Start the refresh loop on the current tokio runtime.
    ///
    /// The first tick fires one interval from now.
    pub fn spawn(self) -> RefreshHandle {
        let token = CancellationToken::new();
        let stats = Arc::clone(&self.stats);
        let task = tokio::spawn(self.run(token.clone()));

        RefreshHandle {
            token,
            task: Some(task),
            stats,
        }
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            source = self.fetcher.name(),
            interval = %humantime::format_duration(self.interval),
            "Refresh loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Abandoning in-flight refresh");
                    break;
                }
                result = self.refresh_once() => {
                    if let Err(e) = result {
                        warn!(
                            source = self.fetcher.name(),
                            error = %e,
                            failures = self.stats.failures(),
                            "Failed to refresh trusted ranges, keeping previous set"
                        );
                    }
                }
            }
        }

        info!(source = self.fetcher.name(), "Refresh loop stopped");
    }
}

/// Handle to a running refresh loop. Dropping it stops the loop.
pub struct RefreshHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: Arc<RefreshStats>,
}

impl RefreshHandle {
    pub fn stats(&self) -> &RefreshStats {
        &self.stats
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Refresh task ended abnormally");
            }
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::parse_ranges;
    use crate::test_support::{HangingFetcher, ScriptedFetcher};
    use std::net::IpAddr;

    const INTERVAL: Duration = Duration::from_secs(60);
    const TIMEOUT: Duration = Duration::from_secs(5);

    const SAMPLE_ADDRS: [&str; 5] = [
        "192.168.1.5",
        "203.0.113.9",
        "198.51.100.9",
        "8.8.8.8",
        "2600:9000::1",
    ];

    fn trusted_flags(store: &RangeStore) -> Vec<bool> {
        SAMPLE_ADDRS
            .iter()
            .map(|p| store.contains(&p.parse::<IpAddr>().unwrap()))
            .collect()
    }

    fn scheduler(fetcher: Arc<dyn RangeFetcher>, timeout: Duration) -> RefreshScheduler {
        let store = Arc::new(RangeStore::new(parse_ranges(["192.168.1.0/24"]).unwrap()));
        RefreshScheduler::new(store, fetcher, INTERVAL, timeout)
    }

    async fn wait_for_completed(stats: &RefreshStats, n: u64) {
        while stats.completed() < n {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test]
    async fn test_refresh_once_publishes_ranges() {
        let scheduler = scheduler(ScriptedFetcher::new(vec![Some(vec!["203.0.113.0/24"])]), TIMEOUT);
        let store = Arc::clone(&scheduler.store);

        assert_eq!(scheduler.refresh_once().await.unwrap(), 1);
        assert_eq!(trusted_flags(&store), vec![true, true, false, false, false]);
        assert_eq!(scheduler.stats().successes(), 1);
        assert!(!scheduler.stats().is_refreshing());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_set() {
        let scheduler = scheduler(
            ScriptedFetcher::new(vec![Some(vec!["203.0.113.0/24"]), None]),
            TIMEOUT,
        );
        let store = Arc::clone(&scheduler.store);

        scheduler.refresh_once().await.unwrap();
        let before = trusted_flags(&store);
        let snapshot = store.snapshot();

        assert!(matches!(
            scheduler.refresh_once().await,
            Err(FetchError::Status(502))
        ));
        assert_eq!(trusted_flags(&store), before);
        assert!(Arc::ptr_eq(&snapshot, &store.snapshot()));
        assert_eq!(scheduler.stats().failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_once_times_out() {
        let scheduler = scheduler(Arc::new(HangingFetcher), TIMEOUT);

        let err = scheduler.refresh_once().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
        assert!(!scheduler.stats().is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failure_on_second_scheduled_refresh() {
        let scheduler = scheduler(
            ScriptedFetcher::new(vec![
                Some(vec!["203.0.113.0/24"]),
                Some(vec!["198.51.100.0/24", "2600:9000::/28"]),
                None,
                Some(vec!["203.0.113.0/24"]),
            ]),
            TIMEOUT,
        );
        let store = Arc::clone(&scheduler.store);

        // Initial synchronous refresh, as done at construction.
        scheduler.refresh_once().await.unwrap();
        let handle = scheduler.spawn();

        wait_for_completed(handle.stats(), 2).await;
        let before_failure = trusted_flags(&store);
        assert_eq!(before_failure, vec![true, false, true, false, true]);

        wait_for_completed(handle.stats(), 3).await;
        assert_eq!(handle.stats().failures(), 1);
        assert_eq!(trusted_flags(&store), before_failure);

        // The next tick retries and recovers.
        wait_for_completed(handle.stats(), 4).await;
        assert_eq!(trusted_flags(&store), vec![true, true, false, false, false]);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_interval() {
        let scheduler = scheduler(ScriptedFetcher::new(vec![Some(vec![])]), TIMEOUT);
        let handle = scheduler.spawn();

        tokio::time::sleep(INTERVAL / 2).await;
        assert_eq!(handle.stats().attempts(), 0);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(handle.stats().attempts(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle() {
        let scheduler = scheduler(ScriptedFetcher::new(vec![]), TIMEOUT);
        let handle = scheduler.spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!handle.is_finished());

        let stats = Arc::clone(&handle.stats);
        handle.stop().await;
        assert_eq!(stats.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_in_flight_refresh() {
        let scheduler = scheduler(Arc::new(HangingFetcher), Duration::from_secs(3600));
        let store = Arc::clone(&scheduler.store);
        let before = trusted_flags(&store);
        let handle = scheduler.spawn();

        while !handle.stats().is_refreshing() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let stats = Arc::clone(&handle.stats);
        handle.stop().await;
        assert!(!stats.is_refreshing());
        assert_eq!(stats.completed(), 0);
        assert_eq!(trusted_flags(&store), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_handle_stops_loop() {
        let scheduler = scheduler(ScriptedFetcher::new(vec![]), TIMEOUT);
        let handle = scheduler.spawn();
        let stats = Arc::clone(&handle.stats);
        drop(handle);

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(stats.attempts(), 0);
    }
}
