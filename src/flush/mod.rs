use crate::aggregator::SharedAggregator;
use crate::store::{SharedStore, StoreError};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
    pub delta_written: u64,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.written == 0 && self.failed == 0
    }
}

/// Periodically moves pending deltas from the aggregator into the store.
pub struct Flusher {
    aggregator: SharedAggregator,
    store: SharedStore,
    flush_interval: Duration,
    write_timeout: Duration,
}

impl Flusher {
    pub fn new(
        aggregator: SharedAggregator,
        store: SharedStore,
        flush_interval: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            store,
            flush_interval,
            write_timeout,
        }
    }

    /// Flushes on every tick until `shutdown` flips to `true` or its sender is
    /// dropped, then does one last flush before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> FlushReport {
        let mut interval = time::interval(self.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Flusher stopping, writing remaining counters");
        self.flush_once().await
    }

    pub async fn flush_once(&self) -> FlushReport {
        let records = self.aggregator.drain();
        if records.is_empty() {
            return FlushReport::default();
        }

        // A write only starts, and only starts its timeout, once one of the
        // store's slots is free.
        let mut writes = stream::iter(records)
            .map(|(key, delta)| async move {
                let result = self.write(&key, delta).await;
                (key, delta, result)
            })
            .buffer_unordered(self.store.write_concurrency().max(1));

        let mut report = FlushReport::default();
        while let Some((key, delta, result)) = writes.next().await {
            match result {
                Ok(()) => {
                    debug!("Wrote {} += {}", key, delta);
                    report.written += 1;
                    report.delta_written += delta;
                }
                Err(e) => {
                    warn!("Dropping {} pending for {}: {}", delta, key, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Flushed {} counters (+{}), {} failed",
            report.written, report.delta_written, report.failed
        );
        report
    }

    async fn write(&self, key: &str, delta: u64) -> Result<(), StoreError> {
        match time::timeout(self.write_timeout, self.store.upsert_increment(key, delta)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.write_timeout)),
        }
    }
}

/// Waits for `serving` to end, successfully or not, then stops the flusher
/// task and waits out its final flush. The serving outcome is returned as is.
pub async fn finish_after<T>(
    serving: impl Future<Output = T>,
    stop: watch::Sender<bool>,
    flusher: JoinHandle<FlushReport>,
) -> Result<(T, FlushReport), JoinError> {
    let served = serving.await;
    let _ = stop.send(true);
    let report = flusher.await?;
    Ok((served, report))
}
