//! Clock-driven metrics reporting: on every tick, run all collectors, then
//! append one row to every store.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::error::Result;
use crate::metrics::{Counter, Histogram, IntGauge, IntGaugeSet};
use crate::store::CsvStore;

/// Anything that can refresh metrics from an external source. Collectors
/// run under the reporter's per-collector deadline; a failing collector is
/// logged and skipped for that tick, leaving its gauges untouched.
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    fn collect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Assembles a reporter. Options are orthogonal; every store option opens
/// its file immediately so misconfiguration fails before the run starts.
pub struct ReporterBuilder {
    interval: Duration,
    timeout: Duration,
    collectors: Vec<Arc<dyn Collector>>,
    stores: Vec<CsvStore>,
}

impl ReporterBuilder {
    pub fn histogram_csv(mut self, metric: &Arc<Histogram>, path: &Path) -> Result<Self> {
        self.stores.push(CsvStore::histogram(metric.clone(), path)?);
        Ok(self)
    }

    pub fn counter_csv(mut self, metric: &Arc<Counter>, path: &Path) -> Result<Self> {
        self.stores.push(CsvStore::counter(metric.clone(), path)?);
        Ok(self)
    }

    pub fn gauge_csv(mut self, metric: &Arc<IntGauge>, path: &Path) -> Result<Self> {
        self.stores.push(CsvStore::gauge(metric.clone(), path)?);
        Ok(self)
    }

    pub fn gauge_set_csv(mut self, metric: &Arc<IntGaugeSet>, path: &Path) -> Result<Self> {
        self.stores.push(CsvStore::gauge_set(metric.clone(), path)?);
        Ok(self)
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// Spawns the reporting task.
    pub fn start(self) -> Reporter {
        let ReporterBuilder {
            interval,
            timeout,
            collectors,
            mut stores,
        } = self;

        let (end_tx, mut end_rx) = mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The interval fires immediately once; the first report should
            // come a full interval in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_cycle(&collectors, &mut stores, timeout).await;
                    }
                    _ = end_rx.recv() => {
                        // One last cycle so the tail of the run is captured.
                        run_cycle(&collectors, &mut stores, timeout).await;
                        return;
                    }
                }
            }
        });

        Reporter { end_tx, handle }
    }
}

async fn run_cycle(collectors: &[Arc<dyn Collector>], stores: &mut [CsvStore], timeout: Duration) {
    for collector in collectors {
        match tokio::time::timeout(timeout, collector.collect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(collector = collector.name(), error = %e, "collection failed"),
            Err(_) => warn!(collector = collector.name(), "collection timed out"),
        }
    }
    let now = chrono::Utc::now().timestamp();
    for store in stores.iter_mut() {
        if let Err(e) = store.write_row(now) {
            warn!(error = %e, "store write failed");
        }
    }
}

/// Handle over the running reporting task. The stores are owned by that
/// task; nothing else writes to them.
pub struct Reporter {
    end_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Reporter {
    pub fn builder(interval: Duration, timeout: Duration) -> ReporterBuilder {
        ReporterBuilder {
            interval,
            timeout,
            collectors: Vec::new(),
            stores: Vec::new(),
        }
    }

    /// Signals the task, waits for the final collection-and-write cycle.
    pub async fn finish(self) {
        let _ = self.end_tx.send(()).await;
        let _ = self.handle.await;
    }
}
