//! Tabular output: one CSV store per metric, written by the reporter, plus
//! a per-request log fed from the worker tasks through its own channel.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::Writer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::metrics::{Counter, Histogram, IntGauge, IntGaugeSet};

/// Quantiles reported for every histogram snapshot.
const HISTOGRAM_QUANTILES: [f64; 4] = [0.5, 0.9, 0.99, 0.999];

/// `<results>/<metric>_<exp_id>.csv`
pub fn csv_file_path(results_path: &Path, metric: &str, exp_id: &str) -> PathBuf {
    results_path.join(format!("{metric}_{exp_id}.csv"))
}

/// A metric bound to its output file. The header row is written at
/// construction, so opening failures surface before the run starts.
pub enum CsvStore {
    Histogram {
        w: Writer<File>,
        metric: Arc<Histogram>,
    },
    Counter {
        w: Writer<File>,
        metric: Arc<Counter>,
    },
    Gauge {
        w: Writer<File>,
        metric: Arc<IntGauge>,
    },
    GaugeSet {
        w: Writer<File>,
        metric: Arc<IntGaugeSet>,
    },
}

impl CsvStore {
    pub fn histogram(metric: Arc<Histogram>, path: &Path) -> Result<Self> {
        let w = new_writer(path, &["ts", "count", "p50", "p90", "p99", "p999"])?;
        Ok(CsvStore::Histogram { w, metric })
    }

    pub fn counter(metric: Arc<Counter>, path: &Path) -> Result<Self> {
        let w = new_writer(path, &["ts", "value"])?;
        Ok(CsvStore::Counter { w, metric })
    }

    pub fn gauge(metric: Arc<IntGauge>, path: &Path) -> Result<Self> {
        let w = new_writer(path, &["ts", "value"])?;
        Ok(CsvStore::Gauge { w, metric })
    }

    pub fn gauge_set(metric: Arc<IntGaugeSet>, path: &Path) -> Result<Self> {
        let mut header = vec!["ts".to_string()];
        header.extend(metric.header().iter().cloned());
        let w = new_writer(path, &header)?;
        Ok(CsvStore::GaugeSet { w, metric })
    }

    /// Appends one row stamped with `now` (unix seconds) and flushes.
    pub fn write_row(&mut self, now: i64) -> Result<()> {
        match self {
            CsvStore::Histogram { w, metric } => {
                let snapshot = metric.snapshot();
                let quantiles = snapshot.quantiles(&HISTOGRAM_QUANTILES);
                let mut row = vec![now.to_string(), snapshot.count().to_string()];
                row.extend(quantiles.iter().map(|q| format!("{q:.2}")));
                w.write_record(&row)?;
                w.flush()?;
            }
            CsvStore::Counter { w, metric } => {
                w.write_record(&[now.to_string(), metric.get().to_string()])?;
                w.flush()?;
            }
            CsvStore::Gauge { w, metric } => {
                w.write_record(&[now.to_string(), metric.get().to_string()])?;
                w.flush()?;
            }
            CsvStore::GaugeSet { w, metric } => {
                let mut row = vec![now.to_string()];
                row.extend(metric.get().iter().map(|v| v.to_string()));
                w.write_record(&row)?;
                w.flush()?;
            }
        }
        Ok(())
    }
}

fn new_writer<S: AsRef<[u8]>>(path: &Path, header: &[S]) -> Result<Writer<File>> {
    let mut w = Writer::from_path(path)?;
    w.write_record(header)?;
    w.flush()?;
    Ok(w)
}

/// One completed request, as logged by the per-request store.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub ts: i64,
    pub code: u16,
    pub took_millis: i64,
    pub latency_nanos: i64,
    pub id: u64,
}

/// Cloneable producer side of the per-request log.
#[derive(Debug, Clone)]
pub struct PerRequestSink {
    tx: mpsc::UnboundedSender<RequestRecord>,
}

impl PerRequestSink {
    pub fn record(&self, record: RequestRecord) {
        // A closed channel means the writer is gone; nothing left to do.
        let _ = self.tx.send(record);
    }
}

/// Owns the single writer task draining the queue into the CSV file.
#[derive(Debug)]
pub struct PerRequestLog {
    handle: JoinHandle<Result<()>>,
}

impl PerRequestLog {
    /// Waits for the queue to drain and the file to be flushed. Every
    /// sink clone must be dropped first, or this will wait forever.
    pub async fn finish(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| Error::Task(format!("per-request writer: {e}")))?
    }
}

/// Opens the per-request CSV and spawns its writer task.
pub fn per_request_log(path: &Path) -> Result<(PerRequestSink, PerRequestLog)> {
    let mut w = new_writer(path, &["ts", "code", "took_in_millis", "latency_ns", "id"])?;
    let (tx, mut rx) = mpsc::unbounded_channel::<RequestRecord>();
    let handle = tokio::spawn(async move {
        while let Some(r) = rx.recv().await {
            w.write_record(&[
                r.ts.to_string(),
                r.code.to_string(),
                r.took_millis.to_string(),
                r.latency_nanos.to_string(),
                r.id.to_string(),
            ])?;
        }
        w.flush()?;
        Ok(())
    });
    Ok((PerRequestSink { tx }, PerRequestLog { handle }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_store_writes_snapshot_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("response.time_1.csv");
        let metric = Arc::new(Histogram::new());
        let mut store = CsvStore::histogram(metric.clone(), &path).unwrap();

        for _ in 0..10 {
            metric.record(5);
        }
        store.write_row(1234).unwrap();
        // The snapshot drained the buffer; the second row is empty.
        store.write_row(1235).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "ts,count,p50,p90,p99,p999");
        assert_eq!(lines[1], "1234,10,5.00,5.00,5.00,5.00");
        assert_eq!(lines[2], "1235,0,0.00,0.00,0.00,0.00");
    }

    #[test]
    fn counter_and_gauge_stores() {
        let dir = tempfile::tempdir().unwrap();

        let counter = Arc::new(Counter::new());
        counter.inc();
        let path = dir.path().join("requests.sent_1.csv");
        let mut store = CsvStore::counter(counter, &path).unwrap();
        store.write_row(7).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ts,value\n7,1\n");

        let gauge = Arc::new(IntGauge::new());
        gauge.set(42);
        let path = dir.path().join("cpu.percent_1.csv");
        let mut store = CsvStore::gauge(gauge, &path).unwrap();
        store.write_row(8).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ts,value\n8,42\n");
    }

    #[test]
    fn gauge_set_store_uses_the_labels() {
        let dir = tempfile::tempdir().unwrap();
        let set = Arc::new(IntGaugeSet::new(&["used", "max"]));
        set.set(&[100, 200]).unwrap();

        let path = dir.path().join("mem.young_1.csv");
        let mut store = CsvStore::gauge_set(set, &path).unwrap();
        store.write_row(9).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ts,used,max\n9,100,200\n");
    }

    #[tokio::test]
    async fn per_request_log_drains_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("per.request_1.csv");
        let (sink, log) = per_request_log(&path).unwrap();

        for id in 0..3u64 {
            sink.record(RequestRecord {
                ts: 100 + id as i64,
                code: 200,
                took_millis: 5,
                latency_nanos: 1_000_000,
                id,
            });
        }
        drop(sink);
        log.finish().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "ts,code,took_in_millis,latency_ns,id");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "100,200,5,1000000,0");
    }
}
