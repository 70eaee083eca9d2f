//! Thread-safe metric primitives: counters, gauges, and an append-buffer
//! histogram whose snapshots drain into a t-digest.

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use tdigest::TDigest;

use crate::error::{Error, Result};

/// t-digest compression factor used by histogram snapshots.
const DIGEST_SIZE: usize = 100;

/// Simple incrementing and decrementing 64-bit integer.
#[derive(Debug, Default)]
pub struct Counter {
    v: AtomicI64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.v.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.v.fetch_add(-1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.v.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct IntGauge {
    v: AtomicI64,
}

impl IntGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: i64) {
        self.v.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.v.load(Ordering::Relaxed)
    }
}

/// A labeled tuple of gauges updated as one unit. The header is fixed at
/// construction; `set` replaces every value atomically with respect to
/// readers.
#[derive(Debug)]
pub struct IntGaugeSet {
    header: Vec<String>,
    values: Mutex<Vec<i64>>,
}

impl IntGaugeSet {
    pub fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|h| h.to_string()).collect(),
            values: Mutex::new(vec![0; header.len()]),
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn set(&self, values: &[i64]) -> Result<()> {
        if values.len() != self.header.len() {
            return Err(Error::InvalidArgument {
                expected: self.header.len(),
                got: values.len(),
            });
        }
        let mut cur = self.values.lock();
        cur.copy_from_slice(values);
        Ok(())
    }

    /// Returns a copy of the current values.
    pub fn get(&self) -> Vec<i64> {
        self.values.lock().clone()
    }
}

/// Append buffer of samples. Recording only pushes onto a vector under a
/// short critical section; all digest work happens at snapshot time.
#[derive(Debug, Default)]
pub struct Histogram {
    buff: Mutex<Vec<i64>>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, v: i64) {
        self.buff.lock().push(v);
    }

    /// Takes ownership of the buffered samples, leaving the histogram
    /// empty, and folds them into a fresh digest. Samples recorded after
    /// this call land in the next snapshot.
    pub fn snapshot(&self) -> Snapshot {
        let drained = {
            let mut buff = self.buff.lock();
            std::mem::take(&mut *buff)
        };
        Snapshot::from_samples(drained)
    }
}

/// An immutable view over one drained sample buffer.
#[derive(Clone)]
pub struct Snapshot {
    count: usize,
    digest: TDigest,
}

impl Snapshot {
    fn from_samples(samples: Vec<i64>) -> Self {
        let count = samples.len();
        let digest = TDigest::new_with_size(DIGEST_SIZE)
            .merge_unsorted(samples.into_iter().map(|v| v as f64).collect());
        Self { count, digest }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Estimates the q-th quantile; q is clamped into [0, 1]. An empty
    /// snapshot yields 0.0.
    pub fn quantile(&self, q: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.digest.estimate_quantile(q.clamp(0.0, 1.0))
    }

    pub fn quantiles(&self, qs: &[f64]) -> Vec<f64> {
        qs.iter().map(|&q| self.quantile(q)).collect()
    }
}
