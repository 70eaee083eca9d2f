//! Inter-arrival time generators: the random variable whose distribution
//! shapes the load profile.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::error::{Error, Result};

const SPEC_SEP: char = ':';
const CONST_SPEC: &str = "const";
const POISSON_SPEC: &str = "poisson";

/// A parsed arrival distribution, e.g. `const:10` or `poisson:50`.
/// The rate is events per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArrivalSpec {
    Const { qps: f64 },
    Poisson { lambda: f64 },
}

impl ArrivalSpec {
    pub fn parse(def: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidLoadSpec {
            spec: def.to_string(),
            reason: reason.to_string(),
        };

        let (kind, rate) = def
            .split_once(SPEC_SEP)
            .ok_or_else(|| invalid("missing rate"))?;
        let rate: f64 = rate
            .trim()
            .parse()
            .map_err(|_| invalid("rate is not a number"))?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(invalid("rate must be > 0"));
        }

        match kind {
            CONST_SPEC => Ok(ArrivalSpec::Const { qps: rate }),
            POISSON_SPEC => Ok(ArrivalSpec::Poisson { lambda: rate }),
            _ => Err(invalid("unknown distribution")),
        }
    }
}

/// Draws successive inter-arrival delays in nanoseconds. Each generator
/// owns its RNG; generators are not shared between tasks.
#[derive(Debug)]
pub struct InterArrival {
    spec: ArrivalSpec,
    rng: SmallRng,
}

impl InterArrival {
    pub fn new(spec: ArrivalSpec) -> Self {
        Self {
            spec,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn next_nanos(&mut self) -> i64 {
        match self.spec {
            ArrivalSpec::Const { qps } => (1e9 / qps).round() as i64,
            // Inverse-CDF sampling of the exponential distribution, see
            // http://preshing.com/20111007/how-to-generate-random-timings-for-a-poisson-process/
            ArrivalSpec::Poisson { lambda } => {
                let u: f64 = self.rng.gen();
                (-(1.0 - u).ln() / lambda * 1e9).round() as i64
            }
        }
    }

    /// Spawns the emitter task and hands back the tick side. A tick is
    /// delivered through a single-slot channel with a non-blocking send:
    /// if no consumer is waiting the fire is dropped, never queued, so the
    /// arrival distribution survives slow consumers. The emitter exits on
    /// the wake-up after its receiver is gone.
    pub fn start(mut self) -> ArrivalTicker {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            loop {
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(()) {
                    return;
                }
                let delay = self.next_nanos();
                sleep(Duration::from_nanos(delay as u64)).await;
            }
        });
        ArrivalTicker { rx }
    }
}

/// Receiving half of a started generator.
#[derive(Debug)]
pub struct ArrivalTicker {
    rx: mpsc::Receiver<()>,
}

impl ArrivalTicker {
    /// Waits for the next fire. Returns `None` once the emitter is gone.
    pub async fn tick(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}
