//! Core of a closed-to-open-loop load harness for HTTP search services:
//! loadspec synthesis, schedule replay with server-driven backpressure,
//! and clock-driven CSV metrics reporting.

pub mod anon;
pub mod collector;
pub mod config;
pub mod entry;
pub mod error;
pub mod gen;
pub mod interarrival;
pub mod metrics;
pub mod replay;
pub mod reporter;
pub mod slowlog;
pub mod store;

pub use config::RunConfig;
pub use entry::Entry;
pub use error::{Error, Result};
pub use interarrival::{ArrivalSpec, InterArrival};
pub use metrics::{Counter, Histogram, IntGauge, IntGaugeSet};
pub use replay::{Outcome, ReplayConfig, ReplayMetrics};
pub use reporter::{Collector, Reporter};
