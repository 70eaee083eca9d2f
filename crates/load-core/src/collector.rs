//! Collector for a `_nodes/stats`-shaped endpoint: pulls one JSON envelope
//! per tick and refreshes the gauges it owns. Unknown fields are ignored;
//! an absent field leaves its gauge at the previous value.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metrics::{IntGauge, IntGaugeSet};
use crate::reporter::Collector;

/// Heap pool and OS memory gauges, one labeled pair each.
pub struct MemGauges {
    pub young: Arc<IntGaugeSet>,
    pub tenured: Arc<IntGaugeSet>,
    pub survivor: Arc<IntGaugeSet>,
    pub heap: Arc<IntGaugeSet>,
    pub non_heap: Arc<IntGaugeSet>,
    pub os: Arc<IntGaugeSet>,
    pub swap: Arc<IntGaugeSet>,
}

pub struct GcGauges {
    pub young: Arc<IntGaugeSet>,
    pub full: Arc<IntGaugeSet>,
}

pub struct SearchStatsCollector {
    url: String,
    debug: bool,
    client: reqwest::Client,
    pub mem: MemGauges,
    pub cpu_percent: Arc<IntGauge>,
    pub gc: GcGauges,
}

impl SearchStatsCollector {
    pub fn new(host: &str, timeout: Duration, debug: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .tcp_keepalive(3 * timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build stats client: {e}")))?;

        Ok(Self {
            url: format!("{}/_nodes/stats", host.trim_end_matches('/')),
            debug,
            client,
            mem: MemGauges {
                young: Arc::new(IntGaugeSet::new(&["used", "max"])),
                tenured: Arc::new(IntGaugeSet::new(&["used", "max"])),
                survivor: Arc::new(IntGaugeSet::new(&["used", "max"])),
                heap: Arc::new(IntGaugeSet::new(&["used", "committed"])),
                non_heap: Arc::new(IntGaugeSet::new(&["used", "committed"])),
                os: Arc::new(IntGaugeSet::new(&["used", "total"])),
                swap: Arc::new(IntGaugeSet::new(&["used", "total"])),
            },
            cpu_percent: Arc::new(IntGauge::new()),
            gc: GcGauges {
                young: Arc::new(IntGaugeSet::new(&["count", "time"])),
                full: Arc::new(IntGaugeSet::new(&["count", "time"])),
            },
        })
    }

    async fn fetch(&self) -> anyhow::Result<()> {
        let resp = self.client.get(&self.url).send().await?;
        let stats: StatsResponse = if self.debug {
            let body = resp.text().await?;
            debug!(url = %self.url, body = %body, "stats response");
            serde_json::from_str(&body)?
        } else {
            resp.json().await?
        };

        let Some(node) = stats.nodes.into_values().next() else {
            anyhow::bail!("stats response carries no nodes");
        };
        self.apply(node)?;
        Ok(())
    }

    fn apply(&self, node: NodeStats) -> Result<()> {
        if let Some(jvm) = node.jvm {
            if let Some(mem) = jvm.mem {
                if let Some(pools) = mem.pools {
                    set_pair(&self.mem.young, pools.young.and_then(PoolInfo::pair))?;
                    set_pair(&self.mem.tenured, pools.old.and_then(PoolInfo::pair))?;
                    set_pair(&self.mem.survivor, pools.survivor.and_then(PoolInfo::pair))?;
                }
                set_pair(
                    &self.mem.heap,
                    mem.heap_used_in_bytes.zip(mem.heap_committed_in_bytes),
                )?;
                set_pair(
                    &self.mem.non_heap,
                    mem.non_heap_used_in_bytes.zip(mem.non_heap_committed_in_bytes),
                )?;
            }
            if let Some(collectors) = jvm.gc.and_then(|gc| gc.collectors) {
                set_pair(&self.gc.young, collectors.young.and_then(GcInfo::pair))?;
                set_pair(&self.gc.full, collectors.old.and_then(GcInfo::pair))?;
            }
        }
        if let Some(os) = node.os {
            if let Some(percent) = os.cpu.and_then(|c| c.percent) {
                self.cpu_percent.set(percent);
            }
            set_pair(&self.mem.os, os.mem.and_then(OsMemInfo::pair))?;
            set_pair(&self.mem.swap, os.swap.and_then(OsMemInfo::pair))?;
        }
        Ok(())
    }
}

fn set_pair(set: &IntGaugeSet, pair: Option<(i64, i64)>) -> Result<()> {
    if let Some((a, b)) = pair {
        set.set(&[a, b])?;
    }
    Ok(())
}

impl Collector for SearchStatsCollector {
    fn name(&self) -> &'static str {
        "search-stats"
    }

    fn collect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(self.fetch())
    }
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    nodes: HashMap<String, NodeStats>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStats {
    jvm: Option<JvmStats>,
    os: Option<OsStats>,
}

#[derive(Debug, Deserialize)]
struct JvmStats {
    mem: Option<JvmMem>,
    gc: Option<Gc>,
}

#[derive(Debug, Deserialize)]
struct JvmMem {
    pools: Option<Pools>,
    heap_used_in_bytes: Option<i64>,
    heap_committed_in_bytes: Option<i64>,
    non_heap_used_in_bytes: Option<i64>,
    non_heap_committed_in_bytes: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Pools {
    young: Option<PoolInfo>,
    old: Option<PoolInfo>,
    survivor: Option<PoolInfo>,
}

#[derive(Debug, Deserialize)]
struct PoolInfo {
    used_in_bytes: Option<i64>,
    max_in_bytes: Option<i64>,
}

impl PoolInfo {
    fn pair(self) -> Option<(i64, i64)> {
        self.used_in_bytes.zip(self.max_in_bytes)
    }
}

#[derive(Debug, Deserialize)]
struct Gc {
    collectors: Option<GcCollectors>,
}

#[derive(Debug, Deserialize)]
struct GcCollectors {
    young: Option<GcInfo>,
    old: Option<GcInfo>,
}

#[derive(Debug, Deserialize)]
struct GcInfo {
    collection_count: Option<i64>,
    collection_time_in_millis: Option<i64>,
}

impl GcInfo {
    fn pair(self) -> Option<(i64, i64)> {
        self.collection_count.zip(self.collection_time_in_millis)
    }
}

#[derive(Debug, Deserialize)]
struct OsStats {
    cpu: Option<OsCpu>,
    mem: Option<OsMemInfo>,
    swap: Option<OsMemInfo>,
}

#[derive(Debug, Deserialize)]
struct OsCpu {
    percent: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OsMemInfo {
    used_in_bytes: Option<i64>,
    total_in_bytes: Option<i64>,
}

impl OsMemInfo {
    fn pair(self) -> Option<(i64, i64)> {
        self.used_in_bytes.zip(self.total_in_bytes)
    }
}
