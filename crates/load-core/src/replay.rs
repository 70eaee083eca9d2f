//! Open-loop replay: a single producer dispatches requests at the times
//! encoded in the loadspec; a fixed pool of HTTP clients gates concurrency;
//! server backpressure pauses the producer through a single-slot channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::metrics::{Counter, Histogram};
use crate::store::{PerRequestSink, RequestRecord};

/// Knobs of the replay engine.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Deadline applied to every outbound request.
    pub timeout: Duration,
    /// Size of the HTTP client pool; the only concurrency gate.
    pub num_clients: usize,
    /// Dump requests and responses.
    pub debug: bool,
}

/// Counters and histograms fed by the engine. The bundle is a set of
/// shared handles, so the reporter can keep reading while the run owns it.
#[derive(Debug, Clone, Default)]
pub struct ReplayMetrics {
    pub requests_sent: Arc<Counter>,
    pub errors: Arc<Counter>,
    pub response_times: Arc<Histogram>,
    pub pause_times: Arc<Histogram>,
}

impl ReplayMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// How the run ended, short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The whole loadspec was consumed.
    Completed,
    /// An interrupt stopped dispatch; in-flight work was drained.
    Interrupted,
}

/// Fixed-size pool of HTTP clients. Each client is built separately so it
/// keeps its own connection pool and keep-alive state. The semaphore doubles
/// as the drain barrier: holding every permit means nothing is in flight.
pub struct ClientPool {
    sem: Arc<Semaphore>,
    clients: Mutex<Vec<reqwest::Client>>,
    size: usize,
}

impl ClientPool {
    pub fn new(size: usize, timeout: Duration) -> Result<Arc<Self>> {
        if size < 1 {
            return Err(Error::Config(
                "number of clients must be positive".to_string(),
            ));
        }
        let mut clients = Vec::with_capacity(size);
        for _ in 0..size {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(timeout)
                .tcp_keepalive(3 * timeout)
                .build()
                .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
            clients.push(client);
        }
        Ok(Arc::new(Self {
            sem: Arc::new(Semaphore::new(size)),
            clients: Mutex::new(clients),
            size,
        }))
    }

    /// Waits for a free client. The guard returns it on drop.
    pub async fn checkout(self: &Arc<Self>) -> Result<PooledClient> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Task("client pool closed".to_string()))?;
        let client = self
            .clients
            .lock()
            .pop()
            .ok_or_else(|| Error::Task("client pool out of clients".to_string()))?;
        Ok(PooledClient {
            client,
            pool: self.clone(),
            _permit: permit,
        })
    }

    /// Blocks until every client is back in the pool.
    pub async fn drain(&self) {
        let _ = self.sem.acquire_many(self.size as u32).await;
    }
}

/// A checked-out client; returns to the pool on drop.
pub struct PooledClient {
    client: reqwest::Client,
    pool: Arc<ClientPool>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledClient {
    type Target = reqwest::Client;

    fn deref(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        self.pool.clients.lock().push(self.client.clone());
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    took: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    reason: String,
}

/// Shared flags coordinating producer and workers.
struct Signals {
    /// Suppresses redundant pause enqueues from concurrent workers.
    is_paused: AtomicBool,
    /// Raised by the interrupt watcher; the producer stops reading.
    interrupted: AtomicBool,
    /// Raised on a decodable 400; the first error wins.
    fatal_raised: AtomicBool,
    fatal: Mutex<Option<Error>>,
}

impl Signals {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            is_paused: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            fatal_raised: AtomicBool::new(false),
            fatal: Mutex::new(None),
        })
    }

    fn raise_fatal(&self, err: Error) {
        if !self.fatal_raised.swap(true, Ordering::SeqCst) {
            *self.fatal.lock() = Some(err);
        }
    }
}

/// Replays a loadspec read line-by-line from `input`.
///
/// The producer is single-threaded, so requests are dispatched in loadspec
/// order. Requests scheduled inside a server-requested pause window are
/// dropped, not deferred.
pub async fn run<R>(
    cfg: ReplayConfig,
    metrics: ReplayMetrics,
    per_request: Option<PerRequestSink>,
    input: R,
) -> Result<Outcome>
where
    R: AsyncBufRead + Unpin,
{
    let pool = ClientPool::new(cfg.num_clients, cfg.timeout)?;
    let signals = Signals::new();
    let (pause_tx, mut pause_rx) = mpsc::channel::<Duration>(1);

    {
        let signals = signals.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupting load test");
                signals.interrupted.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut lines = input.lines();
    let mut pause_budget: i64 = 0;
    let mut line_no = 0usize;
    let mut outcome = Outcome::Completed;

    loop {
        if signals.interrupted.load(Ordering::SeqCst) {
            outcome = Outcome::Interrupted;
            break;
        }
        if signals.fatal_raised.load(Ordering::SeqCst) {
            break;
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let entry = Entry::from_json_line(&line, line_no)?;

        // Requests falling inside a pause window are dropped.
        if pause_budget > 0 {
            pause_budget -= entry.delay_since_last_nanos;
            continue;
        }
        pause_budget = 0;

        if entry.delay_since_last_nanos > 0 {
            tokio::time::sleep(Duration::from_nanos(entry.delay_since_last_nanos as u64)).await;
        }

        tokio::spawn(dispatch(
            entry,
            pool.clone(),
            metrics.clone(),
            per_request.clone(),
            pause_tx.clone(),
            signals.clone(),
            cfg.debug,
        ));

        // Non-blocking peek at the pause slot after every dispatch.
        match pause_rx.try_recv() {
            Ok(pause) => {
                info!(pause_ms = pause.as_millis() as u64, "pausing on server request");
                pause_budget = pause.as_nanos() as i64;
                tokio::time::sleep(pause).await;
                signals.is_paused.store(false, Ordering::SeqCst);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
    }

    // Draining: no new work is dispatched; wait for every in-flight task,
    // then discard any pause signal still parked in the slot.
    pool.drain().await;
    while pause_rx.try_recv().is_ok() {}
    drop(per_request);

    if let Some(err) = signals.fatal.lock().take() {
        return Err(err);
    }
    Ok(outcome)
}

/// One request task: check out a client, fire, classify the response.
async fn dispatch(
    entry: Entry,
    pool: Arc<ClientPool>,
    metrics: ReplayMetrics,
    per_request: Option<PerRequestSink>,
    pause_tx: mpsc::Sender<Duration>,
    signals: Arc<Signals>,
    debug: bool,
) {
    let client = match pool.checkout().await {
        Ok(c) => c,
        Err(e) => {
            warn!(id = entry.id, error = %e, "client checkout failed");
            return;
        }
    };

    metrics.requests_sent.inc();
    if debug {
        debug!(id = entry.id, url = %entry.url, body = %entry.source, "sending request");
    }

    let started = Instant::now();
    let resp = client
        .get(&entry.url)
        .header(CONTENT_TYPE, "application/json")
        .body(entry.source)
        .send()
        .await;

    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            metrics.errors.inc();
            warn!(id = entry.id, error = %e, "request failed");
            return;
        }
    };

    let latency_nanos = started.elapsed().as_nanos() as i64;
    let code = resp.status().as_u16();
    let ts = chrono::Utc::now().timestamp();
    let mut took_millis = 0i64;

    match code {
        200 => match resp.json::<SearchResponse>().await {
            Ok(body) => {
                took_millis = body.took;
                metrics.response_times.record(body.took);
            }
            Err(e) => {
                metrics.errors.inc();
                warn!(id = entry.id, error = %e, "undecodable search response");
            }
        },
        400 => match resp.json::<ErrorResponse>().await {
            Ok(body) => {
                error!(kind = %body.error.kind, reason = %body.error.reason, "server rejected the query");
                signals.raise_fatal(Error::ServerFatal {
                    kind: body.error.kind,
                    reason: body.error.reason,
                });
            }
            Err(e) => {
                metrics.errors.inc();
                warn!(id = entry.id, error = %e, "undecodable bad-request response");
            }
        },
        429 | 503 => {
            // Overload signals observed while a pause is already pending
            // carry no new information.
            if signals.is_paused.load(Ordering::SeqCst) {
                return;
            }
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<f64>().ok());
            let Some(secs) = retry_after else {
                metrics.errors.inc();
                warn!(id = entry.id, code, "backpressure response without a usable Retry-After");
                return;
            };
            // Retry-After is seconds on the wire; the histogram and the
            // pause slot carry milliseconds.
            let pause_millis = (secs * 1e3).round() as i64;
            metrics.pause_times.record(pause_millis);
            if !signals.is_paused.swap(true, Ordering::SeqCst) {
                let _ = pause_tx.try_send(Duration::from_millis(pause_millis.max(0) as u64));
            }
        }
        _ => {
            metrics.errors.inc();
            warn!(id = entry.id, code, "unexpected status");
        }
    }

    if let Some(sink) = &per_request {
        sink.record(RequestRecord {
            ts,
            code,
            took_millis,
            latency_nanos,
            id: entry.id,
        });
    }
}
