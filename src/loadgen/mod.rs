//! Fan-out HTTP load generator.
//!
//! The request budget is split evenly across workers, each running its own
//! single-threaded runtime on a dedicated OS thread. A worker fires its whole
//! share at once and counts completions, successful or not. It stops once the
//! count reaches its budget minus a slack, so a few requests that never resolve
//! cannot hang the run.

use http::Uri;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info};

pub const DEFAULT_TARGET: &str = "http://127.0.0.1:8080/count?name=loadgen";
pub const DEFAULT_REQUESTS: u64 = 1000;
pub const DEFAULT_SLACK: u64 = 4;
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(200);

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("invalid target uri: {0}")]
    InvalidTarget(#[from] http::uri::InvalidUri),
    #[error("unsupported target scheme {0:?}, only http is supported")]
    UnsupportedScheme(String),
    #[error("worker count must be positive")]
    NoWorkers,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

/// Requests each worker issues. The remainder of the division is not
/// redistributed, so up to `workers - 1` requests of the total are never sent.
pub fn per_worker_budget(total_requests: u64, workers: usize) -> u64 {
    if workers == 0 {
        return 0;
    }
    total_requests / workers as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBudget {
    pub requests: u64,
    pub slack: u64,
}

impl WorkerBudget {
    pub fn threshold(&self) -> u64 {
        self.requests.saturating_sub(self.slack)
    }

    pub fn is_done(&self, completed: u64) -> bool {
        completed >= self.threshold()
    }
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub target: Uri,
    pub total_requests: u64,
    pub workers: usize,
    pub slack: u64,
    pub check_interval: Duration,
}

impl LoadConfig {
    /// Validates `target` and fills the rest with defaults, one worker per CPU.
    pub fn new(target: &str, total_requests: u64) -> Result<Self, LoadError> {
        let target: Uri = target.parse()?;
        match target.scheme_str() {
            Some("http") => {}
            other => {
                return Err(LoadError::UnsupportedScheme(
                    other.unwrap_or_default().to_string(),
                ));
            }
        }

        Ok(Self {
            target,
            total_requests,
            workers: num_cpus::get(),
            slack: DEFAULT_SLACK,
            check_interval: DEFAULT_CHECK_INTERVAL,
        })
    }

    pub fn budget(&self) -> WorkerBudget {
        WorkerBudget {
            requests: per_worker_budget(self.total_requests, self.workers),
            slack: self.slack,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub budget: u64,
    pub completed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn completed(&self) -> u64 {
        self.workers.iter().map(|w| w.completed).sum()
    }

    pub fn budgeted(&self) -> u64 {
        self.workers.iter().map(|w| w.budget).sum()
    }
}

pub struct Worker {
    id: usize,
    target: Uri,
    budget: WorkerBudget,
    check_interval: Duration,
}

impl Worker {
    pub fn new(id: usize, target: Uri, budget: WorkerBudget, check_interval: Duration) -> Self {
        Self {
            id,
            target,
            budget,
            check_interval,
        }
    }

    /// Issues the whole budget concurrently and returns once enough of it has
    /// completed. Requests still in flight are aborted on return.
    pub async fn run(&self) -> WorkerReport {
        let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
        let completed = Arc::new(AtomicU64::new(0));
        let mut requests = JoinSet::new();

        for _ in 0..self.budget.requests {
            let client = client.clone();
            let target = self.target.clone();
            let completed = completed.clone();
            let id = self.id;
            requests.spawn(async move {
                match client.get(target).await {
                    Ok(response) => {
                        if let Err(e) = response.into_body().collect().await {
                            debug!("Worker {} failed reading body: {}", id, e);
                        }
                    }
                    Err(e) => {
                        debug!("Worker {} request failed: {}", id, e);
                    }
                }
                completed.fetch_add(1, Ordering::Relaxed);
            });
        }

        let mut check = time::interval(self.check_interval);
        loop {
            check.tick().await;
            let done = completed.load(Ordering::Relaxed);
            if self.budget.is_done(done) {
                info!("Completed {} requests", done);
                return WorkerReport {
                    id: self.id,
                    budget: self.budget.requests,
                    completed: done,
                };
            }
        }
    }
}

pub struct LoadGenerator {
    config: LoadConfig,
}

impl LoadGenerator {
    pub fn new(config: LoadConfig) -> Result<Self, LoadError> {
        if config.workers == 0 {
            return Err(LoadError::NoWorkers);
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Blocks until every worker has halted.
    pub fn run(&self) -> Result<RunReport, LoadError> {
        let budget = self.config.budget();
        info!(
            "Sending {} requests to {} across {} workers ({} each)",
            budget.requests * self.config.workers as u64,
            self.config.target,
            self.config.workers,
            budget.requests
        );

        let start = Instant::now();
        let mut handles = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let worker = Worker::new(
                id,
                self.config.target.clone(),
                budget,
                self.config.check_interval,
            );
            let handle = std::thread::Builder::new()
                .name(format!("loadgen-{id}"))
                .spawn(move || -> Result<WorkerReport, LoadError> {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()?;
                    let report = runtime.block_on(worker.run());
                    // don't wait on resolver threads stuck behind hung requests
                    runtime.shutdown_background();
                    Ok(report)
                })?;
            handles.push(handle);
        }

        let mut workers = Vec::with_capacity(handles.len());
        for (id, handle) in handles.into_iter().enumerate() {
            let report = handle.join().map_err(|_| LoadError::WorkerPanicked(id))??;
            workers.push(report);
        }

        let report = RunReport {
            workers,
            elapsed: start.elapsed(),
        };
        info!(
            "All workers halted: {} of {} requests completed in {:.2}s",
            report.completed(),
            report.budgeted(),
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TICK: Duration = Duration::from_millis(10);

    async fn responder() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                        .await;
                });
            }
        });
        addr
    }

    fn uri(addr: SocketAddr) -> Uri {
        format!("http://{addr}/count?name=test").parse().unwrap()
    }

    #[test]
    fn budget_truncates_remainder() {
        let budget = per_worker_budget(1000, 7);
        assert_eq!(budget, 142);
        assert_eq!(budget * 7, 994);
        assert_eq!(per_worker_budget(100, 4), 25);
        assert_eq!(per_worker_budget(3, 4), 0);
        assert_eq!(per_worker_budget(10, 0), 0);
    }

    #[test]
    fn slack_threshold_decides_halt() {
        let budget = WorkerBudget {
            requests: per_worker_budget(100, 4),
            slack: 4,
        };
        assert_eq!(budget.threshold(), 21);
        assert!(budget.is_done(21));
        assert!(!budget.is_done(20));
    }

    #[test]
    fn slack_larger_than_budget_saturates() {
        let budget = WorkerBudget {
            requests: 2,
            slack: DEFAULT_SLACK,
        };
        assert_eq!(budget.threshold(), 0);
        assert!(budget.is_done(0));
    }

    #[test]
    fn config_validates_target() {
        let config = LoadConfig::new(DEFAULT_TARGET, DEFAULT_REQUESTS).unwrap();
        assert_eq!(config.workers, num_cpus::get());
        assert_eq!(config.slack, DEFAULT_SLACK);

        assert!(matches!(
            LoadConfig::new("https://example.com/", 10),
            Err(LoadError::UnsupportedScheme(s)) if s == "https"
        ));
        assert!(matches!(
            LoadConfig::new("/relative", 10),
            Err(LoadError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            LoadConfig::new("http://bad host/", 10),
            Err(LoadError::InvalidTarget(_))
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = LoadConfig::new(DEFAULT_TARGET, 10).unwrap();
        config.workers = 0;
        assert!(matches!(LoadGenerator::new(config), Err(LoadError::NoWorkers)));
    }

    #[tokio::test]
    async fn worker_counts_successful_completions() {
        let addr = responder().await;
        let budget = WorkerBudget {
            requests: 10,
            slack: 0,
        };
        let report = Worker::new(0, uri(addr), budget, TICK).run().await;
        assert_eq!(report.completed, 10);
        assert_eq!(report.budget, 10);
    }

    #[tokio::test]
    async fn failed_requests_still_complete() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let budget = WorkerBudget {
            requests: 5,
            slack: 0,
        };
        let report = Worker::new(0, uri(addr), budget, TICK).run().await;
        assert_eq!(report.completed, 5);
    }

    #[tokio::test]
    async fn slack_lets_hung_requests_go() {
        // accepts but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let budget = WorkerBudget {
            requests: 3,
            slack: 3,
        };
        let report = time::timeout(
            Duration::from_secs(5),
            Worker::new(0, uri(addr), budget, TICK).run(),
        )
        .await
        .expect("worker should halt on slack");
        assert_eq!(report.completed, 0);
    }

    #[test]
    fn generator_runs_every_worker() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let addr = runtime.block_on(responder());

        let mut config = LoadConfig::new(&uri(addr).to_string(), 30).unwrap();
        config.workers = 3;
        config.slack = 0;
        config.check_interval = TICK;

        let report = LoadGenerator::new(config).unwrap().run().unwrap();
        assert_eq!(report.workers.len(), 3);
        assert_eq!(report.budgeted(), 30);
        assert_eq!(report.completed(), 30);
    }
}
