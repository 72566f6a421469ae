use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::recovery::RecoveryPolicy;

/// Shortest queue wait an idle worker uses; zero would spin.
pub const MIN_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Missed idle heartbeats after which a worker is reported as not alive.
const HEARTBEAT_MISSES: u32 = 3;

/// How the external transfer executable is invoked.
///
/// The final command line is `program [args...] <id> <src> <dst>`.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub program: PathBuf,
    /// Fixed arguments placed before the job arguments.
    pub args: Vec<String>,
    /// Upper bound on a single invocation. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("bash"),
            args: vec!["./dummy_rsync.sh".to_string()],
            timeout: Some(Duration::from_secs(3600)),
        }
    }
}

impl ExecutorConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Retry scanner settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries a failed job may consume before it is abandoned.
    pub max_retries: u32,
    pub scan_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            scan_interval: Duration::from_secs(60),
        }
    }
}

/// Persisted store location and the backoff applied to failing store calls.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Total attempts for one store call issued by a background task.
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("jobs.db"),
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    pub worker_count: usize,
    /// How long an idle worker blocks on the queue before heartbeating.
    pub dequeue_timeout: Duration,
    pub executor: ExecutorConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub recovery: RecoveryPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 15000)),
            worker_count: 4,
            dequeue_timeout: Duration::from_secs(3),
            executor: ExecutorConfig::default(),
            retry: RetryConfig::default(),
            store: StoreConfig::default(),
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(listen_addr: SocketAddr, store_path: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            store: StoreConfig {
                path: store_path.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Set the idle queue wait, raised to at least [`MIN_DEQUEUE_TIMEOUT`].
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout.max(MIN_DEQUEUE_TIMEOUT);
        self
    }

    /// Queue wait workers actually use.
    pub fn effective_dequeue_timeout(&self) -> Duration {
        self.dequeue_timeout.max(MIN_DEQUEUE_TIMEOUT)
    }

    /// An idle worker silent for longer than this is reported as not alive.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.effective_dequeue_timeout() * HEARTBEAT_MISSES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_config_default() {
        let cfg = ExecutorConfig::default();
        assert_eq!(cfg.program, PathBuf::from("bash"));
        assert_eq!(cfg.args, vec!["./dummy_rsync.sh".to_string()]);
        assert_eq!(cfg.timeout, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn executor_config_builder() {
        let cfg = ExecutorConfig::new("sh")
            .with_arg("-c")
            .with_arg("exit 0")
            .with_timeout(None);
        assert_eq!(cfg.program, PathBuf::from("sh"));
        assert_eq!(cfg.args, vec!["-c".to_string(), "exit 0".to_string()]);
        assert!(cfg.timeout.is_none());
    }

    #[test]
    fn retry_config_default() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.scan_interval, Duration::from_secs(60));
    }

    #[test]
    fn store_config_default() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.path, PathBuf::from("jobs.db"));
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.retry_base_delay, Duration::from_millis(100));
    }

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:15000");
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.dequeue_timeout, Duration::from_secs(3));
        assert_eq!(cfg.recovery, RecoveryPolicy::LeaveRunning);
    }

    #[test]
    fn dequeue_timeout_has_a_floor() {
        let cfg = NodeConfig::default().with_dequeue_timeout(Duration::ZERO);
        assert_eq!(cfg.dequeue_timeout, MIN_DEQUEUE_TIMEOUT);

        let mut cfg = NodeConfig::default();
        cfg.dequeue_timeout = Duration::ZERO;
        assert_eq!(cfg.effective_dequeue_timeout(), MIN_DEQUEUE_TIMEOUT);
        assert_eq!(cfg.heartbeat_timeout(), MIN_DEQUEUE_TIMEOUT * 3);

        let cfg = NodeConfig::default().with_dequeue_timeout(Duration::from_millis(500));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn node_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = NodeConfig::new(addr, "/var/lib/transferd/jobs.db").with_workers(8);
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.store.path, PathBuf::from("/var/lib/transferd/jobs.db"));
        assert_eq!(cfg.store.retry_attempts, 3);
        assert_eq!(cfg.worker_count, 8);
    }
}
