pub const DEFAULT_REDIS_DSN: &str = "redis://localhost:6379/0";
pub const DEFAULT_QUEUE_NAME: &str = "default";

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: f64 = 10.0;
pub const DEFAULT_POLL_DELAY_SECONDS: f64 = 1.0;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_RETRY_DELAY_SECONDS: f64 = 5.0;
pub const DEFAULT_MAX_RETRY_DELAY_SECONDS: f64 = 60.0 * 60.0;
pub const DEFAULT_LEASE_SWEEP_INTERVAL_SECONDS: f64 = 30.0;
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS: f64 = 30.0;
pub const DEFAULT_JOB_DURATION_SECONDS: u64 = 300;
