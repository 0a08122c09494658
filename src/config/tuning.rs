//! Hard-coded tuning constants from spec.md §6, grouped here rather than
//! scattered through the modules that consume them. Only `MAX_WORKERS` is
//! exposed through `Config`/env (`FLEETD_MAX_WORKERS`); everything else is
//! a `const`.

use std::time::Duration;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);
pub const HEALTHY_THRESHOLD: Duration = Duration::from_secs(30);
pub const UNHEALTHY_THRESHOLD: Duration = Duration::from_secs(60);
pub const MAX_RESTART_ATTEMPTS: u32 = 3;
pub const MAX_OUTPUT_LINES: usize = 100;
pub const SOFT_AGENT_LIMIT: usize = 50;
pub const HARD_AGENT_LIMIT: usize = 100;
pub const MAX_DEPTH_LEVEL: u32 = 3;
pub const WORKFLOW_PROCESS_INTERVAL_MS: u64 = 5_000;
pub const MAX_CONCURRENT_STEPS: usize = 5;
pub const WEBSOCKET_HEARTBEAT: Duration = Duration::from_secs(30);
pub const WORKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DISMISS_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub const fn default_soft_limit() -> usize {
    SOFT_AGENT_LIMIT
}

pub const fn default_hard_limit() -> usize {
    HARD_AGENT_LIMIT
}

pub const fn default_max_depth() -> u32 {
    MAX_DEPTH_LEVEL
}

pub const fn default_process_interval_ms() -> u64 {
    WORKFLOW_PROCESS_INTERVAL_MS
}

pub const fn default_max_concurrent_steps() -> usize {
    MAX_CONCURRENT_STEPS
}
