pub mod actions;
pub mod config;
pub mod fetch;
pub mod probe;
pub mod refresh;
pub mod state;
pub mod tui;
pub mod types;

use std::time::Duration;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

pub const DEFAULT_EXPORT_FILE: &str = "sockscope_export.csv";

/// Lines buffered per probe session before the subprocess reader waits.
pub const PROBE_CHANNEL_CAPACITY: usize = 64;

/// How long footer status messages stay visible.
pub const STATUS_MESSAGE_TTL: Duration = Duration::from_secs(3);
