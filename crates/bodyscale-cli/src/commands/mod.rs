//! Command implementations for the CLI.

mod config;
mod forget;
mod scan;
mod status;
mod watch;

pub use config::cmd_config;
pub use forget::{cmd_forget, forget};
pub use scan::{cmd_scan, collect};
pub use status::{cmd_auto_connect, cmd_status, set_auto_connect, status};
pub use watch::{WatchArgs, cmd_watch, watch};
