//! Command-line interface for Bluetooth body-composition scales.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby scales |
//! | `watch` | Connect and print accepted measurements |
//! | `forget` | Forget the remembered scale |
//! | `auto-connect` | Turn auto-connect on or off |
//! | `status` | Show the remembered scale |
//! | `config` | Show, locate, or initialise the configuration file |
//! | `completions` | Generate shell completions |
//!
//! # Configuration
//!
//! Settings are read from `~/.config/bodyscale/config.toml` (or the platform
//! equivalent, or `--config`). Every key is optional:
//!
//! ```toml
//! [scan]
//! timeout_secs = 10
//! scales_only = true
//!
//! [connection]
//! connect_timeout_secs = 15
//! subscribe_timeout_secs = 10
//!
//! [reconnect]
//! max_attempts = 5
//! delay_ms = 3000
//!
//! [measurement]
//! min_weight_kg = 2.0
//! max_weight_kg = 300.0
//! debounce_ms = 5000
//! stability_tolerance_kg = 0.1
//! stability_count = 3
//! ```
//!
//! The remembered scale lives in `registry.toml` in the same directory as the
//! configuration file in use, unless `[registry] path` says otherwise.
//!
//! # Environment Variables
//!
//! - `BODYSCALE_DEVICE`: Scale to watch (overridden by `--device`)
//! - `BODYSCALE_CONFIG`: Configuration file (overridden by `--config`)
//! - `NO_COLOR`: Disable colored output when set
//!
//! # Examples
//!
//! ```bash
//! bodyscale scan
//! bodyscale watch --device AA:BB:CC:DD:EE:FF --count 1
//! bodyscale watch --json --duration 300
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod format;

pub use bodyscale_core;
