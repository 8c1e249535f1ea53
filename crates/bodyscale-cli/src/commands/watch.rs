//! Watch command implementation.
//!
//! Connects to a scale (the one given with `--device`, else the remembered
//! one, else the first scale found) and prints every accepted measurement.
//! Reconnection is left to the engine; the command only stops on Ctrl+C,
//! when `--duration` or `--count` is reached, or once the engine has settled
//! with nothing more to try.

use std::future::Future;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use bodyscale_core::{
    BtleplugTransport, ConnectionState, DeviceIdentity, DeviceRegistry, ErrorCode, FileStore,
    ScaleEngine, ScaleEvent, ScaleHandle,
};
use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_event_json, format_measurement_text};

/// How long an idle engine gets to schedule a reconnection before the
/// command gives up.
const SETTLE_GRACE: Duration = Duration::from_millis(500);

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub device: Option<String>,
    pub duration: Option<Duration>,
    pub count: u32,
    pub format: OutputFormat,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
    pub config: &'a Config,
}

pub async fn cmd_watch(args: WatchArgs<'_>, registry_path: &Path) -> Result<()> {
    let registry = DeviceRegistry::open(FileStore::new(registry_path))
        .with_context(|| format!("Failed to open registry {}", registry_path.display()))?;
    let handle = ScaleEngine::spawn(
        BtleplugTransport::new(),
        registry,
        args.config.engine_config(),
    )
    .await
    .context("Failed to start the Bluetooth engine")?;

    let result = watch(&handle, &args, &mut io::stdout(), ctrl_c()).await;
    if let Err(e) = handle.shutdown().await {
        debug!("Engine already stopped: {}", e);
    }
    let accepted = result?;
    if !args.quiet && args.format == OutputFormat::Text {
        eprintln!("Captured {} measurement(s).", accepted);
    }
    Ok(())
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    eprintln!("\nShutting down...");
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive a running engine and write measurements to `out`.
///
/// Returns the number of accepted measurements.
pub async fn watch<W: Write>(
    handle: &ScaleHandle,
    args: &WatchArgs<'_>,
    out: &mut W,
    shutdown: impl Future<Output = ()>,
) -> Result<u32> {
    let mut events = handle.subscribe();
    let mut watcher = Watcher::new(args);
    watcher.pick_first = start(handle, args.device.as_deref()).await?;

    let deadline = args.duration.map(|d| Instant::now() + d);
    let mut settle_at = None;
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => return Ok(watcher.accepted),
            _ = until(deadline) => {
                watcher.status("Duration elapsed");
                return Ok(watcher.accepted);
            }
            _ = until(settle_at) => return watcher.settle(),
            event = events.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                warn!("Missed {} engine events", n);
                continue;
            }
            Err(RecvError::Closed) => bail!("The engine stopped unexpectedly"),
        };

        if let Some(device) = watcher.handle(&event, out)?
            && !handle.select_device(device).await?
        {
            debug!("Selection no longer applies");
        }
        if watcher.is_complete() {
            return Ok(watcher.accepted);
        }
        settle_at = (watcher.idle && !watcher.reconnect_pending)
            .then(|| Instant::now() + SETTLE_GRACE);
    }
}

/// Kick off the session. Returns whether the first scale found should be
/// selected.
async fn start(handle: &ScaleHandle, device: Option<&str>) -> Result<bool> {
    let snapshot = handle.snapshot();
    let auto_target = snapshot.remembered.filter(|_| snapshot.auto_connect);

    match (device, auto_target) {
        (Some(id), Some(target)) if target.matches(id) => Ok(false),
        (Some(id), _) => {
            // Abandon an auto-connect scan for a different scale.
            handle.stop_scan().await?;
            ensure!(
                handle
                    .select_device(DeviceIdentity::new(id, id))
                    .await?,
                "Could not start connecting to {}",
                id
            );
            Ok(false)
        }
        (None, Some(_)) => Ok(false),
        (None, None) => {
            ensure!(handle.start_scan().await?, "Could not start scanning");
            Ok(true)
        }
    }
}

struct Watcher<'a> {
    format: OutputFormat,
    quiet: bool,
    count: u32,
    opts: &'a FormatOptions,
    pick_first: bool,
    picked: bool,
    accepted: u32,
    connected: bool,
    idle: bool,
    reconnect_pending: bool,
    live_line: bool,
    last_error: Option<(String, Option<String>)>,
}

impl<'a> Watcher<'a> {
    fn new(args: &'a WatchArgs<'_>) -> Self {
        Self {
            format: args.format,
            quiet: args.quiet,
            count: args.count,
            opts: args.opts,
            pick_first: false,
            picked: false,
            accepted: 0,
            connected: false,
            idle: false,
            reconnect_pending: false,
            live_line: false,
            last_error: None,
        }
    }

    fn text(&self) -> bool {
        self.format == OutputFormat::Text
    }

    /// Print a status line to stderr.
    fn status(&mut self, message: &str) {
        if self.quiet || !self.text() {
            return;
        }
        self.end_live_line();
        eprintln!("{}", message);
    }

    fn end_live_line(&mut self) {
        if self.live_line {
            eprintln!();
            self.live_line = false;
        }
    }

    /// Update from one event. Returns a device to select, if any.
    fn handle<W: Write>(
        &mut self,
        event: &ScaleEvent,
        out: &mut W,
    ) -> Result<Option<DeviceIdentity>> {
        if self.format == OutputFormat::Json {
            out.write_all(format_event_json(event)?.as_bytes())?;
            out.flush()?;
        }

        match event {
            ScaleEvent::StateChanged { state, device } => {
                self.idle = matches!(state, ConnectionState::Disconnected | ConnectionState::Error);
                self.reconnect_pending = false;
                if state.is_linked() {
                    self.connected = true;
                    self.last_error = None;
                }
                let label = match state {
                    _ if self.opts.no_color => state.to_string(),
                    ConnectionState::Connected | ConnectionState::Reading => {
                        state.green().to_string()
                    }
                    ConnectionState::Error => state.red().to_string(),
                    _ => state.yellow().to_string(),
                };
                match device {
                    Some(device) => self.status(&format!("[{}] {}", label, device)),
                    None => self.status(&format!("[{}]", label)),
                }
            }
            ScaleEvent::DeviceDiscovered { device, .. } if self.pick_first && !self.picked => {
                self.picked = true;
                self.status(&format!("Found {}", device));
                return Ok(Some(device.clone()));
            }
            ScaleEvent::LiveWeight { weight_kg } => {
                if self.text() && !self.quiet {
                    eprint!("\r{:>8.2} kg ", weight_kg);
                    io::stderr().flush()?;
                    self.live_line = true;
                }
            }
            ScaleEvent::MeasurementAccepted { measurement } => {
                self.accepted += 1;
                if self.text() {
                    self.end_live_line();
                    out.write_all(format_measurement_text(measurement, self.opts).as_bytes())?;
                    out.flush()?;
                }
            }
            ScaleEvent::ReconnectScheduled {
                attempt,
                max_attempts,
                delay_ms,
            } => {
                self.reconnect_pending = true;
                self.status(&format!(
                    "Reconnecting in {:.1}s (attempt {}/{})",
                    *delay_ms as f64 / 1000.0,
                    attempt,
                    max_attempts
                ));
            }
            ScaleEvent::ReconnectExhausted { attempts } => {
                self.last_error = Some((
                    format!("Gave up reconnecting after {} attempt(s)", attempts),
                    Some("Step on the scale to wake it, then run watch again".to_string()),
                ));
            }
            ScaleEvent::Error {
                code,
                message,
                suggestion,
                ..
            } => {
                if *code != ErrorCode::DecodeError {
                    self.last_error = Some((message.clone(), suggestion.clone()));
                }
                let line = format!("Error: {}", message);
                if self.opts.no_color {
                    self.status(&line);
                } else {
                    self.status(&line.red().to_string());
                }
            }
            _ => {}
        }
        Ok(None)
    }

    fn is_complete(&self) -> bool {
        self.count > 0 && self.accepted >= self.count
    }

    /// Outcome once the engine has nothing left to do.
    fn settle(&self) -> Result<u32> {
        match &self.last_error {
            Some((message, Some(suggestion))) => Err(anyhow!("{}\n\nTip: {}", message, suggestion)),
            Some((message, None)) => Err(anyhow!("{}", message)),
            None if self.connected => Err(anyhow!("Disconnected from the scale")),
            None => Ok(self.accepted),
        }
    }
}
