//! Scan command implementation.

use std::future::Future;
use std::io::{self, Write};

use anyhow::{Context, Result, anyhow, ensure};
use bodyscale_core::{
    BtleplugTransport, ConnectionState, DeviceRegistry, ScaleEngine, ScaleEvent, ScaleHandle,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, ScanEntry, format_scan_json, format_scan_text};

pub async fn cmd_scan(
    timeout: Option<u64>,
    all: bool,
    format: OutputFormat,
    quiet: bool,
    opts: &FormatOptions,
    config: &Config,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(timeout) = timeout {
        config.scan.timeout_secs = timeout;
    }
    if all {
        config.scan.scales_only = false;
    }
    config.validate()?;

    if !quiet && format == OutputFormat::Text {
        eprintln!(
            "Scanning for scales... ({}s, press Ctrl+C to stop early)",
            config.scan.timeout_secs
        );
    }

    // The registry is not used, so a scan never auto-connects.
    let handle = ScaleEngine::spawn(
        BtleplugTransport::new(),
        DeviceRegistry::in_memory(),
        config.engine_config(),
    )
    .await
    .context("Failed to start the Bluetooth engine")?;

    let result = collect(&handle, stop_signal()).await;
    if let Err(e) = handle.shutdown().await {
        debug!("Engine already stopped: {}", e);
    }
    let devices = result.context("Failed to scan for devices")?;

    let content = match format {
        OutputFormat::Json => format_scan_json(&devices)?,
        OutputFormat::Text => format_scan_text(&devices, opts),
    };
    let mut stdout = io::stdout();
    stdout.write_all(content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn stop_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Scan until the engine's scan timeout or `stop`, collecting each device once.
pub async fn collect(
    handle: &ScaleHandle,
    stop: impl Future<Output = ()>,
) -> Result<Vec<ScanEntry>> {
    let mut events = handle.subscribe();
    ensure!(handle.start_scan().await?, "Could not start scanning");
    tokio::pin!(stop);

    let mut devices = Vec::new();
    let mut last_error = None;
    loop {
        let event = tokio::select! {
            _ = &mut stop => {
                handle.stop_scan().await?;
                break;
            }
            event = events.recv() => event,
        };
        match event {
            Ok(ScaleEvent::DeviceDiscovered { device, rssi }) => {
                debug!(%device, ?rssi, "Discovered");
                devices.push(ScanEntry::new(device, rssi));
            }
            Ok(ScaleEvent::StateChanged {
                state: ConnectionState::Disconnected,
                ..
            }) => break,
            Ok(ScaleEvent::StateChanged {
                state: ConnectionState::Error,
                ..
            }) => {
                return Err(last_error.unwrap_or_else(|| anyhow!("Scan failed")));
            }
            Ok(ScaleEvent::Error { message, .. }) => last_error = Some(anyhow!("{}", message)),
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!("Missed {} scan events", n),
            Err(RecvError::Closed) => break,
        }
    }

    devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bodyscale_core::{EngineConfig, MockPeripheral, MockTransport};

    async fn engine(mock: &MockTransport, config: EngineConfig) -> ScaleHandle {
        ScaleEngine::spawn(mock.clone(), DeviceRegistry::in_memory(), config)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_lists_scales_by_signal() {
        let mock = MockTransport::new();
        mock.add_peripheral(MockPeripheral {
            id: "AA:BB:CC:DD:EE:01".to_string(),
            name: Some("MIBCS".to_string()),
            rssi: Some(-80),
        });
        mock.add_peripheral(MockPeripheral {
            id: "AA:BB:CC:DD:EE:02".to_string(),
            name: Some("XMTZC05HM".to_string()),
            rssi: Some(-45),
        });
        mock.add_peripheral(MockPeripheral {
            id: "AA:BB:CC:DD:EE:03".to_string(),
            name: Some("Headphones".to_string()),
            rssi: Some(-30),
        });
        let handle = engine(&mock, EngineConfig::default()).await;

        let devices = collect(&handle, std::future::pending()).await.unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["AA:BB:CC:DD:EE:02", "AA:BB:CC:DD:EE:01"]);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(mock.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_all_devices() {
        let mock = MockTransport::new();
        mock.add_scale("MIBFS");
        mock.add_peripheral(MockPeripheral {
            id: "AA:BB:CC:DD:EE:03".to_string(),
            name: Some("Headphones".to_string()),
            rssi: None,
        });
        let handle = engine(&mock, EngineConfig::default().all_devices()).await;

        let devices = collect(&handle, std::future::pending()).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].name, "Headphones");
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_nothing_found() {
        let mock = MockTransport::new();
        let handle = engine(&mock, EngineConfig::default()).await;

        let devices = collect(&handle, std::future::pending()).await.unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_stops_early() {
        let mock = MockTransport::new();
        mock.add_scale("MIBFS");
        let handle = engine(
            &mock,
            EngineConfig::default().scan_timeout(Duration::from_secs(60)),
        )
        .await;

        let devices = collect(&handle, tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_reports_scan_failure() {
        let mock = MockTransport::new();
        mock.set_fail_scan(true);
        let handle = engine(&mock, EngineConfig::default()).await;

        assert!(collect(&handle, std::future::pending()).await.is_err());
    }
}
