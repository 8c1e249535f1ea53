//! Output formatting for text and JSON.

use std::path::PathBuf;

use anyhow::Result;
use bodyscale_core::{AcceptedMeasurement, DeviceIdentity, ScaleEvent};
use owo_colors::OwoColorize;
use serde::Serialize;
use time::macros::format_description;

/// Formatting options shared by all commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    pub no_color: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self { no_color }
    }
}

/// A device found by `scan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEntry {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

impl ScanEntry {
    pub fn new(device: DeviceIdentity, rssi: Option<i16>) -> Self {
        Self {
            id: device.id,
            name: device.display_name,
            rssi,
        }
    }
}

/// What `status` reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub device: Option<DeviceIdentity>,
    pub auto_connect: bool,
    pub config_path: PathBuf,
    pub registry_path: PathBuf,
}

pub fn format_scan_text(devices: &[ScanEntry], opts: &FormatOptions) -> String {
    if devices.is_empty() {
        return "No scales found.\n".to_string();
    }

    let name_width = devices
        .iter()
        .map(|d| d.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = format!("{:<name_width$}  {:<6}  ADDRESS\n", "NAME", "RSSI");
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        let name = format!("{:<name_width$}", device.name);
        if opts.no_color {
            out.push_str(&format!("{}  {:<6}  {}\n", name, rssi, device.id));
        } else {
            out.push_str(&format!("{}  {:<6}  {}\n", name.green(), rssi, device.id.cyan()));
        }
    }
    out.push_str(&format!("\nFound {} device(s)\n", devices.len()));
    out
}

pub fn format_scan_json(devices: &[ScanEntry]) -> Result<String> {
    Ok(serde_json::to_string_pretty(devices)? + "\n")
}

/// One line per accepted measurement.
pub fn format_measurement_text(measurement: &AcceptedMeasurement, opts: &FormatOptions) -> String {
    let timestamp = measurement
        .timestamp
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| measurement.timestamp.to_string());
    let weight = format!("{:.2} kg", measurement.weight_kg);
    let weight = if opts.no_color {
        weight
    } else {
        weight.bold().to_string()
    };

    match measurement.impedance_ohm {
        Some(ohm) => format!("{}  {}  impedance {:.0} \u{3a9}\n", timestamp, weight, ohm),
        None => format!("{}  {}\n", timestamp, weight),
    }
}

/// Serialize an event as a single JSON line.
pub fn format_event_json(event: &ScaleEvent) -> Result<String> {
    Ok(serde_json::to_string(event)? + "\n")
}

pub fn format_status_text(status: &StatusReport, opts: &FormatOptions) -> String {
    let device = match &status.device {
        Some(device) if opts.no_color => device.to_string(),
        Some(device) => device.green().to_string(),
        None => "none".to_string(),
    };
    let auto_connect = if status.auto_connect { "on" } else { "off" };

    format!(
        "Remembered scale: {}\nAuto-connect:     {}\nConfig file:      {}\nRegistry file:    {}\n",
        device,
        auto_connect,
        status.config_path.display(),
        status.registry_path.display()
    )
}

pub fn format_status_json(status: &StatusReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(status)? + "\n")
}
