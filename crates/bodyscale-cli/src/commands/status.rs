//! Status command implementation.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bodyscale_core::{DeviceRegistry, FileStore};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, StatusReport, format_status_json, format_status_text};

/// Read the registry without touching the radio.
pub fn status(config_path: PathBuf, registry_path: &Path) -> Result<StatusReport> {
    let registry = DeviceRegistry::open(FileStore::new(registry_path))
        .with_context(|| format!("Failed to open registry {}", registry_path.display()))?;
    Ok(StatusReport {
        device: registry.device().cloned(),
        auto_connect: registry.auto_connect(),
        config_path,
        registry_path: registry_path.to_path_buf(),
    })
}

/// Turn auto-connect on or off in the registry at `path`.
pub fn set_auto_connect(registry_path: &Path, enabled: bool) -> Result<()> {
    let mut registry = DeviceRegistry::open(FileStore::new(registry_path))
        .with_context(|| format!("Failed to open registry {}", registry_path.display()))?;
    registry
        .set_auto_connect(enabled)
        .with_context(|| format!("Failed to update registry {}", registry_path.display()))
}

pub fn cmd_auto_connect(registry_path: &Path, enabled: bool, quiet: bool) -> Result<()> {
    set_auto_connect(registry_path, enabled)?;
    if !quiet {
        println!("Auto-connect {}", if enabled { "enabled" } else { "disabled" });
    }
    Ok(())
}

pub fn cmd_status(
    config_path: PathBuf,
    registry_path: &Path,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<()> {
    let report = status(config_path, registry_path)?;
    let content = match format {
        OutputFormat::Json => format_status_json(&report)?,
        OutputFormat::Text => format_status_text(&report, opts),
    };
    let mut stdout = io::stdout();
    stdout.write_all(content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bodyscale_core::{DeviceIdentity, RegistryRecord, RegistryStore};

    #[test]
    fn test_status_reads_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        let record = RegistryRecord {
            auto_connect: false,
            device: Some(DeviceIdentity::new("AA:BB:CC:DD:EE:FF", "MIBCS")),
        };
        FileStore::new(&path).save(&record).unwrap();

        let report = status(dir.path().join("config.toml"), &path).unwrap();
        assert_eq!(report.device, record.device);
        assert!(!report.auto_connect);
        assert_eq!(report.registry_path, path);
    }

    #[test]
    fn test_status_defaults_without_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");

        let report = status(dir.path().join("config.toml"), &path).unwrap();
        assert_eq!(report.device, None);
        assert!(report.auto_connect);
        assert!(!path.exists());
    }

    #[test]
    fn test_set_auto_connect_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");

        set_auto_connect(&path, false).unwrap();
        assert!(!FileStore::new(&path).load().unwrap().auto_connect);
        assert!(!status(dir.path().join("config.toml"), &path).unwrap().auto_connect);

        set_auto_connect(&path, true).unwrap();
        assert!(FileStore::new(&path).load().unwrap().auto_connect);
    }
}
