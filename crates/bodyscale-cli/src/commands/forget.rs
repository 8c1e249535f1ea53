//! Forget command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use bodyscale_core::{DeviceIdentity, DeviceRegistry, FileStore};

/// Drop the remembered scale from the registry at `path`.
pub fn forget(path: &Path) -> Result<Option<DeviceIdentity>> {
    let mut registry = DeviceRegistry::open(FileStore::new(path))
        .with_context(|| format!("Failed to open registry {}", path.display()))?;
    registry
        .forget()
        .with_context(|| format!("Failed to update registry {}", path.display()))
}

pub fn cmd_forget(path: &Path, quiet: bool) -> Result<()> {
    match forget(path)? {
        Some(device) => println!("Forgot {}", device),
        None if !quiet => println!("No scale is remembered."),
        None => {}
    }
    Ok(())
}
