//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::cli::ConfigAction;
use crate::config::Config;

/// Write the default configuration to `path`.
///
/// Refuses to replace an existing file unless `force` is set.
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// The effective configuration at `path` as TOML.
pub fn show(path: &Path) -> Result<String> {
    let config = Config::load_or_default(path)?;
    config.validate()?;
    Ok(config.to_toml()?)
}

pub fn cmd_config(action: ConfigAction, path: &Path, quiet: bool) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => print!("{}", show(path)?),
        ConfigAction::Init { force } => {
            init(path, force)?;
            if !quiet {
                println!("Wrote default configuration to {}", path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bodyscale").join("config.toml");

        init(&path, false).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan]\ntimeout_secs = 30\n").unwrap();

        let err = init(&path, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(Config::load(&path).unwrap().scan.timeout_secs, 30);

        init(&path, true).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_show_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[reconnect]\nmax_attempts = 2\n").unwrap();

        let shown = show(&path).unwrap();
        assert!(shown.contains("max_attempts = 2"));
        assert!(shown.contains("[measurement]"));
    }

    #[test]
    fn test_show_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let shown = show(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(shown, Config::default().to_toml().unwrap());
    }
}
