//! The remembered scale.
//!
//! The registry holds at most one [`DeviceIdentity`] plus the auto-connect
//! flag. A device is written only the first time a link to it comes up; it
//! stays until the user forgets it.
//!
//! Storage is pluggable through [`RegistryStore`]. [`MemoryStore`] keeps the
//! record in memory; [`FileStore`] persists it as a small TOML file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use bodyscale_types::DeviceIdentity;

/// The persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryRecord {
    /// Connect to the remembered scale automatically.
    pub auto_connect: bool,
    /// The remembered scale.
    pub device: Option<DeviceIdentity>,
}

impl Default for RegistryRecord {
    fn default() -> Self {
        Self {
            device: None,
            auto_connect: true,
        }
    }
}

impl RegistryRecord {
    /// A record remembering `device`.
    pub fn with_device(device: DeviceIdentity) -> Self {
        Self {
            device: Some(device),
            ..Self::default()
        }
    }
}

/// Registry storage errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to read registry file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse registry file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize registry: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write registry file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Registry store is unavailable: {0}")]
    Unavailable(String),
}

/// Backing storage for the registry record.
pub trait RegistryStore: Send + Sync + fmt::Debug {
    /// Load the record. A missing record is the default, not an error.
    fn load(&self) -> Result<RegistryRecord, RegistryError>;

    /// Replace the stored record.
    fn save(&self, record: &RegistryRecord) -> Result<(), RegistryError>;
}

/// In-memory store, for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<RegistryRecord>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with `record`.
    pub fn with_record(record: RegistryRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<RegistryRecord, RegistryError> {
        self.record
            .lock()
            .map(|record| record.clone())
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }

    fn save(&self, record: &RegistryRecord) -> Result<(), RegistryError> {
        let mut stored = self
            .record
            .lock()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        *stored = record.clone();
        Ok(())
    }
}

/// TOML file store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// A store at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for FileStore {
    fn load(&self) -> Result<RegistryRecord, RegistryError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No registry file, starting empty");
            return Ok(RegistryRecord::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| RegistryError::Read {
            path: self.path.clone(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| RegistryError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    fn save(&self, record: &RegistryRecord) -> Result<(), RegistryError> {
        let content = toml::to_string_pretty(record).map_err(RegistryError::Serialize)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RegistryError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(&self.path, content).map_err(|e| RegistryError::Write {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// The remembered device and auto-connect preference.
#[derive(Debug)]
pub struct DeviceRegistry {
    store: Box<dyn RegistryStore>,
    record: RegistryRecord,
}

impl DeviceRegistry {
    /// Open a registry, reading the current record from `store`.
    pub fn open(store: impl RegistryStore + 'static) -> Result<Self, RegistryError> {
        let record = store.load()?;
        if let Some(device) = &record.device {
            debug!(%device, auto_connect = record.auto_connect, "Loaded remembered scale");
        }
        Ok(Self {
            store: Box::new(store),
            record,
        })
    }

    /// An empty, memory-backed registry.
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            record: RegistryRecord::default(),
        }
    }

    /// The remembered device.
    pub fn device(&self) -> Option<&DeviceIdentity> {
        self.record.device.as_ref()
    }

    /// Whether auto-connect is enabled.
    pub fn auto_connect(&self) -> bool {
        self.record.auto_connect
    }

    /// Whether a remembered device should be connected automatically.
    pub fn auto_target(&self) -> Option<&DeviceIdentity> {
        self.record
            .device
            .as_ref()
            .filter(|_| self.record.auto_connect)
    }

    /// The full record.
    pub fn record(&self) -> &RegistryRecord {
        &self.record
    }

    /// Remember `device` if no device is stored yet.
    ///
    /// Returns `true` if the record changed. A stored identity is never
    /// replaced; [`forget`](Self::forget) it first.
    pub fn remember(&mut self, device: &DeviceIdentity) -> Result<bool, RegistryError> {
        if self.record.device.is_some() {
            return Ok(false);
        }
        let mut next = self.record.clone();
        next.device = Some(device.clone());
        self.store.save(&next)?;
        self.record = next;
        info!(%device, "Remembered scale");
        Ok(true)
    }

    /// Drop the remembered device.
    ///
    /// Returns the identity that was forgotten.
    pub fn forget(&mut self) -> Result<Option<DeviceIdentity>, RegistryError> {
        if self.record.device.is_none() {
            return Ok(None);
        }
        let mut next = self.record.clone();
        let forgotten = next.device.take();
        self.store.save(&next)?;
        self.record = next;
        if let Some(device) = &forgotten {
            info!(%device, "Forgot scale");
        }
        Ok(forgotten)
    }

    /// Enable or disable auto-connect.
    pub fn set_auto_connect(&mut self, enabled: bool) -> Result<(), RegistryError> {
        if self.record.auto_connect == enabled {
            return Ok(());
        }
        let mut next = self.record.clone();
        next.auto_connect = enabled;
        self.store.save(&next)?;
        self.record = next;
        Ok(())
    }
}
