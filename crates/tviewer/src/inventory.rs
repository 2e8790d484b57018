// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device inventory and per-device certificate staging.

use crate::model::Device;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Inventory errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("cannot read device inventory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse device inventory: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid device entry: {0}")]
    Invalid(String),
}

/// Source of the managed device list.
pub trait InventoryStore: Send + Sync {
    /// Every known device.
    fn load_devices(&self) -> Result<Vec<Device>, InventoryError>;
}

/// Inventory kept as a JSON array of devices on disk.
#[derive(Debug, Clone)]
pub struct JsonFileInventory {
    path: PathBuf,
}

impl JsonFileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InventoryStore for JsonFileInventory {
    fn load_devices(&self) -> Result<Vec<Device>, InventoryError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| InventoryError::Io {
            path: self.path.clone(),
            source,
        })?;
        let devices: Vec<Device> = serde_json::from_str(&content)?;
        validate_devices(&devices)?;
        info!(
            "Loaded {} devices from {}",
            devices.len(),
            self.path.display()
        );
        Ok(devices)
    }
}

/// In-memory inventory, used by tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    devices: Vec<Device>,
}

impl StaticInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

impl InventoryStore for StaticInventory {
    fn load_devices(&self) -> Result<Vec<Device>, InventoryError> {
        validate_devices(&self.devices)?;
        Ok(self.devices.clone())
    }
}

/// Reject unnamed devices and duplicate names.
pub fn validate_devices(devices: &[Device]) -> Result<(), InventoryError> {
    let mut seen = HashSet::new();
    for device in devices {
        validate_device(device)?;
        if !seen.insert(device.name.as_str()) {
            return Err(InventoryError::Invalid(format!(
                "duplicate device name '{}'",
                device.name
            )));
        }
    }
    Ok(())
}

pub fn validate_device(device: &Device) -> Result<(), InventoryError> {
    if device.name.trim().is_empty() {
        return Err(InventoryError::Invalid("device with empty name".into()));
    }
    if device.name.contains(['/', '\\']) || device.name.starts_with('.') {
        return Err(InventoryError::Invalid(format!(
            "device name '{}' is not usable as a file name",
            device.name
        )));
    }
    if device.address.trim().is_empty() {
        return Err(InventoryError::Invalid(format!(
            "device '{}' has no address",
            device.name
        )));
    }
    if device.port == 0 {
        return Err(InventoryError::Invalid(format!(
            "device '{}' has port 0",
            device.name
        )));
    }
    Ok(())
}

/// Directory holding one `<device>.pem` per device.
#[derive(Debug, Clone)]
pub struct CertStore {
    dir: PathBuf,
}

impl CertStore {
    /// Open the store, creating the directory if it does not exist yet.
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        debug!("Certificate directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cert_path(&self, device_name: &str) -> PathBuf {
        self.dir.join(format!("{}.pem", device_name))
    }

    /// Point the device at its certificate slot.
    pub fn assign(&self, device: &mut Device) {
        device.cert_path = Some(self.cert_path(&device.name));
    }
}
