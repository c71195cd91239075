//! Byte-oriented key-value persistence port.

use crate::error::StorageError;
use crate::system::config::{DeviceSettings, SETTINGS_VERSION};
use log::{debug, info, warn};
use std::collections::HashMap;

pub const SETTINGS_KEY: &str = "settings";
const SETTINGS_BUF_LEN: usize = 512;

pub trait KeyValueStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Read a value into `buf`. Values that do not fit are reported as absent.
    fn get<'a>(&self, key: &str, buf: &'a mut [u8]) -> Result<Option<&'a [u8]>, StorageError>;

    fn remove(&mut self, key: &str) -> Result<bool, StorageError>;

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Read a value of exactly `buf.len()` bytes. Any other length counts as absent.
    fn get_exact(&self, key: &str, buf: &mut [u8]) -> Result<bool, StorageError> {
        let expected = buf.len();
        Ok(matches!(self.get(key, buf)?, Some(data) if data.len() == expected))
    }

    /// False when writes are not expected to survive a power cycle.
    fn is_persistent(&self) -> bool {
        true
    }
}

/// Volatile store used when no flash backend is available, and in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to a stored value, e.g. to corrupt it in tests.
    pub fn raw_mut(&mut self, key: &str) -> Option<&mut Vec<u8>> {
        self.entries.get_mut(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get<'a>(&self, key: &str, buf: &'a mut [u8]) -> Result<Option<&'a [u8]>, StorageError> {
        match self.entries.get(key) {
            Some(value) if value.len() <= buf.len() => {
                let out = &mut buf[..value.len()];
                out.copy_from_slice(value);
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.contains_key(key))
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// Load persisted settings, falling back to defaults when absent or unreadable.
pub fn load_settings<K: KeyValueStore + ?Sized>(store: &K) -> DeviceSettings {
    let mut buf = [0u8; SETTINGS_BUF_LEN];
    let data = match store.get(SETTINGS_KEY, &mut buf) {
        Ok(Some(data)) => data,
        Ok(None) => {
            info!("No stored settings, using defaults");
            return DeviceSettings::default();
        }
        Err(e) => {
            warn!("Failed to read settings: {} - using defaults", e);
            return DeviceSettings::default();
        }
    };

    match serde_json::from_slice::<DeviceSettings>(data) {
        Ok(settings) if settings.version == SETTINGS_VERSION => {
            info!("📂 Loaded device settings");
            settings
        }
        Ok(settings) => {
            warn!(
                "Settings version {} not supported (expected {}), using defaults",
                settings.version, SETTINGS_VERSION
            );
            DeviceSettings::default()
        }
        Err(e) => {
            warn!("Stored settings unreadable: {} - using defaults", e);
            DeviceSettings::default()
        }
    }
}

pub fn save_settings<K: KeyValueStore + ?Sized>(store: &mut K, settings: &DeviceSettings) -> Result<(), StorageError> {
    let data = serde_json::to_vec(settings).map_err(|e| StorageError::Backend(e.to_string()))?;
    store.put(SETTINGS_KEY, &data)?;
    debug!("💾 Saved settings ({} bytes)", data.len());
    Ok(())
}
