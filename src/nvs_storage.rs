//! NVS (Non-Volatile Storage) backend for profiles and device settings.
//! Uses a dedicated custom partition when present, separate from WiFi data.

use crate::error::StorageError;
use crate::storage::{KeyValueStore, MemoryStore};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsCustom};
use esp_idf_svc::sys::EspError;
use log::{debug, info, warn};

// NVS namespace for our application
const NVS_NAMESPACE: &str = "profiler";

fn backend_error(e: EspError) -> StorageError {
    StorageError::Backend(format!("{:?}", e))
}

pub struct NvsStore {
    nvs: EspNvs<NvsCustom>,
}

impl NvsStore {
    pub fn open() -> Result<Self, EspError> {
        // Try to use a custom NVS partition (separate from WiFi)
        // If custom partition doesn't exist, fall back to default
        let partition = EspNvsPartition::<NvsCustom>::take("nvs_custom").or_else(|_| {
            info!("Custom NVS partition not found, using default NVS");
            EspNvsPartition::<NvsCustom>::take("nvs")
        })?;
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }
}

impl KeyValueStore for NvsStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.nvs.set_blob(key, bytes).map_err(backend_error)?;
        debug!("💾 NVS write '{}' ({} bytes)", key, bytes.len());
        Ok(())
    }

    fn get<'a>(&self, key: &str, buf: &'a mut [u8]) -> Result<Option<&'a [u8]>, StorageError> {
        match self.nvs.blob_len(key).map_err(backend_error)? {
            Some(len) if len <= buf.len() => self.nvs.get_blob(key, buf).map_err(backend_error),
            Some(len) => {
                warn!("NVS entry '{}' is {} bytes, larger than expected {}", key, len, buf.len());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        self.nvs.remove(key).map_err(backend_error)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.nvs.contains(key).map_err(backend_error)
    }
}

/// NVS when available, otherwise volatile memory ("mock mode").
pub enum ProfilerStorage {
    Nvs(NvsStore),
    Mock(MemoryStore),
}

impl ProfilerStorage {
    pub fn open() -> Self {
        info!("🗄️ Initializing NVS storage for profiles and settings");
        match NvsStore::open() {
            Ok(store) => {
                info!("✅ Real NVS storage initialized successfully");
                ProfilerStorage::Nvs(store)
            }
            Err(e) => {
                warn!("⚠️ NVS initialization failed: {:?} - using in-memory storage", e);
                ProfilerStorage::Mock(MemoryStore::new())
            }
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, ProfilerStorage::Mock(_))
    }
}

impl KeyValueStore for ProfilerStorage {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        match self {
            ProfilerStorage::Nvs(store) => store.put(key, bytes),
            ProfilerStorage::Mock(store) => store.put(key, bytes),
        }
    }

    fn get<'a>(&self, key: &str, buf: &'a mut [u8]) -> Result<Option<&'a [u8]>, StorageError> {
        match self {
            ProfilerStorage::Nvs(store) => store.get(key, buf),
            ProfilerStorage::Mock(store) => store.get(key, buf),
        }
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        match self {
            ProfilerStorage::Nvs(store) => store.remove(key),
            ProfilerStorage::Mock(store) => store.remove(key),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self {
            ProfilerStorage::Nvs(store) => store.exists(key),
            ProfilerStorage::Mock(store) => store.exists(key),
        }
    }

    fn is_persistent(&self) -> bool {
        !self.is_mock()
    }
}
