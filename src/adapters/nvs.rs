//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`ConfigStore`]: the setup configuration lives in the
//! `sphere` namespace, the last applied wireless credentials in the
//! `auth` namespace.  On ESP32 the `auth` namespace sits on the
//! encrypted NVS partition; the simulation backend is a plain map.
//! Blobs are postcard-encoded; ESP-IDF NVS commits are atomic per
//! `nvs_commit()`.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigStore, StorageError};
use crate::config::SetupConfig;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "sphere";
const CONFIG_KEY: &str = "setupcfg";
const CRED_NAMESPACE: &str = "auth";
const CRED_KEY: &str = "wifi";

const MAX_BLOB_SIZE: usize = 1024;

#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    ssid: String,
    key: String,
}

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Initialise NVS flash.  On first boot or after a version mismatch
    /// the partition is erased and re-initialised automatically.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase run from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES as i32 || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 {
                warn!("nvs: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK as i32 {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK as i32 {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK as i32 {
                return Err(StorageError::IoError);
            }
            info!("nvs: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("nvs: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    /// Drop stored credentials, e.g. on factory reset.
    pub fn erase_credentials(&mut self) -> Result<(), StorageError> {
        self.delete_blob(CRED_NAMESPACE, CRED_KEY)
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        alloc::format!("{namespace}::{key}")
    }

    // ── Raw blob access ──────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn read_blob(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.store
            .borrow()
            .get(&Self::composite_key(namespace, key))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn delete_blob(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    /// Open an NVS namespace, run a closure with the handle, close it.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let mut ns_buf = [0u8; 16];
        let len = namespace.len().min(15);
        ns_buf[..len].copy_from_slice(&namespace.as_bytes()[..len]);

        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns_buf.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK as i32 {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn key_buf(key: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let len = key.len().min(15);
        buf[..len].copy_from_slice(&key.as_bytes()[..len]);
        buf
    }

    #[cfg(target_os = "espidf")]
    fn read_blob(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let result = Self::with_nvs_handle(namespace, false, |handle| {
            let key_buf = Self::key_buf(key);
            let mut size: usize = 0;

            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    key_buf.as_ptr() as *const _,
                    core::ptr::null_mut(),
                    &mut size,
                )
            };
            if ret != ESP_OK as i32 || size == 0 || size > MAX_BLOB_SIZE {
                return Err(ret);
            }

            let mut buf = alloc::vec![0u8; size];
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    key_buf.as_ptr() as *const _,
                    buf.as_mut_ptr() as *mut _,
                    &mut size,
                )
            };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            Ok(buf)
        });
        result.map_err(|e| {
            if e == ESP_ERR_NVS_NOT_FOUND as i32 {
                StorageError::NotFound
            } else {
                StorageError::IoError
            }
        })
    }

    #[cfg(target_os = "espidf")]
    fn write_blob(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let result = Self::with_nvs_handle(namespace, true, |handle| {
            let key_buf = Self::key_buf(key);
            let ret = unsafe {
                nvs_set_blob(
                    handle,
                    key_buf.as_ptr() as *const _,
                    data.as_ptr() as *const _,
                    data.len(),
                )
            };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            Ok(())
        });
        result.map_err(|e| {
            warn!("nvs: write error {e}");
            StorageError::IoError
        })
    }

    #[cfg(target_os = "espidf")]
    fn delete_blob(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let result = Self::with_nvs_handle(namespace, true, |handle| {
            let key_buf = Self::key_buf(key);
            let ret = unsafe { nvs_erase_key(handle, key_buf.as_ptr() as *const _) };
            if ret != ESP_OK as i32 && ret != ESP_ERR_NVS_NOT_FOUND as i32 {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            Ok(())
        });
        result.map_err(|_| StorageError::IoError)
    }
}

impl ConfigStore for NvsAdapter {
    fn load(&self) -> Result<SetupConfig, StorageError> {
        match self.read_blob(CONFIG_NAMESPACE, CONFIG_KEY) {
            Ok(bytes) => {
                let config: SetupConfig =
                    postcard::from_bytes(&bytes).map_err(|_| StorageError::Corrupted)?;
                info!("nvs: loaded config ({} bytes)", bytes.len());
                Ok(config)
            }
            Err(StorageError::NotFound) => {
                info!("nvs: no stored config, using defaults");
                Ok(SetupConfig::default())
            }
            Err(e) => {
                warn!("nvs: config read failed ({e}), using defaults");
                Ok(SetupConfig::default())
            }
        }
    }

    fn save(&mut self, config: &SetupConfig) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(config).map_err(|_| StorageError::IoError)?;
        self.write_blob(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)?;
        info!("nvs: config saved ({} bytes)", bytes.len());
        Ok(())
    }

    fn save_credentials(&mut self, ssid: &str, key: &str) -> Result<(), StorageError> {
        let creds = StoredCredentials {
            ssid: ssid.into(),
            key: key.into(),
        };
        let bytes = postcard::to_allocvec(&creds).map_err(|_| StorageError::IoError)?;
        self.write_blob(CRED_NAMESPACE, CRED_KEY, &bytes)
    }

    fn load_credentials(&self) -> Result<Option<(String, String)>, StorageError> {
        match self.read_blob(CRED_NAMESPACE, CRED_KEY) {
            Ok(bytes) => {
                let creds: StoredCredentials =
                    postcard::from_bytes(&bytes).map_err(|_| StorageError::Corrupted)?;
                Ok(Some((creds.ssid, creds.key)))
            }
            Err(StorageError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
