/*!
Durable key-value storage.

The store remembers a few things across page loads, the most important one
being which connector was used last ([`RECENT_CONNECTOR_ID`]). Values are
JSON encoded and keys are namespaced with a prefix so that several
applications can share the same backend.
*/

use crate::error::StorageError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};
use wasm_bindgen::{JsCast as _, JsValue};

/// Key under which the id of the most recently connected connector is kept.
pub const RECENT_CONNECTOR_ID: &str = "recentConnectorId";

pub const DEFAULT_KEY_PREFIX: &str = "dapp";

/// Raw string storage, e.g. the browser's `localStorage`.
#[async_trait(?Send)]
pub trait StorageBackend {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// Prefixed, JSON encoding view over a [`StorageBackend`].
#[derive(Clone)]
pub struct Storage {
    key_prefix: String,
    backend: Arc<dyn StorageBackend>,
}

impl Storage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_key_prefix(DEFAULT_KEY_PREFIX, backend)
    }

    pub fn with_key_prefix(key_prefix: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            backend,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}.{key}", self.key_prefix)
    }

    /// Read and decode a value. A value that can no longer be decoded (e.g.
    /// written by an older version) is reported as absent.
    pub async fn get_item<T>(&self, key: &str) -> Result<Option<T>, StorageError>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.backend.get_item(&self.key(key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                log::debug!("ignoring undecodable storage entry `{key}': {error}");
                Ok(None)
            }
        }
    }

    pub async fn set_item<T>(&self, key: &str, value: &T) -> Result<(), StorageError>
    where
        T: Serialize + ?Sized,
    {
        let raw = serde_json::to_string(value)?;
        self.backend.set_item(&self.key(key), &raw).await
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove_item(&self.key(key)).await
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

/// Process memory backend. Nothing survives a reload.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// raw (prefixed key, encoded value) lookup
    pub fn raw(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait(?Send)]
impl StorageBackend for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.raw(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Backend that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

#[async_trait(?Send)]
impl StorageBackend for NoopStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// The browser's `window.localStorage`.
///
/// Only usable from a web page; every call fails with
/// [`StorageError::Backend`] when there is no `localStorage` (private mode,
/// workers, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorage;

impl LocalStorage {
    fn local_storage() -> Result<JsValue, StorageError> {
        let storage = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("localStorage"))
            .map_err(js_to_storage)?;
        if storage.is_object() {
            Ok(storage)
        } else {
            Err(StorageError::Backend("localStorage is not available".to_owned()))
        }
    }

    fn call(method: &str, args: &[&str]) -> Result<JsValue, StorageError> {
        let storage = Self::local_storage()?;
        let function: js_sys::Function = js_sys::Reflect::get(&storage, &JsValue::from_str(method))
            .map_err(js_to_storage)?
            .dyn_into()
            .map_err(|_| StorageError::Backend(format!("localStorage.{method} is not a function")))?;

        let args: js_sys::Array = args.iter().map(|arg| JsValue::from_str(arg)).collect();
        function.apply(&storage, &args).map_err(js_to_storage)
    }
}

fn js_to_storage(error: JsValue) -> StorageError {
    StorageError::Backend(format!("{error:?}"))
}

#[async_trait(?Send)]
impl StorageBackend for LocalStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(Self::call("getItem", &[key])?.as_string())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        Self::call("setItem", &[key, value]).map(|_| ())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        Self::call("removeItem", &[key]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn values_are_prefixed_and_json_encoded() {
        let backend = Arc::new(MemoryStorage::new());
        let storage = Storage::with_key_prefix("app", backend.clone());

        block_on(storage.set_item(RECENT_CONNECTOR_ID, "lace")).unwrap();

        assert_eq!(
            backend.raw("app.recentConnectorId").as_deref(),
            Some("\"lace\"")
        );
        assert_eq!(
            block_on(storage.get_item::<String>(RECENT_CONNECTOR_ID)).unwrap(),
            Some("lace".to_owned())
        );
    }

    #[test]
    fn undecodable_values_read_as_absent() {
        let backend = Arc::new(MemoryStorage::new());
        block_on(backend.set_item("dapp.recentConnectorId", "not json")).unwrap();

        let storage = Storage::new(backend);
        assert_eq!(
            block_on(storage.get_item::<String>(RECENT_CONNECTOR_ID)).unwrap(),
            None
        );
    }

    #[test]
    fn remove_item() {
        let backend = Arc::new(MemoryStorage::new());
        let storage = Storage::new(backend.clone());

        block_on(storage.set_item("key", &42u32)).unwrap();
        assert_eq!(backend.len(), 1);
        block_on(storage.remove_item("key")).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn noop_storage_forgets() {
        let storage = Storage::new(Arc::new(NoopStorage));
        block_on(storage.set_item("key", &1u8)).unwrap();
        assert_eq!(block_on(storage.get_item::<u8>("key")).unwrap(), None);
    }
}
