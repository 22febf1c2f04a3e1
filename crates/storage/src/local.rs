#[cfg(target_arch = "wasm32")]
mod wasm_storage {
    use wasm_bindgen::JsCast;
    use wasm_bindgen::JsValue;

    use crate::{KeyValueStore, StorageError};

    /// Browser `localStorage` for the current origin.
    #[derive(Debug)]
    pub struct LocalStorageStore {
        storage: web_sys::Storage,
    }

    impl LocalStorageStore {
        pub fn new() -> Result<Self, StorageError> {
            Ok(Self {
                storage: window_local_storage()?,
            })
        }
    }

    impl KeyValueStore for LocalStorageStore {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.storage
                .get_item(key)
                .map_err(|e| js_error("get_item", e))
        }

        fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
            self.storage
                .set_item(key, value)
                .map_err(|e| js_error("set_item", e))
        }

        fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
            self.storage
                .remove_item(key)
                .map_err(|e| js_error("remove_item", e))
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            let len = self.storage.length().map_err(|e| js_error("length", e))?;
            let mut out = Vec::with_capacity(len as usize);
            for i in 0..len {
                if let Some(k) = self.storage.key(i).map_err(|e| js_error("key", e))? {
                    out.push(k);
                }
            }
            out.sort();
            Ok(out)
        }
    }

    fn js_error(op: &str, e: JsValue) -> StorageError {
        if let Some(dom) = e.dyn_ref::<web_sys::DomException>() {
            // Firefox reports NS_ERROR_DOM_QUOTA_REACHED, everyone else QuotaExceededError.
            let name = dom.name();
            if name == "QuotaExceededError" || name == "NS_ERROR_DOM_QUOTA_REACHED" {
                return StorageError::QuotaExceeded;
            }
        }
        StorageError::Io(format!("{op} failed: {e:?}"))
    }

    fn window_local_storage() -> Result<web_sys::Storage, StorageError> {
        let win = web_sys::window().ok_or(StorageError::Unavailable)?;
        win.local_storage()
            .map_err(|e| StorageError::Io(format!("localStorage error: {e:?}")))?
            .ok_or(StorageError::Unavailable)
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_storage::LocalStorageStore;

#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug)]
pub struct LocalStorageStore;

#[cfg(not(target_arch = "wasm32"))]
impl LocalStorageStore {
    pub fn new() -> Result<Self, crate::StorageError> {
        Err(crate::StorageError::Unavailable)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl crate::KeyValueStore for LocalStorageStore {
    fn get_item(&self, _key: &str) -> Result<Option<String>, crate::StorageError> {
        Err(crate::StorageError::Unavailable)
    }

    fn set_item(&mut self, _key: &str, _value: &str) -> Result<(), crate::StorageError> {
        Err(crate::StorageError::Unavailable)
    }

    fn remove_item(&mut self, _key: &str) -> Result<(), crate::StorageError> {
        Err(crate::StorageError::Unavailable)
    }

    fn keys(&self) -> Result<Vec<String>, crate::StorageError> {
        Err(crate::StorageError::Unavailable)
    }
}
