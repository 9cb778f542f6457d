//! Key-value persistence

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use dias_core::DiasResult;

/// Minimal datastore interface. Keys are `/`-separated paths.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `None` if the key is absent
    async fn get(&self, key: &str) -> DiasResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> DiasResult<()>;

    async fn delete(&self, key: &str) -> DiasResult<()>;

    /// Entries whose key starts with `prefix`, in key order
    async fn query(&self, prefix: &str) -> DiasResult<Vec<(String, Vec<u8>)>>;

    /// Keys starting with `prefix`, in key order
    async fn query_keys(&self, prefix: &str) -> DiasResult<Vec<String>> {
        Ok(self.query(prefix).await?.into_iter().map(|(k, _)| k).collect())
    }
}

/// Ordered in-memory datastore
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> DiasResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> DiasResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> DiasResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn query(&self, prefix: &str) -> DiasResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn query_keys(&self, prefix: &str) -> DiasResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Datastores by collaboration name.
///
/// Reopening a collaboration of the same name on the same node returns the
/// same datastore, so its state survives a stop/start cycle.
#[derive(Clone, Default)]
pub struct DatastoreRegistry {
    stores: Arc<Mutex<HashMap<String, Arc<dyn KvStore>>>>,
}

impl DatastoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<dyn KvStore> {
        let mut stores = self.stores.lock();
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryKv::new()) as Arc<dyn KvStore>);
        Arc::clone(store)
    }

    /// Register an externally provided datastore
    pub fn insert(&self, name: &str, store: Arc<dyn KvStore>) {
        self.stores.lock().insert(name.to_string(), store);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn KvStore>> {
        self.stores.lock().remove(name)
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_query_is_ordered() {
        let kv = MemoryKv::new();
        kv.put("/d:02", vec![2]).await.unwrap();
        kv.put("/d:01", vec![1]).await.unwrap();
        kv.put("/clock", vec![0]).await.unwrap();
        kv.put("/e", vec![9]).await.unwrap();

        let entries = kv.query("/d:").await.unwrap();
        assert_eq!(entries, vec![("/d:01".to_string(), vec![1]), ("/d:02".to_string(), vec![2])]);
        assert_eq!(kv.query_keys("/c").await.unwrap(), vec!["/clock".to_string()]);

        kv.delete("/d:01").await.unwrap();
        assert_eq!(kv.get("/d:01").await.unwrap(), None);
        assert_eq!(kv.len(), 3);
    }

    #[tokio::test]
    async fn test_registry_reuses_stores() {
        let registry = DatastoreRegistry::new();
        let a = registry.get_or_create("collab");
        a.put("/k", vec![1]).await.unwrap();

        let again = registry.get_or_create("collab");
        assert_eq!(again.get("/k").await.unwrap(), Some(vec![1]));
        assert!(registry.get_or_create("other").get("/k").await.unwrap().is_none());
        assert_eq!(registry.len(), 2);
    }
}
