use crate::{IndexKey, KVStore, KeyEncoder, MemoryBackend, StorageError};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;
use vkube_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use vkube_core::{
    GroupVersionKind, Resource, ResourceEvent, ResourceKey, ResourceVersion, Result, VkubeError,
};

/// Capacity of the watch channel; slower subscribers observe `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 4096;

type IndexFn = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// An in-process cluster API
///
/// Stores objects keyed by (kind, namespace, name) and gives them the API
/// server semantics the sync engine relies on:
/// - `resourceVersion` is bumped on every write and checked on updates
/// - `update` leaves `.status` alone, `update_status` touches only `.status`
/// - deleting an object with finalizers only sets `deletionTimestamp`
/// - registered field indexes are kept current on every write
/// - every mutation is published on a broadcast channel
pub struct Cluster {
    name: String,
    storage: Arc<dyn KVStore>,
    indexes: RwLock<BTreeMap<(GroupVersionKind, String), IndexFn>>,
    write_lock: Mutex<()>,
    next_version: AtomicU64,
    writes: AtomicU64,
    event_tx: broadcast::Sender<ResourceEvent>,
}

impl Cluster {
    /// Create an empty cluster backed by memory
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_storage(name, Arc::new(MemoryBackend::new()))
    }

    /// Create a cluster on top of an existing store
    pub fn with_storage(name: impl Into<String>, storage: Arc<dyn KVStore>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            storage,
            indexes: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
            next_version: AtomicU64::new(1),
            writes: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Name used in logs ("virtual", "host")
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.event_tx.subscribe()
    }

    /// Number of successful mutating calls (create, update, update_status, delete)
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Get an object, failing with `ResourceNotFound` when absent
    pub fn get<T: Resource>(&self, key: &ResourceKey) -> Result<T> {
        self.try_get(key)?
            .ok_or_else(|| VkubeError::resource_not_found(key.to_string()))
    }

    /// Get an object if it exists
    pub fn try_get<T: Resource>(&self, key: &ResourceKey) -> Result<Option<T>> {
        debug!(cluster = %self.name, "Getting resource: {}", key);
        Ok(self.load::<T>(key)?.map(|(_, object)| object))
    }

    /// List objects of a kind, optionally restricted to one namespace
    pub fn list<T: Resource>(&self, namespace: Option<&str>) -> Result<Vec<T>> {
        let namespace = namespace.filter(|_| T::NAMESPACED);
        let prefix = KeyEncoder::encode_prefix(T::API_VERSION, T::KIND, namespace);
        self.storage
            .scan(prefix.as_bytes())?
            .iter()
            .map(|(_, data)| decode(data))
            .collect()
    }

    /// List objects of any kind as raw JSON
    pub fn list_values(&self, gvk: &GroupVersionKind) -> Result<Vec<Value>> {
        let prefix = KeyEncoder::encode_prefix(&gvk.api_version(), &gvk.kind, None);
        self.storage
            .scan(prefix.as_bytes())?
            .iter()
            .map(|(_, data)| decode(data))
            .collect()
    }

    /// Create an object, assigning uid, creationTimestamp and resourceVersion
    pub fn create<T: Resource>(&self, mut resource: T) -> Result<T> {
        validate(&resource)?;
        let key = resource_key(&resource)?;
        info!(cluster = %self.name, "Creating resource: {}", key);

        let _guard = self.write_lock.lock();
        if self.storage.exists(KeyEncoder::encode_resource_key(&key).as_bytes())? {
            return Err(VkubeError::resource_already_exists(key.to_string()));
        }

        {
            let metadata = resource.metadata_mut();
            metadata.uid = Some(Uuid::new_v4().to_string());
            metadata.creation_timestamp = Some(Time(Utc::now()));
            metadata.deletion_timestamp = None;
        }
        let version = self.next_resource_version();
        resource.set_resource_version(ResourceVersion::new(version.clone()));

        let object = encode(&resource)?;
        self.write(&key, None, Some(&object))
            .map_err(|_| VkubeError::resource_already_exists(key.to_string()))?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        info!(cluster = %self.name, "Created resource: {} with version {}", key, version);
        self.publish(ResourceEvent::added(key, object, version));
        Ok(resource)
    }

    /// Replace an object's metadata and spec
    ///
    /// The stored `.status` is kept. If the incoming object carries a
    /// resourceVersion it must match the stored one. Clearing the last
    /// finalizer of an object being deleted removes it.
    pub fn update<T: Resource>(&self, resource: T) -> Result<T> {
        validate(&resource)?;
        let key = resource_key(&resource)?;
        info!(cluster = %self.name, "Updating resource: {}", key);

        let _guard = self.write_lock.lock();
        let (previous, current) = self
            .load::<T>(&key)?
            .ok_or_else(|| VkubeError::resource_not_found(key.to_string()))?;
        check_version(&key, resource.resource_version(), &current)?;

        let mut object = encode(&resource)?;
        let current_object = encode(&current)?;
        replace_status(&mut object, current_object.get("status"));

        let mut updated: T = decode_value(object)?;
        {
            let stored = current.metadata();
            let metadata = updated.metadata_mut();
            metadata.uid = stored.uid.clone();
            metadata.creation_timestamp = stored.creation_timestamp.clone();
            metadata.deletion_timestamp = stored.deletion_timestamp.clone();
        }

        if updated.is_being_deleted() && !updated.has_finalizers() {
            self.write(&key, Some(&previous), None)?;
            self.writes.fetch_add(1, Ordering::SeqCst);
            info!(cluster = %self.name, "Finalizers cleared, removed resource: {}", key);
            let version = current.resource_version().unwrap_or_default();
            self.publish(ResourceEvent::deleted(key, current_object, version.0));
            return Ok(updated);
        }

        let version = self.next_resource_version();
        updated.set_resource_version(ResourceVersion::new(version.clone()));
        let object = encode(&updated)?;
        self.write(&key, Some(&previous), Some(&object))?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        info!(cluster = %self.name, "Updated resource: {} with version {}", key, version);
        self.publish(ResourceEvent::modified(key, object, version));
        Ok(updated)
    }

    /// Replace only the `.status` of an object
    pub fn update_status<T: Resource>(&self, resource: T) -> Result<T> {
        let key = resource_key(&resource)?;
        info!(cluster = %self.name, "Updating status for resource: {}", key);

        let _guard = self.write_lock.lock();
        let (previous, current) = self
            .load::<T>(&key)?
            .ok_or_else(|| VkubeError::resource_not_found(key.to_string()))?;
        check_version(&key, resource.resource_version(), &current)?;

        let mut object = encode(&current)?;
        let incoming = encode(&resource)?;
        replace_status(&mut object, incoming.get("status"));

        let version = self.next_resource_version();
        object["metadata"]["resourceVersion"] = Value::String(version.clone());
        self.write(&key, Some(&previous), Some(&object))?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        info!(
            cluster = %self.name,
            "Updated status for resource: {} with version {}", key, version
        );
        let updated = decode_value(object.clone())?;
        self.publish(ResourceEvent::modified(key, object, version));
        Ok(updated)
    }

    /// Delete an object
    ///
    /// With `precondition` set, the stored resourceVersion must match. An
    /// object that still has finalizers is only marked with a
    /// deletionTimestamp and stays readable until they are cleared.
    pub fn delete<T: Resource>(
        &self,
        key: &ResourceKey,
        precondition: Option<&ResourceVersion>,
    ) -> Result<()> {
        info!(cluster = %self.name, "Deleting resource: {}", key);

        let _guard = self.write_lock.lock();
        let (previous, current) = self
            .load::<T>(key)?
            .ok_or_else(|| VkubeError::resource_not_found(key.to_string()))?;
        check_version(key, precondition.cloned(), &current)?;

        if current.has_finalizers() {
            if current.is_being_deleted() {
                debug!(cluster = %self.name, "Resource {} is already terminating", key);
                return Ok(());
            }

            let mut terminating = current;
            terminating.metadata_mut().deletion_timestamp = Some(Time(Utc::now()));
            let version = self.next_resource_version();
            terminating.set_resource_version(ResourceVersion::new(version.clone()));
            let object = encode(&terminating)?;
            self.write(key, Some(&previous), Some(&object))?;
            self.writes.fetch_add(1, Ordering::SeqCst);

            info!(
                cluster = %self.name,
                "Marked resource {} for deletion, waiting on finalizers", key
            );
            self.publish(ResourceEvent::modified(key.clone(), object, version));
            return Ok(());
        }

        self.write(key, Some(&previous), None)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        info!(cluster = %self.name, "Deleted resource: {}", key);
        let version = current.resource_version().unwrap_or_default();
        self.publish(ResourceEvent::deleted(
            key.clone(),
            encode(&current)?,
            version.0,
        ));
        Ok(())
    }

    /// Store an object verbatim, as an initial state
    ///
    /// Unlike `create`, no uid or timestamps are assigned and a given
    /// resourceVersion is preserved. Seeding does not count as a write.
    pub fn seed<T: Resource>(&self, mut resource: T) -> Result<T> {
        let key = resource_key(&resource)?;
        debug!(cluster = %self.name, "Seeding resource: {}", key);

        let _guard = self.write_lock.lock();
        if resource.resource_version().is_none() {
            resource.set_resource_version(ResourceVersion::new(self.next_resource_version()));
        }
        let object = encode(&resource)?;
        let previous = self
            .storage
            .get(KeyEncoder::encode_resource_key(&key).as_bytes())?;
        self.write(&key, previous.as_ref(), Some(&object))?;

        let version = resource.resource_version().unwrap_or_default();
        self.publish(ResourceEvent::added(key, object, version.0));
        Ok(resource)
    }

    /// Register a field index for kind `T`
    ///
    /// `derive` computes the index values of an object. Objects already in
    /// the store are indexed immediately. Registering a name twice keeps the
    /// first function.
    pub fn register_index<T, F>(&self, index: impl Into<String>, derive: F) -> Result<()>
    where
        T: Resource,
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        let index = index.into();
        let registry_key = (T::gvk(), index.clone());
        if self.indexes.read().contains_key(&registry_key) {
            debug!(cluster = %self.name, "Index {} already registered for {}", index, T::gvk());
            return Ok(());
        }

        let index_fn: IndexFn = Arc::new(move |value: &Value| {
            serde_json::from_value::<T>(value.clone())
                .map(|object| derive(&object))
                .unwrap_or_default()
        });

        let _guard = self.write_lock.lock();
        let prefix = KeyEncoder::encode_prefix(T::API_VERSION, T::KIND, None);
        for (_, data) in self.storage.scan(prefix.as_bytes())? {
            let object: T = decode(&data)?;
            let key = resource_key(&object)?;
            for value in index_fn(&decode::<Value>(&data)?) {
                let entry = IndexKey::field(&index, value, key.clone());
                self.storage
                    .put(entry.encode().as_bytes(), key.storage_key().as_bytes())?;
            }
        }

        info!(cluster = %self.name, "Registered index {} for {}", index, T::gvk());
        self.indexes.write().insert(registry_key, index_fn);
        Ok(())
    }

    /// Look up objects of kind `T` whose index values include `value`
    pub fn get_by_index<T: Resource>(&self, index: &str, value: &str) -> Result<Vec<T>> {
        if !self
            .indexes
            .read()
            .contains_key(&(T::gvk(), index.to_string()))
        {
            return Err(VkubeError::internal_error(format!(
                "Index {} is not registered for {}",
                index,
                T::gvk()
            )));
        }

        let prefix = IndexKey::encode_prefix_for_field(index, value, T::API_VERSION, T::KIND);
        let mut objects = Vec::new();
        for (_, object_key) in self.storage.scan(prefix.as_bytes())? {
            // The object may have been removed since the entry was read
            if let Some(data) = self.storage.get(&object_key)? {
                objects.push(decode(&data)?);
            }
        }
        Ok(objects)
    }

    fn load<T: Resource>(&self, key: &ResourceKey) -> Result<Option<(Bytes, T)>> {
        let storage_key = KeyEncoder::encode_resource_key(key);
        match self.storage.get(storage_key.as_bytes())? {
            Some(data) => {
                let object = decode(&data)?;
                Ok(Some((data, object)))
            }
            None => Ok(None),
        }
    }

    fn next_resource_version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Swap the stored bytes of `key` and maintain its index entries
    fn write(&self, key: &ResourceKey, previous: Option<&Bytes>, next: Option<&Value>) -> Result<()> {
        let storage_key = KeyEncoder::encode_resource_key(key);
        let data = next
            .map(serde_json::to_vec)
            .transpose()
            .map_err(StorageError::from)?;

        let swapped = self.storage.compare_and_swap(
            storage_key.as_bytes(),
            previous.map(|p| p.as_ref()),
            data.as_deref(),
        )?;
        if !swapped {
            return Err(VkubeError::conflict(
                key.to_string(),
                "last read",
                "concurrent write",
            ));
        }

        let old = previous.map(|p| decode::<Value>(p)).transpose()?;
        self.reindex(key, old.as_ref(), next)
    }

    fn reindex(&self, key: &ResourceKey, old: Option<&Value>, new: Option<&Value>) -> Result<()> {
        let indexes = self.indexes.read();
        for ((gvk, index), index_fn) in indexes.iter() {
            if gvk != &key.gvk {
                continue;
            }
            for value in old.map(|o| index_fn(o)).unwrap_or_default() {
                let entry = IndexKey::field(index, value, key.clone());
                self.storage.delete(entry.encode().as_bytes())?;
            }
            for value in new.map(|n| index_fn(n)).unwrap_or_default() {
                let entry = IndexKey::field(index, value, key.clone());
                self.storage
                    .put(entry.encode().as_bytes(), key.storage_key().as_bytes())?;
            }
        }
        Ok(())
    }

    fn publish(&self, event: ResourceEvent) {
        // Best-effort: no subscribers is not an error
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("writes", &self.writes())
            .finish_non_exhaustive()
    }
}

fn resource_key<T: Resource>(resource: &T) -> Result<ResourceKey> {
    resource.resource_key().map_err(|e| {
        VkubeError::invalid_resource(
            e.to_string(),
            "Set metadata.name, and metadata.namespace for namespaced kinds",
        )
    })
}

fn validate<T: Resource>(resource: &T) -> Result<()> {
    resource.validate().map_err(|e| {
        VkubeError::validation_failed(T::KIND, e.to_string(), "Fix the object and resubmit it")
    })
}

fn check_version<T: Resource>(
    key: &ResourceKey,
    expected: Option<ResourceVersion>,
    current: &T,
) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let stored = current.resource_version().unwrap_or_default();
    if expected != stored {
        return Err(VkubeError::conflict(key.to_string(), expected.0, stored.0));
    }
    Ok(())
}

fn replace_status(object: &mut Value, status: Option<&Value>) {
    if let Some(map) = object.as_object_mut() {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status.clone());
            }
            None => {
                map.remove("status");
            }
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value).map_err(StorageError::from)?)
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(data).map_err(StorageError::from)?)
}

fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value).map_err(StorageError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vkube_core::{PersistentVolume, PersistentVolumeClaim, WatchEventType};

    fn pv(name: &str) -> PersistentVolume {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": { "name": name },
            "spec": {
                "capacity": { "storage": "5Gi" },
                "persistentVolumeReclaimPolicy": "Retain"
            }
        }))
        .unwrap()
    }

    fn pvc(namespace: &str, name: &str) -> PersistentVolumeClaim {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": { "name": name, "namespace": namespace }
        }))
        .unwrap()
    }

    fn pv_key(name: &str) -> ResourceKey {
        ResourceKey::cluster_scoped(GroupVersionKind::persistent_volume(), name)
    }

    #[test]
    fn test_create_assigns_identity() {
        let cluster = Cluster::new("host");
        let created = cluster.create(pv("pv-1")).unwrap();

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.creation_timestamp.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert_eq!(cluster.get::<PersistentVolume>(&pv_key("pv-1")).unwrap(), created);
        assert_eq!(cluster.writes(), 1);
    }

    #[test]
    fn test_create_existing_fails() {
        let cluster = Cluster::new("host");
        cluster.create(pv("pv-1")).unwrap();
        let err = cluster.create(pv("pv-1")).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cluster.writes(), 1);
    }

    #[test]
    fn test_get_missing() {
        let cluster = Cluster::new("host");
        assert!(cluster
            .try_get::<PersistentVolume>(&pv_key("nope"))
            .unwrap()
            .is_none());
        assert!(cluster
            .get::<PersistentVolume>(&pv_key("nope"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_update_with_stale_version_conflicts() {
        let cluster = Cluster::new("host");
        let created = cluster.create(pv("pv-1")).unwrap();

        let mut first = created.clone();
        first.metadata.labels = Some([("a".to_string(), "1".to_string())].into());
        cluster.update(first).unwrap();

        let mut stale = created;
        stale.metadata.labels = Some([("a".to_string(), "2".to_string())].into());
        let err = cluster.update(stale).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_update_keeps_status() {
        let cluster = Cluster::new("host");
        let mut created = cluster.create(pv("pv-1")).unwrap();
        created.status = Some(serde_json::from_value(json!({ "phase": "Bound" })).unwrap());
        let with_status = cluster.update_status(created).unwrap();

        let mut changed = with_status.clone();
        changed.status = Some(serde_json::from_value(json!({ "phase": "Failed" })).unwrap());
        changed.spec.as_mut().unwrap().storage_class_name = Some("fast".to_string());
        let updated = cluster.update(changed).unwrap();

        assert_eq!(
            updated.status.as_ref().unwrap().phase.as_deref(),
            Some("Bound")
        );
        assert_eq!(
            updated.spec.as_ref().unwrap().storage_class_name.as_deref(),
            Some("fast")
        );
        assert_ne!(
            updated.metadata.resource_version,
            with_status.metadata.resource_version
        );
    }

    #[test]
    fn test_update_status_ignores_spec() {
        let cluster = Cluster::new("host");
        let mut created = cluster.create(pv("pv-1")).unwrap();
        created.spec.as_mut().unwrap().storage_class_name = Some("ignored".to_string());
        created.status = Some(serde_json::from_value(json!({ "phase": "Released" })).unwrap());

        let updated = cluster.update_status(created).unwrap();
        assert!(updated.spec.as_ref().unwrap().storage_class_name.is_none());
        assert_eq!(
            updated.status.as_ref().unwrap().phase.as_deref(),
            Some("Released")
        );
    }

    #[test]
    fn test_delete_with_finalizers() {
        let cluster = Cluster::new("host");
        let mut volume = pv("pv-1");
        volume.metadata.finalizers = Some(vec!["kubernetes.io/pv-protection".to_string()]);
        cluster.create(volume).unwrap();

        cluster
            .delete::<PersistentVolume>(&pv_key("pv-1"), None)
            .unwrap();
        let terminating: PersistentVolume = cluster.get(&pv_key("pv-1")).unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());

        // A second delete is a no-op
        cluster
            .delete::<PersistentVolume>(&pv_key("pv-1"), None)
            .unwrap();
        assert_eq!(cluster.writes(), 2);

        let mut released = terminating;
        released.metadata.finalizers = None;
        cluster.update(released).unwrap();
        assert!(cluster
            .try_get::<PersistentVolume>(&pv_key("pv-1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete_precondition() {
        let cluster = Cluster::new("host");
        let created = cluster.create(pv("pv-1")).unwrap();

        let err = cluster
            .delete::<PersistentVolume>(&pv_key("pv-1"), Some(&ResourceVersion::new("0")))
            .unwrap_err();
        assert!(err.is_conflict());

        cluster
            .delete::<PersistentVolume>(&pv_key("pv-1"), created.resource_version().as_ref())
            .unwrap();
        assert!(cluster.list::<PersistentVolume>(None).unwrap().is_empty());
    }

    #[test]
    fn test_seed_preserves_version() {
        let cluster = Cluster::new("virtual");
        let mut volume = pv("pv-1");
        volume.metadata.resource_version = Some("999".to_string());
        cluster.seed(volume).unwrap();

        let stored: PersistentVolume = cluster.get(&pv_key("pv-1")).unwrap();
        assert_eq!(stored.metadata.resource_version.as_deref(), Some("999"));
        assert!(stored.metadata.uid.is_none());
        assert_eq!(cluster.writes(), 0);
    }

    #[test]
    fn test_list_by_namespace() {
        let cluster = Cluster::new("virtual");
        cluster.create(pvc("test", "a")).unwrap();
        cluster.create(pvc("test", "b")).unwrap();
        cluster.create(pvc("other", "c")).unwrap();

        assert_eq!(cluster.list::<PersistentVolumeClaim>(None).unwrap().len(), 3);
        let names: Vec<String> = cluster
            .list::<PersistentVolumeClaim>(Some("test"))
            .unwrap()
            .into_iter()
            .filter_map(|c| c.metadata.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_field_index_follows_writes() {
        let cluster = Cluster::new("virtual");
        cluster.create(pv("existing")).unwrap();
        cluster
            .register_index::<PersistentVolume, _>("storage-class", |pv| {
                pv.spec
                    .as_ref()
                    .and_then(|s| s.storage_class_name.clone())
                    .into_iter()
                    .collect()
            })
            .unwrap();

        let mut volume = cluster.create(pv("pv-1")).unwrap();
        assert!(cluster
            .get_by_index::<PersistentVolume>("storage-class", "fast")
            .unwrap()
            .is_empty());

        volume.spec.as_mut().unwrap().storage_class_name = Some("fast".to_string());
        let volume = cluster.update(volume).unwrap();
        let found = cluster
            .get_by_index::<PersistentVolume>("storage-class", "fast")
            .unwrap();
        assert_eq!(found, vec![volume]);

        cluster
            .delete::<PersistentVolume>(&pv_key("pv-1"), None)
            .unwrap();
        assert!(cluster
            .get_by_index::<PersistentVolume>("storage-class", "fast")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unregistered_index() {
        let cluster = Cluster::new("virtual");
        assert!(cluster
            .get_by_index::<PersistentVolume>("missing", "x")
            .is_err());
    }

    #[test]
    fn test_events_published() {
        let cluster = Cluster::new("host");
        let mut rx = cluster.subscribe();

        let created = cluster.create(pv("pv-1")).unwrap();
        cluster.update(created).unwrap();
        cluster
            .delete::<PersistentVolume>(&pv_key("pv-1"), None)
            .unwrap();

        let kinds: Vec<WatchEventType> = (0..3).map(|_| rx.try_recv().unwrap().event_type).collect();
        assert_eq!(
            kinds,
            vec![
                WatchEventType::Added,
                WatchEventType::Modified,
                WatchEventType::Deleted
            ]
        );
        assert!(rx.try_recv().is_err());
    }
}
