//! Scenario harness for syncer tests
//!
//! A scenario seeds both clusters, runs one synchronization step and compares
//! the resulting objects of every listed kind with the expected ones.
//! Server-assigned metadata and empty fields are ignored in the comparison.

use crate::context::SyncContext;
use crate::error::Result;
use crate::translate::{Translator, TranslatorConfig};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vkube_core::{
    GroupVersionKind, PersistentVolume, PersistentVolumeClaim, PodDisruptionBudget, Resource,
    ResourceVersion,
};
use vkube_store::Cluster;

/// Resource version every seeded object starts with
pub const FAKE_RESOURCE_VERSION: &str = "999";

pub const TEST_TARGET_NAMESPACE: &str = "test";

pub const TEST_SUFFIX: &str = "suffix";

/// Metadata fields the clusters assign on their own
const SERVER_ASSIGNED_FIELDS: &[&str] = &["resourceVersion", "uid", "creationTimestamp"];

/// An object of any synchronized kind
#[derive(Debug, Clone, PartialEq)]
pub enum TestObject {
    PersistentVolume(PersistentVolume),
    PersistentVolumeClaim(PersistentVolumeClaim),
    PodDisruptionBudget(PodDisruptionBudget),
}

impl TestObject {
    pub fn gvk(&self) -> GroupVersionKind {
        match self {
            Self::PersistentVolume(_) => PersistentVolume::gvk(),
            Self::PersistentVolumeClaim(_) => PersistentVolumeClaim::gvk(),
            Self::PodDisruptionBudget(_) => PodDisruptionBudget::gvk(),
        }
    }

    fn seed(self, cluster: &Cluster) {
        let seeded = match self {
            Self::PersistentVolume(o) => seed_one(cluster, o).map(drop),
            Self::PersistentVolumeClaim(o) => seed_one(cluster, o).map(drop),
            Self::PodDisruptionBudget(o) => seed_one(cluster, o).map(drop),
        };
        if let Err(e) = seeded {
            panic!("failed to seed cluster {}: {}", cluster.name(), e);
        }
    }

    fn to_value(&self) -> Value {
        let value = match self {
            Self::PersistentVolume(o) => serde_json::to_value(o),
            Self::PersistentVolumeClaim(o) => serde_json::to_value(o),
            Self::PodDisruptionBudget(o) => serde_json::to_value(o),
        };
        match value {
            Ok(value) => value,
            Err(e) => panic!("failed to serialize {}: {}", self.gvk(), e),
        }
    }
}

impl From<PersistentVolume> for TestObject {
    fn from(pv: PersistentVolume) -> Self {
        Self::PersistentVolume(pv)
    }
}

impl From<PersistentVolumeClaim> for TestObject {
    fn from(pvc: PersistentVolumeClaim) -> Self {
        Self::PersistentVolumeClaim(pvc)
    }
}

impl From<PodDisruptionBudget> for TestObject {
    fn from(pdb: PodDisruptionBudget) -> Self {
        Self::PodDisruptionBudget(pdb)
    }
}

fn seed_one<T: Resource>(cluster: &Cluster, mut object: T) -> vkube_core::Result<T> {
    if object.resource_version().is_none() {
        object.set_resource_version(ResourceVersion::new(FAKE_RESOURCE_VERSION));
    }
    cluster.seed(object)
}

/// A virtual and a physical cluster wired into a sync context
pub struct TestEnv {
    ctx: SyncContext,
    virtual_cluster: Arc<Cluster>,
    physical_cluster: Arc<Cluster>,
}

impl TestEnv {
    /// Empty clusters, translating into namespace `test` with suffix `suffix`
    pub fn new() -> Self {
        let virtual_cluster = Arc::new(Cluster::new("virtual"));
        let physical_cluster = Arc::new(Cluster::new("host"));
        let translator = Translator::new(TranslatorConfig {
            target_namespace: TEST_TARGET_NAMESPACE.to_string(),
            suffix: TEST_SUFFIX.to_string(),
        });
        let ctx = SyncContext::new(
            virtual_cluster.clone(),
            physical_cluster.clone(),
            translator,
            CancellationToken::new(),
        );
        Self {
            ctx,
            virtual_cluster,
            physical_cluster,
        }
    }

    pub fn ctx(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn virtual_cluster(&self) -> &Cluster {
        &self.virtual_cluster
    }

    pub fn physical_cluster(&self) -> &Cluster {
        &self.physical_cluster
    }

    /// Writes performed on both clusters since they were created; seeding is not counted
    pub fn writes(&self) -> u64 {
        self.virtual_cluster.writes() + self.physical_cluster.writes()
    }

    /// Seed the virtual cluster, defaulting the resource version to `999`
    pub fn seed_virtual(&self, object: TestObject) {
        object.seed(&self.virtual_cluster);
    }

    /// Seed the physical cluster, defaulting the resource version to `999`
    pub fn seed_physical(&self, object: TestObject) {
        object.seed(&self.physical_cluster);
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Expected objects per kind; kinds that are not listed are not compared
pub type ExpectedState = BTreeMap<GroupVersionKind, Vec<TestObject>>;

pub fn state(entries: Vec<(GroupVersionKind, Vec<TestObject>)>) -> ExpectedState {
    entries.into_iter().collect()
}

/// One scenario
pub struct SyncTest {
    pub name: &'static str,
    pub initial_virtual_state: Vec<TestObject>,
    pub initial_physical_state: Vec<TestObject>,
    pub expected_virtual_state: ExpectedState,
    pub expected_physical_state: ExpectedState,
    pub sync: Box<dyn Fn(&TestEnv) -> Result<()>>,
}

/// Run every scenario against fresh clusters, panicking on the first mismatch
pub fn run_tests(tests: Vec<SyncTest>) {
    for test in tests {
        let env = TestEnv::new();
        for object in test.initial_virtual_state {
            env.seed_virtual(object);
        }
        for object in test.initial_physical_state {
            env.seed_physical(object);
        }

        if let Err(e) = (test.sync)(&env) {
            panic!("{}: sync failed: {}", test.name, e);
        }

        compare_state(test.name, env.virtual_cluster(), &test.expected_virtual_state);
        compare_state(test.name, env.physical_cluster(), &test.expected_physical_state);
    }
}

fn compare_state(test: &str, cluster: &Cluster, expected: &ExpectedState) {
    for (gvk, objects) in expected {
        let mut actual: Vec<Value> = match cluster.list_values(gvk) {
            Ok(values) => values.into_iter().map(normalize).collect(),
            Err(e) => panic!("{}: failed to list {} in {}: {}", test, gvk, cluster.name(), e),
        };
        let mut wanted: Vec<Value> = objects.iter().map(|o| normalize(o.to_value())).collect();
        actual.sort_by_key(identity);
        wanted.sort_by_key(identity);

        assert_eq!(
            actual,
            wanted,
            "{}: unexpected {} objects in cluster {}",
            test,
            gvk,
            cluster.name()
        );
    }
}

fn identity(value: &Value) -> (String, String) {
    let field = |name: &str| {
        value["metadata"][name]
            .as_str()
            .unwrap_or_default()
            .to_string()
    };
    (field("namespace"), field("name"))
}

/// Drop server-assigned metadata and prune null or empty fields
pub fn normalize(mut value: Value) -> Value {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_ASSIGNED_FIELDS {
            metadata.remove(*field);
        }
    }
    prune(value).unwrap_or(Value::Null)
}

fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: serde_json::Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            (!pruned.is_empty()).then_some(Value::Object(pruned))
        }
        Value::Array(items) => {
            let pruned: Vec<Value> = items.into_iter().filter_map(prune).collect();
            (!pruned.is_empty()).then_some(Value::Array(pruned))
        }
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize() {
        let value = json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": {
                "name": "pv",
                "resourceVersion": "3",
                "uid": "abc",
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "labels": {},
                "finalizers": []
            },
            "spec": { "claimRef": { "name": "c", "resourceVersion": "999" }, "mountOptions": [null] },
            "status": {}
        });
        assert_eq!(
            normalize(value),
            json!({
                "apiVersion": "v1",
                "kind": "PersistentVolume",
                "metadata": { "name": "pv" },
                "spec": { "claimRef": { "name": "c", "resourceVersion": "999" } }
            })
        );
    }

    #[test]
    fn test_seed_defaults_resource_version() {
        let env = TestEnv::new();
        let mut claim = PersistentVolumeClaim::default();
        claim.metadata.name = Some("data".to_string());
        claim.metadata.namespace = Some("test".to_string());
        env.seed_virtual(claim.into());

        let claims = env
            .virtual_cluster()
            .list::<PersistentVolumeClaim>(None)
            .unwrap();
        assert_eq!(
            claims[0].metadata.resource_version.as_deref(),
            Some(FAKE_RESOURCE_VERSION)
        );
        assert_eq!(env.writes(), 0);
    }

    #[test]
    #[should_panic(expected = "unexpected")]
    fn test_run_tests_reports_mismatch() {
        let mut pv = PersistentVolume::default();
        pv.metadata.name = Some("pv".to_string());
        run_tests(vec![SyncTest {
            name: "mismatch",
            initial_virtual_state: vec![],
            initial_physical_state: vec![],
            expected_virtual_state: state(vec![(PersistentVolume::gvk(), vec![pv.into()])]),
            expected_physical_state: ExpectedState::new(),
            sync: Box::new(|_: &TestEnv| Ok(())),
        }]);
    }
}
