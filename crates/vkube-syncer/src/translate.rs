//! Identity translation between the virtual and the physical cluster
//!
//! Physical names are deterministic functions of the virtual identity, so the
//! engine can always find a peer again without keeping any state of its own.
//! Origin annotations on the physical object point back at the virtual one.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Longest name a DNS-1123 label may have
pub const MAX_NAME_LENGTH: usize = 63;

/// Name of the virtual object a physical object was created from
pub const OBJECT_NAME_ANNOTATION: &str = "vkube.io/object-name";

/// Namespace of the virtual object a physical object was created from
pub const OBJECT_NAMESPACE_ANNOTATION: &str = "vkube.io/object-namespace";

/// Comma-separated annotation keys the engine copied from the virtual object
pub const MANAGED_ANNOTATIONS_ANNOTATION: &str = "vkube.io/managed-annotations";

/// On a virtual PersistentVolume: name of the host volume it mirrors
pub const HOST_CLUSTER_PERSISTENT_VOLUME_ANNOTATION: &str = "vkube.io/host-persistentvolume";

/// Marker label carried by every physical object the engine created
pub const MANAGED_BY_LABEL: &str = "vkube.io/managed-by";

/// Virtual namespace of a namespaced physical object
pub const NAMESPACE_LABEL: &str = "vkube.io/namespace";

/// Prefix of rewritten label keys
pub const LABEL_PREFIX: &str = "vkube.io/label";

/// Prefix of physical names for cluster-scoped kinds
pub const CLUSTER_SCOPED_PREFIX: &str = "vkube";

/// Label domains owned by the host; keys under them are never rewritten
const HOST_SYSTEM_DOMAINS: &[&str] = &["kubernetes.io", "k8s.io", "vkube.io"];

/// Translator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatorConfig {
    /// Host namespace that receives all namespaced physical objects
    pub target_namespace: String,
    /// Per-instance suffix that keeps several virtual clusters apart
    pub suffix: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            target_namespace: "vkube".to_string(),
            suffix: "vkube".to_string(),
        }
    }
}

/// Join parts with `-`, hashing and truncating results longer than 63 characters
///
/// Truncated names keep the first 52 characters followed by `-` and the first
/// 10 hex digits of the SHA-256 of the full name.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let mut cut = 52;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    let digest = hex::encode(Sha256::digest(full.as_bytes()));
    format!("{}-{}", &full[..cut], &digest[..10]).replace(".-", "-")
}

/// Whether a label key lives under a domain the host owns
pub fn is_host_system_key(key: &str) -> bool {
    let Some((domain, _)) = key.split_once('/') else {
        return false;
    };
    HOST_SYSTEM_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
}

/// Clear the server-assigned and ownership fields of an object's metadata
pub fn reset_object_metadata(metadata: &mut ObjectMeta) {
    metadata.generate_name = None;
    metadata.self_link = None;
    metadata.uid = None;
    metadata.resource_version = None;
    metadata.generation = None;
    metadata.creation_timestamp = None;
    metadata.deletion_timestamp = None;
    metadata.deletion_grace_period_seconds = None;
    metadata.owner_references = None;
    metadata.finalizers = None;
    metadata.managed_fields = None;
}

/// Maps virtual identities and metadata into the physical cluster
#[derive(Debug, Clone)]
pub struct Translator {
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self { config }
    }

    pub fn target_namespace(&self) -> &str {
        &self.config.target_namespace
    }

    pub fn suffix(&self) -> &str {
        &self.config.suffix
    }

    /// Physical name of a namespaced virtual object: `<name>-x-<namespace>-x-<suffix>`
    pub fn physical_name(&self, name: &str, namespace: &str) -> String {
        if name.is_empty() {
            return String::new();
        }
        safe_concat_name(&[name, "x", namespace, "x", &self.config.suffix])
    }

    /// Physical name of a cluster-scoped virtual object
    pub fn physical_name_cluster_scoped(&self, name: &str) -> String {
        if name.is_empty() {
            return String::new();
        }
        safe_concat_name(&[
            CLUSTER_SCOPED_PREFIX,
            name,
            "x",
            &self.config.target_namespace,
            "x",
            &self.config.suffix,
        ])
    }

    /// Whether a physical object carries this instance's managed marker
    pub fn is_managed(&self, metadata: &ObjectMeta) -> bool {
        metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(MANAGED_BY_LABEL))
            .is_some_and(|v| *v == self.config.suffix)
    }

    /// Rewrite a virtual label key into the host label namespace
    pub fn convert_label_key(&self, key: &str) -> String {
        if is_host_system_key(key) {
            return key.to_string();
        }
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        safe_concat_name(&[LABEL_PREFIX, &self.config.suffix, &digest[..10]])
    }

    /// Labels for the physical peer of `virtual_meta`
    ///
    /// Host-system labels already present on `physical_meta` survive unless
    /// the virtual object sets the same key. Rewritten keys are recomputed, so
    /// a label removed from the virtual object disappears.
    pub fn host_labels(
        &self,
        virtual_meta: &ObjectMeta,
        physical_meta: Option<&ObjectMeta>,
    ) -> BTreeMap<String, String> {
        let mut labels: BTreeMap<String, String> = physical_meta
            .and_then(|p| p.labels.as_ref())
            .map(|existing| {
                existing
                    .iter()
                    .filter(|(k, _)| is_host_system_key(k) && !k.starts_with(LABEL_PREFIX))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (key, value) in virtual_meta.labels.iter().flatten() {
            labels.insert(self.convert_label_key(key), value.clone());
        }

        labels.insert(MANAGED_BY_LABEL.to_string(), self.config.suffix.clone());
        match virtual_meta.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(namespace) => {
                labels.insert(NAMESPACE_LABEL.to_string(), namespace.to_string());
            }
            None => {
                labels.remove(NAMESPACE_LABEL);
            }
        }
        labels
    }

    /// Annotations for the physical peer of `virtual_meta`
    ///
    /// Virtual annotations are copied and their keys recorded in
    /// `vkube.io/managed-annotations`. Keys the engine copied earlier but the
    /// virtual object no longer has are dropped, keys the host added survive.
    pub fn host_annotations(
        &self,
        virtual_meta: &ObjectMeta,
        physical_meta: Option<&ObjectMeta>,
    ) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();

        if let Some(existing) = physical_meta.and_then(|p| p.annotations.as_ref()) {
            let previously_managed: BTreeSet<&str> = existing
                .get(MANAGED_ANNOTATIONS_ANNOTATION)
                .map(|keys| keys.split(',').filter(|k| !k.is_empty()).collect())
                .unwrap_or_default();
            for (key, value) in existing {
                if !previously_managed.contains(key.as_str()) && !is_engine_annotation(key) {
                    annotations.insert(key.clone(), value.clone());
                }
            }
        }

        let mut managed = Vec::new();
        for (key, value) in virtual_meta.annotations.iter().flatten() {
            if is_engine_annotation(key) {
                continue;
            }
            annotations.insert(key.clone(), value.clone());
            managed.push(key.as_str());
        }
        if !managed.is_empty() {
            annotations.insert(MANAGED_ANNOTATIONS_ANNOTATION.to_string(), managed.join(","));
        }

        annotations.insert(
            OBJECT_NAME_ANNOTATION.to_string(),
            virtual_meta.name.clone().unwrap_or_default(),
        );
        if let Some(namespace) = virtual_meta.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            annotations.insert(OBJECT_NAMESPACE_ANNOTATION.to_string(), namespace.to_string());
        }
        annotations
    }

    /// Rewrite the keys of a label selector the same way labels are rewritten
    pub fn host_label_selector(&self, selector: Option<&LabelSelector>) -> Option<LabelSelector> {
        let selector = selector?;
        Some(LabelSelector {
            match_labels: selector.match_labels.as_ref().map(|labels| {
                labels
                    .iter()
                    .map(|(k, v)| (self.convert_label_key(k), v.clone()))
                    .collect()
            }),
            match_expressions: selector.match_expressions.as_ref().map(|expressions| {
                expressions
                    .iter()
                    .cloned()
                    .map(|mut requirement| {
                        requirement.key = self.convert_label_key(&requirement.key);
                        requirement
                    })
                    .collect()
            }),
        })
    }

    /// Fresh metadata for a physical object named `name`
    pub fn host_metadata(
        &self,
        virtual_meta: &ObjectMeta,
        name: String,
        namespace: Option<String>,
    ) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace,
            labels: Some(self.host_labels(virtual_meta, None)),
            annotations: Some(self.host_annotations(virtual_meta, None)),
            ..Default::default()
        }
    }

    /// The virtual (namespace, name) a managed physical object came from
    pub fn origin(&self, physical_meta: &ObjectMeta) -> Option<(String, String)> {
        if !self.is_managed(physical_meta) {
            return None;
        }
        let annotations = physical_meta.annotations.as_ref()?;
        let name = annotations.get(OBJECT_NAME_ANNOTATION)?.clone();
        let namespace = annotations
            .get(OBJECT_NAMESPACE_ANNOTATION)
            .cloned()
            .unwrap_or_default();
        Some((namespace, name))
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(TranslatorConfig::default())
    }
}

fn is_engine_annotation(key: &str) -> bool {
    matches!(
        key,
        OBJECT_NAME_ANNOTATION | OBJECT_NAMESPACE_ANNOTATION | MANAGED_ANNOTATIONS_ANNOTATION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn translator() -> Translator {
        Translator::new(TranslatorConfig {
            target_namespace: "test".to_string(),
            suffix: "suffix".to_string(),
        })
    }

    fn meta(
        name: &str,
        namespace: Option<&str>,
        labels: &[(&str, &str)],
        annotations: &[(&str, &str)],
    ) -> ObjectMeta {
        let to_map = |pairs: &[(&str, &str)]| -> Option<BTreeMap<String, String>> {
            (!pairs.is_empty()).then(|| {
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
        };
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(String::from),
            labels: to_map(labels),
            annotations: to_map(annotations),
            ..Default::default()
        }
    }

    #[test]
    fn test_physical_name() {
        let t = translator();
        assert_eq!(t.physical_name("testpvc", "test"), "testpvc-x-test-x-suffix");
        assert_eq!(t.physical_name("", "test"), "");
        assert_eq!(
            t.physical_name_cluster_scoped("testpv"),
            "vkube-testpv-x-test-x-suffix"
        );
    }

    #[test]
    fn test_safe_concat_name_truncates() {
        let name = "a".repeat(60);
        let full = format!("{}-x-test-x-suffix", name);
        let digest = hex::encode(Sha256::digest(full.as_bytes()));

        let result = translator().physical_name(&name, "test");
        assert_eq!(result.len(), 63);
        assert_eq!(result, format!("{}-{}", &full[..52], &digest[..10]));
    }

    #[test]
    fn test_safe_concat_name_removes_dot_dash() {
        // The cut lands right after a dot
        let name = format!("{}.{}", "a".repeat(51), "b".repeat(20));
        let result = safe_concat_name(&[&name]);
        assert!(!result.contains(".-"));
        assert!(result.len() <= MAX_NAME_LENGTH);
    }

    #[test]
    fn test_short_names_unchanged() {
        assert_eq!(safe_concat_name(&["a", "b", "c"]), "a-b-c");
        assert_eq!(safe_concat_name(&["x".repeat(63).as_str()]), "x".repeat(63));
    }

    #[test]
    fn test_convert_label_key() {
        let t = translator();
        let converted = t.convert_label_key("app");
        let digest = hex::encode(Sha256::digest(b"app"));
        assert_eq!(converted, format!("vkube.io/label-suffix-{}", &digest[..10]));

        assert_eq!(
            t.convert_label_key("app.kubernetes.io/name"),
            "app.kubernetes.io/name"
        );
        assert_eq!(t.convert_label_key("node.k8s.io/pool"), "node.k8s.io/pool");
        assert_eq!(t.convert_label_key(MANAGED_BY_LABEL), MANAGED_BY_LABEL);
    }

    #[test]
    fn test_host_labels() {
        let t = translator();
        let virtual_meta = meta("web", Some("team-a"), &[("app", "web")], &[]);
        let physical_meta = meta(
            "web-x-team-a-x-suffix",
            Some("test"),
            &[("topology.kubernetes.io/zone", "z1"), ("stale", "1")],
            &[],
        );

        let labels = t.host_labels(&virtual_meta, Some(&physical_meta));
        assert_eq!(labels.get(&t.convert_label_key("app")).unwrap(), "web");
        assert_eq!(labels.get(MANAGED_BY_LABEL).unwrap(), "suffix");
        assert_eq!(labels.get(NAMESPACE_LABEL).unwrap(), "team-a");
        assert_eq!(labels.get("topology.kubernetes.io/zone").unwrap(), "z1");
        assert!(!labels.contains_key("stale"));

        let relabeled = t.host_labels(
            &meta("web", Some("team-a"), &[], &[]),
            Some(&ObjectMeta {
                labels: Some(labels),
                ..Default::default()
            }),
        );
        assert!(!relabeled.contains_key(&t.convert_label_key("app")));
        assert_eq!(relabeled.get("topology.kubernetes.io/zone").unwrap(), "z1");
    }

    #[test]
    fn test_host_labels_cluster_scoped() {
        let t = translator();
        let labels = t.host_labels(&meta("pv-1", None, &[], &[]), None);
        assert_eq!(labels.len(), 1);
        assert!(t.is_managed(&ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }));
    }

    #[test]
    fn test_host_annotations_bookkeeping() {
        let t = translator();
        let first = t.host_annotations(
            &meta("web", Some("team-a"), &[], &[("a", "1"), ("b", "2")]),
            None,
        );
        assert_eq!(first.get(MANAGED_ANNOTATIONS_ANNOTATION).unwrap(), "a,b");
        assert_eq!(first.get(OBJECT_NAME_ANNOTATION).unwrap(), "web");
        assert_eq!(first.get(OBJECT_NAMESPACE_ANNOTATION).unwrap(), "team-a");

        // The host adds an annotation and the tenant drops "b"
        let mut physical_annotations: Vec<(&str, &str)> =
            first.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        physical_annotations.push(("host.example.com/owner", "ops"));
        let physical_meta = meta("web-x-team-a-x-suffix", Some("test"), &[], &physical_annotations);

        let second = t.host_annotations(
            &meta("web", Some("team-a"), &[], &[("a", "1")]),
            Some(&physical_meta),
        );
        assert_eq!(second.get("a").unwrap(), "1");
        assert!(!second.contains_key("b"));
        assert_eq!(second.get("host.example.com/owner").unwrap(), "ops");
        assert_eq!(second.get(MANAGED_ANNOTATIONS_ANNOTATION).unwrap(), "a");
    }

    #[test]
    fn test_host_label_selector() {
        let t = translator();
        let selector = LabelSelector {
            match_labels: Some([("app".to_string(), "web".to_string())].into()),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["frontend".to_string()]),
            }]),
        };

        let translated = t.host_label_selector(Some(&selector)).unwrap();
        assert_eq!(
            translated
                .match_labels
                .unwrap()
                .get(&t.convert_label_key("app"))
                .unwrap(),
            "web"
        );
        let expressions = translated.match_expressions.unwrap();
        assert_eq!(expressions[0].key, t.convert_label_key("tier"));
        assert_eq!(expressions[0].operator, "In");
        assert!(t.host_label_selector(None).is_none());
    }

    #[test]
    fn test_origin() {
        let t = translator();
        let virtual_meta = meta("web", Some("team-a"), &[], &[]);
        let physical = t.host_metadata(
            &virtual_meta,
            t.physical_name("web", "team-a"),
            Some("test".to_string()),
        );
        assert_eq!(
            t.origin(&physical),
            Some(("team-a".to_string(), "web".to_string()))
        );
        assert_eq!(t.origin(&virtual_meta), None);
    }

    #[test]
    fn test_reset_object_metadata() {
        let mut metadata = ObjectMeta {
            name: Some("pv".to_string()),
            uid: Some("uid".to_string()),
            resource_version: Some("5".to_string()),
            finalizers: Some(vec!["kubernetes.io/pv-protection".to_string()]),
            ..Default::default()
        };
        reset_object_metadata(&mut metadata);
        assert_eq!(metadata.name.as_deref(), Some("pv"));
        assert!(metadata.uid.is_none());
        assert!(metadata.resource_version.is_none());
        assert!(metadata.finalizers.is_none());
    }
}
