use vkube_core::ResourceKey;
use std::fmt;

/// Key encoder for storage keys
pub struct KeyEncoder;

impl KeyEncoder {
    /// Encode a resource key: {api_version}/{kind}/{namespace}/{name}
    /// For cluster-scoped: {api_version}/{kind}/{name}
    pub fn encode_resource_key(key: &ResourceKey) -> String {
        key.storage_key()
    }

    /// Encode a prefix for scanning resources of a kind, optionally in one namespace
    pub fn encode_prefix(api_version: &str, kind: &str, namespace: Option<&str>) -> String {
        if let Some(ns) = namespace {
            format!("{}/{}/{}/", api_version, kind, ns)
        } else {
            format!("{}/{}/", api_version, kind)
        }
    }
}

/// Secondary index entry
///
/// The stored value of an index entry is the storage key of the indexed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    /// Index by a derived field: field/{index}/{value}/{api_version}/{kind}/{namespace}/{name}
    Field {
        index: String,
        value: String,
        key: ResourceKey,
    },
}

impl IndexKey {
    /// Index entry for `key` under `index` = `value`
    pub fn field(index: impl Into<String>, value: impl Into<String>, key: ResourceKey) -> Self {
        IndexKey::Field {
            index: index.into(),
            value: value.into(),
            key,
        }
    }

    /// Encode the index key to a string
    pub fn encode(&self) -> String {
        match self {
            IndexKey::Field { index, value, key } => {
                format!("field/{}/{}/{}", index, value, key.storage_key())
            }
        }
    }

    /// Encode a prefix for scanning one index value of one kind
    pub fn encode_prefix_for_field(
        index: &str,
        value: &str,
        api_version: &str,
        kind: &str,
    ) -> String {
        format!(
            "field/{}/{}/{}",
            index,
            value,
            KeyEncoder::encode_prefix(api_version, kind, None)
        )
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
