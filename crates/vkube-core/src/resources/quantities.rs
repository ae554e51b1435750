use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Parsed resource quantities of a volume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// Storage in bytes
    pub storage_bytes: i128,
}

impl ResourceQuantities {
    /// Parse a byte quantity (e.g., "5Gi", "20G", "1500Mi", "1024")
    pub fn parse_bytes(s: &str) -> Result<i128, String> {
        const BINARY: [(&str, i128); 6] = [
            ("Ki", 1 << 10),
            ("Mi", 1 << 20),
            ("Gi", 1 << 30),
            ("Ti", 1 << 40),
            ("Pi", 1 << 50),
            ("Ei", 1 << 60),
        ];
        const DECIMAL: [(&str, i128); 6] = [
            ("k", 1_000),
            ("M", 1_000_000),
            ("G", 1_000_000_000),
            ("T", 1_000_000_000_000),
            ("P", 1_000_000_000_000_000),
            ("E", 1_000_000_000_000_000_000),
        ];

        let s = s.trim();
        for (suffix, factor) in BINARY.iter().chain(DECIMAL.iter()) {
            if let Some(num) = s.strip_suffix(suffix) {
                return Self::scale(num, *factor);
            }
        }
        Self::scale(s, 1)
    }

    fn scale(num: &str, factor: i128) -> Result<i128, String> {
        if let Ok(n) = num.parse::<i128>() {
            return n
                .checked_mul(factor)
                .ok_or_else(|| format!("Quantity overflows: {}", num));
        }
        // Fractional mantissa, e.g. "1.5Gi"
        num.parse::<f64>()
            .map(|f| (f * factor as f64) as i128)
            .map_err(|e| format!("Invalid quantity '{}': {}", num, e))
    }

    /// Get storage from a resource map (k8s-openapi format)
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Self {
        let storage_bytes = resources
            .get("storage")
            .and_then(|q| Self::parse_bytes(&q.0).ok())
            .unwrap_or(0);

        Self { storage_bytes }
    }
}

/// Semantic equality of two capacity maps.
///
/// Quantities compare by value ("1Gi" == "1024Mi"); unparseable quantities
/// fall back to string comparison.
pub fn capacity_equal(
    a: Option<&BTreeMap<String, Quantity>>,
    b: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let a = a.unwrap_or(&empty);
    let b = b.unwrap_or(&empty);

    if a.len() != b.len() {
        return false;
    }

    a.iter().all(|(name, qa)| match b.get(name) {
        Some(qb) => match (
            ResourceQuantities::parse_bytes(&qa.0),
            ResourceQuantities::parse_bytes(&qb.0),
        ) {
            (Ok(x), Ok(y)) => x == y,
            _ => qa.0 == qb.0,
        },
        None => false,
    })
}
