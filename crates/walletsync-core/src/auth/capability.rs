use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One UCAN grant: an action on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    #[serde(alias = "with")]
    pub resource: String,
    #[serde(alias = "can")]
    pub action: String,
}

impl Capability {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

/// Stable digest of a capability set. Order and duplicates do not matter.
pub fn caps_key(caps: &[Capability]) -> String {
    let canonical: BTreeSet<String> = caps
        .iter()
        .map(|cap| format!("{}#{}", cap.resource, cap.action))
        .collect();
    let joined = canonical.into_iter().collect::<Vec<_>>().join("\n");
    hex::encode(Sha256::digest(joined.as_bytes()))
}
