use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol address of a single node within a controller's address space,
/// e.g. `ns=3;s="DB_Telemetry"."Active_Power_kW"`.
///
/// Opaque to fieldgate: it is handed back verbatim to the session that
/// produced it. Comparison and hashing are on the raw string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for NodeAddress {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}
