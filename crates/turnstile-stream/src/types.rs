use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Position of an entry in its stream.
pub type EntryId = u64;

/// Flat string fields carried by every entry.
pub type Fields = BTreeMap<String, String>;

/// One record read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub id: EntryId,
    pub created_at_ms: i64,
    pub fields: Fields,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Where a newly created (or reset) group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    /// Deliver everything still in the log.
    Beginning,
    /// Deliver only entries appended from now on.
    Latest,
}
