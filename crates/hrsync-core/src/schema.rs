use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

pub const OTHER_CATEGORY: &str = "other";

/// Inferred meaning of a store's header row.
///
/// Every header sits in exactly one place: one of the named role fields or one category
/// bucket. `primary_key` and `employee_name` are always populated; for degenerate header
/// rows they may hold positional placeholders that are not real columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMap {
    pub primary_key: String,
    pub employee_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "whatsapp")]
    pub messaging_handle: Option<String>,
    #[serde(default)]
    pub role_column: Option<String>,
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

impl SchemaMap {
    pub fn named_columns(&self) -> Vec<&str> {
        let mut named = vec![self.primary_key.as_str(), self.employee_name.as_str()];
        named.extend(
            [
                &self.email,
                &self.phone,
                &self.messaging_handle,
                &self.role_column,
            ]
            .into_iter()
            .flatten()
            .map(String::as_str),
        );
        named
    }

    pub fn category_of(&self, column: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|(_, columns)| columns.iter().any(|c| c == column))
            .map(|(tag, _)| tag.as_str())
    }

    /// True when each header is placed exactly once and every categorized column is a
    /// real header.
    pub fn is_partition_of(&self, headers: &[String]) -> bool {
        let mut placements: HashMap<&str, usize> = HashMap::new();
        for column in self.named_columns() {
            *placements.entry(column).or_default() += 1;
        }
        for columns in self.categories.values() {
            for column in columns {
                if !headers.contains(column) {
                    return false;
                }
                *placements.entry(column.as_str()).or_default() += 1;
            }
        }
        headers
            .iter()
            .all(|header| placements.get(header.as_str()).copied() == Some(1))
    }

    pub fn has_primary_key_in(&self, headers: &[String]) -> bool {
        headers.iter().any(|header| header == &self.primary_key)
    }
}
