use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hrsync_core::SchemaMap;
use tracing::info;

use crate::analyzer::SchemaAnalyzer;

/// Schema map chosen for one sync and whether it was (re)computed for it.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub map: SchemaMap,
    pub refreshed: bool,
}

/// Schema maps keyed by connection id.
///
/// A cached map is reused until the live header row no longer contains its primary key.
/// Analysis runs outside the lock; when two threads race, the last writer wins and both
/// maps are equivalent for the same headers.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: Mutex<HashMap<String, SchemaMap>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, SchemaMap>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed(&self, connection_id: &str, map: SchemaMap) {
        self.entries().insert(connection_id.to_string(), map);
    }

    pub fn get(&self, connection_id: &str) -> Option<SchemaMap> {
        self.entries().get(connection_id).cloned()
    }

    pub fn invalidate(&self, connection_id: &str) {
        self.entries().remove(connection_id);
    }

    pub fn resolve(
        &self,
        connection_id: &str,
        live_headers: &[String],
        analyzer: &SchemaAnalyzer,
    ) -> ResolvedSchema {
        if let Some(map) = self.get(connection_id) {
            if map.has_primary_key_in(live_headers) {
                return ResolvedSchema {
                    map,
                    refreshed: false,
                };
            }
            info!(
                connection_id,
                primary_key = %map.primary_key,
                "primary key missing from live headers, re-analyzing schema"
            );
        }
        let map = analyzer.analyze(live_headers);
        self.seed(connection_id, map.clone());
        ResolvedSchema {
            map,
            refreshed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn reuses_map_while_primary_key_survives() {
        let cache = SchemaCache::new();
        let analyzer = SchemaAnalyzer::deterministic();
        let first = cache.resolve("c1", &headers(&["Emp ID", "Name"]), &analyzer);
        assert!(first.refreshed);

        let second = cache.resolve("c1", &headers(&["Emp ID", "Name", "Dept"]), &analyzer);
        assert!(!second.refreshed);
        assert_eq!(second.map, first.map);
    }

    #[test]
    fn reanalyzes_when_primary_key_disappears() {
        let cache = SchemaCache::new();
        let analyzer = SchemaAnalyzer::deterministic();
        cache.resolve("c1", &headers(&["Emp ID", "Name"]), &analyzer);

        let renamed = cache.resolve("c1", &headers(&["Staff Code", "Name"]), &analyzer);
        assert!(renamed.refreshed);
        assert_eq!(renamed.map.primary_key, "Staff Code");
        assert_eq!(cache.get("c1").map(|m| m.primary_key), Some("Staff Code".to_string()));
    }

    #[test]
    fn connections_are_independent() {
        let cache = SchemaCache::new();
        let analyzer = SchemaAnalyzer::deterministic();
        cache.resolve("a", &headers(&["Emp ID", "Name"]), &analyzer);
        assert!(cache.get("b").is_none());
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
    }
}
