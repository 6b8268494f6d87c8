use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    created: Instant,
    value: V,
}

/// Time bounded memo for search results. Purely a latency optimization:
/// a miss always recomputes the same answer.
#[derive(Debug)]
pub struct ResultCache<V> {
    ttl: Duration,
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Returns a fresh entry. An expired entry is evicted and reported as a
    /// miss.
    pub fn get(&self, key: &str) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if entry.created.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
        }
        self.entries
            .remove_if(key, |_, entry| entry.created.elapsed() >= self.ttl);
        None
    }

    pub fn set(&self, key: String, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                created: Instant::now(),
                value,
            },
        );
    }

    /// Evicts every expired entry. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.created.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds an order independent signature `operation:k1:v1,k2:v2` from the
/// logical parameters of a request. Object keys are sorted at every level;
/// `agent` is not part of the signature since it does not change a result.
pub fn generate_key(operation: &str, params: &Value) -> String {
    let fields = match params {
        Value::Object(map) => {
            let mut names: Vec<&String> = map.keys().filter(|k| *k != "agent").collect();
            names.sort();
            names
                .into_iter()
                .map(|name| format!("{name}:{}", canonical(&map[name])))
                .collect::<Vec<_>>()
                .join(",")
        }
        other => canonical(other),
    };
    format!("{operation}:{fields}")
}

fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            let fields: Vec<String> = names
                .into_iter()
                .map(|name| format!("{}:{}", Value::String(name.clone()), canonical(&map[name])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_order_independent() {
        let mut a = serde_json::Map::new();
        a.insert("pattern".to_string(), json!("main"));
        a.insert("path".to_string(), json!("src"));
        a.insert("filter".to_string(), json!({"b": 1, "a": [1, 2]}));
        let mut b = serde_json::Map::new();
        b.insert("filter".to_string(), json!({"a": [1, 2], "b": 1}));
        b.insert("path".to_string(), json!("src"));
        b.insert("pattern".to_string(), json!("main"));

        assert_eq!(
            generate_key("search_files", &Value::Object(a)),
            generate_key("search_files", &Value::Object(b))
        );
    }

    #[test]
    fn test_key_format_and_agent_exclusion() {
        let key = generate_key(
            "search_files",
            &json!({"pattern": "main", "agent": "a", "max_results": 5}),
        );
        assert_eq!(key, r#"search_files:max_results:5,pattern:"main""#);
        assert_eq!(
            key,
            generate_key(
                "search_files",
                &json!({"agent": "b", "pattern": "main", "max_results": 5})
            )
        );
        assert_ne!(key, generate_key("search_content", &json!({"pattern": "main", "max_results": 5})));
        assert_ne!(key, generate_key("search_files", &json!({"pattern": "main", "max_results": 6})));
    }

    #[test]
    fn test_get_returns_stored_value() {
        let cache = ResultCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("k"), None::<u32>);
        cache.set("k".to_string(), 7u32);
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_evicted_on_get() {
        let cache = ResultCache::new(Duration::from_millis(20));
        cache.set("k".to_string(), "v".to_string());
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_sweeps_expired_entries() {
        let cache = ResultCache::new(Duration::from_millis(20));
        cache.set("old".to_string(), 1);
        std::thread::sleep(Duration::from_millis(40));
        cache.set("new".to_string(), 2);

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.get("new"), Some(2));
        cache.clear();
        assert!(cache.is_empty());
    }
}
