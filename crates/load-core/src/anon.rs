//! Fingerprint-based field substitution for scrubbing captured queries.
//!
//! The map guarantees that the same original key always receives the same
//! anonymized key, so a scrubbed workload keeps the cache and routing
//! behavior of the original one.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

const REGEXP_SEP: &str = "::";

/// field name -> (original key -> anonymized key).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldsMap(BTreeMap<String, BTreeMap<String, String>>);

impl FieldsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a previously persisted map; an empty path yields an empty map.
    pub fn load(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Ok(Self::new());
        }
        let buf = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&buf)?)
    }

    /// Persists the map as pretty-printed JSON so runs can be resumed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let buf = serde_json::to_string_pretty(self)?;
        fs::write(path, buf)?;
        Ok(())
    }

    /// Returns the anonymous version of `key` within `field`, updating the
    /// backing map so successive calls stay stable. A key that is itself a
    /// previously assigned output is a fixed point, which makes scrubbing
    /// an already-scrubbed document a no-op.
    pub fn anonymize(&mut self, field: &str, key: &str) -> String {
        let inner = self.0.entry(field.to_string()).or_default();
        if let Some(v) = inner.get(key) {
            return v.clone();
        }
        let anon = if inner.values().any(|v| v == key) {
            key.to_string()
        } else {
            // Incremental numbers are fast and good enough here; there is
            // no way back without the map.
            inner.len().to_string()
        };
        inner.insert(key.to_string(), anon.clone());
        anon
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-field regular expressions selecting what to anonymize. Parsed from
/// `field::regex` pairs; a bare field name matches the whole value.
#[derive(Debug, Default)]
pub struct FieldRegexps(BTreeMap<String, Regex>);

impl FieldRegexps {
    pub fn parse(specs: &[String]) -> Result<Self> {
        let mut ret = BTreeMap::new();
        for spec in specs {
            let (field, pattern) = match spec.split_once(REGEXP_SEP) {
                Some((f, p)) => (f, p),
                None => (spec.as_str(), ".*"),
            };
            let re = Regex::new(pattern).map_err(|e| {
                Error::Config(format!("invalid anonymization regex for {field:?}: {e}"))
            })?;
            ret.insert(field.to_string(), re);
        }
        Ok(Self(ret))
    }

    fn get(&self, field: &str) -> Option<&Regex> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Rewrites matching string leaves of arbitrary JSON documents.
#[derive(Debug, Default)]
pub struct Anonymizer {
    pub map: FieldsMap,
    regexps: FieldRegexps,
}

impl Anonymizer {
    pub fn new(map: FieldsMap, regexps: FieldRegexps) -> Self {
        Self { map, regexps }
    }

    /// Recursively walks the document. For every string field whose name
    /// has a configured regex, the first capture group names the key to
    /// replace; every occurrence of it in the value is substituted.
    pub fn anonymize_value(&mut self, value: &mut Value) {
        let Value::Object(obj) = value else { return };
        for (name, v) in obj.iter_mut() {
            match v {
                Value::Object(_) => self.anonymize_value(v),
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        if item.is_object() {
                            self.anonymize_value(item);
                        }
                    }
                }
                Value::String(s) => {
                    let Some(re) = self.regexps.get(name) else { continue };
                    let Some(caps) = re.captures(s) else { continue };
                    let Some(m) = caps.get(1) else { continue };
                    let key = m.as_str().to_string();
                    let anon = self.map.anonymize(name, &key);
                    *s = s.replace(&key, &anon);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anonymizer(specs: &[&str]) -> Anonymizer {
        let specs: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        Anonymizer::new(FieldsMap::new(), FieldRegexps::parse(&specs).unwrap())
    }

    #[test]
    fn substitutes_first_capture_group() {
        let mut a = anonymizer(&["user::([^@]+)@"]);
        let mut doc = json!({"user": "alice@example.com"});
        a.anonymize_value(&mut doc);
        assert_eq!(doc, json!({"user": "0@example.com"}));
    }

    #[test]
    fn second_pass_is_a_fixed_point() {
        let mut a = anonymizer(&["user::([^@]+)@"]);
        let mut doc = json!({"user": "alice@example.com"});
        a.anonymize_value(&mut doc);
        assert_eq!(doc, json!({"user": "0@example.com"}));

        // Scrubbing the scrubbed document with the same map changes nothing.
        a.anonymize_value(&mut doc);
        assert_eq!(doc, json!({"user": "0@example.com"}));
    }

    #[test]
    fn same_key_gets_the_same_assignment() {
        let mut a = anonymizer(&["user::([^@]+)@"]);
        let mut one = json!({"user": "alice@example.com"});
        let mut two = json!({"user": "alice@other.org"});
        a.anonymize_value(&mut one);
        a.anonymize_value(&mut two);
        assert_eq!(one, json!({"user": "0@example.com"}));
        assert_eq!(two, json!({"user": "0@other.org"}));

        let mut three = json!({"user": "bob@example.com"});
        a.anonymize_value(&mut three);
        assert_eq!(three, json!({"user": "1@example.com"}));
    }

    #[test]
    fn recurses_into_objects_and_arrays() {
        let mut a = anonymizer(&["name::(.*)"]);
        let mut doc = json!({
            "query": {"name": "secret"},
            "filters": [{"name": "secret"}, {"name": "other"}],
            "size": 10
        });
        a.anonymize_value(&mut doc);
        assert_eq!(
            doc,
            json!({
                "query": {"name": "0"},
                "filters": [{"name": "0"}, {"name": "1"}],
                "size": 10
            })
        );
    }

    #[test]
    fn map_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anon_map.json");

        let mut map = FieldsMap::new();
        map.anonymize("user", "alice");
        map.anonymize("user", "bob");
        map.save(&path).unwrap();

        let mut reloaded = FieldsMap::load(&path).unwrap();
        assert_eq!(reloaded.anonymize("user", "alice"), "0");
        assert_eq!(reloaded.anonymize("user", "bob"), "1");
        assert_eq!(reloaded.anonymize("user", "carol"), "2");
    }

    #[test]
    fn empty_path_loads_an_empty_map() {
        let map = FieldsMap::load(Path::new("")).unwrap();
        assert!(map.is_empty());
    }
}
