//! Household fact base.
//!
//! Free-form structured data about the household, loaded once at startup
//! and used verbatim as context for the interrogation decision. No schema
//! is enforced; whatever JSON the file holds is what the decision sees.

use std::path::Path;

/// Immutable household fact base.
#[derive(Debug, Clone)]
pub struct HouseholdFacts {
    data: serde_json::Value,
}

impl HouseholdFacts {
    /// Load facts from a JSON file.
    ///
    /// A missing or unparseable file degrades to an empty fact base with a
    /// warning; the daemon still runs, the decision step just has nothing
    /// to check answers against.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(value) => {
                    tracing::info!(path = %path.display(), "loaded household facts");
                    value
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unparseable fact file; using empty fact base");
                    serde_json::Value::Object(serde_json::Map::new())
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "fact file unavailable; using empty fact base");
                serde_json::Value::Object(serde_json::Map::new())
            }
        };

        Self { data }
    }

    /// Empty fact base.
    pub fn empty() -> Self {
        Self {
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn from_value(data: serde_json::Value) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        match &self.data {
            serde_json::Value::Object(map) => map.is_empty(),
            serde_json::Value::Null => true,
            _ => false,
        }
    }

    /// Serialized form used inside the decision prompt.
    pub fn as_context(&self) -> String {
        serde_json::to_string_pretty(&self.data).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let facts = HouseholdFacts::load(Path::new("/nonexistent/users.json"));
        assert!(facts.is_empty());
        assert_eq!(facts.as_context(), "{}");
    }

    #[test]
    fn test_from_value_round_trips_into_context() {
        let facts = HouseholdFacts::from_value(serde_json::json!({
            "pets": ["cat"],
            "front_door": "red",
        }));
        assert!(!facts.is_empty());
        let context = facts.as_context();
        assert!(context.contains("front_door"));
        assert!(context.contains("red"));
    }

    #[test]
    fn test_unparseable_file_degrades_to_empty() {
        let dir = std::env::temp_dir().join("vigil-facts-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let facts = HouseholdFacts::load(&path);
        assert!(facts.is_empty());
    }
}
