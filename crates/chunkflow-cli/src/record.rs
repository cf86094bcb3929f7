//! The item type flowing through file-driven jobs.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One flat record: named string fields in declaration order.
///
/// Serializes as a JSON object with fields in the order the job config
/// declared them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Record from pre-paired field names and values.
    #[must_use]
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Value of the named field, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// Whether the named field exists and is non-empty.
    #[must_use]
    pub fn has_value(&self, field: &str) -> bool {
        self.get(field).is_some_and(|value| !value.is_empty())
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Record {
        Record::new(vec![
            ("name".into(), "kim".into()),
            ("age".into(), "30".into()),
            ("address".into(), String::new()),
        ])
    }

    #[test]
    fn get_finds_declared_fields() {
        let record = person();
        assert_eq!(record.get("name"), Some("kim"));
        assert_eq!(record.get("age"), Some("30"));
        assert_eq!(record.get("email"), None);
    }

    #[test]
    fn has_value_requires_non_empty() {
        let record = person();
        assert!(record.has_value("name"));
        assert!(!record.has_value("address"));
        assert!(!record.has_value("email"));
    }

    #[test]
    fn serializes_in_declaration_order() {
        let json = serde_json::to_string(&person()).unwrap();
        assert_eq!(json, r#"{"name":"kim","age":"30","address":""}"#);
    }
}
