use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable identifier of a persisted record.
///
/// The backing store hands out both numeric ids (items) and uuid strings
/// (lists), so ids are kept as opaque strings and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    /// Generate a fresh client-side id for an optimistic insert.
    pub fn random() -> Self {
        RowId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        RowId(s.to_string())
    }
}

impl From<String> for RowId {
    fn from(s: String) -> Self {
        RowId(s)
    }
}

impl From<i64> for RowId {
    fn from(n: i64) -> Self {
        RowId(n.to_string())
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version-less field set of a row. BTreeMap keeps field iteration
/// deterministic, which matters for test assertions and logging.
pub type Fields = BTreeMap<String, Value>;

/// A single persisted record: stable id, owning table, field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub table: String,
    pub fields: Fields,
}

impl Row {
    pub fn new(table: impl Into<String>, id: RowId) -> Self {
        Self {
            id,
            table: table.into(),
            fields: Fields::new(),
        }
    }

    /// Builder-style field assignment, used when composing optimistic inserts.
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String view of a field, `None` when absent or not a string.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Field-level merge: incoming fields overwrite matching local fields,
    /// fields absent from `incoming` are untouched. Fields named in `skip`
    /// keep their local value (they are guarded by an in-flight mutation).
    pub fn merge_fields(&mut self, incoming: &Fields, skip: &BTreeSet<String>) {
        for (name, value) in incoming {
            if skip.contains(name) {
                continue;
            }
            self.fields.insert(name.clone(), value.clone());
        }
    }
}

/// Partial field replacement for an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    fields: Fields,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of the fields this patch touches. These are exactly the fields
    /// guarded against remote overwrites while the update is in flight.
    pub fn field_names(&self) -> BTreeSet<String> {
        self.fields.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_builder_and_accessors() {
        let row = Row::new("items", RowId::from("7"))
            .with("name", json!("clean the range"))
            .with("done", json!(false));

        assert_eq!(row.text("name"), Some("clean the range"));
        assert_eq!(row.bool("done"), Some(false));
        assert_eq!(row.text("missing"), None);
    }

    #[test]
    fn test_merge_skips_guarded_fields() {
        let mut row = Row::new("items", RowId::from("7"))
            .with("name", json!("local name"))
            .with("done", json!(false));

        let mut incoming = Fields::new();
        incoming.insert("name".into(), json!("remote name"));
        incoming.insert("done".into(), json!(true));

        let skip: BTreeSet<String> = ["name".to_string()].into();
        row.merge_fields(&incoming, &skip);

        assert_eq!(row.text("name"), Some("local name"));
        assert_eq!(row.bool("done"), Some(true));
    }

    #[test]
    fn test_merge_leaves_absent_fields_untouched() {
        let mut row = Row::new("items", RowId::from("7"))
            .with("name", json!("n"))
            .with("user_id", json!("u1"));

        let mut incoming = Fields::new();
        incoming.insert("name".into(), json!("n2"));
        row.merge_fields(&incoming, &BTreeSet::new());

        assert_eq!(row.text("user_id"), Some("u1"));
    }

    #[test]
    fn test_patch_field_names() {
        let patch = Patch::new()
            .set("name", json!("x"))
            .set("notes", json!("y"));
        let names = patch.field_names();
        assert!(names.contains("name"));
        assert!(names.contains("notes"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_row_id_is_opaque() {
        assert_eq!(RowId::from(42).as_str(), "42");
        assert_ne!(RowId::random(), RowId::random());
    }
}
