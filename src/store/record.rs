//! Partial records handed to the recorder at each milestone.

use serde::Serialize;

/// Column holding the upsert key.
pub const ID_COLUMN: &str = "user_id";

/// An ordered set of `field → value` pairs for one participant.
///
/// Field order matters: when the recorder grows the header row, new
/// columns are appended in the order fields were first set here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialRecord {
    user_id: String,
    fields: Vec<(String, String)>,
}

impl PartialRecord {
    /// Start a record keyed by `user_id`. The id is always the first field.
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            fields: vec![(ID_COLUMN.to_string(), user_id.clone())],
            user_id,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Set a field, replacing any earlier value in place.
    pub fn set(&mut self, field: impl Into<String>, value: impl ToString) {
        let field = field.into();
        let value = value.to_string();
        if field == ID_COLUMN {
            self.user_id = value.clone();
        }
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Field names in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(f, _)| f.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_first_field() {
        let record = PartialRecord::new("u1").with("status", "a");
        assert_eq!(record.field_names().collect::<Vec<_>>(), ["user_id", "status"]);
        assert_eq!(record.get("user_id"), Some("u1"));
    }

    #[test]
    fn set_replaces_in_place() {
        let record = PartialRecord::new("u1")
            .with("status", "a")
            .with("x", 1)
            .with("status", "b");
        assert_eq!(record.fields().len(), 3);
        assert_eq!(record.get("status"), Some("b"));
        assert_eq!(
            record.field_names().collect::<Vec<_>>(),
            ["user_id", "status", "x"]
        );
    }

    #[test]
    fn overriding_id_field_updates_key() {
        let record = PartialRecord::new("u1").with(ID_COLUMN, "u2");
        assert_eq!(record.user_id(), "u2");
        assert_eq!(record.fields().len(), 1);
    }
}
