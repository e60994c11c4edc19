use serde::{Deserialize, Serialize};

/// Table wiring for one screen: which table holds the containers, which
/// holds the items, and which item field references the owning container.
///
/// Defaults match the todo board (`lists` owning `items` via `list_id`);
/// other screens (e.g. the firearms checklist watching
/// `firearms_maintenance` / `firearm_verifications`) override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenConfig {
    pub container_table: String,
    pub item_table: String,
    /// Item field holding the owning container's id.
    pub container_ref_field: String,
    /// Container field holding its display title.
    pub title_field: String,
    /// Item field stamped with the creating user's id; drives ownership checks.
    pub owner_field: String,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            container_table: "lists".to_string(),
            item_table: "items".to_string(),
            container_ref_field: "list_id".to_string(),
            title_field: "title".to_string(),
            owner_field: "user_id".to_string(),
        }
    }
}

impl ScreenConfig {
    pub fn new(container_table: impl Into<String>, item_table: impl Into<String>) -> Self {
        Self {
            container_table: container_table.into(),
            item_table: item_table.into(),
            ..Self::default()
        }
    }

    pub fn container_ref_field(mut self, field: impl Into<String>) -> Self {
        self.container_ref_field = field.into();
        self
    }

    pub fn title_field(mut self, field: impl Into<String>) -> Self {
        self.title_field = field.into();
        self
    }

    pub fn owner_field(mut self, field: impl Into<String>) -> Self {
        self.owner_field = field.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_todo_board() {
        let config = ScreenConfig::default();
        assert_eq!(config.container_table, "lists");
        assert_eq!(config.item_table, "items");
        assert_eq!(config.container_ref_field, "list_id");
    }

    #[test]
    fn test_builder_overrides() {
        let config = ScreenConfig::new("firearms_maintenance", "firearm_verifications")
            .container_ref_field("firearm_id")
            .title_field("firearm_name");
        assert_eq!(config.item_table, "firearm_verifications");
        assert_eq!(config.container_ref_field, "firearm_id");
        assert_eq!(config.owner_field, "user_id");
    }
}
