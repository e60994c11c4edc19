use serde::{Deserialize, Serialize};

use crate::core::{Result, Row, SyncError};

/// Access level of the signed-in employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// May manage containers and any item.
    Admin,
    /// May create items and mutate their own.
    Staff,
}

/// Identity of the signed-in user, resolved once by the auth provider and
/// passed explicitly to each screen at mount. Deliberately not a
/// process-wide singleton: two screens may run under different sessions
/// (e.g. in tests), and nothing below the screen should reach into ambient
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn owns(&self, row: &Row, owner_field: &str) -> bool {
        row.text(owner_field) == Some(self.user_id.as_str())
    }

    /// Items are editable by their creator or an admin. Checked before any
    /// persistence call is issued.
    pub fn check_can_mutate(&self, row: &Row, owner_field: &str) -> Result<()> {
        if self.is_admin() || self.owns(row, owner_field) {
            return Ok(());
        }
        Err(SyncError::Ownership(format!(
            "user '{}' does not own row '{}'",
            self.user_id, row.id
        )))
    }

    /// Container management (create/rename/delete lists) is admin-only.
    pub fn check_admin(&self) -> Result<()> {
        if self.is_admin() {
            return Ok(());
        }
        Err(SyncError::Ownership(format!(
            "user '{}' is not an admin",
            self.user_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RowId;
    use serde_json::json;

    fn owned_by(user: &str) -> Row {
        Row::new("items", RowId::from("1")).with("user_id", json!(user))
    }

    #[test]
    fn test_owner_may_mutate() {
        let session = SessionContext::new("u1", "Sam", Role::Staff);
        assert!(session.check_can_mutate(&owned_by("u1"), "user_id").is_ok());
    }

    #[test]
    fn test_non_owner_rejected() {
        let session = SessionContext::new("u2", "Alex", Role::Staff);
        let err = session
            .check_can_mutate(&owned_by("u1"), "user_id")
            .unwrap_err();
        assert!(matches!(err, SyncError::Ownership(_)));
    }

    #[test]
    fn test_admin_overrides_ownership() {
        let session = SessionContext::new("u3", "Jo", Role::Admin);
        assert!(session.check_can_mutate(&owned_by("u1"), "user_id").is_ok());
        assert!(session.check_admin().is_ok());
    }

    #[test]
    fn test_staff_cannot_manage_containers() {
        let session = SessionContext::new("u1", "Sam", Role::Staff);
        assert!(session.check_admin().is_err());
    }
}
