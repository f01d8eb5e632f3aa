//! Wire types of the storage ACL API.

use serde::{Deserialize, Serialize};

/// Role granted to a user entity.
pub const ROLE_READER: &str = "READER";

/// Entity string the ACL API uses for a single user.
pub fn user_entity(e_mail: &str) -> String {
    format!("user-{}", e_mail)
}

/// Grant or revoke a user's read access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclAction {
    Grant,
    Revoke,
}

/// An `objectAccessControls` resource.
///
/// Requests only carry `entity` and `role`; the remaining fields are filled
/// in by the service on responses.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAccessControl {
    pub entity: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ObjectAccessControl {
    /// READER entry for a single user.
    pub fn user_reader(e_mail: &str) -> Self {
        Self {
            entity: user_entity(e_mail),
            role: ROLE_READER.into(),
            ..Default::default()
        }
    }
}
