use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender identity doubling as the chat session key (the gateway phone
/// number with the JID suffix stripped).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub session_id: SessionId,
    pub full_name: Option<String>,
    pub document: Option<String>,
    pub insurance: Option<String>,
    pub notes: Option<serde_json::Value>,
    pub registration_complete: bool,
    pub requires_human: bool,
    pub contact_origin: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(session_id: SessionId, contact_origin: impl Into<String>) -> Self {
        Self {
            session_id,
            full_name: None,
            document: None,
            insurance: None,
            notes: None,
            registration_complete: false,
            requires_human: false,
            contact_origin: contact_origin.into(),
            created_at: Utc::now(),
        }
    }
}

/// Partial profile update applied by the registration tools. `None`
/// fields keep the stored value (COALESCE semantics).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub document: Option<String>,
    pub insurance: Option<String>,
    pub notes: Option<serde_json::Value>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.document.is_none()
            && self.insurance.is_none()
            && self.notes.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionId, UserRecord, UserUpdate};

    #[test]
    fn new_user_starts_unregistered_and_unblocked() {
        let user = UserRecord::new(SessionId("5599000011122".to_owned()), "whatsapp");
        assert!(!user.registration_complete);
        assert!(!user.requires_human);
        assert_eq!(user.contact_origin, "whatsapp");
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(UserUpdate::default().is_empty());
        let update = UserUpdate { full_name: Some("Ana Souza".to_owned()), ..Default::default() };
        assert!(!update.is_empty());
    }
}
