use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::SessionId;

/// Local record of a calendar booking, keyed by session so cancellation
/// can resolve a date + time back to the calendar event id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub session_id: SessionId,
    pub event_id: String,
    pub summary: String,
    pub procedure: String,
    pub doctor_name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
