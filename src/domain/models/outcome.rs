use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::user::NationalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Terminal result of one registration attempt.
///
/// `national_id` is `None` only when the inbound payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceOutcome {
    pub national_id: Option<NationalId>,
    pub status: OutcomeStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl PersistenceOutcome {
    pub fn success(national_id: NationalId, message: impl Into<String>) -> Self {
        Self {
            national_id: Some(national_id),
            status: OutcomeStatus::Success,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(national_id: Option<NationalId>, message: impl Into<String>) -> Self {
        Self {
            national_id,
            status: OutcomeStatus::Failed,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
