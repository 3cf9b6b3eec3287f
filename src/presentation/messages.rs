use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::{
    outcome::{OutcomeStatus, PersistenceOutcome},
    registration::RegistrationRequest,
    user::NationalId,
};

// Inbound

/// json body of a registration request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationMessage {
    #[serde(default, alias = "request_id")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub correo: Option<String>,
    #[serde(default)]
    pub clave: Option<i64>,
    #[serde(default)]
    pub dni: Option<i64>,
    #[serde(default)]
    pub telefono: Option<i64>,
    #[serde(default)]
    pub friends_dni: Option<Vec<i64>>,
}

#[derive(Debug, Error)]
#[error("Invalid registration payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl RegistrationMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

impl From<RegistrationMessage> for RegistrationRequest {
    fn from(message: RegistrationMessage) -> Self {
        Self {
            request_id: message.request_id,
            name: message.nombre,
            email: message.correo,
            secret: message.clave,
            national_id: message.dni.map(NationalId::new),
            phone: message.telefono,
            friend_ids: message
                .friends_dni
                .unwrap_or_default()
                .into_iter()
                .map(NationalId::new)
                .collect(),
        }
    }
}

// Outbound

/// json body of a persistence confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationMessage {
    pub dni: Option<i64>,
    pub status: OutcomeStatus,
    pub message: String,
    pub timestamp: String,
}

impl From<&PersistenceOutcome> for ConfirmationMessage {
    fn from(outcome: &PersistenceOutcome) -> Self {
        Self {
            dni: outcome.national_id.map(|d| d.value()),
            status: outcome.status,
            message: outcome.message.clone(),
            timestamp: outcome
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}
