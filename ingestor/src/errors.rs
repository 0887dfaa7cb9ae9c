use crate::model::AlertStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Device {0} not found")]
    DeviceNotFound(u64),

    #[error("Gateway {0} not found")]
    GatewayNotFound(u64),

    #[error("Alert {0} not found")]
    AlertNotFound(u64),

    #[error("Invalid alert transition from {from} to {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rule evaluation error: {0}")]
    Rule(#[from] RuleError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel send error")]
    ChannelSend,
}

impl Error {
    /// True for the "referenced id does not exist" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotFound(_) | Error::GatewayNotFound(_) | Error::AlertNotFound(_)
        )
    }
}

/// Failure of a single alert rule. Never aborts the ingestion that triggered it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("rule {rule} is misconfigured for device {device_id}: {reason}")]
    Misconfigured {
        rule: &'static str,
        device_id: u64,
        reason: String,
    },

    #[error("rule {rule} received a non-finite {field}")]
    NonFinite {
        rule: &'static str,
        field: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
