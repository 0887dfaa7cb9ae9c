//! Alert lifecycle: Active -> Acknowledged -> Resolved, forward only.

use crate::errors::{Error, Result};
use crate::metrics::{ALERTS_RAISED_TOTAL, ALERT_TRANSITIONS_TOTAL};
use crate::model::{Alert, AlertDraft, AlertStatus};
use crate::store::TelemetryStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// A requested lifecycle move together with who is making it
#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    Acknowledge {
        actor: String,
    },
    Resolve {
        actor: String,
        notes: Option<String>,
    },
}

impl AlertTransition {
    pub fn target(&self) -> AlertStatus {
        match self {
            AlertTransition::Acknowledge { .. } => AlertStatus::Acknowledged,
            AlertTransition::Resolve { .. } => AlertStatus::Resolved,
        }
    }

    /// Applies the transition in place, or leaves the alert untouched and
    /// returns `InvalidTransition`.
    pub fn apply(self, alert: &mut Alert, now: DateTime<Utc>) -> Result<()> {
        let invalid = Error::InvalidTransition {
            from: alert.status,
            to: self.target(),
        };
        match (alert.status, self) {
            (AlertStatus::Active, AlertTransition::Acknowledge { actor }) => {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(now);
                alert.acknowledged_by = Some(actor);
                Ok(())
            }
            (
                AlertStatus::Active | AlertStatus::Acknowledged,
                AlertTransition::Resolve { actor, notes },
            ) => {
                // Skipped acknowledgement is back-filled by the resolver
                if alert.acknowledged_at.is_none() {
                    alert.acknowledged_at = Some(now);
                    alert.acknowledged_by = Some(actor.clone());
                }
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(now);
                alert.resolved_by = Some(actor);
                alert.resolution_notes = notes;
                Ok(())
            }
            _ => Err(invalid),
        }
    }
}

/// Lifecycle manager over a shared store
#[derive(Debug, Clone)]
pub struct AlertLifecycle {
    store: Arc<TelemetryStore>,
}

impl AlertLifecycle {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    pub async fn acknowledge(&self, alert_id: u64, actor: &str) -> Result<Alert> {
        self.apply(
            alert_id,
            AlertTransition::Acknowledge {
                actor: actor.to_string(),
            },
        )
        .await
    }

    pub async fn resolve(
        &self,
        alert_id: u64,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Alert> {
        self.apply(
            alert_id,
            AlertTransition::Resolve {
                actor: actor.to_string(),
                notes,
            },
        )
        .await
    }

    /// Dispatches a requested target status. Moving to `Active` is never
    /// allowed since it would move an alert backward or nowhere.
    pub async fn transition(
        &self,
        alert_id: u64,
        target: AlertStatus,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Alert> {
        match target {
            AlertStatus::Acknowledged => self.acknowledge(alert_id, actor).await,
            AlertStatus::Resolved => self.resolve(alert_id, actor, notes).await,
            AlertStatus::Active => {
                let current = self.store.alert(alert_id).await?;
                Err(Error::InvalidTransition {
                    from: current.status,
                    to: AlertStatus::Active,
                })
            }
        }
    }

    /// Manual escalation: creates an Active alert outside the rule engine.
    pub async fn raise(&self, draft: AlertDraft) -> Result<Alert> {
        if draft.message.trim().is_empty() {
            return Err(Error::Validation("Alert message cannot be empty".to_string()));
        }
        let alert = self.store.append_alert(draft).await?;
        ALERTS_RAISED_TOTAL
            .with_label_values(&[alert.alert_type.as_str()])
            .inc();
        info!(
            "Manual {} alert {} raised for device {}",
            alert.alert_type, alert.id, alert.device_id
        );
        Ok(alert)
    }

    async fn apply(&self, alert_id: u64, transition: AlertTransition) -> Result<Alert> {
        let target = transition.target();
        match self.store.update_alert(alert_id, transition).await {
            Ok(alert) => {
                ALERT_TRANSITIONS_TOTAL
                    .with_label_values(&[target.as_str()])
                    .inc();
                info!("Alert {} moved to {}", alert.id, alert.status);
                Ok(alert)
            }
            Err(e) => {
                warn!("Alert {} transition to {} rejected: {}", alert_id, target, e);
                Err(e)
            }
        }
    }
}
