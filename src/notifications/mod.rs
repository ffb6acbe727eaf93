//! Post-commit alarm notifications.
//!
//! The persister collects notifications while a transaction runs and hands
//! them to an [`AlarmNotifier`] only after the transaction committed and the
//! key locks were released.

pub mod broadcaster;

pub use broadcaster::BroadcastNotifier;

use crate::models::Alarm;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Observer of committed alarm changes; fire-and-forget
#[async_trait]
pub trait AlarmNotifier: Send + Sync {
    async fn did_create_alarm(&self, alarm: &Alarm);

    async fn did_update_alarm_with_reduced_event(&self, alarm: &Alarm);

    /// `previous_reduction_key` is the key the archived alarm used to own
    async fn did_archive_alarm(&self, alarm: &Alarm, previous_reduction_key: &str);
}

/// A committed alarm change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlarmNotification {
    Created { alarm: Alarm },
    Reduced { alarm: Alarm },
    Archived { alarm: Alarm, reduction_key: String },
}

impl AlarmNotification {
    pub fn alarm(&self) -> &Alarm {
        match self {
            AlarmNotification::Created { alarm }
            | AlarmNotification::Reduced { alarm }
            | AlarmNotification::Archived { alarm, .. } => alarm,
        }
    }

    /// Deliver this notification to `notifier`
    pub async fn dispatch(&self, notifier: &dyn AlarmNotifier) {
        match self {
            AlarmNotification::Created { alarm } => notifier.did_create_alarm(alarm).await,
            AlarmNotification::Reduced { alarm } => {
                notifier.did_update_alarm_with_reduced_event(alarm).await
            }
            AlarmNotification::Archived {
                alarm,
                reduction_key,
            } => notifier.did_archive_alarm(alarm, reduction_key).await,
        }
    }
}

/// Notifier that only logs
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl AlarmNotifier for LoggingNotifier {
    async fn did_create_alarm(&self, alarm: &Alarm) {
        info!(
            alarm_id = %alarm.id,
            reduction_key = %alarm.reduction_key,
            severity = %alarm.severity,
            "Alarm created"
        );
    }

    async fn did_update_alarm_with_reduced_event(&self, alarm: &Alarm) {
        info!(
            alarm_id = %alarm.id,
            reduction_key = %alarm.reduction_key,
            severity = %alarm.severity,
            counter = alarm.counter,
            "Alarm updated with reduced event"
        );
    }

    async fn did_archive_alarm(&self, alarm: &Alarm, previous_reduction_key: &str) {
        info!(
            alarm_id = %alarm.id,
            reduction_key = %previous_reduction_key,
            "Alarm archived"
        );
    }
}
