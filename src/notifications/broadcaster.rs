//! In-process fan-out of alarm notifications over a tokio broadcast channel.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::{AlarmNotification, AlarmNotifier};
use crate::models::Alarm;

/// Running totals per notification kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationStats {
    pub created: u64,
    pub reduced: u64,
    pub archived: u64,
}

/// Notifier that publishes every notification to subscribers
pub struct BroadcastNotifier {
    tx: broadcast::Sender<AlarmNotification>,
    stats: Arc<RwLock<NotificationStats>>,
    capacity: usize,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            stats: Arc::new(RwLock::new(NotificationStats::default())),
            capacity,
        }
    }

    /// Subscribe to notifications published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmNotification> {
        self.tx.subscribe()
    }

    pub fn stats(&self) -> NotificationStats {
        self.stats.read().clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, notification: AlarmNotification) {
        {
            let mut stats = self.stats.write();
            match notification {
                AlarmNotification::Created { .. } => stats.created += 1,
                AlarmNotification::Reduced { .. } => stats.reduced += 1,
                AlarmNotification::Archived { .. } => stats.archived += 1,
            }
        }

        // No subscribers is not an error
        if self.tx.send(notification).is_err() {
            debug!("No subscribers for alarm notification");
        }
    }
}

#[async_trait]
impl AlarmNotifier for BroadcastNotifier {
    async fn did_create_alarm(&self, alarm: &Alarm) {
        self.publish(AlarmNotification::Created {
            alarm: alarm.clone(),
        });
    }

    async fn did_update_alarm_with_reduced_event(&self, alarm: &Alarm) {
        self.publish(AlarmNotification::Reduced {
            alarm: alarm.clone(),
        });
    }

    async fn did_archive_alarm(&self, alarm: &Alarm, previous_reduction_key: &str) {
        self.publish(AlarmNotification::Archived {
            alarm: alarm.clone(),
            reduction_key: previous_reduction_key.to_string(),
        });
    }
}
