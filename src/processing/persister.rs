use crate::config::PersisterConfig;
use crate::error::{AppError, Result};
use crate::models::{Alarm, Event};
use crate::notifications::AlarmNotifier;
use crate::processing::admission;
use crate::processing::extensions::{AlarmPersisterExtension, ExtensionRegistry};
use crate::processing::lifecycle::{AlarmLifecycleEngine, PersistOutcome};
use crate::processing::locks::KeyLockCoordinator;
use crate::state::{AlarmStore, EventStore, TransactionRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Entry point of the correlation engine.
///
/// Safe to share between any number of concurrent tasks: events whose
/// reduction, clear or related keys overlap are applied one at a time in
/// arrival order, everything else runs in parallel.
pub struct AlarmPersister {
    locks: KeyLockCoordinator,
    /// Held by every persist that may add situation edges
    situation_lock: Mutex<()>,
    related_prefix: String,
    engine: AlarmLifecycleEngine,
    transactions: Arc<dyn TransactionRunner>,
    extensions: Arc<ExtensionRegistry>,
    notifier: Option<Arc<dyn AlarmNotifier>>,
}

impl AlarmPersister {
    pub fn new(
        config: &PersisterConfig,
        alarms: Arc<dyn AlarmStore>,
        events: Arc<dyn EventStore>,
        transactions: Arc<dyn TransactionRunner>,
    ) -> Self {
        let extensions = Arc::new(ExtensionRegistry::new());
        let locks = KeyLockCoordinator::new(config.stripe_count())
            .with_wait_warning(Duration::from_millis(config.lock_wait_warn_ms));

        Self {
            locks,
            situation_lock: Mutex::new(()),
            related_prefix: config.related_reduction_key_prefix.clone(),
            engine: AlarmLifecycleEngine::new(config, alarms, events, extensions.clone()),
            transactions,
            extensions,
            notifier: None,
        }
    }

    /// Set the notifier told about committed changes
    pub fn with_notifier(mut self, notifier: Arc<dyn AlarmNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    pub fn register_extension(&self, extension: Arc<dyn AlarmPersisterExtension>) -> bool {
        self.extensions.register(extension)
    }

    pub fn unregister_extension(&self, extension: &Arc<dyn AlarmPersisterExtension>) -> bool {
        self.extensions.unregister(extension)
    }

    pub fn stripe_count(&self) -> usize {
        self.locks.stripe_count()
    }

    /// Persist an event as a new alarm or reduce it onto an existing one.
    ///
    /// Returns `None` when the event does not take part in correlation. On
    /// error nothing was written and no notification was sent.
    pub async fn persist(&self, event: &Event) -> Result<Option<Alarm>> {
        if !admission::admit(event)? {
            return Ok(None);
        }

        let keys = self.lock_keys(event);
        let guard = self.locks.acquire(&keys.all).await;

        // Edges between alarms on disjoint stripes can still close a longer
        // cycle, so edge additions are serialized. Taken after the stripes.
        let situation_guard = if keys.related.is_empty() {
            None
        } else {
            Some(self.situation_lock.lock().await)
        };

        let mut outcome: Option<PersistOutcome> = None;
        let result = self
            .transactions
            .run(Box::pin(async {
                outcome = Some(self.engine.add_or_reduce(event).await?);
                Ok::<(), AppError>(())
            }))
            .await;

        drop(situation_guard);
        guard.release();

        if let Err(e) = result {
            if e.is_retryable() {
                warn!(event_id = event.id, keys = ?keys.all, error = %e, "Persist rolled back; event may be retried");
            } else {
                error!(event_id = event.id, keys = ?keys.all, error = %e, "Failed to persist event");
            }
            return Err(e);
        }

        let outcome = outcome.ok_or_else(|| {
            AppError::Internal(format!("Transaction for event {} committed without a result", event.id))
        })?;

        debug!(
            event_id = event.id,
            alarm_id = %outcome.alarm.id,
            transition = ?outcome.transition,
            "Event persisted"
        );

        if let Some(notifier) = &self.notifier {
            for notification in &outcome.notifications {
                notification.dispatch(notifier.as_ref()).await;
            }
        }

        Ok(Some(outcome.alarm))
    }

    /// Own keys plus the related keys whose alarms the cycle search reads
    fn lock_keys(&self, event: &Event) -> LockKeys {
        let related: Vec<String> = event
            .related_reduction_keys(&self.related_prefix)
            .into_iter()
            .collect();
        let mut all = event.lock_keys();
        all.extend(related.iter().cloned());
        LockKeys { all, related }
    }
}

struct LockKeys {
    all: Vec<String>,
    related: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlarmData, EventRecord, LogDestination};
    use crate::notifications::{AlarmNotification, BroadcastNotifier};
    use crate::state::InMemoryStore;

    fn persister(store: &Arc<InMemoryStore>) -> AlarmPersister {
        AlarmPersister::new(
            &PersisterConfig::default(),
            store.clone(),
            store.clone(),
            store.clone(),
        )
    }

    #[tokio::test]
    async fn test_stripe_count_from_config() {
        let store = Arc::new(InMemoryStore::new());
        assert_eq!(persister(&store).stripe_count(), 16);
    }

    #[tokio::test]
    async fn test_related_keys_are_locked() {
        let store = Arc::new(InMemoryStore::new());
        let persister = persister(&store);

        let event = Event::new(1, "uei.test")
            .with_alarm_data(AlarmData::resolution("s:up", "s:down"))
            .with_parm("related-reductionKey1", "member:b")
            .with_parm("related-reductionKey2", "member:a")
            .with_parm("nodeLabel", "ignored");
        let keys = persister.lock_keys(&event);

        assert_eq!(keys.all, vec!["s:up", "s:down", "member:a", "member:b"]);
        assert_eq!(keys.related, vec!["member:a", "member:b"]);

        let plain = Event::new(2, "uei.test").with_alarm_data(AlarmData::problem("rk"));
        assert!(persister.lock_keys(&plain).related.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_event_returns_none() {
        let store = Arc::new(InMemoryStore::new());
        let persister = persister(&store);

        let event = Event::new(1, "uei.test")
            .with_alarm_data(AlarmData::problem("rk"))
            .with_log_dest(LogDestination::Donotpersist);
        assert!(persister.persist(&event).await.unwrap().is_none());
        assert!(persister.persist(&Event::new(2, "uei.test")).await.unwrap().is_none());
        assert_eq!(store.alarm_count(), 0);
    }

    #[tokio::test]
    async fn test_illegal_id_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let event = Event::new(0, "uei.test").with_alarm_data(AlarmData::problem("rk"));

        let err = persister(&store).persist(&event).await.unwrap_err();
        assert!(matches!(err, AppError::ContractViolation(_)));
    }

    #[tokio::test]
    async fn test_notifications_sent_after_commit() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let mut rx = notifier.subscribe();
        let persister = persister(&store).with_notifier(notifier.clone());

        store
            .save_or_update_event(&EventRecord::new(1, "uei.test", "Major"))
            .await
            .unwrap();
        let event = Event::new(1, "uei.test").with_alarm_data(AlarmData::problem("rk"));
        let alarm = persister.persist(&event).await.unwrap().unwrap();

        assert_eq!(rx.recv().await.unwrap(), AlarmNotification::Created { alarm });
    }

    #[tokio::test]
    async fn test_failed_persist_sends_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let persister = persister(&store).with_notifier(notifier.clone());

        let event = Event::new(7, "uei.test").with_alarm_data(AlarmData::problem("rk"));
        let err = persister.persist(&event).await.unwrap_err();

        assert!(matches!(err, AppError::ConsistencyViolation(_)));
        assert_eq!(notifier.stats().created, 0);
    }
}
