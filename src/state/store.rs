use crate::error::{AppError, Result};
use crate::models::{Alarm, EventRecord};
use crate::state::{AlarmFilter, AlarmStore, EventStore, TransactionRunner};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

tokio::task_local! {
    /// Undo journal of the transaction running on the current task
    static ACTIVE_JOURNAL: Arc<Mutex<Vec<UndoEntry>>>;
}

/// Prior value of a row touched inside a transaction
enum UndoEntry {
    Alarm {
        store: Arc<StoreInner>,
        id: Uuid,
        previous: Option<Alarm>,
    },
    Event {
        store: Arc<StoreInner>,
        id: i64,
        previous: Option<EventRecord>,
    },
}

impl UndoEntry {
    fn undo(self) {
        match self {
            UndoEntry::Alarm { store, id, previous } => match previous {
                Some(alarm) => {
                    store.put_alarm(alarm);
                }
                None => store.remove_alarm(&id),
            },
            UndoEntry::Event { store, id, previous } => match previous {
                Some(event) => {
                    store.events.insert(id, event);
                }
                None => {
                    store.events.remove(&id);
                }
            },
        }
    }
}

struct StoreInner {
    alarms: DashMap<Uuid, Alarm>,
    /// reduction key -> id of the non-archived alarm owning it
    reduction_key_index: DashMap<String, Uuid>,
    events: DashMap<i64, EventRecord>,
}

impl StoreInner {
    fn put_alarm(&self, alarm: Alarm) -> Option<Alarm> {
        let previous = self.alarms.insert(alarm.id, alarm.clone());
        if let Some(ref prev) = previous {
            self.unindex(prev);
        }
        if !alarm.archived {
            self.reduction_key_index
                .insert(alarm.reduction_key.clone(), alarm.id);
        }
        previous
    }

    fn remove_alarm(&self, id: &Uuid) {
        if let Some((_, alarm)) = self.alarms.remove(id) {
            self.unindex(&alarm);
        }
    }

    fn unindex(&self, alarm: &Alarm) {
        self.reduction_key_index
            .remove_if(&alarm.reduction_key, |_, owner| *owner == alarm.id);
    }

    /// Id of another live alarm already owning `alarm`'s reduction key
    fn conflicting_owner(&self, alarm: &Alarm) -> Option<Uuid> {
        if alarm.archived {
            return None;
        }
        self.reduction_key_index
            .get(&alarm.reduction_key)
            .map(|entry| *entry.value())
            .filter(|owner| *owner != alarm.id)
    }
}

/// In-memory alarm and event store (for single-process use and testing).
///
/// Also acts as the [`TransactionRunner`]: writes made inside
/// [`TransactionRunner::run`] are journaled and undone if the work fails.
/// Isolation is read-uncommitted: other tasks see a transaction's writes
/// before it commits.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                alarms: DashMap::new(),
                reduction_key_index: DashMap::new(),
                events: DashMap::new(),
            }),
        }
    }

    /// Number of alarms, archived included
    pub fn alarm_count(&self) -> usize {
        self.inner.alarms.len()
    }

    pub fn event_count(&self) -> usize {
        self.inner.events.len()
    }

    fn journal(entry: UndoEntry) {
        // Outside a transaction writes auto-commit
        let _ = ACTIVE_JOURNAL.try_with(|journal| journal.lock().push(entry));
    }

    fn journal_alarm(&self, id: Uuid, previous: Option<Alarm>) {
        Self::journal(UndoEntry::Alarm {
            store: self.inner.clone(),
            id,
            previous,
        });
    }

    fn journal_event(&self, id: i64, previous: Option<EventRecord>) {
        Self::journal(UndoEntry::Event {
            store: self.inner.clone(),
            id,
            previous,
        });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlarmStore for InMemoryStore {
    async fn find_by_reduction_key(&self, reduction_key: &str) -> Result<Option<Alarm>> {
        let owner = self
            .inner
            .reduction_key_index
            .get(reduction_key)
            .map(|entry| *entry.value());

        Ok(owner
            .and_then(|id| self.inner.alarms.get(&id).map(|entry| entry.clone()))
            .filter(|alarm| !alarm.archived))
    }

    async fn get_alarm(&self, id: &Uuid) -> Result<Option<Alarm>> {
        Ok(self.inner.alarms.get(id).map(|entry| entry.clone()))
    }

    async fn save_alarm(&self, alarm: &Alarm) -> Result<()> {
        if self.inner.alarms.contains_key(&alarm.id) {
            return Err(AppError::Storage(format!(
                "Alarm {} already exists",
                alarm.id
            )));
        }
        if let Some(owner) = self.inner.conflicting_owner(alarm) {
            return Err(AppError::Storage(format!(
                "Reduction key '{}' is already owned by alarm {}",
                alarm.reduction_key, owner
            )));
        }

        self.inner.put_alarm(alarm.clone());
        self.journal_alarm(alarm.id, None);

        tracing::debug!(alarm_id = %alarm.id, reduction_key = %alarm.reduction_key, "Alarm saved");
        Ok(())
    }

    async fn update_alarm(&self, alarm: &Alarm) -> Result<()> {
        if !self.inner.alarms.contains_key(&alarm.id) {
            return Err(AppError::NotFound(format!("Alarm {} not found", alarm.id)));
        }
        if let Some(owner) = self.inner.conflicting_owner(alarm) {
            return Err(AppError::Storage(format!(
                "Reduction key '{}' is already owned by alarm {}",
                alarm.reduction_key, owner
            )));
        }

        let previous = self.inner.put_alarm(alarm.clone());
        self.journal_alarm(alarm.id, previous);

        tracing::debug!(alarm_id = %alarm.id, "Alarm updated");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn list_alarms(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>> {
        let mut alarms: Vec<Alarm> = self
            .inner
            .alarms
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|alarm| filter.matches(alarm))
            .collect();

        // Oldest first
        alarms.sort_by(|a, b| {
            a.first_event_time
                .cmp(&b.first_event_time)
                .then_with(|| a.reduction_key.cmp(&b.reduction_key))
        });

        Ok(alarms)
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn get_event(&self, id: i64) -> Result<Option<EventRecord>> {
        Ok(self.inner.events.get(&id).map(|entry| entry.clone()))
    }

    async fn save_or_update_event(&self, event: &EventRecord) -> Result<()> {
        let previous = self.inner.events.insert(event.id, event.clone());
        self.journal_event(event.id, previous);
        Ok(())
    }

    async fn update_event(&self, event: &EventRecord) -> Result<()> {
        if !self.inner.events.contains_key(&event.id) {
            return Err(AppError::NotFound(format!("Event {} not found", event.id)));
        }
        let previous = self.inner.events.insert(event.id, event.clone());
        self.journal_event(event.id, previous);
        Ok(())
    }

    async fn delete_previous_events_for_alarm(
        &self,
        alarm_id: &Uuid,
        latest: &EventRecord,
    ) -> Result<u64> {
        let stale: Vec<i64> = self
            .inner
            .events
            .iter()
            .filter(|entry| entry.alarm_id.as_ref() == Some(alarm_id) && entry.id != latest.id)
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for id in stale {
            if let Some((_, event)) = self.inner.events.remove(&id) {
                self.journal_event(id, Some(event));
                removed += 1;
            }
        }

        tracing::debug!(alarm_id = %alarm_id, removed, "Deleted previous events for alarm");
        Ok(removed)
    }
}

#[async_trait]
impl TransactionRunner for InMemoryStore {
    async fn run<'a>(&'a self, work: BoxFuture<'a, Result<()>>) -> Result<()> {
        let journal = Arc::new(Mutex::new(Vec::new()));

        match ACTIVE_JOURNAL.scope(journal.clone(), work).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let entries = std::mem::take(&mut *journal.lock());
                tracing::debug!(writes = entries.len(), error = %e, "Rolling back transaction");
                for entry in entries.into_iter().rev() {
                    entry.undo();
                }
                Err(e)
            }
        }
    }
}
