pub mod store;

pub use store::InMemoryStore;

use crate::error::Result;
use crate::models::{Alarm, EventRecord};
use async_trait::async_trait;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Trait for alarm storage operations.
///
/// Writes only take effect as part of the caller's transaction
/// (see [`TransactionRunner`]).
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Find the non-archived alarm owning a reduction key
    async fn find_by_reduction_key(&self, reduction_key: &str) -> Result<Option<Alarm>>;

    /// Get an alarm by ID, archived or not
    async fn get_alarm(&self, id: &Uuid) -> Result<Option<Alarm>>;

    /// Save a new alarm
    async fn save_alarm(&self, alarm: &Alarm) -> Result<()>;

    /// Update an existing alarm
    async fn update_alarm(&self, alarm: &Alarm) -> Result<()>;

    /// Flush pending writes to the backend
    async fn flush(&self) -> Result<()>;

    /// List alarms with filtering
    async fn list_alarms(&self, filter: &AlarmFilter) -> Result<Vec<Alarm>>;
}

/// Trait for persisted event operations
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Get a persisted event; `None` if it was reaped
    async fn get_event(&self, id: i64) -> Result<Option<EventRecord>>;

    async fn save_or_update_event(&self, event: &EventRecord) -> Result<()>;

    async fn update_event(&self, event: &EventRecord) -> Result<()>;

    /// Delete every event reduced into `alarm_id` except `latest`; returns the number removed
    async fn delete_previous_events_for_alarm(
        &self,
        alarm_id: &Uuid,
        latest: &EventRecord,
    ) -> Result<u64>;
}

/// Scoped transaction boundary.
///
/// `run` commits when `work` returns `Ok` and rolls back every write made
/// through the participating stores when it returns `Err`.
#[async_trait]
pub trait TransactionRunner: Send + Sync {
    async fn run<'a>(&'a self, work: BoxFuture<'a, Result<()>>) -> Result<()>;
}

/// Filter for querying alarms
#[derive(Debug, Clone, Default)]
pub struct AlarmFilter {
    /// Include archived alarms
    pub include_archived: bool,
    /// Only alarms with related alarms
    pub situations_only: bool,
}

impl AlarmFilter {
    pub fn matches(&self, alarm: &Alarm) -> bool {
        (self.include_archived || !alarm.archived)
            && (!self.situations_only || alarm.is_situation())
    }
}
