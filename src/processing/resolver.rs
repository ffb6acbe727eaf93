use crate::error::Result;
use crate::models::{Alarm, Event};
use crate::processing::admission::alarm_data;
use crate::state::AlarmStore;
use std::sync::Arc;
use tracing::debug;

/// Maps an event onto the existing alarm it reduces into
pub struct ReductionResolver {
    store: Arc<dyn AlarmStore>,
    legacy_alarm_state: bool,
}

impl ReductionResolver {
    pub fn new(store: Arc<dyn AlarmStore>, legacy_alarm_state: bool) -> Self {
        Self {
            store,
            legacy_alarm_state,
        }
    }

    /// Find the live alarm for an event, if any.
    ///
    /// Resolution events carrying a clear key look the clear key up first
    /// (unless running in legacy alarm state) and fall back to their own
    /// reduction key when nothing matches.
    pub async fn resolve(&self, event: &Event) -> Result<Option<Alarm>> {
        let data = alarm_data(event)?;
        let reduction_key = data.reduction_key.as_str();

        let clear_key = data
            .clear_key
            .as_deref()
            .filter(|_| !self.legacy_alarm_state && event.is_resolution());

        if let Some(clear_key) = clear_key {
            debug!(event_id = event.id, clear_key, "Looking for existing alarm by clear key");
            if let Some(alarm) = self.store.find_by_reduction_key(clear_key).await? {
                return Ok(Some(alarm));
            }
        }

        debug!(event_id = event.id, reduction_key, "Looking for existing alarm by reduction key");
        self.store.find_by_reduction_key(reduction_key).await
    }
}
