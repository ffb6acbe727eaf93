use crate::error::{AppError, Result};
use crate::metrics::EVENTS_TOTAL;
use crate::models::{AlarmData, Event, LogDestination};
use tracing::debug;

/// Decide whether an event takes part in alarm correlation.
///
/// Returns `Ok(false)` for events that are simply not ours (marked
/// do-not-persist, or without alarm data). A non-positive event id means the
/// upstream pipeline is broken and is reported as a contract violation.
pub fn admit(event: &Event) -> Result<bool> {
    if event.log_dest == Some(LogDestination::Donotpersist) {
        debug!(uei = %event.uei, "Event marked as donotpersist; not processing event");
        EVENTS_TOTAL.with_label_values(&["do_not_persist"]).inc();
        return Ok(false);
    }

    if event.alarm_data.is_none() {
        debug!(uei = %event.uei, "Event has no alarm data; not processing event");
        EVENTS_TOTAL.with_label_values(&["no_alarm_data"]).inc();
        return Ok(false);
    }

    if event.id <= 0 {
        EVENTS_TOTAL.with_label_values(&["illegal_id"]).inc();
        return Err(AppError::ContractViolation(format!(
            "Incoming event has an illegal dbid ({}), aborting",
            event.id
        )));
    }

    EVENTS_TOTAL.with_label_values(&["admitted"]).inc();
    Ok(true)
}

/// Alarm data of an admitted event
pub(crate) fn alarm_data(event: &Event) -> Result<&AlarmData> {
    event.alarm_data.as_ref().ok_or_else(|| {
        AppError::ContractViolation(format!(
            "Event {} ({}) has no alarm data",
            event.id, event.uei
        ))
    })
}
