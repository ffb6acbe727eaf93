use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumString};
use uuid::Uuid;

use super::event::{Event, EventRecord};

/// Alarm severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[strum(ascii_case_insensitive)]
pub enum Severity {
    Indeterminate,
    Cleared,
    Normal,
    Warning,
    Minor,
    Major,
    Critical,
}

impl Severity {
    /// Parse a severity label, falling back to `Indeterminate` for unknown labels
    pub fn from_label(label: &str) -> Self {
        label.trim().parse().unwrap_or(Severity::Indeterminate)
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self, Severity::Cleared)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Indeterminate
    }
}

/// Whether an alarm (or event) raises a problem or resolves one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AlarmType {
    Problem,
    Resolution,
}

/// Lifecycle state derived from an alarm's fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum LifecycleState {
    Active,
    Resolved,
    Archived,
}

/// Deduplicated, long-lived correlation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    /// Unique alarm identifier
    pub id: Uuid,

    /// Primary correlation key
    pub reduction_key: String,

    /// Alternate key used by resolution events
    pub clear_key: Option<String>,

    pub uei: String,
    pub severity: Severity,

    /// Occurrence count, starts at 1
    pub counter: u64,

    pub alarm_type: AlarmType,

    /// Terminal marker; archived alarms are never mutated again
    pub archived: bool,

    pub first_event_time: DateTime<Utc>,
    pub last_event_time: DateTime<Utc>,

    /// Most recent contributing event
    pub last_event_id: i64,

    pub log_msg: Option<String>,
    pub description: Option<String>,
    pub mouse_over_text: Option<String>,
    pub oper_instruct: Option<String>,
    pub ip_addr: Option<String>,
    pub node_id: Option<i64>,
    pub if_index: Option<i32>,
    pub service_type: Option<String>,
    pub dist_poller: Option<String>,
    pub managed_object_type: Option<String>,
    pub suppressed_until: Option<DateTime<Utc>>,
    pub suppressed_time: Option<DateTime<Utc>>,

    /// Outgoing situation edges, by alarm id
    pub related_alarms: BTreeSet<Uuid>,
}

impl Alarm {
    /// Build a fresh alarm from the incoming event and its persisted record
    pub fn from_event(record: &EventRecord, event: &Event) -> Self {
        let alarm_data = event.alarm_data.as_ref();
        let alarm_type = alarm_data
            .map(|data| data.alarm_type)
            .unwrap_or(AlarmType::Problem);

        Self {
            id: Uuid::new_v4(),
            reduction_key: alarm_data
                .map(|data| data.reduction_key.clone())
                .unwrap_or_default(),
            clear_key: alarm_data.and_then(|data| data.clear_key.clone()),
            uei: record.uei.clone(),
            severity: Severity::from_label(&record.severity),
            counter: 1,
            alarm_type,
            archived: false,
            first_event_time: record.event_time,
            last_event_time: record.event_time,
            last_event_id: record.id,
            log_msg: record.log_msg.clone(),
            description: record.description.clone(),
            mouse_over_text: record.mouse_over_text.clone(),
            oper_instruct: record.oper_instruct.clone(),
            ip_addr: record.ip_addr.clone(),
            node_id: record.node_id,
            if_index: record.if_index,
            service_type: record.service_type.clone(),
            dist_poller: record.dist_poller.clone(),
            managed_object_type: alarm_data
                .and_then(|data| data.managed_object.as_ref())
                .map(|mo| mo.object_type.clone()),
            // UI requires both to be set
            suppressed_until: Some(record.event_time),
            suppressed_time: Some(record.event_time),
            related_alarms: BTreeSet::new(),
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        if self.archived {
            LifecycleState::Archived
        } else if self.alarm_type == AlarmType::Resolution {
            LifecycleState::Resolved
        } else {
            LifecycleState::Active
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.alarm_type == AlarmType::Resolution
    }

    /// Situations are alarms with at least one related alarm
    pub fn is_situation(&self) -> bool {
        !self.related_alarms.is_empty()
    }

    pub fn increment_counter(&mut self) {
        self.counter += 1;
    }

    /// Mark the alarm as terminal
    pub fn archive(&mut self) {
        self.archived = true;
        self.severity = Severity::Cleared;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::AlarmData;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Major);
        assert!(Severity::Major > Severity::Minor);
        assert!(Severity::Normal > Severity::Cleared);
        assert!(Severity::Cleared > Severity::Indeterminate);
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::from_label("Major"), Severity::Major);
        assert_eq!(Severity::from_label("CLEARED"), Severity::Cleared);
        assert_eq!(Severity::from_label(" critical "), Severity::Critical);
        assert_eq!(Severity::from_label("bogus"), Severity::Indeterminate);
        assert_eq!(Severity::Warning.to_string(), "Warning");
    }

    #[test]
    fn test_alarm_type_parsing() {
        assert_eq!("PROBLEM".parse::<AlarmType>().unwrap(), AlarmType::Problem);
        assert_eq!("resolution".parse::<AlarmType>().unwrap(), AlarmType::Resolution);
    }

    #[test]
    fn test_from_event() {
        let record = EventRecord::new(7, "uei.opennms.org/nodes/nodeDown", "Major")
            .with_log_msg("node down");
        let event = Event::new(7, "uei.opennms.org/nodes/nodeDown")
            .with_alarm_data(AlarmData::problem("nodeDown:1"));

        let alarm = Alarm::from_event(&record, &event);
        assert_eq!(alarm.reduction_key, "nodeDown:1");
        assert_eq!(alarm.counter, 1);
        assert_eq!(alarm.severity, Severity::Major);
        assert_eq!(alarm.last_event_id, 7);
        assert_eq!(alarm.log_msg.as_deref(), Some("node down"));
        assert_eq!(alarm.lifecycle_state(), LifecycleState::Active);
        assert_eq!(alarm.suppressed_time, Some(record.event_time));
    }

    #[test]
    fn test_archive_is_terminal_state() {
        let record = EventRecord::new(1, "uei.test", "Cleared");
        let event = Event::new(1, "uei.test").with_alarm_data(AlarmData::resolution("r", "p"));
        let mut alarm = Alarm::from_event(&record, &event);
        assert_eq!(alarm.lifecycle_state(), LifecycleState::Resolved);

        alarm.archive();
        assert_eq!(alarm.lifecycle_state(), LifecycleState::Archived);
        assert_eq!(alarm.counter, 1);
    }
}
