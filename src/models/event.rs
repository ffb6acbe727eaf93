use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumString};
use uuid::Uuid;

use super::alarm::AlarmType;

/// Where an event is supposed to be logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogDestination {
    Logndisplay,
    Displayonly,
    Logonly,
    Suppress,
    Donotpersist,
    Discardtraps,
}

impl Default for LogDestination {
    fn default() -> Self {
        LogDestination::Logndisplay
    }
}

/// Name/value event parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parm {
    pub name: String,
    pub value: Option<String>,
}

impl Parm {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// Field refreshed (or not) when an event reduces onto an existing alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateField {
    pub field_name: String,
    #[serde(default = "default_true")]
    pub update_on_reduction: bool,
}

impl UpdateField {
    pub fn new(field_name: impl Into<String>, update_on_reduction: bool) -> Self {
        Self {
            field_name: field_name.into(),
            update_on_reduction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedObject {
    #[serde(rename = "type")]
    pub object_type: String,
}

/// Alarm correlation metadata carried by an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmData {
    pub reduction_key: String,

    #[serde(default)]
    pub clear_key: Option<String>,

    pub alarm_type: AlarmType,

    #[serde(default)]
    pub auto_clean: bool,

    /// Empty means "no explicit update-field list"
    #[serde(default)]
    pub update_fields: Vec<UpdateField>,

    #[serde(default)]
    pub managed_object: Option<ManagedObject>,
}

impl AlarmData {
    pub fn problem(reduction_key: impl Into<String>) -> Self {
        Self {
            reduction_key: reduction_key.into(),
            clear_key: None,
            alarm_type: AlarmType::Problem,
            auto_clean: false,
            update_fields: Vec::new(),
            managed_object: None,
        }
    }

    pub fn resolution(reduction_key: impl Into<String>, clear_key: impl Into<String>) -> Self {
        Self {
            reduction_key: reduction_key.into(),
            clear_key: Some(clear_key.into()),
            alarm_type: AlarmType::Resolution,
            auto_clean: false,
            update_fields: Vec::new(),
            managed_object: None,
        }
    }

    pub fn with_update_field(mut self, field_name: &str, update_on_reduction: bool) -> Self {
        self.update_fields
            .push(UpdateField::new(field_name, update_on_reduction));
        self
    }

    pub fn with_auto_clean(mut self, auto_clean: bool) -> Self {
        self.auto_clean = auto_clean;
        self
    }

    pub fn has_update_fields(&self) -> bool {
        !self.update_fields.is_empty()
    }
}

/// Immutable input record handed to the persister
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Database id of the persisted event record; must be positive
    pub id: i64,
    pub uei: String,

    #[serde(default)]
    pub severity: Option<String>,

    #[serde(default)]
    pub node_id: Option<i64>,

    #[serde(default)]
    pub ip_addr: Option<String>,

    #[serde(default)]
    pub service_id: Option<String>,

    #[serde(default)]
    pub alarm_data: Option<AlarmData>,

    #[serde(default)]
    pub parms: Vec<Parm>,

    #[serde(default)]
    pub log_dest: Option<LogDestination>,
}

impl Event {
    pub fn new(id: i64, uei: impl Into<String>) -> Self {
        Self {
            id,
            uei: uei.into(),
            severity: None,
            node_id: None,
            ip_addr: None,
            service_id: None,
            alarm_data: None,
            parms: Vec::new(),
            log_dest: None,
        }
    }

    pub fn with_alarm_data(mut self, alarm_data: AlarmData) -> Self {
        self.alarm_data = Some(alarm_data);
        self
    }

    pub fn with_parm(mut self, name: &str, value: &str) -> Self {
        self.parms.push(Parm::new(name, value));
        self
    }

    pub fn with_log_dest(mut self, log_dest: LogDestination) -> Self {
        self.log_dest = Some(log_dest);
        self
    }

    pub fn is_resolution(&self) -> bool {
        self.alarm_data
            .as_ref()
            .map(|data| data.alarm_type == AlarmType::Resolution)
            .unwrap_or(false)
    }

    /// Reduction keys named by parameters starting with `prefix`
    pub fn related_reduction_keys(&self, prefix: &str) -> BTreeSet<String> {
        self.parms
            .iter()
            .filter(|parm| parm.name.starts_with(prefix))
            .filter_map(|parm| parm.value.clone())
            .collect()
    }

    /// Reduction key and, if present, clear key
    pub fn lock_keys(&self) -> Vec<String> {
        match &self.alarm_data {
            Some(data) => {
                let mut keys = vec![data.reduction_key.clone()];
                if let Some(clear_key) = &data.clear_key {
                    keys.push(clear_key.clone());
                }
                keys
            }
            None => Vec::new(),
        }
    }
}

/// Event as persisted in the event store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub uei: String,
    pub event_time: DateTime<Utc>,

    /// Severity label, e.g. "Major"
    pub severity: String,

    #[serde(default)]
    pub log_msg: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mouse_over_text: Option<String>,
    #[serde(default)]
    pub oper_instruct: Option<String>,
    #[serde(default)]
    pub ip_addr: Option<String>,
    #[serde(default)]
    pub node_id: Option<i64>,
    #[serde(default)]
    pub if_index: Option<i32>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub dist_poller: Option<String>,

    /// Alarm this event was reduced into
    #[serde(default)]
    pub alarm_id: Option<Uuid>,
}

impl EventRecord {
    pub fn new(id: i64, uei: impl Into<String>, severity: impl Into<String>) -> Self {
        Self {
            id,
            uei: uei.into(),
            event_time: Utc::now(),
            severity: severity.into(),
            log_msg: None,
            description: None,
            mouse_over_text: None,
            oper_instruct: None,
            ip_addr: None,
            node_id: None,
            if_index: None,
            service_type: None,
            dist_poller: None,
            alarm_id: None,
        }
    }

    pub fn with_log_msg(mut self, log_msg: &str) -> Self {
        self.log_msg = Some(log_msg.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_ip_addr(mut self, ip_addr: &str) -> Self {
        self.ip_addr = Some(ip_addr.to_string());
        self
    }

    pub fn with_event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = event_time;
        self
    }
}

fn default_true() -> bool {
    true
}
