//! Alarm lifecycle transitions.
//!
//! [`AlarmLifecycleEngine::add_or_reduce`] is the body of one persist: it
//! resolves the existing alarm, decides between create, archive-and-create
//! and reduce, and writes the result. It must run inside a transaction while
//! the event's key locks are held.

use crate::config::PersisterConfig;
use crate::error::{AppError, Result};
use crate::metrics::ALARMS_TOTAL;
use crate::models::{Alarm, AlarmData, Event, EventRecord, Severity, UpdateField};
use crate::notifications::AlarmNotification;
use crate::processing::admission::alarm_data;
use crate::processing::extensions::ExtensionRegistry;
use crate::processing::resolver::ReductionResolver;
use crate::processing::situation::SituationGraphManager;
use crate::state::{AlarmStore, EventStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a persist did to the alarm set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No live alarm existed; a new one was created
    Created,
    /// A cleared alarm was archived and replaced by a new one
    Recreated,
    /// The event was folded into the existing alarm
    Reduced,
}

/// Result of [`AlarmLifecycleEngine::add_or_reduce`]
#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub alarm: Alarm,
    pub transition: Transition,
    /// To be delivered once the transaction has committed
    pub notifications: Vec<AlarmNotification>,
}

enum Plan {
    Create,
    ArchiveAndCreate(Alarm),
    Reduce(Alarm),
}

/// Alarm fields an update-field list can refresh on reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdatableField {
    LogMsg,
    DistPoller,
    IpAddr,
    MouseOverText,
    OperInstruct,
    Severity,
    Description,
}

impl UpdatableField {
    fn parse(field_name: &str) -> Option<Self> {
        let name = field_name.trim().to_ascii_lowercase();
        if name == "logmsg" {
            Some(UpdatableField::LogMsg)
        } else if name.starts_with("distpoller") {
            Some(UpdatableField::DistPoller)
        } else if name.starts_with("ipaddr") {
            Some(UpdatableField::IpAddr)
        } else if name.starts_with("mouseover") {
            Some(UpdatableField::MouseOverText)
        } else if name.starts_with("operinstruct") {
            Some(UpdatableField::OperInstruct)
        } else if name == "severity" {
            Some(UpdatableField::Severity)
        } else if name.contains("descr") {
            Some(UpdatableField::Description)
        } else {
            None
        }
    }

    fn apply(self, alarm: &mut Alarm, record: &EventRecord) {
        match self {
            UpdatableField::LogMsg => alarm.log_msg = record.log_msg.clone(),
            UpdatableField::DistPoller => alarm.dist_poller = record.dist_poller.clone(),
            UpdatableField::IpAddr => alarm.ip_addr = record.ip_addr.clone(),
            UpdatableField::MouseOverText => alarm.mouse_over_text = record.mouse_over_text.clone(),
            UpdatableField::OperInstruct => alarm.oper_instruct = record.oper_instruct.clone(),
            UpdatableField::Severity => alarm.severity = Severity::from_label(&record.severity),
            UpdatableField::Description => alarm.description = record.description.clone(),
        }
    }
}

pub struct AlarmLifecycleEngine {
    alarms: Arc<dyn AlarmStore>,
    events: Arc<dyn EventStore>,
    resolver: ReductionResolver,
    situations: SituationGraphManager,
    extensions: Arc<ExtensionRegistry>,
    create_new_if_cleared: bool,
}

impl AlarmLifecycleEngine {
    pub fn new(
        config: &PersisterConfig,
        alarms: Arc<dyn AlarmStore>,
        events: Arc<dyn EventStore>,
        extensions: Arc<ExtensionRegistry>,
    ) -> Self {
        Self {
            resolver: ReductionResolver::new(alarms.clone(), config.legacy_alarm_state),
            situations: SituationGraphManager::new(
                alarms.clone(),
                config.related_reduction_key_prefix.clone(),
                config.max_situation_depth,
            ),
            alarms,
            events,
            extensions,
            create_new_if_cleared: config.effective_create_new_if_cleared(),
        }
    }

    /// Create a new alarm for `event` or reduce it onto the existing one
    pub async fn add_or_reduce(&self, event: &Event) -> Result<PersistOutcome> {
        let data = alarm_data(event)?;

        let Some(mut record) = self.events.get_event(event.id).await? else {
            return Err(AppError::ConsistencyViolation(format!(
                "Persisted event {} ({}) no longer exists; it was probably reaped while being processed",
                event.id, data.reduction_key
            )));
        };

        let mut notifications = Vec::new();

        let plan = match self.resolver.resolve(event).await? {
            None => Plan::Create,
            Some(existing) if existing.archived => Plan::Create,
            Some(existing) if self.starts_new_alarm(&existing, event) => {
                Plan::ArchiveAndCreate(existing)
            }
            Some(existing) => Plan::Reduce(existing),
        };

        let (alarm, transition) = match plan {
            Plan::Create => {
                let alarm = self.create(event, &mut record).await?;
                (alarm, Transition::Created)
            }
            Plan::ArchiveAndCreate(existing) => {
                notifications.push(self.archive(existing).await?);
                let alarm = self.create(event, &mut record).await?;
                (alarm, Transition::Recreated)
            }
            Plan::Reduce(existing) => {
                let alarm = self.reduce(existing, event, data, &mut record).await?;
                (alarm, Transition::Reduced)
            }
        };

        notifications.push(match transition {
            Transition::Created | Transition::Recreated => AlarmNotification::Created {
                alarm: alarm.clone(),
            },
            Transition::Reduced => AlarmNotification::Reduced {
                alarm: alarm.clone(),
            },
        });

        Ok(PersistOutcome {
            alarm,
            transition,
            notifications,
        })
    }

    /// A problem event arriving for a cleared alarm starts over when configured to
    fn starts_new_alarm(&self, existing: &Alarm, event: &Event) -> bool {
        self.create_new_if_cleared && existing.severity.is_cleared() && !event.is_resolution()
    }

    async fn archive(&self, mut alarm: Alarm) -> Result<AlarmNotification> {
        let reduction_key = alarm.reduction_key.clone();
        alarm.archive();
        self.alarms.update_alarm(&alarm).await?;
        // Release the reduction key before the replacement claims it
        self.alarms.flush().await?;

        ALARMS_TOTAL.with_label_values(&["archived"]).inc();
        info!(alarm_id = %alarm.id, reduction_key = %reduction_key, "Archived cleared alarm");

        Ok(AlarmNotification::Archived {
            alarm,
            reduction_key,
        })
    }

    async fn create(&self, event: &Event, record: &mut EventRecord) -> Result<Alarm> {
        let mut alarm = Alarm::from_event(record, event);
        if event.is_resolution() {
            alarm.severity = Severity::Cleared;
        }

        self.situations.reconcile(&mut alarm, event).await?;

        record.alarm_id = Some(alarm.id);
        self.extensions.dispatch_created(&mut alarm, event, record);

        self.alarms.save_alarm(&alarm).await?;
        self.events.save_or_update_event(record).await?;

        ALARMS_TOTAL.with_label_values(&["created"]).inc();
        info!(
            alarm_id = %alarm.id,
            reduction_key = %alarm.reduction_key,
            event_id = event.id,
            severity = %alarm.severity,
            "Created new alarm"
        );

        Ok(alarm)
    }

    async fn reduce(
        &self,
        mut alarm: Alarm,
        event: &Event,
        data: &AlarmData,
        record: &mut EventRecord,
    ) -> Result<Alarm> {
        let was_resolved = alarm.is_resolved();

        alarm.last_event_id = record.id;
        alarm.last_event_time = record.event_time;
        alarm.increment_counter();

        apply_update_fields(&mut alarm, data, record);

        if event.is_resolution() {
            alarm.severity = Severity::Cleared;
        } else if was_resolved {
            alarm.severity = Severity::from_label(&record.severity);
        }
        alarm.alarm_type = data.alarm_type;

        self.situations.reconcile(&mut alarm, event).await?;

        record.alarm_id = Some(alarm.id);
        self.extensions.dispatch_updated(&mut alarm, event, record);

        self.alarms.update_alarm(&alarm).await?;
        self.events.update_event(record).await?;

        if data.auto_clean {
            let removed = self
                .events
                .delete_previous_events_for_alarm(&alarm.id, record)
                .await?;
            debug!(alarm_id = %alarm.id, removed, "Auto-cleaned previous events");
        }

        ALARMS_TOTAL.with_label_values(&["reduced"]).inc();
        debug!(
            alarm_id = %alarm.id,
            reduction_key = %alarm.reduction_key,
            event_id = event.id,
            counter = alarm.counter,
            "Reduced event into existing alarm"
        );

        Ok(alarm)
    }
}

/// Refresh alarm fields from the reduced event.
///
/// Without an explicit list only the log message is refreshed. With one, the
/// fields marked `update_on_reduction` are applied and the log message is
/// still refreshed unless the list explicitly opts it out. Returns the
/// unsupported field names that were asked to update.
fn apply_update_fields<'a>(alarm: &mut Alarm, data: &'a AlarmData, record: &EventRecord) -> Vec<&'a str> {
    let mut refresh_log_msg = true;
    let mut unsupported = Vec::new();

    for UpdateField {
        field_name,
        update_on_reduction,
    } in &data.update_fields
    {
        let Some(field) = UpdatableField::parse(field_name) else {
            if *update_on_reduction {
                warn!(
                    field_name = %field_name,
                    reduction_key = %data.reduction_key,
                    "Unsupported update field; ignoring"
                );
                unsupported.push(field_name.as_str());
            }
            continue;
        };

        if field == UpdatableField::LogMsg {
            refresh_log_msg = *update_on_reduction;
            continue;
        }
        if *update_on_reduction {
            field.apply(alarm, record);
        }
    }

    if refresh_log_msg {
        UpdatableField::LogMsg.apply(alarm, record);
    }

    unsupported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlarmType, LifecycleState};
    use crate::state::InMemoryStore;

    struct Harness {
        store: Arc<InMemoryStore>,
        engine: AlarmLifecycleEngine,
    }

    fn harness(config: PersisterConfig) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let engine = AlarmLifecycleEngine::new(
            &config,
            store.clone(),
            store.clone(),
            Arc::new(ExtensionRegistry::new()),
        );
        Harness { store, engine }
    }

    impl Harness {
        async fn record(&self, id: i64, severity: &str, log_msg: &str) {
            let record = EventRecord::new(id, "uei.test", severity).with_log_msg(log_msg);
            self.store.save_or_update_event(&record).await.unwrap();
        }

        async fn problem(&self, id: i64, severity: &str) -> PersistOutcome {
            self.record(id, severity, &format!("problem {}", id)).await;
            let event = Event::new(id, "uei.test").with_alarm_data(AlarmData::problem("down:1"));
            self.engine.add_or_reduce(&event).await.unwrap()
        }

        async fn resolution(&self, id: i64) -> PersistOutcome {
            self.record(id, "Normal", &format!("resolution {}", id)).await;
            let event = Event::new(id, "uei.test")
                .with_alarm_data(AlarmData::resolution("up:1", "down:1"));
            self.engine.add_or_reduce(&event).await.unwrap()
        }
    }

    #[test]
    fn test_update_field_names() {
        assert_eq!(UpdatableField::parse("logmsg"), Some(UpdatableField::LogMsg));
        assert_eq!(UpdatableField::parse("LogMsg"), Some(UpdatableField::LogMsg));
        assert_eq!(UpdatableField::parse("logmsgs"), None);
        assert_eq!(UpdatableField::parse("distPoller"), Some(UpdatableField::DistPoller));
        assert_eq!(UpdatableField::parse("ipAddress"), Some(UpdatableField::IpAddr));
        assert_eq!(UpdatableField::parse("mouseOverText"), Some(UpdatableField::MouseOverText));
        assert_eq!(UpdatableField::parse("operInstruct"), Some(UpdatableField::OperInstruct));
        assert_eq!(UpdatableField::parse("Severity"), Some(UpdatableField::Severity));
        assert_eq!(UpdatableField::parse("eventDescr"), Some(UpdatableField::Description));
        assert_eq!(UpdatableField::parse("nodeLabel"), None);
    }

    #[tokio::test]
    async fn test_first_problem_creates_alarm() {
        let h = harness(PersisterConfig::default());
        let outcome = h.problem(1, "Major").await;

        assert_eq!(outcome.transition, Transition::Created);
        assert_eq!(outcome.alarm.counter, 1);
        assert_eq!(outcome.alarm.severity, Severity::Major);
        assert_eq!(outcome.alarm.lifecycle_state(), LifecycleState::Active);
        assert_eq!(outcome.notifications.len(), 1);

        let record = h.store.get_event(1).await.unwrap().unwrap();
        assert_eq!(record.alarm_id, Some(outcome.alarm.id));
    }

    #[tokio::test]
    async fn test_problem_reduces_into_active_alarm() {
        let h = harness(PersisterConfig::default());
        let created = h.problem(1, "Major").await;
        let reduced = h.problem(2, "Critical").await;

        assert_eq!(reduced.transition, Transition::Reduced);
        assert_eq!(reduced.alarm.id, created.alarm.id);
        assert_eq!(reduced.alarm.counter, 2);
        assert_eq!(reduced.alarm.last_event_id, 2);
        assert_eq!(reduced.alarm.log_msg.as_deref(), Some("problem 2"));
        // Severity only changes through an update field
        assert_eq!(reduced.alarm.severity, Severity::Major);
    }

    #[tokio::test]
    async fn test_resolution_clears_alarm_and_retrigger_reduces() {
        let h = harness(PersisterConfig::default());
        let created = h.problem(1, "Major").await;

        let cleared = h.resolution(2).await;
        assert_eq!(cleared.alarm.id, created.alarm.id);
        assert_eq!(cleared.alarm.severity, Severity::Cleared);
        assert_eq!(cleared.alarm.alarm_type, AlarmType::Resolution);
        assert_eq!(cleared.alarm.counter, 2);

        let retriggered = h.problem(3, "Minor").await;
        assert_eq!(retriggered.transition, Transition::Reduced);
        assert_eq!(retriggered.alarm.id, created.alarm.id);
        assert_eq!(retriggered.alarm.counter, 3);
        assert_eq!(retriggered.alarm.severity, Severity::Minor);
        assert_eq!(retriggered.alarm.lifecycle_state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_retrigger_after_clear_archives_when_configured() {
        let config = PersisterConfig {
            create_new_if_cleared: true,
            ..PersisterConfig::default()
        };
        let h = harness(config);
        let created = h.problem(1, "Major").await;
        h.resolution(2).await;

        let retriggered = h.problem(3, "Major").await;
        assert_eq!(retriggered.transition, Transition::Recreated);
        assert_ne!(retriggered.alarm.id, created.alarm.id);
        assert_eq!(retriggered.alarm.counter, 1);

        let old = h.store.get_alarm(&created.alarm.id).await.unwrap().unwrap();
        assert_eq!(old.lifecycle_state(), LifecycleState::Archived);
        assert!(matches!(
            &retriggered.notifications[..],
            [AlarmNotification::Archived { reduction_key, .. }, AlarmNotification::Created { .. }]
                if reduction_key == "down:1"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_clear_increments_counter() {
        let config = PersisterConfig {
            create_new_if_cleared: true,
            ..PersisterConfig::default()
        };
        let h = harness(config);
        h.problem(1, "Major").await;
        h.resolution(2).await;

        let again = h.resolution(3).await;
        assert_eq!(again.transition, Transition::Reduced);
        assert_eq!(again.alarm.counter, 3);
        assert_eq!(again.alarm.severity, Severity::Cleared);
    }

    #[tokio::test]
    async fn test_resolution_without_problem_creates_cleared_alarm() {
        let h = harness(PersisterConfig::default());
        let outcome = h.resolution(1).await;

        assert_eq!(outcome.transition, Transition::Created);
        assert_eq!(outcome.alarm.reduction_key, "up:1");
        assert_eq!(outcome.alarm.severity, Severity::Cleared);
        assert_eq!(outcome.alarm.lifecycle_state(), LifecycleState::Resolved);
    }

    #[tokio::test]
    async fn test_missing_record_is_consistency_violation() {
        let h = harness(PersisterConfig::default());
        let event = Event::new(42, "uei.test").with_alarm_data(AlarmData::problem("down:1"));

        let err = h.engine.add_or_reduce(&event).await.unwrap_err();
        assert!(matches!(err, AppError::ConsistencyViolation(_)));
        assert!(err.is_retryable());
        assert_eq!(h.store.alarm_count(), 0);
    }

    #[tokio::test]
    async fn test_update_fields_policy() {
        let h = harness(PersisterConfig::default());
        h.problem(1, "Minor").await;

        let record = EventRecord::new(2, "uei.test", "Critical")
            .with_log_msg("second")
            .with_description("new description")
            .with_ip_addr("10.0.0.2");
        h.store.save_or_update_event(&record).await.unwrap();

        let data = AlarmData::problem("down:1")
            .with_update_field("Severity", true)
            .with_update_field("descr", false)
            .with_update_field("ipaddr", true)
            .with_update_field("nodeLabel", true)
            .with_update_field("logmsg", false);
        let event = Event::new(2, "uei.test").with_alarm_data(data);
        let alarm = h.engine.add_or_reduce(&event).await.unwrap().alarm;

        assert_eq!(alarm.severity, Severity::Critical);
        assert_eq!(alarm.ip_addr.as_deref(), Some("10.0.0.2"));
        assert_eq!(alarm.description, None);
        assert_eq!(alarm.log_msg.as_deref(), Some("problem 1"));
    }

    #[test]
    fn test_unsupported_field_reported_only_when_updating() {
        let record = EventRecord::new(1, "uei.test", "Major").with_log_msg("first");
        let event = Event::new(1, "uei.test").with_alarm_data(AlarmData::problem("down:1"));
        let mut alarm = Alarm::from_event(&record, &event);

        let data = AlarmData::problem("down:1")
            .with_update_field("nodeLabel", false)
            .with_update_field("ifIndex", true);
        let unsupported = apply_update_fields(&mut alarm, &data, &record);
        assert_eq!(unsupported, vec!["ifIndex"]);

        let quiet = AlarmData::problem("down:1").with_update_field("nodeLabel", false);
        assert!(apply_update_fields(&mut alarm, &quiet, &record).is_empty());
    }

    #[tokio::test]
    async fn test_update_list_without_logmsg_still_refreshes_it() {
        let h = harness(PersisterConfig::default());
        h.problem(1, "Minor").await;
        h.record(2, "Minor", "fresh").await;

        let data = AlarmData::problem("down:1").with_update_field("distPoller", true);
        let event = Event::new(2, "uei.test").with_alarm_data(data);
        let alarm = h.engine.add_or_reduce(&event).await.unwrap().alarm;

        assert_eq!(alarm.log_msg.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_auto_clean_purges_previous_events() {
        let h = harness(PersisterConfig::default());
        h.problem(1, "Major").await;
        h.problem(2, "Major").await;
        h.record(3, "Major", "third").await;

        let data = AlarmData::problem("down:1").with_auto_clean(true);
        let event = Event::new(3, "uei.test").with_alarm_data(data);
        h.engine.add_or_reduce(&event).await.unwrap();

        assert!(h.store.get_event(1).await.unwrap().is_none());
        assert!(h.store.get_event(2).await.unwrap().is_none());
        assert!(h.store.get_event(3).await.unwrap().is_some());
    }
}
