use crate::metrics::EXTENSION_FAILURES_TOTAL;
use crate::models::{Alarm, Event, EventRecord};
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Plugin hook invoked inside the persist transaction, before the alarm is written.
///
/// Extensions may enrich the alarm. They are best effort: an error or a panic
/// is logged and the alarm is persisted regardless.
pub trait AlarmPersisterExtension: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn after_alarm_created(
        &self,
        _alarm: &mut Alarm,
        _event: &Event,
        _record: &EventRecord,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn after_alarm_updated(
        &self,
        _alarm: &mut Alarm,
        _event: &Event,
        _record: &EventRecord,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Callback {
    Created,
    Updated,
}

impl Callback {
    fn as_str(&self) -> &'static str {
        match self {
            Callback::Created => "after_alarm_created",
            Callback::Updated => "after_alarm_updated",
        }
    }
}

/// Runtime set of registered extensions.
///
/// Dispatch iterates over a snapshot, so extensions can be registered and
/// unregistered while events are in flight.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<Vec<Arc<dyn AlarmPersisterExtension>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension; returns `false` if it was already registered
    pub fn register(&self, extension: Arc<dyn AlarmPersisterExtension>) -> bool {
        let mut extensions = self.extensions.write();
        if extensions.iter().any(|e| same_extension(e, &extension)) {
            return false;
        }
        debug!(extension = extension.name(), "Extension registered");
        extensions.push(extension);
        true
    }

    /// Unregister an extension; returns `false` if it was not registered
    pub fn unregister(&self, extension: &Arc<dyn AlarmPersisterExtension>) -> bool {
        let mut extensions = self.extensions.write();
        let before = extensions.len();
        extensions.retain(|e| !same_extension(e, extension));
        let removed = extensions.len() != before;
        if removed {
            debug!(extension = extension.name(), "Extension unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn AlarmPersisterExtension>> {
        self.extensions.read().clone()
    }

    /// Run `after_alarm_created` on every extension; returns the number that failed
    pub fn dispatch_created(&self, alarm: &mut Alarm, event: &Event, record: &EventRecord) -> usize {
        self.dispatch(Callback::Created, alarm, event, record)
    }

    /// Run `after_alarm_updated` on every extension; returns the number that failed
    pub fn dispatch_updated(&self, alarm: &mut Alarm, event: &Event, record: &EventRecord) -> usize {
        self.dispatch(Callback::Updated, alarm, event, record)
    }

    fn dispatch(&self, callback: Callback, alarm: &mut Alarm, event: &Event, record: &EventRecord) -> usize {
        let mut failures = 0;

        for extension in self.snapshot() {
            let outcome = catch_unwind(AssertUnwindSafe(|| match callback {
                Callback::Created => extension.after_alarm_created(alarm, event, record),
                Callback::Updated => extension.after_alarm_updated(alarm, event, record),
            }));

            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };

            failures += 1;
            EXTENSION_FAILURES_TOTAL
                .with_label_values(&[callback.as_str()])
                .inc();
            error!(
                extension = extension.name(),
                callback = callback.as_str(),
                alarm_id = %alarm.id,
                error = %failure,
                "An error occurred while invoking the extension callbacks"
            );
        }

        failures
    }
}

fn same_extension(a: &Arc<dyn AlarmPersisterExtension>, b: &Arc<dyn AlarmPersisterExtension>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
