pub mod admission;
pub mod extensions;
pub mod lifecycle;
pub mod locks;
pub mod persister;
pub mod resolver;
pub mod situation;

pub use admission::admit;
pub use extensions::{AlarmPersisterExtension, ExtensionRegistry};
pub use lifecycle::{AlarmLifecycleEngine, PersistOutcome, Transition};
pub use locks::{KeyLockCoordinator, KeyLockGuard};
pub use persister::AlarmPersister;
pub use resolver::ReductionResolver;
pub use situation::{EdgeRejection, ReconcileSummary, SituationGraphManager};
