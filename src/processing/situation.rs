//! Situation (related-alarm) graph maintenance.
//!
//! Relations are stored as id edge lists on the owning alarm. An event names
//! the members of its situation through parameters whose name starts with the
//! related-reduction-key prefix; that set is authoritative for every persist.

use crate::error::Result;
use crate::metrics::RELATED_EDGES_REJECTED_TOTAL;
use crate::models::{Alarm, Event};
use crate::state::AlarmStore;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Why a related alarm was not linked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeRejection {
    /// Candidate shares the owner's reduction key
    SelfEdge,
    /// Candidate already reaches the owner
    Cycle,
    /// Search gave up before proving the edge safe
    DepthExceeded,
}

impl EdgeRejection {
    fn metric_label(&self) -> &'static str {
        match self {
            EdgeRejection::SelfEdge => "self_edge",
            EdgeRejection::Cycle | EdgeRejection::DepthExceeded => "cycle",
        }
    }
}

impl fmt::Display for EdgeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeRejection::SelfEdge => write!(f, "self-edge"),
            EdgeRejection::Cycle => write!(f, "cyclic graph"),
            EdgeRejection::DepthExceeded => write!(f, "depth limit exceeded"),
        }
    }
}

/// Edge changes applied by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
    pub rejected: Vec<(Uuid, EdgeRejection)>,
}

impl ReconcileSummary {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct SituationGraphManager {
    store: Arc<dyn AlarmStore>,
    related_prefix: String,
    max_depth: usize,
}

impl SituationGraphManager {
    pub fn new(store: Arc<dyn AlarmStore>, related_prefix: impl Into<String>, max_depth: usize) -> Self {
        Self {
            store,
            related_prefix: related_prefix.into(),
            max_depth: max_depth.max(1),
        }
    }

    /// Reduction keys an event names as situation members
    pub fn related_reduction_keys(&self, event: &Event) -> BTreeSet<String> {
        event.related_reduction_keys(&self.related_prefix)
    }

    /// Live alarms for the event's related reduction keys, by id.
    ///
    /// Keys without a live alarm are dropped.
    pub async fn related_alarms(&self, event: &Event) -> Result<BTreeMap<Uuid, Alarm>> {
        let mut related = BTreeMap::new();
        for key in self.related_reduction_keys(event) {
            match self.store.find_by_reduction_key(&key).await? {
                Some(alarm) => {
                    related.insert(alarm.id, alarm);
                }
                None => debug!(event_id = event.id, reduction_key = %key, "Related alarm not found; dropping"),
            }
        }
        Ok(related)
    }

    /// Make `alarm`'s related set match the event's.
    ///
    /// Members missing from the event are unlinked; new members are linked
    /// unless they would create a self-edge or a cycle, in which case only
    /// that edge is skipped.
    pub async fn reconcile(&self, alarm: &mut Alarm, event: &Event) -> Result<ReconcileSummary> {
        let from_event = self.related_alarms(event).await?;
        let mut summary = ReconcileSummary::default();

        let stale: Vec<Uuid> = alarm
            .related_alarms
            .iter()
            .filter(|id| !from_event.contains_key(id))
            .copied()
            .collect();
        for id in stale {
            alarm.related_alarms.remove(&id);
            summary.removed.push(id);
        }

        for (id, candidate) in &from_event {
            if alarm.related_alarms.contains(id) {
                continue;
            }

            match self.check_edge(alarm, candidate).await? {
                None => {
                    alarm.related_alarms.insert(*id);
                    summary.added.push(*id);
                }
                Some(rejection) => {
                    warn!(
                        related_alarm_id = %candidate.id,
                        related_reduction_key = %candidate.reduction_key,
                        alarm_id = %alarm.id,
                        reason = %rejection,
                        "Alarm is not added as related alarm as it is forming cyclic graph"
                    );
                    RELATED_EDGES_REJECTED_TOTAL
                        .with_label_values(&[rejection.metric_label()])
                        .inc();
                    summary.rejected.push((*id, rejection));
                }
            }
        }

        if !summary.is_unchanged() {
            debug!(
                alarm_id = %alarm.id,
                added = summary.added.len(),
                removed = summary.removed.len(),
                "Related alarms reconciled"
            );
        }

        Ok(summary)
    }

    /// `None` if `owner -> candidate` may be linked
    async fn check_edge(&self, owner: &Alarm, candidate: &Alarm) -> Result<Option<EdgeRejection>> {
        if candidate.id == owner.id || candidate.reduction_key == owner.reduction_key {
            return Ok(Some(EdgeRejection::SelfEdge));
        }
        self.reaches_owner(owner, candidate).await
    }

    /// Depth-first search over the candidate's existing edges for a path back to the owner
    async fn reaches_owner(&self, owner: &Alarm, candidate: &Alarm) -> Result<Option<EdgeRejection>> {
        let mut visited: HashSet<Uuid> = HashSet::from([candidate.id]);
        let mut stack: Vec<(Uuid, usize)> = candidate
            .related_alarms
            .iter()
            .map(|id| (*id, 1))
            .collect();

        while let Some((id, depth)) = stack.pop() {
            if id == owner.id {
                return Ok(Some(EdgeRejection::Cycle));
            }
            if !visited.insert(id) {
                continue;
            }
            if depth > self.max_depth {
                return Ok(Some(EdgeRejection::DepthExceeded));
            }

            let Some(node) = self.store.get_alarm(&id).await? else {
                continue;
            };
            if node.reduction_key == owner.reduction_key {
                return Ok(Some(EdgeRejection::Cycle));
            }

            stack.extend(
                node.related_alarms
                    .iter()
                    .filter(|next| !visited.contains(next))
                    .map(|next| (*next, depth + 1)),
            );
        }

        Ok(None)
    }
}
