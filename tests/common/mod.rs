//! Shared fixtures for integration tests

#![allow(dead_code)]

use alarm_correlator::{
    config::PersisterConfig,
    error::Result,
    models::{Alarm, AlarmData, Event, EventRecord},
    processing::AlarmPersister,
    state::{EventStore, InMemoryStore},
};
use std::collections::HashMap;
use std::sync::Arc;

/// Persister wired to a fresh in-memory store
pub struct TestEngine {
    pub store: Arc<InMemoryStore>,
    pub persister: AlarmPersister,
}

pub fn engine(config: PersisterConfig) -> TestEngine {
    let store = Arc::new(InMemoryStore::new());
    let persister = AlarmPersister::new(&config, store.clone(), store.clone(), store.clone());
    TestEngine { store, persister }
}

pub fn default_engine() -> TestEngine {
    engine(PersisterConfig::default())
}

impl TestEngine {
    /// Save the event's record with `severity`, then persist the event
    pub async fn persist(&self, event: &Event, severity: &str) -> Result<Option<Alarm>> {
        let record = EventRecord::new(event.id, event.uei.clone(), severity)
            .with_log_msg(&format!("event {}", event.id));
        self.store.save_or_update_event(&record).await?;
        self.persister.persist(event).await
    }

    pub async fn problem(&self, id: i64, reduction_key: &str, severity: &str) -> Alarm {
        let event = Event::new(id, "uei.test/nodeDown").with_alarm_data(AlarmData::problem(reduction_key));
        self.persist(&event, severity).await.unwrap().unwrap()
    }

    pub async fn resolution(&self, id: i64, reduction_key: &str, clear_key: &str) -> Alarm {
        let event = Event::new(id, "uei.test/nodeUp")
            .with_alarm_data(AlarmData::resolution(reduction_key, clear_key));
        self.persist(&event, "Normal").await.unwrap().unwrap()
    }
}

/// Parse Prometheus exposition text into metric name -> lines
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics.entry(current_metric.clone()).or_insert_with(Vec::new).push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics.entry(current_metric.clone()).or_insert_with(Vec::new).push(line.to_string());
        }
    }

    metrics
}
