//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use generic_rw_postgres::app::SchemaState;
use generic_rw_postgres::{MappingRegistry, MemoryStore, RwService, TableMapping};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Table `t`: `{id: ":id", body: "$", ts: "@.timestamp"}` with conflict detection on.
pub fn scenario_mapping() -> TableMapping {
    TableMapping::builder("t", "id")
        .column("id", ":id")
        .column("body", "$")
        .column("ts", "@.timestamp")
        .conflict_detection(true)
        .build()
        .unwrap()
}

/// Same columns as [`scenario_mapping`] but written with plain upserts.
pub fn upsert_mapping() -> TableMapping {
    TableMapping::builder("u", "id")
        .column("id", ":id")
        .column("body", "$")
        .column("ts", "@.timestamp")
        .build()
        .unwrap()
}

pub fn memory_service(mappings: Vec<TableMapping>) -> RwService<MemoryStore> {
    RwService::new(
        MemoryStore::new(),
        MappingRegistry::new(mappings).unwrap(),
        SchemaState::Matched { version: 3 },
    )
}

pub fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Records the level and message of every event it sees.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl EventRecorder {
    pub fn count(&self, level: Level, message: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, m)| *l == level && m == message)
            .count()
    }

    pub fn count_message(&self, message: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m)| m == message)
            .count()
    }
}

impl<S: Subscriber> Layer<S> for EventRecorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.message));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

/// Installs a recorder as the thread's default subscriber until the guard drops.
pub fn record_events() -> (EventRecorder, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::layer::SubscriberExt;

    let recorder = EventRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (recorder, guard)
}
