use std::sync::Mutex;

use serde::Serialize;
use serde_json::{Value, json};

use crate::config::ApiConfig;

pub const REGISTER_ROUTE: &str = "scigateway:api:register_route";
pub const NOTIFICATION: &str = "scigateway:api:notification";

/// One-way message for the host shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MicroFrontendEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Information,
    Warning,
    Error,
}

/// Fire-and-forget delivery; sinks never report back.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: MicroFrontendEvent);
}

pub fn register_routes(config: &ApiConfig, sink: &dyn EventSink) {
    for route in &config.routes {
        sink.dispatch(MicroFrontendEvent {
            event_type: REGISTER_ROUTE.to_string(),
            payload: json!({
                "section": route.section,
                "link": route.link,
                "plugin": config.plugin_name,
                "displayName": route.display_name,
                "order": route.order.unwrap_or(0),
                "helpSteps": [],
                "logoLightMode": null,
                "logoDarkMode": null,
            }),
        });
    }
}

pub fn notify(sink: &dyn EventSink, severity: Severity, message: &str) {
    sink.dispatch(MicroFrontendEvent {
        event_type: NOTIFICATION.to_string(),
        payload: json!({ "severity": severity, "message": message }),
    });
}

/// Writes events to the log; used where no shell is listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn dispatch(&self, event: MicroFrontendEvent) {
        tracing::info!(event_type = %event.event_type, payload = %event.payload, "micro-frontend event");
    }
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<MicroFrontendEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MicroFrontendEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingEventSink {
    fn dispatch(&self, event: MicroFrontendEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
