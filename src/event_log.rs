//! Append-only analytics event log
//!
//! Events live as one JSON array under a fixed key of a [`BlobStore`]. Each
//! tracking call reads the whole array, appends, and writes it back. The
//! instance mutex serializes that cycle inside one process; separate
//! processes sharing a store still race with last-write-wins.
//!
//! Tracking never fails from the caller's point of view: storage and encoding
//! problems are logged and dropped so analytics cannot break a user flow.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::{InsureError, InsureResult, SafeLock};
use crate::storage::BlobStore;

pub const DEFAULT_EVENTS_KEY: &str = "dao_insure_events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageView,
    Action,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Auth,
    Policy,
    Claim,
    Navigation,
    System,
}

impl FromStr for EventKind {
    type Err = InsureError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().replace('-', "_").as_str() {
            "page_view" => Ok(EventKind::PageView),
            "action" => Ok(EventKind::Action),
            "error" => Ok(EventKind::Error),
            other => Err(InsureError::validation(
                "type",
                format!("unknown event type '{other}'"),
            )),
        }
    }
}

impl FromStr for EventCategory {
    type Err = InsureError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "auth" => Ok(EventCategory::Auth),
            "policy" => Ok(EventCategory::Policy),
            "claim" => Ok(EventCategory::Claim),
            "navigation" => Ok(EventCategory::Navigation),
            "system" => Ok(EventCategory::System),
            other => Err(InsureError::validation(
                "category",
                format!("unknown event category '{other}'"),
            )),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::PageView => "page_view",
            EventKind::Action => "action",
            EventKind::Error => "error",
        };
        f.write_str(s)
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventCategory::Auth => "auth",
            EventCategory::Policy => "policy",
            EventCategory::Claim => "claim",
            EventCategory::Navigation => "navigation",
            EventCategory::System => "system",
        };
        f.write_str(s)
    }
}

/// One recorded interaction. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub category: EventCategory,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub path: String,
}

/// Input accepted by [`EventTracker::track_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorInput {
    Structured {
        message: String,
        stack: Option<String>,
    },
    Message(String),
}

impl ErrorInput {
    /// Capture an error value; its source chain stands in for a stack trace.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        ErrorInput::Structured {
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }

    fn into_payload(self) -> Map<String, Value> {
        let mut payload = Map::new();
        match self {
            ErrorInput::Structured { message, stack } => {
                payload.insert("message".into(), Value::String(message));
                if let Some(stack) = stack {
                    payload.insert("stack".into(), Value::String(stack));
                }
            }
            ErrorInput::Message(message) => {
                payload.insert("message".into(), Value::String(message));
            }
        }
        payload
    }
}

impl From<&str> for ErrorInput {
    fn from(message: &str) -> Self {
        ErrorInput::Message(message.to_string())
    }
}

impl From<String> for ErrorInput {
    fn from(message: String) -> Self {
        ErrorInput::Message(message)
    }
}

impl From<&InsureError> for ErrorInput {
    fn from(err: &InsureError) -> Self {
        ErrorInput::from_error(err)
    }
}

/// Selection applied when reading events back.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(rename = "type")]
    pub kind: Option<EventKind>,
    pub category: Option<EventCategory>,
    pub user_id: Option<String>,
}

impl EventFilter {
    pub fn matches(&self, event: &EventRecord) -> bool {
        self.kind.map_or(true, |k| k == event.kind)
            && self.category.map_or(true, |c| c == event.category)
            && self
                .user_id
                .as_deref()
                .map_or(true, |u| event.user_id.as_deref() == Some(u))
    }
}

/// Event logger bound to one storage key of an injected store.
pub struct EventLogger {
    store: Arc<dyn BlobStore>,
    key: String,
    write_lock: Mutex<()>,
}

impl EventLogger {
    pub fn new(store: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tracker that stamps events with `path` as the originating path.
    pub fn at(&self, path: impl Into<String>) -> EventTracker<'_> {
        EventTracker {
            logger: self,
            path: path.into(),
        }
    }

    fn load(&self) -> InsureResult<Vec<EventRecord>> {
        match self.store.get(&self.key)? {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| InsureError::serialization("decode event collection", e)),
        }
    }

    fn append(&self, event: EventRecord) -> InsureResult<()> {
        let _guard = self.write_lock.safe_lock("event_log")?;
        let mut events = match self.load() {
            Ok(events) => events,
            // Unreadable contents are replaced rather than blocking all tracking
            Err(InsureError::Serialization { source, .. }) => {
                tracing::warn!(key = %self.key, error = %source, "resetting unreadable event collection");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        events.push(event);
        let bytes = serde_json::to_vec(&events)
            .map_err(|e| InsureError::serialization("encode event collection", e))?;
        self.store.put(&self.key, &bytes)
    }

    /// All events in insertion order. Read failures are logged and yield an
    /// empty list.
    pub fn events(&self) -> Vec<EventRecord> {
        match self.load() {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to read events");
                Vec::new()
            }
        }
    }

    pub fn query(&self, filter: &EventFilter) -> Vec<EventRecord> {
        self.events()
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect()
    }

    /// Remove every stored event.
    pub fn clear(&self) {
        let result = self
            .write_lock
            .safe_lock("event_log")
            .and_then(|_guard| self.store.remove(&self.key));
        match result {
            Ok(()) => tracing::info!(key = %self.key, "cleared events"),
            Err(e) => tracing::error!(key = %self.key, error = %e, "failed to clear events"),
        }
    }
}

/// Path-scoped view of an [`EventLogger`].
pub struct EventTracker<'a> {
    logger: &'a EventLogger,
    path: String,
}

impl EventTracker<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append one event and return it. `None` means it could not be
    /// persisted; the failure has already been logged.
    pub fn record(
        &self,
        kind: EventKind,
        category: EventCategory,
        name: &str,
        payload: Option<Value>,
        user_id: Option<&str>,
    ) -> Option<EventRecord> {
        let event = EventRecord {
            id: Uuid::new_v4().to_string(),
            kind,
            category,
            name: name.to_string(),
            data: payload,
            user_id: user_id.map(str::to_string),
            timestamp: Utc::now(),
            path: self.path.clone(),
        };

        match self.logger.append(event.clone()) {
            Ok(()) => {
                tracing::debug!(id = %event.id, kind = %kind, category = %category, name, "event recorded");
                Some(event)
            }
            Err(e) => {
                tracing::warn!(kind = %kind, name, error = %e, "failed to persist event");
                None
            }
        }
    }

    pub fn track_page_view(&self, path: &str, user_id: Option<&str>) -> Option<EventRecord> {
        self.record(
            EventKind::PageView,
            EventCategory::Navigation,
            "page_view",
            Some(serde_json::json!({ "path": path })),
            user_id,
        )
    }

    pub fn track_action(
        &self,
        category: EventCategory,
        name: &str,
        payload: Option<Value>,
        user_id: Option<&str>,
    ) -> Option<EventRecord> {
        self.record(EventKind::Action, category, name, payload, user_id)
    }

    /// Record an application error. Context keys win over `message`/`stack`.
    pub fn track_error(
        &self,
        error: impl Into<ErrorInput>,
        context: Option<Map<String, Value>>,
        user_id: Option<&str>,
    ) -> Option<EventRecord> {
        let mut payload = error.into().into_payload();
        if let Some(context) = context {
            payload.extend(context);
        }
        self.record(
            EventKind::Error,
            EventCategory::System,
            "application_error",
            Some(Value::Object(payload)),
            user_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;
    use serde_json::json;

    fn logger() -> EventLogger {
        EventLogger::new(Arc::new(MemoryBlobStore::new()), DEFAULT_EVENTS_KEY)
    }

    /// Store whose writes always fail
    struct BrokenStore;

    impl BlobStore for BrokenStore {
        fn get(&self, _key: &str) -> InsureResult<Option<Vec<u8>>> {
            Err(InsureError::internal("storage unavailable"))
        }
        fn put(&self, _key: &str, _value: &[u8]) -> InsureResult<()> {
            Err(InsureError::internal("quota exceeded"))
        }
        fn remove(&self, _key: &str) -> InsureResult<()> {
            Err(InsureError::internal("storage unavailable"))
        }
    }

    #[test]
    fn empty_store_reads_empty() {
        assert!(logger().events().is_empty());
    }

    #[test]
    fn record_appends_last_with_fresh_id() {
        let log = logger();
        let tracker = log.at("/claims");
        let first = tracker
            .record(EventKind::Action, EventCategory::Claim, "claim_started", None, None)
            .unwrap();
        let before = log.events().len();

        let second = tracker
            .record(
                EventKind::Action,
                EventCategory::Claim,
                "claim_submitted",
                Some(json!({ "claimId": "c-1" })),
                Some("0xabc"),
            )
            .unwrap();

        let events = log.events();
        assert_eq!(events.len(), before + 1);
        assert_eq!(events.last(), Some(&second));
        assert_ne!(first.id, second.id);
        assert_eq!(second.path, "/claims");
        assert_eq!(second.user_id.as_deref(), Some("0xabc"));
    }

    #[test]
    fn clear_empties_collection() {
        let log = logger();
        log.at("/").track_page_view("/", None);
        log.clear();
        assert!(log.events().is_empty());
    }

    #[test]
    fn page_view_shape() {
        let log = logger();
        let ev = log.at("/policies").track_page_view("/policies", None).unwrap();
        assert_eq!(ev.kind, EventKind::PageView);
        assert_eq!(ev.category, EventCategory::Navigation);
        assert_eq!(ev.name, "page_view");
        assert_eq!(ev.data, Some(json!({ "path": "/policies" })));
    }

    #[test]
    fn error_from_message_and_context_merge() {
        let log = logger();
        let mut ctx = Map::new();
        ctx.insert("component".into(), json!("ClaimForm"));
        ctx.insert("message".into(), json!("overridden"));

        let ev = log.at("/claims/new").track_error("upload failed", Some(ctx), None).unwrap();
        assert_eq!(ev.kind, EventKind::Error);
        assert_eq!(ev.category, EventCategory::System);
        assert_eq!(ev.name, "application_error");
        assert_eq!(
            ev.data,
            Some(json!({ "message": "overridden", "component": "ClaimForm" }))
        );
    }

    #[test]
    fn error_from_structured_value_keeps_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = InsureError::io("write claim", io);
        let ev = logger().at("/").track_error(&err, None, None).unwrap();
        let data = ev.data.unwrap();
        assert_eq!(data["message"], json!("I/O operation failed: write claim"));
        assert!(data["stack"].as_str().unwrap().contains("disk gone"));
    }

    #[test]
    fn persistence_failure_is_swallowed() {
        let log = EventLogger::new(Arc::new(BrokenStore), DEFAULT_EVENTS_KEY);
        let tracker = log.at("/");
        assert!(tracker.track_page_view("/", None).is_none());
        assert!(log.events().is_empty());
        log.clear();
    }

    #[test]
    fn unreadable_blob_is_reset_on_write() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put(DEFAULT_EVENTS_KEY, b"{not json").unwrap();
        let log = EventLogger::new(store, DEFAULT_EVENTS_KEY);
        assert!(log.events().is_empty());
        log.at("/").track_page_view("/", None).unwrap();
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn stored_json_uses_wire_names() {
        let store = Arc::new(MemoryBlobStore::new());
        let log = EventLogger::new(store.clone(), DEFAULT_EVENTS_KEY);
        log.at("/about")
            .track_action(EventCategory::Auth, "wallet_connected", None, Some("0x1"));

        let raw = store.get(DEFAULT_EVENTS_KEY).unwrap().unwrap();
        let value: Value = serde_json::from_slice(&raw).unwrap();
        let ev = &value[0];
        assert_eq!(ev["type"], json!("action"));
        assert_eq!(ev["category"], json!("auth"));
        assert_eq!(ev["userId"], json!("0x1"));
        assert_eq!(ev["path"], json!("/about"));
    }

    #[test]
    fn query_filters_by_fields() {
        let log = logger();
        let t = log.at("/");
        t.track_page_view("/", Some("0x1"));
        t.track_action(EventCategory::Policy, "policy_viewed", None, Some("0x2"));
        t.track_error("boom", None, None);

        let filter = EventFilter {
            category: Some(EventCategory::Policy),
            ..Default::default()
        };
        assert_eq!(log.query(&filter).len(), 1);

        let filter = EventFilter {
            user_id: Some("0x1".into()),
            ..Default::default()
        };
        assert_eq!(log.query(&filter)[0].kind, EventKind::PageView);
        assert_eq!(log.query(&EventFilter::default()).len(), 3);
    }

    #[test]
    fn kind_and_category_parse() {
        assert_eq!("page-view".parse::<EventKind>().unwrap(), EventKind::PageView);
        assert_eq!("Claim".parse::<EventCategory>().unwrap(), EventCategory::Claim);
        assert!("billing".parse::<EventCategory>().is_err());
    }
}
