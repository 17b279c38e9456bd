//! Event notifications.
//!
//! the repository reports every successful state change to an optional
//! [`EventSink`]. Delivery is fire-and-forget: a sink cannot fail the
//! operation and the repository never reads events back.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// what happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Commit,
    Merge,
    CherryPick,
    Revert,
    BranchCreate,
    BranchDelete,
    Checkout,
    TagCreate,
    TagDelete,
    StashPush,
    StashPop,
    StashDrop,
    StashClear,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Commit => "commit",
            EventKind::Merge => "merge",
            EventKind::CherryPick => "cherry_pick",
            EventKind::Revert => "revert",
            EventKind::BranchCreate => "branch_create",
            EventKind::BranchDelete => "branch_delete",
            EventKind::Checkout => "checkout",
            EventKind::TagCreate => "tag_create",
            EventKind::TagDelete => "tag_delete",
            EventKind::StashPush => "stash_push",
            EventKind::StashPop => "stash_pop",
            EventKind::StashDrop => "stash_drop",
            EventKind::StashClear => "stash_clear",
        };
        f.write_str(s)
    }
}

/// A single notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoEvent {
    pub kind: EventKind,
    /// repository root
    pub repo: String,
    /// commit id, branch or tag the event is about
    pub reference: Option<String>,
    pub actor: Option<String>,
    pub payload: Value,
    /// free-form explanation supplied by the caller
    pub rationale: Option<String>,
    pub timestamp: String,
}

impl RepoEvent {
    pub fn new(kind: EventKind, repo: impl Into<String>) -> Self {
        Self {
            kind,
            repo: repo.into(),
            reference: None,
            actor: None,
            payload: Value::Null,
            rationale: None,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn rationale(mut self, rationale: Option<&str>) -> Self {
        self.rationale = rationale.map(str::to_string);
        self
    }
}

/// Receiver for repository events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &RepoEvent);
}

/// In-memory sink that keeps every event.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Mutex<Vec<RepoEvent>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// snapshot of the recorded events, oldest first
    pub fn events(&self) -> Vec<RepoEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// take all recorded events
    pub fn drain(&self) -> Vec<RepoEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for EventBuffer {
    fn record(&self, event: &RepoEvent) {
        self.events.lock().push(event.clone());
    }
}
