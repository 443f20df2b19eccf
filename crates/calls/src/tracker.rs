//! Call Lifecycle Tracker: per-call contexts, transcripts, and counters.
//!
//! Contexts are keyed by the request id we generate; transcripts by the
//! provider's call sid. A call counts as active from `record_started`
//! until its first terminal status. Completed calls are retained up to a
//! bound and then evicted oldest-first; active calls are never evicted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use cr_domain::call::{
    CallContext, CallRequest, CallStatus, MetricsSnapshot, Transcript, TranscriptEntry,
};
use cr_domain::trace::TraceEvent;

use crate::error::CallError;
use crate::validation;

#[derive(Default)]
struct TrackerState {
    contexts: HashMap<String, CallContext>,
    transcripts: HashMap<String, Vec<TranscriptEntry>>,
    request_by_sid: HashMap<String, String>,
    active: HashSet<String>,
    /// Call sids in completion order, oldest first.
    completed: VecDeque<String>,
    ended: HashSet<String>,
    /// Request ids whose TwiML has been served at least once.
    twiml_served: HashSet<String>,
}

/// Result of applying a status webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: CallStatus,
    /// This update moved the call out of the active set.
    pub ended: bool,
    pub active_calls: u64,
}

pub struct CallTracker {
    state: RwLock<TrackerState>,
    calls_started: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
    retain_completed: usize,
}

impl std::fmt::Debug for CallTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallTracker")
            .field("metrics", &self.metrics())
            .field("retain_completed", &self.retain_completed)
            .finish()
    }
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl CallTracker {
    pub fn new(retain_completed: usize) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            calls_started: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            retain_completed,
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Validate `req` and record a context under a fresh request id.
    pub fn prepare_call(&self, req: &CallRequest) -> Result<CallContext, CallError> {
        let req = validation::validate_request(req)?;
        let ctx = CallContext {
            request_id: Uuid::new_v4().to_string(),
            to: req.to,
            script: req.script,
            persona: req.persona,
            context: req.context,
            contact_name: req.contact_name,
            call_sid: None,
            created_at: Utc::now(),
        };
        self.state
            .write()
            .contexts
            .insert(ctx.request_id.clone(), ctx.clone());
        Ok(ctx)
    }

    /// The provider accepted the call.
    pub fn record_started(&self, request_id: &str, call_sid: &str) {
        let mut state = self.state.write();
        if let Some(ctx) = state.contexts.get_mut(request_id) {
            ctx.call_sid = Some(call_sid.to_owned());
        }
        state
            .request_by_sid
            .insert(call_sid.to_owned(), request_id.to_owned());
        state.transcripts.entry(call_sid.to_owned()).or_default();
        state.active.insert(call_sid.to_owned());
        drop(state);
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Dispatch failed; the prepared context is dropped.
    pub fn record_failed(&self, request_id: &str) {
        self.state.write().contexts.remove(request_id);
        self.record_error();
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Apply a provider status. Terminal statuses end the call once; later
    /// duplicates leave the counters alone.
    pub fn on_status(&self, call_sid: &str, status: CallStatus) -> StatusUpdate {
        let mut state = self.state.write();
        let ended = status.is_terminal() && state.active.remove(call_sid);
        // Also remembers ends of calls started before a restart.
        if status.is_terminal() && state.ended.insert(call_sid.to_owned()) {
            state.completed.push_back(call_sid.to_owned());
            self.evict(&mut state);
        }
        let active_calls = state.active.len() as u64;
        drop(state);

        if status.is_terminal() || status == CallStatus::InProgress {
            TraceEvent::CallStatusChanged {
                call_sid: call_sid.to_owned(),
                status: status.as_str().to_owned(),
                active_calls,
            }
            .emit();
        }
        if status == CallStatus::Failed && ended {
            self.record_error();
        }

        StatusUpdate {
            status,
            ended,
            active_calls,
        }
    }

    pub fn is_active(&self, call_sid: &str) -> bool {
        self.state.read().active.contains(call_sid)
    }

    /// The call is known to have reached a terminal status.
    pub fn has_ended(&self, call_sid: &str) -> bool {
        self.state.read().ended.contains(call_sid)
    }

    fn evict(&self, state: &mut TrackerState) {
        while state.completed.len() > self.retain_completed {
            let Some(sid) = state.completed.pop_front() else {
                break;
            };
            state.transcripts.remove(&sid);
            state.ended.remove(&sid);
            if let Some(request_id) = state.request_by_sid.remove(&sid) {
                state.contexts.remove(&request_id);
                state.twiml_served.remove(&request_id);
            }
            tracing::debug!(call_sid = %sid, "evicted completed call");
        }
    }

    // ── Transcripts ──────────────────────────────────────────────────

    /// Append an entry, stamping it with the server time when `timestamp`
    /// is absent.
    pub fn append_transcript(
        &self,
        call_sid: &str,
        role: &str,
        text: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> TranscriptEntry {
        let entry = TranscriptEntry {
            role: role.to_owned(),
            text: text.to_owned(),
            timestamp: timestamp.unwrap_or_else(Utc::now),
        };
        self.state
            .write()
            .transcripts
            .entry(call_sid.to_owned())
            .or_default()
            .push(entry.clone());
        entry
    }

    /// Transcript for `call_sid`; empty when nothing was recorded.
    pub fn transcript(&self, call_sid: &str) -> Transcript {
        let state = self.state.read();
        Transcript {
            call_sid: call_sid.to_owned(),
            transcript: state.transcripts.get(call_sid).cloned().unwrap_or_default(),
        }
    }

    // ── Contexts ─────────────────────────────────────────────────────

    pub fn context(&self, request_id: &str) -> Option<CallContext> {
        self.state.read().contexts.get(request_id).cloned()
    }

    pub fn context_for_call(&self, call_sid: &str) -> Option<CallContext> {
        let state = self.state.read();
        state
            .request_by_sid
            .get(call_sid)
            .and_then(|id| state.contexts.get(id))
            .cloned()
    }

    /// Note that the provider fetched TwiML for `request_id`. Every fetch
    /// after the first is a reconnect; returns whether this one was.
    pub fn note_twiml_fetch(&self, request_id: &str) -> bool {
        let first = self
            .state
            .write()
            .twiml_served
            .insert(request_id.to_owned());
        if !first {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        !first
    }

    // ── Metrics ──────────────────────────────────────────────────────

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_started: self.calls_started.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_calls: self.state.read().active.len() as u64,
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}
