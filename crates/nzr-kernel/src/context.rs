//! Conversational state carried across model calls.
//!
//! A [`Context`] is keyed by an opaque id and owned by the context store;
//! backends only ever see a borrowed snapshot passed at call time. Expiry is
//! measured from `updated_at`, so every mutation pushes the deadline out.

use crate::protocol::Payload;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a context's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Payload,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Payload::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Bounded, TTL-scoped conversational state.
///
/// The serialized form doubles as the export/import snapshot:
/// `{context_id, created_at, updated_at, metadata, messages, state, ttl}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub context_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Payload,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub state: Payload,
    /// Seconds since the last update after which the context expires.
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl Context {
    pub fn new(context_id: impl Into<String>, ttl: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            context_id: context_id.into(),
            created_at: now,
            updated_at: now,
            metadata: Payload::new(),
            messages: Vec::new(),
            state: Payload::new(),
            ttl,
        }
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    /// Refresh `updated_at`, which also resets the expiry clock.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn update_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
        self.touch();
    }

    /// Trim the history to `max` entries, always keeping the first message
    /// plus the most recent `max - 1`. A `max` of zero is treated as one.
    ///
    /// Returns the number of messages dropped.
    pub fn trim_messages(&mut self, max: usize) -> usize {
        let max = max.max(1);
        let len = self.messages.len();
        if len <= max {
            return 0;
        }
        let tail_start = len - (max - 1);
        self.messages.drain(1..tail_start);
        tail_start - 1
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// `ttl` set and more than `ttl` seconds elapsed since `updated_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => {
                let age_ms = now.signed_duration_since(self.updated_at).num_milliseconds();
                age_ms > ttl_millis(ttl)
            }
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = self.ttl?;
        let delta = TimeDelta::try_milliseconds(ttl_millis(ttl))?;
        self.updated_at.checked_add_signed(delta)
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            context_id: self.context_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.messages.len(),
            metadata: self.metadata.clone(),
            ttl: self.ttl,
            expires_at: self.expires_at(),
        }
    }
}

/// TTL in milliseconds, saturating for TTLs beyond the representable range.
fn ttl_millis(ttl: u64) -> i64 {
    i64::try_from(ttl).unwrap_or(i64::MAX).saturating_mul(1000)
}

/// Listing entry produced by the context store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub context_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub metadata: Payload,
    pub ttl: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
}
