//! Queue entries: the draft handed to the store and the stored update read back.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::ids::UpdateId;
use crate::mutation::{Attachment, HttpMethod, Mutation, MutationError};

/// A mutation that has not been written to the durable queue yet.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDraft {
    pub mutation: Mutation,
    pub attachment: Option<Attachment>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
    /// Client-generated idempotency key, stable across every attempt.
    pub request_key: String,
}

impl UpdateDraft {
    #[must_use]
    pub fn new(mutation: Mutation, created_at: i64) -> Self {
        Self {
            mutation,
            attachment: None,
            created_at,
            attempts: 0,
            last_attempt_at: None,
            request_key: generate_request_key(),
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.attachment.is_some()
    }

    /// Shape check applied before the draft reaches durable storage.
    pub fn validate(&self) -> Result<(), MutationError> {
        if self.attachment.is_some() && !matches!(self.mutation, Mutation::LocationFound(_)) {
            return Err(MutationError::UnexpectedAttachment);
        }
        Ok(())
    }
}

/// An update that lives in the durable queue.
///
/// Exists iff its effect has not been confirmed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub id: UpdateId,
    pub target_url: String,
    pub http_method: HttpMethod,
    pub mutation: Mutation,
    pub attachment: Option<Attachment>,
    pub created_at: i64,
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
    pub request_key: String,
}

impl PendingUpdate {
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.attachment.is_some()
    }

    /// The persisted record shape shared by every execution context.
    #[must_use]
    pub fn to_record(&self) -> QueueRecord {
        QueueRecord {
            id: self.id,
            url: self.target_url.clone(),
            method: self.http_method,
            body: self.mutation.body(),
            timestamp: self.created_at,
            attempts: self.attempts,
            last_tried: self.last_attempt_at,
            is_multipart: self.is_multipart().then_some(true),
        }
    }
}

/// Interchange form of a queued update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub id: UpdateId,
    pub url: String,
    pub method: HttpMethod,
    pub body: Value,
    pub timestamp: i64,
    pub attempts: u32,
    pub last_tried: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_multipart: Option<bool>,
}

#[must_use]
pub fn generate_request_key() -> String {
    format!("waypoint-{}", Uuid::new_v4())
}
