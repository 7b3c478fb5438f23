//! Queue payload referencing a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobRecord, JobStatus};

/// Snapshot of a [`JobRecord`] taken when the job was published.
///
/// The status carried here is advisory; the job store holds the
/// authoritative value. It is kept as the raw published string so that an
/// unfamiliar status never makes an otherwise valid message undeliverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub id: JobId,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl JobMessage {
    /// Decode a message body received from the queue.
    pub fn decode(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Encode the message as a queue body.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The status as published, if it is one we know.
    pub fn published_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }
}

impl From<&JobRecord> for JobMessage {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            description: record.description.clone(),
            status: record.status.as_str().to_string(),
            created_at: record.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[test]
    fn wire_format_uses_camel_case_fields() {
        let record = JobRecord::new("transcode");
        let body = JobMessage::from(&record).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(value["id"], record.id.to_string());
        assert_eq!(value["description"], "transcode");
        assert_eq!(value["status"], "Pending");
        assert!(value["createdAt"].is_string());
        assert!(value.get("created_at").is_none());
    }

    #[test]
    fn decodes_externally_produced_body() {
        let body = r#"{
            "id": "0b7d8c52-6f2e-4f4e-9a51-3b1c1f0d2a11",
            "description": "render report",
            "status": "Pending",
            "createdAt": "2025-03-01T12:30:00.1234567Z"
        }"#;
        let message = JobMessage::decode(body).unwrap();
        assert_eq!(
            message.id.to_string(),
            "0b7d8c52-6f2e-4f4e-9a51-3b1c1f0d2a11"
        );
        assert_eq!(message.published_status(), Some(JobStatus::Pending));
    }

    #[test]
    fn unknown_published_status_still_decodes() {
        let body = r#"{"id":"0b7d8c52-6f2e-4f4e-9a51-3b1c1f0d2a11","description":"x","status":"Queued","createdAt":"2025-03-01T12:30:00Z"}"#;
        let message = JobMessage::decode(body).unwrap();
        assert_eq!(message.published_status(), None);
    }

    #[test]
    fn rejects_body_without_uuid() {
        assert!(JobMessage::decode("render report").is_err());
        let body = r#"{"id":"J1","description":"x","status":"Pending","createdAt":"2025-03-01T12:30:00Z"}"#;
        assert!(JobMessage::decode(body).is_err());
    }
}
