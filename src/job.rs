//! Job record definitions.
//!
//! A [`JobRecord`] is the unit that moves through the queue lists. It is
//! serialized to JSON for storage, so every field added here becomes part
//! of the persisted wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Default maximum number of claim attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A job waiting in `pending` or claimed into `in-flight`.
///
/// A record lives in exactly one of the two queue lists at any observable
/// instant. The claim transition stamps `claimed_at` and increments
/// `attempts`; the sweeper reads `claimed_at` (and nothing else) to decide
/// staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier for this job.
    pub id: Uuid,
    /// Caller-supplied job name, used for routing and logging.
    pub name: String,
    /// Opaque payload handed to the executing handler.
    pub payload: serde_json::Value,
    /// Number of times this job has been claimed for execution.
    pub attempts: u32,
    /// Claim budget before the sweeper discards the job.
    pub max_attempts: u32,
    /// When this job was created.
    pub created_at: DateTime<Utc>,
    /// When this job was last claimed, if ever.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a new unclaimed record with zero attempts.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: Utc::now(),
            claimed_at: None,
        }
    }

    /// Sets the claim budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Marks the record as claimed at `now` and consumes one attempt.
    ///
    /// Called exactly once per pending-to-in-flight transition, before the
    /// stamped record is written back to the store.
    pub fn stamp_claim(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.claimed_at = Some(now);
    }

    /// Returns whether the job still has claim budget left.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Returns the number of remaining claims before discard.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Returns whether the claim is old enough for the sweeper to reclaim.
    ///
    /// An unclaimed record is never stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        match self.claimed_at {
            Some(claimed_at) => now.signed_duration_since(claimed_at) >= threshold,
            None => false,
        }
    }

    /// Returns how long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_unclaimed() {
        let job = JobRecord::new("send-email", serde_json::json!({"to": "a@b.c"}));

        assert!(!job.id.is_nil());
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(job.claimed_at.is_none());
        assert!(job.should_retry());
    }

    #[test]
    fn test_stamp_claim_sets_timestamp_and_attempt() {
        let mut job = JobRecord::new("resize", serde_json::json!({}));
        let now = Utc::now();

        job.stamp_claim(now);

        assert_eq!(job.attempts, 1);
        assert_eq!(job.claimed_at, Some(now));
    }

    #[test]
    fn test_retry_budget() {
        let mut job = JobRecord::new("flaky", serde_json::json!({})).with_max_attempts(2);

        assert_eq!(job.remaining_attempts(), 2);
        job.stamp_claim(Utc::now());
        assert!(job.should_retry());
        job.stamp_claim(Utc::now());
        assert!(!job.should_retry());
        assert_eq!(job.remaining_attempts(), 0);
    }

    #[test]
    fn test_staleness() {
        let threshold = Duration::from_secs(600);
        let now = Utc::now();

        let mut job = JobRecord::new("slow", serde_json::json!({}));
        assert!(!job.is_stale(now, threshold));

        job.claimed_at = Some(now - chrono::Duration::minutes(1));
        assert!(!job.is_stale(now, threshold));

        job.claimed_at = Some(now - chrono::Duration::minutes(11));
        assert!(job.is_stale(now, threshold));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let job = JobRecord::new("export", serde_json::json!({"path": "/tmp/x"}));

        let json = serde_json::to_string(&job).expect("serialization should work");
        let parsed: JobRecord = serde_json::from_str(&json).expect("deserialization should work");

        assert_eq!(parsed, job);
    }

    #[test]
    fn test_deserializes_without_claimed_at() {
        let json = r#"{
            "id": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "name": "import",
            "payload": {},
            "attempts": 0,
            "max_attempts": 3,
            "created_at": "2026-01-01T00:00:00Z"
        }"#;

        let parsed: JobRecord = serde_json::from_str(json).expect("deserialization should work");
        assert!(parsed.claimed_at.is_none());
    }
}
