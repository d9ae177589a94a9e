//! Wire types for jobs: the payload envelope stored in Redis, plus the
//! failed-job and recent-job records derived from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{DateTime, Duration, HorizonError, HorizonResult};

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

pub fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Terminal (or in-flight) processing status of a job.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Reserved,
    Completed,
    Failed,
}

impl AsRef<str> for Status {
    fn as_ref(&self) -> &str {
        match self {
            Status::Pending => "pending",
            Status::Reserved => "reserved",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> Result<Status, ()> {
        match s {
            "pending" => Ok(Status::Pending),
            "reserved" => Ok(Status::Reserved),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            _ => Err(()),
        }
    }
}

/// The job envelope stored in Redis; the source of truth during a job's
/// lifetime.
///
/// Serialised as UTF-8 JSON. Unknown fields are ignored on decode, and
/// missing optional fields take their defaults, so payloads written by
/// older/newer producers round-trip safely.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Payload {
    /// Globally unique opaque identifier.
    pub id: String,

    /// Job type; the registry key used to reconstruct the user job.
    pub name: String,

    /// Logical queue this job was dispatched to.
    pub queue: String,

    /// Opaque encoded job body; round-trips verbatim through the registry.
    #[serde(default)]
    pub data: Value,

    /// Count of reservations so far; incremented on each pop.
    #[serde(default)]
    pub attempts: u32,

    /// Attempt ceiling before the job lands in the failed set.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Free-text tags used for filtering; indexed best-effort.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub created_at: DateTime,

    /// Earliest time at which this job may be reserved.
    pub available_at: DateTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime>,

    /// Per-run deadline.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    /// Base delay applied when re-queueing after a failure.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Free-form metadata carried alongside the job body.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Payload {
    /// Serialise this payload to its JSON wire format.
    pub fn encode(&self) -> HorizonResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Reconstruct a payload from its JSON wire format.
    pub fn decode(data: &[u8]) -> HorizonResult<Payload> {
        serde_json::from_slice(data).map_err(|err| HorizonError::Parse(err.to_string()))
    }
}

/// A job that exhausted its retries, retained with exception text.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FailedJob {
    pub id: String,
    pub queue: String,
    pub payload: Payload,
    pub exception: String,
    pub failed_at: DateTime,
}

/// Entry in the capped tail of terminal outcomes exposed for observability.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecentJob {
    pub id: String,
    pub name: String,
    pub queue: String,
    pub status: Status,
    pub attempts: u32,
    pub runtime: Duration,
    pub completed_at: DateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn payload() -> Payload {
        Payload {
            id: "01234567-89ab-cdef-0123-456789abcdef".to_owned(),
            name: "send_email".to_owned(),
            queue: "mail".to_owned(),
            data: serde_json::json!({"to": "user@example.com"}),
            attempts: 1,
            max_attempts: 5,
            tags: vec!["mail".to_owned(), "user:42".to_owned()],
            created_at: DateTime::from_unix(1_700_000_000),
            available_at: DateTime::from_unix(1_700_000_000),
            reserved_at: Some(DateTime::from_unix(1_700_000_010)),
            timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(10),
            metadata: Map::new(),
        }
    }

    #[test]
    fn status_to_from_str() {
        for status in [Status::Pending, Status::Reserved, Status::Completed, Status::Failed] {
            assert_eq!(status, Status::from_str(status.as_ref()).unwrap());
        }
        assert!(Status::from_str("unknown").is_err());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let p = payload();
        let decoded = Payload::decode(&p.encode().unwrap()).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn decode_applies_defaults() {
        let raw = serde_json::json!({
            "id": "abc",
            "name": "noop",
            "queue": "default",
            "created_at": "2023-11-14T22:13:20Z",
            "available_at": "2023-11-14T22:13:20Z",
        });
        let p = Payload::decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(p.attempts, 0);
        assert_eq!(p.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(p.tags.is_empty());
        assert!(p.reserved_at.is_none());
        assert_eq!(p.timeout, Duration::from_secs(60));
        assert_eq!(p.retry_delay, Duration::from_secs(5));
        assert!(p.metadata.is_empty());
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let raw = serde_json::json!({
            "id": "abc",
            "name": "noop",
            "queue": "default",
            "created_at": "2023-11-14T22:13:20Z",
            "available_at": "2023-11-14T22:13:20Z",
            "some_future_field": {"nested": true},
        });
        assert!(Payload::decode(raw.to_string().as_bytes()).is_ok());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Payload::decode(b"not json"),
            Err(HorizonError::Parse(_))
        ));
    }
}
