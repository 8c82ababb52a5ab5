use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A job as submitted by a requester. Immutable once admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,

    /// Requester-chosen, must be unique per `identity`. Also used as the
    /// salt that binds the result ciphertext to this request.
    pub nonce: String,

    #[serde(default)]
    pub identity: Option<String>,

    /// Assigned at admission; absent on the wire until then.
    #[serde(default)]
    pub uid: Option<Uuid>,

    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

/// The outcome of running a `Job` through its handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job: Job,

    #[serde(default, with = "payload_base64")]
    pub payload: Vec<u8>,

    #[serde(default)]
    pub error: String,
}

impl JobResult {
    pub fn ok(job: Job, payload: Vec<u8>) -> Self {
        JobResult {
            job,
            payload,
            error: String::new(),
        }
    }

    pub fn failed(job: Job, error: impl Into<String>) -> Self {
        JobResult {
            job,
            payload: Vec::new(),
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

mod payload_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
