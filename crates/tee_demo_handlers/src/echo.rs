use async_trait::async_trait;
use std::time::Duration;
use tee_protocol::{Job, JobResult};
use tee_worker::Handler;

/// Returns `args.message` verbatim after a short simulated delay.
pub struct EchoHandler {
    pub simulated_work: Duration,
}

impl Default for EchoHandler {
    fn default() -> Self {
        EchoHandler {
            simulated_work: Duration::from_millis(5),
        }
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn execute(&self, job: &Job) -> anyhow::Result<JobResult> {
        let Some(message) = job.arguments.get("message").and_then(|v| v.as_str()) else {
            return Ok(JobResult::failed(job.clone(), "args.message must be a string"));
        };

        tokio::time::sleep(self.simulated_work).await;

        let payload = serde_json::json!({ "message": message });
        Ok(JobResult::ok(
            job.clone(),
            serde_json::to_vec(&payload)?,
        ))
    }

    fn tag(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn echoes_the_message() {
        let handler = EchoHandler::default();
        let job = Job {
            job_type: "echo".into(),
            arguments: HashMap::from([(
                "message".to_string(),
                serde_json::Value::String("hello".into()),
            )]),
            nonce: "n".into(),
            identity: None,
            uid: None,
            deadline_secs: None,
        };
        let result = handler.execute(&job).await.unwrap();
        assert!(result.is_success());
        let body: serde_json::Value = serde_json::from_slice(&result.payload).unwrap();
        assert_eq!(body["message"], "hello");
    }

    #[tokio::test]
    async fn missing_message_is_a_business_failure_not_an_error() {
        let handler = EchoHandler::default();
        let job = Job {
            job_type: "echo".into(),
            arguments: HashMap::new(),
            nonce: "n".into(),
            identity: None,
            uid: None,
            deadline_secs: None,
        };
        let result = handler.execute(&job).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error.contains("message"));
    }
}
