use async_trait::async_trait;
use tee_protocol::{Job, JobResult};
use tee_worker::Handler;
use url::Url;

/// Fetches a URL and returns a small envelope describing the response.
/// Not a scraper in its own right -- just enough to exercise the
/// admission-to-result path against a real network call.
pub struct WebHandler {
    client: reqwest::Client,
}

impl Default for WebHandler {
    fn default() -> Self {
        WebHandler {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Handler for WebHandler {
    async fn execute(&self, job: &Job) -> anyhow::Result<JobResult> {
        let Some(raw_url) = job.arguments.get("url").and_then(|v| v.as_str()) else {
            return Ok(JobResult::failed(job.clone(), "args.url must be a string"));
        };

        let url = match Url::parse(raw_url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                return Ok(JobResult::failed(
                    job.clone(),
                    "URL must include a scheme",
                ));
            }
            Err(err) => {
                return Ok(JobResult::failed(job.clone(), format!("invalid URL: {err}")));
            }
        };

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let snippet: String = body.chars().take(256).collect();

        let envelope = serde_json::json!({
            "status": status,
            "content_length": body.len(),
            "body_snippet": snippet,
        });
        Ok(JobResult::ok(job.clone(), serde_json::to_vec(&envelope)?))
    }

    fn tag(&self) -> &str {
        "web"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn job_with_url(url: &str) -> Job {
        Job {
            job_type: "web".into(),
            arguments: HashMap::from([(
                "url".to_string(),
                serde_json::Value::String(url.to_string()),
            )]),
            nonce: "n".into(),
            identity: None,
            uid: None,
            deadline_secs: None,
        }
    }

    #[tokio::test]
    async fn schemeless_url_is_rejected() {
        let handler = WebHandler::default();
        let result = handler.execute(&job_with_url("google")).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error.contains("URL must include a scheme"));
    }
}
