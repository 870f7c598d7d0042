//! Publishing collaborators.
//!
//! The wire protocol of the downstream target is not the pipeline's concern:
//! stages call a [`Publisher`] and persist whatever identifier it returns.
//! Delivery is at-least-once; the stable idempotency key (the item's content
//! hash) lets the target collapse retries of the same item.

use std::time::Duration;

use postforge_common::{Error, Result};

use crate::config::PublisherConfig;

/// One item ready for publication.
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub title: &'a str,
    pub payload: &'a str,
    pub labels: &'a [String],
    /// Stable across retries of the same content.
    pub idempotency_key: &'a str,
}

/// Downstream publishing target.
pub trait Publisher: Send + Sync {
    /// Cheap reachability/credential check, run during validation.
    fn health_check(&self) -> Result<()>;

    /// Publish one item, returning the identifier the target assigned.
    /// Implementations own their per-call timeout; a timeout must surface as
    /// an error, never a hang.
    fn publish_item(&self, request: &PublishRequest<'_>) -> Result<String>;
}

/// REST publisher over the configured endpoint.
pub struct HttpPublisher {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_token: String,
    collection_id: String,
}

impl HttpPublisher {
    pub fn new(config: &PublisherConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            collection_id: config.collection_id.clone(),
        })
    }
}

impl Publisher for HttpPublisher {
    fn health_check(&self) -> Result<()> {
        if self.endpoint.is_empty() || self.api_token.is_empty() || self.collection_id.is_empty() {
            return Err(Error::invalid_input(
                "publisher endpoint, api_token, and collection_id must be configured",
            ));
        }

        let url = format!("{}/collections/{}", self.endpoint, self.collection_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .map_err(|e| Error::io(format!("publisher unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::io(format!(
                "publisher returned {} for {}",
                response.status(),
                url
            )));
        }
        Ok(())
    }

    fn publish_item(&self, request: &PublishRequest<'_>) -> Result<String> {
        let url = format!("{}/collections/{}/posts", self.endpoint, self.collection_id);
        let body = serde_json::json!({
            "title": request.title,
            "content": request.payload,
            "labels": request.labels,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Idempotency-Key", request.idempotency_key)
            .json(&body)
            .send()
            .map_err(|e| Error::io(format!("publish failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(Error::io(format!("publish rejected ({status}): {detail}")));
        }

        let parsed: serde_json::Value = response
            .json()
            .map_err(|e| Error::io(format!("publish response unreadable: {e}")))?;
        parsed
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::io("publish response missing id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_requires_credentials() {
        let publisher = HttpPublisher::new(&PublisherConfig::default()).unwrap();
        let err = publisher.health_check().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let mut config = PublisherConfig::default();
        config.endpoint = "https://api.example.net/".into();
        let publisher = HttpPublisher::new(&config).unwrap();
        assert_eq!(publisher.endpoint, "https://api.example.net");
    }
}
