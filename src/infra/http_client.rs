use crate::constants::USER_AGENT;
use crate::error::Result;
use crate::types::JsonFetcher;
use async_trait::async_trait;
use serde_json::Value;

/// Production transport: plain reqwest GET identifying the harvester via its
/// User-Agent. No retries here; a failed request fails the whole operation.
pub struct ReqwestJson {
    client: reqwest::Client,
}

impl ReqwestJson {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestJson {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JsonFetcher for ReqwestJson {
    async fn fetch_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        let body = response.json::<Value>().await?;
        Ok(body)
    }
}
