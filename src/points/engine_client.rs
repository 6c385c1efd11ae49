// Transport to the rule engine's calculate endpoint

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::points::error::{PointsError, PointsResult};

/// Client side of the rule engine's calculation operation.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Submit the full order message and return the awarded points.
    async fn calculate(&self, order_json: &str) -> PointsResult<i32>;
}

/// HTTP client for the engine service.
pub struct HttpEngineClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CalculateResponse {
    points: i32,
}

impl HttpEngineClient {
    pub fn new(base_url: impl Into<String>) -> PointsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn calculate(&self, order_json: &str) -> PointsResult<i32> {
        let url = format!("{}/calculate", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(order_json.to_owned())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PointsError::EngineStatus(response.status().as_u16()));
        }

        let body: CalculateResponse = response.json().await?;
        Ok(body.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_tolerated() {
        let client = HttpEngineClient::new("http://engine:8080/").unwrap();
        assert_eq!(client.base_url.trim_end_matches('/'), "http://engine:8080");
    }
}
