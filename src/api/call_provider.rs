use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("call provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("call provider returned status {0}")]
    Status(u16),
    #[error("unrecognized call list shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub account_id: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct CallsQuery {
    pub start_date: String, // YYYY-MM-DD
    pub end_date: String,
    pub per_page: u32,
    pub page: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SalePayload {
    pub score: i32,
    pub conversion: i32,
    pub value: f64,
    pub sale_date: String,
}

#[async_trait]
pub trait CallProvider: Send + Sync {
    async fn fetch_calls_page(
        &self,
        credentials: &ProviderCredentials,
        query: &CallsQuery,
    ) -> Result<Vec<Value>, ProviderError>;

    async fn post_sale(
        &self,
        credentials: &ProviderCredentials,
        call_id: &str,
        sale: &SalePayload,
    ) -> Result<(), ProviderError>;
}

pub struct CallTrackingClient {
    client: Client,
    base_url: String,
}

impl CallTrackingClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, base_url }
    }

    pub fn from_env() -> Self {
        let base_url = env::var("CTM_BASE_URL")
            .unwrap_or_else(|_| "https://api.calltrackingmetrics.com".to_string());
        Self::new(base_url)
    }
}

/// The provider has shipped (at least) three list shapes over time:
/// `data.calls[]`, `calls[]` and `data[]`. Accept all of them.
pub fn extract_calls(body: &Value) -> Result<Vec<Value>, ProviderError> {
    if let Some(calls) = body.pointer("/data/calls").and_then(Value::as_array) {
        return Ok(calls.clone());
    }
    if let Some(calls) = body.get("calls").and_then(Value::as_array) {
        return Ok(calls.clone());
    }
    if let Some(calls) = body.get("data").and_then(Value::as_array) {
        return Ok(calls.clone());
    }
    Err(ProviderError::Shape(
        body.as_object()
            .map(|o| o.keys().cloned().collect::<Vec<_>>().join(","))
            .unwrap_or_else(|| "non-object body".to_string()),
    ))
}

#[async_trait]
impl CallProvider for CallTrackingClient {
    async fn fetch_calls_page(
        &self,
        credentials: &ProviderCredentials,
        query: &CallsQuery,
    ) -> Result<Vec<Value>, ProviderError> {
        let url = format!(
            "{}/api/v1/accounts/{}/calls",
            self.base_url, credentials.account_id
        );
        let response = self
            .client
            .get(&url)
            .basic_auth(&credentials.api_key, Some(&credentials.api_secret))
            .query(&[
                ("per_page", query.per_page.to_string()),
                ("page", query.page.to_string()),
                ("order", "desc".to_string()),
                ("start_date", query.start_date.clone()),
                ("end_date", query.end_date.clone()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        extract_calls(&body)
    }

    async fn post_sale(
        &self,
        credentials: &ProviderCredentials,
        call_id: &str,
        sale: &SalePayload,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/api/v1/accounts/{}/calls/{}/sale",
            self.base_url, credentials.account_id, call_id
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&credentials.api_key, Some(&credentials.api_secret))
            .json(sale)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_data_calls_shape() {
        let body = json!({"data": {"calls": [{"id": "a"}, {"id": "b"}]}});
        let calls = extract_calls(&body).unwrap();
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn extracts_top_level_calls_shape() {
        let body = json!({"calls": [{"id": "a"}]});
        assert_eq!(extract_calls(&body).unwrap().len(), 1);
    }

    #[test]
    fn extracts_data_array_shape() {
        let body = json!({"data": [{"id": "a"}, {"id": "b"}, {"id": "c"}]});
        assert_eq!(extract_calls(&body).unwrap().len(), 3);
    }

    #[test]
    fn rejects_unknown_shape() {
        let body = json!({"results": []});
        assert!(matches!(extract_calls(&body), Err(ProviderError::Shape(_))));
    }
}
