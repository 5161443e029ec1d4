use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("crm returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn send_conversion(&self, payload: &Value) -> Result<(), CrmError>;
}

pub struct HttpCrmClient {
    client: Client,
    url: String,
}

impl HttpCrmClient {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, url }
    }

    /// Absent configuration is not an error: callers treat `None` as a
    /// logged no-op.
    pub fn from_env() -> Option<Self> {
        env::var("CRM_CONVERSION_URL").ok().filter(|u| !u.is_empty()).map(Self::new)
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn send_conversion(&self, payload: &Value) -> Result<(), CrmError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrmError::Status(status.as_u16()));
        }
        Ok(())
    }
}
