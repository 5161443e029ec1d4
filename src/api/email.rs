use async_trait::async_trait;
use lettre::{
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::env;
use std::time::Duration;
use thiserror::Error;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email configuration error: {0}")]
    Config(String),
    #[error("email send failed: {0}")]
    Transport(String),
    #[error("email send timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError>;
}

pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpSender {
    pub fn from_env() -> Result<Self, EmailError> {
        let host = env::var("SMTP_HOST").map_err(|_| EmailError::Config("SMTP_HOST not set".to_string()))?;
        let username = env::var("SMTP_USERNAME").map_err(|_| EmailError::Config("SMTP_USERNAME not set".to_string()))?;
        let password = env::var("SMTP_PASSWORD").map_err(|_| EmailError::Config("SMTP_PASSWORD not set".to_string()))?;
        let from = env::var("SMTP_FROM").map_err(|_| EmailError::Config("SMTP_FROM not set".to_string()))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .map_err(|e| EmailError::Config(e.to_string()))?
            .credentials(Credentials::new(username, password))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(self.from.parse().map_err(|e| EmailError::Config(format!("bad from address: {}", e)))?)
            .to(email.to.parse().map_err(|e| EmailError::Config(format!("bad to address: {}", e)))?)
            .subject(&email.subject)
            .body(email.text.clone())
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        tokio::time::timeout(SEND_TIMEOUT, self.transport.send(message))
            .await
            .map_err(|_| EmailError::Timeout)?
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        Ok(())
    }
}
