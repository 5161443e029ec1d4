use std::sync::Arc;
use diesel::result::Error as DieselError;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;
use crate::api::email::{EmailSender, OutboundEmail};
use crate::models::user_models::NewNotification;
use crate::repositories::notification_repository::NotificationRepository;
use crate::repositories::user_repository::UserRepository;

#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub link_url: Option<String>,
    pub meta: Value,
}

/// Persists an in-app notification row and, when the recipient has email
/// notifications enabled, sends a best-effort email copy. The email leg
/// never fails the caller.
pub struct NotificationSink {
    notifications: Arc<NotificationRepository>,
    users: Arc<UserRepository>,
    email: Option<Arc<dyn EmailSender>>,
}

impl NotificationSink {
    pub fn new(
        notifications: Arc<NotificationRepository>,
        users: Arc<UserRepository>,
        email: Option<Arc<dyn EmailSender>>,
    ) -> Self {
        Self { notifications, users, email }
    }

    pub async fn create(&self, request: NotificationRequest) -> Result<(), DieselError> {
        let now = chrono::Utc::now().timestamp();
        self.notifications.insert(NewNotification {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            title: request.title.clone(),
            body: request.body.clone(),
            link_url: request.link_url.clone(),
            meta: request.meta.to_string(),
            created_at: now,
        })?;

        if let Some(sender) = &self.email {
            match self.users.find_by_id(&request.user_id) {
                Ok(Some(user)) if user.email_notifications => {
                    let email = OutboundEmail {
                        to: user.email.clone(),
                        subject: request.title.clone(),
                        text: match &request.link_url {
                            Some(link) => format!("{}\n\n{}", request.body, link),
                            None => request.body.clone(),
                        },
                    };
                    if let Err(e) = sender.send(&email).await {
                        error!("Failed to send notification email copy to user {}: {}", request.user_id, e);
                    }
                }
                Ok(_) => {
                    info!("Skipping email copy for user {}: disabled or unknown user", request.user_id);
                }
                Err(e) => {
                    error!("Failed to load user {} for notification email copy: {}", request.user_id, e);
                }
            }
        }
        Ok(())
    }
}
