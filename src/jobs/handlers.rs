use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::models::form_models::{Form, FormSettings, FormSubmission, SubmissionKind};

/// Conversion payload sent to the CRM. Intake submissions contribute
/// metadata and attribution only; the encrypted PHI payload never leaves
/// its row. Conversion submissions additionally carry their plain fields.
pub fn build_crm_payload(submission: &FormSubmission, settings: &FormSettings) -> Value {
    let mut payload = json!({
        "form_id": submission.form_id,
        "submission_id": submission.id,
        "submitted_at": submission.created_at,
        "five_star": settings.ctm_five_star,
    });
    if let Some(attribution) = parse_json_field(submission.attribution.as_deref()) {
        payload["attribution"] = attribution;
    }
    if submission.kind() == Some(SubmissionKind::Conversion) {
        if let Some(fields) = parse_json_field(submission.non_phi_payload.as_deref()) {
            payload["fields"] = fields;
        }
    }
    payload
}

/// Notification email for a submission. Intake bodies name the submission
/// without reproducing any of its contents.
pub fn build_notification_email(form: &Form, submission: &FormSubmission) -> (String, String) {
    let submitted = Utc
        .timestamp_opt(submission.created_at, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| submission.created_at.to_string());

    match submission.kind() {
        Some(SubmissionKind::Conversion) => {
            let mut body = format!(
                "A new conversion was submitted through \"{}\".\n\nSubmission ID: {}\nSubmitted at: {}\n",
                form.name, submission.id, submitted
            );
            if let Some(Value::Object(fields)) = parse_json_field(submission.non_phi_payload.as_deref()) {
                body.push('\n');
                for (key, value) in &fields {
                    body.push_str(&format!("{}: {}\n", key, display_value(value)));
                }
            }
            (format!("New conversion: {}", form.name), body)
        }
        _ => {
            let body = format!(
                "A new submission containing protected health information was received for \"{}\".\n\nSubmission ID: {}\nSubmitted at: {}\n\nThe contents are not included in this email. Log in to the portal to view the submission.",
                form.name, submission.id, submitted
            );
            (format!("New form submission: {}", form.name), body)
        }
    }
}

fn parse_json_field(raw: Option<&str>) -> Option<Value> {
    raw.and_then(|s| serde_json::from_str::<Value>(s).ok())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(kind: &str) -> FormSubmission {
        FormSubmission {
            id: "sub-1".to_string(),
            form_id: "form-1".to_string(),
            form_version_id: "v1".to_string(),
            submission_kind: kind.to_string(),
            encrypted_payload: Some(b"opaque-phi-ciphertext".to_vec()),
            non_phi_payload: Some(r#"{"service": "whitening", "city": "Austin"}"#.to_string()),
            attribution: Some(r#"{"utm_source": "google", "landing_page": "/pricing"}"#.to_string()),
            ip: Some("203.0.113.9".to_string()),
            user_agent: None,
            embed_domain: None,
            ctm_sent: false,
            ctm_sent_at: None,
            email_sent: false,
            email_sent_at: None,
            created_at: 1_760_000_000,
        }
    }

    fn form() -> Form {
        Form {
            id: "form-1".to_string(),
            name: "New Patient Intake".to_string(),
            settings: "{}".to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn intake_crm_payload_carries_metadata_only() {
        let payload = build_crm_payload(&submission("intake"), &FormSettings::default());
        assert_eq!(payload["submission_id"], "sub-1");
        assert_eq!(payload["attribution"]["utm_source"], "google");
        assert!(payload.get("fields").is_none());
        assert!(!payload.to_string().contains("whitening"));
        assert!(!payload.to_string().contains("ciphertext"));
    }

    #[test]
    fn conversion_crm_payload_includes_plain_fields() {
        let mut settings = FormSettings::default();
        settings.ctm_five_star = true;
        let payload = build_crm_payload(&submission("conversion"), &settings);
        assert_eq!(payload["fields"]["service"], "whitening");
        assert_eq!(payload["five_star"], true);
    }

    #[test]
    fn intake_email_names_submission_without_contents() {
        let (subject, body) = build_notification_email(&form(), &submission("intake"));
        assert!(subject.contains("New Patient Intake"));
        assert!(body.contains("protected health information"));
        assert!(body.contains("sub-1"));
        assert!(!body.contains("whitening"));
        assert!(!body.contains("ciphertext"));
    }

    #[test]
    fn conversion_email_lists_plain_fields() {
        let (_, body) = build_notification_email(&form(), &submission("conversion"));
        assert!(body.contains("service: whitening"));
        assert!(body.contains("city: Austin"));
    }
}
