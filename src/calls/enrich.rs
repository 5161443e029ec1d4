use crate::models::call_models::{ActiveClient, CallerType};

/// Strips a phone number down to digits, preserving a leading `+`. Numbers
/// with fewer than 7 digits are treated as absent.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 {
        return None;
    }
    Some(if has_plus { format!("+{}", digits) } else { digits })
}

/// Finds the active client whose stored phone matches the normalized
/// caller number. Stored numbers vary in formatting, so both sides are
/// normalized before comparison.
pub fn match_active_client<'a>(clients: &'a [ActiveClient], normalized_phone: &str) -> Option<&'a ActiveClient> {
    clients.iter().find(|client| {
        client
            .client_phone
            .as_deref()
            .and_then(normalize_phone)
            .map_or(false, |phone| phone == normalized_phone)
    })
}

/// Caller identity from enrichment inputs: an active-client hit wins,
/// otherwise prior call volume decides between repeat and new.
pub fn caller_identity(is_active_client: bool, prior_calls: i64) -> (CallerType, i64) {
    let sequence = prior_calls + 1;
    if is_active_client {
        (CallerType::ReturningCustomer, sequence)
    } else if prior_calls >= 1 {
        (CallerType::Repeat, sequence)
    } else {
        (CallerType::New, 1)
    }
}
