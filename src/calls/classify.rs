use once_cell::sync::Lazy;
use regex::Regex;
use crate::models::call_models::Category;

/// Synthetic bodies the provider generates when no real message exists.
/// These must never reach the AI collaborator.
const STUB_PREFIXES: &[&str] = &[
    "new call from:",
    "repeat call from:",
    "caller transcript:",
    "call from:",
    "website visitor",
];

pub fn is_provider_stub(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if lowered == "website" {
        return true;
    }
    STUB_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix))
}

/// Picks the text worth classifying: a transcript wins, otherwise a message
/// body longer than 10 characters that is not a provider stub.
pub fn classifiable_text(transcript: Option<&str>, message: Option<&str>) -> Option<String> {
    if let Some(t) = transcript {
        let t = t.trim();
        if !t.is_empty() {
            return Some(t.to_string());
        }
    }
    if let Some(m) = message {
        let m = m.trim();
        if m.chars().count() > 10 && !is_provider_stub(m) {
            return Some(m.to_string());
        }
    }
    None
}

/// Category for records with nothing to classify.
pub fn fallback_category(is_voicemail: bool, is_missed: bool, zero_duration: bool) -> Category {
    if is_voicemail {
        Category::Voicemail
    } else if is_missed || zero_duration {
        Category::Unanswered
    } else {
        Category::Neutral
    }
}

const CATEGORY_BLOCK: &str = r#"Classify the call into exactly one category:
- converted: the caller booked, bought or otherwise became a customer
- warm: a promising lead that has not committed yet
- very_good: a very strong lead, close to converting
- needs_attention: someone on the team must follow up promptly
- applicant: a job applicant, not a customer
- voicemail: the call went to voicemail
- unanswered: the call was missed or not answered
- not_a_fit: a real caller the business cannot serve
- spam: robocall, telemarketer or other junk
- neutral: none of the above applies

Respond with JSON only, no prose, in the shape:
{"category": "<one of the categories above>", "summary": "<one sentence>"}"#;

/// System prompt: the client's business-specific prompt followed by the
/// canonical category block.
pub fn build_system_prompt(business_prompt: &str) -> String {
    format!("{}\n\n{}", business_prompt.trim(), CATEGORY_BLOCK)
}

pub const DEFAULT_BUSINESS_PROMPT: &str =
    "You classify inbound phone calls for a local service business.";

/// Folds free category strings from the AI (or operator config) into the
/// closed set. Unknown strings collapse to `unreviewed`.
pub fn canonicalize(raw: &str) -> Category {
    let key = raw.trim().to_lowercase().replace(['-', ' '], "_");
    match key.as_str() {
        "converted" | "sale" | "booked" => Category::Converted,
        "warm" | "warm_lead" => Category::Warm,
        "very_good" | "very_hot" | "hot" => Category::VeryGood,
        "needs_attention" | "attention" | "follow_up" => Category::NeedsAttention,
        "applicant" | "job_applicant" => Category::Applicant,
        "voicemail" => Category::Voicemail,
        "unanswered" | "missed" | "no_answer" => Category::Unanswered,
        "not_a_fit" | "negative" | "bad_fit" | "wrong_number" => Category::NotAFit,
        "spam" | "robocall" | "telemarketer" | "junk" => Category::Spam,
        "neutral" => Category::Neutral,
        "unreviewed" => Category::Unreviewed,
        _ => Category::Unreviewed,
    }
}

/// Closed table of phrases used to salvage a category from free-form AI
/// text when JSON parsing fails. First hit wins.
const PATTERN_TABLE: &[(&str, &str)] = &[
    ("ready to book", "very_hot"),
    ("booked an appointment", "converted"),
    ("became a customer", "converted"),
    ("very strong lead", "very_hot"),
    ("promising lead", "warm"),
    ("warm lead", "warm"),
    ("needs attention", "needs_attention"),
    ("follow up", "needs_attention"),
    ("job applicant", "applicant"),
    ("applying for", "applicant"),
    ("voicemail", "voicemail"),
    ("no answer", "unanswered"),
    ("missed call", "unanswered"),
    ("robocall", "spam"),
    ("telemarketer", "spam"),
    ("spam", "spam"),
    ("wrong number", "not_a_fit"),
    ("not a fit", "not_a_fit"),
];

fn infer_from_text(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    PATTERN_TABLE
        .iter()
        .find(|(phrase, _)| lowered.contains(phrase))
        .map(|(_, category)| *category)
}

static CATEGORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""category"\s*:\s*"([^"]+)""#).expect("valid regex"));
static SUMMARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""summary"\s*:\s*"([^"]+)""#).expect("valid regex"));

#[derive(Debug, Clone)]
pub struct Classification {
    pub category: Category,
    pub raw_category: String,
    pub summary: Option<String>,
}

/// Lenient parse of the AI response: strict JSON first, then regex
/// extraction, then phrase inference over the raw text.
pub fn parse_ai_response(text: &str) -> Classification {
    let stripped = strip_code_fences(text);

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(stripped) {
        if let Some(raw) = value.get("category").and_then(|v| v.as_str()) {
            return Classification {
                category: canonicalize(raw),
                raw_category: raw.to_string(),
                summary: value
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            };
        }
    }

    if let Some(caps) = CATEGORY_RE.captures(stripped) {
        let raw = caps[1].to_string();
        return Classification {
            category: canonicalize(&raw),
            raw_category: raw,
            summary: SUMMARY_RE.captures(stripped).map(|c| c[1].to_string()),
        };
    }

    if let Some(raw) = infer_from_text(stripped) {
        return Classification {
            category: canonicalize(raw),
            raw_category: raw.to_string(),
            summary: None,
        };
    }

    Classification {
        category: Category::Unreviewed,
        raw_category: String::new(),
        summary: None,
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Provider star ratings are authoritative over what the UI displays.
pub fn rating_to_category(score: i32) -> Option<Category> {
    match score {
        5 => Some(Category::Converted),
        4 | 3 => Some(Category::VeryGood),
        2 => Some(Category::NotAFit),
        1 => Some(Category::Spam),
        _ => None,
    }
}

/// Auto-star: score derived from an AI category when the provider has no
/// rating for the call. Scores 4 and 5 are operator-only.
pub fn auto_star_score(category: Category) -> i32 {
    match category {
        Category::Spam => 1,
        Category::NotAFit => 2,
        Category::Warm | Category::VeryGood | Category::NeedsAttention => 3,
        _ => 0,
    }
}

/// Voicemail elevation: a promising voicemail without a provider rating is
/// surfaced to the team instead of waiting in a lead bucket.
pub fn elevate_for_voicemail(category: Category, is_voicemail: bool, has_provider_rating: bool) -> Category {
    if is_voicemail
        && !has_provider_rating
        && matches!(category, Category::Warm | Category::VeryGood | Category::Applicant)
    {
        Category::NeedsAttention
    } else {
        category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_is_idempotent_and_closed() {
        let inputs = [
            "very_hot", "Very-Hot", "hot", "negative", "warm", "converted",
            "garbage", "", "VOICEMAIL", "not a fit",
        ];
        for input in inputs {
            let once = canonicalize(input);
            let twice = canonicalize(once.as_str());
            assert_eq!(once, twice, "canonicalize not idempotent for {:?}", input);
        }
        assert_eq!(canonicalize("very_hot"), Category::VeryGood);
        assert_eq!(canonicalize("negative"), Category::NotAFit);
        assert_eq!(canonicalize("nonsense"), Category::Unreviewed);
    }

    #[test]
    fn stub_messages_are_detected() {
        assert!(is_provider_stub("New call from: +1555000"));
        assert!(is_provider_stub("  REPEAT CALL FROM: someone"));
        assert!(is_provider_stub("website"));
        assert!(is_provider_stub("Website visitor from Chicago"));
        assert!(!is_provider_stub("I would like to book a cleaning"));
    }

    #[test]
    fn classifiable_text_prefers_transcript_and_filters_stubs() {
        assert_eq!(
            classifiable_text(Some("hello there"), None).as_deref(),
            Some("hello there")
        );
        assert!(classifiable_text(None, Some("short")).is_none());
        assert!(classifiable_text(None, Some("New call from: +15550001111")).is_none());
        assert_eq!(
            classifiable_text(None, Some("Please call me back about my roof")).as_deref(),
            Some("Please call me back about my roof")
        );
    }

    #[test]
    fn fallback_prefers_voicemail_over_unanswered() {
        assert_eq!(fallback_category(true, true, true), Category::Voicemail);
        assert_eq!(fallback_category(false, true, false), Category::Unanswered);
        assert_eq!(fallback_category(false, false, true), Category::Unanswered);
        assert_eq!(fallback_category(false, false, false), Category::Neutral);
    }

    #[test]
    fn parses_strict_json() {
        let parsed = parse_ai_response(r#"{"category": "warm", "summary": "Caller wants a quote."}"#);
        assert_eq!(parsed.category, Category::Warm);
        assert_eq!(parsed.summary.as_deref(), Some("Caller wants a quote."));
    }

    #[test]
    fn parses_fenced_json() {
        let parsed = parse_ai_response("```json\n{\"category\": \"spam\", \"summary\": \"Robocall.\"}\n```");
        assert_eq!(parsed.category, Category::Spam);
    }

    #[test]
    fn salvages_category_with_regex_from_broken_json() {
        let parsed = parse_ai_response(r#"Sure! {"category":"very_hot","summary":"Ready to book" oops"#);
        assert_eq!(parsed.category, Category::VeryGood);
        assert_eq!(parsed.raw_category, "very_hot");
    }

    #[test]
    fn infers_category_from_free_text() {
        let parsed = parse_ai_response("The caller sounded ready to book an appointment soon.");
        assert_eq!(parsed.category, Category::VeryGood);
        let parsed = parse_ai_response("This was clearly a robocall.");
        assert_eq!(parsed.category, Category::Spam);
    }

    #[test]
    fn unusable_text_collapses_to_unreviewed() {
        let parsed = parse_ai_response("I cannot help with that.");
        assert_eq!(parsed.category, Category::Unreviewed);
    }

    #[test]
    fn rating_to_category_table() {
        assert_eq!(rating_to_category(5), Some(Category::Converted));
        assert_eq!(rating_to_category(4), Some(Category::VeryGood));
        assert_eq!(rating_to_category(3), Some(Category::VeryGood));
        assert_eq!(rating_to_category(2), Some(Category::NotAFit));
        assert_eq!(rating_to_category(1), Some(Category::Spam));
        assert_eq!(rating_to_category(0), None);
    }

    #[test]
    fn auto_star_never_produces_four_or_five() {
        for category in [
            Category::Converted, Category::Warm, Category::VeryGood, Category::NeedsAttention,
            Category::Applicant, Category::Voicemail, Category::Unanswered, Category::NotAFit,
            Category::Spam, Category::Neutral, Category::Unreviewed,
        ] {
            assert!(auto_star_score(category) <= 3);
        }
    }

    #[test]
    fn voicemail_elevation_applies_only_without_rating() {
        assert_eq!(
            elevate_for_voicemail(Category::Warm, true, false),
            Category::NeedsAttention
        );
        assert_eq!(elevate_for_voicemail(Category::Warm, true, true), Category::Warm);
        assert_eq!(elevate_for_voicemail(Category::Warm, false, false), Category::Warm);
        assert_eq!(elevate_for_voicemail(Category::Spam, true, false), Category::Spam);
    }

    #[test]
    fn system_prompt_embeds_business_prompt_and_category_set() {
        let prompt = build_system_prompt("You classify calls for a roofing company.");
        assert!(prompt.starts_with("You classify calls for a roofing company."));
        for name in ["converted", "warm", "very_good", "needs_attention", "applicant",
                     "voicemail", "unanswered", "not_a_fit", "spam", "neutral"] {
            assert!(prompt.contains(name), "prompt missing category {}", name);
        }
        assert!(prompt.contains("JSON"));
    }
}
