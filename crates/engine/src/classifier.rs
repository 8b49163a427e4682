//! Failure classification: error text plus attempt count to a recovery strategy.
//!
//! Rules are checked in a fixed order and matched case-insensitively:
//!
//! 1. size, length or format violations → `alternative`
//! 2. authorization or permission denials → `manual_intervention`
//! 3. transient server or network trouble → `retry`, then `skip`
//! 4. anything else → `retry`, then `alternative`
//!
//! Status codes only match as whole tokens, so "4013" is not a 401.

use taskpilot_core::FailureStrategy;

const SIZE_OR_FORMAT: &[&str] = &[
    "too long",
    "too large",
    "too big",
    "exceeds",
    "length exceeded",
    "max length",
    "maximum length",
    "character limit",
    "payload too large",
    "invalid format",
    "format error",
    "unsupported format",
];
const SIZE_OR_FORMAT_CODES: &[&str] = &["413", "414"];

const AUTH: &[&str] = &[
    "unauthorized",
    "unauthorised",
    "forbidden",
    "permission",
    "access denied",
    "authentication",
    "not authorized",
    "invalid token",
    "invalid credentials",
];
const AUTH_CODES: &[&str] = &["401", "403"];

const TRANSIENT: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "network",
    "connection reset",
    "connection refused",
    "connection closed",
    "unavailable",
    "temporarily",
    "try again",
    "server error",
    "bad gateway",
];
const TRANSIENT_CODES: &[&str] = &["429", "500", "502", "503", "504"];

/// Maps failures to strategies. Pure and deterministic.
#[derive(Debug, Clone, Copy)]
pub struct FailureClassifier {
    max_retries: u32,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

impl FailureClassifier {
    /// `max_retries` is the attempt count at which retrying stops.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn classify(&self, error: &str, attempts: u32) -> FailureStrategy {
        let lower = error.to_lowercase();
        let retry_left = attempts < self.max_retries;

        if matches_any(&lower, SIZE_OR_FORMAT, SIZE_OR_FORMAT_CODES) {
            FailureStrategy::Alternative
        } else if matches_any(&lower, AUTH, AUTH_CODES) {
            FailureStrategy::ManualIntervention
        } else if matches_any(&lower, TRANSIENT, TRANSIENT_CODES) {
            if retry_left {
                FailureStrategy::Retry
            } else {
                FailureStrategy::Skip
            }
        } else if retry_left {
            FailureStrategy::Retry
        } else {
            FailureStrategy::Alternative
        }
    }
}

/// Classify with the default retry threshold.
pub fn classify(error: &str, attempts: u32) -> FailureStrategy {
    FailureClassifier::default().classify(error, attempts)
}

fn matches_any(lower: &str, phrases: &[&str], codes: &[&str]) -> bool {
    phrases.iter().any(|p| lower.contains(p))
        || lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| codes.contains(&token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use FailureStrategy::*;

    #[test]
    fn reference_cases() {
        assert_eq!(classify("401 Unauthorized", 1), ManualIntervention);
        assert_eq!(classify("timeout", 1), Retry);
        assert_eq!(classify("timeout", 2), Skip);
        assert_eq!(classify("exceeds 280 characters", 1), Alternative);
    }

    #[test]
    fn size_rule_outranks_auth() {
        assert_eq!(classify("403: payload too large", 1), Alternative);
    }

    #[test]
    fn auth_outranks_transient() {
        assert_eq!(classify("permission denied after timeout", 1), ManualIntervention);
    }

    #[test]
    fn transient_variants() {
        assert_eq!(classify("HTTP 503: Service Unavailable", 1), Retry);
        assert_eq!(classify("Rate limit exceeded", 1), Retry);
        assert_eq!(classify("connection refused", 3), Skip);
        assert_eq!(classify("request timed out: deadline", 2), Skip);
    }

    #[test]
    fn status_codes_match_whole_tokens() {
        assert_eq!(classify("order 4013 not found", 1), Retry);
        assert_eq!(classify("order 4013 not found", 2), Alternative);
        assert_eq!(classify("status=401", 1), ManualIntervention);
    }

    #[test]
    fn unknown_errors_fall_back_to_alternative() {
        assert_eq!(classify("something odd happened", 1), Retry);
        assert_eq!(classify("something odd happened", 2), Alternative);
    }

    #[test]
    fn size_words_inside_identifiers_do_not_count() {
        assert_eq!(classify("Tool get_length failed: HTTP 503", 1), Retry);
        assert_eq!(classify("Malformed response: missing result", 1), Retry);
        assert_eq!(classify("Malformed response: missing result", 2), Alternative);
        assert_eq!(classify("text exceeds maximum length", 1), Alternative);
        assert_eq!(classify("field length exceeded", 1), Alternative);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(classify("FORBIDDEN", 1), ManualIntervention);
        assert_eq!(classify("Message EXCEEDS limit", 1), Alternative);
    }

    #[test]
    fn custom_threshold() {
        let strict = FailureClassifier::new(1);
        assert_eq!(strict.classify("timeout", 1), Skip);
        let lenient = FailureClassifier::new(4);
        assert_eq!(lenient.classify("timeout", 3), Retry);
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let inputs = [("401 Unauthorized", 1), ("timeout", 2), ("weird", 5)];
        for (text, attempts) in inputs {
            let first = classify(text, attempts);
            for _ in 0..5 {
                assert_eq!(classify(text, attempts), first);
            }
        }
    }
}
