use std::sync::OnceLock;

use regex::Regex;

/// Patterns tried in order; the first pattern with any match wins and the
/// earliest match of that pattern in the text is returned.
const OTP_PATTERNS: [&str; 5] = [
    r"\b(\d{6})\b",
    r"(?i)OTP[:\s]*(\d{6})",
    r"(?i)code[:\s]*(\d{6})",
    r"(?i)verification[:\s]*(\d{6})",
    r"(?i)token[:\s]*(\d{6})",
];

fn compiled_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        OTP_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Pulls a six-digit one-time code out of an email body.
pub fn extract_otp(text: &str) -> Option<String> {
    compiled_patterns().iter().find_map(|pattern| {
        pattern
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|code| code.as_str().to_string())
    })
}
