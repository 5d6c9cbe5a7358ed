//! Last-resort detection of "session no longer exists" rejections by text
//! pattern. Structured error fields are preferred when the agent emits JSON;
//! this phrase list only applies to non-JSON output.

/// Phrases (lowercase) that signal a dead or unknown session.
const STALE_PHRASES: &[&str] = &[
    "no conversation found with session id",
    "session not found",
    "session expired",
    "unknown session",
    "no session found",
    "conversation not found",
    "thread not found",
];

/// Case-insensitive match of any stale-session phrase in `raw`.
pub fn phrase_match(raw: &str) -> bool {
    let lower = raw.to_lowercase();
    STALE_PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_the_claude_wording() {
        assert!(phrase_match(
            "Error: No conversation found with session ID t-1"
        ));
    }

    #[test]
    fn detects_generic_wordings_case_insensitively() {
        assert!(phrase_match("SESSION EXPIRED, please start over"));
        assert!(phrase_match("error: unknown session 'abc'"));
    }

    #[test]
    fn normal_output_is_not_stale() {
        assert!(!phrase_match("Here is the summary you asked for."));
        assert!(!phrase_match(""));
    }
}
