//! The summarization prompt.
//!
//! Kept in one place so a wording change touches exactly one constant and
//! tests can assert on the exact text the summarizer receives.

/// Fixed question placed in front of the extracted document text.
pub const SUMMARY_PROMPT_PREFIX: &str = "Can you explain what the following text is about?";

/// Build the user prompt for `text`.
pub fn summary_prompt(text: &str) -> String {
    format!("{SUMMARY_PROMPT_PREFIX} {text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_wraps_text() {
        assert_eq!(
            summary_prompt("Invoice #12 Total: 40"),
            "Can you explain what the following text is about? Invoice #12 Total: 40"
        );
    }

    #[test]
    fn empty_text_still_has_question() {
        assert_eq!(summary_prompt(""), format!("{SUMMARY_PROMPT_PREFIX} "));
    }
}
