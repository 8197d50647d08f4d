//! Rough token estimation for budgeting decisions.
//!
//! Providers report exact usage after each call; this estimate only guides
//! local choices (compaction prompts, previews) before a call happens.

/// Approximate token count: ~4 characters per token for code-heavy text.
pub fn estimate_token_count(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate for a batch of strings.
pub fn estimate_total(texts: impl IntoIterator<Item = impl AsRef<str>>) -> usize {
    texts
        .into_iter()
        .map(|text| estimate_token_count(text.as_ref()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_token_count(""), 0);
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_token_count("abcde"), 2);
    }
}
