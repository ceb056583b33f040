use super::models::ChatMessage;

/// Estimate the number of tokens in a text string.
///
/// Whitespace-separated words plus half the punctuation count. Accurate to
/// within ~10-15% of real tokenization, which is enough for budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    word_count + punct_count / 2
}

/// Estimated token count across a whole message list.
pub fn count_messages_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// Drop trailing messages until the estimate fits the limit.
///
/// Message order is arranged so the most important context sits at the
/// front; trimming therefore always pops from the tail.
pub fn trim_messages_to_limit(messages: &mut Vec<ChatMessage>, limit: usize) {
    let mut count = count_messages_tokens(messages);
    while count > limit && messages.len() > 1 {
        messages.pop();
        count = count_messages_tokens(messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_counts_words_and_punctuation() {
        let estimate = estimate_tokens("range.getCell(0, 0).values = [[1]];");
        assert!(estimate > 1);
    }

    #[test]
    fn test_trim_drops_from_tail() {
        let mut messages = vec![
            ChatMessage::user("keep this first message"),
            ChatMessage::user("word ".repeat(500)),
            ChatMessage::user("word ".repeat(500)),
        ];
        trim_messages_to_limit(&mut messages, 600);
        assert!(messages.len() < 3);
        assert_eq!(messages[0].content, "keep this first message");
    }

    #[test]
    fn test_trim_never_drops_the_head() {
        let mut messages = vec![ChatMessage::user("word ".repeat(500))];
        trim_messages_to_limit(&mut messages, 10);
        assert_eq!(messages.len(), 1);
    }
}
